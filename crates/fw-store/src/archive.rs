//! Named-trackable persistence for backends that have none of their own.

use fw_core::{
    BackendError, LoadStatus, Pose, TrackableBackend, TrackableHandle, TrackableState,
};

use crate::error::Result;
use crate::store::Store;

/// Wraps a backend and records persisted trackables in SQLite.
///
/// `persist_by_name` stores the trackable's current spongy pose under the
/// name; `load_by_name` recreates a trackable at that pose through the
/// wrapped backend. Loads resolve on the first poll.
pub struct AnchorArchive<B> {
    inner: B,
    store: Store,
}

impl<B: TrackableBackend> AnchorArchive<B> {
    pub fn new(inner: B, store: Store) -> Self {
        Self { inner, store }
    }

    pub fn in_memory(inner: B) -> Result<Self> {
        Ok(Self::new(inner, Store::open_in_memory()?))
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.inner
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn into_parts(self) -> (B, Store) {
        (self.inner, self.store)
    }
}

impl<B: TrackableBackend> TrackableBackend for AnchorArchive<B> {
    fn create_trackable(
        &mut self,
        pose: &Pose,
    ) -> std::result::Result<TrackableHandle, BackendError> {
        self.inner.create_trackable(pose)
    }

    fn destroy_trackable(&mut self, handle: TrackableHandle) {
        self.inner.destroy_trackable(handle);
    }

    fn query_state(&self, handle: TrackableHandle) -> TrackableState {
        self.inner.query_state(handle)
    }

    fn supports_persistence(&self) -> bool {
        true
    }

    fn persist_by_name(&mut self, handle: TrackableHandle, name: &str) -> bool {
        let state = self.inner.query_state(handle);
        if state.lost {
            return false;
        }
        match self.store.put_named(name, &state.pose) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("failed to archive trackable {name}: {e}");
                false
            }
        }
    }

    fn load_by_name(&mut self, name: &str) -> LoadStatus {
        let pose = match self.store.get_named(name) {
            Ok(Some(pose)) => pose,
            Ok(None) => return LoadStatus::NotFound,
            Err(e) => {
                tracing::error!("failed to read archived trackable {name}: {e}");
                return LoadStatus::NotFound;
            }
        };
        match self.inner.create_trackable(&pose) {
            Ok(handle) => LoadStatus::Found(handle),
            Err(e) => {
                tracing::warn!("could not recreate archived trackable {name}: {e}");
                LoadStatus::NotFound
            }
        }
    }
}
