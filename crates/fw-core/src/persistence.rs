//! Named-trackable persistence: save spongy anchors under stable names and
//! bring them back against a restored frozen state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::backend::{LoadStatus, TrackableBackend};
use crate::constants::ANCHOR_NAME_PREFIX;
use crate::engine::{Engine, FrozenSnapshot};
use crate::error::{EngineFault, EngineResult};
use crate::graph::SpongyAnchorStore;
use crate::ids::{AnchorEdge, AnchorId};

/// Everything needed to rehydrate a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub frozen: FrozenSnapshot,
    pub next_anchor_id: AnchorId,
    #[serde(default)]
    pub saved_anchor_ids: Vec<AnchorId>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            frozen: FrozenSnapshot::default(),
            next_anchor_id: AnchorId::FIRST_VALID,
            saved_anchor_ids: Vec::new(),
        }
    }
}

impl SessionSnapshot {
    /// Reject ids the store could never have assigned.
    pub fn validate(&self) -> EngineResult<()> {
        let ids = self
            .frozen
            .anchors
            .iter()
            .map(|a| a.id)
            .chain(self.frozen.edges.iter().flat_map(|e| [e.id1(), e.id2()]))
            .chain(self.saved_anchor_ids.iter().copied());
        for id in ids {
            if !id.is_valid() {
                return Err(EngineFault::new(format!("anchor id {} out of range", id.0)));
            }
        }
        if self.next_anchor_id.0 > AnchorId::MAX.0 + 1 {
            return Err(EngineFault::new(format!(
                "next anchor id {} out of range",
                self.next_anchor_id.0
            )));
        }
        Ok(())
    }
}

pub fn anchor_name(id: AnchorId) -> String {
    format!("{ANCHOR_NAME_PREFIX}{}", id.0)
}

pub fn parse_anchor_name(name: &str) -> Option<AnchorId> {
    name.strip_prefix(ANCHOR_NAME_PREFIX)?
        .parse()
        .ok()
        .map(AnchorId)
        .filter(|id: &AnchorId| id.is_valid())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReport {
    pub saved: usize,
    /// Already saved before this call.
    pub skipped: usize,
    pub failed: usize,
    pub unsupported: bool,
}

/// Outcome of one load poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadProgress {
    pub restored: Vec<AnchorId>,
    pub missing: Vec<AnchorId>,
    pub pending: usize,
}

impl LoadProgress {
    pub fn is_done(&self) -> bool {
        self.pending == 0
    }
}

#[derive(Debug, Default)]
pub struct PersistenceManager {
    pending: BTreeSet<AnchorId>,
    edges: Vec<AnchorEdge>,
    loading: bool,
}

impl PersistenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Anchors of the load in progress not yet resolved.
    pub fn pending_ids(&self) -> impl Iterator<Item = AnchorId> + '_ {
        self.pending.iter().copied()
    }

    /// Saved edges waiting for the load to finish.
    pub fn pending_edges(&self) -> &[AnchorEdge] {
        &self.edges
    }

    /// Persist every anchor not yet saved. Re-saving is a no-op.
    pub fn save<B: TrackableBackend>(
        &self,
        store: &mut SpongyAnchorStore,
        backend: &mut B,
    ) -> SaveReport {
        let mut report = SaveReport::default();
        if !backend.supports_persistence() {
            report.unsupported = true;
            return report;
        }

        let targets: Vec<_> = store.anchors().map(|a| (a.id, a.trackable, a.is_saved)).collect();
        for (id, trackable, is_saved) in targets {
            if is_saved {
                report.skipped += 1;
            } else if backend.persist_by_name(trackable, &anchor_name(id)) {
                store.mark_saved(id);
                report.saved += 1;
            } else {
                tracing::warn!("failed to persist anchor {id}");
                report.failed += 1;
            }
        }
        tracing::debug!(
            "save: {} saved, {} skipped, {} failed",
            report.saved,
            report.skipped,
            report.failed
        );
        report
    }

    /// Start resolving `ids` against the backend. Without persistence support
    /// the frozen state is cleared so both spaces agree on what exists.
    pub fn begin_load<E: Engine, B: TrackableBackend>(
        &mut self,
        ids: Vec<AnchorId>,
        edges: Vec<AnchorEdge>,
        engine: &mut E,
        backend: &B,
    ) -> EngineResult<()> {
        self.pending.clear();
        self.edges.clear();
        self.loading = false;

        if !backend.supports_persistence() {
            tracing::warn!("backend has no persistence, clearing {} frozen anchors", ids.len());
            return engine.clear_frozen();
        }
        if ids.is_empty() {
            return Ok(());
        }

        tracing::info!("loading {} persisted anchors", ids.len());
        self.pending = ids.into_iter().collect();
        self.edges = edges;
        self.loading = true;
        Ok(())
    }

    /// Poll the backend once for every unresolved anchor.
    ///
    /// Found anchors join the store already marked saved; misses are removed
    /// from the engine's frozen state. When the last anchor resolves, the
    /// saved edges among restored anchors are put back.
    pub fn poll_load<E: Engine, B: TrackableBackend>(
        &mut self,
        store: &mut SpongyAnchorStore,
        engine: &mut E,
        backend: &mut B,
        now: f64,
    ) -> EngineResult<LoadProgress> {
        let mut progress = LoadProgress::default();
        if !self.loading {
            return Ok(progress);
        }

        let ids: Vec<AnchorId> = self.pending.iter().copied().collect();
        for id in ids {
            match backend.load_by_name(&anchor_name(id)) {
                LoadStatus::Pending => {}
                LoadStatus::Found(handle) => {
                    let state = backend.query_state(handle);
                    if store.insert_restored(id, handle, state.pose, now) {
                        progress.restored.push(id);
                    } else {
                        backend.destroy_trackable(handle);
                    }
                    self.pending.remove(&id);
                }
                LoadStatus::NotFound => {
                    tracing::warn!("persisted anchor {id} not found, dropping frozen counterpart");
                    engine.remove_frozen_anchor(id)?;
                    progress.missing.push(id);
                    self.pending.remove(&id);
                }
            }
        }

        progress.pending = self.pending.len();
        if self.pending.is_empty() {
            store.replace_edges(std::mem::take(&mut self.edges));
            self.loading = false;
            tracing::info!("persisted anchor load complete, {} anchors live", store.len());
        }
        Ok(progress)
    }

    /// Abandon any load in progress.
    pub fn cancel(&mut self) {
        self.pending.clear();
        self.edges.clear();
        self.loading = false;
    }
}
