//! Capabilities the engine consumes from the host platform.
//!
//! Every platform (and the simulator in `sim`) supplies one implementation of
//! each trait; nothing above this layer branches on platform identity.

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::pose::Pose;

/// Opaque handle to a raw tracking point owned by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackableHandle(pub u64);

/// Backend view of a trackable at the current tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackableState {
    /// Raw reliability flag, before debouncing.
    pub reliably_tracked: bool,
    /// Pose in spongy space.
    pub pose: Pose,
    /// The backend will never track this point again.
    pub lost: bool,
}

impl TrackableState {
    pub fn lost() -> Self {
        Self {
            reliably_tracked: false,
            pose: Pose::identity(),
            lost: true,
        }
    }
}

/// Progress of a named-trackable load, observed by polling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Found(TrackableHandle),
    NotFound,
}

pub trait TrackableBackend {
    /// Materialize a tracking point at `pose` in spongy space.
    fn create_trackable(&mut self, pose: &Pose) -> Result<TrackableHandle, BackendError>;

    /// Release a tracking point. Unknown handles are ignored.
    fn destroy_trackable(&mut self, handle: TrackableHandle);

    /// Current state of a tracking point. Unknown handles report as lost.
    fn query_state(&self, handle: TrackableHandle) -> TrackableState;

    /// Whether named persistence is available at all.
    fn supports_persistence(&self) -> bool {
        false
    }

    /// Store a tracking point under `name`. Returns false on failure.
    fn persist_by_name(&mut self, _handle: TrackableHandle, _name: &str) -> bool {
        false
    }

    /// Resolve a previously persisted tracking point. Called once per tick
    /// until it stops returning `Pending`.
    fn load_by_name(&mut self, _name: &str) -> LoadStatus {
        LoadStatus::NotFound
    }
}

/// Source of the head pose in spongy space.
pub trait PoseSource {
    /// The tracking subsystem finished initializing.
    fn is_ready(&self) -> bool {
        true
    }

    /// The current head pose can be trusted.
    fn is_tracking(&self) -> bool;

    fn head_pose(&self) -> Pose;
}
