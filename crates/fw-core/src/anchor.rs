use serde::{Deserialize, Serialize};

use crate::backend::{TrackableHandle, TrackableState};
use crate::ids::AnchorId;
use crate::pose::Pose;

/// Debounces the backend's reliable-tracking flag.
///
/// Drops to unlocated immediately; rises to located only after the raw flag
/// has held for `dwell` seconds without interruption.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LocatedDebounce {
    reliable_since: Option<f64>,
    located: bool,
}

impl LocatedDebounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the raw flag observed at time `now`. Returns the debounced state.
    pub fn update(&mut self, reliable: bool, now: f64, dwell: f64) -> bool {
        if !reliable {
            self.reliable_since = None;
            self.located = false;
            return false;
        }
        let since = *self.reliable_since.get_or_insert(now);
        self.located = now - since >= dwell;
        self.located
    }

    pub fn is_located(&self) -> bool {
        self.located
    }
}

/// A live tracking point in spongy space.
#[derive(Clone, Debug)]
pub struct SpongyAnchor {
    pub id: AnchorId,
    pub trackable: TrackableHandle,
    pub pose: Pose,
    pub is_saved: bool,
    /// Last time the head was within the eviction radius.
    pub last_near: f64,
    debounce: LocatedDebounce,
}

impl SpongyAnchor {
    pub fn new(id: AnchorId, trackable: TrackableHandle, pose: Pose, now: f64) -> Self {
        Self {
            id,
            trackable,
            pose,
            is_saved: false,
            last_near: now,
            debounce: LocatedDebounce::new(),
        }
    }

    pub fn is_located(&self) -> bool {
        self.debounce.is_located()
    }

    /// Apply a backend observation.
    pub fn observe(&mut self, state: &TrackableState, now: f64, dwell: f64) {
        if state.reliably_tracked {
            self.pose = state.pose;
        }
        self.debounce.update(state.reliably_tracked, now, dwell);
    }

    pub fn snapshot(&self) -> SpongyAnchorPose {
        SpongyAnchorPose {
            id: self.id,
            pose: self.pose,
            is_located: self.is_located(),
        }
    }
}

/// What the engine sees of a spongy anchor each cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpongyAnchorPose {
    pub id: AnchorId,
    pub pose: Pose,
    pub is_located: bool,
}
