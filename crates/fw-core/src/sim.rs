//! In-memory tracking backend and head, for tests, benches and the CLI
//! simulator.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::backend::{LoadStatus, PoseSource, TrackableBackend, TrackableHandle, TrackableState};
use crate::error::BackendError;
use crate::pose::{Pose, Vector3};

/// Head whose pose and tracking flags are set by the caller.
#[derive(Clone, Debug)]
pub struct SimulatedHead {
    pub pose: Pose,
    pub tracking: bool,
    pub ready: bool,
}

impl Default for SimulatedHead {
    fn default() -> Self {
        Self {
            pose: Pose::identity(),
            tracking: true,
            ready: true,
        }
    }
}

impl SimulatedHead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(position: Vector3) -> Self {
        Self {
            pose: Pose::from_position(position),
            ..Self::default()
        }
    }

    pub fn move_to(&mut self, position: Vector3) {
        self.pose.position = position;
    }
}

impl PoseSource for SimulatedHead {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn is_tracking(&self) -> bool {
        self.tracking
    }

    fn head_pose(&self) -> Pose {
        self.pose
    }
}

#[derive(Clone, Debug)]
struct SimTrackable {
    pose: Pose,
    reliable: bool,
}

/// Backend keeping tracking points in a map.
///
/// Trackables are reliable on creation. Failure injection, tracking loss,
/// spongy-frame jumps, random drift and named persistence with a configurable
/// load latency are all driven explicitly by the caller.
#[derive(Debug)]
pub struct SimulatedBackend {
    trackables: BTreeMap<TrackableHandle, SimTrackable>,
    next_handle: u64,
    failing_creates: u32,
    persistence: bool,
    persisted: BTreeMap<String, Pose>,
    load_latency: u32,
    pending_loads: BTreeMap<String, u32>,
    drift: f64,
    rng: SmallRng,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            trackables: BTreeMap::new(),
            next_handle: 1,
            failing_creates: 0,
            persistence: true,
            persisted: BTreeMap::new(),
            load_latency: 0,
            pending_loads: BTreeMap::new(),
            drift: 0.0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Number of polls a load stays `Pending` before resolving.
    pub fn with_load_latency(mut self, polls: u32) -> Self {
        self.load_latency = polls;
        self
    }

    pub fn with_persisted(mut self, name: &str, pose: Pose) -> Self {
        self.persisted.insert(name.to_string(), pose);
        self
    }

    pub fn set_persistence(&mut self, enabled: bool) {
        self.persistence = enabled;
    }

    /// The next `n` creations fail.
    pub fn fail_next_creates(&mut self, n: u32) {
        self.failing_creates = n;
    }

    /// Drop a trackable; it reports as lost from now on.
    pub fn mark_lost(&mut self, handle: TrackableHandle) {
        self.trackables.remove(&handle);
    }

    pub fn set_reliable(&mut self, handle: TrackableHandle, reliable: bool) {
        if let Some(t) = self.trackables.get_mut(&handle) {
            t.reliable = reliable;
        }
    }

    /// Teleport one trackable, as when the tracker revises its estimate.
    pub fn set_pose(&mut self, handle: TrackableHandle, pose: Pose) {
        if let Some(t) = self.trackables.get_mut(&handle) {
            t.pose = pose;
        }
    }

    pub fn set_all_reliable(&mut self, reliable: bool) {
        for t in self.trackables.values_mut() {
            t.reliable = reliable;
        }
    }

    /// Move every trackable by `jump`, as when the spongy frame snaps after
    /// relocalization.
    pub fn transform_all(&mut self, jump: &Pose) {
        for t in self.trackables.values_mut() {
            t.pose = *jump * t.pose;
        }
    }

    /// Maximum per-axis random offset applied by [`Self::step_drift`].
    pub fn set_drift(&mut self, drift: f64) {
        self.drift = drift;
    }

    pub fn step_drift(&mut self) {
        if self.drift <= 0.0 {
            return;
        }
        for t in self.trackables.values_mut() {
            let offset = Vector3::new(
                self.rng.random_range(-self.drift..=self.drift),
                self.rng.random_range(-self.drift..=self.drift),
                self.rng.random_range(-self.drift..=self.drift),
            );
            t.pose.position = t.pose.position + offset;
        }
    }

    pub fn trackable_count(&self) -> usize {
        self.trackables.len()
    }

    pub fn pose_of(&self, handle: TrackableHandle) -> Option<Pose> {
        self.trackables.get(&handle).map(|t| t.pose)
    }

    pub fn persisted_names(&self) -> impl Iterator<Item = &str> {
        self.persisted.keys().map(String::as_str)
    }

    pub fn persisted_pose(&self, name: &str) -> Option<Pose> {
        self.persisted.get(name).copied()
    }

    pub fn forget(&mut self, name: &str) {
        self.persisted.remove(name);
    }

    fn insert(&mut self, pose: Pose) -> TrackableHandle {
        let handle = TrackableHandle(self.next_handle);
        self.next_handle += 1;
        self.trackables.insert(
            handle,
            SimTrackable {
                pose,
                reliable: true,
            },
        );
        handle
    }
}

impl TrackableBackend for SimulatedBackend {
    fn create_trackable(&mut self, pose: &Pose) -> Result<TrackableHandle, BackendError> {
        if self.failing_creates > 0 {
            self.failing_creates -= 1;
            return Err(BackendError::CreationFailed("injected failure".into()));
        }
        Ok(self.insert(*pose))
    }

    fn destroy_trackable(&mut self, handle: TrackableHandle) {
        self.trackables.remove(&handle);
    }

    fn query_state(&self, handle: TrackableHandle) -> TrackableState {
        match self.trackables.get(&handle) {
            Some(t) => TrackableState {
                reliably_tracked: t.reliable,
                pose: t.pose,
                lost: false,
            },
            None => TrackableState::lost(),
        }
    }

    fn supports_persistence(&self) -> bool {
        self.persistence
    }

    fn persist_by_name(&mut self, handle: TrackableHandle, name: &str) -> bool {
        if !self.persistence {
            return false;
        }
        match self.trackables.get(&handle) {
            Some(t) => {
                self.persisted.insert(name.to_string(), t.pose);
                true
            }
            None => false,
        }
    }

    fn load_by_name(&mut self, name: &str) -> LoadStatus {
        if !self.persistence {
            return LoadStatus::NotFound;
        }
        let Some(pose) = self.persisted.get(name).copied() else {
            return LoadStatus::NotFound;
        };
        let remaining = self
            .pending_loads
            .entry(name.to_string())
            .or_insert(self.load_latency);
        if *remaining > 0 {
            *remaining -= 1;
            return LoadStatus::Pending;
        }
        self.pending_loads.remove(name);
        LoadStatus::Found(self.insert(pose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_query() {
        let mut backend = SimulatedBackend::new();
        let pose = Pose::from_position(Vector3::new(1.0, 2.0, 3.0));
        let handle = backend.create_trackable(&pose).unwrap();
        let state = backend.query_state(handle);
        assert!(state.reliably_tracked);
        assert!(!state.lost);
        assert_eq!(state.pose, pose);
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let mut backend = SimulatedBackend::new();
        backend.fail_next_creates(2);
        assert!(backend.create_trackable(&Pose::identity()).is_err());
        assert!(backend.create_trackable(&Pose::identity()).is_err());
        assert!(backend.create_trackable(&Pose::identity()).is_ok());
    }

    #[test]
    fn test_lost_trackable_reports_lost() {
        let mut backend = SimulatedBackend::new();
        let handle = backend.create_trackable(&Pose::identity()).unwrap();
        backend.mark_lost(handle);
        assert!(backend.query_state(handle).lost);
        assert_eq!(backend.trackable_count(), 0);
    }

    #[test]
    fn test_load_latency() {
        let mut backend = SimulatedBackend::new()
            .with_load_latency(2)
            .with_persisted("a", Pose::identity());
        assert_eq!(backend.load_by_name("a"), LoadStatus::Pending);
        assert_eq!(backend.load_by_name("a"), LoadStatus::Pending);
        assert!(matches!(backend.load_by_name("a"), LoadStatus::Found(_)));
        assert_eq!(backend.load_by_name("b"), LoadStatus::NotFound);
    }

    #[test]
    fn test_persistence_disabled() {
        let mut backend = SimulatedBackend::new().with_persisted("a", Pose::identity());
        backend.set_persistence(false);
        let handle = backend.create_trackable(&Pose::identity()).unwrap();
        assert!(!backend.persist_by_name(handle, "b"));
        assert_eq!(backend.load_by_name("a"), LoadStatus::NotFound);
    }

    #[test]
    fn test_drift_is_seeded() {
        let mut a = SimulatedBackend::with_seed(7);
        let mut b = SimulatedBackend::with_seed(7);
        let ha = a.create_trackable(&Pose::identity()).unwrap();
        let hb = b.create_trackable(&Pose::identity()).unwrap();
        a.set_drift(0.01);
        b.set_drift(0.01);
        a.step_drift();
        b.step_drift();
        assert_eq!(a.pose_of(ha), b.pose_of(hb));
        assert!(a.pose_of(ha).unwrap().position.length() <= 0.01 * 3f64.sqrt());
    }
}
