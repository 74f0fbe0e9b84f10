//! The spongy anchor store: live anchors, the edges between them, and the
//! delta the engine has not yet consumed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::anchor::{SpongyAnchor, SpongyAnchorPose};
use crate::backend::{TrackableBackend, TrackableHandle};
use crate::config::{AnchorConfig, EvictionConfig};
use crate::density::{DensityPlan, plan_density};
use crate::error::{BackendError, EngineFault, EngineResult};
use crate::ids::{AnchorEdge, AnchorId};
use crate::pose::Pose;

/// Graph changes since the engine last acknowledged a cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDelta {
    /// Drop every edge the engine knows before applying `added_edges`.
    pub cleared: bool,
    pub added_edges: Vec<AnchorEdge>,
    pub removed_anchors: Vec<AnchorId>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.added_edges.is_empty() && self.removed_anchors.is_empty()
    }
}

/// What the density step did this tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DensityOutcome {
    pub created: Option<AnchorId>,
    pub edges_added: usize,
    pub creation_failed: bool,
}

pub struct SpongyAnchorStore {
    anchors: BTreeMap<AnchorId, SpongyAnchor>,
    edges: BTreeSet<AnchorEdge>,
    next_id: AnchorId,
    delta: GraphDelta,
}

impl Default for SpongyAnchorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SpongyAnchorStore {
    pub fn new() -> Self {
        Self {
            anchors: BTreeMap::new(),
            edges: BTreeSet::new(),
            next_id: AnchorId::FIRST_VALID,
            delta: GraphDelta::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn get(&self, id: AnchorId) -> Option<&SpongyAnchor> {
        self.anchors.get(&id)
    }

    pub fn anchors(&self) -> impl Iterator<Item = &SpongyAnchor> {
        self.anchors.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &AnchorEdge> {
        self.edges.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_edge(&self, a: AnchorId, b: AnchorId) -> bool {
        AnchorEdge::new(a, b).is_some_and(|e| self.edges.contains(&e))
    }

    /// Id the next created anchor will receive.
    pub fn next_id(&self) -> AnchorId {
        self.next_id
    }

    /// Make sure ids up to and including `id` are never handed out again.
    pub fn reserve_through(&mut self, id: AnchorId) -> EngineResult<()> {
        let next = id
            .next()
            .filter(|_| id.is_valid())
            .ok_or_else(|| EngineFault::new(format!("anchor id {} out of range", id.0)))?;
        if next > self.next_id {
            self.next_id = next;
        }
        Ok(())
    }

    /// Create an anchor at `pose` through the backend. The id is consumed only
    /// on success.
    pub fn create_anchor<B: TrackableBackend>(
        &mut self,
        backend: &mut B,
        pose: &Pose,
        now: f64,
    ) -> Result<AnchorId, BackendError> {
        let id = self.next_id;
        let following = id
            .next()
            .filter(|_| id.is_valid())
            .ok_or(BackendError::IdsExhausted)?;
        let handle = backend.create_trackable(pose)?;
        self.next_id = following;
        self.anchors
            .insert(id, SpongyAnchor::new(id, handle, *pose, now));
        Ok(id)
    }

    /// Bind a restored trackable to a known id. Returns false if the id is taken.
    pub fn insert_restored(
        &mut self,
        id: AnchorId,
        handle: TrackableHandle,
        pose: Pose,
        now: f64,
    ) -> bool {
        if self.anchors.contains_key(&id) || self.reserve_through(id).is_err() {
            return false;
        }
        let mut anchor = SpongyAnchor::new(id, handle, pose, now);
        anchor.is_saved = true;
        self.anchors.insert(id, anchor);
        true
    }

    /// Add an edge between two live anchors. Returns true only if it is new.
    pub fn add_edge(&mut self, a: AnchorId, b: AnchorId) -> bool {
        if !self.anchors.contains_key(&a) || !self.anchors.contains_key(&b) {
            return false;
        }
        let Some(edge) = AnchorEdge::new(a, b) else {
            return false;
        };
        if !self.edges.insert(edge) {
            return false;
        }
        self.delta.added_edges.push(edge);
        true
    }

    /// Destroy an anchor, its edges and its trackable.
    pub fn remove_anchor<B: TrackableBackend>(
        &mut self,
        id: AnchorId,
        backend: &mut B,
    ) -> Option<SpongyAnchor> {
        let anchor = self.anchors.remove(&id)?;
        self.edges.retain(|e| !e.touches(id));
        self.delta.added_edges.retain(|e| !e.touches(id));
        self.delta.removed_anchors.push(id);
        backend.destroy_trackable(anchor.trackable);
        Some(anchor)
    }

    /// Pull fresh backend state into every anchor. Anchors the backend has
    /// lost for good are evicted; their ids are returned.
    pub fn refresh<B: TrackableBackend>(
        &mut self,
        backend: &mut B,
        now: f64,
        dwell: f64,
    ) -> Vec<AnchorId> {
        let mut lost = Vec::new();
        for anchor in self.anchors.values_mut() {
            let state = backend.query_state(anchor.trackable);
            if state.lost {
                lost.push(anchor.id);
                continue;
            }
            anchor.observe(&state, now, dwell);
        }
        for id in &lost {
            tracing::warn!("backend lost anchor {id}, evicting");
            self.remove_anchor(*id, backend);
        }
        lost
    }

    /// Run the density policy for a head at `head`.
    pub fn apply_density<B: TrackableBackend>(
        &mut self,
        head: &Pose,
        now: f64,
        backend: &mut B,
        config: &AnchorConfig,
    ) -> DensityOutcome {
        let plan = plan_density(
            head.position,
            self.anchors.values().map(|a| (a.id, a.pose.position)),
            config.min_new_anchor_distance,
            config.max_anchor_edge_length,
        );

        let mut outcome = DensityOutcome::default();
        match plan {
            DensityPlan::Create { connect_to } => match self.create_anchor(backend, head, now) {
                Ok(id) => {
                    outcome.created = Some(id);
                    for other in connect_to {
                        if self.add_edge(id, other) {
                            outcome.edges_added += 1;
                        }
                    }
                    tracing::debug!("created anchor {id} with {} edges", outcome.edges_added);
                }
                Err(e) => {
                    tracing::warn!("skipping anchor creation this tick: {e}");
                    outcome.creation_failed = true;
                }
            },
            DensityPlan::Connect { hub, others } => {
                for other in others {
                    if self.add_edge(hub, other) {
                        outcome.edges_added += 1;
                    }
                }
            }
            DensityPlan::Keep(_) => {}
        }
        outcome
    }

    /// Evict anchors that have stayed out of range of the head too long.
    pub fn evict_distant<B: TrackableBackend>(
        &mut self,
        head: &Pose,
        now: f64,
        eviction: &EvictionConfig,
        backend: &mut B,
    ) -> Vec<AnchorId> {
        let mut stale = Vec::new();
        for anchor in self.anchors.values_mut() {
            if anchor.pose.position.distance(head.position) <= eviction.radius {
                anchor.last_near = now;
            } else if now - anchor.last_near > eviction.linger_secs {
                stale.push(anchor.id);
            }
        }
        for id in &stale {
            tracing::debug!("evicting out-of-range anchor {id}");
            self.remove_anchor(*id, backend);
        }
        stale
    }

    pub fn mark_saved(&mut self, id: AnchorId) {
        if let Some(anchor) = self.anchors.get_mut(&id) {
            anchor.is_saved = true;
        }
    }

    /// Poses the engine consumes this cycle, ordered by id.
    pub fn snapshot(&self) -> Vec<SpongyAnchorPose> {
        self.anchors.values().map(SpongyAnchor::snapshot).collect()
    }

    pub fn pending_delta(&self) -> &GraphDelta {
        &self.delta
    }

    /// The engine consumed the pending delta.
    pub fn ack_delta(&mut self) {
        self.delta = GraphDelta::default();
    }

    /// Replace the edge set wholesale; the engine is told to clear and re-add.
    pub fn replace_edges<I: IntoIterator<Item = AnchorEdge>>(&mut self, edges: I) {
        let kept: BTreeSet<AnchorEdge> = edges
            .into_iter()
            .filter(|e| self.anchors.contains_key(&e.id1()) && self.anchors.contains_key(&e.id2()))
            .collect();
        self.edges = kept;
        self.delta.cleared = true;
        self.delta.added_edges = self.edges.iter().copied().collect();
    }

    /// Destroy every anchor. Ids stay reserved.
    pub fn clear<B: TrackableBackend>(&mut self, backend: &mut B) {
        let ids: Vec<AnchorId> = self.anchors.keys().copied().collect();
        for id in ids {
            self.remove_anchor(id, backend);
        }
        self.edges.clear();
        self.delta.cleared = true;
        self.delta.added_edges.clear();
    }
}
