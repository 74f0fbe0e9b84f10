//! Reference engine.
//!
//! Deterministic stand-in for the numerical solver: fragments are connected
//! components of located anchors, the alignment is a distance-weighted mean
//! of per-anchor `spongy * frozen⁻¹` transforms near the head. Good enough to
//! drive the orchestration layer end to end; no least-squares refit.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::anchor::SpongyAnchorPose;
use crate::config::SolverSettings;
use crate::engine::{
    AlignmentMetrics, ConsolidationKind, ConsolidationProposal, Engine, EngineInput, EngineOutput,
    FragmentAdjustment, FrozenAnchor, FrozenSnapshot,
};
use crate::error::{EngineFault, EngineResult};
use crate::ids::{AnchorEdge, AnchorId, FragmentId};
use crate::pose::{Pose, PoseAccumulator};

/// Keeps support weights finite when the head sits on an anchor.
const WEIGHT_SOFTENING: f64 = 0.01;

pub struct ReferenceEngine {
    settings: SolverSettings,
    observations: BTreeMap<AnchorId, SpongyAnchorPose>,
    frozen: BTreeMap<AnchorId, FrozenAnchor>,
    edges: BTreeSet<AnchorEdge>,
    head: Pose,
    alignment: Pose,
    most_significant: FragmentId,
    metrics: AlignmentMetrics,
    next_fragment: u64,
    pending: Option<ConsolidationProposal>,
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new(SolverSettings::default())
    }
}

#[derive(Clone, Copy)]
struct Support {
    spongy: Pose,
    frozen: Pose,
    weight: f64,
}

impl ReferenceEngine {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            observations: BTreeMap::new(),
            frozen: BTreeMap::new(),
            edges: BTreeSet::new(),
            head: Pose::identity(),
            alignment: Pose::identity(),
            most_significant: FragmentId::INVALID,
            metrics: AlignmentMetrics::default(),
            next_fragment: FragmentId::FIRST_VALID.0,
            pending: None,
        }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn alignment(&self) -> Pose {
        self.alignment
    }

    pub fn metrics(&self) -> &AlignmentMetrics {
        &self.metrics
    }

    pub fn frozen_anchor(&self, id: AnchorId) -> Option<&FrozenAnchor> {
        self.frozen.get(&id)
    }

    fn allocate_fragment(&mut self) -> FragmentId {
        let id = FragmentId(self.next_fragment);
        self.next_fragment += 1;
        id
    }

    fn located_pose(&self, id: AnchorId) -> Option<Pose> {
        self.observations
            .get(&id)
            .filter(|o| o.is_located)
            .map(|o| o.pose)
    }

    fn weight(&self, spongy: &Pose) -> f64 {
        let d = spongy.position.distance(self.head.position);
        1.0 / (d * d + WEIGHT_SOFTENING)
    }

    /// Located members of `fragment` near the head, or all located members
    /// when none are in range. `overrides` substitutes proposed frozen poses.
    fn supports(
        &self,
        fragment: FragmentId,
        overrides: Option<&BTreeMap<AnchorId, FrozenAnchor>>,
    ) -> Vec<Support> {
        let mut all = Vec::new();
        for anchor in self.frozen.values() {
            let anchor = overrides
                .and_then(|o| o.get(&anchor.id))
                .unwrap_or(anchor);
            if anchor.fragment_id != fragment {
                continue;
            }
            if let Some(spongy) = self.located_pose(anchor.id) {
                all.push(Support {
                    spongy,
                    frozen: anchor.pose,
                    weight: self.weight(&spongy),
                });
            }
        }
        let radius = self.settings.support_radius;
        let near: Vec<Support> = all
            .iter()
            .copied()
            .filter(|s| s.spongy.position.distance(self.head.position) <= radius)
            .collect();
        if near.is_empty() { all } else { near }
    }

    fn alignment_of(
        &self,
        fragment: FragmentId,
        overrides: Option<&BTreeMap<AnchorId, FrozenAnchor>>,
    ) -> Option<Pose> {
        let mut acc = PoseAccumulator::new();
        for s in self.supports(fragment, overrides) {
            acc.add(&(s.spongy * s.frozen.inverse()), s.weight);
        }
        acc.mean()
    }

    fn fragment_alignment(&self, fragment: FragmentId) -> Option<Pose> {
        self.alignment_of(fragment, None)
    }

    /// Give newly located anchors a fragment and a frozen pose.
    fn assign_new_anchors(&mut self) {
        let candidates: Vec<(AnchorId, Pose)> = self
            .observations
            .values()
            .filter(|o| o.is_located && !self.frozen.contains_key(&o.id))
            .map(|o| (o.id, o.pose))
            .collect();

        for (id, spongy) in candidates {
            let neighbor_fragments: BTreeSet<FragmentId> = self
                .edges
                .iter()
                .filter_map(|e| e.other(id))
                .filter(|other| self.located_pose(*other).is_some())
                .filter_map(|other| self.frozen.get(&other).map(|f| f.fragment_id))
                .collect();

            let (fragment, frame) = if neighbor_fragments.contains(&self.most_significant) {
                (self.most_significant, self.alignment)
            } else if let Some(&first) = neighbor_fragments.iter().next() {
                let frame = self.fragment_alignment(first).unwrap_or(self.alignment);
                (first, frame)
            } else {
                (self.allocate_fragment(), self.alignment)
            };

            self.frozen.insert(
                id,
                FrozenAnchor {
                    id,
                    fragment_id: fragment,
                    pose: frame.inverse() * spongy,
                },
            );
            tracing::debug!("anchor {id} frozen into fragment {fragment}");
        }
    }

    /// Sets of fragments joined by edges between located anchors.
    /// Only sets with more than one fragment are returned.
    fn bridged_fragments(&self) -> Vec<BTreeSet<FragmentId>> {
        let located: BTreeSet<AnchorId> = self
            .frozen
            .keys()
            .copied()
            .filter(|id| self.located_pose(*id).is_some())
            .collect();

        let mut adjacency: BTreeMap<AnchorId, Vec<AnchorId>> = BTreeMap::new();
        for edge in &self.edges {
            if located.contains(&edge.id1()) && located.contains(&edge.id2()) {
                adjacency.entry(edge.id1()).or_default().push(edge.id2());
                adjacency.entry(edge.id2()).or_default().push(edge.id1());
            }
        }

        let mut visited = BTreeSet::new();
        let mut groups = Vec::new();
        for &start in &located {
            if !visited.insert(start) {
                continue;
            }
            let mut fragments = BTreeSet::new();
            let mut queue = VecDeque::from([start]);
            while let Some(id) = queue.pop_front() {
                if let Some(anchor) = self.frozen.get(&id) {
                    fragments.insert(anchor.fragment_id);
                }
                for &next in adjacency.get(&id).into_iter().flatten() {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            if fragments.len() > 1 {
                groups.push(fragments);
            }
        }
        groups
    }

    fn update_most_significant(&mut self) {
        let nearest = self
            .frozen
            .values()
            .filter_map(|f| {
                self.located_pose(f.id)
                    .map(|p| (p.position.distance(self.head.position), f.id, f.fragment_id))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        if let Some((_, _, fragment)) = nearest {
            self.most_significant = fragment;
        }
    }

    fn update_metrics(&mut self) {
        let mut fragments: Vec<FragmentId> = self.frozen.values().map(|f| f.fragment_id).collect();
        fragments.sort();
        fragments.dedup();

        let supports = self.supports(self.most_significant, None);
        let mut max_linear: f64 = 0.0;
        let mut max_angular: f64 = 0.0;
        for s in &supports {
            let predicted = self.alignment * s.frozen;
            let (linear, angular) = predicted.deviation(&s.spongy);
            max_linear = max_linear.max(linear);
            max_angular = max_angular.max(angular);
        }

        self.metrics = AlignmentMetrics {
            num_frozen_anchors: self.frozen.len(),
            num_fragments: fragments.len(),
            num_supports: supports.len(),
            max_linear_deviation: max_linear,
            max_angular_deviation: max_angular,
            refit_refreeze_indicated: self.most_significant.is_valid()
                && (max_linear > self.settings.refreeze_linear_threshold
                    || max_angular > self.settings.refreeze_angular_threshold),
            refit_merge_indicated: !self.bridged_fragments().is_empty(),
        };
    }

    /// Refreezes in place: frozen poses are re-derived from the current
    /// spongy estimates through the fragment's alignment, which leaves that
    /// alignment unchanged, so the fragment adjustment is the identity.
    /// Attachments still rebind against the moved frozen anchors.
    fn prepare_refreeze(&self) -> Option<ConsolidationProposal> {
        let target = self.most_significant;
        if !target.is_valid() {
            return None;
        }
        let before = self.fragment_alignment(target)?;
        let inverse = before.inverse();

        let proposed: BTreeMap<AnchorId, FrozenAnchor> = self
            .frozen
            .values()
            .filter(|f| f.fragment_id == target)
            .map(|f| {
                let pose = self
                    .located_pose(f.id)
                    .map(|spongy| inverse * spongy)
                    .unwrap_or(f.pose);
                (f.id, FrozenAnchor { pose, ..*f })
            })
            .collect();

        // Content stays put at the head: after * adjustment == before.
        let after = self.alignment_of(target, Some(&proposed))?;
        let adjustment = after.inverse() * before;

        Some(ConsolidationProposal::new(
            ConsolidationKind::Refreeze,
            target,
            vec![FragmentAdjustment {
                fragment_id: target,
                adjustment,
            }],
            proposed.into_values().collect(),
        ))
    }

    fn prepare_merge(&self) -> Option<ConsolidationProposal> {
        let groups = self.bridged_fragments();
        let group = groups
            .iter()
            .find(|g| g.contains(&self.most_significant))
            .or_else(|| groups.first())?;
        let target = if group.contains(&self.most_significant) {
            self.most_significant
        } else {
            *group.iter().next()?
        };
        let target_alignment = self.fragment_alignment(target)?;

        let mut adjustments = Vec::new();
        let mut anchors = Vec::new();
        for &fragment in group.iter().filter(|f| **f != target) {
            let Some(source_alignment) = self.fragment_alignment(fragment) else {
                continue;
            };
            let adjustment = target_alignment.inverse() * source_alignment;
            adjustments.push(FragmentAdjustment {
                fragment_id: fragment,
                adjustment,
            });
            anchors.extend(
                self.frozen
                    .values()
                    .filter(|f| f.fragment_id == fragment)
                    .map(|f| FrozenAnchor {
                        id: f.id,
                        fragment_id: target,
                        pose: adjustment * f.pose,
                    }),
            );
        }
        if adjustments.is_empty() {
            return None;
        }
        Some(ConsolidationProposal::new(
            ConsolidationKind::Merge,
            target,
            adjustments,
            anchors,
        ))
    }

    fn output(&self) -> EngineOutput {
        EngineOutput {
            frozen_anchors: self.frozen.values().copied().collect(),
            alignment: self.alignment,
            most_significant_fragment: self.most_significant,
            metrics: self.metrics,
        }
    }

    fn pending_for(&self, kind: ConsolidationKind) -> EngineResult<&ConsolidationProposal> {
        match &self.pending {
            Some(p) if p.kind == kind => Ok(p),
            Some(p) => Err(EngineFault::new(format!(
                "{kind} requested while {} is pending",
                p.kind
            ))),
            None => Err(EngineFault::new(format!("no prepared {kind}"))),
        }
    }
}

impl Engine for ReferenceEngine {
    fn step(&mut self, input: &EngineInput<'_>) -> EngineResult<EngineOutput> {
        if input.delta.cleared {
            self.edges.clear();
        }
        for id in &input.delta.removed_anchors {
            self.frozen.remove(id);
            self.edges.retain(|e| !e.touches(*id));
        }
        self.edges.extend(input.delta.added_edges.iter().copied());

        self.observations = input.anchors.iter().map(|a| (a.id, *a)).collect();
        self.head = input.head;

        self.assign_new_anchors();
        self.update_most_significant();
        if let Some(alignment) = self.fragment_alignment(self.most_significant) {
            self.alignment = alignment;
        }
        self.update_metrics();

        Ok(self.output())
    }

    fn consolidation_init(&mut self, kind: ConsolidationKind) -> EngineResult<bool> {
        self.pending = None;
        let indicated = match kind {
            ConsolidationKind::Refreeze => self.metrics.refit_refreeze_indicated,
            ConsolidationKind::Merge => self.metrics.refit_merge_indicated,
        };
        Ok(indicated)
    }

    fn consolidation_prepare(
        &mut self,
        kind: ConsolidationKind,
    ) -> EngineResult<ConsolidationProposal> {
        let proposal = match kind {
            ConsolidationKind::Refreeze => self.prepare_refreeze(),
            ConsolidationKind::Merge => self.prepare_merge(),
        }
        .ok_or_else(|| EngineFault::new(format!("no {kind} available")))?;
        self.pending = Some(proposal.clone());
        Ok(proposal)
    }

    fn consolidation_apply(&mut self, kind: ConsolidationKind) -> EngineResult<()> {
        let anchors = self.pending_for(kind)?.anchors().to_vec();
        for anchor in anchors {
            self.frozen.insert(anchor.id, anchor);
        }
        match kind {
            ConsolidationKind::Refreeze => self.metrics.refit_refreeze_indicated = false,
            ConsolidationKind::Merge => {
                self.metrics.refit_merge_indicated = false;
                self.update_most_significant();
            }
        }
        Ok(())
    }

    fn consolidation_finish(&mut self, kind: ConsolidationKind) -> EngineResult<()> {
        self.pending_for(kind)?;
        self.pending = None;
        Ok(())
    }

    fn frozen_anchor_ids(&self) -> EngineResult<Vec<AnchorId>> {
        Ok(self.frozen.keys().copied().collect())
    }

    fn remove_frozen_anchor(&mut self, id: AnchorId) -> EngineResult<()> {
        self.frozen.remove(&id);
        self.observations.remove(&id);
        self.edges.retain(|e| !e.touches(id));
        Ok(())
    }

    fn clear_frozen(&mut self) -> EngineResult<()> {
        self.frozen.clear();
        self.edges.clear();
        self.most_significant = FragmentId::INVALID;
        self.pending = None;
        self.metrics = AlignmentMetrics::default();
        Ok(())
    }

    fn snapshot(&self) -> EngineResult<FrozenSnapshot> {
        Ok(FrozenSnapshot {
            anchors: self.frozen.values().copied().collect(),
            edges: self.edges.iter().copied().collect(),
            alignment: self.alignment,
            most_significant: self.most_significant,
        })
    }

    fn restore(&mut self, snapshot: &FrozenSnapshot) -> EngineResult<()> {
        self.observations.clear();
        self.frozen = snapshot.anchors.iter().map(|a| (a.id, *a)).collect();
        self.edges = snapshot.edges.iter().copied().collect();
        self.alignment = snapshot.alignment;
        self.most_significant = snapshot.most_significant;
        self.next_fragment = snapshot
            .anchors
            .iter()
            .map(|a| a.fragment_id.0 + 1)
            .max()
            .unwrap_or(FragmentId::FIRST_VALID.0)
            .max(FragmentId::FIRST_VALID.0);
        self.pending = None;
        self.metrics = AlignmentMetrics {
            num_frozen_anchors: snapshot.anchors.len(),
            num_fragments: snapshot.fragment_count(),
            ..AlignmentMetrics::default()
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphDelta;
    use crate::pose::Vector3;
    use crate::quaternion::Quaternion;
    use approx::assert_abs_diff_eq;

    fn obs(id: u64, x: f64, located: bool) -> SpongyAnchorPose {
        SpongyAnchorPose {
            id: AnchorId(id),
            pose: Pose::from_position(Vector3::new(x, 0.0, 0.0)),
            is_located: located,
        }
    }

    fn edge(a: u64, b: u64) -> AnchorEdge {
        AnchorEdge::new(AnchorId(a), AnchorId(b)).unwrap()
    }

    fn step(
        engine: &mut ReferenceEngine,
        head_x: f64,
        anchors: &[SpongyAnchorPose],
        delta: GraphDelta,
    ) -> EngineOutput {
        engine
            .step(&EngineInput {
                head: Pose::from_position(Vector3::new(head_x, 0.0, 0.0)),
                anchors,
                delta: &delta,
            })
            .unwrap()
    }

    fn added(edges: &[AnchorEdge]) -> GraphDelta {
        GraphDelta {
            added_edges: edges.to_vec(),
            ..GraphDelta::default()
        }
    }

    #[test]
    fn test_unlocated_anchors_not_frozen() {
        let mut engine = ReferenceEngine::default();
        let out = step(&mut engine, 0.0, &[obs(2, 0.0, false)], GraphDelta::default());
        assert!(out.frozen_anchors.is_empty());
        assert!(!out.most_significant_fragment.is_valid());
    }

    #[test]
    fn test_first_anchor_freezes_at_spongy_pose() {
        let mut engine = ReferenceEngine::default();
        let out = step(&mut engine, 0.0, &[obs(2, 0.5, true)], GraphDelta::default());
        assert_eq!(out.frozen_anchors.len(), 1);
        let f = out.frozen_anchors[0];
        assert!(f.fragment_id.is_valid());
        assert_abs_diff_eq!(f.pose.position.x, 0.5, epsilon = 1e-12);
        assert_eq!(out.most_significant_fragment, f.fragment_id);
        assert!(out.alignment.approx_eq(&Pose::identity(), 1e-12));
    }

    #[test]
    fn test_connected_anchor_joins_fragment() {
        let mut engine = ReferenceEngine::default();
        step(&mut engine, 0.0, &[obs(2, 0.0, true)], GraphDelta::default());
        let out = step(
            &mut engine,
            1.0,
            &[obs(2, 0.0, true), obs(3, 1.0, true)],
            added(&[edge(2, 3)]),
        );
        assert_eq!(out.metrics.num_fragments, 1);
        assert!(!out.metrics.refit_merge_indicated);
    }

    #[test]
    fn test_unconnected_anchor_starts_new_fragment() {
        let mut engine = ReferenceEngine::default();
        step(&mut engine, 0.0, &[obs(2, 0.0, true)], GraphDelta::default());
        let out = step(
            &mut engine,
            5.0,
            &[obs(2, 0.0, true), obs(3, 5.0, true)],
            GraphDelta::default(),
        );
        assert_eq!(out.metrics.num_fragments, 2);
        let f3 = out.frozen_anchors.iter().find(|a| a.id == AnchorId(3)).unwrap();
        assert_eq!(out.most_significant_fragment, f3.fragment_id);
    }

    #[test]
    fn test_edge_between_fragments_indicates_merge_and_merges() {
        let mut engine = ReferenceEngine::default();
        step(&mut engine, 0.0, &[obs(2, 0.0, true)], GraphDelta::default());
        // Anchor 2 unreliable while 3 appears: no trusted connectivity.
        step(
            &mut engine,
            1.0,
            &[obs(2, 0.0, false), obs(3, 1.0, true)],
            added(&[edge(2, 3)]),
        );
        // Anchor 2 reappears shifted: spongy frame jumped by 0.2.
        let out = step(
            &mut engine,
            1.0,
            &[obs(2, 0.2, true), obs(3, 1.0, true)],
            GraphDelta::default(),
        );
        assert_eq!(out.metrics.num_fragments, 2);
        assert!(out.metrics.refit_merge_indicated);

        assert!(engine.consolidation_init(ConsolidationKind::Merge).unwrap());
        let proposal = engine
            .consolidation_prepare(ConsolidationKind::Merge)
            .unwrap();
        assert_eq!(proposal.merged_fragment_id(), out.most_significant_fragment);
        assert_eq!(proposal.adjusted_fragment_ids().len(), 1);
        engine.consolidation_apply(ConsolidationKind::Merge).unwrap();
        engine.consolidation_finish(ConsolidationKind::Merge).unwrap();

        let out = step(
            &mut engine,
            1.0,
            &[obs(2, 0.2, true), obs(3, 1.0, true)],
            GraphDelta::default(),
        );
        assert_eq!(out.metrics.num_fragments, 1);
        assert!(!out.metrics.refit_merge_indicated);
        // Anchor 2 now sits where the surviving frame puts it.
        let f2 = engine.frozen_anchor(AnchorId(2)).unwrap();
        let spongy = out.alignment * f2.pose;
        assert_abs_diff_eq!(spongy.position.x, 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_drift_indicates_refreeze_and_refreeze_clears_it() {
        let settings = SolverSettings::default();
        let mut engine = ReferenceEngine::new(settings.clone());
        let anchors = [obs(2, 0.0, true), obs(3, 1.0, true)];
        step(&mut engine, 0.5, &anchors, added(&[edge(2, 3)]));

        let drifted = [obs(2, 0.0, true), obs(3, 1.3, true)];
        let out = step(&mut engine, 0.5, &drifted, GraphDelta::default());
        assert!(out.metrics.max_linear_deviation > settings.refreeze_linear_threshold);
        assert!(out.metrics.refit_refreeze_indicated);

        assert!(engine.consolidation_init(ConsolidationKind::Refreeze).unwrap());
        let proposal = engine
            .consolidation_prepare(ConsolidationKind::Refreeze)
            .unwrap();
        let adjustment = proposal
            .adjustment_for(out.most_significant_fragment)
            .unwrap();
        assert!(adjustment.approx_eq(&Pose::identity(), 1e-9));
        let proposed: BTreeMap<AnchorId, Pose> =
            proposal.anchors().iter().map(|a| (a.id, a.pose)).collect();
        let spread = proposed[&AnchorId(3)].position.x - proposed[&AnchorId(2)].position.x;
        assert_abs_diff_eq!(spread, 1.3, epsilon = 1e-9);
        engine
            .consolidation_apply(ConsolidationKind::Refreeze)
            .unwrap();
        engine
            .consolidation_finish(ConsolidationKind::Refreeze)
            .unwrap();

        let out = step(&mut engine, 0.5, &drifted, GraphDelta::default());
        assert!(out.metrics.max_linear_deviation < 1e-9);
        assert!(!out.metrics.refit_refreeze_indicated);
    }

    #[test]
    fn test_apply_without_prepare_faults() {
        let mut engine = ReferenceEngine::default();
        assert!(engine.consolidation_apply(ConsolidationKind::Merge).is_err());
        assert!(engine.consolidation_finish(ConsolidationKind::Refreeze).is_err());
    }

    #[test]
    fn test_prepare_without_indication_faults() {
        let mut engine = ReferenceEngine::default();
        step(&mut engine, 0.0, &[obs(2, 0.0, true)], GraphDelta::default());
        assert!(!engine.consolidation_init(ConsolidationKind::Merge).unwrap());
        assert!(engine.consolidation_prepare(ConsolidationKind::Merge).is_err());
    }

    #[test]
    fn test_removed_anchor_dropped_with_edges() {
        let mut engine = ReferenceEngine::default();
        step(
            &mut engine,
            0.0,
            &[obs(2, 0.0, true), obs(3, 1.0, true)],
            added(&[edge(2, 3)]),
        );
        let out = step(
            &mut engine,
            0.0,
            &[obs(2, 0.0, true)],
            GraphDelta {
                removed_anchors: vec![AnchorId(3)],
                ..GraphDelta::default()
            },
        );
        assert_eq!(out.frozen_anchors.len(), 1);
        assert!(engine.snapshot().unwrap().edges.is_empty());
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut engine = ReferenceEngine::default();
        step(
            &mut engine,
            0.0,
            &[obs(2, 0.0, true), obs(3, 1.0, true)],
            added(&[edge(2, 3)]),
        );
        let snap = engine.snapshot().unwrap();

        let mut restored = ReferenceEngine::default();
        restored.restore(&snap).unwrap();
        assert_eq!(restored.snapshot().unwrap(), snap);
        assert_eq!(restored.frozen_anchor_ids().unwrap(), vec![AnchorId(2), AnchorId(3)]);
    }

    #[test]
    fn test_restore_continues_fragment_numbering() {
        let mut engine = ReferenceEngine::default();
        let snap = FrozenSnapshot {
            anchors: vec![FrozenAnchor {
                id: AnchorId(2),
                fragment_id: FragmentId(9),
                pose: Pose::identity(),
            }],
            ..FrozenSnapshot::default()
        };
        engine.restore(&snap).unwrap();
        let out = step(&mut engine, 50.0, &[obs(5, 50.0, true)], GraphDelta::default());
        let fresh = out.frozen_anchors.iter().find(|a| a.id == AnchorId(5)).unwrap();
        assert_eq!(fresh.fragment_id, FragmentId(10));
    }

    #[test]
    fn test_alignment_tracks_rotated_spongy_frame() {
        let mut engine = ReferenceEngine::default();
        step(&mut engine, 0.0, &[obs(2, 1.0, true)], GraphDelta::default());
        // The whole spongy frame yaws by 0.3 rad about the origin.
        let turn = Pose::new(Vector3::ZERO, Quaternion::from_yaw(0.3));
        let moved = SpongyAnchorPose {
            pose: turn * obs(2, 1.0, true).pose,
            ..obs(2, 1.0, true)
        };
        let out = step(&mut engine, 0.0, &[moved], GraphDelta::default());
        assert!(out.alignment.approx_eq(&turn, 1e-9));
    }
}
