//! Contract between the orchestration layer and the numerical engine.
//!
//! The engine is an oracle: it receives the spongy graph each cycle and
//! answers with frozen poses, fragment membership and the alignment between
//! frozen and spongy space. Every call may fail with an [`EngineFault`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::anchor::SpongyAnchorPose;
use crate::error::EngineResult;
use crate::graph::GraphDelta;
use crate::ids::{AnchorEdge, AnchorId, FragmentId};
use crate::pose::Pose;

/// The engine's view of an anchor in frozen space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenAnchor {
    pub id: AnchorId,
    pub fragment_id: FragmentId,
    pub pose: Pose,
}

/// Everything the engine consumes in one cycle.
#[derive(Clone, Copy, Debug)]
pub struct EngineInput<'a> {
    pub head: Pose,
    /// Full current spongy anchor set.
    pub anchors: &'a [SpongyAnchorPose],
    /// Edge changes since the last successful cycle.
    pub delta: &'a GraphDelta,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentMetrics {
    pub num_frozen_anchors: usize,
    pub num_fragments: usize,
    /// Anchors that contributed to this cycle's alignment.
    pub num_supports: usize,
    pub max_linear_deviation: f64,
    pub max_angular_deviation: f64,
    pub refit_refreeze_indicated: bool,
    pub refit_merge_indicated: bool,
}

/// Everything the engine answers in one cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineOutput {
    pub frozen_anchors: Vec<FrozenAnchor>,
    /// Frozen → spongy transform for the current head position.
    pub alignment: Pose,
    /// Fragment the head is currently in.
    pub most_significant_fragment: FragmentId,
    pub metrics: AlignmentMetrics,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationKind {
    /// Re-derive a fragment's frozen poses to absorb drift.
    Refreeze,
    /// Splice previously disjoint fragments into one frame.
    Merge,
}

impl fmt::Display for ConsolidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolidationKind::Refreeze => write!(f, "refreeze"),
            ConsolidationKind::Merge => write!(f, "merge"),
        }
    }
}

/// Rigid correction for one fragment: `new_frozen = adjustment * old_frozen`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentAdjustment {
    pub fragment_id: FragmentId,
    pub adjustment: Pose,
}

/// Candidate result of a refreeze or merge, produced before the engine commits it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationProposal {
    pub kind: ConsolidationKind,
    merged_fragment_id: FragmentId,
    adjustments: Vec<FragmentAdjustment>,
    /// Frozen anchors as they will be after the commit (affected anchors only).
    anchors: Vec<FrozenAnchor>,
}

impl ConsolidationProposal {
    pub fn new(
        kind: ConsolidationKind,
        merged_fragment_id: FragmentId,
        adjustments: Vec<FragmentAdjustment>,
        anchors: Vec<FrozenAnchor>,
    ) -> Self {
        Self {
            kind,
            merged_fragment_id,
            adjustments,
            anchors,
        }
    }

    /// Fragment every affected anchor belongs to afterwards.
    pub fn merged_fragment_id(&self) -> FragmentId {
        self.merged_fragment_id
    }

    /// Fragments whose frozen poses change.
    pub fn adjusted_fragment_ids(&self) -> Vec<FragmentId> {
        self.adjustments.iter().map(|a| a.fragment_id).collect()
    }

    pub fn adjustments(&self) -> &[FragmentAdjustment] {
        &self.adjustments
    }

    pub fn adjustment_for(&self, fragment: FragmentId) -> Option<Pose> {
        self.adjustments
            .iter()
            .find(|a| a.fragment_id == fragment)
            .map(|a| a.adjustment)
    }

    pub fn anchors(&self) -> &[FrozenAnchor] {
        &self.anchors
    }

    pub fn proposed_anchor(&self, id: AnchorId) -> Option<&FrozenAnchor> {
        self.anchors.iter().find(|a| a.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty()
    }
}

/// Frozen-space state needed to rehydrate an engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenSnapshot {
    pub anchors: Vec<FrozenAnchor>,
    pub edges: Vec<AnchorEdge>,
    pub alignment: Pose,
    pub most_significant: FragmentId,
}

impl FrozenSnapshot {
    pub fn max_anchor_id(&self) -> Option<AnchorId> {
        self.anchors.iter().map(|a| a.id).max()
    }

    pub fn fragment_count(&self) -> usize {
        let mut ids: Vec<FragmentId> = self.anchors.iter().map(|a| a.fragment_id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}

pub trait Engine {
    /// Advance one cycle.
    fn step(&mut self, input: &EngineInput<'_>) -> EngineResult<EngineOutput>;

    /// Whether a consolidation of `kind` is currently warranted.
    fn consolidation_init(&mut self, kind: ConsolidationKind) -> EngineResult<bool>;

    /// Compute the candidate adjustment without changing engine state.
    fn consolidation_prepare(&mut self, kind: ConsolidationKind)
    -> EngineResult<ConsolidationProposal>;

    /// Commit the prepared proposal.
    fn consolidation_apply(&mut self, kind: ConsolidationKind) -> EngineResult<()>;

    /// Release protocol state after apply.
    fn consolidation_finish(&mut self, kind: ConsolidationKind) -> EngineResult<()>;

    fn frozen_anchor_ids(&self) -> EngineResult<Vec<AnchorId>>;

    /// Forget a frozen anchor and its edges.
    fn remove_frozen_anchor(&mut self, id: AnchorId) -> EngineResult<()>;

    /// Forget all frozen state.
    fn clear_frozen(&mut self) -> EngineResult<()>;

    fn snapshot(&self) -> EngineResult<FrozenSnapshot>;

    /// Replace all state with a snapshot. Spongy observations start empty.
    fn restore(&mut self, snapshot: &FrozenSnapshot) -> EngineResult<()>;
}
