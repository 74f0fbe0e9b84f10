//! Drives the two-phase refreeze/merge protocol and carries attachment
//! points through it.

use serde::{Deserialize, Serialize};

use crate::attachment::{AttachmentRegistry, FrozenIndex};
use crate::engine::{AlignmentMetrics, ConsolidationKind, Engine};
use crate::error::EngineResult;
use crate::ids::FragmentId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsolidationState {
    #[default]
    NoAction,
    Pending(ConsolidationKind),
    Committed(ConsolidationKind),
}

/// What one committed consolidation did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub kind: ConsolidationKind,
    pub merged_fragment_id: FragmentId,
    pub adjusted_fragment_ids: Vec<FragmentId>,
    pub attachments_adjusted: usize,
}

#[derive(Debug, Default)]
pub struct Coordinator {
    state: ConsolidationState,
    refreezes: u64,
    merges: u64,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConsolidationState {
        self.state
    }

    /// Committed (refreeze, merge) counts.
    pub fn counts(&self) -> (u64, u64) {
        (self.refreezes, self.merges)
    }

    /// Refreeze takes precedence; at most one kind per tick.
    pub fn decide(metrics: &AlignmentMetrics) -> Option<ConsolidationKind> {
        if metrics.refit_refreeze_indicated {
            Some(ConsolidationKind::Refreeze)
        } else if metrics.refit_merge_indicated {
            Some(ConsolidationKind::Merge)
        } else {
            None
        }
    }

    /// Run at most one consolidation for this tick.
    ///
    /// Attachment updates are planned from the proposal before the engine
    /// commits and written back only once `consolidation_apply` succeeds. On
    /// success the frozen index is patched with the proposed anchor poses.
    /// A fault before apply leaves the state at `NoAction`. Once apply has
    /// succeeded the consolidation counts as committed, even if finish faults.
    pub fn run<E: Engine>(
        &mut self,
        engine: &mut E,
        metrics: &AlignmentMetrics,
        frozen: &mut FrozenIndex,
        attachments: &mut AttachmentRegistry,
    ) -> EngineResult<Option<ConsolidationReport>> {
        self.state = ConsolidationState::NoAction;
        let Some(kind) = Self::decide(metrics) else {
            return Ok(None);
        };
        if !engine.consolidation_init(kind)? {
            return Ok(None);
        }

        self.state = ConsolidationState::Pending(kind);
        let result = Self::execute(engine, kind, frozen, attachments);
        match &result {
            Ok(report) => {
                self.state = ConsolidationState::Committed(kind);
                match kind {
                    ConsolidationKind::Refreeze => self.refreezes += 1,
                    ConsolidationKind::Merge => self.merges += 1,
                }
                tracing::info!(
                    "{kind} committed into fragment {}: {} fragments, {} attachments adjusted",
                    report.merged_fragment_id,
                    report.adjusted_fragment_ids.len(),
                    report.attachments_adjusted
                );
            }
            Err(e) => {
                self.state = ConsolidationState::NoAction;
                tracing::error!("{kind} aborted: {e}");
            }
        }
        result.map(Some)
    }

    fn execute<E: Engine>(
        engine: &mut E,
        kind: ConsolidationKind,
        frozen: &mut FrozenIndex,
        attachments: &mut AttachmentRegistry,
    ) -> EngineResult<ConsolidationReport> {
        let proposal = engine.consolidation_prepare(kind)?;
        let pending = attachments.plan_adjustments(&proposal, frozen);
        let report = ConsolidationReport {
            kind,
            merged_fragment_id: proposal.merged_fragment_id(),
            adjusted_fragment_ids: proposal.adjusted_fragment_ids(),
            attachments_adjusted: pending.len(),
        };

        engine.consolidation_apply(kind)?;
        attachments.commit(pending);
        for anchor in proposal.anchors() {
            frozen.insert(anchor.id, *anchor);
        }

        if let Err(e) = engine.consolidation_finish(kind) {
            tracing::error!("{kind} applied but finish failed: {e}");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        ConsolidationProposal, EngineInput, EngineOutput, FragmentAdjustment, FrozenAnchor,
        FrozenSnapshot,
    };
    use crate::error::EngineFault;
    use crate::ids::AnchorId;
    use crate::pose::{Pose, Vector3};

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Stage {
        Init,
        Prepare,
        Apply,
        Finish,
    }

    /// Engine that replays a fixed merge proposal and can fault on demand.
    struct ScriptedEngine {
        proposal: ConsolidationProposal,
        fail_at: Option<Stage>,
        warranted: bool,
        calls: Vec<Stage>,
    }

    impl ScriptedEngine {
        fn new() -> Self {
            let shift = Pose::from_position(Vector3::new(0.5, 0.0, 0.0));
            Self {
                proposal: ConsolidationProposal::new(
                    ConsolidationKind::Merge,
                    FragmentId(2),
                    vec![FragmentAdjustment {
                        fragment_id: FragmentId(3),
                        adjustment: shift,
                    }],
                    vec![FrozenAnchor {
                        id: AnchorId(5),
                        fragment_id: FragmentId(2),
                        pose: Pose::from_position(Vector3::new(4.5, 0.0, 0.0)),
                    }],
                ),
                fail_at: None,
                warranted: true,
                calls: Vec::new(),
            }
        }

        fn enter(&mut self, stage: Stage) -> EngineResult<()> {
            self.calls.push(stage);
            if self.fail_at == Some(stage) {
                return Err(EngineFault::new("scripted"));
            }
            Ok(())
        }
    }

    impl Engine for ScriptedEngine {
        fn step(&mut self, _input: &EngineInput<'_>) -> EngineResult<EngineOutput> {
            Ok(EngineOutput::default())
        }

        fn consolidation_init(&mut self, _kind: ConsolidationKind) -> EngineResult<bool> {
            self.enter(Stage::Init)?;
            Ok(self.warranted)
        }

        fn consolidation_prepare(
            &mut self,
            _kind: ConsolidationKind,
        ) -> EngineResult<ConsolidationProposal> {
            self.enter(Stage::Prepare)?;
            Ok(self.proposal.clone())
        }

        fn consolidation_apply(&mut self, _kind: ConsolidationKind) -> EngineResult<()> {
            self.enter(Stage::Apply)
        }

        fn consolidation_finish(&mut self, _kind: ConsolidationKind) -> EngineResult<()> {
            self.enter(Stage::Finish)
        }

        fn frozen_anchor_ids(&self) -> EngineResult<Vec<AnchorId>> {
            Ok(Vec::new())
        }

        fn remove_frozen_anchor(&mut self, _id: AnchorId) -> EngineResult<()> {
            Ok(())
        }

        fn clear_frozen(&mut self) -> EngineResult<()> {
            Ok(())
        }

        fn snapshot(&self) -> EngineResult<FrozenSnapshot> {
            Ok(FrozenSnapshot::default())
        }

        fn restore(&mut self, _snapshot: &FrozenSnapshot) -> EngineResult<()> {
            Ok(())
        }
    }

    fn merge_metrics() -> AlignmentMetrics {
        AlignmentMetrics {
            refit_merge_indicated: true,
            ..AlignmentMetrics::default()
        }
    }

    fn setup() -> (FrozenIndex, AttachmentRegistry) {
        let frozen: FrozenIndex = [
            FrozenAnchor {
                id: AnchorId(2),
                fragment_id: FragmentId(2),
                pose: Pose::identity(),
            },
            FrozenAnchor {
                id: AnchorId(5),
                fragment_id: FragmentId(3),
                pose: Pose::from_position(Vector3::new(4.0, 0.0, 0.0)),
            },
        ]
        .into_iter()
        .map(|a| (a.id, a))
        .collect();
        let mut attachments = AttachmentRegistry::new();
        attachments.create(Pose::from_position(Vector3::new(4.1, 0.0, 0.0)), &frozen);
        (frozen, attachments)
    }

    #[test]
    fn test_refreeze_takes_precedence() {
        let metrics = AlignmentMetrics {
            refit_refreeze_indicated: true,
            refit_merge_indicated: true,
            ..AlignmentMetrics::default()
        };
        assert_eq!(
            Coordinator::decide(&metrics),
            Some(ConsolidationKind::Refreeze)
        );
        assert_eq!(Coordinator::decide(&AlignmentMetrics::default()), None);
    }

    #[test]
    fn test_merge_commits_attachments_and_index() {
        let (mut frozen, mut attachments) = setup();
        let mut engine = ScriptedEngine::new();
        let mut coordinator = Coordinator::new();

        let report = coordinator
            .run(&mut engine, &merge_metrics(), &mut frozen, &mut attachments)
            .unwrap()
            .unwrap();
        assert_eq!(report.merged_fragment_id, FragmentId(2));
        assert_eq!(report.attachments_adjusted, 1);
        assert_eq!(
            coordinator.state(),
            ConsolidationState::Committed(ConsolidationKind::Merge)
        );
        assert_eq!(coordinator.counts(), (0, 1));
        assert_eq!(frozen[&AnchorId(5)].fragment_id, FragmentId(2));

        let (id, point) = attachments.iter().next().unwrap();
        assert_eq!(point.fragment_id, FragmentId(2));
        let pose = attachments.frozen_pose(id, &frozen).unwrap();
        assert!((pose.position.x - 4.6).abs() < 1e-12);
    }

    #[test]
    fn test_apply_fault_leaves_attachments_alone() {
        let (mut frozen, mut attachments) = setup();
        let before: Vec<_> = attachments.iter().map(|(_, p)| *p).collect();
        let mut engine = ScriptedEngine::new();
        engine.fail_at = Some(Stage::Apply);
        let mut coordinator = Coordinator::new();

        let result = coordinator.run(&mut engine, &merge_metrics(), &mut frozen, &mut attachments);
        assert!(result.is_err());
        assert_eq!(coordinator.state(), ConsolidationState::NoAction);
        let after: Vec<_> = attachments.iter().map(|(_, p)| *p).collect();
        assert_eq!(before, after);
        assert_eq!(frozen[&AnchorId(5)].fragment_id, FragmentId(3));
        assert!(!engine.calls.contains(&Stage::Finish));
    }

    #[test]
    fn test_finish_fault_after_apply_still_commits() {
        let (mut frozen, mut attachments) = setup();
        let mut engine = ScriptedEngine::new();
        engine.fail_at = Some(Stage::Finish);
        let mut coordinator = Coordinator::new();

        let report = coordinator
            .run(&mut engine, &merge_metrics(), &mut frozen, &mut attachments)
            .unwrap()
            .unwrap();
        assert_eq!(report.attachments_adjusted, 1);
        assert_eq!(
            coordinator.state(),
            ConsolidationState::Committed(ConsolidationKind::Merge)
        );
        assert_eq!(coordinator.counts(), (0, 1));
        assert_eq!(engine.calls.last(), Some(&Stage::Finish));

        assert_eq!(frozen[&AnchorId(5)].fragment_id, FragmentId(2));
        let (id, point) = attachments.iter().next().unwrap();
        assert_eq!(point.fragment_id, FragmentId(2));
        let pose = attachments.frozen_pose(id, &frozen).unwrap();
        assert!((pose.position.x - 4.6).abs() < 1e-12);
    }

    #[test]
    fn test_prepare_fault_skips_apply() {
        let (mut frozen, mut attachments) = setup();
        let mut engine = ScriptedEngine::new();
        engine.fail_at = Some(Stage::Prepare);
        let mut coordinator = Coordinator::new();
        assert!(
            coordinator
                .run(&mut engine, &merge_metrics(), &mut frozen, &mut attachments)
                .is_err()
        );
        assert_eq!(engine.calls, vec![Stage::Init, Stage::Prepare]);
    }

    #[test]
    fn test_not_warranted_is_no_action() {
        let (mut frozen, mut attachments) = setup();
        let mut engine = ScriptedEngine::new();
        engine.warranted = false;
        let mut coordinator = Coordinator::new();
        let report = coordinator
            .run(&mut engine, &merge_metrics(), &mut frozen, &mut attachments)
            .unwrap();
        assert!(report.is_none());
        assert_eq!(coordinator.state(), ConsolidationState::NoAction);
        assert_eq!(engine.calls, vec![Stage::Init]);
    }

    #[test]
    fn test_nothing_indicated_does_not_touch_engine() {
        let (mut frozen, mut attachments) = setup();
        let mut engine = ScriptedEngine::new();
        let mut coordinator = Coordinator::new();
        let report = coordinator
            .run(
                &mut engine,
                &AlignmentMetrics::default(),
                &mut frozen,
                &mut attachments,
            )
            .unwrap();
        assert!(report.is_none());
        assert!(engine.calls.is_empty());
    }
}
