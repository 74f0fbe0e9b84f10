//! Per-tick driver tying the spongy graph, the engine, consolidation,
//! attachments and persistence together.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::attachment::{AttachmentId, AttachmentPoint, AttachmentRegistry, FrozenIndex};
use crate::backend::{PoseSource, TrackableBackend};
use crate::config::AnchorConfig;
use crate::consolidation::{ConsolidationReport, ConsolidationState, Coordinator};
use crate::engine::{AlignmentMetrics, Engine, EngineInput, EngineOutput};
use crate::error::{ConfigError, EngineFault, EngineResult};
use crate::graph::{DensityOutcome, SpongyAnchorStore};
use crate::ids::{AnchorEdge, AnchorId, FragmentId};
use crate::persistence::{LoadProgress, PersistenceManager, SaveReport, SessionSnapshot};
use crate::pose::Pose;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Tracking has not come up yet.
    #[default]
    Initializing,
    Idle,
    /// Tracking lost; nothing changes until it resumes.
    Frozen,
}

/// What a single tick did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickOutcome {
    pub state: SessionState,
    pub density: Option<DensityOutcome>,
    pub evicted: Vec<AnchorId>,
    pub load: Option<LoadProgress>,
    pub stepped: bool,
    pub fault: Option<EngineFault>,
    pub consolidation: Option<ConsolidationReport>,
    pub attachments_rebound: usize,
}

pub struct AnchorManager<E: Engine> {
    config: AnchorConfig,
    engine: E,
    store: SpongyAnchorStore,
    persistence: PersistenceManager,
    coordinator: Coordinator,
    attachments: AttachmentRegistry,
    frozen: FrozenIndex,
    head: Pose,
    alignment: Pose,
    most_significant: FragmentId,
    metrics: AlignmentMetrics,
    state: SessionState,
    consecutive_faults: u32,
    degraded: bool,
}

impl<E: Engine> AnchorManager<E> {
    pub fn new(engine: E, config: AnchorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            engine,
            store: SpongyAnchorStore::new(),
            persistence: PersistenceManager::new(),
            coordinator: Coordinator::new(),
            attachments: AttachmentRegistry::new(),
            frozen: FrozenIndex::new(),
            head: Pose::identity(),
            alignment: Pose::identity(),
            most_significant: FragmentId::INVALID,
            metrics: AlignmentMetrics::default(),
            state: SessionState::Initializing,
            consecutive_faults: 0,
            degraded: false,
        })
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn store(&self) -> &SpongyAnchorStore {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn consolidation_state(&self) -> ConsolidationState {
        self.coordinator.state()
    }

    /// Committed (refreeze, merge) counts.
    pub fn consolidation_counts(&self) -> (u64, u64) {
        self.coordinator.counts()
    }

    /// Engine faults have persisted for `fault_degraded_threshold` ticks.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    pub fn is_loading(&self) -> bool {
        self.persistence.is_loading()
    }

    pub fn head(&self) -> Pose {
        self.head
    }

    /// Frozen to spongy transform at the head.
    pub fn alignment(&self) -> Pose {
        self.alignment
    }

    pub fn most_significant_fragment(&self) -> FragmentId {
        self.most_significant
    }

    pub fn metrics(&self) -> &AlignmentMetrics {
        &self.metrics
    }

    pub fn frozen_anchors(&self) -> &FrozenIndex {
        &self.frozen
    }

    pub fn frozen_to_spongy(&self, frozen: &Pose) -> Pose {
        self.alignment * *frozen
    }

    pub fn spongy_to_frozen(&self, spongy: &Pose) -> Pose {
        self.alignment.inverse() * *spongy
    }

    pub fn tick<P: PoseSource, B: TrackableBackend>(
        &mut self,
        source: &P,
        backend: &mut B,
        now: f64,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if !source.is_ready() {
            self.state = SessionState::Initializing;
            outcome.state = self.state;
            return outcome;
        }
        if !source.is_tracking() {
            if self.state != SessionState::Frozen {
                tracing::info!("tracking lost, freezing anchor graph");
                self.state = SessionState::Frozen;
            }
            outcome.state = self.state;
            return outcome;
        }
        if self.state != SessionState::Idle {
            tracing::info!("tracking available, anchor graph live");
            self.state = SessionState::Idle;
        }
        outcome.state = self.state;
        self.head = source.head_pose();

        if self.persistence.is_loading() {
            match self
                .persistence
                .poll_load(&mut self.store, &mut self.engine, backend, now)
            {
                Ok(progress) => {
                    for id in &progress.missing {
                        self.frozen.remove(id);
                    }
                    outcome.load = Some(progress);
                }
                Err(fault) => {
                    self.record_fault(fault, &mut outcome);
                    return outcome;
                }
            }
        }

        outcome.evicted = self
            .store
            .refresh(backend, now, self.config.located_dwell_secs);
        if !self.persistence.is_loading() {
            outcome.density = Some(
                self.store
                    .apply_density(&self.head, now, backend, &self.config),
            );
        }
        if let Some(eviction) = &self.config.eviction {
            let stale = self.store.evict_distant(&self.head, now, eviction, backend);
            outcome.evicted.extend(stale);
        }

        let anchors = self.store.snapshot();
        let input = EngineInput {
            head: self.head,
            anchors: &anchors,
            delta: self.store.pending_delta(),
        };
        match self.engine.step(&input) {
            Ok(output) => {
                self.store.ack_delta();
                self.absorb(output);
                outcome.stepped = true;
            }
            Err(fault) => {
                self.record_fault(fault, &mut outcome);
                return outcome;
            }
        }

        match self.coordinator.run(
            &mut self.engine,
            &self.metrics,
            &mut self.frozen,
            &mut self.attachments,
        ) {
            Ok(report) => outcome.consolidation = report,
            Err(fault) => self.record_fault(fault, &mut outcome),
        }

        outcome.attachments_rebound = self.attachments.refresh(&self.frozen);
        outcome
    }

    fn absorb(&mut self, output: EngineOutput) {
        if self.consecutive_faults > 0 {
            tracing::info!("engine recovered after {} faults", self.consecutive_faults);
        }
        self.consecutive_faults = 0;
        self.degraded = false;
        self.frozen = output.frozen_anchors.into_iter().map(|a| (a.id, a)).collect();
        self.alignment = output.alignment;
        self.most_significant = output.most_significant_fragment;
        self.metrics = output.metrics;
    }

    fn record_fault(&mut self, fault: EngineFault, outcome: &mut TickOutcome) {
        self.consecutive_faults = self.consecutive_faults.saturating_add(1);
        if !self.degraded && self.consecutive_faults >= self.config.fault_degraded_threshold {
            self.degraded = true;
            tracing::error!(
                "{fault}; {} consecutive faults, entering degraded mode",
                self.consecutive_faults
            );
        } else {
            tracing::error!("{fault}; skipping cycle");
        }
        outcome.fault = Some(fault);
    }

    // --- attachments ---

    pub fn create_attachment(&mut self, frozen_pose: Pose) -> AttachmentId {
        self.attachments.create(frozen_pose, &self.frozen)
    }

    pub fn move_attachment(&mut self, id: AttachmentId, frozen_pose: Pose) -> bool {
        self.attachments.move_to(id, frozen_pose, &self.frozen)
    }

    pub fn release_attachment(&mut self, id: AttachmentId) -> Option<AttachmentPoint> {
        self.attachments.release(id)
    }

    pub fn attachment(&self, id: AttachmentId) -> Option<&AttachmentPoint> {
        self.attachments.get(id)
    }

    pub fn attachment_frozen_pose(&self, id: AttachmentId) -> Option<Pose> {
        self.attachments.frozen_pose(id, &self.frozen)
    }

    pub fn attachment_spongy_pose(&self, id: AttachmentId) -> Option<Pose> {
        self.attachments
            .spongy_pose(id, &self.frozen, &self.alignment)
    }

    pub fn attachments(&self) -> &AttachmentRegistry {
        &self.attachments
    }

    // --- persistence ---

    pub fn save<B: TrackableBackend>(&mut self, backend: &mut B) -> SaveReport {
        self.persistence.save(&mut self.store, backend)
    }

    /// Capture the session. Mid-load, anchors still being resolved keep
    /// their saved edges and saved status.
    pub fn session_snapshot(&self) -> EngineResult<SessionSnapshot> {
        let mut frozen = self.engine.snapshot()?;
        let mut edges: BTreeSet<AnchorEdge> = self.store.edges().copied().collect();
        let mut saved: BTreeSet<AnchorId> = self
            .store
            .anchors()
            .filter(|a| a.is_saved)
            .map(|a| a.id)
            .collect();
        if self.persistence.is_loading() {
            let known: BTreeSet<AnchorId> = frozen.anchors.iter().map(|a| a.id).collect();
            edges.extend(
                self.persistence
                    .pending_edges()
                    .iter()
                    .filter(|e| known.contains(&e.id1()) && known.contains(&e.id2())),
            );
            saved.extend(self.persistence.pending_ids());
        }
        frozen.edges = edges.into_iter().collect();
        Ok(SessionSnapshot {
            frozen,
            next_anchor_id: self.store.next_id(),
            saved_anchor_ids: saved.into_iter().collect(),
        })
    }

    /// Replace the session with `snapshot` and start loading its anchors.
    pub fn rehydrate<B: TrackableBackend>(
        &mut self,
        snapshot: &SessionSnapshot,
        backend: &mut B,
    ) -> EngineResult<()> {
        snapshot.validate()?;
        self.persistence.cancel();
        self.store.clear(backend);
        // The engine is replaced wholesale below; the clear is not news to it.
        self.store.ack_delta();

        self.engine.restore(&snapshot.frozen)?;
        if let Some(last) = snapshot.frozen.max_anchor_id() {
            self.store.reserve_through(last)?;
        }
        if snapshot.next_anchor_id.0 > AnchorId::FIRST_VALID.0 {
            self.store
                .reserve_through(AnchorId(snapshot.next_anchor_id.0 - 1))?;
        }

        self.persistence.begin_load(
            self.engine.frozen_anchor_ids()?,
            snapshot.frozen.edges.clone(),
            &mut self.engine,
            backend,
        )?;

        let restored = self.engine.snapshot()?;
        self.frozen = restored.anchors.iter().map(|a| (a.id, *a)).collect();
        self.alignment = restored.alignment;
        self.most_significant = restored.most_significant;
        self.metrics = AlignmentMetrics {
            num_frozen_anchors: restored.anchors.len(),
            num_fragments: restored.fragment_count(),
            ..AlignmentMetrics::default()
        };
        tracing::info!(
            "rehydrated session: {} frozen anchors, next id {}",
            self.frozen.len(),
            self.store.next_id()
        );
        Ok(())
    }

    /// Drop every anchor and all frozen state. Attachments keep their last
    /// frozen pose and rebind once anchors exist again.
    pub fn reset<B: TrackableBackend>(&mut self, backend: &mut B) -> EngineResult<()> {
        self.persistence.cancel();
        self.store.clear(backend);
        self.store.ack_delta();
        self.engine.clear_frozen()?;
        self.frozen.clear();
        self.alignment = Pose::identity();
        self.most_significant = FragmentId::INVALID;
        self.metrics = AlignmentMetrics::default();
        tracing::info!("anchor graph reset");
        Ok(())
    }

    /// Release every trackable and forget the session.
    pub fn shutdown<B: TrackableBackend>(&mut self, backend: &mut B) -> EngineResult<()> {
        self.reset(backend)?;
        self.attachments.clear();
        self.state = SessionState::Initializing;
        Ok(())
    }
}
