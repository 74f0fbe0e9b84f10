//! Random head walk against the simulated tracker.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use fw_core::{
    AnchorManager, Config, Pose, Quaternion, ReferenceEngine, RecordWriter, SimulatedBackend,
    SimulatedHead, Vector3,
};
use fw_store::{AnchorArchive, Store};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Simulated seconds per step.
pub const STEP_SECS: f64 = 0.1;
/// Steps tracking stays lost during a dropout.
const DROPOUT_STEPS: u64 = 3;
/// Steps after a dropout before the old anchors relocalize.
const RELOCALIZE_STEPS: u64 = 8;

pub struct WalkParams {
    pub steps: u64,
    pub seed: u64,
    pub step_length: f64,
    pub loss_every: u64,
    pub drift: f64,
    pub record_every: u64,
}

#[derive(Debug, Default)]
pub struct WalkSummary {
    pub steps: u64,
    pub resumed_anchors: usize,
    pub live_anchors: usize,
    pub edges: usize,
    pub frozen_anchors: usize,
    pub fragments: usize,
    pub refreezes: u64,
    pub merges: u64,
    pub dropouts: u64,
    pub faults: u64,
    pub saved: usize,
    pub records: u64,
    pub content_shift: f64,
}

pub fn run_walk(
    store: Store,
    config: &Config,
    params: &WalkParams,
    record: Option<&Path>,
) -> Result<WalkSummary> {
    let mut sim = SimulatedBackend::with_seed(params.seed);
    sim.set_persistence(false);
    sim.set_drift(params.drift);
    let mut backend = AnchorArchive::new(sim, store);
    let mut manager = AnchorManager::new(
        ReferenceEngine::new(config.solver.clone()),
        config.anchors.clone(),
    )
    .context("invalid anchor configuration")?;

    let mut summary = WalkSummary::default();
    if let Some(snapshot) = backend
        .store()
        .load_snapshot()
        .context("failed to load session")?
    {
        summary.resumed_anchors = snapshot.frozen.anchors.len();
        manager
            .rehydrate(&snapshot, &mut backend)
            .context("failed to rehydrate session")?;
    }

    let mut writer = RecordWriter::new(true, true);
    let mut sink = match record {
        Some(path) => Some(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => None,
    };

    let mut rng = SmallRng::seed_from_u64(params.seed);
    let mut head = SimulatedHead::new();
    let mut heading: f64 = 0.0;
    let mut dropout_until = 0;
    let mut relocalize_at = None;
    let mut marker = None;

    for step in 0..params.steps {
        let now = step as f64 * STEP_SECS;

        if params.loss_every > 0 && step > 0 && step % params.loss_every == 0 {
            // Tracking drops out and the spongy frame snaps on recovery.
            let jump = Pose::new(
                Vector3::new(
                    rng.random_range(-0.3..=0.3),
                    0.0,
                    rng.random_range(-0.3..=0.3),
                ),
                Quaternion::from_yaw(rng.random_range(-0.1..=0.1)),
            );
            head.tracking = false;
            backend.inner_mut().set_all_reliable(false);
            backend.inner_mut().transform_all(&jump);
            head.pose = jump * head.pose;
            dropout_until = step + DROPOUT_STEPS;
            relocalize_at = Some(step + DROPOUT_STEPS + RELOCALIZE_STEPS);
            summary.dropouts += 1;
            tracing::info!("step {step}: simulated tracking dropout");
        }
        if step == dropout_until {
            head.tracking = true;
        }
        if relocalize_at == Some(step) {
            backend.inner_mut().set_all_reliable(true);
            relocalize_at = None;
        }

        if head.tracking {
            heading += rng.random_range(-0.5..=0.5);
            let delta = Vector3::new(heading.cos(), 0.0, heading.sin()) * params.step_length;
            head.move_to(head.pose.position + delta);
        }
        backend.inner_mut().step_drift();

        let outcome = manager.tick(&head, &mut backend, now);
        if outcome.fault.is_some() {
            summary.faults += 1;
        }

        // One piece of content, placed at the head once something is frozen.
        if marker.is_none() && !manager.frozen_anchors().is_empty() {
            let at = manager.spongy_to_frozen(&head.pose);
            marker = Some((manager.create_attachment(at), manager.head()));
        }

        if let Some(file) = sink.as_mut()
            && params.record_every > 0
            && step % params.record_every == 0
        {
            writer
                .gather_record(&manager, now)
                .context("failed to gather stream record")?;
            writer
                .write_record_to(file)
                .context("failed to write stream record")?;
        }
    }

    let report = manager.save(&mut backend);
    if report.failed > 0 {
        tracing::warn!("{} anchors failed to persist", report.failed);
    }
    let snapshot = manager
        .session_snapshot()
        .context("failed to snapshot session")?;
    backend
        .store()
        .save_snapshot(&snapshot)
        .context("failed to save session")?;

    if let Some((id, placed_at)) = marker
        && let Some(now_at) = manager.attachment_spongy_pose(id)
    {
        summary.content_shift = now_at.position.distance(placed_at.position);
    }

    let (refreezes, merges) = manager.consolidation_counts();
    summary.steps = params.steps;
    summary.live_anchors = manager.store().len();
    summary.edges = manager.store().edge_count();
    summary.frozen_anchors = snapshot.frozen.anchors.len();
    summary.fragments = snapshot.frozen.fragment_count();
    summary.refreezes = refreezes;
    summary.merges = merges;
    summary.saved = report.saved;
    summary.records = writer.records_written();
    Ok(summary)
}
