//! Frozen-world anchor graph engine.
//!
//! Keeps a sparse graph of tracking anchors in drifting "spongy" space,
//! maps it into a stable "frozen" space through a pluggable solver, and
//! reconciles fragments of that graph (refreeze and merge) without moving
//! content attached to it.
//!
//! Zero I/O. Trackable backends, pose sources and storage are supplied by
//! the host through traits.

pub mod anchor;
pub mod attachment;
pub mod backend;
pub mod config;
pub mod consolidation;
pub mod constants;
pub mod density;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ids;
pub mod manager;
pub mod persistence;
pub mod pose;
pub mod quaternion;
pub mod sim;
pub mod solver;
pub mod stream;
pub mod wire;

pub use anchor::{LocatedDebounce, SpongyAnchor, SpongyAnchorPose};
pub use attachment::{AttachmentId, AttachmentPoint, AttachmentRegistry, FrozenIndex};
pub use backend::{LoadStatus, PoseSource, TrackableBackend, TrackableHandle, TrackableState};
pub use config::{AnchorConfig, Config, EvictionConfig, SolverSettings};
pub use consolidation::{ConsolidationReport, ConsolidationState, Coordinator};
pub use constants::{ANCHOR_NAME_PREFIX, DISTANCE_TOLERANCE, EPSILON};
pub use density::{DensityPlan, plan_density};
pub use engine::{
    AlignmentMetrics, ConsolidationKind, ConsolidationProposal, Engine, EngineInput, EngineOutput,
    FragmentAdjustment, FrozenAnchor, FrozenSnapshot,
};
pub use error::{BackendError, ConfigError, EngineFault, EngineResult, StreamError, WireError};
pub use graph::{DensityOutcome, GraphDelta, SpongyAnchorStore};
pub use ids::{AnchorEdge, AnchorId, FragmentId};
pub use manager::{AnchorManager, SessionState, TickOutcome};
pub use persistence::{
    LoadProgress, PersistenceManager, SaveReport, SessionSnapshot, anchor_name, parse_anchor_name,
};
pub use pose::{Pose, PoseAccumulator, Vector3};
pub use quaternion::Quaternion;
pub use sim::{SimulatedBackend, SimulatedHead};
pub use solver::ReferenceEngine;
pub use stream::{Record, RecordReader, RecordWriter, TransientState};
pub use wire::{CURRENT_VERSION, export_json, import_json};
