/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

/// SLERP near-parallel threshold; above this dot product fall back to NLERP
pub const SLERP_THRESHOLD: f64 = 0.9995;

/// Slack (meters) applied to every radius comparison in the density policy.
/// Keeps `0.9 - 0.6` inside a 0.3 radius.
pub const DISTANCE_TOLERANCE: f64 = 1e-6;

/// Default radius (meters) inside which no new spongy anchor is created.
pub const DEFAULT_MIN_NEW_ANCHOR_DISTANCE: f64 = 1.0;

/// Margin between the creation radius and the edge radius.
/// 20 cm in one frame is faster than world-record sprinting.
pub const EDGE_LENGTH_MARGIN: f64 = 0.2;

/// Default maximum length (meters) of an edge made to a freshly created anchor.
pub const DEFAULT_MAX_ANCHOR_EDGE_LENGTH: f64 = DEFAULT_MIN_NEW_ANCHOR_DISTANCE + EDGE_LENGTH_MARGIN;

/// Seconds the backend must report reliable tracking before an anchor counts as located.
pub const DEFAULT_LOCATED_DWELL_SECS: f64 = 0.3;

/// Consecutive faulted engine cycles before the manager reports degraded mode.
pub const DEFAULT_FAULT_DEGRADED_THRESHOLD: u32 = 30;

/// Radius (meters) around the head inside which anchors support the alignment.
pub const DEFAULT_SUPPORT_RADIUS: f64 = 3.0;

/// Linear deviation (meters) of a support that indicates a refreeze.
pub const DEFAULT_REFREEZE_LINEAR_THRESHOLD: f64 = 0.05;

/// Angular deviation (radians) of a support that indicates a refreeze.
pub const DEFAULT_REFREEZE_ANGULAR_THRESHOLD: f64 = 0.05;

/// Prefix of the backend name under which a spongy anchor is persisted.
pub const ANCHOR_NAME_PREFIX: &str = "fw-anchor-";
