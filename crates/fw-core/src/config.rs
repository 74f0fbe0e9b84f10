use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FAULT_DEGRADED_THRESHOLD, DEFAULT_LOCATED_DWELL_SECS, DEFAULT_MAX_ANCHOR_EDGE_LENGTH,
    DEFAULT_MIN_NEW_ANCHOR_DISTANCE, DEFAULT_REFREEZE_ANGULAR_THRESHOLD,
    DEFAULT_REFREEZE_LINEAR_THRESHOLD, DEFAULT_SUPPORT_RADIUS,
};
use crate::error::ConfigError;

/// Anchor placement and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// No new anchor is created while one lies within this radius of the head (MIN).
    pub min_new_anchor_distance: f64,

    /// A freshly created anchor is connected to every anchor within this radius (MAX).
    pub max_anchor_edge_length: f64,

    /// Seconds of continuous reliable tracking before an anchor reports located.
    pub located_dwell_secs: f64,

    /// Distance-based eviction. `None` keeps anchors until the backend loses them.
    pub eviction: Option<EvictionConfig>,

    /// Consecutive faulted engine cycles before degraded mode is reported.
    pub fault_degraded_threshold: u32,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            min_new_anchor_distance: DEFAULT_MIN_NEW_ANCHOR_DISTANCE,
            max_anchor_edge_length: DEFAULT_MAX_ANCHOR_EDGE_LENGTH,
            located_dwell_secs: DEFAULT_LOCATED_DWELL_SECS,
            eviction: None,
            fault_degraded_threshold: DEFAULT_FAULT_DEGRADED_THRESHOLD,
        }
    }
}

impl AnchorConfig {
    /// Settings with explicit MIN and MAX radii, everything else default.
    pub fn with_radii(min: f64, max: f64) -> Self {
        Self {
            min_new_anchor_distance: min,
            max_anchor_edge_length: max,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_new_anchor_distance > 0.0) {
            return Err(ConfigError::Invalid {
                field: "min_new_anchor_distance",
                reason: format!("must be positive, got {}", self.min_new_anchor_distance),
            });
        }
        if self.max_anchor_edge_length <= self.min_new_anchor_distance {
            return Err(ConfigError::Invalid {
                field: "max_anchor_edge_length",
                reason: format!(
                    "must exceed min_new_anchor_distance ({} <= {})",
                    self.max_anchor_edge_length, self.min_new_anchor_distance
                ),
            });
        }
        if !(self.located_dwell_secs >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "located_dwell_secs",
                reason: format!("must be non-negative, got {}", self.located_dwell_secs),
            });
        }
        if let Some(eviction) = &self.eviction {
            if eviction.radius <= self.max_anchor_edge_length {
                return Err(ConfigError::Invalid {
                    field: "eviction.radius",
                    reason: format!(
                        "must exceed max_anchor_edge_length ({} <= {})",
                        eviction.radius, self.max_anchor_edge_length
                    ),
                });
            }
            if !(eviction.linger_secs >= 0.0) {
                return Err(ConfigError::Invalid {
                    field: "eviction.linger_secs",
                    reason: format!("must be non-negative, got {}", eviction.linger_secs),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Anchors farther than this from the head are candidates for eviction.
    pub radius: f64,
    /// How long an anchor may stay out of range before it is evicted.
    pub linger_secs: f64,
}

/// Reference solver tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub support_radius: f64,
    pub refreeze_linear_threshold: f64,
    pub refreeze_angular_threshold: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            support_radius: DEFAULT_SUPPORT_RADIUS,
            refreeze_linear_threshold: DEFAULT_REFREEZE_LINEAR_THRESHOLD,
            refreeze_angular_threshold: DEFAULT_REFREEZE_ANGULAR_THRESHOLD,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("solver.support_radius", self.support_radius),
            ("solver.refreeze_linear_threshold", self.refreeze_linear_threshold),
            ("solver.refreeze_angular_threshold", self.refreeze_angular_threshold),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be positive, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Top-level configuration as it appears in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub anchors: AnchorConfig,
    pub solver: SolverSettings,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.anchors.validate()?;
        self.solver.validate()
    }
}
