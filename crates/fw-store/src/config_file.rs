//! TOML configuration file loading.
//!
//! ```toml
//! [anchors]
//! min_new_anchor_distance = 1.0
//! max_anchor_edge_length = 1.2
//!
//! [solver]
//! support_radius = 3.0
//! ```
//!
//! Missing sections and fields take their defaults.

use std::fs;
use std::path::Path;

use fw_core::Config;

use crate::error::{Result, StoreError};

pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    let config = parse_config(&text)?;
    tracing::debug!("loaded config from {}", path.display());
    Ok(config)
}

/// Load `path` if given, otherwise defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}
