//! On-disk layout of named sessions.
//!
//! ```text
//! $FW_DATA_DIR (default ~/.frozen-world)/
//! └── sessions/
//!     ├── default.db
//!     └── <name>.db
//! ```

use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::{Result, StoreError};
use crate::store::Store;

pub const DATA_DIR_ENV: &str = "FW_DATA_DIR";
pub const DEFAULT_SESSION: &str = "default";

/// Base directory for all session databases.
pub fn default_base_dir() -> PathBuf {
    if let Ok(dir) = env::var(DATA_DIR_ENV)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs_home().join(".frozen-world")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Sanitize a session name for use as a filename.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        DEFAULT_SESSION.to_string()
    } else {
        cleaned
    }
}

pub fn session_path(name: &str, base_dir: Option<&Path>) -> PathBuf {
    let base = base_dir.map(PathBuf::from).unwrap_or_else(default_base_dir);
    base.join("sessions")
        .join(format!("{}.db", sanitize_name(name)))
}

/// Open (creating if needed) the store for session `name`.
/// `base_dir` overrides the data directory.
pub fn open_session(name: &str, base_dir: Option<&Path>) -> Result<Store> {
    let path = session_path(name, base_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    tracing::debug!("opening session store {}", path.display());
    Store::open(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_creation() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_session("lab", Some(dir.path())).unwrap();
        assert!(store.load_snapshot().unwrap().is_none());
        assert!(dir.path().join("sessions/lab.db").exists());
    }

    #[test]
    fn test_session_name_sanitization() {
        assert_eq!(sanitize_name("living room"), "living_room");
        assert_eq!(sanitize_name("a/b"), "a_b");
        assert_eq!(sanitize_name("  "), DEFAULT_SESSION);
        assert_eq!(sanitize_name("valid-name_123"), "valid-name_123");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = open_session("a", Some(dir.path())).unwrap();
        a.set_metadata("next_anchor_id", "9").unwrap();
        drop(a);
        let b = open_session("b", Some(dir.path())).unwrap();
        assert!(b.load_snapshot().unwrap().is_none());
        let a = open_session("a", Some(dir.path())).unwrap();
        assert!(a.load_snapshot().unwrap().is_some());
    }
}
