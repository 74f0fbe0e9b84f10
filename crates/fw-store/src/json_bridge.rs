use std::fs;
use std::path::Path;

use fw_core::{SessionSnapshot, export_json, import_json};

use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    /// Import a JSON export file, replacing the stored session.
    pub fn import_json_file(&self, path: &Path) -> Result<SessionSnapshot> {
        let json = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        self.import_json_str(&json)
    }

    pub fn import_json_str(&self, json: &str) -> Result<SessionSnapshot> {
        let snapshot = import_json(json)?;
        self.save_snapshot(&snapshot)?;
        tracing::info!(
            "imported session: {} anchors, {} edges",
            snapshot.frozen.anchors.len(),
            snapshot.frozen.edges.len()
        );
        Ok(snapshot)
    }

    pub fn export_json_file(&self, path: &Path) -> Result<()> {
        let json = self.export_json_string()?;
        fs::write(path, json).map_err(|e| StoreError::io(path, e))
    }

    /// Export the stored session; an empty store exports an empty session.
    pub fn export_json_string(&self) -> Result<String> {
        let snapshot = self.load_snapshot()?.unwrap_or_default();
        Ok(export_json(&snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_core::{AnchorEdge, AnchorId, FragmentId, FrozenAnchor, FrozenSnapshot, Pose, Vector3};

    fn make_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            frozen: FrozenSnapshot {
                anchors: vec![
                    FrozenAnchor {
                        id: AnchorId(2),
                        fragment_id: FragmentId(2),
                        pose: Pose::identity(),
                    },
                    FrozenAnchor {
                        id: AnchorId(4),
                        fragment_id: FragmentId(2),
                        pose: Pose::from_position(Vector3::new(1.0, 0.0, 0.0)),
                    },
                ],
                edges: vec![AnchorEdge::new(AnchorId(2), AnchorId(4)).unwrap()],
                alignment: Pose::identity(),
                most_significant: FragmentId(2),
            },
            next_anchor_id: AnchorId(5),
            saved_anchor_ids: vec![AnchorId(2), AnchorId(4)],
        }
    }

    #[test]
    fn test_import_export_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.save_snapshot(&make_snapshot()).unwrap();
        let json = store.export_json_string().unwrap();

        let other = Store::open_in_memory().unwrap();
        let imported = other.import_json_str(&json).unwrap();
        assert_eq!(imported.next_anchor_id, AnchorId(5));

        let loaded = other.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded.frozen.anchors.len(), 2);
        assert_eq!(loaded.frozen.edges, make_snapshot().frozen.edges);
        assert_eq!(loaded.saved_anchor_ids, vec![AnchorId(2), AnchorId(4)]);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = Store::open_in_memory().unwrap();
        store.save_snapshot(&make_snapshot()).unwrap();
        store.export_json_file(&path).unwrap();

        let other = Store::open_in_memory().unwrap();
        other.import_json_file(&path).unwrap();
        assert_eq!(other.stats().unwrap().frozen_anchors, 2);
    }

    #[test]
    fn test_export_empty_store() {
        let store = Store::open_in_memory().unwrap();
        let json = store.export_json_string().unwrap();
        let snapshot = import_json(&json).unwrap();
        assert!(snapshot.frozen.anchors.is_empty());
    }

    #[test]
    fn test_import_invalid_json() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.import_json_str("not json"),
            Err(StoreError::Wire(_))
        ));
    }

    #[test]
    fn test_import_missing_file() {
        let store = Store::open_in_memory().unwrap();
        let result = store.import_json_file(Path::new("/nonexistent/session.json"));
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }
}
