use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};

use fw_core::{
    AnchorEdge, AnchorId, FragmentId, FrozenAnchor, FrozenSnapshot, Pose, Quaternion,
    SessionSnapshot, Vector3,
};

use crate::error::{Result, StoreError};
use crate::schema;

const KEY_NEXT_ANCHOR_ID: &str = "next_anchor_id";
const KEY_MOST_SIGNIFICANT: &str = "most_significant_fragment";
const KEY_ALIGNMENT: &str = "alignment";

/// Row counts for `fw stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub frozen_anchors: usize,
    pub fragments: usize,
    pub edges: usize,
    pub saved_anchors: usize,
    pub named_trackables: usize,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        set_metadata_on(&self.conn, key, value)
    }

    // --- Session snapshot ---

    /// Replace the stored session with `snapshot` in one transaction.
    pub fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute_batch(
            "DELETE FROM frozen_anchors; DELETE FROM anchor_edges; DELETE FROM saved_anchors;",
        )?;

        let frozen = &snapshot.frozen;
        set_metadata_on(&tx, KEY_NEXT_ANCHOR_ID, &snapshot.next_anchor_id.0.to_string())?;
        set_metadata_on(&tx, KEY_MOST_SIGNIFICANT, &frozen.most_significant.0.to_string())?;
        set_metadata_on(&tx, KEY_ALIGNMENT, &serde_json::to_string(&frozen.alignment)?)?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO frozen_anchors (id, fragment_id, pos_x, pos_y, pos_z, rot_w, rot_x, rot_y, rot_z)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for anchor in &frozen.anchors {
                let (p, q) = (anchor.pose.position, anchor.pose.rotation);
                stmt.execute(params![
                    to_sql_id(anchor.id.0)?,
                    to_sql_id(anchor.fragment_id.0)?,
                    p.x,
                    p.y,
                    p.z,
                    q.w,
                    q.x,
                    q.y,
                    q.z,
                ])?;
            }
        }
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO anchor_edges (id1, id2) VALUES (?1, ?2)")?;
            for edge in &frozen.edges {
                stmt.execute(params![to_sql_id(edge.id1().0)?, to_sql_id(edge.id2().0)?])?;
            }
        }
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO saved_anchors (id) VALUES (?1)")?;
            for id in &snapshot.saved_anchor_ids {
                stmt.execute([to_sql_id(id.0)?])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            "saved session: {} anchors, {} edges",
            frozen.anchors.len(),
            frozen.edges.len()
        );
        Ok(())
    }

    /// The stored session, or `None` if nothing was ever saved.
    pub fn load_snapshot(&self) -> Result<Option<SessionSnapshot>> {
        let Some(next) = self.get_metadata(KEY_NEXT_ANCHOR_ID)? else {
            return Ok(None);
        };
        let next_anchor_id = AnchorId(parse_u64(KEY_NEXT_ANCHOR_ID, &next)?);
        let most_significant = match self.get_metadata(KEY_MOST_SIGNIFICANT)? {
            Some(v) => FragmentId(parse_u64(KEY_MOST_SIGNIFICANT, &v)?),
            None => FragmentId::default(),
        };
        let alignment = match self.get_metadata(KEY_ALIGNMENT)? {
            Some(v) => serde_json::from_str::<Pose>(&v)?,
            None => Pose::identity(),
        };

        let mut stmt = self.conn.prepare(
            "SELECT id, fragment_id, pos_x, pos_y, pos_z, rot_w, rot_x, rot_y, rot_z
             FROM frozen_anchors ORDER BY id",
        )?;
        let anchors = stmt
            .query_map([], |row| {
                Ok(FrozenAnchor {
                    id: AnchorId(row.get::<_, i64>(0)? as u64),
                    fragment_id: FragmentId(row.get::<_, i64>(1)? as u64),
                    pose: pose_from_row(row, 2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT id1, id2 FROM anchor_edges ORDER BY id1, id2")?;
        let pairs: Vec<(i64, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        let edges = pairs
            .into_iter()
            .map(|(a, b)| {
                AnchorEdge::new(AnchorId(a as u64), AnchorId(b as u64))
                    .ok_or_else(|| StoreError::InvalidData(format!("self edge on anchor {a}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare("SELECT id FROM saved_anchors ORDER BY id")?;
        let saved_anchor_ids = stmt
            .query_map([], |row| Ok(AnchorId(row.get::<_, i64>(0)? as u64)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(SessionSnapshot {
            frozen: FrozenSnapshot {
                anchors,
                edges,
                alignment,
                most_significant,
            },
            next_anchor_id,
            saved_anchor_ids,
        }))
    }

    /// Drop one frozen anchor and its edges. Returns false if it was absent.
    pub fn remove_frozen_anchor(&self, id: AnchorId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let key = to_sql_id(id.0)?;
        let rows = tx.execute("DELETE FROM frozen_anchors WHERE id = ?1", [key])?;
        tx.execute("DELETE FROM anchor_edges WHERE id1 = ?1 OR id2 = ?1", [key])?;
        tx.execute("DELETE FROM saved_anchors WHERE id = ?1", [key])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(StoreStats {
            frozen_anchors: count("SELECT COUNT(*) FROM frozen_anchors")?,
            fragments: count("SELECT COUNT(DISTINCT fragment_id) FROM frozen_anchors")?,
            edges: count("SELECT COUNT(*) FROM anchor_edges")?,
            saved_anchors: count("SELECT COUNT(*) FROM saved_anchors")?,
            named_trackables: count("SELECT COUNT(*) FROM named_trackables")?,
        })
    }

    // --- Named trackables ---

    pub fn put_named(&self, name: &str, pose: &Pose) -> Result<()> {
        let (p, q) = (pose.position, pose.rotation);
        self.conn.execute(
            "INSERT OR REPLACE INTO named_trackables (name, pos_x, pos_y, pos_z, rot_w, rot_x, rot_y, rot_z)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![name, p.x, p.y, p.z, q.w, q.x, q.y, q.z],
        )?;
        Ok(())
    }

    pub fn get_named(&self, name: &str) -> Result<Option<Pose>> {
        let pose = self
            .conn
            .query_row(
                "SELECT pos_x, pos_y, pos_z, rot_w, rot_x, rot_y, rot_z
                 FROM named_trackables WHERE name = ?1",
                [name],
                |row| pose_from_row(row, 0),
            )
            .optional()?;
        Ok(pose)
    }

    pub fn delete_named(&self, name: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM named_trackables WHERE name = ?1", [name])?;
        Ok(rows > 0)
    }

    pub fn named(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM named_trackables ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(names)
    }
}

fn set_metadata_on(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn pose_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<Pose> {
    let position = Vector3::new(row.get(start)?, row.get(start + 1)?, row.get(start + 2)?);
    let rotation = Quaternion::new(
        row.get(start + 3)?,
        row.get(start + 4)?,
        row.get(start + 5)?,
        row.get(start + 6)?,
    );
    Ok(Pose::new(position, rotation))
}

fn to_sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| StoreError::InvalidData(format!("id {id} out of range")))
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|e| StoreError::InvalidData(format!("metadata {key}='{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot() -> SessionSnapshot {
        let anchor = |id: u64, fragment: u64, x: f64| FrozenAnchor {
            id: AnchorId(id),
            fragment_id: FragmentId(fragment),
            pose: Pose::new(Vector3::new(x, 0.5, -1.0), Quaternion::from_yaw(x * 0.1)),
        };
        SessionSnapshot {
            frozen: FrozenSnapshot {
                anchors: vec![anchor(2, 2, 0.0), anchor(3, 2, 1.1), anchor(5, 3, 4.0)],
                edges: vec![AnchorEdge::new(AnchorId(2), AnchorId(3)).unwrap()],
                alignment: Pose::from_position(Vector3::new(0.01, 0.0, 0.0)),
                most_significant: FragmentId(2),
            },
            next_anchor_id: AnchorId(6),
            saved_anchor_ids: vec![AnchorId(2), AnchorId(3)],
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let original = make_snapshot();

        store.save_snapshot(&original).unwrap();
        let loaded = store.load_snapshot().unwrap().unwrap();

        assert_eq!(loaded.next_anchor_id, AnchorId(6));
        assert_eq!(loaded.saved_anchor_ids, original.saved_anchor_ids);
        assert_eq!(loaded.frozen.edges, original.frozen.edges);
        assert_eq!(loaded.frozen.most_significant, FragmentId(2));
        assert_eq!(loaded.frozen.anchors.len(), 3);
        for (a, b) in loaded.frozen.anchors.iter().zip(&original.frozen.anchors) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.fragment_id, b.fragment_id);
            assert!(a.pose.approx_eq(&b.pose, 1e-12));
        }
        assert!(
            loaded
                .frozen
                .alignment
                .approx_eq(&original.frozen.alignment, 1e-12)
        );
    }

    #[test]
    fn test_load_empty_db() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn test_save_overwrites_previous() {
        let store = Store::open_in_memory().unwrap();
        store.save_snapshot(&make_snapshot()).unwrap();
        store.save_snapshot(&SessionSnapshot::default()).unwrap();

        let loaded = store.load_snapshot().unwrap().unwrap();
        assert!(loaded.frozen.anchors.is_empty());
        assert!(loaded.frozen.edges.is_empty());
        assert_eq!(loaded.next_anchor_id, AnchorId::FIRST_VALID);
    }

    #[test]
    fn test_remove_frozen_anchor_drops_edges() {
        let store = Store::open_in_memory().unwrap();
        store.save_snapshot(&make_snapshot()).unwrap();

        assert!(store.remove_frozen_anchor(AnchorId(3)).unwrap());
        assert!(!store.remove_frozen_anchor(AnchorId(3)).unwrap());

        let loaded = store.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded.frozen.anchors.len(), 2);
        assert!(loaded.frozen.edges.is_empty());
        assert_eq!(loaded.saved_anchor_ids, vec![AnchorId(2)]);
    }

    #[test]
    fn test_stats() {
        let store = Store::open_in_memory().unwrap();
        store.save_snapshot(&make_snapshot()).unwrap();
        store.put_named("fw-anchor-2", &Pose::identity()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.frozen_anchors, 3);
        assert_eq!(stats.fragments, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.saved_anchors, 2);
        assert_eq!(stats.named_trackables, 1);
    }

    #[test]
    fn test_named_trackables() {
        let store = Store::open_in_memory().unwrap();
        let pose = Pose::new(Vector3::new(1.0, 2.0, 3.0), Quaternion::from_yaw(0.3));

        assert!(store.get_named("a").unwrap().is_none());
        store.put_named("a", &pose).unwrap();
        assert!(store.get_named("a").unwrap().unwrap().approx_eq(&pose, 1e-12));

        store.put_named("a", &Pose::identity()).unwrap();
        assert_eq!(store.named().unwrap(), vec!["a".to_string()]);

        assert!(store.delete_named("a").unwrap());
        assert!(!store.delete_named("a").unwrap());
    }

    #[test]
    fn test_metadata() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_metadata("foo").unwrap().is_none());
        store.set_metadata("foo", "bar").unwrap();
        assert_eq!(store.get_metadata("foo").unwrap(), Some("bar".to_string()));
    }

    #[test]
    fn test_corrupt_metadata_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.set_metadata(KEY_NEXT_ANCHOR_ID, "abc").unwrap();
        assert!(matches!(
            store.load_snapshot(),
            Err(StoreError::InvalidData(_))
        ));
    }
}
