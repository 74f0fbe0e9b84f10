//! JSON export format for session snapshots.
//!
//! camelCase field names, positions as `[x, y, z]` and rotations as
//! `[w, x, y, z]` arrays, edges as `[id1, id2]` pairs.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::engine::{FrozenAnchor, FrozenSnapshot};
use crate::error::WireError;
use crate::ids::{AnchorEdge, AnchorId, FragmentId};
use crate::persistence::SessionSnapshot;
use crate::pose::{Pose, Vector3};
use crate::quaternion::Quaternion;

pub const CURRENT_VERSION: &str = "1.0";

// --- Wire format types ---

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WireExport {
    pub version: String,
    /// Seconds since the Unix epoch at export time.
    #[serde(default)]
    pub exported_at: u64,
    pub session: WireSession,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WireSession {
    pub next_anchor_id: u64,
    #[serde(default)]
    pub saved_anchor_ids: Vec<u64>,
    pub most_significant_fragment: u64,
    pub alignment: WirePose,
    pub anchors: Vec<WireAnchor>,
    #[serde(default)]
    pub edges: Vec<[u64; 2]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct WirePose {
    pub position: [f64; 3],
    pub rotation: [f64; 4],
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WireAnchor {
    pub id: u64,
    pub fragment_id: u64,
    #[serde(flatten)]
    pub pose: WirePose,
}

impl From<&Pose> for WirePose {
    fn from(pose: &Pose) -> Self {
        Self {
            position: pose.position.to_array(),
            rotation: pose.rotation.to_array(),
        }
    }
}

impl From<WirePose> for Pose {
    fn from(wire: WirePose) -> Self {
        Pose::new(
            Vector3::from_array(wire.position),
            Quaternion::from_array(wire.rotation),
        )
    }
}

// --- Conversion ---

impl WireExport {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let exported_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let frozen = &snapshot.frozen;
        WireExport {
            version: CURRENT_VERSION.to_string(),
            exported_at,
            session: WireSession {
                next_anchor_id: snapshot.next_anchor_id.0,
                saved_anchor_ids: snapshot.saved_anchor_ids.iter().map(|id| id.0).collect(),
                most_significant_fragment: frozen.most_significant.0,
                alignment: WirePose::from(&frozen.alignment),
                anchors: frozen
                    .anchors
                    .iter()
                    .map(|a| WireAnchor {
                        id: a.id.0,
                        fragment_id: a.fragment_id.0,
                        pose: WirePose::from(&a.pose),
                    })
                    .collect(),
                edges: frozen
                    .edges
                    .iter()
                    .map(|e| [e.id1().0, e.id2().0])
                    .collect(),
            },
        }
    }

    /// Convert to a snapshot, checking ids and edges.
    pub fn into_snapshot(self) -> Result<SessionSnapshot, WireError> {
        let major = self.version.split('.').next().unwrap_or_default();
        if major != "1" {
            return Err(WireError::UnsupportedVersion(self.version));
        }
        let session = self.session;

        let mut anchors = Vec::with_capacity(session.anchors.len());
        for wire in session.anchors {
            anchors.push(FrozenAnchor {
                id: AnchorId(wire.id),
                fragment_id: FragmentId(wire.fragment_id),
                pose: wire.pose.into(),
            });
        }

        let mut edges = Vec::with_capacity(session.edges.len());
        for [a, b] in session.edges {
            let edge = AnchorEdge::new(AnchorId(a), AnchorId(b))
                .ok_or_else(|| WireError::Invalid(format!("self edge on {a}")))?;
            edges.push(edge);
        }
        edges.sort();
        edges.dedup();

        let snapshot = SessionSnapshot {
            frozen: FrozenSnapshot {
                anchors,
                edges,
                alignment: session.alignment.into(),
                most_significant: FragmentId(session.most_significant_fragment),
            },
            next_anchor_id: AnchorId(session.next_anchor_id.max(AnchorId::FIRST_VALID.0)),
            saved_anchor_ids: session.saved_anchor_ids.into_iter().map(AnchorId).collect(),
        };
        snapshot
            .validate()
            .map_err(|fault| WireError::Invalid(fault.message))?;
        Ok(snapshot)
    }
}

/// Import a session from JSON.
pub fn import_json(json: &str) -> Result<SessionSnapshot, WireError> {
    let export: WireExport = serde_json::from_str(json)?;
    export.into_snapshot()
}

/// Export a session to pretty-printed JSON.
pub fn export_json(snapshot: &SessionSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&WireExport::from_snapshot(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionSnapshot {
        SessionSnapshot {
            frozen: FrozenSnapshot {
                anchors: vec![
                    FrozenAnchor {
                        id: AnchorId(2),
                        fragment_id: FragmentId(2),
                        pose: Pose::new(
                            Vector3::new(0.5, 1.0, -2.0),
                            Quaternion::from_yaw(0.25),
                        ),
                    },
                    FrozenAnchor {
                        id: AnchorId(3),
                        fragment_id: FragmentId(2),
                        pose: Pose::from_position(Vector3::new(1.5, 1.0, -2.0)),
                    },
                ],
                edges: vec![AnchorEdge::new(AnchorId(2), AnchorId(3)).unwrap()],
                alignment: Pose::identity(),
                most_significant: FragmentId(2),
            },
            next_anchor_id: AnchorId(4),
            saved_anchor_ids: vec![AnchorId(2)],
        }
    }

    #[test]
    fn test_roundtrip() {
        let snapshot = sample();
        let json = export_json(&snapshot).unwrap();
        let back = import_json(&json).unwrap();
        assert_eq!(back.next_anchor_id, snapshot.next_anchor_id);
        assert_eq!(back.saved_anchor_ids, snapshot.saved_anchor_ids);
        assert_eq!(back.frozen.edges, snapshot.frozen.edges);
        assert_eq!(back.frozen.anchors.len(), 2);
        for (a, b) in back.frozen.anchors.iter().zip(&snapshot.frozen.anchors) {
            assert_eq!(a.id, b.id);
            assert!(a.pose.approx_eq(&b.pose, 1e-12));
        }
    }

    #[test]
    fn test_camel_case_fields() {
        let json = export_json(&sample()).unwrap();
        assert!(json.contains("\"version\": \"1.0\""));
        assert!(json.contains("\"nextAnchorId\""));
        assert!(json.contains("\"fragmentId\""));
        assert!(json.contains("\"mostSignificantFragment\""));
    }

    #[test]
    fn test_unknown_major_version_rejected() {
        let json = export_json(&sample()).unwrap().replace("\"1.0\"", "\"2.0\"");
        assert!(matches!(
            import_json(&json),
            Err(WireError::UnsupportedVersion(v)) if v == "2.0"
        ));
    }

    #[test]
    fn test_self_edge_rejected() {
        let json = r#"{
            "version": "1.0",
            "session": {
                "nextAnchorId": 3,
                "mostSignificantFragment": 0,
                "alignment": {"position": [0, 0, 0], "rotation": [1, 0, 0, 0]},
                "anchors": [],
                "edges": [[2, 2]]
            }
        }"#;
        assert!(matches!(import_json(json), Err(WireError::Invalid(_))));
    }

    #[test]
    fn test_out_of_range_ids_rejected() {
        let anchor = r#"{
            "version": "1.0",
            "session": {
                "nextAnchorId": 3,
                "mostSignificantFragment": 2,
                "alignment": {"position": [0, 0, 0], "rotation": [1, 0, 0, 0]},
                "anchors": [{
                    "id": 18446744073709551615,
                    "fragmentId": 2,
                    "position": [0, 0, 0],
                    "rotation": [1, 0, 0, 0]
                }]
            }
        }"#;
        assert!(matches!(import_json(anchor), Err(WireError::Invalid(_))));

        let next = r#"{
            "version": "1.0",
            "session": {
                "nextAnchorId": 18446744073709551615,
                "mostSignificantFragment": 0,
                "alignment": {"position": [0, 0, 0], "rotation": [1, 0, 0, 0]},
                "anchors": []
            }
        }"#;
        assert!(matches!(import_json(next), Err(WireError::Invalid(_))));
    }

    #[test]
    fn test_edges_regularized_on_import() {
        let json = r#"{
            "version": "1.0",
            "session": {
                "nextAnchorId": 9,
                "mostSignificantFragment": 2,
                "alignment": {"position": [0, 0, 0], "rotation": [1, 0, 0, 0]},
                "anchors": [],
                "edges": [[7, 4], [4, 7]]
            }
        }"#;
        let snapshot = import_json(json).unwrap();
        assert_eq!(snapshot.frozen.edges.len(), 1);
        assert_eq!(snapshot.frozen.edges[0].id1(), AnchorId(4));
    }
}
