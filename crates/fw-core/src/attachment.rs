//! Attachment points: content placed in frozen space, held relative to a
//! frozen anchor so it rides along when fragments are refrozen or merged.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::{ConsolidationProposal, FrozenAnchor};
use crate::ids::{AnchorId, FragmentId};
use crate::pose::Pose;

/// Frozen anchors by id, as last reported by the engine.
pub type FrozenIndex = BTreeMap<AnchorId, FrozenAnchor>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub u64);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Content rigidly offset from an anchor.
///
/// `anchor_id` is `AnchorId::INVALID` while unanchored; `location_from_anchor`
/// then holds the frozen pose directly.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPoint {
    pub anchor_id: AnchorId,
    pub fragment_id: FragmentId,
    pub location_from_anchor: Pose,
    /// Frozen pose as of the last refresh.
    pub frozen_pose: Pose,
}

impl AttachmentPoint {
    fn unanchored(frozen_pose: Pose) -> Self {
        Self {
            anchor_id: AnchorId::INVALID,
            fragment_id: FragmentId::INVALID,
            location_from_anchor: frozen_pose,
            frozen_pose,
        }
    }

    fn bound_to(anchor: &FrozenAnchor, frozen_pose: Pose) -> Self {
        Self {
            anchor_id: anchor.id,
            fragment_id: anchor.fragment_id,
            location_from_anchor: anchor.pose.inverse() * frozen_pose,
            frozen_pose,
        }
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor_id.is_valid()
    }
}

/// An attachment update computed from a proposal, not yet committed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingAttachment {
    pub id: AttachmentId,
    pub point: AttachmentPoint,
}

fn nearest<'a>(
    anchors: impl IntoIterator<Item = &'a FrozenAnchor>,
    frozen_pose: &Pose,
) -> Option<&'a FrozenAnchor> {
    anchors
        .into_iter()
        .map(|a| (a.pose.position.distance(frozen_pose.position), a))
        .min_by(|x, y| x.0.total_cmp(&y.0).then(x.1.id.cmp(&y.1.id)))
        .map(|(_, a)| a)
}

fn bind(frozen_pose: Pose, frozen: &FrozenIndex) -> AttachmentPoint {
    match nearest(frozen.values(), &frozen_pose) {
        Some(anchor) => AttachmentPoint::bound_to(anchor, frozen_pose),
        None => AttachmentPoint::unanchored(frozen_pose),
    }
}

#[derive(Clone, Debug, Default)]
pub struct AttachmentRegistry {
    points: BTreeMap<AttachmentId, AttachmentPoint>,
    next_id: u64,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AttachmentId, &AttachmentPoint)> {
        self.points.iter().map(|(id, p)| (*id, p))
    }

    /// Place content at `frozen_pose`, bound to the nearest frozen anchor.
    pub fn create(&mut self, frozen_pose: Pose, frozen: &FrozenIndex) -> AttachmentId {
        self.next_id += 1;
        let id = AttachmentId(self.next_id);
        self.points.insert(id, bind(frozen_pose, frozen));
        id
    }

    /// Move content to a new frozen pose, rebinding to the nearest anchor.
    pub fn move_to(&mut self, id: AttachmentId, frozen_pose: Pose, frozen: &FrozenIndex) -> bool {
        match self.points.get_mut(&id) {
            Some(point) => {
                *point = bind(frozen_pose, frozen);
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, id: AttachmentId) -> Option<AttachmentPoint> {
        self.points.remove(&id)
    }

    pub fn get(&self, id: AttachmentId) -> Option<&AttachmentPoint> {
        self.points.get(&id)
    }

    /// Current frozen pose, following the anchor if it is still known.
    pub fn frozen_pose(&self, id: AttachmentId, frozen: &FrozenIndex) -> Option<Pose> {
        let point = self.points.get(&id)?;
        Some(match frozen.get(&point.anchor_id) {
            Some(anchor) => anchor.pose * point.location_from_anchor,
            None => point.frozen_pose,
        })
    }

    pub fn spongy_pose(
        &self,
        id: AttachmentId,
        frozen: &FrozenIndex,
        alignment: &Pose,
    ) -> Option<Pose> {
        self.frozen_pose(id, frozen).map(|p| *alignment * p)
    }

    /// Follow anchors to their current frozen poses. Points whose anchor is
    /// gone, or that never had one, bind to the nearest anchor if any exists.
    /// Returns how many points were rebound.
    pub fn refresh(&mut self, frozen: &FrozenIndex) -> usize {
        let mut rebound = 0;
        for (id, point) in self.points.iter_mut() {
            match frozen.get(&point.anchor_id) {
                Some(anchor) => {
                    point.frozen_pose = anchor.pose * point.location_from_anchor;
                    point.fragment_id = anchor.fragment_id;
                }
                None if !frozen.is_empty() => {
                    *point = bind(point.frozen_pose, frozen);
                    tracing::debug!("attachment {id} rebound to anchor {}", point.anchor_id);
                    rebound += 1;
                }
                None => {}
            }
        }
        rebound
    }

    /// Compute new bindings for every point in a fragment the proposal adjusts.
    ///
    /// The new frozen pose is `adjustment * old`; the point moves to the
    /// nearest anchor of the surviving fragment under the proposed poses.
    pub fn plan_adjustments(
        &self,
        proposal: &ConsolidationProposal,
        frozen: &FrozenIndex,
    ) -> Vec<PendingAttachment> {
        let merged = proposal.merged_fragment_id();
        let mut survivors: FrozenIndex = frozen
            .values()
            .filter(|a| a.fragment_id == merged)
            .map(|a| (a.id, *a))
            .collect();
        for anchor in proposal.anchors() {
            if anchor.fragment_id == merged {
                survivors.insert(anchor.id, *anchor);
            } else {
                survivors.remove(&anchor.id);
            }
        }

        let mut pending = Vec::new();
        for (id, point) in &self.points {
            let Some(adjustment) = proposal.adjustment_for(point.fragment_id) else {
                continue;
            };
            let old = match frozen.get(&point.anchor_id) {
                Some(anchor) => anchor.pose * point.location_from_anchor,
                None => point.frozen_pose,
            };
            let new_pose = adjustment * old;
            let point = match nearest(survivors.values(), &new_pose) {
                Some(anchor) => AttachmentPoint::bound_to(anchor, new_pose),
                None => AttachmentPoint {
                    fragment_id: merged,
                    ..AttachmentPoint::unanchored(new_pose)
                },
            };
            pending.push(PendingAttachment { id: *id, point });
        }
        pending
    }

    pub fn commit(&mut self, pending: Vec<PendingAttachment>) {
        for update in pending {
            if let Some(point) = self.points.get_mut(&update.id) {
                *point = update.point;
            }
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
