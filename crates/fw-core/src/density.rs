//! Stateless anchor density policy.
//!
//! Decides from the current head position alone whether to create an anchor
//! and which edges to add. The anchors themselves live in `graph`.

use crate::constants::DISTANCE_TOLERANCE;
use crate::ids::AnchorId;
use crate::pose::Vector3;

/// Structural change requested for one tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DensityPlan {
    /// Nothing within MIN: create an anchor at the head and connect it to
    /// every anchor within MAX.
    Create { connect_to: Vec<AnchorId> },
    /// Several anchors within MIN: connect the nearest one to the others.
    Connect { hub: AnchorId, others: Vec<AnchorId> },
    /// Exactly one anchor within MIN.
    Keep(AnchorId),
}

impl DensityPlan {
    /// Upper bound on the edges this plan can add.
    pub fn max_new_edges(&self) -> usize {
        match self {
            DensityPlan::Create { connect_to } => connect_to.len(),
            DensityPlan::Connect { others, .. } => others.len(),
            DensityPlan::Keep(_) => 0,
        }
    }
}

fn within(distance: f64, radius: f64) -> bool {
    distance <= radius + DISTANCE_TOLERANCE
}

/// Plan the density step for a head at `head` given live anchor positions.
///
/// Ties for nearest anchor go to the lower id, so the plan is deterministic
/// for any iteration order.
pub fn plan_density<I>(head: Vector3, anchors: I, min: f64, max: f64) -> DensityPlan
where
    I: IntoIterator<Item = (AnchorId, Vector3)>,
{
    let mut near_min: Vec<(AnchorId, f64)> = Vec::new();
    let mut near_max: Vec<AnchorId> = Vec::new();

    for (id, position) in anchors {
        let d = head.distance(position);
        if within(d, min) {
            near_min.push((id, d));
        }
        if within(d, max) {
            near_max.push(id);
        }
    }

    match near_min.len() {
        0 => {
            near_max.sort();
            DensityPlan::Create {
                connect_to: near_max,
            }
        }
        1 => DensityPlan::Keep(near_min[0].0),
        _ => {
            near_min.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            let hub = near_min[0].0;
            let mut others: Vec<AnchorId> = near_min[1..].iter().map(|(id, _)| *id).collect();
            others.sort();
            DensityPlan::Connect { hub, others }
        }
    }
}
