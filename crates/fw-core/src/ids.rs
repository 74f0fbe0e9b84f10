use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a spongy anchor, assigned by the client in increasing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(pub u64);

impl AnchorId {
    pub const INVALID: Self = Self(0);
    pub const UNKNOWN: Self = Self(1);
    pub const FIRST_VALID: Self = Self(2);
    /// Largest id ever assigned. Its successor marks the id space as used up.
    pub const MAX: Self = Self(u64::MAX - 2);

    pub fn is_valid(self) -> bool {
        (Self::FIRST_VALID.0..=Self::MAX.0).contains(&self.0)
    }

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Identifier of a fragment, assigned by the engine. Defaults to `INVALID`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FragmentId(pub u64);

impl FragmentId {
    pub const INVALID: Self = Self(0);
    pub const UNKNOWN: Self = Self(1);
    pub const FIRST_VALID: Self = Self(2);

    pub fn is_valid(self) -> bool {
        self.0 >= Self::FIRST_VALID.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Undirected edge between two anchors, stored with `id1 < id2`.
/// Serialized as a two-element array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "[AnchorId; 2]", into = "[AnchorId; 2]")]
pub struct AnchorEdge {
    id1: AnchorId,
    id2: AnchorId,
}

impl AnchorEdge {
    /// Regularized edge between `a` and `b`. Self-edges are rejected.
    pub fn new(a: AnchorId, b: AnchorId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { id1: a, id2: b }),
            std::cmp::Ordering::Greater => Some(Self { id1: b, id2: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn id1(&self) -> AnchorId {
        self.id1
    }

    pub fn id2(&self) -> AnchorId {
        self.id2
    }

    pub fn touches(&self, id: AnchorId) -> bool {
        self.id1 == id || self.id2 == id
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    pub fn other(&self, id: AnchorId) -> Option<AnchorId> {
        if self.id1 == id {
            Some(self.id2)
        } else if self.id2 == id {
            Some(self.id1)
        } else {
            None
        }
    }
}

impl TryFrom<[AnchorId; 2]> for AnchorEdge {
    type Error = String;

    fn try_from(pair: [AnchorId; 2]) -> Result<Self, Self::Error> {
        Self::new(pair[0], pair[1]).ok_or_else(|| format!("self-edge on {}", pair[0]))
    }
}

impl From<AnchorEdge> for [AnchorId; 2] {
    fn from(edge: AnchorEdge) -> Self {
        [edge.id1, edge.id2]
    }
}
