use std::ops::{Mul, Neg};

use serde::{Deserialize, Serialize};

use crate::constants::{EPSILON, SLERP_THRESHOLD};
use crate::pose::Vector3;

/// Unit quaternion representing an orientation.
///
/// Kept normalized by every constructor. `q` and `-q` describe the same
/// rotation; `angular_distance` folds them together via abs(dot).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PartialEq for Quaternion {
    fn eq(&self, other: &Self) -> bool {
        self.to_array()
            .iter()
            .zip(other.to_array())
            .all(|(a, b)| (a - b).abs() < EPSILON)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Components are normalized on construction.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }.normalize()
    }

    pub const fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Rotation of `angle` radians about `axis`. A degenerate axis yields identity.
    pub fn from_axis_angle(axis: Vector3, angle: f64) -> Self {
        let len = axis.length();
        if len < EPSILON {
            return Self::identity();
        }
        let (sin, cos) = (angle * 0.5).sin_cos();
        let k = sin / len;
        Self::new(cos, axis.x * k, axis.y * k, axis.z * k)
    }

    /// Rotation about the vertical (+y) axis.
    pub fn from_yaw(yaw: f64) -> Self {
        Self::from_axis_angle(Vector3::new(0.0, 1.0, 0.0), yaw)
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Scale to unit length; a near-zero quaternion becomes identity.
    pub fn normalize(self) -> Self {
        let n = self.norm();
        if n < EPSILON {
            Self::identity()
        } else {
            self.scaled(1.0 / n)
        }
    }

    /// Inverse of a unit quaternion.
    pub fn conjugate(self) -> Self {
        Self {
            w: self.w,
            ..(-self)
        }
    }

    pub fn dot(self, other: Self) -> f64 {
        let [aw, ax, ay, az] = self.to_array();
        let [bw, bx, by, bz] = other.to_array();
        aw * bw + ax * bx + ay * by + az * bz
    }

    /// Angle of the rotation taking `self` to `other`, in [0, π].
    pub fn angular_distance(self, other: Self) -> f64 {
        2.0 * self.dot(other).abs().min(1.0).acos()
    }

    /// Rotate a vector by this quaternion.
    pub fn rotate(self, v: Vector3) -> Vector3 {
        let u = Vector3::new(self.x, self.y, self.z);
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }

    /// Interpolate along the shorter arc. Nearly parallel inputs are blended
    /// linearly and renormalized.
    pub fn slerp(self, other: Self, t: f64) -> Self {
        if t <= 0.0 {
            return self;
        }
        if t >= 1.0 {
            return other;
        }

        let cos = self.dot(other);
        let (target, cos) = if cos < 0.0 { (-other, -cos) } else { (other, cos) };

        if cos > SLERP_THRESHOLD {
            return Self::blend(self, 1.0 - t, target, t).normalize();
        }

        let angle = cos.min(1.0).acos();
        let sin = angle.sin();
        let wa = ((1.0 - t) * angle).sin() / sin;
        let wb = (t * angle).sin() / sin;
        Self::blend(self, wa, target, wb).normalize()
    }

    /// Components as `[w, x, y, z]`.
    pub fn to_array(self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }

    pub fn from_array([w, x, y, z]: [f64; 4]) -> Self {
        Self::new(w, x, y, z)
    }

    fn scaled(self, k: f64) -> Self {
        Self {
            w: self.w * k,
            x: self.x * k,
            y: self.y * k,
            z: self.z * k,
        }
    }

    fn blend(a: Self, wa: f64, b: Self, wb: f64) -> Self {
        let (a, b) = (a.scaled(wa), b.scaled(wb));
        Self {
            w: a.w + b.w,
            x: a.x + b.x,
            y: a.y + b.y,
            z: a.z + b.z,
        }
    }
}

impl Neg for Quaternion {
    type Output = Self;

    fn neg(self) -> Self {
        self.scaled(-1.0)
    }
}

/// Hamilton product: `a * b` rotates by `b` first, then `a`.
impl Mul for Quaternion {
    type Output = Self;

    fn mul(self, q: Self) -> Self {
        let (a, b) = (self, q);
        Self {
            w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
            x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        }
    }
}
