//! Rigid transforms in tracking space.
//!
//! `Pose` maps points from its local frame into its parent frame. Composition
//! reads right to left: `(a * b).transform_point(p) == a.transform_point(b.transform_point(p))`.

use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::quaternion::Quaternion;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn length_squared(self) -> f64 {
        self.dot(self)
    }

    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    pub fn distance(self, other: Self) -> f64 {
        (self - other).length()
    }

    pub fn lerp(self, other: Self, t: f64) -> Self {
        self + (other - self) * t
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn from_array(arr: [f64; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }
}

impl Add for Vector3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Self;

    fn mul(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Vector3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Position plus orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub rotation: Quaternion,
}

impl Pose {
    pub fn new(position: Vector3, rotation: Quaternion) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::ZERO, Quaternion::identity())
    }

    /// Pure translation.
    pub fn from_position(position: Vector3) -> Self {
        Self::new(position, Quaternion::identity())
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.conjugate();
        Self {
            position: -rotation.rotate(self.position),
            rotation,
        }
    }

    pub fn transform_point(&self, p: Vector3) -> Vector3 {
        self.position + self.rotation.rotate(p)
    }

    /// Linear position, spherical rotation interpolation.
    pub fn interpolate(&self, other: &Self, t: f64) -> Self {
        Self {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.slerp(other.rotation, t),
        }
    }

    /// Translation distance and rotation angle between two poses.
    pub fn deviation(&self, other: &Self) -> (f64, f64) {
        (
            self.position.distance(other.position),
            self.rotation.angular_distance(other.rotation),
        )
    }

    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        let (linear, angular) = self.deviation(other);
        linear <= tol && angular <= tol
    }
}

impl Mul for Pose {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            position: self.transform_point(rhs.position),
            rotation: (self.rotation * rhs.rotation).normalize(),
        }
    }
}

/// Running weighted mean of poses.
///
/// Rotations are folded in with incremental SLERP, which is exact for two
/// samples and a good approximation for tightly clustered sets.
#[derive(Clone, Debug, Default)]
pub struct PoseAccumulator {
    position: Vector3,
    rotation: Option<Quaternion>,
    total_weight: f64,
}

impl PoseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pose: &Pose, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.total_weight += weight;
        let t = weight / self.total_weight;
        self.position = self.position.lerp(pose.position, t);
        self.rotation = Some(match self.rotation {
            Some(acc) => acc.slerp(pose.rotation, t),
            None => pose.rotation,
        });
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn mean(&self) -> Option<Pose> {
        self.rotation.map(|rotation| Pose::new(self.position, rotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_pose() -> Pose {
        Pose::new(
            Vector3::new(1.0, -2.0, 0.5),
            Quaternion::from_axis_angle(Vector3::new(0.2, 1.0, -0.3), 0.8),
        )
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let p = sample_pose();
        assert!((p * p.inverse()).approx_eq(&Pose::identity(), 1e-12));
        assert!((p.inverse() * p).approx_eq(&Pose::identity(), 1e-12));
    }

    #[test]
    fn test_composition_order() {
        let a = sample_pose();
        let b = Pose::new(Vector3::new(0.0, 0.0, 3.0), Quaternion::from_yaw(1.2));
        let pt = Vector3::new(0.4, 0.1, -0.7);
        let composed = (a * b).transform_point(pt);
        let sequential = a.transform_point(b.transform_point(pt));
        assert_abs_diff_eq!(composed.distance(sequential), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_interpolate_midpoint() {
        let a = Pose::from_position(Vector3::ZERO);
        let b = Pose::new(Vector3::new(2.0, 0.0, 0.0), Quaternion::from_yaw(1.0));
        let mid = a.interpolate(&b, 0.5);
        assert_abs_diff_eq!(mid.position.x, 1.0, epsilon = 1e-12);
        assert!(mid.rotation.angular_distance(Quaternion::from_yaw(0.5)) < 1e-9);
    }

    #[test]
    fn test_accumulator_weighted_mean() {
        let mut acc = PoseAccumulator::new();
        acc.add(&Pose::from_position(Vector3::new(0.0, 0.0, 0.0)), 1.0);
        acc.add(&Pose::from_position(Vector3::new(4.0, 0.0, 0.0)), 3.0);
        let mean = acc.mean().unwrap();
        assert_abs_diff_eq!(mean.position.x, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(acc.total_weight(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_accumulator_ignores_non_positive_weights() {
        let mut acc = PoseAccumulator::new();
        acc.add(&sample_pose(), 0.0);
        assert!(acc.mean().is_none());
    }
}
