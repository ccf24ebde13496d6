//! Frame conversion math and the transform tree.
//!
//! Pure helpers that move orientations and vectors between the sensors'
//! native frames and the observer's local, world-aligned frame:
//!
//! - [`quaternion_to_rpy`] / [`Quaternion::from_rpy`] – fixed-axis
//!   roll/pitch/yaw ⇄ quaternion.
//! - [`rotate_vector`] – express a vector in a frame rotated by `yaw` about
//!   the vertical axis.
//! - [`wrap_angle`] – fold an angle into `(−π, π]`.
//!
//! [`TfEngine`] keeps a graph of named frames so the broadcast
//! `world → drone` transform can be looked up in either direction.
//!
//! # Example
//!
//! ```rust
//! use dronepose_perception::transform::{Quaternion, quaternion_to_rpy};
//!
//! let q = Quaternion::from_rpy(0.1, -0.2, 1.5);
//! let rpy = quaternion_to_rpy(q);
//! assert!((rpy.roll - 0.1).abs() < 1e-9);
//! assert!((rpy.pitch + 0.2).abs() < 1e-9);
//! assert!((rpy.yaw - 1.5).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::f64::consts::{PI, TAU};

use dronepose_types::{PointMsg, QuaternionMsg, Vector3Msg};

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector (metres unless stated otherwise).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<PointMsg> for Vec3 {
    fn from(p: PointMsg) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

impl From<Vec3> for Vector3Msg {
    fn from(v: Vec3) -> Self {
        Vector3Msg { x: v.x, y: v.y, z: v.z }
    }
}

/// Roll, pitch and yaw in radians (rotations about X, Y, Z of a fixed frame,
/// applied in that order).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rpy {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Rpy {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }

    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  Rotation helpers assume |q| = 1;
    /// [`quaternion_to_rpy`] normalises its input.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Build the rotation `Rz(yaw) · Ry(pitch) · Rx(roll)`.
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Build the rotation `Ry(about_y) · Rx(about_x) · Rz(about_z)`.
    ///
    /// This is the ordering of tf's `Quaternion::setEuler(yaw, pitch, roll)`,
    /// which turns its first angle about Y and its second about X.
    pub fn from_euler_yxz(about_y: f64, about_x: f64, about_z: f64) -> Self {
        let (sy, cy) = (about_y * 0.5).sin_cos();
        let (sx, cx) = (about_x * 0.5).sin_cos();
        let (sz, cz) = (about_z * 0.5).sin_cos();
        Self::new(
            cz * cx * cy + sz * sx * sy,
            cz * sx * cy + sz * cx * sy,
            cz * cx * sy - sz * sx * cy,
            sz * cx * cy - cz * sx * sy,
        )
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

impl From<QuaternionMsg> for Quaternion {
    fn from(q: QuaternionMsg) -> Self {
        Self::new(q.w, q.x, q.y, q.z)
    }
}

impl From<Quaternion> for QuaternionMsg {
    fn from(q: Quaternion) -> Self {
        QuaternionMsg {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Frame conversion
// ────────────────────────────────────────────────────────────────────────────

/// Decompose `q` into fixed-axis roll, pitch and yaw.
///
/// Total for finite input: the pitch term is clamped into `[-1, 1]` before
/// `asin`, and a zero quaternion yields zero angles.  Near pitch = ±π/2 roll
/// and yaw are not separable and the split between them is arbitrary.
pub fn quaternion_to_rpy(q: Quaternion) -> Rpy {
    let n = q.norm();
    let q = if n > f64::EPSILON {
        Quaternion::new(q.w / n, q.x / n, q.y / n, q.z / n)
    } else {
        q
    };

    let roll = (2.0 * (q.w * q.x + q.y * q.z)).atan2(1.0 - 2.0 * (q.x * q.x + q.y * q.y));
    let pitch = (2.0 * (q.w * q.y - q.z * q.x)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (q.w * q.z + q.x * q.y)).atan2(1.0 - 2.0 * (q.y * q.y + q.z * q.z));
    Rpy::new(roll, pitch, yaw)
}

/// Rotate `v` about the vertical axis by `-yaw`, i.e. express a vector given
/// in the outer frame in a frame whose heading is `yaw`.
pub fn rotate_vector(v: Vec3, yaw: f64) -> Vec3 {
    let (s, c) = yaw.sin_cos();
    Vec3::new(c * v.x + s * v.y, -s * v.x + c * v.y, v.z)
}

/// Fold `angle` into `(−π, π]`.  Values already in range are returned
/// unchanged.
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: translation followed by rotation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Compose two transforms: if `self` = T_A_B and `other` = T_B_C, the
    /// result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// T_B_A from T_A_B.
    pub fn inverse(self) -> Self {
        let inv = self.rotation.conjugate();
        Self::new(inv.rotate(self.translation).scale(-1.0), inv)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named reference frames and the [`Transform3D`]s that relate
/// them.
///
/// Setting `"A" → "B"` also records the inverse edge, so
/// [`TfEngine::lookup`] can walk the tree in either direction.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `edges[from][to] = Transform3D`
    edges: HashMap<String, HashMap<String, Transform3D>>,
}

impl TfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the transform from `parent_frame` to `child_frame`.
    pub fn set_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
    ) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
        self.edges
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string(), transform.inverse());
    }

    /// Compute the composed transform from `source_frame` to `target_frame`.
    ///
    /// Returns `None` if no path exists between the two frames.
    pub fn lookup(&self, source_frame: &str, target_frame: &str) -> Option<Transform3D> {
        if source_frame == target_frame {
            return Some(Transform3D::identity());
        }

        // BFS; each queue item carries the transform accumulated so far.
        let mut queue: VecDeque<(&str, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();

        queue.push_back((source_frame, Transform3D::identity()));
        visited.insert(source_frame);

        while let Some((current, accumulated)) = queue.pop_front() {
            let Some(neighbours) = self.edges.get(current) else {
                continue;
            };
            for (next, edge_tf) in neighbours {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                let composed = accumulated.compose(*edge_tf);
                if next == target_frame {
                    return Some(composed);
                }
                queue.push_back((next.as_str(), composed));
            }
        }

        None
    }
}
