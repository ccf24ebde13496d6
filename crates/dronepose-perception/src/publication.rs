//! Formatting of fused poses for publication.
//!
//! Each estimate becomes two records: a stamped `world → drone` transform
//! for frame broadcasting and a flat pose record for general distribution.
//! No fusion logic lives here.

use chrono::{DateTime, Utc};
use dronepose_types::{
    PoseMsg, PoseValidity, QuaternionMsg, SensorKind, TransformStampedMsg, Vector3Msg,
};

use crate::fusion::PoseEstimate;
use crate::transform::{Quaternion, Transform3D, Vec3};

pub const DEFAULT_PARENT_FRAME: &str = "world";
pub const DEFAULT_CHILD_FRAME: &str = "drone";

/// Parent/child frame names used for the broadcast transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePair {
    pub parent: String,
    pub child: String,
}

impl FramePair {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

impl Default for FramePair {
    fn default() -> Self {
        Self::new(DEFAULT_PARENT_FRAME, DEFAULT_CHILD_FRAME)
    }
}

/// Everything handed to the publication sinks for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PosePublication {
    pub pose: PoseMsg,
    pub transform: TransformStampedMsg,
    pub validity: PoseValidity,
    /// Sources considered stale when the pose was produced.  Filled in by
    /// the observer loop; empty straight out of [`format`](Self::format).
    pub stale_sources: Vec<SensorKind>,
}

impl PosePublication {
    pub fn format(estimate: &PoseEstimate, frames: &FramePair, stamp: DateTime<Utc>) -> Self {
        let position = estimate.pose.position;
        let rpy = estimate.pose.orientation;
        let rotation = Quaternion::from_rpy(rpy.roll, rpy.pitch, rpy.yaw);

        Self {
            pose: PoseMsg {
                linear: Vector3Msg::from(position),
                angular: Vector3Msg {
                    x: rpy.roll,
                    y: rpy.pitch,
                    z: rpy.yaw,
                },
            },
            transform: TransformStampedMsg {
                stamp,
                frame_id: frames.parent.clone(),
                child_frame_id: frames.child.clone(),
                translation: Vector3Msg::from(position),
                rotation: QuaternionMsg::from(rotation),
            },
            validity: estimate.validity,
            stale_sources: Vec::new(),
        }
    }

    pub fn with_stale_sources(mut self, stale_sources: Vec<SensorKind>) -> Self {
        self.stale_sources = stale_sources;
        self
    }

    /// The broadcast transform as a [`Transform3D`], for the frame tree.
    pub fn transform3d(&self) -> Transform3D {
        let t = self.transform.translation;
        Transform3D::new(
            Vec3::new(t.x, t.y, t.z),
            Quaternion::from(self.transform.rotation),
        )
    }
}
