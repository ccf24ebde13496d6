//! `dronepose-types` – shared message shapes, events and errors.
//!
//! The sensor payloads mirror the ROS messages the observer consumes
//! (`geometry_msgs`, `std_msgs`, `sensor_msgs/LaserScan`, the guidance
//! `Motion` message) so that the ingestion bridge can deserialise them
//! directly, while the output payloads mirror the pose record and stamped
//! transform handed to downstream consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Sensor payloads
// ────────────────────────────────────────────────────────────────────────────

/// A quaternion as carried on the wire (`geometry_msgs/Quaternion`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuaternionMsg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// A 3-D point in a sensor-native frame (`geometry_msgs/Point`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointMsg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// The subset of `sensor_msgs/LaserScan` used by the ultrasonic height
/// source.  Only element 0 of each array is ever read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaserScanMsg {
    #[serde(default)]
    pub ranges: Vec<f32>,
    #[serde(default)]
    pub intensities: Vec<f32>,
}

/// Visual/inertial odometry output of the guidance unit.
///
/// The quaternion is scalar-first in naming but `q0` is the scalar part, so
/// the `(x, y, z, w)` quaternion is `(q1, q2, q3, q0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuidanceMotionMsg {
    pub q0: f64,
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
    pub position_in_global_x: f64,
    pub position_in_global_y: f64,
    pub position_in_global_z: f64,
}

/// One sample from any of the observer's input sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "data", rename_all = "snake_case")]
pub enum SensorSample {
    /// Vehicle attitude quaternion.
    Attitude(QuaternionMsg),
    /// Coarse GPS health indicator.
    GpsHealth(u8),
    /// Range/altitude height above the take-off point (metres).
    HeightAboveTakeoff(f32),
    /// Downward ultrasonic scan.
    Ultrasonic(LaserScanMsg),
    /// GPS-derived local position in the flight controller's frame.
    LocalPosition(PointMsg),
    /// Guidance visual/inertial odometry.
    GuidanceMotion(GuidanceMotionMsg),
}

impl SensorSample {
    /// The [`SensorKind`] that produced this sample.
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorSample::Attitude(_) => SensorKind::Attitude,
            SensorSample::GpsHealth(_) => SensorKind::GpsHealth,
            SensorSample::HeightAboveTakeoff(_) => SensorKind::HeightAboveTakeoff,
            SensorSample::Ultrasonic(_) => SensorKind::Ultrasonic,
            SensorSample::LocalPosition(_) => SensorKind::LocalPosition,
            SensorSample::GuidanceMotion(_) => SensorKind::GuidanceMotion,
        }
    }
}

/// Identifies an input source independently of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Attitude,
    GpsHealth,
    HeightAboveTakeoff,
    Ultrasonic,
    LocalPosition,
    GuidanceMotion,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Attitude => "attitude",
            SensorKind::GpsHealth => "gps_health",
            SensorKind::HeightAboveTakeoff => "height_above_takeoff",
            SensorKind::Ultrasonic => "ultrasonic",
            SensorKind::LocalPosition => "local_position",
            SensorKind::GuidanceMotion => "guidance_motion",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output payloads
// ────────────────────────────────────────────────────────────────────────────

/// A plain 3-vector (`geometry_msgs/Vector3`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3Msg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Flat pose record laid out like `geometry_msgs/Twist`: `linear` holds the
/// position and `angular` holds roll, pitch and yaw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseMsg {
    pub linear: Vector3Msg,
    pub angular: Vector3Msg,
}

/// A timestamped rigid transform from `frame_id` to `child_frame_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStampedMsg {
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
    pub child_frame_id: String,
    pub translation: Vector3Msg,
    pub rotation: QuaternionMsg,
}

/// Observable validity of one fused pose.
///
/// Fusion holds the last known value whenever a source is missing or gated
/// out, so these flags tell consumers which parts of the pose are current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseValidity {
    /// Horizontal position was refreshed from the active source this tick.
    pub position: bool,
    /// Orientation comes from a source that has produced at least one sample.
    pub orientation: bool,
    /// The selected height source has produced at least one sample.
    pub height: bool,
    /// Most recent GPS health value (0 until the first health sample).
    pub gps_health: u8,
    pub yaw_calibrated: bool,
    pub odometry_calibrated: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper routed over the observer's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"dronepose-middleware::ros/dji_sdk/attitude"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped with the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Raw input from one of the sensor sources.
    Sensor(SensorSample),
    /// A fused pose, published once per valid tick.
    Pose {
        pose: PoseMsg,
        validity: PoseValidity,
        /// Sources whose last sample is older than the freshness timeout.
        stale_sources: Vec<SensorKind>,
    },
    /// The broadcast `world → drone` transform.
    Transform(TransformStampedMsg),
    /// Non-fatal condition worth surfacing to operators.
    Diagnostic { component: String, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by every dronepose crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoseError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter {name}: {details}")]
    InvalidParameter { name: String, details: String },

    #[error("Parsing Error: {0}")]
    Parsing(String),

    #[error("Non-finite {source_kind} sample discarded")]
    NonFiniteSample { source_kind: SensorKind },

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Sink Error: {0}")]
    Sink(String),

    #[error("Config Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_kind_matches_variant() {
        let sample = SensorSample::GpsHealth(4);
        assert_eq!(sample.kind(), SensorKind::GpsHealth);

        let sample = SensorSample::Ultrasonic(LaserScanMsg::default());
        assert_eq!(sample.kind(), SensorKind::Ultrasonic);
    }

    #[test]
    fn sensor_sample_uses_tagged_json() {
        let sample = SensorSample::HeightAboveTakeoff(2.5);
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["source"], "height_above_takeoff");
        assert_eq!(json["data"], 2.5);

        let back: SensorSample = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn laser_scan_arrays_default_to_empty() {
        let scan: LaserScanMsg = serde_json::from_str("{}").unwrap();
        assert!(scan.ranges.is_empty());
        assert!(scan.intensities.is_empty());
    }

    #[test]
    fn event_new_assigns_unique_ids() {
        let a = Event::new("test", EventPayload::Sensor(SensorSample::GpsHealth(1)));
        let b = Event::new("test", EventPayload::Sensor(SensorSample::GpsHealth(1)));
        assert_ne!(a.id, b.id);
        assert_eq!(a.source, "test");
    }

    #[test]
    fn pose_event_roundtrip_keeps_validity() {
        let event = Event::new(
            "dronepose-runtime::observer",
            EventPayload::Pose {
                pose: PoseMsg::default(),
                validity: PoseValidity {
                    position: true,
                    gps_health: 5,
                    ..PoseValidity::default()
                },
                stale_sources: vec![SensorKind::Ultrasonic],
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        match back.payload {
            EventPayload::Pose { validity, stale_sources, .. } => {
                assert!(validity.position);
                assert_eq!(validity.gps_health, 5);
                assert_eq!(stale_sources, vec![SensorKind::Ultrasonic]);
            }
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn pose_error_display() {
        let err = PoseError::MissingParameter("loop_hz".to_string());
        assert!(err.to_string().contains("loop_hz"));

        let err = PoseError::NonFiniteSample {
            source_kind: SensorKind::GuidanceMotion,
        };
        assert_eq!(err.to_string(), "Non-finite guidance_motion sample discarded");
    }
}
