//! `dronepose-perception` – the pose estimator core.
//!
//! Turns raw, asynchronously arriving sensor samples into one authoritative
//! six-degree-of-freedom pose per control tick.
//!
//! # Modules
//!
//! - [`transform`] – quaternion ⇄ roll/pitch/yaw, heading rotation, angle
//!   wrapping and the [`TfEngine`][transform::TfEngine] frame tree.
//! - [`attitude`] – [`AttitudeEstimator`][attitude::AttitudeEstimator]:
//!   heading alignment and one-shot yaw-zero calibration.
//! - [`odometry`] – [`OdometryCalibrator`][odometry::OdometryCalibrator]:
//!   one-shot origin/heading calibration of the guidance odometry.
//! - [`height`] – [`HeightSelector`][height::HeightSelector]: picks the
//!   range or ultrasonic height source.
//! - [`fusion`] – [`EstimatorContext`][fusion::EstimatorContext] and
//!   [`PoseFusion`][fusion::PoseFusion]: the per-tick merge.
//! - [`publication`] – [`PosePublication`][publication::PosePublication]:
//!   pose record and stamped transform for the sinks.

pub mod attitude;
pub mod fusion;
pub mod height;
pub mod odometry;
pub mod publication;
pub mod transform;

pub use fusion::{EstimatorContext, FusedPose, PoseEstimate, PoseFusion, PositioningMode};
pub use publication::{FramePair, PosePublication};
