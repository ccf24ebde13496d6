//! Attitude estimator with one-shot yaw-zero calibration.
//!
//! Every orientation sample is decomposed into roll/pitch/yaw, the yaw is
//! re-mapped from the flight controller's heading zero to the vehicle's
//! forward axis, and then expressed relative to the heading seen on the very
//! first sample.  That first heading becomes the yaw origin for the rest of
//! the process lifetime.
//!
//! # Example
//!
//! ```rust
//! use dronepose_perception::attitude::AttitudeEstimator;
//! use dronepose_perception::transform::Quaternion;
//!
//! let mut estimator = AttitudeEstimator::new();
//! let rpy = estimator.update(Quaternion::from_rpy(0.0, 0.0, -2.0)).unwrap();
//! assert!(rpy.yaw.abs() < 1e-9);
//! assert!(estimator.calibration().is_calibrated());
//! ```

use std::f64::consts::{FRAC_PI_2, PI};

use dronepose_types::{PoseError, SensorKind};
use tracing::{info, warn};

use crate::transform::{Quaternion, Rpy, quaternion_to_rpy, wrap_angle};

/// A quaternion together with the roll/pitch/yaw derived from it.
///
/// Only constructible from a quaternion, so the angles can never drift from
/// the rotation they describe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationSample {
    quaternion: Quaternion,
    rpy: Rpy,
}

impl OrientationSample {
    pub fn from_quaternion(quaternion: Quaternion) -> Self {
        Self {
            quaternion,
            rpy: quaternion_to_rpy(quaternion),
        }
    }

    pub fn quaternion(&self) -> Quaternion {
        self.quaternion
    }

    pub fn rpy(&self) -> Rpy {
        self.rpy
    }
}

/// Lifecycle of the yaw origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum YawCalibration {
    #[default]
    Uncalibrated,
    /// Heading (after frame alignment) that maps to yaw = 0.
    Calibrated { offset: f64 },
}

impl YawCalibration {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, YawCalibration::Calibrated { .. })
    }

    pub fn offset(&self) -> Option<f64> {
        match self {
            YawCalibration::Calibrated { offset } => Some(*offset),
            YawCalibration::Uncalibrated => None,
        }
    }
}

/// Re-map the flight controller's yaw so that zero points along the
/// vehicle's forward axis: `(−π, −π/2)` shifts by `+3π/2`, everything else
/// by `−π/2`.
pub fn align_heading(yaw: f64) -> f64 {
    if yaw > -PI && yaw < -FRAC_PI_2 {
        yaw + FRAC_PI_2 + PI
    } else {
        yaw - FRAC_PI_2
    }
}

/// Turns raw attitude quaternions into a yaw-calibrated [`Rpy`] estimate.
#[derive(Debug, Default)]
pub struct AttitudeEstimator {
    calibration: YawCalibration,
    last_sample: Option<OrientationSample>,
    estimate: Option<Rpy>,
}

impl AttitudeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new attitude quaternion and return the calibrated estimate.
    ///
    /// # Errors
    ///
    /// Returns [`PoseError::NonFiniteSample`] (and leaves all state
    /// untouched) when any component of `q` is NaN or infinite.
    pub fn update(&mut self, q: Quaternion) -> Result<Rpy, PoseError> {
        if !q.is_finite() {
            warn!(?q, "discarding non-finite attitude quaternion");
            return Err(PoseError::NonFiniteSample {
                source_kind: SensorKind::Attitude,
            });
        }

        let sample = OrientationSample::from_quaternion(q);
        let raw = sample.rpy();
        let aligned = align_heading(raw.yaw);

        let offset = match self.calibration {
            YawCalibration::Calibrated { offset } => offset,
            YawCalibration::Uncalibrated => {
                self.calibration = YawCalibration::Calibrated { offset: aligned };
                info!(yaw_offset = aligned, "yaw offset initialised");
                aligned
            }
        };

        let estimate = Rpy::new(raw.roll, raw.pitch, wrap_angle(aligned - offset));
        self.last_sample = Some(sample);
        self.estimate = Some(estimate);
        Ok(estimate)
    }

    /// Latest calibrated attitude, `None` before the first sample.
    pub fn estimate(&self) -> Option<Rpy> {
        self.estimate
    }

    pub fn last_sample(&self) -> Option<&OrientationSample> {
        self.last_sample.as_ref()
    }

    pub fn calibration(&self) -> YawCalibration {
        self.calibration
    }
}
