//! Odometry calibrator for the guidance visual/inertial odometry source.
//!
//! The guidance unit reports positions in its own global frame.  The first
//! sample with a usable horizontal fix defines the local origin and heading;
//! every later sample is re-expressed relative to that origin and rotated
//! into the calibrated heading.
//!
//! Samples before calibration whose X or Y magnitude is below
//! [`ORIGIN_EPSILON`] are treated as the unit's all-zero start-up frames and
//! ignored.

use dronepose_types::{GuidanceMotionMsg, PoseError, SensorKind};
use tracing::{debug, info, warn};

use crate::transform::{Quaternion, Rpy, Vec3, quaternion_to_rpy, wrap_angle};

/// Minimum |x| and |y| (metres) of the sample that may calibrate the origin.
pub const ORIGIN_EPSILON: f64 = 0.001;

/// One odometry reading in the guidance unit's global frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometrySample {
    pub position: Vec3,
    pub attitude: Rpy,
}

impl OdometrySample {
    pub fn new(position: Vec3, attitude: Rpy) -> Self {
        Self { position, attitude }
    }

    /// Decode a guidance motion message.  The scalar part is `q0`, so the
    /// quaternion is assembled as `(x, y, z, w) = (q1, q2, q3, q0)`.
    pub fn from_guidance(msg: &GuidanceMotionMsg) -> Self {
        let q = Quaternion::new(msg.q0, msg.q1, msg.q2, msg.q3);
        Self {
            position: Vec3::new(
                msg.position_in_global_x,
                msg.position_in_global_y,
                msg.position_in_global_z,
            ),
            attitude: quaternion_to_rpy(q),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.attitude.is_finite()
    }
}

/// Pose of the vehicle in the calibrated local frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalOdometryPose {
    pub position: Vec3,
    /// Roll and pitch straight from the sample; yaw relative to the
    /// calibration heading, in `(−π, π]`.
    pub attitude: Rpy,
}

/// Lifecycle of the local frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OdometryCalibration {
    #[default]
    Uncalibrated,
    Calibrated { origin_offset: Vec3, heading_offset: f64 },
}

impl OdometryCalibration {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, OdometryCalibration::Calibrated { .. })
    }
}

/// Calibrates the guidance odometry frame once and converts later samples
/// into [`LocalOdometryPose`]s.
#[derive(Debug, Default)]
pub struct OdometryCalibrator {
    calibration: OdometryCalibration,
    local_pose: Option<LocalOdometryPose>,
}

impl OdometryCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample.
    ///
    /// Returns `Ok(None)` while uncalibrated (including for the sample that
    /// performs the calibration) and `Ok(Some(pose))` afterwards.
    ///
    /// # Errors
    ///
    /// [`PoseError::NonFiniteSample`] when the sample holds NaN or infinite
    /// values; the sample is dropped without touching the calibration.
    pub fn update(&mut self, sample: OdometrySample) -> Result<Option<LocalOdometryPose>, PoseError> {
        if !sample.is_finite() {
            warn!(?sample, "discarding non-finite odometry sample");
            return Err(PoseError::NonFiniteSample {
                source_kind: SensorKind::GuidanceMotion,
            });
        }

        match self.calibration {
            OdometryCalibration::Uncalibrated => {
                let p = sample.position;
                if p.x.abs() < ORIGIN_EPSILON || p.y.abs() < ORIGIN_EPSILON {
                    debug!(x = p.x, y = p.y, "odometry fix not usable yet");
                    return Ok(None);
                }
                self.calibration = OdometryCalibration::Calibrated {
                    origin_offset: p,
                    heading_offset: sample.attitude.yaw,
                };
                info!(
                    origin_x = p.x,
                    origin_y = p.y,
                    origin_z = p.z,
                    heading = sample.attitude.yaw,
                    "odometry frame calibrated"
                );
                Ok(None)
            }
            OdometryCalibration::Calibrated {
                origin_offset,
                heading_offset,
            } => {
                let pose = to_local(&sample, origin_offset, heading_offset);
                self.local_pose = Some(pose);
                Ok(Some(pose))
            }
        }
    }

    /// Latest local pose, `None` until the first post-calibration sample.
    pub fn local_pose(&self) -> Option<LocalOdometryPose> {
        self.local_pose
    }

    pub fn calibration(&self) -> OdometryCalibration {
        self.calibration
    }
}

fn to_local(sample: &OdometrySample, origin_offset: Vec3, heading_offset: f64) -> LocalOdometryPose {
    let global_delta = sample.position.sub(origin_offset);
    // Raw roll turns about Y and raw pitch about X, matching the guidance
    // unit's frame convention; the heading turns about Z last.
    let frame = Quaternion::from_euler_yxz(sample.attitude.roll, sample.attitude.pitch, heading_offset);
    let local = frame.conjugate().rotate(global_delta);

    LocalOdometryPose {
        // The guidance frame is left-handed in Y relative to the local frame.
        position: Vec3::new(local.x, -local.y, local.z),
        attitude: Rpy::new(
            sample.attitude.roll,
            sample.attitude.pitch,
            wrap_angle(heading_offset - sample.attitude.yaw),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    const TOL: f64 = 1e-9;

    fn sample(x: f64, y: f64, z: f64, yaw: f64) -> OdometrySample {
        OdometrySample::new(Vec3::new(x, y, z), Rpy::new(0.0, 0.0, yaw))
    }

    #[test]
    fn near_zero_samples_never_calibrate() {
        let mut cal = OdometryCalibrator::new();
        for i in 0..100 {
            let small = 0.0004 * (i % 3) as f64;
            assert_eq!(cal.update(sample(small, 4.0, 1.0, 0.0)).unwrap(), None);
            assert_eq!(cal.update(sample(4.0, -small, 1.0, 0.0)).unwrap(), None);
        }
        assert!(!cal.calibration().is_calibrated());
        assert!(cal.local_pose().is_none());
    }

    #[test]
    fn epsilon_gating_scenario() {
        let mut cal = OdometryCalibrator::new();

        // x below epsilon: ignored.
        assert_eq!(cal.update(sample(0.0005, 2.0, 1.0, 0.0)).unwrap(), None);
        assert!(!cal.calibration().is_calibrated());

        // First usable fix: calibrates, emits nothing.
        assert_eq!(cal.update(sample(5.0, 2.0, 1.0, 0.3)).unwrap(), None);
        assert_eq!(
            cal.calibration(),
            OdometryCalibration::Calibrated {
                origin_offset: Vec3::new(5.0, 2.0, 1.0),
                heading_offset: 0.3,
            }
        );

        // Repeating the origin sample lands on the local origin.
        let pose = cal.update(sample(5.0, 2.0, 1.0, 0.3)).unwrap().unwrap();
        assert!(pose.position.x.abs() < TOL);
        assert!(pose.position.y.abs() < TOL);
        assert!(pose.position.z.abs() < TOL);
        assert!(pose.attitude.yaw.abs() < TOL);
    }

    #[test]
    fn calibration_happens_once() {
        let mut cal = OdometryCalibrator::new();
        cal.update(sample(1.0, 1.0, 0.0, 0.1)).unwrap();
        let first = cal.calibration();
        cal.update(sample(9.0, -7.0, 3.0, 2.0)).unwrap();
        cal.update(sample(0.0, 0.0, 0.0, -1.0)).unwrap();
        assert_eq!(cal.calibration(), first);
    }

    #[test]
    fn offset_is_rotated_into_calibrated_heading() {
        let mut cal = OdometryCalibrator::new();
        cal.update(sample(1.0, 1.0, 0.0, FRAC_PI_2)).unwrap();

        // Moving +1 along global Y with a 90° calibration heading is +1 along
        // local X; Y stays zero after the handedness flip.
        let pose = cal.update(sample(1.0, 2.0, 0.5, FRAC_PI_2)).unwrap().unwrap();
        assert!((pose.position.x - 1.0).abs() < TOL, "x={}", pose.position.x);
        assert!(pose.position.y.abs() < TOL, "y={}", pose.position.y);
        assert!((pose.position.z - 0.5).abs() < TOL);
    }

    #[test]
    fn local_y_is_negated() {
        let mut cal = OdometryCalibrator::new();
        cal.update(sample(1.0, 1.0, 0.0, 0.0)).unwrap();
        let pose = cal.update(sample(1.0, 3.0, 0.0, 0.0)).unwrap().unwrap();
        assert!(pose.position.x.abs() < TOL);
        assert!((pose.position.y + 2.0).abs() < TOL);
    }

    #[test]
    fn relative_yaw_is_offset_minus_sample_and_wrapped() {
        let mut cal = OdometryCalibrator::new();
        cal.update(sample(1.0, 1.0, 0.0, 3.0)).unwrap();

        let pose = cal.update(sample(1.0, 1.0, 0.0, 2.5)).unwrap().unwrap();
        assert!((pose.attitude.yaw - 0.5).abs() < TOL);

        // 3.0 - (-3.0) = 6.0 wraps to 6.0 - 2π.
        let pose = cal.update(sample(1.0, 1.0, 0.0, -3.0)).unwrap().unwrap();
        assert!((pose.attitude.yaw - (6.0 - 2.0 * PI)).abs() < TOL);
        assert!(pose.attitude.yaw > -PI && pose.attitude.yaw <= PI);
    }

    #[test]
    fn roll_and_pitch_pass_through() {
        let mut cal = OdometryCalibrator::new();
        cal.update(sample(1.0, 1.0, 0.0, 0.0)).unwrap();
        let tilted = OdometrySample::new(Vec3::new(1.0, 1.0, 0.0), Rpy::new(0.05, -0.1, 0.0));
        let pose = cal.update(tilted).unwrap().unwrap();
        assert_eq!(pose.attitude.roll, 0.05);
        assert_eq!(pose.attitude.pitch, -0.1);
    }

    #[test]
    fn tilt_rotates_the_offset_in_guidance_axis_order() {
        const TILT_TOL: f64 = 1e-6;
        let mut cal = OdometryCalibrator::new();
        cal.update(sample(1.0, 1.0, 0.0, 0.0)).unwrap();

        // Roll alone turns about Y: +1 along X picks up a Z component.
        let rolled = OdometrySample::new(Vec3::new(2.0, 1.0, 0.0), Rpy::new(0.3, 0.0, 0.0));
        let pose = cal.update(rolled).unwrap().unwrap();
        assert!((pose.position.x - 0.3_f64.cos()).abs() < TILT_TOL, "x={}", pose.position.x);
        assert!(pose.position.y.abs() < TILT_TOL, "y={}", pose.position.y);
        assert!((pose.position.z - 0.3_f64.sin()).abs() < TILT_TOL, "z={}", pose.position.z);

        let mut cal = OdometryCalibrator::new();
        cal.update(sample(1.0, 1.0, 0.0, 0.5)).unwrap();
        let tilted = OdometrySample::new(Vec3::new(2.0, 3.0, 0.5), Rpy::new(0.3, -0.2, 0.5));
        let pose = cal.update(tilted).unwrap().unwrap();
        assert!((pose.position.x - 1.574_808_850).abs() < TILT_TOL, "x={}", pose.position.x);
        assert!((pose.position.y + 1.198_201_500).abs() < TILT_TOL, "y={}", pose.position.y);
        assert!((pose.position.z - 1.155_114_821).abs() < TILT_TOL, "z={}", pose.position.z);
    }

    #[test]
    fn non_finite_sample_is_rejected() {
        let mut cal = OdometryCalibrator::new();
        let err = cal.update(sample(f64::NAN, 2.0, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, PoseError::NonFiniteSample { .. }));
        assert!(!cal.calibration().is_calibrated());

        cal.update(sample(1.0, 1.0, 0.0, 0.0)).unwrap();
        let before = cal.local_pose();
        assert!(cal.update(sample(1.0, f64::INFINITY, 0.0, 0.0)).is_err());
        assert_eq!(cal.local_pose(), before);
    }

    #[test]
    fn guidance_message_uses_scalar_last_mapping() {
        let q = Quaternion::from_rpy(0.0, 0.0, 0.8);
        let msg = GuidanceMotionMsg {
            q0: q.w,
            q1: q.x,
            q2: q.y,
            q3: q.z,
            position_in_global_x: 3.0,
            position_in_global_y: -1.0,
            position_in_global_z: 0.4,
        };
        let s = OdometrySample::from_guidance(&msg);
        assert_eq!(s.position, Vec3::new(3.0, -1.0, 0.4));
        assert!((s.attitude.yaw - 0.8).abs() < TOL);
    }
}
