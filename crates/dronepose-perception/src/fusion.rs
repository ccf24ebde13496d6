//! Pose Fusion Engine.
//!
//! [`EstimatorContext`] owns every per-source state (attitude, odometry
//! calibration, heights, raw GPS position, GPS health) and is the only thing
//! ingestion writes to.  [`PoseFusion::tick`] reads the context through a
//! shared borrow once per control period and produces the fused pose.
//!
//! Horizontal position and orientation come from the source picked by the
//! [`PositioningMode`]; height always comes from the [`HeightSelector`].
//!
//! | Mode | x / y | roll / pitch / yaw |
//! |---|---|---|
//! | `Gps` | raw position, only while health > 3 | attitude estimator |
//! | `Guidance` | local odometry | local odometry (pitch negated) |
//! | reserved | held | held |
//!
//! # Example
//!
//! ```rust
//! use dronepose_perception::fusion::{EstimatorContext, PoseFusion, PositioningMode};
//! use dronepose_types::{PointMsg, SensorSample};
//!
//! let mut ctx = EstimatorContext::new(true);
//! ctx.ingest(&SensorSample::GpsHealth(5)).unwrap();
//! ctx.ingest(&SensorSample::LocalPosition(PointMsg { x: 1.0, y: 2.0, z: 0.0 })).unwrap();
//! ctx.ingest(&SensorSample::HeightAboveTakeoff(1.5)).unwrap();
//!
//! let mut fusion = PoseFusion::new(PositioningMode::Gps);
//! let estimate = fusion.tick(&ctx).expect("GPS is an active mode");
//! assert!((estimate.pose.position.x - 2.0).abs() < 1e-9);
//! assert!((estimate.pose.position.y + 1.0).abs() < 1e-9);
//! assert_eq!(estimate.pose.position.z, 1.5);
//! ```

use std::f64::consts::FRAC_PI_2;

use dronepose_types::{PointMsg, PoseError, PoseValidity, SensorKind, SensorSample};
use tracing::{info, trace, warn};

use crate::attitude::AttitudeEstimator;
use crate::height::HeightSelector;
use crate::odometry::{LocalOdometryPose, OdometryCalibrator, OdometrySample};
use crate::transform::{Quaternion, Rpy, Vec3, rotate_vector};

/// GPS position is fused only while the reported health is strictly above
/// this value.
pub const GPS_HEALTH_THRESHOLD: u8 = 3;

/// Heading of the flight controller's local-position frame relative to the
/// observer frame: `x' = y`, `y' = −x`.
pub const GPS_MOUNTING_YAW: f64 = FRAC_PI_2;

// ────────────────────────────────────────────────────────────────────────────
// Positioning mode
// ────────────────────────────────────────────────────────────────────────────

/// Which source supplies horizontal position.  Fixed at start-up.
///
/// Discriminants match the integer parameter used in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PositioningMode {
    None = 0,
    Gps = 1,
    Guidance = 2,
    WallPosition = 3,
    WallWithGpsY = 4,
    VisualOdometry = 5,
    LastValid = 6,
}

impl PositioningMode {
    /// `true` for modes strictly between [`None`](Self::None) and
    /// [`LastValid`](Self::LastValid); only those produce output.
    pub fn is_active(self) -> bool {
        self > PositioningMode::None && self < PositioningMode::LastValid
    }

    pub fn as_raw(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for PositioningMode {
    type Error = PoseError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => PositioningMode::None,
            1 => PositioningMode::Gps,
            2 => PositioningMode::Guidance,
            3 => PositioningMode::WallPosition,
            4 => PositioningMode::WallWithGpsY,
            5 => PositioningMode::VisualOdometry,
            6 => PositioningMode::LastValid,
            other => {
                return Err(PoseError::InvalidParameter {
                    name: "positioning".to_string(),
                    details: format!("{other} is not a positioning mode"),
                });
            }
        })
    }
}

impl std::fmt::Display for PositioningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PositioningMode::None => "NONE",
            PositioningMode::Gps => "GPS",
            PositioningMode::Guidance => "GUIDANCE",
            PositioningMode::WallPosition => "WALL_POSITION",
            PositioningMode::WallWithGpsY => "WALL_WITH_GPS_Y",
            PositioningMode::VisualOdometry => "VISUAL_ODOMETRY",
            PositioningMode::LastValid => "LAST_VALID",
        };
        f.write_str(name)
    }
}

/// The data one fusion strategy needs, captured from the context for a
/// single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionSource {
    Gps {
        raw_position: Option<Vec3>,
        health: u8,
        attitude: Option<Rpy>,
    },
    Guidance {
        local_pose: Option<LocalOdometryPose>,
    },
    /// A valid mode with no fusion strategy yet; the pose is held.
    Reserved(PositioningMode),
    /// `None`, `LastValid`: nothing is published.
    Inactive,
}

// ────────────────────────────────────────────────────────────────────────────
// Estimator context
// ────────────────────────────────────────────────────────────────────────────

/// All per-source state, written only by the ingestion path.
#[derive(Debug)]
pub struct EstimatorContext {
    attitude: AttitudeEstimator,
    odometry: OdometryCalibrator,
    height: HeightSelector,
    raw_position: Option<Vec3>,
    gps_health: u8,
}

impl EstimatorContext {
    /// `simulation` selects the height source (see [`HeightSelector`]).
    pub fn new(simulation: bool) -> Self {
        Self {
            attitude: AttitudeEstimator::new(),
            odometry: OdometryCalibrator::new(),
            height: HeightSelector::new(simulation),
            raw_position: None,
            gps_health: 0,
        }
    }

    /// Route one sample to the state it updates.
    pub fn ingest(&mut self, sample: &SensorSample) -> Result<(), PoseError> {
        match sample {
            SensorSample::Attitude(q) => self.update_attitude(Quaternion::from(*q)).map(|_| ()),
            SensorSample::GpsHealth(health) => {
                self.update_gps_health(*health);
                Ok(())
            }
            SensorSample::HeightAboveTakeoff(h) => self.height.update_range(f64::from(*h)),
            SensorSample::Ultrasonic(scan) => self.height.update_ultrasonic(scan),
            SensorSample::LocalPosition(p) => self.update_local_position(*p),
            SensorSample::GuidanceMotion(msg) => self
                .update_odometry(OdometrySample::from_guidance(msg))
                .map(|_| ()),
        }
    }

    pub fn update_attitude(&mut self, q: Quaternion) -> Result<Rpy, PoseError> {
        self.attitude.update(q)
    }

    pub fn update_gps_health(&mut self, health: u8) {
        self.gps_health = health;
    }

    /// Store a GPS local position, rotated into the observer frame.
    pub fn update_local_position(&mut self, point: PointMsg) -> Result<(), PoseError> {
        let p = Vec3::from(point);
        if !p.is_finite() {
            warn!(?point, "discarding non-finite local position");
            return Err(PoseError::NonFiniteSample {
                source_kind: SensorKind::LocalPosition,
            });
        }
        self.raw_position = Some(rotate_vector(p, GPS_MOUNTING_YAW));
        Ok(())
    }

    pub fn update_odometry(
        &mut self,
        sample: OdometrySample,
    ) -> Result<Option<LocalOdometryPose>, PoseError> {
        self.odometry.update(sample)
    }

    pub fn attitude(&self) -> &AttitudeEstimator {
        &self.attitude
    }

    pub fn odometry(&self) -> &OdometryCalibrator {
        &self.odometry
    }

    pub fn height(&self) -> &HeightSelector {
        &self.height
    }

    pub fn raw_position(&self) -> Option<Vec3> {
        self.raw_position
    }

    pub fn gps_health(&self) -> u8 {
        self.gps_health
    }

    /// Capture what `mode` needs from the current state.
    pub fn position_source(&self, mode: PositioningMode) -> PositionSource {
        match mode {
            PositioningMode::Gps => PositionSource::Gps {
                raw_position: self.raw_position,
                health: self.gps_health,
                attitude: self.attitude.estimate(),
            },
            PositioningMode::Guidance => PositionSource::Guidance {
                local_pose: self.odometry.local_pose(),
            },
            PositioningMode::WallPosition
            | PositioningMode::WallWithGpsY
            | PositioningMode::VisualOdometry => PositionSource::Reserved(mode),
            PositioningMode::None | PositioningMode::LastValid => PositionSource::Inactive,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fusion
// ────────────────────────────────────────────────────────────────────────────

/// The single authoritative pose.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusedPose {
    pub position: Vec3,
    pub orientation: Rpy,
}

/// A fused pose together with what was current on this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    pub pose: FusedPose,
    pub validity: PoseValidity,
}

/// Merges the [`EstimatorContext`] into a [`FusedPose`] once per tick.
///
/// Holds the last pose so that gated or missing sources keep their previous
/// values instead of snapping to zero.
#[derive(Debug)]
pub struct PoseFusion {
    mode: PositioningMode,
    pose: FusedPose,
    orientation_valid: bool,
}

impl PoseFusion {
    pub fn new(mode: PositioningMode) -> Self {
        match mode {
            PositioningMode::Gps => info!("using GPS for positioning"),
            PositioningMode::Guidance => info!("using GUIDANCE for positioning"),
            m if m.is_active() => warn!(mode = %m, "positioning mode has no fusion strategy; pose will be held"),
            m => warn!(mode = %m, "positioning mode is not active; no pose will be published"),
        }
        Self {
            mode,
            pose: FusedPose::default(),
            orientation_valid: false,
        }
    }

    pub fn mode(&self) -> PositioningMode {
        self.mode
    }

    /// Last pose produced by [`tick`](Self::tick).
    pub fn pose(&self) -> FusedPose {
        self.pose
    }

    /// Run one fusion step.  Returns `None` when the mode is inactive.
    pub fn tick(&mut self, ctx: &EstimatorContext) -> Option<PoseEstimate> {
        let mut position_fresh = false;

        match ctx.position_source(self.mode) {
            PositionSource::Inactive => {
                trace!(mode = %self.mode, "inactive positioning mode, skipping tick");
                return None;
            }
            PositionSource::Gps {
                raw_position,
                health,
                attitude,
            } => {
                if health > GPS_HEALTH_THRESHOLD
                    && let Some(p) = raw_position
                {
                    self.pose.position.x = p.x;
                    self.pose.position.y = p.y;
                    position_fresh = true;
                }
                if let Some(rpy) = attitude {
                    self.pose.orientation = rpy;
                    self.orientation_valid = true;
                }
            }
            PositionSource::Guidance { local_pose } => {
                if let Some(local) = local_pose {
                    self.pose.position.x = local.position.x;
                    self.pose.position.y = local.position.y;
                    self.pose.orientation = Rpy::new(
                        local.attitude.roll,
                        -local.attitude.pitch,
                        local.attitude.yaw,
                    );
                    position_fresh = true;
                    self.orientation_valid = true;
                }
            }
            PositionSource::Reserved(_) => {}
        }

        let height = ctx.height().selected();
        if let Some(z) = height {
            self.pose.position.z = z;
        }

        let estimate = PoseEstimate {
            pose: self.pose,
            validity: PoseValidity {
                position: position_fresh,
                orientation: self.orientation_valid,
                height: height.is_some(),
                gps_health: ctx.gps_health(),
                yaw_calibrated: ctx.attitude().calibration().is_calibrated(),
                odometry_calibrated: ctx.odometry().calibration().is_calibrated(),
            },
        };
        trace!(pose = ?estimate.pose, validity = ?estimate.validity, "fused pose");
        Some(estimate)
    }
}
