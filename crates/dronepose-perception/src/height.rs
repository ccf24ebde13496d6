//! Height source selection.
//!
//! Two independent sources report height: the flight controller's
//! range/altitude estimate and the guidance unit's downward ultrasonic
//! sensor.  Which one feeds the fused pose is decided once from the
//! simulation flag (the simulator has no ultrasonic sensor) and never
//! changes.  There is no blending and no fallback to the other source.

use dronepose_types::{LaserScanMsg, PoseError, SensorKind};
use tracing::{debug, warn};

/// Which height source feeds the fused pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightSource {
    /// Height above take-off reported by the flight controller.
    RangeAltitude,
    /// First beam of the downward ultrasonic scan.
    Ultrasonic,
}

impl HeightSource {
    pub fn for_simulation(simulation: bool) -> Self {
        if simulation {
            HeightSource::RangeAltitude
        } else {
            HeightSource::Ultrasonic
        }
    }
}

#[derive(Debug)]
pub struct HeightSelector {
    source: HeightSource,
    range_height: Option<f64>,
    ultrasonic_height: Option<f64>,
}

impl HeightSelector {
    pub fn new(simulation: bool) -> Self {
        Self {
            source: HeightSource::for_simulation(simulation),
            range_height: None,
            ultrasonic_height: None,
        }
    }

    pub fn source(&self) -> HeightSource {
        self.source
    }

    /// Record a range/altitude height sample.
    pub fn update_range(&mut self, height: f64) -> Result<(), PoseError> {
        if !height.is_finite() {
            warn!(height, "discarding non-finite range height");
            return Err(PoseError::NonFiniteSample {
                source_kind: SensorKind::HeightAboveTakeoff,
            });
        }
        self.range_height = Some(height);
        Ok(())
    }

    /// Record an ultrasonic scan.  Only beam 0 is used, and only when its
    /// intensity is non-zero; anything else leaves the height unchanged.
    pub fn update_ultrasonic(&mut self, scan: &LaserScanMsg) -> Result<(), PoseError> {
        let (Some(&intensity), Some(&range)) = (scan.intensities.first(), scan.ranges.first()) else {
            debug!("ultrasonic scan without a first beam");
            return Ok(());
        };
        if intensity == 0.0 {
            return Ok(());
        }
        if !range.is_finite() {
            warn!(range, "discarding non-finite ultrasonic range");
            return Err(PoseError::NonFiniteSample {
                source_kind: SensorKind::Ultrasonic,
            });
        }
        self.ultrasonic_height = Some(f64::from(range));
        Ok(())
    }

    /// Height from the configured source, `None` until it has reported.
    pub fn selected(&self) -> Option<f64> {
        match self.source {
            HeightSource::RangeAltitude => self.range_height,
            HeightSource::Ultrasonic => self.ultrasonic_height,
        }
    }

    pub fn range_height(&self) -> Option<f64> {
        self.range_height
    }

    pub fn ultrasonic_height(&self) -> Option<f64> {
        self.ultrasonic_height
    }
}
