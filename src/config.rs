use crate::astro_math::coords::LocationCoordinates;
use serde::{Deserialize, Serialize};

/* Mount configuration, injected at construction. Defaults follow the
 * reference hardware: a 400-step motor through a 4:1 reduction into a
 * 180-tooth worm. */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub drive: DriveSettings,
    pub axis: AxisBehavior,
    pub location: LocationCoordinates,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            drive: DriveSettings::default(),
            axis: AxisBehavior::default(),
            location: LocationCoordinates {
                lat: 42.0,
                lon: -73.0,
            },
        }
    }
}

/* Drive train */
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct DriveSettings {
    /// Full steps per motor revolution.
    pub motor_steps: f64,
    /// Gear reduction ratio from motor to worm.
    pub gear_reduction: f64,
    /// Number of worm teeth.
    pub worm_teeth: f64,
    pub ra_invert: bool,
    pub dec_invert: bool,
}

impl DriveSettings {
    pub fn steps_per_deg(&self) -> f64 {
        self.motor_steps * self.gear_reduction * self.worm_teeth / 360.0
    }
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            motor_steps: 400.0,
            gear_reduction: 4.0,
            worm_teeth: 180.0,
            ra_invert: false,
            dec_invert: false,
        }
    }
}

/* Axis behavior, for goto fine tuning */
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct AxisBehavior {
    /// Slew speed in deg/s.
    pub default_slew_speed: f64,
    /// Track speed as a multiple of the sidereal rate.
    pub default_track_speed_sidereal: f64,
    /// Correction speed as a multiple of the sidereal rate.
    pub default_correction_speed_sidereal: f64,
    /// Guide speed as a multiple of the sidereal rate.
    pub default_guide_speed_sidereal: f64,
    /// Ramp acceleration in deg/s^2.
    pub acceleration: f64,
    /// Time per acceleration-ramp step.
    pub acceleration_step_time_ms: u64,
    /// Below this angle a slew skips the ramp and corrects directly.
    pub min_slew_angle: f64,
    /// Acceptable post-slew error in degrees.
    pub correction_tolerance: f64,
    /// Corrections shorter than this are not worth making.
    pub min_correction_time_ms: u64,
    /// Post-slew error beyond this indicates a hardware fault.
    pub max_correction_angle: f64,
    /// Upper clamp on a single guide pulse.
    pub max_guide_time_ms: u64,
}

impl Default for AxisBehavior {
    fn default() -> Self {
        Self {
            default_slew_speed: 2.0,
            default_track_speed_sidereal: 1.0,
            default_correction_speed_sidereal: 32.0,
            default_guide_speed_sidereal: 0.5,
            acceleration: 2.0,
            acceleration_step_time_ms: 5,
            min_slew_angle: 0.3,
            correction_tolerance: 0.05,
            min_correction_time_ms: 5,
            max_correction_angle: 5.0,
            max_guide_time_ms: 5000,
        }
    }
}
