//! Two-axis mount coordinator.
//!
//! [`EquatorialMount`] owns an RA and a declination [`Axis`] and turns sky
//! coordinates into axis motion through the calibration model. Motion
//! commands serialize on an internal lock; `emergency_stop` bypasses it.

mod calibration;
mod nudge;

pub use calibration::{AlignmentStar, MAX_ALIGNMENT_STARS};
pub use nudge::NudgeDirection;

use crate::astro_math::align::{predict_mount, EqCalibration};
use crate::astro_math::coords::{
    equatorial_to_local_equatorial, local_equatorial_to_equatorial, local_equatorial_to_mount,
    mount_to_local_equatorial, EquatorialCoordinates, MountCoordinates, PierSide,
};
use crate::astro_math::transform::{
    apply_cone_error, deapply_cone_error, MisalignmentTransformation,
};
use crate::astro_math::{wrap_deg, Degrees};
use crate::axis::{
    Axis, AxisConfig, AxisState, FinishState, FixedMode, ModeController, RotationDirection,
};
use crate::clock::UTCClock;
use crate::config::MountConfig;
use crate::errors::{ControlError, Result};
use crate::motor::{SimulatedStepper, StepperMotor};
use calibration::CalibrationState;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MountStatus {
    Stopped,
    Slewing,
    Tracking,
    Nudging,
    NudgingTracking,
}

impl MountStatus {
    pub fn is_tracking(self) -> bool {
        matches!(self, MountStatus::Tracking | MountStatus::NudgingTracking)
    }

    pub fn is_nudging(self) -> bool {
        matches!(self, MountStatus::Nudging | MountStatus::NudgingTracking)
    }
}

/// Sky direction of a guide pulse, independent of pier side.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GuideDirection {
    North,
    South,
    East,
    West,
}

pub(crate) struct Exec {
    pub status: MountStatus,
    pub nudge: NudgeDirection,
    /// RA slew speed to restore once a composed nudge ends.
    pub saved_slew_speed: Option<f64>,
}

pub struct EquatorialMount {
    config: MountConfig,
    clock: Arc<dyn UTCClock>,
    pub(crate) ra: Axis,
    pub(crate) dec: Axis,
    pub(crate) exec: TokioMutex<Exec>,
    position: StdMutex<MountCoordinates>,
    pub(crate) calib: StdMutex<CalibrationState>,
}

fn direction_of(diff: Degrees) -> RotationDirection {
    if diff >= 0. {
        RotationDirection::Positive
    } else {
        RotationDirection::Negative
    }
}

impl EquatorialMount {
    pub fn new(
        config: MountConfig,
        clock: Arc<dyn UTCClock>,
        ra_stepper: Arc<dyn StepperMotor>,
        dec_stepper: Arc<dyn StepperMotor>,
        ra_mode: Arc<dyn ModeController>,
        dec_mode: Arc<dyn ModeController>,
    ) -> Self {
        let steps_per_deg = config.drive.steps_per_deg();
        let ra = Axis::new(
            AxisConfig {
                name: "ra",
                steps_per_deg,
                invert: config.drive.ra_invert,
                behavior: config.axis,
            },
            ra_stepper,
            ra_mode,
        );
        let dec = Axis::new(
            AxisConfig {
                name: "dec",
                steps_per_deg,
                invert: config.drive.dec_invert,
                behavior: config.axis,
            },
            dec_stepper,
            dec_mode,
        );
        let calibration = EqCalibration::identity(config.location.lat);
        EquatorialMount {
            clock,
            ra,
            dec,
            exec: TokioMutex::new(Exec {
                status: MountStatus::Stopped,
                nudge: NudgeDirection::NONE,
                saved_slew_speed: None,
            }),
            position: StdMutex::new(MountCoordinates {
                ra_delta: 0.,
                dec_delta: 0.,
                side: PierSide::East,
            }),
            calib: StdMutex::new(CalibrationState {
                calibration,
                stars: Vec::new(),
            }),
            config,
        }
    }

    /// A mount driving two [`SimulatedStepper`]s, for tests and dry runs.
    pub fn simulated(config: MountConfig, clock: Arc<dyn UTCClock>) -> Self {
        Self::new(
            config,
            clock,
            Arc::new(SimulatedStepper::new()),
            Arc::new(SimulatedStepper::new()),
            Arc::new(FixedMode),
            Arc::new(FixedMode),
        )
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn UTCClock> {
        &self.clock
    }

    pub fn ra_axis(&self) -> &Axis {
        &self.ra
    }

    pub fn dec_axis(&self) -> &Axis {
        &self.dec
    }

    pub async fn get_status(&self) -> MountStatus {
        let exec = self.exec.lock().await;
        let idle = self.ra.get_state() == AxisState::Stopped
            && self.dec.get_state() == AxisState::Stopped;
        if idle {
            MountStatus::Stopped
        } else {
            exec.status
        }
    }

    /// Re-read both encoders and refresh the cached mount position.
    pub fn update_position(&self) -> MountCoordinates {
        let mut pos = self.position.lock().unwrap();
        pos.ra_delta = self.ra.get_angle_deg();
        pos.dec_delta = self.dec.get_angle_deg();
        *pos
    }

    pub fn get_mount_coordinates(&self) -> MountCoordinates {
        self.update_position()
    }

    pub fn get_pier_side(&self) -> PierSide {
        self.position.lock().unwrap().side
    }

    /// Where the telescope points in the sky right now, through the inverse
    /// calibration model.
    pub fn get_equatorial_coordinates(&self) -> EquatorialCoordinates {
        let pos = self.update_position();
        self.mount_to_sky(&pos)
    }

    fn calibration_snapshot(&self) -> EqCalibration {
        self.calib.lock().unwrap().calibration
    }

    /// Sky to axis angles through the calibration model. `side = None` lets
    /// the transform pick the pier side.
    fn sky_to_mount(&self, eq: &EquatorialCoordinates, side: Option<PierSide>) -> MountCoordinates {
        let loc = self.config.location;
        let lec = equatorial_to_local_equatorial(eq, self.clock.get_time(), &loc);
        let calib = self.calibration_snapshot();
        let side = side.unwrap_or_else(|| {
            let t = MisalignmentTransformation::from_polar_axis(&calib.polar_axis, &loc);
            local_equatorial_to_mount(&apply_cone_error(&t.apply(&lec), calib.cone), None).side
        });
        predict_mount(&calib, &lec, side, &loc)
    }

    fn mount_to_sky(&self, mc: &MountCoordinates) -> EquatorialCoordinates {
        let loc = self.config.location;
        let calib = self.calibration_snapshot();
        let raw = MountCoordinates {
            ra_delta: wrap_deg(mc.ra_delta - calib.offset_ra),
            dec_delta: mc.dec_delta - calib.offset_dec,
            side: mc.side,
        };
        let t = MisalignmentTransformation::from_polar_axis(&calib.polar_axis, &loc);
        let lec = t.deapply(&deapply_cone_error(&mount_to_local_equatorial(&raw), calib.cone));
        local_equatorial_to_equatorial(&lec, self.clock.get_time(), &loc)
    }

    /// Slew both axes to the given sky coordinates (RA in degrees).
    /// Tracking is paused for the slew and resumed if it completes cleanly.
    pub async fn go_to(&self, ra: Degrees, dec: Degrees) -> Result<FinishState> {
        if !ra.is_finite() || !dec.is_finite() {
            return Err(ControlError::parameter("coordinates must be finite"));
        }
        let target = self.sky_to_mount(&EquatorialCoordinates::new(ra, dec), None);
        self.go_to_mount(target).await
    }

    /// Slew straight to axis angles, bypassing the pointing model.
    pub async fn go_to_mount(&self, target: MountCoordinates) -> Result<FinishState> {
        let mut exec = self.exec.lock().await;
        match exec.status {
            MountStatus::Stopped | MountStatus::Tracking => {}
            status => {
                return Err(ControlError::parameter(format!(
                    "cannot slew while {:?}",
                    status
                )))
            }
        }
        let was_tracking = exec.status.is_tracking();
        if was_tracking {
            self.settle(&self.ra).await;
            self.settle(&self.dec).await;
        }
        exec.status = MountStatus::Slewing;

        let current = self.update_position();
        debug!(
            ra = target.ra_delta,
            dec = target.dec_delta,
            side = ?target.side,
            "slewing to mount coordinates"
        );
        self.ra
            .start_slew_to(
                direction_of(wrap_deg(target.ra_delta - current.ra_delta)),
                target.ra_delta,
            )
            .await?;
        if let Err(e) = self
            .dec
            .start_slew_to(
                direction_of(wrap_deg(target.dec_delta - current.dec_delta)),
                target.dec_delta,
            )
            .await
        {
            self.ra.stop();
            let _ = self.ra.wait_for_slew().await;
            exec.status = MountStatus::Stopped;
            return Err(e);
        }

        let (ra_finish, dec_finish) =
            tokio::join!(self.ra.wait_for_slew(), self.dec.wait_for_slew());
        let finish = ra_finish.max(dec_finish);

        self.position.lock().unwrap().side = target.side;
        self.update_position();

        if was_tracking && finish == FinishState::Complete {
            self.start_tracking_axes().await?;
            exec.status = MountStatus::Tracking;
        } else {
            exec.status = MountStatus::Stopped;
        }
        Ok(finish)
    }

    /// Return to the index position: both axes at zero, east side.
    pub async fn go_to_index(&self) -> Result<FinishState> {
        self.go_to_mount(MountCoordinates {
            ra_delta: 0.,
            dec_delta: 0.,
            side: PierSide::East,
        })
        .await
    }

    /// Start sidereal tracking. The RA axis follows the sky; declination
    /// holds position but accepts guide pulses.
    pub async fn start_tracking(&self) -> Result<()> {
        let mut exec = self.exec.lock().await;
        if exec.status != MountStatus::Stopped {
            return Err(ControlError::parameter(format!(
                "cannot start tracking while {:?}",
                exec.status
            )));
        }
        self.start_tracking_axes().await?;
        exec.status = MountStatus::Tracking;
        info!("tracking started");
        Ok(())
    }

    async fn start_tracking_axes(&self) -> Result<()> {
        // The sky turns the same way on either pier side.
        self.ra
            .start_tracking(Some(RotationDirection::Positive))
            .await?;
        self.dec.start_tracking(None).await
    }

    /// Route a guide pulse to the axis that moves the image the requested
    /// way, accounting for pier side. Only valid while tracking.
    pub async fn guide(&self, dir: GuideDirection, duration_ms: u64) -> Result<()> {
        let exec = self.exec.lock().await;
        if !exec.status.is_tracking() || exec.status.is_nudging() {
            return Err(ControlError::parameter(format!(
                "cannot guide while {:?}",
                exec.status
            )));
        }
        let side = self.get_pier_side();
        match dir {
            GuideDirection::North => self.dec.guide(
                match side {
                    PierSide::East => RotationDirection::Positive,
                    PierSide::West => RotationDirection::Negative,
                },
                duration_ms,
            ),
            GuideDirection::South => self.dec.guide(
                match side {
                    PierSide::East => RotationDirection::Negative,
                    PierSide::West => RotationDirection::Positive,
                },
                duration_ms,
            ),
            // The RA axis reads the hour angle on both pier sides, so east
            // is always the negative rotation.
            GuideDirection::East => self.ra.guide(RotationDirection::Negative, duration_ms),
            GuideDirection::West => self.ra.guide(RotationDirection::Positive, duration_ms),
        }
    }

    /// Request a controlled stop of whatever both axes are doing. The stop
    /// signals go out before the command lock is taken: an in-flight goTo
    /// holds that lock across its waits and must be interrupted, not waited
    /// out. Pair with [`stop_sync`](Self::stop_sync) to wait for standstill.
    pub async fn stop(&self) {
        self.ra.stop();
        self.dec.stop();
        let mut exec = self.exec.lock().await;
        if let Some(speed) = exec.saved_slew_speed.take() {
            self.ra.restore_slew_speed(speed);
        }
        exec.nudge = NudgeDirection::NONE;
        exec.status = MountStatus::Stopped;
    }

    /// Stop and wait until both axes report stopped, re-issuing the request
    /// periodically in case a new command slipped in between.
    pub async fn stop_sync(&self) {
        self.ra.stop();
        self.dec.stop();
        let mut exec = self.exec.lock().await;
        loop {
            self.ra.stop();
            self.dec.stop();
            if self.ra.get_state() == AxisState::Stopped
                && self.dec.get_state() == AxisState::Stopped
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if let Some(speed) = exec.saved_slew_speed.take() {
            self.ra.restore_slew_speed(speed);
        }
        exec.nudge = NudgeDirection::NONE;
        exec.status = MountStatus::Stopped;
    }

    /// Halt both axes as fast as the hardware allows. Never blocks and
    /// never takes the command lock, so it is safe from any context.
    pub fn emergency_stop(&self) {
        self.ra.emergency_stop();
        self.dec.emergency_stop();
    }

    /// Stop `axis` if it is doing anything and wait for it to settle.
    pub(crate) async fn settle(&self, axis: &Axis) {
        if axis.get_state() != AxisState::Stopped {
            axis.stop();
            let _ = axis.wait_for_slew().await;
        }
    }
}
