//! Per-axis motion state machine.
//!
//! Each [`Axis`] owns a background task that executes one motion command at
//! a time from a bounded queue. The handle is cheap to share; stop requests
//! bypass the queue entirely and are delivered as signal bits the task polls
//! at every suspension point.

mod mode;
mod signals;
mod task;

pub use mode::{AdaptiveMode, FixedMode, ModeController};

use crate::astro_math::{wrap_deg, Degrees, SIDEREAL_SPEED};
use crate::config::AxisBehavior;
use crate::errors::{ControlError, Result};
use crate::motor::StepperMotor;
use signals::{Signals, EMERGENCY_STOP, GUIDE, KEEP_SPEED, STOP};
use std::cell::Cell;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::debug;

const QUEUE_CAPACITY: usize = 16;

/// Direction of axis rotation in the mount frame, after any inversion.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RotationDirection {
    Positive,
    Negative,
}

impl RotationDirection {
    pub fn sign(self) -> f64 {
        match self {
            RotationDirection::Positive => 1.,
            RotationDirection::Negative => -1.,
        }
    }
}

impl std::ops::Not for RotationDirection {
    type Output = RotationDirection;

    fn not(self) -> RotationDirection {
        match self {
            RotationDirection::Positive => RotationDirection::Negative,
            RotationDirection::Negative => RotationDirection::Positive,
        }
    }
}

/// Phase of the trapezoidal slew ramp.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlewPhase {
    Accelerating,
    Constant,
    Decelerating,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AxisState {
    Stopped,
    Slewing(SlewPhase),
    /// Guide pulses run inside this state and never leave it.
    Tracking,
    /// Stopped as far as commands go, but the motor was deliberately left
    /// running at its last speed.
    Inertial,
}

/// How a motion command ended, in increasing order of severity. Combining
/// the outcomes of several axes takes the maximum.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FinishState {
    Complete,
    Stopped,
    EmergencyStopped,
    Error,
}

#[derive(Debug, Copy, Clone)]
enum Command {
    SlewTo { dest: Degrees, dir: RotationDirection },
    SlewIndefinite { dir: RotationDirection },
    Track { dir: Option<RotationDirection> },
}

#[derive(Debug, Copy, Clone)]
struct GuidePulse {
    dir: RotationDirection,
    ms: u64,
}

/// Speeds in degrees per second, acceleration in degrees per second squared.
#[derive(Debug, Copy, Clone)]
struct Speeds {
    slew: f64,
    track: f64,
    correction: f64,
    guide: f64,
    accel: f64,
}

struct Shared {
    signals: Signals,
    state: StdMutex<AxisState>,
    speeds: StdMutex<Speeds>,
}

pub struct AxisConfig {
    pub name: &'static str,
    pub steps_per_deg: f64,
    pub invert: bool,
    pub behavior: AxisBehavior,
}

pub struct Axis {
    name: &'static str,
    steps_per_deg: f64,
    invert: bool,
    stepper: Arc<dyn StepperMotor>,
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<Command>,
    guide_tx: mpsc::Sender<GuidePulse>,
    finish_rx: TokioMutex<mpsc::Receiver<FinishState>>,
}

impl Axis {
    /// Spawn the axis task on the current runtime and return its handle.
    pub fn new(
        config: AxisConfig,
        stepper: Arc<dyn StepperMotor>,
        mode: Arc<dyn ModeController>,
    ) -> Self {
        let b = config.behavior;
        let shared = Arc::new(Shared {
            signals: Signals::new(),
            state: StdMutex::new(AxisState::Stopped),
            speeds: StdMutex::new(Speeds {
                slew: b.default_slew_speed,
                track: b.default_track_speed_sidereal * SIDEREAL_SPEED,
                correction: b.default_correction_speed_sidereal * SIDEREAL_SPEED,
                guide: b.default_guide_speed_sidereal * SIDEREAL_SPEED,
                accel: b.acceleration,
            }),
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (guide_tx, guide_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (finish_tx, finish_rx) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(
            task::AxisTask {
                name: config.name,
                behavior: b,
                steps_per_deg: config.steps_per_deg,
                invert: config.invert,
                stepper: Arc::clone(&stepper),
                mode,
                shared: Arc::clone(&shared),
                cmd_rx,
                guide_rx,
                finish_tx,
                coast: Cell::new(None),
            }
            .run(),
        );

        Axis {
            name: config.name,
            steps_per_deg: config.steps_per_deg,
            invert: config.invert,
            stepper,
            shared,
            cmd_tx,
            guide_tx,
            finish_rx: TokioMutex::new(finish_rx),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_state(&self) -> AxisState {
        *self.shared.state.lock().unwrap()
    }

    fn sign(&self) -> f64 {
        if self.invert {
            -1.
        } else {
            1.
        }
    }

    /// Current axis angle, wrapped to (-180, 180].
    pub fn get_angle_deg(&self) -> Degrees {
        wrap_deg(self.sign() * self.stepper.get_step_count() / self.steps_per_deg)
    }

    /// Redefine the current position. Only valid while stopped.
    pub fn set_angle_deg(&self, angle: Degrees) -> Result<()> {
        if !angle.is_finite() {
            return Err(ControlError::parameter("angle must be finite"));
        }
        self.require_stopped("set angle")?;
        self.stepper
            .set_step_count(self.sign() * angle * self.steps_per_deg);
        Ok(())
    }

    /// Queue a slew toward `dest` degrees, approaching in `dir`. Does not
    /// wait; pair with [`wait_for_slew`](Self::wait_for_slew).
    pub async fn start_slew_to(&self, dir: RotationDirection, dest: Degrees) -> Result<()> {
        if !dest.is_finite() {
            return Err(ControlError::parameter("slew destination must be finite"));
        }
        self.enqueue(Command::SlewTo { dest, dir }).await
    }

    /// Queue an open-ended slew at the slew speed, until stopped.
    pub async fn start_slewing(&self, dir: RotationDirection) -> Result<()> {
        self.enqueue(Command::SlewIndefinite { dir }).await
    }

    /// Wait for the next motion command to finish.
    pub async fn wait_for_slew(&self) -> FinishState {
        self.finish_rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(FinishState::Error)
    }

    pub async fn slew_to(&self, dir: RotationDirection, dest: Degrees) -> Result<FinishState> {
        self.start_slew_to(dir, dest).await?;
        Ok(self.wait_for_slew().await)
    }

    /// Queue tracking. `None` holds position while still accepting guide
    /// pulses, which is how a declination axis tracks.
    pub async fn start_tracking(&self, dir: Option<RotationDirection>) -> Result<()> {
        self.enqueue(Command::Track { dir }).await
    }

    /// Ask for a guide pulse of `ms` milliseconds. Only valid while the axis
    /// is tracking; pulses queue up behind one another.
    pub fn guide(&self, dir: RotationDirection, ms: u64) -> Result<()> {
        if ms == 0 {
            return Err(ControlError::parameter("guide duration must be nonzero"));
        }
        match self.get_state() {
            AxisState::Tracking => {}
            state => {
                return Err(ControlError::parameter(format!(
                    "cannot guide {} axis while {:?}",
                    self.name, state
                )))
            }
        }
        self.guide_tx
            .try_send(GuidePulse { dir, ms })
            .map_err(|_| ControlError::ResourceExhausted {
                axis: self.name,
                queue: "guide",
            })?;
        self.shared.signals.raise(GUIDE);
        Ok(())
    }

    /// Request a controlled stop of the current motion. Returns immediately.
    pub fn stop(&self) {
        self.shared.signals.raise(STOP);
    }

    /// Stop executing commands but leave the motor running at its current
    /// speed. The axis ends up in [`AxisState::Inertial`].
    pub fn stop_keep_speed(&self) {
        self.shared.signals.raise(STOP | KEEP_SPEED);
    }

    /// Halt as fast as the hardware allows, skipping deceleration. Safe to
    /// call from any context; never blocks.
    pub fn emergency_stop(&self) {
        self.shared.signals.raise(EMERGENCY_STOP);
    }

    pub fn get_slew_speed(&self) -> f64 {
        self.shared.speeds.lock().unwrap().slew
    }

    pub fn get_track_speed(&self) -> f64 {
        self.shared.speeds.lock().unwrap().track
    }

    pub fn get_correction_speed(&self) -> f64 {
        self.shared.speeds.lock().unwrap().correction
    }

    pub fn get_guide_speed(&self) -> f64 {
        self.shared.speeds.lock().unwrap().guide
    }

    /// Overwrite the slew speed without the stopped-state check. Lets the
    /// mount put a saved speed back while an axis is still winding down; the
    /// running command took its speed snapshot at dispatch.
    pub(crate) fn restore_slew_speed(&self, deg_per_sec: f64) {
        self.shared.speeds.lock().unwrap().slew = deg_per_sec;
    }

    /// Set the slew speed in degrees per second. Only valid while stopped.
    pub fn set_slew_speed(&self, deg_per_sec: f64) -> Result<()> {
        self.require_stopped("set slew speed")?;
        Self::validate_speed(deg_per_sec)?;
        self.shared.speeds.lock().unwrap().slew = deg_per_sec;
        Ok(())
    }

    /// Set the tracking speed as a multiple of the sidereal rate.
    pub fn set_track_speed_sidereal(&self, multiple: f64) -> Result<()> {
        self.require_stopped("set track speed")?;
        Self::validate_speed(multiple)?;
        self.shared.speeds.lock().unwrap().track = multiple * SIDEREAL_SPEED;
        Ok(())
    }

    /// Set the correction speed as a multiple of the sidereal rate.
    pub fn set_correction_speed_sidereal(&self, multiple: f64) -> Result<()> {
        self.require_stopped("set correction speed")?;
        Self::validate_speed(multiple)?;
        self.shared.speeds.lock().unwrap().correction = multiple * SIDEREAL_SPEED;
        Ok(())
    }

    /// Set the guide speed as a multiple of the sidereal rate. Clamped to
    /// 1%-99% of the tracking speed so a pulse can never reverse the
    /// apparent motion.
    pub fn set_guide_speed_sidereal(&self, multiple: f64) -> Result<()> {
        self.require_stopped("set guide speed")?;
        Self::validate_speed(multiple)?;
        let mut speeds = self.shared.speeds.lock().unwrap();
        speeds.guide = (multiple * SIDEREAL_SPEED).clamp(0.01 * speeds.track, 0.99 * speeds.track);
        Ok(())
    }

    pub fn get_acceleration(&self) -> f64 {
        self.shared.speeds.lock().unwrap().accel
    }

    /// Set the ramp acceleration in degrees per second squared.
    pub fn set_acceleration(&self, deg_per_sec2: f64) -> Result<()> {
        self.require_stopped("set acceleration")?;
        Self::validate_speed(deg_per_sec2)?;
        self.shared.speeds.lock().unwrap().accel = deg_per_sec2;
        Ok(())
    }

    fn validate_speed(speed: f64) -> Result<()> {
        if speed > 0. && speed.is_finite() {
            Ok(())
        } else {
            Err(ControlError::parameter("speed must be positive and finite"))
        }
    }

    fn require_stopped(&self, what: &str) -> Result<()> {
        match self.get_state() {
            AxisState::Stopped => Ok(()),
            state => {
                debug!(axis = self.name, ?state, "rejected: {}", what);
                Err(ControlError::parameter(format!(
                    "cannot {} on {} axis while {:?}",
                    what, self.name, state
                )))
            }
        }
    }

    async fn enqueue(&self, cmd: Command) -> Result<()> {
        // finish reports nobody waited for must not satisfy the next waiter
        {
            let mut rx = self.finish_rx.lock().await;
            while rx.try_recv().is_ok() {}
        }
        self.cmd_tx
            .try_send(cmd)
            .map_err(|_| ControlError::ResourceExhausted {
                axis: self.name,
                queue: "command",
            })
    }
}
