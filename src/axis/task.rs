use super::mode::ModeController;
use super::signals::{EMERGENCY_STOP, GUIDE, KEEP_SPEED, STOP};
use super::{AxisState, Command, FinishState, GuidePulse, RotationDirection, Shared, SlewPhase};
use crate::astro_math::{modulo, wrap_deg, Degrees};
use crate::config::AxisBehavior;
use crate::errors::ControlError;
use crate::motor::{StepDirection, StepperMotor};
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(super) struct AxisTask {
    pub name: &'static str,
    pub behavior: AxisBehavior,
    pub steps_per_deg: f64,
    pub invert: bool,
    pub stepper: Arc<dyn StepperMotor>,
    pub mode: Arc<dyn ModeController>,
    pub shared: Arc<Shared>,
    pub cmd_rx: mpsc::Receiver<Command>,
    pub guide_rx: mpsc::Receiver<GuidePulse>,
    pub finish_tx: mpsc::Sender<FinishState>,
    /// Direction and speed the motor was left turning at by a keep-speed
    /// stop, for the next command to pick up.
    pub coast: Cell<Option<(RotationDirection, f64)>>,
}

fn ramp_steps(speed: f64, accel: f64, dt_s: f64) -> u32 {
    ((speed / (accel * dt_s)).ceil() as u32).max(1)
}

impl AxisTask {
    pub(super) async fn run(mut self) {
        loop {
            // In the inertial state the motor is still turning, so stop
            // requests must be honored even though no command is active.
            let cmd = if self.state() == AxisState::Inertial {
                tokio::select! {
                    cmd = self.cmd_rx.recv() => cmd,
                    _ = self.shared.signals.wait(STOP | EMERGENCY_STOP) => {
                        self.coast.set(None);
                        self.halt();
                        let _ = self.finish_tx.try_send(FinishState::Stopped);
                        continue;
                    }
                }
            } else {
                self.cmd_rx.recv().await
            };
            let Some(cmd) = cmd else { break };

            let coast = self.coast.take();
            // motion signals raised before this command do not apply to it
            self.shared.signals.take(STOP | EMERGENCY_STOP | KEEP_SPEED);

            let finish = match cmd {
                Command::SlewTo { dest, dir } => {
                    let start = self.resume_speed(coast, dir);
                    self.slew(dir, Some(dest), start).await
                }
                Command::SlewIndefinite { dir } => {
                    let start = self.resume_speed(coast, dir);
                    self.slew(dir, None, start).await
                }
                Command::Track { dir } => self.track(dir).await,
            };

            debug!(axis = self.name, ?finish, "motion finished");
            let flush =
                matches!(finish, FinishState::Stopped | FinishState::EmergencyStopped);
            let _ = self.finish_tx.try_send(finish);
            if flush {
                while self.cmd_rx.try_recv().is_ok() {
                    let _ = self.finish_tx.try_send(FinishState::Stopped);
                }
            }
        }
    }

    fn state(&self) -> AxisState {
        *self.shared.state.lock().unwrap()
    }

    fn set_state(&self, state: AxisState) {
        *self.shared.state.lock().unwrap() = state;
    }

    fn sign(&self) -> f64 {
        if self.invert {
            -1.
        } else {
            1.
        }
    }

    /// Unwrapped axis angle in degrees.
    fn angle(&self) -> Degrees {
        self.sign() * self.stepper.get_step_count() / self.steps_per_deg
    }

    /// Ramp start speed for a new slew. Inertial motion already going the
    /// requested way is kept rolling; anything else is halted first.
    fn resume_speed(&self, coast: Option<(RotationDirection, f64)>, dir: RotationDirection) -> f64 {
        match coast {
            Some((d, v)) if d == dir => v,
            Some(_) => {
                self.stepper.stop();
                0.
            }
            None => 0.,
        }
    }

    fn step_dir(&self, dir: RotationDirection) -> StepDirection {
        match (dir, self.invert) {
            (RotationDirection::Positive, false) | (RotationDirection::Negative, true) => {
                StepDirection::Forward
            }
            _ => StepDirection::Backward,
        }
    }

    /// Program the motor for `deg_per_sec` and return the speed the pulse
    /// timer can actually deliver.
    fn set_speed(&self, deg_per_sec: f64) -> f64 {
        self.stepper.set_frequency(deg_per_sec * self.steps_per_deg) / self.steps_per_deg
    }

    fn halt(&self) {
        self.stepper.stop();
        self.set_speed(0.);
        self.set_state(AxisState::Stopped);
        self.mode.idle_mode();
    }

    /// Run the motor at a signed velocity along the positive rotation
    /// direction, or stop it for zero.
    fn apply_velocity(&self, v: f64) {
        self.stepper.stop();
        if v != 0. {
            self.set_speed(v.abs());
            let dir = if v > 0. {
                RotationDirection::Positive
            } else {
                RotationDirection::Negative
            };
            self.stepper.start(self.step_dir(dir));
        } else {
            self.set_speed(0.);
        }
    }

    /// Trapezoidal slew: accelerate in fixed time steps, hold, decelerate,
    /// then close the remaining error with slow correction pulses. With no
    /// destination the hold phase lasts until a stop signal. `start_speed`
    /// is nonzero when the motor is already coasting this way.
    async fn slew(
        &mut self,
        dir: RotationDirection,
        dest: Option<Degrees>,
        start_speed: f64,
    ) -> FinishState {
        self.mode.slew_mode();
        self.set_state(AxisState::Slewing(SlewPhase::Accelerating));

        let b = self.behavior;
        let (slew_speed, accel) = {
            let speeds = self.shared.speeds.lock().unwrap();
            (speeds.slew, speeds.accel)
        };
        let dt = Duration::from_millis(b.acceleration_step_time_ms);
        let dt_s = dt.as_secs_f64();

        let mut skip_correction = dest.is_none();
        let mut finish = FinishState::Complete;

        // Plan the ramp: top speed and how long to hold it. The pulse timer
        // cannot deliver every speed, so the plan runs each step through the
        // stepper and sums the speeds it will actually get.
        let mut end_speed = slew_speed;
        let mut hold: Option<Duration> = None; // None = until stopped
        if let Some(dest) = dest {
            let delta = modulo((dest - self.angle()) * dir.sign(), 360.);
            if delta <= b.min_slew_angle {
                // close enough for the correction pass alone
                end_speed = 0.;
            } else {
                // Aim half the minimum slew angle short of the destination;
                // the correction pass closes the rest.
                let travel = delta - 0.5 * b.min_slew_angle;
                end_speed = self.set_speed((travel * accel).sqrt().min(slew_speed));
                let mut ramped = 0.;
                let up = ramp_steps((end_speed - start_speed).abs(), accel, dt_s);
                for i in 1..=up {
                    let v = start_speed + (end_speed - start_speed) * i as f64 / up as f64;
                    ramped += self.set_speed(v) * dt_s;
                }
                let down = ramp_steps(end_speed, accel, dt_s);
                for i in (1..down).rev() {
                    ramped += self.set_speed(end_speed * i as f64 / down as f64) * dt_s;
                }
                hold = Some(Duration::from_secs_f64(
                    ((travel - ramped) / end_speed).max(0.),
                ));
            }
        }

        let mut current_speed = start_speed;
        let mut coast_speed = start_speed;
        let mut emergency = false;
        let mut inertial = false;

        if end_speed > 0. {
            let steps = ramp_steps((end_speed - start_speed).abs(), accel, dt_s);
            let mut stopped = false;

            for i in 1..=steps {
                let v = start_speed + (end_speed - start_speed) * i as f64 / steps as f64;
                current_speed = self.set_speed(v);
                if i == 1 {
                    self.stepper.start(self.step_dir(dir));
                }
                let got = self
                    .shared
                    .signals
                    .wait_timeout(STOP | EMERGENCY_STOP, dt)
                    .await;
                if got & EMERGENCY_STOP != 0 {
                    emergency = true;
                    break;
                }
                if got & STOP != 0 {
                    stopped = true;
                    break;
                }
            }

            if !emergency && !stopped {
                self.set_state(AxisState::Slewing(SlewPhase::Constant));
                let got = match hold {
                    Some(d) => {
                        self.shared
                            .signals
                            .wait_timeout(STOP | EMERGENCY_STOP, d)
                            .await
                    }
                    None => self.shared.signals.wait(STOP | EMERGENCY_STOP).await,
                };
                if got & EMERGENCY_STOP != 0 {
                    emergency = true;
                } else if got & STOP != 0 {
                    stopped = true;
                }
            }

            if stopped {
                finish = FinishState::Stopped;
                skip_correction = true;
            }

            if !emergency {
                self.set_state(AxisState::Slewing(SlewPhase::Decelerating));
                let steps = ramp_steps(current_speed, accel, dt_s);
                for i in (1..steps).rev() {
                    coast_speed = self.set_speed(current_speed * i as f64 / steps as f64);
                    let got = self
                        .shared
                        .signals
                        .wait_timeout(EMERGENCY_STOP | KEEP_SPEED, dt)
                        .await;
                    if got & EMERGENCY_STOP != 0 {
                        emergency = true;
                        break;
                    }
                    if got & KEEP_SPEED != 0 {
                        inertial = true;
                        break;
                    }
                }
            }
        }

        if emergency {
            self.halt();
            return FinishState::EmergencyStopped;
        }
        if inertial {
            // the motor is left running at whatever speed the ramp reached
            self.coast.set(Some((dir, coast_speed)));
            self.set_state(AxisState::Inertial);
            return FinishState::Stopped;
        }

        self.stepper.stop();
        self.set_speed(0.);

        if !skip_correction && finish == FinishState::Complete {
            if let Some(dest) = dest {
                finish = self.correct(dest).await;
            }
        }

        self.set_state(AxisState::Stopped);
        self.mode.idle_mode();
        finish
    }

    /// Close the post-slew error with up to three timed pulses at the
    /// correction speed.
    async fn correct(&mut self, dest: Degrees) -> FinishState {
        self.mode.correction_mode();

        let b = self.behavior;
        let correction = self.shared.speeds.lock().unwrap().correction;
        let speed = self.set_speed(correction);
        if speed <= 0. {
            return FinishState::Complete;
        }

        let mut tries = 0;
        let finish = loop {
            let diff = wrap_deg(self.angle() - dest);
            if diff.abs() <= b.correction_tolerance {
                break FinishState::Complete;
            }
            if diff.abs() > b.max_correction_angle {
                warn!(
                    error = %ControlError::HardwareDivergence {
                        axis: self.name,
                        diff_deg: diff,
                        limit_deg: b.max_correction_angle,
                    },
                    "giving up on correction"
                );
                break FinishState::Error;
            }
            if tries >= 3 {
                warn!(axis = self.name, diff_deg = diff, "correction gave up");
                break FinishState::Complete;
            }

            let pulse_ms = (diff.abs() / speed * 1000.) as u64;
            if pulse_ms < b.min_correction_time_ms {
                break FinishState::Complete;
            }
            let dir = if diff > 0. {
                RotationDirection::Negative
            } else {
                RotationDirection::Positive
            };
            self.stepper.start(self.step_dir(dir));
            let got = self
                .shared
                .signals
                .wait_timeout(EMERGENCY_STOP, Duration::from_millis(pulse_ms))
                .await;
            self.stepper.stop();
            if got != 0 {
                break FinishState::EmergencyStopped;
            }
            tries += 1;
        };

        self.set_speed(0.);
        finish
    }

    /// Run at the tracking rate until stopped, weaving in guide pulses as
    /// they arrive. `dir = None` is the declination standby: the axis holds
    /// still but still answers guides.
    async fn track(&mut self, dir: Option<RotationDirection>) -> FinishState {
        self.mode.track_mode();
        self.set_state(AxisState::Tracking);

        let speeds = *self.shared.speeds.lock().unwrap();
        let base = match dir {
            Some(d) => speeds.track * d.sign(),
            None => 0.,
        };

        // pulses left over from an earlier session don't apply
        while self.guide_rx.try_recv().is_ok() {}
        self.shared.signals.take(GUIDE);

        self.apply_velocity(base);

        let finish = loop {
            let got = self
                .shared
                .signals
                .wait(STOP | EMERGENCY_STOP | GUIDE)
                .await;
            if got & EMERGENCY_STOP != 0 {
                break FinishState::EmergencyStopped;
            }
            if got & STOP != 0 {
                break FinishState::Stopped;
            }
            if got & GUIDE != 0 {
                let mut interrupted = None;
                while let Ok(pulse) = self.guide_rx.try_recv() {
                    if let Some(f) = self.guide_pulse(base, speeds.guide, pulse).await {
                        interrupted = Some(f);
                        break;
                    }
                }
                if let Some(f) = interrupted {
                    break f;
                }
                self.apply_velocity(base);
            }
        };

        self.halt();
        finish
    }

    /// Offset the tracking velocity by the guide speed for the pulse
    /// duration. Returns the finish state if the pulse was interrupted.
    async fn guide_pulse(
        &mut self,
        base: f64,
        guide_speed: f64,
        pulse: GuidePulse,
    ) -> Option<FinishState> {
        let b = self.behavior;
        let ms = if pulse.ms > b.max_guide_time_ms {
            warn!(
                axis = self.name,
                requested_ms = pulse.ms,
                limit_ms = b.max_guide_time_ms,
                "guide pulse clamped"
            );
            b.max_guide_time_ms
        } else {
            pulse.ms
        };

        self.apply_velocity(base + guide_speed * pulse.dir.sign());
        let got = self
            .shared
            .signals
            .wait_timeout(STOP | EMERGENCY_STOP, Duration::from_millis(ms))
            .await;
        if got & EMERGENCY_STOP != 0 {
            return Some(FinishState::EmergencyStopped);
        }
        if got & STOP != 0 {
            return Some(FinishState::Stopped);
        }
        None
    }
}
