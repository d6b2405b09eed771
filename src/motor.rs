use std::sync::Mutex;
use tokio::time::Instant;

/// Physical stepping direction at the driver, before any axis inversion.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepDirection {
    Forward,
    Backward,
}

impl std::ops::Not for StepDirection {
    type Output = StepDirection;

    fn not(self) -> StepDirection {
        match self {
            StepDirection::Forward => StepDirection::Backward,
            StepDirection::Backward => StepDirection::Forward,
        }
    }
}

/// Capability interface of a stepper driver channel.
///
/// The register protocol behind it (SPI driver chips, pulse generators) is a
/// collaborator outside this crate; the axis state machine only needs these
/// five operations. Step counts are fractional full steps.
pub trait StepperMotor: Send + Sync {
    fn start(&self, dir: StepDirection);
    fn stop(&self);

    /// Set the stepping frequency in full steps per second.
    ///
    /// Returns the frequency actually achievable: pulse timers have finite
    /// resolution, and all slew timing downstream must use the returned
    /// value, not the requested one.
    fn set_frequency(&self, freq: f64) -> f64;

    fn get_step_count(&self) -> f64;
    fn set_step_count(&self, steps: f64);
}

/// Optional mode interface for drivers with run-time microstep/current
/// control, driven by [`AdaptiveMode`](crate::axis::AdaptiveMode).
pub trait SteppingModeControl {
    fn set_microstep(&self, microstep: u32);
    fn set_current(&self, amps: f64);
}

const MAX_FREQUENCY: f64 = 100_000.0;
const TIMER_TICK_US: f64 = 1.0e6;

/// Software stepper that integrates step count over (virtual) time.
///
/// Frequency is quantized to whole-microsecond step periods and capped at
/// 100 kHz, mimicking a hardware pulse timer. Time comes from
/// `tokio::time::Instant`, so tests running under a paused runtime clock see
/// the motor advance with `tokio::time::advance`/auto-advanced sleeps.
pub struct SimulatedStepper {
    inner: Mutex<Inner>,
}

struct Inner {
    steps: f64,
    freq: f64,
    running: Option<Running>,
}

struct Running {
    sign: f64,
    since: Instant,
}

impl SimulatedStepper {
    pub fn new() -> Self {
        SimulatedStepper {
            inner: Mutex::new(Inner {
                steps: 0.0,
                freq: 0.0,
                running: None,
            }),
        }
    }

    /// Accumulate motion since `since` into the step counter.
    fn settle(inner: &mut Inner, now: Instant) {
        if let Some(running) = &mut inner.running {
            let elapsed = now.saturating_duration_since(running.since);
            inner.steps += inner.freq * elapsed.as_secs_f64() * running.sign;
            running.since = now;
        }
    }
}

impl Default for SimulatedStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl StepperMotor for SimulatedStepper {
    fn start(&self, dir: StepDirection) {
        let mut inner = self.inner.lock().unwrap();
        if inner.running.is_none() {
            inner.running = Some(Running {
                sign: match dir {
                    StepDirection::Forward => 1.0,
                    StepDirection::Backward => -1.0,
                },
                since: Instant::now(),
            });
        }
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        Self::settle(&mut inner, Instant::now());
        inner.running = None;
    }

    fn set_frequency(&self, freq: f64) -> f64 {
        let freq = freq.clamp(0.0, MAX_FREQUENCY);
        let actual = if freq > 0.0 {
            // Quantize to a whole-microsecond step period.
            let period_us = (TIMER_TICK_US / freq).round().max(1.0);
            TIMER_TICK_US / period_us
        } else {
            0.0
        };

        let mut inner = self.inner.lock().unwrap();
        Self::settle(&mut inner, Instant::now());
        inner.freq = actual;
        actual
    }

    fn get_step_count(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let base = inner.steps;
        match (&inner.running, inner.freq) {
            (Some(running), freq) => {
                let elapsed = Instant::now().saturating_duration_since(running.since);
                base + freq * elapsed.as_secs_f64() * running.sign
            }
            (None, _) => base,
        }
    }

    fn set_step_count(&self, steps: f64) {
        let mut inner = self.inner.lock().unwrap();
        Self::settle(&mut inner, Instant::now());
        inner.steps = steps;
    }
}
