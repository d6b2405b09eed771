use crate::motor::SteppingModeControl;
use std::sync::Arc;

/// Hooks the axis task fires when it changes speed regime, so drivers with
/// run-time configuration can retune themselves.
pub trait ModeController: Send + Sync {
    fn slew_mode(&self) {}
    fn track_mode(&self) {}
    fn correction_mode(&self) {}
    fn idle_mode(&self) {}
}

/// For drivers with fixed microstepping and current.
pub struct FixedMode;

impl ModeController for FixedMode {}

/// Retunes a configurable driver per regime: coarse microstepping at full
/// current for slews, fine microstepping at reduced current for tracking and
/// corrections, and a holding current when idle.
pub struct AdaptiveMode<D> {
    driver: Arc<D>,
    pub slew_microstep: u32,
    pub fine_microstep: u32,
    pub slew_current: f64,
    pub track_current: f64,
    pub idle_current: f64,
}

impl<D: SteppingModeControl + Send + Sync> AdaptiveMode<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            slew_microstep: 16,
            fine_microstep: 128,
            slew_current: 1.0,
            track_current: 0.7,
            idle_current: 0.3,
        }
    }
}

impl<D: SteppingModeControl + Send + Sync> ModeController for AdaptiveMode<D> {
    fn slew_mode(&self) {
        self.driver.set_microstep(self.slew_microstep);
        self.driver.set_current(self.slew_current);
    }

    fn track_mode(&self) {
        self.driver.set_microstep(self.fine_microstep);
        self.driver.set_current(self.track_current);
    }

    fn correction_mode(&self) {
        self.driver.set_microstep(self.fine_microstep);
        self.driver.set_current(self.track_current);
    }

    fn idle_mode(&self) {
        self.driver.set_current(self.idle_current);
    }
}
