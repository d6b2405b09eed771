//! Motion-control core for equatorial telescope mounts.
//!
//! The crate is built around three layers:
//!
//! * [`astro_math`] — spherical astronomy, the calibration model, and the
//!   alignment solvers.
//! * [`axis`] — the per-axis real-time state machine driving one stepper.
//! * [`mount`] — the two-axis coordinator that turns sky coordinates into
//!   axis motion.
//!
//! Hardware is abstracted behind [`motor::StepperMotor`] and
//! [`clock::UTCClock`]; [`motor::SimulatedStepper`] and
//! [`clock::ManualClock`] let everything run without a telescope attached.

#[cfg(test)]
#[macro_use]
extern crate assert_float_eq;

pub mod astro_math;
pub mod axis;
pub mod clock;
pub mod config;
pub mod errors;
pub mod motor;
pub mod mount;

pub use axis::{Axis, AxisConfig, AxisState, FinishState, RotationDirection, SlewPhase};
pub use config::MountConfig;
pub use errors::{ControlError, Result};
pub use mount::{EquatorialMount, GuideDirection, MountStatus, NudgeDirection};
