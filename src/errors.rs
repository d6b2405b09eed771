use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors surfaced by the motion and calibration APIs.
///
/// Axis motion outcomes are not errors: they travel back to the caller as
/// [`FinishState`](crate::axis::FinishState) values. `ControlError` covers
/// rejected requests and failed calibration solves.
#[derive(Error, Debug)]
pub enum ControlError {
    /// A rejected argument or an operation issued in the wrong state.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// A bounded command or guide-pulse queue was full. The caller may retry.
    #[error("{queue} queue full on {axis} axis")]
    ResourceExhausted {
        axis: &'static str,
        queue: &'static str,
    },

    /// The post-slew correction found the axis further from its destination
    /// than `max_correction_angle` allows. Logged and non-fatal: the axis
    /// returns to `Stopped` and reports an error finish. Usually a
    /// configuration fault (wrong steps-per-degree, slipping drive).
    #[error("hardware divergence on {axis} axis: {diff_deg:.3} deg off with a limit of {limit_deg:.3} deg")]
    HardwareDivergence {
        axis: &'static str,
        diff_deg: f64,
        limit_deg: f64,
    },

    /// The N-star alignment solve failed to converge. The previous
    /// calibration is left in place.
    #[error("alignment failed to converge (residual {residual:.6})")]
    AlignmentDivergence { residual: f64 },
}

impl ControlError {
    pub fn parameter(msg: impl Into<String>) -> Self {
        ControlError::Parameter(msg.into())
    }
}
