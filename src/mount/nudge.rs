use super::{EquatorialMount, MountStatus};
use crate::astro_math::coords::PierSide;
use crate::axis::RotationDirection;
use crate::errors::{ControlError, Result};
use std::ops::BitOr;
use tracing::debug;

/// Combination of sky directions for a hand-controller nudge. Opposite
/// directions are mutually exclusive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct NudgeDirection(u8);

impl NudgeDirection {
    pub const NONE: NudgeDirection = NudgeDirection(0);
    pub const NORTH: NudgeDirection = NudgeDirection(1);
    pub const SOUTH: NudgeDirection = NudgeDirection(1 << 1);
    pub const EAST: NudgeDirection = NudgeDirection(1 << 2);
    pub const WEST: NudgeDirection = NudgeDirection(1 << 3);

    pub fn contains(self, other: NudgeDirection) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_valid(self) -> bool {
        !(self.contains(Self::NORTH) && self.contains(Self::SOUTH))
            && !(self.contains(Self::EAST) && self.contains(Self::WEST))
    }

    /// Sky north component: +1 north, -1 south, 0 neither.
    fn ns(self) -> i8 {
        if self.contains(Self::NORTH) {
            1
        } else if self.contains(Self::SOUTH) {
            -1
        } else {
            0
        }
    }

    /// RA-axis rotation component: +1 west (positive rotation), -1 east.
    fn ew(self) -> i8 {
        if self.contains(Self::WEST) {
            1
        } else if self.contains(Self::EAST) {
            -1
        } else {
            0
        }
    }
}

impl BitOr for NudgeDirection {
    type Output = NudgeDirection;

    fn bitor(self, rhs: NudgeDirection) -> NudgeDirection {
        NudgeDirection(self.0 | rhs.0)
    }
}

impl EquatorialMount {
    /// Start or re-shape a manual nudge. Axes whose component changed are
    /// stopped and restarted; the others keep moving. While tracking, the
    /// east-west component is composed with the tracking rate so the nudge
    /// speed is relative to the sky, and tracking resumes when the
    /// component is released.
    pub async fn start_nudge(&self, dir: NudgeDirection) -> Result<()> {
        if !dir.is_valid() {
            return Err(ControlError::parameter("conflicting nudge directions"));
        }
        let mut exec = self.exec.lock().await;
        match exec.status {
            MountStatus::Stopped
            | MountStatus::Tracking
            | MountStatus::Nudging
            | MountStatus::NudgingTracking => {}
            status => {
                return Err(ControlError::parameter(format!(
                    "cannot nudge while {:?}",
                    status
                )))
            }
        }
        let was_tracking = exec.status.is_tracking();
        let prev = exec.nudge;
        if dir == prev {
            return Ok(());
        }
        debug!(?dir, ?prev, tracking = was_tracking, "nudge change");
        let side = self.get_pier_side();

        if dir.ns() != prev.ns() {
            self.settle(&self.dec).await;
            match dir.ns() {
                0 => {
                    if was_tracking {
                        self.dec.start_tracking(None).await?;
                    }
                }
                ns => {
                    // north is the positive axis direction on the east side
                    // of the pier and the negative one on the west side
                    let sign = match side {
                        PierSide::East => ns as f64,
                        PierSide::West => -(ns as f64),
                    };
                    let axis_dir = if sign > 0. {
                        RotationDirection::Positive
                    } else {
                        RotationDirection::Negative
                    };
                    self.dec.start_slewing(axis_dir).await?;
                }
            }
        }

        if dir.ew() != prev.ew() {
            self.settle(&self.ra).await;
            if let Some(speed) = exec.saved_slew_speed.take() {
                self.ra.set_slew_speed(speed)?;
            }
            match dir.ew() {
                0 => {
                    if was_tracking {
                        self.ra
                            .start_tracking(Some(RotationDirection::Positive))
                            .await?;
                    }
                }
                ew => {
                    let nudge_v = self.ra.get_slew_speed() * ew as f64;
                    let v = if was_tracking {
                        nudge_v + self.ra.get_track_speed()
                    } else {
                        nudge_v
                    };
                    if v != 0. {
                        exec.saved_slew_speed = Some(self.ra.get_slew_speed());
                        self.ra.set_slew_speed(v.abs())?;
                        let axis_dir = if v > 0. {
                            RotationDirection::Positive
                        } else {
                            RotationDirection::Negative
                        };
                        self.ra.start_slewing(axis_dir).await?;
                    }
                }
            }
        }

        exec.nudge = dir;
        exec.status = if dir == NudgeDirection::NONE {
            if was_tracking {
                MountStatus::Tracking
            } else {
                MountStatus::Stopped
            }
        } else if was_tracking {
            MountStatus::NudgingTracking
        } else {
            MountStatus::Nudging
        };
        Ok(())
    }

    /// Release all nudge directions, resuming tracking if it was on.
    pub async fn stop_nudge(&self) -> Result<()> {
        self.start_nudge(NudgeDirection::NONE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_directions_are_invalid() {
        assert!(!(NudgeDirection::NORTH | NudgeDirection::SOUTH).is_valid());
        assert!(!(NudgeDirection::EAST | NudgeDirection::WEST).is_valid());
        assert!((NudgeDirection::NORTH | NudgeDirection::WEST).is_valid());
        assert!(NudgeDirection::NONE.is_valid());
    }
}
