use super::EquatorialMount;
use crate::astro_math::align::{align_n_stars, EqCalibration, StarReference};
use crate::astro_math::coords::{
    equatorial_to_local_equatorial, EquatorialCoordinates, MountCoordinates,
};
use crate::errors::{ControlError, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub const MAX_ALIGNMENT_STARS: usize = 10;

/// A catalog star paired with the axis angles the mount actually read when
/// centered on it.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AlignmentStar {
    pub star: EquatorialCoordinates,
    pub measured: MountCoordinates,
    pub time: DateTime<Utc>,
}

pub(crate) struct CalibrationState {
    pub calibration: EqCalibration,
    pub stars: Vec<AlignmentStar>,
}

impl EquatorialMount {
    pub fn get_calibration(&self) -> EqCalibration {
        self.calib.lock().unwrap().calibration
    }

    /// Install a calibration directly, e.g. one restored from storage. The
    /// alignment star list is left alone.
    pub fn set_calibration(&self, calibration: EqCalibration) {
        self.calib.lock().unwrap().calibration = calibration;
    }

    /// Forget all alignment stars and return to the identity calibration.
    pub fn clear_calibration(&self) {
        let mut state = self.calib.lock().unwrap();
        state.stars.clear();
        state.calibration = EqCalibration::identity(self.config().location.lat);
    }

    pub fn alignment_star_count(&self) -> usize {
        self.calib.lock().unwrap().stars.len()
    }

    pub fn get_alignment_star(&self, index: usize) -> Option<AlignmentStar> {
        self.calib.lock().unwrap().stars.get(index).copied()
    }

    /// Capture the current encoder readings against a catalog star, for
    /// feeding to [`add_alignment_star`](Self::add_alignment_star).
    pub fn make_alignment_star(&self, star: EquatorialCoordinates) -> AlignmentStar {
        AlignmentStar {
            star,
            measured: self.update_position(),
            time: self.clock().get_time(),
        }
    }

    /// Add a star and re-solve. If the solve diverges the star is kept but
    /// the previous calibration stays in effect.
    pub fn add_alignment_star(&self, star: AlignmentStar) -> Result<()> {
        let mut state = self.calib.lock().unwrap();
        if state.stars.len() >= MAX_ALIGNMENT_STARS {
            return Err(ControlError::parameter(format!(
                "alignment star list is full ({} stars)",
                MAX_ALIGNMENT_STARS
            )));
        }
        state.stars.push(star);
        self.recalibrate_locked(&mut state)
    }

    pub fn replace_alignment_star(&self, index: usize, star: AlignmentStar) -> Result<()> {
        let mut state = self.calib.lock().unwrap();
        match state.stars.get_mut(index) {
            Some(slot) => *slot = star,
            None => {
                return Err(ControlError::parameter(format!(
                    "no alignment star at index {}",
                    index
                )))
            }
        }
        self.recalibrate_locked(&mut state)
    }

    pub fn remove_alignment_star(&self, index: usize) -> Result<()> {
        let mut state = self.calib.lock().unwrap();
        if index >= state.stars.len() {
            return Err(ControlError::parameter(format!(
                "no alignment star at index {}",
                index
            )));
        }
        state.stars.remove(index);
        self.recalibrate_locked(&mut state)
    }

    /// Re-run the alignment solve over the current star list.
    pub fn recalibrate(&self) -> Result<()> {
        let mut state = self.calib.lock().unwrap();
        self.recalibrate_locked(&mut state)
    }

    fn recalibrate_locked(&self, state: &mut CalibrationState) -> Result<()> {
        let loc = self.config().location;
        if state.stars.is_empty() {
            state.calibration = EqCalibration::identity(loc.lat);
            return Ok(());
        }
        let refs: Vec<StarReference> = state
            .stars
            .iter()
            .map(|s| StarReference {
                sky: equatorial_to_local_equatorial(&s.star, s.time, &loc),
                measured: s.measured,
            })
            .collect();
        match align_n_stars(&refs, &loc, &EqCalibration::identity(loc.lat)) {
            Ok(calibration) => {
                info!(
                    stars = state.stars.len(),
                    residual = calibration.residual,
                    "alignment solved"
                );
                state.calibration = calibration;
                Ok(())
            }
            Err(e) => {
                warn!(stars = state.stars.len(), error = %e, "alignment solve failed, keeping previous calibration");
                Err(e)
            }
        }
    }
}
