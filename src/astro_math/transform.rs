use super::coords::{
    azimuthal_to_local_equatorial, local_equatorial_to_unit_vector,
    unit_vector_to_local_equatorial, AzimuthalCoordinates, LocalEquatorialCoordinates,
    LocationCoordinates,
};
use super::{deg_to_rad, rad_to_deg, Degrees};
use nalgebra::{Rotation3, Vector3};
use std::f64::consts::PI;

/// Offset the hour angle and declination of a pointing for a telescope tube
/// that is not perpendicular to the declination axis by `cone` degrees.
pub fn apply_cone_error(
    lec: &LocalEquatorialCoordinates,
    cone: Degrees,
) -> LocalEquatorialCoordinates {
    let dec = deg_to_rad(lec.dec);
    let cone = deg_to_rad(cone);
    let ha_offset = (dec.tan() * cone.tan()).clamp(-1., 1.).asin();
    let dec_apparent = (dec.sin() / cone.cos()).clamp(-1., 1.).asin();
    LocalEquatorialCoordinates::new(lec.ha + rad_to_deg(ha_offset), rad_to_deg(dec_apparent))
}

/// Exact inverse of [`apply_cone_error`]: the true declination follows from
/// the apparent one alone, and the hour-angle offset is recomputed from it.
pub fn deapply_cone_error(
    lec: &LocalEquatorialCoordinates,
    cone: Degrees,
) -> LocalEquatorialCoordinates {
    let cone = deg_to_rad(cone);
    let dec = (deg_to_rad(lec.dec).sin() * cone.cos()).clamp(-1., 1.).asin();
    let ha_offset = (dec.tan() * cone.tan()).clamp(-1., 1.).asin();
    LocalEquatorialCoordinates::new(lec.ha - rad_to_deg(ha_offset), rad_to_deg(dec))
}

/// Rigid rotation between the true equatorial frame and the frame of a
/// mount whose polar axis misses the pole.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MisalignmentTransformation {
    rotation: Rotation3<f64>,
}

impl MisalignmentTransformation {
    /// Build the rotation that carries the true pole onto the mount's polar
    /// axis, given where that axis actually points in the sky.
    pub fn from_polar_axis(pa: &AzimuthalCoordinates, loc: &LocationCoordinates) -> Self {
        let pole = local_equatorial_to_unit_vector(&azimuthal_to_local_equatorial(pa, loc));
        let rotation = Rotation3::rotation_between(&Vector3::z(), &pole)
            // Antiparallel axes have no unique rotation; any half turn works.
            .unwrap_or_else(|| Rotation3::from_axis_angle(&Vector3::x_axis(), PI));
        Self { rotation }
    }

    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
        }
    }

    /// Express a true-sky pointing in the misaligned mount frame.
    pub fn apply(&self, lec: &LocalEquatorialCoordinates) -> LocalEquatorialCoordinates {
        let v = self.rotation.inverse() * local_equatorial_to_unit_vector(lec);
        unit_vector_to_local_equatorial(&v)
    }

    /// Express a mount-frame pointing in the true sky.
    pub fn deapply(&self, lec: &LocalEquatorialCoordinates) -> LocalEquatorialCoordinates {
        let v = self.rotation * local_equatorial_to_unit_vector(lec);
        unit_vector_to_local_equatorial(&v)
    }
}
