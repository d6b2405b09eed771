use super::{
    calculate_local_sidereal_time, deg_to_rad, hours_to_deg, modulo, rad_to_deg, wrap_deg, Degrees,
};
use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Observer location. Latitude positive north, longitude positive east.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCoordinates {
    pub lat: Degrees,
    pub lon: Degrees,
}

/// Sky position. `ra` is right ascension in degrees, kept in (-180, 180].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquatorialCoordinates {
    pub ra: Degrees,
    pub dec: Degrees,
}

impl EquatorialCoordinates {
    pub fn new(ra: Degrees, dec: Degrees) -> Self {
        Self {
            ra: wrap_deg(ra),
            dec,
        }
    }
}

/// Position relative to the local meridian. `ha` is the hour angle in
/// degrees, positive west of the meridian.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEquatorialCoordinates {
    pub ha: Degrees,
    pub dec: Degrees,
}

impl LocalEquatorialCoordinates {
    pub fn new(ha: Degrees, dec: Degrees) -> Self {
        Self {
            ha: wrap_deg(ha),
            dec,
        }
    }
}

/// Horizontal position. Azimuth in [0, 360), measured from north through
/// east.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzimuthalCoordinates {
    pub alt: Degrees,
    pub azi: Degrees,
}

/// Which side of the pier the telescope tube sits on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PierSide {
    East,
    West,
}

/// Physical axis angles of the mount, relative to the index position
/// (counterweight down, tube toward the pole).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountCoordinates {
    pub ra_delta: Degrees,
    pub dec_delta: Degrees,
    pub side: PierSide,
}

pub fn equatorial_to_local_equatorial(
    eq: &EquatorialCoordinates,
    time: DateTime<Utc>,
    loc: &LocationCoordinates,
) -> LocalEquatorialCoordinates {
    let lst_deg = hours_to_deg(calculate_local_sidereal_time(time, loc.lon));
    LocalEquatorialCoordinates::new(lst_deg - eq.ra, eq.dec)
}

pub fn local_equatorial_to_equatorial(
    lec: &LocalEquatorialCoordinates,
    time: DateTime<Utc>,
    loc: &LocationCoordinates,
) -> EquatorialCoordinates {
    let lst_deg = hours_to_deg(calculate_local_sidereal_time(time, loc.lon));
    EquatorialCoordinates::new(lst_deg - lec.ha, lec.dec)
}

/// Map local-equatorial angles onto the two mount axes.
///
/// On the east side the axes read the hour angle and declination offsets
/// directly. On the west side the RA axis is flipped half a turn and the
/// declination axis reversed. `side = None` picks the side that keeps the
/// declination axis non-negative.
pub fn local_equatorial_to_mount(
    lec: &LocalEquatorialCoordinates,
    side: Option<PierSide>,
) -> MountCoordinates {
    let side = side.unwrap_or(if wrap_deg(lec.dec) < 0. {
        PierSide::West
    } else {
        PierSide::East
    });
    match side {
        PierSide::East => MountCoordinates {
            ra_delta: wrap_deg(lec.ha),
            dec_delta: wrap_deg(lec.dec),
            side,
        },
        PierSide::West => MountCoordinates {
            ra_delta: wrap_deg(lec.ha + 180.),
            dec_delta: -wrap_deg(lec.dec),
            side,
        },
    }
}

pub fn mount_to_local_equatorial(mc: &MountCoordinates) -> LocalEquatorialCoordinates {
    match mc.side {
        PierSide::East => LocalEquatorialCoordinates::new(mc.ra_delta, mc.dec_delta),
        PierSide::West => LocalEquatorialCoordinates::new(mc.ra_delta - 180., -mc.dec_delta),
    }
}

/// Unit vector of a local-equatorial direction. x toward (ha=0, dec=0),
/// y toward ha=90, z toward the pole.
pub fn local_equatorial_to_unit_vector(lec: &LocalEquatorialCoordinates) -> Vector3<f64> {
    let ha = deg_to_rad(lec.ha);
    let dec = deg_to_rad(lec.dec);
    Vector3::new(dec.cos() * ha.cos(), dec.cos() * ha.sin(), dec.sin())
}

pub fn unit_vector_to_local_equatorial(v: &Vector3<f64>) -> LocalEquatorialCoordinates {
    LocalEquatorialCoordinates::new(
        rad_to_deg(v.y.atan2(v.x)),
        rad_to_deg(v.z.clamp(-1., 1.).asin()),
    )
}

/// Rotate an equatorial-frame vector into the horizontal frame. The matrix
/// is symmetric, so it is its own inverse.
fn equatorial_to_horizontal_vector(v: &Vector3<f64>, lat: Degrees) -> Vector3<f64> {
    let lat = deg_to_rad(lat);
    Vector3::new(
        -lat.sin() * v.x + lat.cos() * v.z,
        -v.y,
        lat.cos() * v.x + lat.sin() * v.z,
    )
}

pub fn local_equatorial_to_azimuthal(
    lec: &LocalEquatorialCoordinates,
    loc: &LocationCoordinates,
) -> AzimuthalCoordinates {
    let h = equatorial_to_horizontal_vector(&local_equatorial_to_unit_vector(lec), loc.lat);
    AzimuthalCoordinates {
        alt: rad_to_deg(h.z.clamp(-1., 1.).asin()),
        azi: modulo(rad_to_deg(h.y.atan2(h.x)), 360.),
    }
}

pub fn azimuthal_to_local_equatorial(
    az: &AzimuthalCoordinates,
    loc: &LocationCoordinates,
) -> LocalEquatorialCoordinates {
    let alt = deg_to_rad(az.alt);
    let azi = deg_to_rad(az.azi);
    let h = Vector3::new(alt.cos() * azi.cos(), alt.cos() * azi.sin(), alt.sin());
    unit_vector_to_local_equatorial(&equatorial_to_horizontal_vector(&h, loc.lat))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOC: LocationCoordinates = LocationCoordinates {
        lat: 42.0,
        lon: -73.0,
    };

    #[test]
    fn pole_maps_to_polar_altitude() {
        let pole = LocalEquatorialCoordinates::new(0., 90.);
        let az = local_equatorial_to_azimuthal(&pole, &LOC);
        assert_float_absolute_eq!(az.alt, LOC.lat, 1E-9);
        assert_float_absolute_eq!(az.azi, 0., 1E-9);
    }

    #[test]
    fn meridian_equator_is_due_south() {
        let p = LocalEquatorialCoordinates::new(0., 0.);
        let az = local_equatorial_to_azimuthal(&p, &LOC);
        assert_float_absolute_eq!(az.alt, 90. - LOC.lat, 1E-9);
        assert_float_absolute_eq!(az.azi, 180., 1E-9);
    }

    #[test]
    fn azimuthal_round_trip() {
        for &(ha, dec) in &[
            (0., 0.),
            (35., 20.),
            (-110., 65.),
            (170., -40.),
            (-15., -75.),
        ] {
            let lec = LocalEquatorialCoordinates::new(ha, dec);
            let back = azimuthal_to_local_equatorial(&local_equatorial_to_azimuthal(&lec, &LOC), &LOC);
            assert_float_absolute_eq!(back.ha, lec.ha, 1E-7);
            assert_float_absolute_eq!(back.dec, lec.dec, 1E-7);
        }
    }

    #[test]
    fn pier_side_selection() {
        let north = LocalEquatorialCoordinates::new(30., 20.);
        let mc = local_equatorial_to_mount(&north, None);
        assert_eq!(mc.side, PierSide::East);
        assert_float_absolute_eq!(mc.ra_delta, 30.);
        assert_float_absolute_eq!(mc.dec_delta, 20.);

        let south = LocalEquatorialCoordinates::new(30., -20.);
        let mc = local_equatorial_to_mount(&south, None);
        assert_eq!(mc.side, PierSide::West);
        assert_float_absolute_eq!(mc.ra_delta, -150.);
        assert_float_absolute_eq!(mc.dec_delta, 20.);
    }

    #[test]
    fn mount_round_trip_both_sides() {
        let lec = LocalEquatorialCoordinates::new(-50., 33.);
        for side in [PierSide::East, PierSide::West] {
            let back = mount_to_local_equatorial(&local_equatorial_to_mount(&lec, Some(side)));
            assert_float_absolute_eq!(back.ha, lec.ha, 1E-9);
            assert_float_absolute_eq!(back.dec, lec.dec, 1E-9);
        }
    }
}
