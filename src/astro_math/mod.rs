pub mod align;
pub mod coords;
pub mod transform;

use chrono::{Datelike, Timelike};
use polynomials::poly;
use std::f64::consts::{PI, TAU};

pub type Hours = f64;
pub type Degrees = f64;
pub type Radians = f64;

/// Sidereal tracking rate in degrees per second.
pub const SIDEREAL_SPEED: Degrees = 0.00417807462;

pub fn deg_to_rad(degrees: Degrees) -> Radians {
    PI * degrees / 180.
}

pub fn rad_to_deg(rad: Radians) -> Degrees {
    180. * rad / PI
}

pub fn hours_to_rad(hours: Hours) -> Radians {
    PI * hours / 12.
}

pub fn rad_to_hours(rad: Radians) -> Hours {
    12. * rad / PI
}

pub fn deg_to_hours(deg: Degrees) -> Hours {
    deg / 15.
}

pub fn hours_to_deg(hours: Hours) -> Degrees {
    hours * 15.
}

// Convert hms to hours or dms to degrees
pub fn ms_to_dec(d: u32, minutes: u32, seconds: f64) -> f64 {
    (d as f64) + (minutes as f64) / 60. + seconds / 3600.
}

pub fn modulo(val: f64, base: f64) -> f64 {
    ((val % base) + base) % base
}

/// Reduce an angle to the half-open range (-180, 180].
pub fn wrap_deg(deg: Degrees) -> Degrees {
    let r = modulo(deg, 360.);
    if r > 180. {
        r - 360.
    } else {
        r
    }
}

/// Calculates the Julian Date of a time
/// see https://scienceworld.wolfram.com/astronomy/JulianDate.html
fn calc_jd(time: chrono::DateTime<chrono::Utc>) -> Hours {
    let y = time.year() as f64;
    let m = time.month() as f64;
    let d = time.day() as f64;

    let mut jd = 367. * y;
    jd -= f64::floor(7. * (y + f64::floor((m + 9.) / 12.)) / 4.);
    jd -= f64::floor(3. * (f64::floor((y + (m - 9.) / 7.) / 100.) + 1.) / 4.);
    jd += f64::floor(275. * m / 9.);
    jd += d;
    jd += 1721028.5;
    jd + ms_to_dec(time.hour(), time.minute(), time.second() as f64) / 24.
}

// see https://thecynster.home.blog/2019/11/04/calculating-sidereal-time/
pub fn calculate_greenwich_sidereal_time(time: chrono::DateTime<chrono::Utc>) -> Hours {
    // The result will be off by the number of leap seconds different from this on the date given
    const LEAP_SECOND_TOTAL: u32 = 27;

    let jd_utc = calc_jd(time);

    let du = jd_utc - 2451545.0;
    let theta = rad_to_hours(modulo(
        TAU * (0.779_057_273_264f64 + 1.002_737_811_911_354_5f64 * du),
        TAU,
    ));

    let poly = poly![
        0.014506,
        4612.156534,
        1.3915817,
        -0.00000044,
        -0.000029956,
        -0.0000000368,
    ];
    let jd_tt = jd_utc + ((LEAP_SECOND_TOTAL as f64 + 32.184) / 3600.) / 24.; // Hours
    let t = (jd_tt - 2451545.0) / 36525.; // years

    let gmstp = deg_to_hours(modulo(poly.eval(t).unwrap() / 3600., 360.));

    modulo(theta + gmstp, 24.)
}

/// longitude in degrees
/// returns hours
pub fn calculate_local_sidereal_time(
    time: chrono::DateTime<chrono::Utc>,
    longitude: Degrees,
) -> Hours {
    let greenwich_sidereal_time = calculate_greenwich_sidereal_time(time);
    modulo(greenwich_sidereal_time + deg_to_hours(longitude), 24.)
}

/// longitude in degrees, ra in hours
/// returns hours
pub fn calculate_hour_angle(
    time: chrono::DateTime<chrono::Utc>,
    longitude: Degrees,
    ra: Hours,
) -> Hours {
    modulo(calculate_local_sidereal_time(time, longitude) - ra, 24.)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_deg_to_rad() {
        assert_eq!(deg_to_rad(0.), 0.);
        assert_float_relative_eq!(deg_to_rad(55.), 0.9599311);
        assert_float_relative_eq!(deg_to_rad(-10.), -0.1745329);
    }

    #[test]
    fn test_rad_to_deg() {
        assert_eq!(rad_to_deg(0.), 0.);
        assert_float_relative_eq!(rad_to_deg(1.), 57.29578);
        assert_float_relative_eq!(rad_to_deg(-8.), -458.3662);
    }

    #[test]
    fn test_hours_deg() {
        assert_float_relative_eq!(deg_to_hours(-8.), -0.53333333333333333);
        assert_float_relative_eq!(hours_to_deg(1.), 15.);
        assert_float_relative_eq!(hours_to_rad(1.), 0.261799, 1E-4);
        assert_float_relative_eq!(rad_to_hours(1.), 3.8197, 1E-4);
    }

    #[test]
    fn test_ms_to_dec() {
        assert_eq!(ms_to_dec(0, 0, 0.), 0.);
        assert_float_relative_eq!(ms_to_dec(1, 1, 1.), 1.0169444);
        assert_float_relative_eq!(-ms_to_dec(8, 8, 8.8), -8.1357778);
    }

    #[test]
    fn test_calculate_greenwich_sidereal_time() {
        assert_float_relative_eq!(
            calculate_greenwich_sidereal_time(Utc.ymd(1969, 1, 6).and_hms(1, 5, 0)),
            8.1127421203,
            1E-4
        );
        assert_float_relative_eq!(
            calculate_greenwich_sidereal_time(Utc.ymd(2021, 1, 30).and_hms(21, 20, 0)),
            6.0219108930,
            1E-4
        );
    }

    #[test]
    fn test_calculate_local_sidereal_time() {
        assert_float_relative_eq!(
            calculate_local_sidereal_time(Utc.ymd(1969, 1, 6).and_hms(1, 5, 0), -55.5),
            4.4127385800,
            1E-4
        );
        assert_float_relative_eq!(
            calculate_local_sidereal_time(Utc.ymd(2021, 1, 30).and_hms(21, 20, 0), 90.),
            12.0219108930,
            1E-4
        );
    }

    #[test]
    fn test_calculate_hour_angle() {
        assert_float_relative_eq!(
            calculate_hour_angle(Utc.ymd(1969, 1, 6).and_hms(1, 5, 0), -55.5, -4.4),
            8.8127385800,
            1E-4
        );
        assert_float_relative_eq!(
            calculate_hour_angle(Utc.ymd(2021, 1, 30).and_hms(21, 20, 0), 90., 12.),
            0.0219108930,
            1E-4
        );
    }

    #[test]
    fn test_modulo() {
        assert_eq!(modulo(std::f64::consts::TAU, std::f64::consts::PI), 0.);
        assert_eq!(modulo(-365., 360.), 355.);
    }

    #[test]
    fn test_wrap_deg() {
        assert_eq!(wrap_deg(0.), 0.);
        assert_eq!(wrap_deg(180.), 180.);
        assert_eq!(wrap_deg(181.), -179.);
        assert_eq!(wrap_deg(-190.), 170.);
        assert_eq!(wrap_deg(725.), 5.);
    }
}
