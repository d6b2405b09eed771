use super::coords::{
    local_equatorial_to_mount, AzimuthalCoordinates, LocalEquatorialCoordinates,
    LocationCoordinates, MountCoordinates, PierSide,
};
use super::transform::{apply_cone_error, MisalignmentTransformation};
use super::{wrap_deg, Degrees};
use crate::errors::{ControlError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

const MAX_ITERATIONS: usize = 50;
const STEP_EPSILON: f64 = 1e-10;
const JACOBIAN_DELTA: f64 = 1e-6;
const MAX_RMS_RESIDUAL: Degrees = 1.0;

/// Pointing model of an imperfectly set up mount: where the polar axis
/// really points, the index offset of each axis, and the cone angle of the
/// tube. `residual` is the RMS pointing error of the solve that produced it,
/// in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqCalibration {
    pub polar_axis: AzimuthalCoordinates,
    pub offset_ra: Degrees,
    pub offset_dec: Degrees,
    pub cone: Degrees,
    pub residual: Degrees,
}

impl EqCalibration {
    /// The calibration of a perfectly aligned mount at the given latitude.
    pub fn identity(lat: Degrees) -> Self {
        Self {
            polar_axis: AzimuthalCoordinates { alt: lat, azi: 0. },
            offset_ra: 0.,
            offset_dec: 0.,
            cone: 0.,
            residual: 0.,
        }
    }
}

/// One measured star: its true local-equatorial position at the moment of
/// measurement, paired with the axis angles the mount read.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StarReference {
    pub sky: LocalEquatorialCoordinates,
    pub measured: MountCoordinates,
}

/// Forward pointing model: the axis angles a calibrated mount must take to
/// aim at `sky` on the given pier side.
pub fn predict_mount(
    calib: &EqCalibration,
    sky: &LocalEquatorialCoordinates,
    side: PierSide,
    loc: &LocationCoordinates,
) -> MountCoordinates {
    let t = MisalignmentTransformation::from_polar_axis(&calib.polar_axis, loc);
    let m = apply_cone_error(&t.apply(sky), calib.cone);
    let mc = local_equatorial_to_mount(&m, Some(side));
    MountCoordinates {
        ra_delta: wrap_deg(mc.ra_delta + calib.offset_ra),
        dec_delta: mc.dec_delta + calib.offset_dec,
        side,
    }
}

/* Parameter vector layout: [pa_alt, pa_azi, offset_ra, offset_dec, cone] */

fn pack(calib: &EqCalibration) -> [f64; 5] {
    [
        calib.polar_axis.alt,
        calib.polar_axis.azi,
        calib.offset_ra,
        calib.offset_dec,
        calib.cone,
    ]
}

fn unpack(p: &[f64; 5], residual: Degrees) -> EqCalibration {
    EqCalibration {
        polar_axis: AzimuthalCoordinates {
            alt: p[0],
            azi: p[1],
        },
        offset_ra: p[2],
        offset_dec: p[3],
        cone: p[4],
        residual,
    }
}

fn residuals(p: &[f64; 5], stars: &[StarReference], loc: &LocationCoordinates) -> DVector<f64> {
    let calib = unpack(p, 0.);
    let mut r = DVector::zeros(2 * stars.len());
    for (i, star) in stars.iter().enumerate() {
        let predicted = predict_mount(&calib, &star.sky, star.measured.side, loc);
        r[2 * i] = wrap_deg(star.measured.ra_delta - predicted.ra_delta);
        r[2 * i + 1] = star.measured.dec_delta - predicted.dec_delta;
    }
    r
}

/// Levenberg-Marquardt least squares over the masked calibration
/// parameters, with a forward-difference Jacobian.
fn solve(
    initial: &EqCalibration,
    stars: &[StarReference],
    loc: &LocationCoordinates,
    free: [bool; 5],
) -> Result<EqCalibration> {
    let free_idx: Vec<usize> = (0..5).filter(|&i| free[i]).collect();
    let n_res = 2 * stars.len();
    if free_idx.len() > n_res {
        return Err(ControlError::parameter(format!(
            "{} alignment stars cannot constrain {} parameters",
            stars.len(),
            free_idx.len()
        )));
    }

    let mut p = pack(initial);
    let mut r = residuals(&p, stars, loc);
    let mut cost = r.norm_squared();
    let mut lambda = 1e-3;

    for _ in 0..MAX_ITERATIONS {
        let mut jac = DMatrix::zeros(n_res, free_idx.len());
        for (col, &pi) in free_idx.iter().enumerate() {
            let mut bumped = p;
            bumped[pi] += JACOBIAN_DELTA;
            let rb = residuals(&bumped, stars, loc);
            jac.set_column(col, &((rb - &r) / JACOBIAN_DELTA));
        }

        let jt = jac.transpose();
        let mut normal = &jt * &jac;
        let gradient = &jt * &r;
        for i in 0..free_idx.len() {
            normal[(i, i)] *= 1. + lambda;
        }

        let step = match normal.svd(true, true).solve(&-gradient, 1e-12) {
            Ok(step) => step,
            Err(_) => {
                lambda *= 10.;
                continue;
            }
        };

        let mut trial = p;
        for (col, &pi) in free_idx.iter().enumerate() {
            trial[pi] += step[col];
        }
        let r_trial = residuals(&trial, stars, loc);
        let cost_trial = r_trial.norm_squared();

        if cost_trial.is_finite() && cost_trial < cost {
            p = trial;
            r = r_trial;
            cost = cost_trial;
            lambda = (lambda / 10.).max(1e-12);
            if step.norm() < STEP_EPSILON {
                break;
            }
        } else {
            lambda *= 10.;
            if lambda > 1e8 {
                break;
            }
        }
    }

    let rms = (cost / n_res as f64).sqrt();
    if !rms.is_finite() || rms > MAX_RMS_RESIDUAL {
        return Err(ControlError::AlignmentDivergence { residual: rms });
    }
    Ok(unpack(&p, rms))
}

/// Closed-form one-star solve: keep the polar axis and cone from `base` and
/// absorb the whole pointing error into the index offsets.
pub fn align_one_star_offset(
    star: &StarReference,
    loc: &LocationCoordinates,
    base: &EqCalibration,
) -> EqCalibration {
    let mut zeroed = *base;
    zeroed.offset_ra = 0.;
    zeroed.offset_dec = 0.;
    let predicted = predict_mount(&zeroed, &star.sky, star.measured.side, loc);
    EqCalibration {
        offset_ra: wrap_deg(star.measured.ra_delta - predicted.ra_delta),
        offset_dec: star.measured.dec_delta - predicted.dec_delta,
        residual: 0.,
        ..*base
    }
}

/// One-star polar-axis solve, with offsets and cone held at `base`.
pub fn align_one_star(
    star: &StarReference,
    loc: &LocationCoordinates,
    base: &EqCalibration,
) -> Result<EqCalibration> {
    solve(base, &[*star], loc, [true, true, false, false, false])
}

/// Two-star solve for the polar axis and both index offsets. The cone angle
/// stays at its `base` value; two stars cannot separate it from the offsets.
/// Noise-free measurements are reproduced to the solver's step tolerance.
pub fn align_two_stars(
    stars: &[StarReference; 2],
    loc: &LocationCoordinates,
    base: &EqCalibration,
) -> Result<EqCalibration> {
    solve(base, stars, loc, [true, true, true, true, false])
}

/// Full solve over all five model parameters. Needs at least three stars;
/// one and two stars fall back to the reduced solves. The two-star result
/// seeds the full fit so it starts near the optimum.
pub fn align_n_stars(
    stars: &[StarReference],
    loc: &LocationCoordinates,
    base: &EqCalibration,
) -> Result<EqCalibration> {
    match stars {
        [] => Err(ControlError::parameter("no alignment stars")),
        [star] => Ok(align_one_star_offset(star, loc, base)),
        [a, b] => align_two_stars(&[*a, *b], loc, base),
        _ => {
            let seed = align_two_stars(&[stars[0], stars[1]], loc, base).unwrap_or(*base);
            solve(&seed, stars, loc, [true, true, true, true, true])
        }
    }
}
