//! Residuals of points observed by several cameras without a position state.
//!
//! Each pair of observations of the same point gives two rays in the
//! reference frame. The point position is implied by the rays, so it is never
//! stored; the residuals measure how far the rays are from intersecting and
//! whether the implied ranges respect the configured bounds.
//!
//! With unit ray directions `d₀`, `d₁` from centres `c₀`, `c₁` and baseline
//! `t = c₁ − c₀`:
//!
//! ```text
//! coplanarity  e = d₀ · (t̂ × d₁)
//! ranges       s₀ = (d₀·t − b·d₁·t)/(1 − b²),  s₁ = (b·d₀·t − d₁·t)/(1 − b²),  b = d₀·d₁
//! penalty      h(s) = max(0, min − s) + max(0, s − max)
//! residuals    [ w·f·e,  w·f·(h(s₀) + h(s₁)) ]
//! ```
//!
//! `f` is the mean focal length of the first camera, which puts the
//! residuals in roughly pixel units.

use lenscal_lensmodels::{LensModel, unproject_point_with_gradients};
use lenscal_poses::{Rt, rotate_point};
use nalgebra::{Matrix2x6, Matrix2xX, Matrix3, Matrix3xX, RowVector3, Vector2, Vector3};

use crate::error::CalibrationResult;
use crate::problem::ProblemConstants;

const DEGENERATE_EPS: f64 = 1e-12;

/// One observation feeding a triangulated pair.
#[derive(Debug, Clone, Copy)]
pub struct RayObservation<'a> {
    pub intrinsics: &'a [f64],
    /// Camera pose; identity for a camera at the reference frame
    pub rt_cam_ref: Rt,
    pub q: Vector2<f64>,
}

/// Gradients of the two pair residuals.
#[derive(Debug, Clone, PartialEq)]
pub struct PairGradients {
    /// Per observation, with respect to its intrinsics
    pub dintrinsics: [Matrix2xX<f64>; 2],
    /// Per observation, with respect to its `rt_cam_ref`
    pub drt: [Matrix2x6<f64>; 2],
}

impl PairGradients {
    pub fn zeros(nintrinsics: usize) -> Self {
        Self {
            dintrinsics: [Matrix2xX::zeros(nintrinsics), Matrix2xX::zeros(nintrinsics)],
            drt: [Matrix2x6::zeros(), Matrix2x6::zeros()],
        }
    }
}

/// A ray in the reference frame with its gradients.
struct Ray {
    centre: Vector3<f64>,
    direction: Vector3<f64>,
    dcentre_dr: Matrix3<f64>,
    dcentre_dt: Matrix3<f64>,
    /// d(direction)/dw, already normalized
    ddirection_dw: Matrix3<f64>,
    dw_dr: Matrix3<f64>,
    dw_dintrinsics: Matrix3xX<f64>,
}

fn ray(lensmodel: &LensModel, observation: &RayObservation) -> CalibrationResult<Ray> {
    let unprojected = unproject_point_with_gradients(&observation.q, lensmodel, observation.intrinsics)?;
    let r_inv = -observation.rt_cam_ref.r;

    // R(−r) = Rᵀ, so d/dr = −d/d(−r)
    let mut dw_dminus_r = Matrix3::zeros();
    let mut rotation_t = Matrix3::zeros();
    let w = rotate_point(&r_inv, &unprojected.v, Some(&mut dw_dminus_r), Some(&mut rotation_t));

    let mut dct_dminus_r = Matrix3::zeros();
    let centre = -rotate_point(&r_inv, &observation.rt_cam_ref.t, Some(&mut dct_dminus_r), None);

    let norm = w.norm();
    let direction = w / norm;
    Ok(Ray {
        centre,
        direction,
        dcentre_dr: dct_dminus_r,
        dcentre_dt: -rotation_t,
        ddirection_dw: (Matrix3::identity() - direction * direction.transpose()) / norm,
        dw_dr: -dw_dminus_r,
        dw_dintrinsics: rotation_t * unprojected.dv_dintrinsics,
    })
}

fn range_penalty(s: f64, constants: &ProblemConstants) -> (f64, f64) {
    if s < constants.point_min_range {
        (constants.point_min_range - s, -1.0)
    } else if s > constants.point_max_range {
        (s - constants.point_max_range, 1.0)
    } else {
        (0.0, 0.0)
    }
}

/// Residuals of one observation pair, in the order
/// `[coplanarity, range penalty]`.
///
/// `weight` scales both residuals; pass the mean of the two observation
/// weights.
pub fn triangulated_pair_residuals(
    lensmodel: &LensModel,
    observations: [&RayObservation; 2],
    weight: f64,
    constants: &ProblemConstants,
    gradients: Option<&mut PairGradients>,
) -> CalibrationResult<Vector2<f64>> {
    let rays = [ray(lensmodel, observations[0])?, ray(lensmodel, observations[1])?];
    let (d0, d1) = (rays[0].direction, rays[1].direction);
    let t = rays[1].centre - rays[0].centre;

    // Gradients of the unscaled residuals with respect to d0, d1 and t
    let mut dphi_dd0 = [RowVector3::zeros(); 2];
    let mut dphi_dd1 = [RowVector3::zeros(); 2];
    let mut dphi_dt = [RowVector3::zeros(); 2];

    let tnorm = t.norm();
    let coplanarity = if tnorm < DEGENERATE_EPS {
        0.0
    } else {
        let that = t / tnorm;
        let dthat_dt = (Matrix3::identity() - that * that.transpose()) / tnorm;
        dphi_dd0[0] = that.cross(&d1).transpose();
        dphi_dd1[0] = d0.cross(&that).transpose();
        dphi_dt[0] = d1.cross(&d0).transpose() * dthat_dt;
        d0.dot(&that.cross(&d1))
    };

    let b = d0.dot(&d1);
    let denominator = 1.0 - b * b;
    let range = if denominator < DEGENERATE_EPS {
        0.0
    } else {
        let d = d0.dot(&t);
        let e = d1.dot(&t);
        let s0 = (d - b * e) / denominator;
        let s1 = (b * d - e) / denominator;
        let (h0, dh0) = range_penalty(s0, constants);
        let (h1, dh1) = range_penalty(s1, constants);

        let ds0_dd0 = (t - e * d1 + 2.0 * b * s0 * d1) / denominator;
        let ds0_dd1 = (-e * d0 - b * t + 2.0 * b * s0 * d0) / denominator;
        let ds0_dt = (d0 - b * d1) / denominator;
        let ds1_dd0 = (d * d1 + b * t + 2.0 * b * s1 * d1) / denominator;
        let ds1_dd1 = (d * d0 - t + 2.0 * b * s1 * d0) / denominator;
        let ds1_dt = (b * d0 - d1) / denominator;

        dphi_dd0[1] = (dh0 * ds0_dd0 + dh1 * ds1_dd0).transpose();
        dphi_dd1[1] = (dh0 * ds0_dd1 + dh1 * ds1_dd1).transpose();
        dphi_dt[1] = (dh0 * ds0_dt + dh1 * ds1_dt).transpose();
        h0 + h1
    };

    let focal = 0.5 * (observations[0].intrinsics[0] + observations[0].intrinsics[1]);
    let scale = weight * focal;
    let phi = Vector2::new(coplanarity, range);

    if let Some(jac) = gradients {
        let dphi_dd = [dphi_dd0, dphi_dd1];
        // t = c1 − c0
        let sign = [-1.0, 1.0];
        for k in 0..2 {
            let ray = &rays[k];
            jac.dintrinsics[k] = Matrix2xX::zeros(observations[k].intrinsics.len());
            for row in 0..2 {
                let dphi_dw = dphi_dd[k][row] * ray.ddirection_dw;
                let dphi_dc = sign[k] * dphi_dt[row];
                let dr = dphi_dw * ray.dw_dr + dphi_dc * ray.dcentre_dr;
                let dt = dphi_dc * ray.dcentre_dt;
                for c in 0..3 {
                    jac.drt[k][(row, c)] = scale * dr[c];
                    jac.drt[k][(row, c + 3)] = scale * dt[c];
                }
                let di = dphi_dw * &ray.dw_dintrinsics;
                for c in 0..di.ncols() {
                    jac.dintrinsics[k][(row, c)] = scale * di[c];
                }
            }
        }
        // The scale depends on the focal lengths of the first camera
        for row in 0..2 {
            jac.dintrinsics[0][(row, 0)] += 0.5 * weight * phi[row];
            jac.dintrinsics[0][(row, 1)] += 0.5 * weight * phi[row];
        }
    }

    Ok(scale * phi)
}

/// Midpoint of the closest approach of two observation rays, in the
/// reference frame. `None` for parallel rays.
pub fn triangulate_pair(
    lensmodel: &LensModel,
    observations: [&RayObservation; 2],
) -> CalibrationResult<Option<Vector3<f64>>> {
    let rays = [ray(lensmodel, observations[0])?, ray(lensmodel, observations[1])?];
    let (d0, d1) = (rays[0].direction, rays[1].direction);
    let t = rays[1].centre - rays[0].centre;
    let b = d0.dot(&d1);
    let denominator = 1.0 - b * b;
    if denominator < DEGENERATE_EPS {
        return Ok(None);
    }
    let s0 = (d0.dot(&t) - b * d1.dot(&t)) / denominator;
    let s1 = (b * d0.dot(&t) - d1.dot(&t)) / denominator;
    Ok(Some(0.5 * (rays[0].centre + s0 * d0 + rays[1].centre + s1 * d1)))
}
