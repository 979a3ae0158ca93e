//! CAHVORE: CAHVOR with a moving entrance pupil.
//!
//! Intrinsics: fx, fy, cx, cy, alpha, beta, r0, r1, r2, e0, e1, e2. The
//! model configuration carries the `linearity` l.
//!
//! ```text
//! ζ = p·o,  λ⃗ = p − ζ·o,  λ = |λ⃗|
//! solve  ζ·sinθ − λ·cosθ − (θ − sinθ)·(e0 + e1θ² + e2θ⁴) = 0   for θ
//! χ  = tan(lθ)/l  (l > 0),  sin(lθ)/l  (l < 0),  θ  (l = 0)
//! μ  = r0 + r1·χ² + r2·χ⁴
//! p' = o + (1 + μ)·χ·λ̂
//! q  = pinhole(p')
//! ```
//!
//! The model is noncentral and has no gradients, so it can be projected but
//! not optimized.

use nalgebra::{Vector2, Vector3};

use crate::cahvor::axis;
use crate::pinhole::{self, Core};
use crate::{LensModelError, LensModelResult};

const THETA_TOLERANCE: f64 = 1e-8;
const MAX_THETA_ITERATIONS: usize = 100;
const LINEARITY_EPS: f64 = 1e-15;

pub(crate) fn project(
    p: &Vector3<f64>,
    intrinsics: &[f64],
    linearity: f64,
) -> LensModelResult<Vector2<f64>> {
    let core = Core::from_intrinsics(intrinsics);
    let (o, _) = axis(intrinsics[4], intrinsics[5]);
    let (r0, r1, r2) = (intrinsics[6], intrinsics[7], intrinsics[8]);
    let (e0, e1, e2) = (intrinsics[9], intrinsics[10], intrinsics[11]);

    let zeta = p.dot(&o);
    let lambda_vec = p - o * zeta;
    let lambda = lambda_vec.norm();

    let mut theta = lambda.atan2(zeta);
    let mut converged = false;
    for _ in 0..MAX_THETA_ITERATIONS {
        let (s, c) = theta.sin_cos();
        let t2 = theta * theta;
        let e = e0 + e1 * t2 + e2 * t2 * t2;
        let de = 2.0 * e1 * theta + 4.0 * e2 * t2 * theta;
        let f = zeta * s - lambda * c - (theta - s) * e;
        let df = zeta * c + lambda * s - (1.0 - c) * e - (theta - s) * de;
        if df == 0.0 {
            break;
        }
        let dtheta = f / df;
        theta -= dtheta;
        if dtheta.abs() < THETA_TOLERANCE {
            converged = true;
            break;
        }
    }
    if !converged || !theta.is_finite() {
        return Err(LensModelError::NumericalError(format!(
            "CAHVORE entrance-pupil angle did not converge for point {:?}",
            p.as_slice()
        )));
    }

    let chi = if linearity > LINEARITY_EPS {
        (linearity * theta).tan() / linearity
    } else if linearity < -LINEARITY_EPS {
        (linearity * theta).sin() / linearity
    } else {
        theta
    };
    let chi2 = chi * chi;
    let mu = r0 + r1 * chi2 + r2 * chi2 * chi2;

    let pd = if lambda > 0.0 {
        o + lambda_vec * ((1.0 + mu) * chi / lambda)
    } else {
        o
    };
    let (u, _) = pinhole::normalize(&pd);
    Ok(core.apply(&u))
}
