//! CAHVOR: radial distortion about an arbitrary optical axis.
//!
//! # Mathematical Model
//!
//! Intrinsics: fx, fy, cx, cy, alpha, beta, r0, r1, r2.
//!
//! ```text
//! o  = (cos β sin α, sin β, cos β cos α)     distortion axis
//! ω  = p·o
//! τ  = |p|²/ω² − 1                           tan² of the off-axis angle
//! μ  = r0 + r1·τ + r2·τ²
//! p' = (1 + μ)·p − μ·ω·o
//! q  = pinhole(p')
//! ```

use nalgebra::{Matrix3, Matrix3x2, Vector2, Vector3};

use crate::ProjectionJacobians;
use crate::pinhole::{self, Core};

/// Distortion axis and its gradient with respect to (alpha, beta).
pub(crate) fn axis(alpha: f64, beta: f64) -> (Vector3<f64>, Matrix3x2<f64>) {
    let (sa, ca) = alpha.sin_cos();
    let (sb, cb) = beta.sin_cos();
    let o = Vector3::new(cb * sa, sb, cb * ca);
    #[rustfmt::skip]
    let do_dab = Matrix3x2::new(
        cb * ca, -sb * sa,
        0.0,     cb,
        -cb * sa, -sb * ca,
    );
    (o, do_dab)
}

pub(crate) fn project(
    p: &Vector3<f64>,
    intrinsics: &[f64],
    jacobians: Option<&mut ProjectionJacobians>,
) -> Vector2<f64> {
    let core = Core::from_intrinsics(intrinsics);
    let (alpha, beta) = (intrinsics[4], intrinsics[5]);
    let (r0, r1, r2) = (intrinsics[6], intrinsics[7], intrinsics[8]);

    let (o, do_dab) = axis(alpha, beta);
    let omega = p.dot(&o);
    let norm2 = p.norm_squared();
    let tau = norm2 / (omega * omega) - 1.0;
    let mu = r0 + r1 * tau + r2 * tau * tau;
    let pd = p * (1.0 + mu) - o * (mu * omega);

    let (u, du_dpd) = pinhole::normalize(&pd);

    if let Some(jac) = jacobians {
        let dmu_dtau = r1 + 2.0 * r2 * tau;
        let omega3 = omega * omega * omega;
        let dtau_dp = p * (2.0 / (omega * omega)) - o * (2.0 * norm2 / omega3);
        let dtau_do = -p * (2.0 * norm2 / omega3);
        let radial_dir = p - o * omega;

        let dpd_dp = Matrix3::identity() * (1.0 + mu) - o * o.transpose() * mu
            + radial_dir * (dtau_dp * dmu_dtau).transpose();
        let dpd_do = radial_dir * (dtau_do * dmu_dtau).transpose()
            - (o * p.transpose() + Matrix3::identity() * omega) * mu;
        let dpd_dab = dpd_do * do_dab;

        let dq_dpd = core.scale_rows(&du_dpd);
        jac.dq_dp = dq_dpd * dpd_dp;

        core.write_gradients(&u, jac);
        let dq_dab = dq_dpd * dpd_dab;
        jac.dq_dintrinsics.fixed_view_mut::<2, 2>(0, 4).copy_from(&dq_dab);

        let dq_dmu = dq_dpd * radial_dir;
        for (i, dmu) in [1.0, tau, tau * tau].into_iter().enumerate() {
            jac.dq_dintrinsics[(0, 6 + i)] = dq_dmu.x * dmu;
            jac.dq_dintrinsics[(1, 6 + i)] = dq_dmu.y * dmu;
        }
    }

    core.apply(&u)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distortion_is_pinhole() {
        let intrinsics = [700.0, 720.0, 300.0, 200.0, 0.01, -0.02, 0.0, 0.0, 0.0];
        let p = Vector3::new(0.2, 0.1, 1.3);
        let q = project(&p, &intrinsics, None);
        let q_pinhole = pinhole::project(&p, &intrinsics[..4], None);
        assert!((q - q_pinhole).norm() < 1e-12);
    }

    #[test]
    fn test_point_on_axis_is_undistorted() {
        let intrinsics = [700.0, 720.0, 300.0, 200.0, 0.05, -0.03, 0.1, 0.2, -0.05];
        let (o, _) = axis(0.05, -0.03);
        let p = o * 3.0;
        let q = project(&p, &intrinsics, None);
        let q_pinhole = pinhole::project(&p, &intrinsics[..4], None);
        assert!((q - q_pinhole).norm() < 1e-9);
    }

    #[test]
    fn test_axis_gradient_numerically() {
        let (a, b) = (0.3, -0.2);
        let (_, d) = axis(a, b);
        let eps = 1e-6;
        let num_a = (axis(a + eps, b).0 - axis(a - eps, b).0) / (2.0 * eps);
        let num_b = (axis(a, b + eps).0 - axis(a, b - eps).0) / (2.0 * eps);
        assert!((num_a - d.column(0)).norm() < 1e-8);
        assert!((num_b - d.column(1)).norm() < 1e-8);
    }
}
