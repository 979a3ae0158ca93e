//! OpenCV distortion models (4, 5, 8 and 12 coefficients).
//!
//! # Mathematical Model
//!
//! For normalized coordinates x = px/z, y = py/z and r² = x² + y²:
//!
//! ```text
//! radial = (1 + k0·r² + k1·r⁴ + k4·r⁶) / (1 + k5·r² + k6·r⁴ + k7·r⁶)
//! xd = x·radial + 2·k2·x·y + k3·(r² + 2x²) + k8·r² + k9·r⁴
//! yd = y·radial + k2·(r² + 2y²) + 2·k3·x·y + k10·r² + k11·r⁴
//! q  = (fx·xd + cx, fy·yd + cy)
//! ```
//!
//! OPENCV4 carries k0..k3, OPENCV5 adds k4, OPENCV8 adds the rational
//! denominator k5..k7, and OPENCV12 adds the thin-prism terms k8..k11.
//! Coefficients a model does not carry are zero.

use nalgebra::{Matrix2, Vector2, Vector3};

use crate::ProjectionJacobians;
use crate::pinhole::{self, Core};

struct Coefficients<'a> {
    k: &'a [f64],
}

impl Coefficients<'_> {
    fn get(&self, i: usize) -> f64 {
        self.k.get(i).copied().unwrap_or(0.0)
    }
}

pub(crate) fn project(
    p: &Vector3<f64>,
    intrinsics: &[f64],
    jacobians: Option<&mut ProjectionJacobians>,
) -> Vector2<f64> {
    let core = Core::from_intrinsics(intrinsics);
    let nk = intrinsics.len() - 4;
    let k = Coefficients { k: &intrinsics[4..] };

    let (xy, dxy_dp) = pinhole::normalize(p);
    let (x, y) = (xy.x, xy.y);
    let r2 = x * x + y * y;
    let r4 = r2 * r2;
    let r6 = r4 * r2;

    let num = 1.0 + k.get(0) * r2 + k.get(1) * r4 + k.get(4) * r6;
    let den = 1.0 + k.get(5) * r2 + k.get(6) * r4 + k.get(7) * r6;
    let radial = num / den;

    let prism_x = k.get(8) * r2 + k.get(9) * r4;
    let prism_y = k.get(10) * r2 + k.get(11) * r4;

    let xd = x * radial + 2.0 * k.get(2) * x * y + k.get(3) * (r2 + 2.0 * x * x) + prism_x;
    let yd = y * radial + k.get(2) * (r2 + 2.0 * y * y) + 2.0 * k.get(3) * x * y + prism_y;
    let distorted = Vector2::new(xd, yd);

    if let Some(jac) = jacobians {
        let dnum_dr2 = k.get(0) + 2.0 * k.get(1) * r2 + 3.0 * k.get(4) * r4;
        let dden_dr2 = k.get(5) + 2.0 * k.get(6) * r2 + 3.0 * k.get(7) * r4;
        let dradial_dr2 = (dnum_dr2 * den - num * dden_dr2) / (den * den);
        let dprism_x = k.get(8) + 2.0 * k.get(9) * r2;
        let dprism_y = k.get(10) + 2.0 * k.get(11) * r2;

        let dxd_dx = radial
            + 2.0 * x * x * dradial_dr2
            + 2.0 * k.get(2) * y
            + 6.0 * k.get(3) * x
            + 2.0 * x * dprism_x;
        let dxd_dy =
            2.0 * x * y * dradial_dr2 + 2.0 * k.get(2) * x + 2.0 * k.get(3) * y + 2.0 * y * dprism_x;
        let dyd_dx =
            2.0 * x * y * dradial_dr2 + 2.0 * k.get(2) * x + 2.0 * k.get(3) * y + 2.0 * x * dprism_y;
        let dyd_dy = radial
            + 2.0 * y * y * dradial_dr2
            + 6.0 * k.get(2) * y
            + 2.0 * k.get(3) * x
            + 2.0 * y * dprism_y;
        let dd_dxy = Matrix2::new(dxd_dx, dxd_dy, dyd_dx, dyd_dy);
        jac.dq_dp = core.scale_rows(&(dd_dxy * dxy_dp));

        core.write_gradients(&distorted, jac);

        // dxd/dk, dyd/dk in normalized units
        let dk: [(f64, f64); 12] = [
            (x * r2 / den, y * r2 / den),
            (x * r4 / den, y * r4 / den),
            (2.0 * x * y, r2 + 2.0 * y * y),
            (r2 + 2.0 * x * x, 2.0 * x * y),
            (x * r6 / den, y * r6 / den),
            (-x * radial * r2 / den, -y * radial * r2 / den),
            (-x * radial * r4 / den, -y * radial * r4 / den),
            (-x * radial * r6 / den, -y * radial * r6 / den),
            (r2, 0.0),
            (r4, 0.0),
            (0.0, r2),
            (0.0, r4),
        ];
        for (i, (dx, dy)) in dk.iter().take(nk).enumerate() {
            jac.dq_dintrinsics[(0, 4 + i)] = core.fx * dx;
            jac.dq_dintrinsics[(1, 4 + i)] = core.fy * dy;
        }
    }

    core.apply(&distorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distortion_is_pinhole() {
        let intrinsics = [800.0, 810.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let p = Vector3::new(0.4, -0.3, 1.5);
        let q = project(&p, &intrinsics, None);
        let q_pinhole = pinhole::project(&p, &intrinsics[..4], None);
        assert!((q - q_pinhole).norm() < 1e-12);
    }

    #[test]
    fn test_opencv5_with_zero_k4_matches_opencv4() {
        let opencv4 = [800.0, 810.0, 320.0, 240.0, -0.2, 0.05, 0.001, -0.002];
        let mut opencv5 = opencv4.to_vec();
        opencv5.push(0.0);
        let p = Vector3::new(0.4, -0.3, 1.5);

        let mut jac4 = ProjectionJacobians::zeros(8);
        let mut jac5 = ProjectionJacobians::zeros(9);
        let q4 = project(&p, &opencv4, Some(&mut jac4));
        let q5 = project(&p, &opencv5, Some(&mut jac5));

        assert!((q4 - q5).norm() < 1e-12);
        assert!((jac4.dq_dp - jac5.dq_dp).norm() < 1e-12);
        assert!((jac4.dq_dintrinsics - jac5.dq_dintrinsics.columns(0, 8)).norm() < 1e-12);
    }
}
