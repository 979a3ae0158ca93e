//! Pinhole projection and the shared intrinsics core.
//!
//! ```text
//! q = (fx·x/z + cx, fy·y/z + cy)
//! ```
//!
//! Points behind the camera are extrapolated without error.

use nalgebra::{Matrix2x3, Vector2, Vector3};

use crate::ProjectionJacobians;

/// The (fx, fy, cx, cy) block shared by every model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Core {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Core {
    pub fn from_intrinsics(intrinsics: &[f64]) -> Self {
        Self {
            fx: intrinsics[0],
            fy: intrinsics[1],
            cx: intrinsics[2],
            cy: intrinsics[3],
        }
    }

    /// Scales and shifts a normalized coordinate into pixels.
    pub fn apply(&self, u: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(self.fx * u.x + self.cx, self.fy * u.y + self.cy)
    }

    pub fn unapply(&self, q: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new((q.x - self.cx) / self.fx, (q.y - self.cy) / self.fy)
    }

    /// Writes dq/d(fx, fy, cx, cy) for a normalized coordinate `u`.
    pub fn write_gradients(&self, u: &Vector2<f64>, jacobians: &mut ProjectionJacobians) {
        let d = &mut jacobians.dq_dintrinsics;
        d[(0, 0)] = u.x;
        d[(1, 1)] = u.y;
        d[(0, 2)] = 1.0;
        d[(1, 3)] = 1.0;
    }

    /// Left-multiplies a 2×N normalized-coordinate gradient by diag(fx, fy).
    pub fn scale_rows<const N: usize>(
        &self,
        du: &nalgebra::SMatrix<f64, 2, N>,
    ) -> nalgebra::SMatrix<f64, 2, N> {
        let mut out = *du;
        for j in 0..N {
            out[(0, j)] *= self.fx;
            out[(1, j)] *= self.fy;
        }
        out
    }
}

/// Normalized pinhole coordinates `p_xy/z` and their gradient.
pub(crate) fn normalize(p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>) {
    let iz = 1.0 / p.z;
    let u = Vector2::new(p.x * iz, p.y * iz);
    #[rustfmt::skip]
    let du_dp = Matrix2x3::new(
        iz, 0.0, -u.x * iz,
        0.0, iz, -u.y * iz,
    );
    (u, du_dp)
}

pub(crate) fn project(
    p: &Vector3<f64>,
    intrinsics: &[f64],
    jacobians: Option<&mut ProjectionJacobians>,
) -> Vector2<f64> {
    let core = Core::from_intrinsics(intrinsics);
    let (u, du_dp) = normalize(p);
    if let Some(jac) = jacobians {
        jac.dq_dp = core.scale_rows(&du_dp);
        core.write_gradients(&u, jac);
    }
    core.apply(&u)
}

pub(crate) fn unproject(q: &Vector2<f64>, intrinsics: &[f64]) -> Vector3<f64> {
    let u = Core::from_intrinsics(intrinsics).unapply(q);
    Vector3::new(u.x, u.y, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTRINSICS: [f64; 4] = [1000.0, 1000.0, 320.0, 240.0];

    #[test]
    fn test_project_optical_axis_lands_on_center() {
        let q = project(&Vector3::new(0.0, 0.0, 1.0), &INTRINSICS, None);
        assert!((q - Vector2::new(320.0, 240.0)).norm() < 1e-12);
    }

    #[test]
    fn test_project_known_point() {
        let q = project(&Vector3::new(0.1, 0.2, 2.0), &INTRINSICS, None);
        assert!((q.x - 370.0).abs() < 1e-9);
        assert!((q.y - 340.0).abs() < 1e-9);
    }

    #[test]
    fn test_behind_camera_extrapolates() {
        let q = project(&Vector3::new(0.1, 0.2, -2.0), &INTRINSICS, None);
        assert!(q.x.is_finite() && q.y.is_finite());
        assert!((q.x - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_unproject_inverts_project() {
        let p = Vector3::new(-0.3, 0.25, 1.7);
        let q = project(&p, &INTRINSICS, None);
        let v = unproject(&q, &INTRINSICS);
        assert!((v * p.z - p).norm() < 1e-12);
    }
}
