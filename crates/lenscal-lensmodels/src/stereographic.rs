//! Stereographic projection.
//!
//! ```text
//! u = 2·p_xy / (|p| + z)
//! q = f·u + c
//! ```
//!
//! Defined everywhere except the direction straight behind the camera. The
//! normalized coordinate `u` is also the space the splined model and the
//! iterative unprojection work in.

use nalgebra::{Matrix2x3, Matrix3x2, Vector2, Vector3};

use crate::ProjectionJacobians;
use crate::pinhole::Core;

/// Stereographic normalized coordinate of a camera-frame point.
pub fn project_stereographic(p: &Vector3<f64>) -> Vector2<f64> {
    normalize(p).0
}

/// Camera-frame direction (not unit length) of a stereographic coordinate.
///
/// Re-projecting the result with [`project_stereographic`] returns `u`.
pub fn unproject_stereographic(u: &Vector2<f64>) -> Vector3<f64> {
    lift(u).0
}

pub(crate) fn normalize(p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>) {
    let norm = p.norm();
    let s = norm + p.z;
    let scale = 2.0 / s;
    let u = Vector2::new(p.x * scale, p.y * scale);

    // ds/dp = p/|p| + [0 0 1]
    let ds_dp = if norm > 0.0 {
        Vector3::new(p.x / norm, p.y / norm, p.z / norm + 1.0)
    } else {
        Vector3::new(0.0, 0.0, 1.0)
    };
    let mut du_dp = Matrix2x3::zeros();
    du_dp[(0, 0)] = scale;
    du_dp[(1, 1)] = scale;
    du_dp -= (u / s) * ds_dp.transpose();
    (u, du_dp)
}

/// `p = (4u, 4 - |u|²)`, with |p| + z = 8.
pub(crate) fn lift(u: &Vector2<f64>) -> (Vector3<f64>, Matrix3x2<f64>) {
    let p = Vector3::new(4.0 * u.x, 4.0 * u.y, 4.0 - u.norm_squared());
    #[rustfmt::skip]
    let dp_du = Matrix3x2::new(
        4.0, 0.0,
        0.0, 4.0,
        -2.0 * u.x, -2.0 * u.y,
    );
    (p, dp_du)
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
    unproject_stereographic(&Core::from_intrinsics(intrinsics).unapply(q))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lift_is_inverse_of_normalize() {
        for u in [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.4, -0.2),
            Vector2::new(2.5, 1.0),
            Vector2::new(-7.0, 3.0),
        ] {
            let back = project_stereographic(&unproject_stereographic(&u));
            assert!((back - u).norm() < 1e-12, "{u:?} -> {back:?}");
        }
    }

    #[test]
    fn test_ninety_degrees_off_axis() {
        // u = 2 tan(θ/2); θ = 90° gives |u| = 2
        let u = project_stereographic(&Vector3::new(1.0, 0.0, 0.0));
        assert!((u.x - 2.0).abs() < 1e-12);
        assert!(u.y.abs() < 1e-12);
    }

    #[test]
    fn test_behind_camera_is_finite() {
        let u = project_stereographic(&Vector3::new(0.3, 0.1, -1.0));
        assert!(u.x.is_finite() && u.y.is_finite());
        assert!(u.norm() > 2.0);
    }

    #[test]
    fn test_normalize_gradient_numerically() {
        let p = Vector3::new(0.3, -0.7, 1.1);
        let (_, du_dp) = normalize(&p);
        let eps = 1e-6;
        for k in 0..3 {
            let mut pp = p;
            let mut pm = p;
            pp[k] += eps;
            pm[k] -= eps;
            let num = (normalize(&pp).0 - normalize(&pm).0) / (2.0 * eps);
            assert!((num - du_dp.column(k)).norm() < 1e-7);
        }
    }
}
