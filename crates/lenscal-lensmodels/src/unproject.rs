//! Pixel to observation direction.
//!
//! The pinhole, stereographic, LONLAT and LATLON models invert in closed
//! form. Every other model is inverted numerically: Newton iterations in
//! stereographic-u space on top of [`project_point`], which keeps the search
//! well defined for directions at and beyond 90° off axis.

use nalgebra::{Matrix2, Matrix3x2, Matrix3xX, Vector2, Vector3};
use tracing::debug;

use crate::lensmodel::LensModel;
use crate::pinhole::Core;
use crate::project::project_point;
use crate::{
    LensModelError, LensModelResult, ProjectionJacobians, UNPROJECT_MAX_ITERATIONS,
    UNPROJECT_TOLERANCE_PIXELS, lonlat, pinhole, stereographic,
};

const MAX_STEP_HALVINGS: usize = 30;

/// An unprojected direction with its gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct UnprojectedPoint {
    /// Observation direction, not normalized
    pub v: Vector3<f64>,
    pub dv_dq: Matrix3x2<f64>,
    pub dv_dintrinsics: Matrix3xX<f64>,
}

/// Unprojects one pixel into a camera-frame direction (not normalized).
///
/// # Errors
///
/// - `IntrinsicsSizeMismatch` if `intrinsics` has the wrong length
/// - `Unsupported` for CAHVORE
/// - `UnprojectionDidNotConverge` if the Newton search fails
pub fn unproject_point(
    q: &Vector2<f64>,
    model: &LensModel,
    intrinsics: &[f64],
) -> LensModelResult<Vector3<f64>> {
    model.check_intrinsics(intrinsics)?;
    match model {
        LensModel::Pinhole => Ok(pinhole::unproject(q, intrinsics)),
        LensModel::Stereographic => Ok(stereographic::unproject(q, intrinsics)),
        LensModel::Lonlat => Ok(lonlat::unproject_lonlat(q, intrinsics)),
        LensModel::Latlon => Ok(lonlat::unproject_latlon(q, intrinsics)),
        LensModel::Cahvore(_) => Err(unsupported(model)),
        _ => {
            let u = solve_stereographic_u(q, model, intrinsics)?;
            Ok(stereographic::unproject_stereographic(&u))
        }
    }
}

/// Unprojects one pixel, reporting the gradients of the direction.
///
/// The gradients come from the implicit-function theorem at the solution:
/// with `q = project(lift(u), intrinsics)`, `du/dI = −(dq/du)⁻¹·dq/dI`.
pub fn unproject_point_with_gradients(
    q: &Vector2<f64>,
    model: &LensModel,
    intrinsics: &[f64],
) -> LensModelResult<UnprojectedPoint> {
    let v = unproject_point(q, model, intrinsics)?;
    let u = stereographic::project_stereographic(&v);
    let (p, dp_du) = stereographic::lift(&u);

    let mut jac = ProjectionJacobians::zeros(intrinsics.len());
    project_point(&p, model, intrinsics, Some(&mut jac))?;
    let dq_du = jac.dq_dp * dp_du;
    let du_dq = dq_du.try_inverse().ok_or_else(|| {
        LensModelError::NumericalError(format!(
            "singular projection gradient at pixel ({}, {})",
            q.x, q.y
        ))
    })?;
    let du_dintrinsics = -(du_dq * &jac.dq_dintrinsics);

    Ok(UnprojectedPoint {
        v: p,
        dv_dq: dp_du * du_dq,
        dv_dintrinsics: dp_du * du_dintrinsics,
    })
}

/// Unprojects a batch of pixels.
pub fn unproject(
    pixels: &[Vector2<f64>],
    model: &LensModel,
    intrinsics: &[f64],
) -> LensModelResult<Vec<Vector3<f64>>> {
    model.validate()?;
    pixels
        .iter()
        .map(|q| unproject_point(q, model, intrinsics))
        .collect()
}

/// Unprojects a batch of pixels with gradients.
pub fn unproject_with_gradients(
    pixels: &[Vector2<f64>],
    model: &LensModel,
    intrinsics: &[f64],
) -> LensModelResult<Vec<UnprojectedPoint>> {
    model.validate()?;
    pixels
        .iter()
        .map(|q| unproject_point_with_gradients(q, model, intrinsics))
        .collect()
}

fn unsupported(model: &LensModel) -> LensModelError {
    LensModelError::Unsupported {
        operation: "unproject",
        model: model.model_type().base_name(),
    }
}

fn seed(q: &Vector2<f64>, model: &LensModel, intrinsics: &[f64]) -> Vector2<f64> {
    let normalized = Core::from_intrinsics(intrinsics).unapply(q);
    match model {
        // The spline perturbs the stereographic coordinate directly
        LensModel::SplinedStereographic(_) => normalized,
        _ => stereographic::project_stereographic(&Vector3::new(normalized.x, normalized.y, 1.0)),
    }
}

fn reprojection_error(
    u: &Vector2<f64>,
    q: &Vector2<f64>,
    model: &LensModel,
    intrinsics: &[f64],
    jacobians: Option<&mut ProjectionJacobians>,
) -> LensModelResult<Vector2<f64>> {
    let p = stereographic::unproject_stereographic(u);
    Ok(project_point(&p, model, intrinsics, jacobians)? - q)
}

fn solve_stereographic_u(
    q: &Vector2<f64>,
    model: &LensModel,
    intrinsics: &[f64],
) -> LensModelResult<Vector2<f64>> {
    let mut u = seed(q, model, intrinsics);
    let mut jac = ProjectionJacobians::zeros(intrinsics.len());
    let mut error = reprojection_error(&u, q, model, intrinsics, Some(&mut jac))?;

    for iteration in 0..UNPROJECT_MAX_ITERATIONS {
        let error_norm = error.norm();
        if error_norm < UNPROJECT_TOLERANCE_PIXELS {
            return Ok(u);
        }

        let (_, dp_du) = stereographic::lift(&u);
        let dq_du: Matrix2<f64> = jac.dq_dp * dp_du;
        let Some(dq_du_inv) = dq_du.try_inverse() else {
            debug!(iteration, "singular dq/du while unprojecting ({}, {})", q.x, q.y);
            break;
        };
        let step = dq_du_inv * error;

        let mut scale = 1.0;
        let mut candidate = u - step;
        let mut candidate_error = reprojection_error(&candidate, q, model, intrinsics, None)?;
        for _ in 0..MAX_STEP_HALVINGS {
            if candidate_error.norm() < error_norm {
                break;
            }
            scale *= 0.5;
            candidate = u - step * scale;
            candidate_error = reprojection_error(&candidate, q, model, intrinsics, None)?;
        }

        u = candidate;
        error = reprojection_error(&u, q, model, intrinsics, Some(&mut jac))?;
    }

    let residual = error.norm();
    if residual < UNPROJECT_TOLERANCE_PIXELS {
        return Ok(u);
    }
    debug!(residual, "unprojection of ({}, {}) did not converge", q.x, q.y);
    Err(LensModelError::UnprojectionDidNotConverge {
        iterations: UNPROJECT_MAX_ITERATIONS,
        residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lensmodel::CahvoreConfig;

    #[test]
    fn test_cahvore_is_unsupported() {
        let model = LensModel::Cahvore(CahvoreConfig { linearity: 1.0 });
        let result = unproject_point(&Vector2::new(1.0, 1.0), &model, &[1.0; 12]);
        assert!(matches!(result, Err(LensModelError::Unsupported { .. })));
    }

    #[test]
    fn test_opencv_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let model = LensModel::Opencv8;
        let intrinsics = [
            1500.0, 1510.0, 1000.0, 700.0, -0.3, 0.1, 0.001, -0.0005, -0.01, 0.01, -0.02, 0.005,
        ];
        let p = Vector3::new(0.3, -0.2, 1.0);
        let q = project_point(&p, &model, &intrinsics, None)?;
        let v = unproject_point(&q, &model, &intrinsics)?;
        assert!((v.normalize() - p.normalize()).norm() < 1e-9);
        Ok(())
    }
}
