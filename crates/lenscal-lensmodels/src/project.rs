//! Projection dispatch over every lens model.

use nalgebra::{Matrix2x3, Matrix2xX, Vector2, Vector3};

use crate::lensmodel::LensModel;
use crate::{
    LensModelError, LensModelResult, ProjectionJacobians, cahvor, cahvore, lonlat, opencv,
    pinhole, splined, stereographic,
};

/// A projected pixel with its gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedPoint {
    pub q: Vector2<f64>,
    pub dq_dp: Matrix2x3<f64>,
    pub dq_dintrinsics: Matrix2xX<f64>,
}

/// Projects one camera-frame point.
///
/// When `jacobians` is given it is resized to the model's parameter count
/// and overwritten.
///
/// # Errors
///
/// - `IntrinsicsSizeMismatch` if `intrinsics` has the wrong length
/// - `GradientsUnsupported` if gradients are requested from CAHVORE
pub fn project_point(
    p: &Vector3<f64>,
    model: &LensModel,
    intrinsics: &[f64],
    jacobians: Option<&mut ProjectionJacobians>,
) -> LensModelResult<Vector2<f64>> {
    model.check_intrinsics(intrinsics)?;

    let jacobians = match jacobians {
        Some(jac) => {
            if !model.metadata().has_gradients {
                return Err(LensModelError::GradientsUnsupported(
                    model.model_type().base_name(),
                ));
            }
            if jac.dq_dintrinsics.ncols() == intrinsics.len() {
                jac.dq_dp.fill(0.0);
                jac.dq_dintrinsics.fill(0.0);
            } else {
                *jac = ProjectionJacobians::zeros(intrinsics.len());
            }
            Some(jac)
        }
        None => None,
    };

    let q = match model {
        LensModel::Pinhole => pinhole::project(p, intrinsics, jacobians),
        LensModel::Stereographic => stereographic::project(p, intrinsics, jacobians),
        LensModel::Lonlat => lonlat::project_lonlat(p, intrinsics, jacobians),
        LensModel::Latlon => lonlat::project_latlon(p, intrinsics, jacobians),
        LensModel::Opencv4 | LensModel::Opencv5 | LensModel::Opencv8 | LensModel::Opencv12 => {
            opencv::project(p, intrinsics, jacobians)
        }
        LensModel::Cahvor => cahvor::project(p, intrinsics, jacobians),
        LensModel::Cahvore(config) => cahvore::project(p, intrinsics, config.linearity)?,
        LensModel::SplinedStereographic(config) => {
            splined::project(p, intrinsics, config, jacobians)
        }
    };
    Ok(q)
}

/// Projects a batch of camera-frame points.
pub fn project(
    points: &[Vector3<f64>],
    model: &LensModel,
    intrinsics: &[f64],
) -> LensModelResult<Vec<Vector2<f64>>> {
    model.validate()?;
    points
        .iter()
        .map(|p| project_point(p, model, intrinsics, None))
        .collect()
}

/// Projects a batch of points, reporting `dq/dp` and `dq/dintrinsics`.
pub fn project_with_gradients(
    points: &[Vector3<f64>],
    model: &LensModel,
    intrinsics: &[f64],
) -> LensModelResult<Vec<ProjectedPoint>> {
    model.validate()?;
    let mut jac = ProjectionJacobians::zeros(model.num_params());
    points
        .iter()
        .map(|p| {
            let q = project_point(p, model, intrinsics, Some(&mut jac))?;
            Ok(ProjectedPoint {
                q,
                dq_dp: jac.dq_dp,
                dq_dintrinsics: jac.dq_dintrinsics.clone(),
            })
        })
        .collect()
}
