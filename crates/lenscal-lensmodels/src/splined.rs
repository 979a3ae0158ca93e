//! Splined stereographic model.
//!
//! A stereographic projection whose normalized coordinate is perturbed by a
//! B-spline surface:
//!
//! ```text
//! u = 2·p_xy / (|p| + z)
//! q = f·(u + Δ(u)) + c
//! ```
//!
//! Δ is a uniform B-spline surface of order 2 (quadratic) or 3 (cubic) over
//! an Nx × Ny grid of 2-vector control points, stored after the core as
//! `intrinsics[4 + 2·(iy·Nx + ix) + c]`. The knot grid is centred on the
//! optical axis and spans the configured horizontal field of view. Points
//! outside the grid use the nearest segment and extrapolate its polynomial.

use nalgebra::{Matrix2, Vector2, Vector3};

use crate::lensmodel::{LensModel, SplinedStereographicConfig};
use crate::pinhole::Core;
use crate::{LensModelError, LensModelResult, ProjectionJacobians, stereographic};

/// Control points and basis weights along one axis.
#[derive(Debug, Clone, Copy)]
struct Segment {
    /// Index of the first control point
    first: usize,
    len: usize,
    weights: [f64; 4],
    /// Basis derivatives with respect to the knot coordinate
    dweights: [f64; 4],
}

fn cubic_segment(x0: f64, n: u16) -> Segment {
    let ix = x0.floor().clamp(1.0, f64::from(n) - 3.0);
    let x = x0 - ix;
    let x2 = x * x;
    let x3 = x2 * x;
    let omx = 1.0 - x;
    Segment {
        first: ix as usize - 1,
        len: 4,
        weights: [
            omx * omx * omx / 6.0,
            (3.0 * x3 - 6.0 * x2 + 4.0) / 6.0,
            (-3.0 * x3 + 3.0 * x2 + 3.0 * x + 1.0) / 6.0,
            x3 / 6.0,
        ],
        dweights: [
            -omx * omx / 2.0,
            (3.0 * x2 - 4.0 * x) / 2.0,
            (-3.0 * x2 + 2.0 * x + 1.0) / 2.0,
            x2 / 2.0,
        ],
    }
}

fn quadratic_segment(x0: f64, n: u16) -> Segment {
    let ix = x0.round().clamp(1.0, f64::from(n) - 2.0);
    let x = x0 - ix;
    Segment {
        first: ix as usize - 1,
        len: 3,
        weights: [
            (0.5 - x) * (0.5 - x) / 2.0,
            0.75 - x * x,
            (0.5 + x) * (0.5 + x) / 2.0,
            0.0,
        ],
        dweights: [x - 0.5, -2.0 * x, 0.5 + x, 0.0],
    }
}

fn segment(config: &SplinedStereographicConfig, x0: f64, n: u16) -> Segment {
    if config.order == 3 {
        cubic_segment(x0, n)
    } else {
        quadratic_segment(x0, n)
    }
}

pub(crate) fn project(
    p: &Vector3<f64>,
    intrinsics: &[f64],
    config: &SplinedStereographicConfig,
    jacobians: Option<&mut ProjectionJacobians>,
) -> Vector2<f64> {
    let core = Core::from_intrinsics(intrinsics);
    let knots = &intrinsics[4..];
    let nx = usize::from(config.nx);

    let (u, du_dp) = stereographic::normalize(p);
    // Straight behind the camera there is no stereographic coordinate and
    // no spline segment to evaluate.
    if !(u.x.is_finite() && u.y.is_finite()) {
        return Vector2::repeat(f64::NAN);
    }
    let spu = config.segments_per_u();
    let sx = segment(config, u.x * spu + (f64::from(config.nx) - 1.0) / 2.0, config.nx);
    let sy = segment(config, u.y * spu + (f64::from(config.ny) - 1.0) / 2.0, config.ny);

    let mut delta = Vector2::zeros();
    let mut ddelta_dx = Vector2::zeros();
    let mut ddelta_dy = Vector2::zeros();
    for j in 0..sy.len {
        for i in 0..sx.len {
            let k = 2 * ((sy.first + j) * nx + sx.first + i);
            let c = Vector2::new(knots[k], knots[k + 1]);
            delta += c * (sx.weights[i] * sy.weights[j]);
            ddelta_dx += c * (sx.dweights[i] * sy.weights[j]);
            ddelta_dy += c * (sx.weights[i] * sy.dweights[j]);
        }
    }
    let ud = u + delta;

    if let Some(jac) = jacobians {
        let dud_du =
            Matrix2::identity() + Matrix2::from_columns(&[ddelta_dx * spu, ddelta_dy * spu]);
        jac.dq_dp = core.scale_rows(&(dud_du * du_dp));

        core.write_gradients(&ud, jac);
        for j in 0..sy.len {
            for i in 0..sx.len {
                let k = 4 + 2 * ((sy.first + j) * nx + sx.first + i);
                let w = sx.weights[i] * sy.weights[j];
                jac.dq_dintrinsics[(0, k)] = core.fx * w;
                jac.dq_dintrinsics[(1, k + 1)] = core.fy * w;
            }
        }
    }

    core.apply(&ud)
}

/// Stereographic-u coordinates of the spline knots along x and y.
///
/// # Errors
///
/// `Unsupported` for any model other than the splined one.
pub fn knots_for_splined_models(model: &LensModel) -> LensModelResult<(Vec<f64>, Vec<f64>)> {
    let LensModel::SplinedStereographic(config) = model else {
        return Err(LensModelError::Unsupported {
            operation: "knots_for_splined_models",
            model: model.model_type().base_name(),
        });
    };
    model.validate()?;
    let spu = config.segments_per_u();
    let axis = |n: u16| -> Vec<f64> {
        let mid = (f64::from(n) - 1.0) / 2.0;
        (0..n).map(|i| (f64::from(i) - mid) / spu).collect()
    };
    Ok((axis(config.nx), axis(config.ny)))
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn partition_of_unity(s: &Segment) -> f64 {
        s.weights[..s.len].iter().sum()
    }

    #[test]
    fn test_basis_is_partition_of_unity() {
        for x0 in [1.0, 1.3, 4.7, 7.99, 12.5] {
            assert!((partition_of_unity(&cubic_segment(x0, 16)) - 1.0).abs() < 1e-12);
            assert!((partition_of_unity(&quadratic_segment(x0, 16)) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cubic_basis_is_continuous_across_knots() {
        // Evaluating at a knot from either adjacent segment gives the same weights
        let left = cubic_segment(4.0 - 1e-12, 16);
        let right = cubic_segment(4.0, 16);
        // left covers control points 2..6, right covers 3..7
        assert_eq!(left.first + 1, right.first);
        for i in 0..3 {
            assert!((left.weights[i + 1] - right.weights[i]).abs() < 1e-9);
        }
        assert!(left.weights[0].abs() < 1e-9);
    }

    #[test]
    fn test_zero_knots_is_stereographic() {
        let config = SplinedStereographicConfig::new(3, 10, 8, 150);
        let mut intrinsics = vec![400.0, 410.0, 640.0, 480.0];
        intrinsics.resize(4 + 2 * config.num_knots(), 0.0);
        let p = Vector3::new(0.8, -0.5, 0.4);
        let q = project(&p, &intrinsics, &config, None);
        let q_stereo = stereographic::project(&p, &intrinsics[..4], None);
        assert!((q - q_stereo).norm() < 1e-12);
    }

    #[test]
    fn test_straight_behind_camera_is_nan() {
        for order in [2, 3] {
            let config = SplinedStereographicConfig::new(order, 12, 9, 200);
            let mut intrinsics = vec![400.0, 410.0, 640.0, 480.0];
            intrinsics.resize(4 + 2 * config.num_knots(), 0.01);
            let mut jac = ProjectionJacobians::zeros(intrinsics.len());
            let q = project(&Vector3::new(0.0, 0.0, -1.0), &intrinsics, &config, Some(&mut jac));
            assert!(q.x.is_nan() && q.y.is_nan(), "order {order}: {q:?}");
        }
    }

    #[test]
    fn test_knots_are_centered_and_span_fov() -> TestResult {
        let config = SplinedStereographicConfig::new(3, 16, 14, 200);
        let model = LensModel::SplinedStereographic(config);
        let (ux, uy) = knots_for_splined_models(&model)?;
        assert_eq!(ux.len(), 16);
        assert_eq!(uy.len(), 14);
        assert!((ux[0] + ux[15]).abs() < 1e-12);
        // one segment of margin on each side of the field of view edge
        let spu = config.segments_per_u();
        assert!((ux[15] - 1.0 / spu - config.u_edge()).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_knots_for_other_models_is_unsupported() {
        assert!(matches!(
            knots_for_splined_models(&LensModel::Opencv8),
            Err(LensModelError::Unsupported { .. })
        ));
    }
}
