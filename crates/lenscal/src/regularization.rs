//! Regularization residuals.
//!
//! Weakly constrained parameters get a small pull toward a prior:
//! distortions toward zero, the centre pixel toward the imager centre and,
//! optionally, the distance between the first two cameras toward 1. The
//! terms are scaled so that together they amount to about 0.5% of the cost
//! the reprojection residuals are expected to have at the solution.

use crate::layout::{ProblemLayout, ProblemState, SCALE_TRANSLATION_CAMERA};
use crate::residuals::ResidualBlock;

/// Expected reprojection error at the solution, in pixels.
pub const EXPECTED_PIXEL_ERROR: f64 = 0.3;

/// Share of the expected cost given to regularization.
pub const REGULARIZATION_COST_FRACTION: f64 = 0.005;

/// A centre-pixel offset of this many pixels weighs as much as a unit
/// distortion coefficient.
pub const CENTER_PIXEL_EQUIVALENT: f64 = 100.0;

/// Weight applied to every regularization term of `layout`.
pub fn regularization_scale(layout: &ProblemLayout) -> f64 {
    let nregularization = layout.num_measurements_regularization();
    if nregularization == 0 {
        return 0.0;
    }
    let nreprojection = (layout.num_measurements_boards()
        + layout.num_measurements_points()
        + layout.num_measurements_points_triangulated())
    .max(1);
    let expected_cost = nreprojection as f64 * EXPECTED_PIXEL_ERROR * EXPECTED_PIXEL_ERROR;
    (REGULARIZATION_COST_FRACTION * expected_cost / nregularization as f64).sqrt()
}

/// Regularization residuals, per camera `[distortions..., cx, cy]` then the
/// unity term.
pub(crate) fn regularization_block(
    layout: &ProblemLayout,
    state: &ProblemState,
    imagersizes: &[[u32; 2]],
    with_jacobian: bool,
) -> ResidualBlock {
    let row0 = layout.measurement_index_regularization();
    let mut block = ResidualBlock::new(row0, layout.num_measurements_regularization());
    let scale = regularization_scale(layout);
    let ndistortion = layout.num_regularization_distortion_per_camera();
    let ncenter = layout.num_regularization_center_per_camera();

    let mut row = row0;
    for (icam, intrinsics) in state.intrinsics.iter().enumerate() {
        if ndistortion > 0 {
            let first = intrinsics.len() - ndistortion;
            for iparam in first..intrinsics.len() {
                block.set(row, scale * intrinsics[iparam]);
                if with_jacobian && let Some((col, s)) = layout.intrinsics_state(icam, iparam) {
                    block.push(row, col, scale * s);
                }
                row += 1;
            }
        }
        if ncenter > 0 {
            let weight = scale / CENTER_PIXEL_EQUIVALENT;
            for axis in 0..2 {
                let iparam = 2 + axis;
                let centre = (f64::from(imagersizes[icam][axis]) - 1.0) / 2.0;
                block.set(row, weight * (intrinsics[iparam] - centre));
                if with_jacobian && let Some((col, s)) = layout.intrinsics_state(icam, iparam) {
                    block.push(row, col, weight * s);
                }
                row += 1;
            }
        }
    }

    if layout.has_regularization_unity_cam01() {
        let t = state.extrinsics[0].t;
        block.set(row, scale * (t.norm_squared() - 1.0));
        if with_jacobian && let Some(col) = layout.state_index_extrinsics(0) {
            for axis in 0..3 {
                block.push(row, col + 3 + axis, 2.0 * scale * t[axis] * SCALE_TRANSLATION_CAMERA);
            }
        }
    }
    block
}
