//! Residual vector and sparse Jacobian of a calibration problem.
//!
//! Reprojection residuals are `w·(q_observed − q_projected)`, two per
//! observed pixel. Outliers (`w < 0`) keep their rows, set to zero, so the
//! layout never depends on the outlier set.
//!
//! Each observation produces an independent block of rows. Blocks are
//! computed in parallel and concatenated in measurement order, so the output
//! does not depend on the thread count.

use lenscal_lensmodels::{LensModel, ProjectionJacobians, project_point};
use lenscal_poses::Rt;
use nalgebra::{Matrix2x3, Matrix2x6, Matrix3, Matrix3x2, Matrix3x6, Vector2, Vector3};
use rayon::prelude::*;

use crate::board::board_corner;
use crate::error::CalibrationResult;
use crate::layout::{
    ProblemLayout, ProblemState, SCALE_CALOBJECT_WARP, SCALE_POSITION_POINT, SCALE_ROTATION_CAMERA,
    SCALE_ROTATION_FRAME, SCALE_TRANSLATION_CAMERA, SCALE_TRANSLATION_FRAME,
    decode_observation_indices_points_triangulated,
};
use crate::linalg::{SparseMatrix, triplets_to_sparse};
use crate::observations::{CameraIndex, ObservedPixel, OptimizationInputs};
use crate::regularization::regularization_block;
use crate::triangulation::{PairGradients, RayObservation, triangulated_pair_residuals};

/// Rows of the measurement vector produced by one observation.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResidualBlock {
    pub row0: usize,
    pub values: Vec<f64>,
    /// `(row, column, value)` in packed-state coordinates
    pub entries: Vec<(usize, usize, f64)>,
}

impl ResidualBlock {
    pub fn new(row0: usize, nrows: usize) -> Self {
        Self {
            row0,
            values: vec![0.0; nrows],
            entries: Vec::new(),
        }
    }

    pub fn set(&mut self, row: usize, value: f64) {
        self.values[row - self.row0] = value;
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        self.entries.push((row, col, value));
    }

    /// Adds a 2×6 pose gradient, scaled into packed units.
    fn push_pose(&mut self, row: usize, col: usize, jac: &Matrix2x6<f64>, rotation_scale: f64, translation_scale: f64) {
        for r in 0..2 {
            for c in 0..3 {
                self.push(row + r, col + c, jac[(r, c)] * rotation_scale);
                self.push(row + r, col + 3 + c, jac[(r, c + 3)] * translation_scale);
            }
        }
    }
}

/// The residual vector, and the Jacobian when it was asked for.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub x: Vec<f64>,
    /// `dx/db_packed`, `num_measurements × num_states`
    pub jacobian: Option<SparseMatrix>,
}

impl Evaluation {
    /// `½‖x‖²`
    pub fn cost(&self) -> f64 {
        0.5 * self.x.iter().map(|v| v * v).sum::<f64>()
    }
}

/// A camera pose and the state column of its extrinsics, if optimized.
struct CameraPose {
    rt_cam_ref: Option<Rt>,
    column: Option<usize>,
}

impl CameraPose {
    fn new(camera: CameraIndex, layout: &ProblemLayout, state: &ProblemState) -> Self {
        match camera.extrinsics {
            Some(e) => Self {
                rt_cam_ref: Some(state.extrinsics[e]),
                column: layout.state_index_extrinsics(e),
            },
            None => Self {
                rt_cam_ref: None,
                column: None,
            },
        }
    }

    /// Transforms a reference-frame point into the camera frame.
    fn transform(
        &self,
        p_ref: &Vector3<f64>,
        dpcam_drt: &mut Matrix3x6<f64>,
        dpcam_dpref: &mut Matrix3<f64>,
    ) -> Vector3<f64> {
        match &self.rt_cam_ref {
            Some(rt) => rt.transform_point(p_ref, Some(dpcam_drt), Some(dpcam_dpref)),
            None => {
                *dpcam_dpref = Matrix3::identity();
                *p_ref
            }
        }
    }
}

/// Shared context of one evaluation.
struct Context<'a> {
    inputs: &'a OptimizationInputs,
    layout: &'a ProblemLayout,
    state: &'a ProblemState,
    with_jacobian: bool,
}

impl Context<'_> {
    fn lensmodel(&self) -> &LensModel {
        &self.inputs.lensmodel
    }

    /// Projects `p_cam` and writes `w·(q_observed − q)` and its gradient
    /// with respect to the intrinsics. Returns `dq/dp_cam`.
    fn reprojection(
        &self,
        block: &mut ResidualBlock,
        row: usize,
        icam_intrinsics: usize,
        p_cam: &Vector3<f64>,
        px: &ObservedPixel,
        jac: &mut ProjectionJacobians,
    ) -> CalibrationResult<Matrix2x3<f64>> {
        let intrinsics = &self.state.intrinsics[icam_intrinsics];
        let q = project_point(p_cam, self.lensmodel(), intrinsics, self.with_jacobian.then_some(&mut *jac))?;
        let residual = px.weight * (px.q() - q);
        block.set(row, residual.x);
        block.set(row + 1, residual.y);
        if !self.with_jacobian {
            return Ok(Matrix2x3::zeros());
        }

        for iparam in 0..intrinsics.len() {
            if let Some((col, scale)) = self.layout.intrinsics_state(icam_intrinsics, iparam) {
                for r in 0..2 {
                    block.push(row + r, col, -px.weight * jac.dq_dintrinsics[(r, iparam)] * scale);
                }
            }
        }
        Ok(-px.weight * jac.dq_dp)
    }

    fn board_block(&self, iobservation: usize) -> CalibrationResult<ResidualBlock> {
        let inputs = self.inputs;
        let observation = &inputs.observations_board[iobservation];
        let (width_n, height_n) = (inputs.calibration_object_width_n, inputs.calibration_object_height_n);
        let row0 = self.layout.measurement_index_boards(iobservation);
        let mut block = ResidualBlock::new(row0, 2 * width_n * height_n);

        let camera = CameraPose::new(observation.camera, self.layout, self.state);
        let frame = self.state.frames[observation.iframe];
        let frame_column = self.layout.state_index_frames(observation.iframe);
        let warp_column = self.layout.state_index_calobject_warp();
        let mut jac = ProjectionJacobians::zeros(inputs.lensmodel.num_params());

        for (k, px) in inputs.board_pixels(iobservation).iter().enumerate() {
            if px.is_outlier() {
                continue;
            }
            let (i, j) = (k % width_n, k / width_n);
            let row = row0 + 2 * k;

            let mut dpboard_dwarp = Matrix3x2::zeros();
            let p_board = board_corner(
                i,
                j,
                width_n,
                height_n,
                inputs.calibration_object_spacing,
                &self.state.calobject_warp,
                Some(&mut dpboard_dwarp),
            );
            let mut dpref_dframe = Matrix3x6::zeros();
            let mut dpref_dpboard = Matrix3::zeros();
            let p_ref = frame.transform_point(&p_board, Some(&mut dpref_dframe), Some(&mut dpref_dpboard));
            let mut dpcam_drt = Matrix3x6::zeros();
            let mut dpcam_dpref = Matrix3::zeros();
            let p_cam = camera.transform(&p_ref, &mut dpcam_drt, &mut dpcam_dpref);

            let dx_dpcam = self.reprojection(&mut block, row, observation.camera.intrinsics, &p_cam, px, &mut jac)?;
            if !self.with_jacobian {
                continue;
            }
            if let Some(col) = camera.column {
                block.push_pose(row, col, &(dx_dpcam * dpcam_drt), SCALE_ROTATION_CAMERA, SCALE_TRANSLATION_CAMERA);
            }
            let dx_dpref = dx_dpcam * dpcam_dpref;
            if let Some(col) = frame_column {
                block.push_pose(row, col, &(dx_dpref * dpref_dframe), SCALE_ROTATION_FRAME, SCALE_TRANSLATION_FRAME);
            }
            if let Some(col) = warp_column {
                let dx_dwarp = dx_dpref * dpref_dpboard * dpboard_dwarp;
                for r in 0..2 {
                    for c in 0..2 {
                        block.push(row + r, col + c, dx_dwarp[(r, c)] * SCALE_CALOBJECT_WARP);
                    }
                }
            }
        }
        Ok(block)
    }

    fn point_block(&self, iobservation: usize) -> CalibrationResult<ResidualBlock> {
        let observation = &self.inputs.observations_point[iobservation];
        let row = self.layout.measurement_index_points(iobservation);
        let mut block = ResidualBlock::new(row, 2);
        if observation.px.is_outlier() {
            return Ok(block);
        }

        let camera = CameraPose::new(observation.camera, self.layout, self.state);
        let p_ref = self.state.points[observation.ipoint];
        let mut dpcam_drt = Matrix3x6::zeros();
        let mut dpcam_dpref = Matrix3::zeros();
        let p_cam = camera.transform(&p_ref, &mut dpcam_drt, &mut dpcam_dpref);

        let mut jac = ProjectionJacobians::zeros(self.inputs.lensmodel.num_params());
        let dx_dpcam =
            self.reprojection(&mut block, row, observation.camera.intrinsics, &p_cam, &observation.px, &mut jac)?;
        if !self.with_jacobian {
            return Ok(block);
        }
        if let Some(col) = camera.column {
            block.push_pose(row, col, &(dx_dpcam * dpcam_drt), SCALE_ROTATION_CAMERA, SCALE_TRANSLATION_CAMERA);
        }
        if let Some(col) = self.layout.state_index_points(observation.ipoint) {
            let dx_dpoint = dx_dpcam * dpcam_dpref;
            for r in 0..2 {
                for c in 0..3 {
                    block.push(row + r, col + c, dx_dpoint[(r, c)] * SCALE_POSITION_POINT);
                }
            }
        }
        Ok(block)
    }

    fn triangulated_block(&self, ipair: usize, iobservation0: usize, iobservation1: usize) -> CalibrationResult<ResidualBlock> {
        let observations = &self.inputs.observations_point_triangulated;
        let pair = [&observations[iobservation0], &observations[iobservation1]];
        let row = self.layout.measurement_index_points_triangulated(ipair);
        let mut block = ResidualBlock::new(row, 2);
        if pair.iter().any(|o| o.is_outlier()) {
            return Ok(block);
        }

        let poses = pair.map(|o| CameraPose::new(o.camera, self.layout, self.state));
        let rays = [0, 1].map(|k| RayObservation {
            intrinsics: &self.state.intrinsics[pair[k].camera.intrinsics],
            rt_cam_ref: poses[k].rt_cam_ref.unwrap_or_default(),
            q: Vector2::new(pair[k].px.x, pair[k].px.y),
        });
        let weight = 0.5 * (pair[0].px.weight + pair[1].px.weight);

        let mut gradients = PairGradients::zeros(self.inputs.lensmodel.num_params());
        let x = triangulated_pair_residuals(
            self.lensmodel(),
            [&rays[0], &rays[1]],
            weight,
            &self.inputs.constants,
            self.with_jacobian.then_some(&mut gradients),
        )?;
        block.set(row, x.x);
        block.set(row + 1, x.y);
        if !self.with_jacobian {
            return Ok(block);
        }

        for k in 0..2 {
            let icam = pair[k].camera.intrinsics;
            for iparam in 0..rays[k].intrinsics.len() {
                if let Some((col, scale)) = self.layout.intrinsics_state(icam, iparam) {
                    for r in 0..2 {
                        block.push(row + r, col, gradients.dintrinsics[k][(r, iparam)] * scale);
                    }
                }
            }
            if let Some(col) = poses[k].column {
                block.push_pose(row, col, &gradients.drt[k], SCALE_ROTATION_CAMERA, SCALE_TRANSLATION_CAMERA);
            }
        }
        Ok(block)
    }
}

/// Evaluates the residual vector at `state`, and optionally its Jacobian
/// with respect to the packed state.
///
/// `inputs` provides the observations and the problem geometry; its own
/// variables are ignored in favour of `state`.
pub fn evaluate(
    inputs: &OptimizationInputs,
    layout: &ProblemLayout,
    state: &ProblemState,
    with_jacobian: bool,
) -> CalibrationResult<Evaluation> {
    let context = Context {
        inputs,
        layout,
        state,
        with_jacobian,
    };

    let board: Vec<ResidualBlock> = (0..inputs.observations_board.len())
        .into_par_iter()
        .map(|i| context.board_block(i))
        .collect::<CalibrationResult<_>>()?;
    let point: Vec<ResidualBlock> = (0..inputs.observations_point.len())
        .into_par_iter()
        .map(|i| context.point_block(i))
        .collect::<CalibrationResult<_>>()?;
    let pairs = decode_observation_indices_points_triangulated(&inputs.observations_point_triangulated);
    let triangulated: Vec<ResidualBlock> = pairs
        .par_iter()
        .enumerate()
        .map(|(ipair, pair)| context.triangulated_block(ipair, pair.iobservation0, pair.iobservation1))
        .collect::<CalibrationResult<_>>()?;
    let regularization = regularization_block(layout, state, &inputs.imagersizes, with_jacobian);

    let nmeasurements = layout.num_measurements();
    let mut x = vec![0.0; nmeasurements];
    let mut entries = Vec::new();
    for block in board.iter().chain(&point).chain(&triangulated).chain(std::iter::once(&regularization)) {
        x[block.row0..block.row0 + block.values.len()].copy_from_slice(&block.values);
        entries.extend_from_slice(&block.entries);
    }

    let jacobian = if with_jacobian {
        Some(triplets_to_sparse(nmeasurements, layout.num_states(), &entries)?)
    } else {
        None
    };
    Ok(Evaluation { x, jacobian })
}

/// Number of board corners and points that are not outliers.
pub fn num_inlier_observations(inputs: &OptimizationInputs) -> usize {
    inputs.observations_board_pool.iter().filter(|px| !px.is_outlier()).count()
        + inputs.observations_point.iter().filter(|o| !o.px.is_outlier()).count()
}

/// RMS reprojection error over the inlier board and point observations, in
/// pixels per observation.
pub fn reprojection_rms(x: &[f64], layout: &ProblemLayout, inputs: &OptimizationInputs) -> f64 {
    let n = num_inlier_observations(inputs);
    if n == 0 {
        return 0.0;
    }
    let nreprojection = layout.num_measurements_boards() + layout.num_measurements_points();
    let norm2: f64 = x[..nreprojection].iter().map(|v| v * v).sum();
    (norm2 / n as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observations::{BoardObservation, PointObservation};
    use crate::problem::ProblemSelections;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn inputs() -> OptimizationInputs {
        let mut inputs = OptimizationInputs::new(LensModel::Pinhole);
        inputs.intrinsics = vec![vec![1000.0, 1000.0, 320.0, 240.0]];
        inputs.imagersizes = vec![[640, 480]];
        inputs.frames_rt_toref = vec![Rt::from([0.0, 0.0, 0.0, -0.05, -0.05, 2.0])];
        inputs.calibration_object_width_n = 2;
        inputs.calibration_object_height_n = 2;
        inputs.calibration_object_spacing = 0.1;
        inputs.observations_board = vec![BoardObservation {
            camera: CameraIndex::at_reference(0),
            iframe: 0,
        }];
        inputs.observations_board_pool = vec![
            ObservedPixel::new(295.0, 215.0, 1.0),
            ObservedPixel::new(345.0, 215.0, 1.0),
            ObservedPixel::new(295.0, 265.0, -1.0),
            ObservedPixel::new(346.0, 265.0, 2.0),
        ];
        inputs.points = vec![Vector3::new(0.1, 0.05, 2.0)];
        inputs.observations_point = vec![PointObservation {
            camera: CameraIndex::at_reference(0),
            ipoint: 0,
            px: ObservedPixel::new(370.0, 265.5, 1.0),
        }];
        inputs.selections = ProblemSelections::default().with_regularization(false);
        inputs
    }

    #[test]
    fn test_residual_values() -> TestResult {
        let inputs = inputs();
        let layout = ProblemLayout::from_inputs(&inputs);
        let state = ProblemState::from_inputs(&inputs);
        let evaluation = evaluate(&inputs, &layout, &state, true)?;

        assert_eq!(evaluation.x.len(), 2 * 4 + 2);
        assert!(evaluation.x[..4].iter().all(|v| v.abs() < 1e-9));
        // outlier rows are zero
        assert_eq!(&evaluation.x[4..6], &[0.0, 0.0]);
        // weight 2, one pixel off in x
        assert!((evaluation.x[6] - 2.0).abs() < 1e-9);
        // the point projects to (370, 265)
        assert!((evaluation.x[9] - 0.5).abs() < 1e-9);

        let jacobian = evaluation.jacobian.ok_or("no jacobian")?;
        assert_eq!(jacobian.nrows(), layout.num_measurements());
        assert_eq!(jacobian.ncols(), layout.num_states());
        assert!((reprojection_rms(&evaluation.x, &layout, &inputs) - (4.25f64 / 4.0).sqrt()).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_outlier_rows_have_no_jacobian_entries() -> TestResult {
        let inputs = inputs();
        let layout = ProblemLayout::from_inputs(&inputs);
        let state = ProblemState::from_inputs(&inputs);
        let jacobian = evaluate(&inputs, &layout, &state, true)?.jacobian.ok_or("no jacobian")?;
        let dense = crate::linalg::sparse_to_dense(&jacobian);
        assert!(dense.row(4).iter().all(|v| *v == 0.0));
        assert!(dense.row(5).iter().all(|v| *v == 0.0));
        assert!(dense.row(6).iter().any(|v| *v != 0.0));
        Ok(())
    }

    #[test]
    fn test_evaluation_without_jacobian_matches() -> TestResult {
        let inputs = inputs();
        let layout = ProblemLayout::from_inputs(&inputs);
        let state = ProblemState::from_inputs(&inputs);
        let with = evaluate(&inputs, &layout, &state, true)?;
        let without = evaluate(&inputs, &layout, &state, false)?;
        assert_eq!(with.x, without.x);
        assert!(without.jacobian.is_none());
        Ok(())
    }
}
