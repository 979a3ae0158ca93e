//! Synthetic problems for unit tests.

use lenscal_lensmodels::{LensModel, project_point};
use lenscal_poses::Rt;
use nalgebra::Vector3;

use crate::observations::{BoardObservation, CameraIndex, ObservedPixel, OptimizationInputs};
use crate::problem::ProblemSelections;

pub(crate) const PINHOLE_TRUTH: [f64; 4] = [800.0, 810.0, 319.5, 239.5];

/// One pinhole camera looking at a 6×5 board in four poses. The frames are
/// exact; the intrinsics are seeded off the truth.
pub(crate) fn pinhole_board_inputs() -> Result<OptimizationInputs, Box<dyn std::error::Error>> {
    let mut inputs = OptimizationInputs::new(LensModel::Pinhole);
    inputs.imagersizes = vec![[640, 480]];
    inputs.calibration_object_width_n = 6;
    inputs.calibration_object_height_n = 5;
    inputs.calibration_object_spacing = 0.05;
    inputs.frames_rt_toref = vec![
        Rt::from([0.1, -0.2, 0.05, -0.12, -0.1, 1.0]),
        Rt::from([-0.2, 0.1, 0.0, -0.15, -0.08, 1.3]),
        Rt::from([0.0, 0.3, -0.1, -0.1, -0.12, 0.9]),
        Rt::from([0.25, 0.0, 0.1, -0.1, -0.1, 1.1]),
    ];
    for iframe in 0..inputs.frames_rt_toref.len() {
        inputs.observations_board.push(BoardObservation {
            camera: CameraIndex::at_reference(0),
            iframe,
        });
        for j in 0..5 {
            for i in 0..6 {
                let p_board = Vector3::new(i as f64 * 0.05, j as f64 * 0.05, 0.0);
                let p = inputs.frames_rt_toref[iframe].transform_point(&p_board, None, None);
                let q = project_point(&p, &inputs.lensmodel, &PINHOLE_TRUTH, None)?;
                inputs.observations_board_pool.push(ObservedPixel::new(q.x, q.y, 1.0));
            }
        }
    }
    inputs.intrinsics = vec![vec![780.0, 790.0, 325.0, 235.0]];
    inputs.selections = ProblemSelections::default()
        .with_regularization(false)
        .with_outlier_rejection(false);
    Ok(inputs)
}
