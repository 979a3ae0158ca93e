//! Synthetic stereo calibration scenes.
//!
//! Two OpenCV4 cameras 0.2 apart look at a 10×8 board in six poses, at six
//! discrete points and at four points that are only triangulated. Pixels
//! are projected through the true geometry, optionally with deterministic
//! uniform noise.

#![allow(dead_code)]

use lenscal::board::board_corner;
use lenscal::{
    BoardObservation, CameraIndex, LensModel, ObservedPixel, OptimizationInputs, PointObservation,
    ProblemSelections, Rt, TriangulatedObservation, project_point,
};
use nalgebra::{Vector2, Vector3};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
pub type Fallible<T> = Result<T, Box<dyn std::error::Error>>;

pub const BOARD_WIDTH_N: usize = 10;
pub const BOARD_HEIGHT_N: usize = 8;
pub const BOARD_SPACING: f64 = 0.04;

pub fn true_intrinsics() -> Vec<Vec<f64>> {
    vec![
        vec![600.0, 602.0, 320.0, 240.0, -0.05, 0.01, 0.0008, -0.0005],
        vec![610.0, 608.0, 318.0, 242.0, -0.04, 0.008, -0.0003, 0.0006],
    ]
}

/// Camera 1 relative to the reference (camera 0).
pub fn true_rt_cam1_ref() -> Rt {
    Rt::from([0.004, -0.03, 0.002, -0.2, 0.003, 0.001])
}

/// Boards close enough to fill the image, one near each image corner plus a
/// near and a far view, so the distortion is observed out to the edges.
pub fn true_frames() -> Vec<Rt> {
    vec![
        Rt::from([0.25, -0.20, 0.05, -0.30, -0.26, 0.75]),
        Rt::from([-0.20, -0.25, -0.05, -0.02, -0.26, 0.80]),
        Rt::from([0.20, 0.25, 0.10, -0.30, -0.02, 0.75]),
        Rt::from([-0.25, 0.20, -0.10, -0.02, -0.02, 0.80]),
        Rt::from([0.10, 0.30, 0.02, -0.16, -0.14, 0.60]),
        Rt::from([-0.30, -0.10, 0.15, -0.20, -0.12, 0.95]),
    ]
}

pub fn true_points() -> Vec<Vector3<f64>> {
    vec![
        Vector3::new(-0.3, -0.2, 2.5),
        Vector3::new(0.2, -0.1, 3.0),
        Vector3::new(0.0, 0.25, 2.2),
        Vector3::new(-0.1, 0.1, 3.5),
        Vector3::new(0.3, 0.2, 2.8),
        Vector3::new(-0.25, 0.05, 2.0),
    ]
}

pub fn true_triangulated_points() -> Vec<Vector3<f64>> {
    vec![
        Vector3::new(0.1, -0.15, 4.0),
        Vector3::new(-0.2, 0.1, 3.0),
        Vector3::new(0.15, 0.2, 5.0),
        Vector3::new(-0.05, -0.05, 3.5),
    ]
}

/// Uniform in `[-amplitude, amplitude]`, reproducible from `i`.
pub fn noise(i: usize, amplitude: f64) -> f64 {
    let v = ((i as f64) * 12.9898 + 78.233).sin() * 43758.5453;
    amplitude * 2.0 * (v - v.floor() - 0.5)
}

fn cameras() -> [CameraIndex; 2] {
    [CameraIndex::at_reference(0), CameraIndex::new(1, Some(0))]
}

fn observe(
    inputs: &OptimizationInputs,
    camera: CameraIndex,
    p_ref: &Vector3<f64>,
    counter: &mut usize,
    amplitude: f64,
) -> Fallible<ObservedPixel> {
    let p_cam = match camera.extrinsics {
        Some(i) => inputs.extrinsics_rt_fromref[i].transform_point(p_ref, None, None),
        None => *p_ref,
    };
    let q = project_point(&p_cam, &inputs.lensmodel, &inputs.intrinsics[camera.intrinsics], None)?;
    let pixel = ObservedPixel::new(
        q.x + noise(*counter, amplitude),
        q.y + noise(*counter + 1, amplitude),
        1.0,
    );
    *counter += 2;
    Ok(pixel)
}

/// The stereo scene with its variables at the truth.
///
/// Every pixel carries noise of at most `amplitude` per coordinate. Points
/// observed for triangulation are included when `triangulated` is set.
/// Regularization is off; every other selection is at its default.
pub fn stereo_scene(amplitude: f64, triangulated: bool) -> Fallible<OptimizationInputs> {
    stereo_scene_with_model(LensModel::Opencv4, true_intrinsics(), amplitude, triangulated)
}

/// The same scene seen through `lensmodel` with the given per-camera
/// intrinsics.
pub fn stereo_scene_with_model(
    lensmodel: LensModel,
    intrinsics: Vec<Vec<f64>>,
    amplitude: f64,
    triangulated: bool,
) -> Fallible<OptimizationInputs> {
    let mut inputs = OptimizationInputs::new(lensmodel);
    inputs.intrinsics = intrinsics;
    inputs.imagersizes = vec![[640, 480], [640, 480]];
    inputs.extrinsics_rt_fromref = vec![true_rt_cam1_ref()];
    inputs.frames_rt_toref = true_frames();
    inputs.points = true_points();
    inputs.calibration_object_width_n = BOARD_WIDTH_N;
    inputs.calibration_object_height_n = BOARD_HEIGHT_N;
    inputs.calibration_object_spacing = BOARD_SPACING;
    inputs.selections = ProblemSelections::default().with_regularization(false);

    let mut counter = 0;
    for iframe in 0..inputs.frames_rt_toref.len() {
        for camera in cameras() {
            inputs.observations_board.push(BoardObservation { camera, iframe });
            for j in 0..BOARD_HEIGHT_N {
                for i in 0..BOARD_WIDTH_N {
                    let p_board = board_corner(
                        i,
                        j,
                        BOARD_WIDTH_N,
                        BOARD_HEIGHT_N,
                        BOARD_SPACING,
                        &Vector2::zeros(),
                        None,
                    );
                    let p_ref = inputs.frames_rt_toref[iframe].transform_point(&p_board, None, None);
                    let pixel = observe(&inputs, camera, &p_ref, &mut counter, amplitude)?;
                    inputs.observations_board_pool.push(pixel);
                }
            }
        }
    }

    for ipoint in 0..inputs.points.len() {
        for camera in cameras() {
            let p_ref = inputs.points[ipoint];
            let px = observe(&inputs, camera, &p_ref, &mut counter, amplitude)?;
            inputs.observations_point.push(PointObservation { camera, ipoint, px });
        }
    }

    if triangulated {
        for p_ref in true_triangulated_points() {
            for (k, camera) in cameras().into_iter().enumerate() {
                let px = observe(&inputs, camera, &p_ref, &mut counter, amplitude)?;
                inputs.observations_point_triangulated.push(TriangulatedObservation {
                    camera,
                    last_in_set: k == 1,
                    outlier: false,
                    px,
                });
            }
        }
    }
    Ok(inputs)
}

/// Moves every variable away from the truth, as a rough seed would be.
pub fn perturb(inputs: &mut OptimizationInputs) {
    for (icam, intrinsics) in inputs.intrinsics.iter_mut().enumerate() {
        let sign = if icam == 0 { 1.0 } else { -1.0 };
        intrinsics[0] *= 1.0 + 0.02 * sign;
        intrinsics[1] *= 1.0 + 0.015 * sign;
        intrinsics[2] += 5.0 * sign;
        intrinsics[3] -= 4.0 * sign;
        for d in &mut intrinsics[4..] {
            *d = 0.0;
        }
    }
    perturb_geometry(inputs);
}

/// Moves the extrinsics, frames and points away from the truth, leaving the
/// intrinsics alone.
pub fn perturb_geometry(inputs: &mut OptimizationInputs) {
    for rt in &mut inputs.extrinsics_rt_fromref {
        rt.r += Vector3::new(0.005, -0.01, 0.005);
        rt.t += Vector3::new(0.01, 0.005, -0.01);
    }
    for (i, rt) in inputs.frames_rt_toref.iter_mut().enumerate() {
        let s = if i % 2 == 0 { 1.0 } else { -1.0 };
        rt.r += Vector3::new(0.02, -0.02, 0.01) * s;
        rt.t += Vector3::new(0.01, -0.01, 0.03) * s;
    }
    for p in &mut inputs.points {
        *p += Vector3::new(0.05, -0.05, 0.1);
    }
}

pub fn assert_close(got: f64, want: f64, tolerance: f64, what: &str) {
    assert!(
        (got - want).abs() <= tolerance,
        "{what}: got {got}, want {want} (tolerance {tolerance})"
    );
}
