//! Camera model files written to disk and read back.

use lenscal_io::{CameraModel, read_cameramodel_file, write_cameramodel_file};
use lenscal_lensmodels::{CahvoreConfig, LensModel, SplinedStereographicConfig};
use lenscal_poses::Rt;
use nalgebra::Vector3;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn models() -> Result<Vec<CameraModel>, Box<dyn std::error::Error>> {
    let splined = SplinedStereographicConfig::new(3, 6, 5, 150);
    let mut splined_intrinsics = vec![420.0, 421.5, 639.5, 479.5];
    splined_intrinsics.extend((0..2 * splined.num_knots()).map(|k| 1e-3 * k as f64));

    Ok(vec![
        CameraModel::new(
            LensModel::Opencv4,
            vec![1500.0, 1499.0, 959.5, 539.5, -0.1, 0.02, 1e-4, -3e-5],
            Rt::new(Vector3::new(0.01, 0.02, -0.03), Vector3::new(-0.5, 0.0, 0.01)),
            [1920, 1080],
        )?,
        CameraModel::new(
            LensModel::Cahvore(CahvoreConfig { linearity: 0.37 }),
            vec![1500.0, 1499.0, 959.5, 539.5, 0.0, 0.0, 0.0, 0.01, 0.0, 0.0, 0.0, 0.0],
            Rt::identity(),
            [1920, 1080],
        )?,
        CameraModel::new(
            LensModel::SplinedStereographic(splined),
            splined_intrinsics,
            Rt::identity(),
            [1280, 960],
        )?,
    ])
}

#[test]
fn test_file_round_trip() -> TestResult {
    let dir = tempfile::tempdir()?;
    for (i, model) in models()?.into_iter().enumerate() {
        let path = dir.path().join(format!("camera{i}.cameramodel"));
        write_cameramodel_file(&model, &path)?;
        let back = read_cameramodel_file(&path)?;
        assert_eq!(back, model);
    }
    Ok(())
}

#[test]
fn test_missing_file_is_io_error() {
    let result = read_cameramodel_file("/nonexistent/dir/camera.cameramodel");
    assert!(matches!(result, Err(lenscal_io::CameraModelIoError::Io(_))));
}
