//! Observations and the caller-owned inputs of a calibration problem.

use lenscal_lensmodels::{LensModel, LensModelError};
use lenscal_poses::Rt;
use nalgebra::{Vector2, Vector3};

use crate::error::{CalibrationError, CalibrationResult, check_size};
use crate::problem::{ProblemConstants, ProblemSelections, ProblemSizes};

/// Which intrinsics and extrinsics a camera uses.
///
/// `extrinsics: None` means the camera sits at the reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraIndex {
    pub intrinsics: usize,
    pub extrinsics: Option<usize>,
}

impl CameraIndex {
    pub fn new(intrinsics: usize, extrinsics: Option<usize>) -> Self {
        Self {
            intrinsics,
            extrinsics,
        }
    }

    /// A camera at the reference frame.
    pub fn at_reference(intrinsics: usize) -> Self {
        Self::new(intrinsics, None)
    }
}

/// An observed pixel. A negative weight flags an outlier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservedPixel {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

impl ObservedPixel {
    pub fn new(x: f64, y: f64, weight: f64) -> Self {
        Self { x, y, weight }
    }

    pub fn q(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    pub fn is_outlier(&self) -> bool {
        self.weight < 0.0
    }
}

/// One camera looking at the calibration object in frame `iframe`.
///
/// The corner pixels live in [`OptimizationInputs::observations_board_pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardObservation {
    pub camera: CameraIndex,
    pub iframe: usize,
}

/// One camera looking at discrete point `ipoint`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointObservation {
    pub camera: CameraIndex,
    pub ipoint: usize,
    pub px: ObservedPixel,
}

/// One observation of a point whose position is not part of the state.
///
/// Consecutive observations of the same point form a group terminated by
/// `last_in_set`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangulatedObservation {
    pub camera: CameraIndex,
    pub last_in_set: bool,
    pub outlier: bool,
    pub px: ObservedPixel,
}

impl TriangulatedObservation {
    pub fn is_outlier(&self) -> bool {
        self.outlier || self.px.is_outlier()
    }
}

/// Everything a solve reads, and the state it writes back.
///
/// The optimizer overwrites the poses, points, intrinsics and warp with the
/// solution and flags rejected observations by negating their pool weight.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationInputs {
    /// One lens model shared by every camera
    pub lensmodel: LensModel,
    /// Per intrinsics camera
    pub intrinsics: Vec<Vec<f64>>,
    /// Per extrinsics camera: reference to camera
    pub extrinsics_rt_fromref: Vec<Rt>,
    /// Per frame: calibration object to reference
    pub frames_rt_toref: Vec<Rt>,
    /// Discrete points in the reference frame
    pub points: Vec<Vector3<f64>>,
    pub calobject_warp: Vector2<f64>,

    pub observations_board: Vec<BoardObservation>,
    /// `width_n * height_n` pixels per board observation, row-major per board
    pub observations_board_pool: Vec<ObservedPixel>,
    pub observations_point: Vec<PointObservation>,
    pub observations_point_triangulated: Vec<TriangulatedObservation>,

    /// Per intrinsics camera, `[width, height]`
    pub imagersizes: Vec<[u32; 2]>,
    pub calibration_object_spacing: f64,
    pub calibration_object_width_n: usize,
    pub calibration_object_height_n: usize,
    /// The last `npoints_fixed` points are held fixed
    pub npoints_fixed: usize,

    pub selections: ProblemSelections,
    pub constants: ProblemConstants,
}

impl OptimizationInputs {
    /// An empty problem for one lens model; fill in the vectors afterwards.
    pub fn new(lensmodel: LensModel) -> Self {
        Self {
            lensmodel,
            intrinsics: Vec::new(),
            extrinsics_rt_fromref: Vec::new(),
            frames_rt_toref: Vec::new(),
            points: Vec::new(),
            calobject_warp: Vector2::zeros(),
            observations_board: Vec::new(),
            observations_board_pool: Vec::new(),
            observations_point: Vec::new(),
            observations_point_triangulated: Vec::new(),
            imagersizes: Vec::new(),
            calibration_object_spacing: 1.0,
            calibration_object_width_n: 0,
            calibration_object_height_n: 0,
            npoints_fixed: 0,
            selections: ProblemSelections::default(),
            constants: ProblemConstants::default(),
        }
    }

    pub fn sizes(&self) -> ProblemSizes {
        ProblemSizes {
            ncameras_intrinsics: self.intrinsics.len(),
            ncameras_extrinsics: self.extrinsics_rt_fromref.len(),
            nframes: self.frames_rt_toref.len(),
            npoints: self.points.len(),
            npoints_fixed: self.npoints_fixed,
            nobservations_board: self.observations_board.len(),
            nobservations_point: self.observations_point.len(),
            calibration_object_width_n: self.calibration_object_width_n,
            calibration_object_height_n: self.calibration_object_height_n,
        }
    }

    /// Pool pixels of board observation `iobservation`.
    pub fn board_pixels(&self, iobservation: usize) -> &[ObservedPixel] {
        let n = self.calibration_object_width_n * self.calibration_object_height_n;
        &self.observations_board_pool[iobservation * n..(iobservation + 1) * n]
    }

    /// Checks every length and index before a solve.
    pub fn validate(&self) -> CalibrationResult<()> {
        self.lensmodel.validate()?;
        if !self.lensmodel.metadata().has_gradients {
            return Err(LensModelError::GradientsUnsupported(
                self.lensmodel.model_type().base_name(),
            )
            .into());
        }

        let sizes = self.sizes();
        for intrinsics in &self.intrinsics {
            self.lensmodel.check_intrinsics(intrinsics)?;
        }
        check_size("imagersizes", sizes.ncameras_intrinsics, self.imagersizes.len())?;
        if sizes.npoints_fixed > sizes.npoints {
            return Err(CalibrationError::InvalidInput(format!(
                "{} fixed points but only {} points",
                sizes.npoints_fixed, sizes.npoints
            )));
        }

        if sizes.nobservations_board > 0 {
            if sizes.calibration_object_width_n < 2 || sizes.calibration_object_height_n < 2 {
                return Err(CalibrationError::InvalidInput(format!(
                    "calibration object must be at least 2x2, got {}x{}",
                    sizes.calibration_object_width_n, sizes.calibration_object_height_n
                )));
            }
            if !(self.calibration_object_spacing > 0.0) {
                return Err(CalibrationError::InvalidInput(format!(
                    "calibration object spacing must be positive, got {}",
                    self.calibration_object_spacing
                )));
            }
        }
        check_size(
            "observations_board_pool",
            sizes.nobservations_board * sizes.ncorners_per_board(),
            self.observations_board_pool.len(),
        )?;

        for (i, obs) in self.observations_board.iter().enumerate() {
            self.check_camera(obs.camera, "board", i)?;
            if obs.iframe >= sizes.nframes {
                return Err(CalibrationError::InvalidInput(format!(
                    "board observation {i} references frame {} of {}",
                    obs.iframe, sizes.nframes
                )));
            }
        }
        for (i, obs) in self.observations_point.iter().enumerate() {
            self.check_camera(obs.camera, "point", i)?;
            if obs.ipoint >= sizes.npoints {
                return Err(CalibrationError::InvalidInput(format!(
                    "point observation {i} references point {} of {}",
                    obs.ipoint, sizes.npoints
                )));
            }
        }
        self.validate_triangulated()
    }

    fn check_camera(&self, camera: CameraIndex, kind: &str, i: usize) -> CalibrationResult<()> {
        if camera.intrinsics >= self.intrinsics.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "{kind} observation {i} references intrinsics {} of {}",
                camera.intrinsics,
                self.intrinsics.len()
            )));
        }
        if let Some(e) = camera.extrinsics
            && e >= self.extrinsics_rt_fromref.len()
        {
            return Err(CalibrationError::InvalidInput(format!(
                "{kind} observation {i} references extrinsics {e} of {}",
                self.extrinsics_rt_fromref.len()
            )));
        }
        Ok(())
    }

    fn validate_triangulated(&self) -> CalibrationResult<()> {
        let observations = &self.observations_point_triangulated;
        for (i, obs) in observations.iter().enumerate() {
            self.check_camera(obs.camera, "triangulated", i)?;
        }
        if let Some(last) = observations.last()
            && !last.last_in_set
        {
            return Err(CalibrationError::InvalidInput(
                "the last triangulated point group is not terminated".to_string(),
            ));
        }
        for (start, end) in triangulated_groups(observations) {
            let group = &observations[start..end];
            if group.len() < 2 {
                return Err(CalibrationError::InvalidInput(format!(
                    "triangulated point group at observation {start} has a single observation"
                )));
            }
            for (k, a) in group.iter().enumerate() {
                if group[k + 1..].iter().any(|b| b.camera == a.camera) {
                    return Err(CalibrationError::InvalidInput(format!(
                        "triangulated point group at observation {start} sees camera {:?} twice",
                        a.camera
                    )));
                }
            }
        }
        let (min, max) = (self.constants.point_min_range, self.constants.point_max_range);
        if !observations.is_empty() && !(min >= 0.0 && min <= max) {
            return Err(CalibrationError::InvalidInput(format!(
                "bad triangulated range bounds [{min}, {max}]"
            )));
        }
        Ok(())
    }
}

/// `[start, end)` ranges of the triangulated point groups.
///
/// An unterminated trailing run is reported as a group too.
pub fn triangulated_groups(observations: &[TriangulatedObservation]) -> Vec<(usize, usize)> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, obs) in observations.iter().enumerate() {
        if obs.last_in_set {
            groups.push((start, i + 1));
            start = i + 1;
        }
    }
    if start < observations.len() {
        groups.push((start, observations.len()));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(camera: usize, last_in_set: bool) -> TriangulatedObservation {
        TriangulatedObservation {
            camera: CameraIndex::new(camera, camera.checked_sub(1)),
            last_in_set,
            outlier: false,
            px: ObservedPixel::new(1.0, 2.0, 1.0),
        }
    }

    fn two_camera_inputs() -> OptimizationInputs {
        let mut inputs = OptimizationInputs::new(LensModel::Pinhole);
        inputs.intrinsics = vec![vec![500.0, 500.0, 320.0, 240.0]; 2];
        inputs.imagersizes = vec![[640, 480]; 2];
        inputs.extrinsics_rt_fromref = vec![Rt::identity()];
        inputs.points = vec![Vector3::new(0.0, 0.0, 5.0)];
        inputs
    }

    #[test]
    fn test_triangulated_groups() {
        let obs = [tri(0, false), tri(1, true), tri(0, false), tri(1, false), tri(0, true)];
        assert_eq!(triangulated_groups(&obs), vec![(0, 2), (2, 5)]);
        assert_eq!(triangulated_groups(&obs[..4]), vec![(0, 2), (2, 4)]);
    }

    #[test]
    fn test_validate_accepts_consistent_inputs() {
        let mut inputs = two_camera_inputs();
        inputs.observations_point.push(PointObservation {
            camera: CameraIndex::new(1, Some(0)),
            ipoint: 0,
            px: ObservedPixel::new(320.0, 240.0, 1.0),
        });
        inputs.observations_point_triangulated = vec![tri(0, false), tri(1, true)];
        assert!(inputs.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_triangulated_groups() {
        let mut inputs = two_camera_inputs();
        inputs.observations_point_triangulated = vec![tri(0, true)];
        assert!(matches!(inputs.validate(), Err(CalibrationError::InvalidInput(_))));

        inputs.observations_point_triangulated = vec![tri(1, false), tri(1, true)];
        assert!(matches!(inputs.validate(), Err(CalibrationError::InvalidInput(_))));

        inputs.observations_point_triangulated = vec![tri(0, false), tri(1, false)];
        assert!(matches!(inputs.validate(), Err(CalibrationError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_bad_indices() {
        let mut inputs = two_camera_inputs();
        inputs.observations_point.push(PointObservation {
            camera: CameraIndex::new(0, Some(3)),
            ipoint: 0,
            px: ObservedPixel::new(0.0, 0.0, 1.0),
        });
        assert!(matches!(inputs.validate(), Err(CalibrationError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_pool_size_mismatch() {
        let mut inputs = two_camera_inputs();
        inputs.calibration_object_width_n = 3;
        inputs.calibration_object_height_n = 2;
        inputs.frames_rt_toref = vec![Rt::identity()];
        inputs.observations_board.push(BoardObservation {
            camera: CameraIndex::at_reference(0),
            iframe: 0,
        });
        inputs.observations_board_pool = vec![ObservedPixel::new(0.0, 0.0, 1.0); 5];
        assert!(matches!(
            inputs.validate(),
            Err(CalibrationError::SizeMismatch { expected: 6, got: 5, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_cahvore() {
        let mut inputs = two_camera_inputs();
        inputs.lensmodel = LensModel::Cahvore(lenscal_lensmodels::CahvoreConfig { linearity: 1.0 });
        inputs.intrinsics = vec![vec![0.0; 12]; 2];
        assert!(matches!(
            inputs.validate(),
            Err(CalibrationError::LensModel(LensModelError::GradientsUnsupported(_)))
        ));
    }
}
