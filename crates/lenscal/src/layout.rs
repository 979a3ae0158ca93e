//! State and measurement vector layout.
//!
//! Every offset is a pure function of the problem sizes, the selections and
//! the lens model, so the state packer, the residual builder and the caller
//! can never disagree about where a variable or a residual lives.
//!
//! State vector order:
//!
//! ```text
//! [ intrinsics (per camera) | extrinsics (6 per camera) | frames (6 per frame)
//!   | points (3 per free point) | calobject warp (2) ]
//! ```
//!
//! Measurement vector order:
//!
//! ```text
//! [ boards (2 per corner) | points (2 per observation)
//!   | triangulated (2 per observation pair) | regularization ]
//! ```

use lenscal_lensmodels::LensModel;
use lenscal_poses::Rt;
use nalgebra::{Vector2, Vector3};

use crate::error::{CalibrationError, CalibrationResult, check_size};
use crate::observations::{OptimizationInputs, TriangulatedObservation, triangulated_groups};
use crate::problem::{ProblemSelections, ProblemSizes};

/// Focal lengths, in pixels per packed unit
pub const SCALE_INTRINSICS_FOCAL: f64 = 500.0;
/// Centre pixel, in pixels per packed unit
pub const SCALE_INTRINSICS_CENTER: f64 = 20.0;
pub const SCALE_DISTORTION: f64 = 1.0;
/// 0.1°, in radians
pub const SCALE_ROTATION_CAMERA: f64 = 0.1 * std::f64::consts::PI / 180.0;
pub const SCALE_TRANSLATION_CAMERA: f64 = 1.0;
/// 15°, in radians
pub const SCALE_ROTATION_FRAME: f64 = 15.0 * std::f64::consts::PI / 180.0;
pub const SCALE_TRANSLATION_FRAME: f64 = 1.0;
pub const SCALE_POSITION_POINT: f64 = 1.0;
pub const SCALE_CALOBJECT_WARP: f64 = 0.01;

/// The physical values of every variable class, in the units the caller uses.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemState {
    pub intrinsics: Vec<Vec<f64>>,
    pub extrinsics: Vec<Rt>,
    pub frames: Vec<Rt>,
    pub points: Vec<Vector3<f64>>,
    pub calobject_warp: Vector2<f64>,
}

impl ProblemState {
    pub fn from_inputs(inputs: &OptimizationInputs) -> Self {
        Self {
            intrinsics: inputs.intrinsics.clone(),
            extrinsics: inputs.extrinsics_rt_fromref.clone(),
            frames: inputs.frames_rt_toref.clone(),
            points: inputs.points.clone(),
            calobject_warp: inputs.calobject_warp,
        }
    }

    /// Copies the state into the inputs it was read from.
    pub fn write_to(&self, inputs: &mut OptimizationInputs) {
        inputs.intrinsics.clone_from(&self.intrinsics);
        inputs.extrinsics_rt_fromref.clone_from(&self.extrinsics);
        inputs.frames_rt_toref.clone_from(&self.frames);
        inputs.points.clone_from(&self.points);
        inputs.calobject_warp = self.calobject_warp;
    }
}

/// One pair of observations of a triangulated point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangulatedPair {
    /// Index of the point group
    pub ipoint: usize,
    pub iobservation0: usize,
    pub iobservation1: usize,
}

/// Enumerates the observation pairs of every triangulated point group, in
/// measurement order.
pub fn decode_observation_indices_points_triangulated(
    observations: &[TriangulatedObservation],
) -> Vec<TriangulatedPair> {
    let mut pairs = Vec::new();
    for (ipoint, (start, end)) in triangulated_groups(observations).into_iter().enumerate() {
        for i0 in start..end {
            for i1 in i0 + 1..end {
                pairs.push(TriangulatedPair {
                    ipoint,
                    iobservation0: i0,
                    iobservation1: i1,
                });
            }
        }
    }
    pairs
}

/// The extrinsics index of a stationary camera.
///
/// # Errors
///
/// - `MovingCamera` if the intrinsics camera is observed through more than
///   one extrinsics index
/// - `InvalidInput` if the camera does not exist or is never observed
pub fn corresponding_icam_extrinsics(
    icam_intrinsics: usize,
    inputs: &OptimizationInputs,
) -> CalibrationResult<Option<usize>> {
    if icam_intrinsics >= inputs.intrinsics.len() {
        return Err(CalibrationError::InvalidInput(format!(
            "no intrinsics camera {icam_intrinsics}"
        )));
    }
    let cameras = inputs
        .observations_board
        .iter()
        .map(|o| o.camera)
        .chain(inputs.observations_point.iter().map(|o| o.camera))
        .chain(inputs.observations_point_triangulated.iter().map(|o| o.camera))
        .filter(|c| c.intrinsics == icam_intrinsics);

    let mut found = None;
    for camera in cameras {
        match found {
            None => found = Some(camera.extrinsics),
            Some(extrinsics) if extrinsics != camera.extrinsics => {
                return Err(CalibrationError::MovingCamera { icam_intrinsics });
            }
            Some(_) => {}
        }
    }
    found.ok_or_else(|| {
        CalibrationError::InvalidInput(format!("camera {icam_intrinsics} is never observed"))
    })
}

/// Offsets and sizes of the state and measurement vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemLayout {
    sizes: ProblemSizes,
    selections: ProblemSelections,
    nintrinsics: usize,
    ndistortion: usize,
    has_core: bool,
    ntriangulated_pairs: usize,
}

impl ProblemLayout {
    pub fn new(
        sizes: ProblemSizes,
        selections: ProblemSelections,
        lensmodel: &LensModel,
        ntriangulated_pairs: usize,
    ) -> Self {
        Self {
            sizes,
            selections,
            nintrinsics: lensmodel.num_params(),
            ndistortion: lensmodel.num_distortion_params(),
            has_core: lensmodel.metadata().has_core,
            ntriangulated_pairs,
        }
    }

    pub fn from_inputs(inputs: &OptimizationInputs) -> Self {
        let npairs =
            decode_observation_indices_points_triangulated(&inputs.observations_point_triangulated).len();
        Self::new(inputs.sizes(), inputs.selections, &inputs.lensmodel, npairs)
    }

    pub fn sizes(&self) -> &ProblemSizes {
        &self.sizes
    }

    pub fn selections(&self) -> &ProblemSelections {
        &self.selections
    }

    fn optimizes_core(&self) -> bool {
        self.has_core && self.selections.do_optimize_intrinsics_core
    }

    fn optimizes_warp(&self) -> bool {
        self.selections.do_optimize_calobject_warp && self.sizes.nobservations_board > 0
    }

    // State

    /// Optimized intrinsics per camera.
    pub fn num_intrinsics_optimization_params(&self) -> usize {
        let core = if self.optimizes_core() { 4 } else { 0 };
        let distortion = if self.selections.do_optimize_intrinsics_distortions {
            self.ndistortion
        } else {
            0
        };
        core + distortion
    }

    pub fn num_states_intrinsics(&self) -> usize {
        self.sizes.ncameras_intrinsics * self.num_intrinsics_optimization_params()
    }

    pub fn num_states_extrinsics(&self) -> usize {
        if self.selections.do_optimize_extrinsics {
            6 * self.sizes.ncameras_extrinsics
        } else {
            0
        }
    }

    pub fn num_states_frames(&self) -> usize {
        if self.selections.do_optimize_frames {
            6 * self.sizes.nframes
        } else {
            0
        }
    }

    pub fn num_states_points(&self) -> usize {
        if self.selections.do_optimize_frames {
            3 * self.sizes.npoints_variable()
        } else {
            0
        }
    }

    pub fn num_states_calobject_warp(&self) -> usize {
        if self.optimizes_warp() { 2 } else { 0 }
    }

    pub fn num_states(&self) -> usize {
        self.num_states_intrinsics()
            + self.num_states_extrinsics()
            + self.num_states_frames()
            + self.num_states_points()
            + self.num_states_calobject_warp()
    }

    pub fn state_index_intrinsics(&self, icam_intrinsics: usize) -> Option<usize> {
        let n = self.num_intrinsics_optimization_params();
        (n > 0 && icam_intrinsics < self.sizes.ncameras_intrinsics).then_some(icam_intrinsics * n)
    }

    pub fn state_index_extrinsics(&self, icam_extrinsics: usize) -> Option<usize> {
        (self.selections.do_optimize_extrinsics && icam_extrinsics < self.sizes.ncameras_extrinsics)
            .then(|| self.num_states_intrinsics() + 6 * icam_extrinsics)
    }

    pub fn state_index_frames(&self, iframe: usize) -> Option<usize> {
        (self.selections.do_optimize_frames && iframe < self.sizes.nframes).then(|| {
            self.num_states_intrinsics() + self.num_states_extrinsics() + 6 * iframe
        })
    }

    /// `None` for fixed points too.
    pub fn state_index_points(&self, ipoint: usize) -> Option<usize> {
        (self.selections.do_optimize_frames && ipoint < self.sizes.npoints_variable()).then(|| {
            self.num_states_intrinsics()
                + self.num_states_extrinsics()
                + self.num_states_frames()
                + 3 * ipoint
        })
    }

    pub fn state_index_calobject_warp(&self) -> Option<usize> {
        self.optimizes_warp().then(|| {
            self.num_states_intrinsics()
                + self.num_states_extrinsics()
                + self.num_states_frames()
                + self.num_states_points()
        })
    }

    /// State column and packing scale of intrinsics parameter `iparam`, if
    /// it is optimized.
    pub fn intrinsics_state(&self, icam_intrinsics: usize, iparam: usize) -> Option<(usize, f64)> {
        let start = self.state_index_intrinsics(icam_intrinsics)?;
        let ncore = if self.has_core { 4 } else { 0 };
        if iparam < ncore {
            if !self.optimizes_core() {
                return None;
            }
            let scale = if iparam < 2 {
                SCALE_INTRINSICS_FOCAL
            } else {
                SCALE_INTRINSICS_CENTER
            };
            Some((start + iparam, scale))
        } else if iparam < self.nintrinsics && self.selections.do_optimize_intrinsics_distortions {
            let offset = if self.optimizes_core() { 4 } else { 0 };
            Some((start + offset + iparam - ncore, SCALE_DISTORTION))
        } else {
            None
        }
    }

    // Measurements

    pub fn num_measurements_boards(&self) -> usize {
        2 * self.sizes.nobservations_board * self.sizes.ncorners_per_board()
    }

    pub fn num_measurements_points(&self) -> usize {
        2 * self.sizes.nobservations_point
    }

    pub fn num_measurements_points_triangulated(&self) -> usize {
        2 * self.ntriangulated_pairs
    }

    /// Distortion terms per camera, in regularization order.
    pub fn num_regularization_distortion_per_camera(&self) -> usize {
        if self.selections.do_apply_regularization && self.selections.do_optimize_intrinsics_distortions {
            self.ndistortion
        } else {
            0
        }
    }

    /// Centre-pixel terms per camera.
    pub fn num_regularization_center_per_camera(&self) -> usize {
        if self.selections.do_apply_regularization && self.optimizes_core() {
            2
        } else {
            0
        }
    }

    pub fn has_regularization_unity_cam01(&self) -> bool {
        self.selections.do_apply_regularization_unity_cam01
            && self.selections.do_optimize_extrinsics
            && self.sizes.ncameras_extrinsics > 0
    }

    pub fn num_measurements_regularization(&self) -> usize {
        self.sizes.ncameras_intrinsics
            * (self.num_regularization_distortion_per_camera()
                + self.num_regularization_center_per_camera())
            + usize::from(self.has_regularization_unity_cam01())
    }

    pub fn num_measurements(&self) -> usize {
        self.num_measurements_boards()
            + self.num_measurements_points()
            + self.num_measurements_points_triangulated()
            + self.num_measurements_regularization()
    }

    pub fn measurement_index_boards(&self, iobservation: usize) -> usize {
        2 * iobservation * self.sizes.ncorners_per_board()
    }

    pub fn measurement_index_points(&self, iobservation: usize) -> usize {
        self.num_measurements_boards() + 2 * iobservation
    }

    pub fn measurement_index_points_triangulated(&self, ipair: usize) -> usize {
        self.num_measurements_boards() + self.num_measurements_points() + 2 * ipair
    }

    pub fn measurement_index_regularization(&self) -> usize {
        self.num_measurements_boards()
            + self.num_measurements_points()
            + self.num_measurements_points_triangulated()
    }

    // Packing

    /// Packed-unit scale of every state entry.
    pub fn state_scales(&self) -> Vec<f64> {
        let mut scales = Vec::with_capacity(self.num_states());
        for icam in 0..self.sizes.ncameras_intrinsics {
            for iparam in 0..self.nintrinsics {
                if let Some((_, scale)) = self.intrinsics_state(icam, iparam) {
                    scales.push(scale);
                }
            }
        }
        let pose = |scales: &mut Vec<f64>, n: usize, r: f64, t: f64| {
            for _ in 0..n {
                scales.extend_from_slice(&[r, r, r, t, t, t]);
            }
        };
        pose(&mut scales, self.num_states_extrinsics() / 6, SCALE_ROTATION_CAMERA, SCALE_TRANSLATION_CAMERA);
        pose(&mut scales, self.num_states_frames() / 6, SCALE_ROTATION_FRAME, SCALE_TRANSLATION_FRAME);
        scales.resize(scales.len() + self.num_states_points(), SCALE_POSITION_POINT);
        scales.resize(scales.len() + self.num_states_calobject_warp(), SCALE_CALOBJECT_WARP);
        scales
    }

    /// Divides each physical state entry by its scale, in place.
    pub fn pack(&self, b: &mut [f64]) -> CalibrationResult<()> {
        check_size("state vector", self.num_states(), b.len())?;
        for (value, scale) in b.iter_mut().zip(self.state_scales()) {
            *value /= scale;
        }
        Ok(())
    }

    /// Multiplies each packed state entry by its scale, in place.
    pub fn unpack(&self, b: &mut [f64]) -> CalibrationResult<()> {
        check_size("state vector", self.num_states(), b.len())?;
        for (value, scale) in b.iter_mut().zip(self.state_scales()) {
            *value *= scale;
        }
        Ok(())
    }

    fn check_state(&self, state: &ProblemState) -> CalibrationResult<()> {
        check_size("intrinsics", self.sizes.ncameras_intrinsics, state.intrinsics.len())?;
        for intrinsics in &state.intrinsics {
            check_size("intrinsics", self.nintrinsics, intrinsics.len())?;
        }
        check_size("extrinsics", self.sizes.ncameras_extrinsics, state.extrinsics.len())?;
        check_size("frames", self.sizes.nframes, state.frames.len())?;
        check_size("points", self.sizes.npoints, state.points.len())
    }

    /// Gathers the optimized variables of `state` into a packed vector.
    pub fn pack_state(&self, state: &ProblemState) -> CalibrationResult<Vec<f64>> {
        self.check_state(state)?;
        let mut b = Vec::with_capacity(self.num_states());
        for (icam, intrinsics) in state.intrinsics.iter().enumerate() {
            for (iparam, value) in intrinsics.iter().enumerate() {
                if self.intrinsics_state(icam, iparam).is_some() {
                    b.push(*value);
                }
            }
        }
        if self.selections.do_optimize_extrinsics {
            for rt in &state.extrinsics {
                b.extend_from_slice(&rt.to_array());
            }
        }
        if self.selections.do_optimize_frames {
            for rt in &state.frames {
                b.extend_from_slice(&rt.to_array());
            }
            for p in &state.points[..self.sizes.npoints_variable()] {
                b.extend_from_slice(p.as_slice());
            }
        }
        if self.optimizes_warp() {
            b.extend_from_slice(state.calobject_warp.as_slice());
        }
        self.pack(&mut b)?;
        Ok(b)
    }

    /// Scatters a packed vector into the optimized variables of `state`.
    /// Variables that are not optimized are left untouched.
    pub fn unpack_state(&self, b_packed: &[f64], state: &mut ProblemState) -> CalibrationResult<()> {
        self.check_state(state)?;
        let mut b = b_packed.to_vec();
        self.unpack(&mut b)?;

        for (icam, intrinsics) in state.intrinsics.iter_mut().enumerate() {
            for (iparam, value) in intrinsics.iter_mut().enumerate() {
                if let Some((index, _)) = self.intrinsics_state(icam, iparam) {
                    *value = b[index];
                }
            }
        }
        for (i, rt) in state.extrinsics.iter_mut().enumerate() {
            if let Some(index) = self.state_index_extrinsics(i) {
                *rt = Rt::from_slice(&b[index..index + 6]);
            }
        }
        for (i, rt) in state.frames.iter_mut().enumerate() {
            if let Some(index) = self.state_index_frames(i) {
                *rt = Rt::from_slice(&b[index..index + 6]);
            }
        }
        for (i, p) in state.points.iter_mut().enumerate() {
            if let Some(index) = self.state_index_points(i) {
                *p = Vector3::new(b[index], b[index + 1], b[index + 2]);
            }
        }
        if let Some(index) = self.state_index_calobject_warp() {
            state.calobject_warp = Vector2::new(b[index], b[index + 1]);
        }
        Ok(())
    }
}

/// Packs the optimized variables of `inputs`.
pub fn pack_state(inputs: &OptimizationInputs) -> CalibrationResult<Vec<f64>> {
    ProblemLayout::from_inputs(inputs).pack_state(&ProblemState::from_inputs(inputs))
}

/// Unpacks `b_packed` into the optimized variables of `inputs`.
pub fn unpack_state(b_packed: &[f64], inputs: &mut OptimizationInputs) -> CalibrationResult<()> {
    let layout = ProblemLayout::from_inputs(inputs);
    let mut state = ProblemState::from_inputs(inputs);
    layout.unpack_state(b_packed, &mut state)?;
    state.write_to(inputs);
    Ok(())
}
