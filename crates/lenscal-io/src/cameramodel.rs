//! The `CameraModel` type: a lens model, its intrinsics and a pose.

use std::fmt;

use lenscal_lensmodels::{LensModel, project, unproject};
use lenscal_poses::Rt;
use nalgebra::{Vector2, Vector3};

use crate::CameraModelIoError;

/// A complete description of one camera.
///
/// The extrinsics are stored as `rt_cam_ref`: the transform taking points in
/// the reference frame into the camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    lensmodel: LensModel,
    intrinsics: Vec<f64>,
    rt_cam_ref: Rt,
    imagersize: [u32; 2],
}

impl CameraModel {
    /// Builds a camera model, checking the intrinsics against the lens model.
    pub fn new(
        lensmodel: LensModel,
        intrinsics: Vec<f64>,
        rt_cam_ref: Rt,
        imagersize: [u32; 2],
    ) -> Result<Self, CameraModelIoError> {
        lensmodel.validate()?;
        lensmodel.check_intrinsics(&intrinsics)?;
        if imagersize[0] == 0 || imagersize[1] == 0 {
            return Err(CameraModelIoError::InvalidValue {
                key: "imagersize",
                message: format!("{imagersize:?} has a zero dimension"),
            });
        }
        Ok(Self {
            lensmodel,
            intrinsics,
            rt_cam_ref,
            imagersize,
        })
    }

    pub fn lensmodel(&self) -> &LensModel {
        &self.lensmodel
    }

    pub fn intrinsics(&self) -> &[f64] {
        &self.intrinsics
    }

    pub fn imagersize(&self) -> [u32; 2] {
        self.imagersize
    }

    /// Transform from the reference frame to the camera frame.
    pub fn extrinsics_rt_fromref(&self) -> Rt {
        self.rt_cam_ref
    }

    /// Transform from the camera frame to the reference frame.
    pub fn extrinsics_rt_toref(&self) -> Rt {
        self.rt_cam_ref.inverse()
    }

    pub fn set_extrinsics_rt_fromref(&mut self, rt_cam_ref: Rt) {
        self.rt_cam_ref = rt_cam_ref;
    }

    /// Sets the pose from the opposite direction; the stored pose is the inverse.
    pub fn set_extrinsics_rt_toref(&mut self, rt_ref_cam: Rt) {
        self.rt_cam_ref = rt_ref_cam.inverse();
    }

    /// Replaces the intrinsics, keeping the lens model.
    pub fn set_intrinsics(&mut self, intrinsics: Vec<f64>) -> Result<(), CameraModelIoError> {
        self.lensmodel.check_intrinsics(&intrinsics)?;
        self.intrinsics = intrinsics;
        Ok(())
    }

    /// Projects camera-frame points into pixels.
    pub fn project(&self, points: &[Vector3<f64>]) -> Result<Vec<Vector2<f64>>, CameraModelIoError> {
        Ok(project(points, &self.lensmodel, &self.intrinsics)?)
    }

    /// Unprojects pixels into camera-frame directions (not normalized).
    pub fn unproject(&self, pixels: &[Vector2<f64>]) -> Result<Vec<Vector3<f64>>, CameraModelIoError> {
        Ok(unproject(pixels, &self.lensmodel, &self.intrinsics)?)
    }
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CameraModel [ {}, imagersize: {}x{}, rt_cam_ref: {} ]",
            self.lensmodel, self.imagersize[0], self.imagersize[1], self.rt_cam_ref
        )
    }
}
