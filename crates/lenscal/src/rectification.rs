//! Stereo rectification.
//!
//! A rectified pair shares one orientation: `x` along the baseline, `z` the
//! mean of the two optical axes made perpendicular to the baseline. The
//! rectified cameras keep their physical origins, so a point lies on the
//! same epipolar plane (a rotation about `x`) in both. With the LATLON model
//! that plane is an image row:
//!
//! ```text
//! qx = f·asin(x/|p|) + cx      (azimuth)
//! qy = f·atan2(y, z) + cy      (elevation, shared by both cameras)
//! ```
//!
//! The pinhole model keeps rows aligned as well, over a narrower field of
//! view.

use lenscal_io::CameraModel;
use lenscal_lensmodels::{LensModel, project_point, unproject_point};
use lenscal_poses::Rt;
use nalgebra::{Matrix3, Vector2, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{CalibrationError, CalibrationResult};

/// Projection of the rectified images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RectificationModel {
    #[default]
    Latlon,
    Pinhole,
}

impl RectificationModel {
    pub fn lensmodel(self) -> LensModel {
        match self {
            RectificationModel::Latlon => LensModel::Latlon,
            RectificationModel::Pinhole => LensModel::Pinhole,
        }
    }
}

/// Angular resolution of the rectified images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelsPerDegree {
    /// The resolution of camera 0 at its imager centre, times `scale`
    Auto { scale: f64 },
    Explicit(f64),
}

impl Default for PixelsPerDegree {
    fn default() -> Self {
        PixelsPerDegree::Auto { scale: 1.0 }
    }
}

/// Settings of [`rectified_system`].
#[derive(Debug, Clone, PartialEq)]
pub struct RectificationConfig {
    pub model: RectificationModel,
    pub pixels_per_deg: PixelsPerDegree,
    /// Azimuth field of view, degrees
    pub az_fov_deg: f64,
    /// Elevation field of view, degrees
    pub el_fov_deg: f64,
    /// Azimuth of the image centre; the mean optical axis when `None`
    pub az0_deg: Option<f64>,
    /// Elevation of the image centre
    pub el0_deg: f64,
}

impl Default for RectificationConfig {
    fn default() -> Self {
        Self {
            model: RectificationModel::default(),
            pixels_per_deg: PixelsPerDegree::default(),
            az_fov_deg: 60.0,
            el_fov_deg: 40.0,
            az0_deg: None,
            el0_deg: 0.0,
        }
    }
}

impl RectificationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: RectificationModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_pixels_per_deg(mut self, pixels_per_deg: PixelsPerDegree) -> Self {
        self.pixels_per_deg = pixels_per_deg;
        self
    }

    pub fn with_fov_deg(mut self, az_fov_deg: f64, el_fov_deg: f64) -> Self {
        self.az_fov_deg = az_fov_deg;
        self.el_fov_deg = el_fov_deg;
        self
    }

    pub fn with_center_deg(mut self, az0_deg: f64, el0_deg: f64) -> Self {
        self.az0_deg = Some(az0_deg);
        self.el0_deg = el0_deg;
        self
    }

    fn validate(&self) -> CalibrationResult<()> {
        let max_fov = match self.model {
            RectificationModel::Latlon => 360.0,
            RectificationModel::Pinhole => 180.0,
        };
        for (name, fov) in [("azimuth", self.az_fov_deg), ("elevation", self.el_fov_deg)] {
            if !(fov > 0.0 && fov < max_fov) {
                return Err(CalibrationError::InvalidInput(format!(
                    "{name} field of view {fov}° must be in (0, {max_fov})"
                )));
            }
        }
        Ok(())
    }
}

/// A rectified camera pair.
#[derive(Debug, Clone)]
pub struct RectifiedSystem {
    /// Rectified cameras 0 and 1; extrinsics relative to the original reference
    pub models: [CameraModel; 2],
    /// Distance between the two camera origins
    pub baseline: f64,
    pub pixels_per_deg: f64,
}

/// Pixels per degree and imager size of the rectified images.
pub fn rectified_resolution(camera0: &CameraModel, config: &RectificationConfig) -> CalibrationResult<(f64, [u32; 2])> {
    config.validate()?;
    let pixels_per_deg = match config.pixels_per_deg {
        PixelsPerDegree::Explicit(ppd) => ppd,
        PixelsPerDegree::Auto { scale } => scale * native_pixels_per_deg(camera0)?,
    };
    if !(pixels_per_deg > 0.0 && pixels_per_deg.is_finite()) {
        return Err(CalibrationError::InvalidInput(format!(
            "pixels per degree must be positive, got {pixels_per_deg}"
        )));
    }

    let focal = pixels_per_deg.to_degrees();
    let extent = |fov_deg: f64| -> f64 {
        match config.model {
            RectificationModel::Latlon => fov_deg * pixels_per_deg,
            RectificationModel::Pinhole => 2.0 * focal * (fov_deg.to_radians() / 2.0).tan(),
        }
    };
    let size = |fov_deg: f64| extent(fov_deg).round().max(1.0) as u32;
    Ok((pixels_per_deg, [size(config.az_fov_deg), size(config.el_fov_deg)]))
}

/// Angular resolution at the imager centre, from two adjacent pixels.
fn native_pixels_per_deg(camera: &CameraModel) -> CalibrationResult<f64> {
    let [width, height] = camera.imagersize();
    let centre = Vector2::new((f64::from(width) - 1.0) / 2.0, (f64::from(height) - 1.0) / 2.0);
    let v0 = unproject_point(&centre, camera.lensmodel(), camera.intrinsics())?;
    let v1 = unproject_point(&(centre + Vector2::new(1.0, 0.0)), camera.lensmodel(), camera.intrinsics())?;
    let angle_deg = v0.angle(&v1).to_degrees();
    if angle_deg <= 0.0 {
        return Err(CalibrationError::InvalidInput(
            "camera 0 has no angular resolution at its centre".to_string(),
        ));
    }
    Ok(1.0 / angle_deg)
}

/// Computes the rectified pair for cameras `models[0]` and `models[1]`.
pub fn rectified_system(models: [&CameraModel; 2], config: &RectificationConfig) -> CalibrationResult<RectifiedSystem> {
    let rt_cam0_ref = models[0].extrinsics_rt_fromref();
    let rt_cam0_cam1 = rt_cam0_ref.compose(&models[1].extrinsics_rt_toref());
    let baseline = rt_cam0_cam1.t.norm();
    if baseline < 1e-12 {
        return Err(CalibrationError::InvalidInput(
            "the two cameras share an origin; there is no baseline".to_string(),
        ));
    }

    let x = rt_cam0_cam1.t / baseline;
    let forward = (Vector3::z() + rt_cam0_cam1.rotation_matrix() * Vector3::z()).normalize();
    let y = forward.cross(&x);
    if y.norm() < 1e-9 {
        return Err(CalibrationError::InvalidInput(
            "the cameras look along the baseline".to_string(),
        ));
    }
    let y = y.normalize();
    let z = x.cross(&y);
    let rotation_cam0_rect = Matrix3::from_columns(&[x, y, z]);

    let rt_rect0_ref = Rt::from_rotation_translation(&rotation_cam0_rect.transpose(), Vector3::zeros()).compose(&rt_cam0_ref);
    let rt_rect1_ref = Rt::new(Vector3::zeros(), Vector3::new(-baseline, 0.0, 0.0)).compose(&rt_rect0_ref);

    let (pixels_per_deg, imagersize) = rectified_resolution(models[0], config)?;
    let focal = pixels_per_deg.to_degrees();
    let az0 = config
        .az0_deg
        .map(f64::to_radians)
        .unwrap_or_else(|| forward.dot(&x).clamp(-1.0, 1.0).asin());
    let el0 = config.el0_deg.to_radians();
    let (offset_x, offset_y) = match config.model {
        RectificationModel::Latlon => (focal * az0, focal * el0),
        RectificationModel::Pinhole => (focal * az0.tan(), focal * el0.tan()),
    };
    let intrinsics = vec![
        focal,
        focal,
        (f64::from(imagersize[0]) - 1.0) / 2.0 - offset_x,
        (f64::from(imagersize[1]) - 1.0) / 2.0 - offset_y,
    ];
    debug!(
        "Rectified {:?}: {}x{} at {:.3} px/deg, baseline {:.4}",
        config.model, imagersize[0], imagersize[1], pixels_per_deg, baseline
    );

    let lensmodel = config.model.lensmodel();
    Ok(RectifiedSystem {
        models: [
            CameraModel::new(lensmodel, intrinsics.clone(), rt_rect0_ref, imagersize)?,
            CameraModel::new(lensmodel, intrinsics, rt_rect1_ref, imagersize)?,
        ],
        baseline,
        pixels_per_deg,
    })
}

/// For every rectified pixel, the pixel of the original image it samples.
#[derive(Debug, Clone)]
pub struct RectificationMap {
    pub width: usize,
    pub height: usize,
    /// Row-major; NaN where the original camera does not see the direction
    pub pixels: Vec<Vector2<f64>>,
}

impl RectificationMap {
    pub fn at(&self, x: usize, y: usize) -> Option<&Vector2<f64>> {
        if x < self.width {
            self.pixels.get(y * self.width + x)
        } else {
            None
        }
    }
}

fn rectification_map(camera: &CameraModel, rectified: &CameraModel) -> RectificationMap {
    let [width, height] = rectified.imagersize();
    let (width, height) = (width as usize, height as usize);
    let rotation_cam_rect =
        camera.extrinsics_rt_fromref().rotation_matrix() * rectified.extrinsics_rt_fromref().rotation_matrix().transpose();
    let can_project_behind = camera.lensmodel().metadata().can_project_behind_camera;

    let sample = |x: usize, y: usize| -> Vector2<f64> {
        let q = Vector2::new(x as f64, y as f64);
        let direction = unproject_point(&q, rectified.lensmodel(), rectified.intrinsics())
            .ok()
            .map(|v| rotation_cam_rect * v)
            .filter(|v| can_project_behind || v.z > 0.0);
        direction
            .and_then(|v| project_point(&v, camera.lensmodel(), camera.intrinsics(), None).ok())
            .filter(|q| q.x.is_finite() && q.y.is_finite())
            .unwrap_or_else(|| Vector2::new(f64::NAN, f64::NAN))
    };

    let pixels = (0..height)
        .into_par_iter()
        .flat_map_iter(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| sample(x, y))
        .collect();
    RectificationMap { width, height, pixels }
}

/// Maps from the rectified images into the original images of `models`.
pub fn rectification_maps(models: [&CameraModel; 2], rectified: &RectifiedSystem) -> [RectificationMap; 2] {
    [
        rectification_map(models[0], &rectified.models[0]),
        rectification_map(models[1], &rectified.models[1]),
    ]
}

/// Distance from rectified camera 0 to the point seen at `q0` in rectified
/// image 0 with `disparity = q0.x − q1.x` pixels. `None` for a
/// non-positive disparity.
pub fn stereo_range(rectified: &RectifiedSystem, q0: &Vector2<f64>, disparity: f64) -> Option<f64> {
    if !(disparity > 0.0) {
        return None;
    }
    let camera = &rectified.models[0];
    let intrinsics = camera.intrinsics();
    let (focal, cx, cy) = (intrinsics[0], intrinsics[2], intrinsics[3]);
    let range = match camera.lensmodel() {
        LensModel::Latlon => {
            let az0 = (q0.x - cx) / focal;
            let az1 = az0 - disparity / focal;
            rectified.baseline * az1.cos() / (disparity / focal).sin()
        }
        _ => {
            let v = Vector3::new((q0.x - cx) / focal, (q0.y - cy) / focal, 1.0);
            focal * rectified.baseline / disparity * v.norm()
        }
    };
    (range.is_finite() && range > 0.0).then_some(range)
}
