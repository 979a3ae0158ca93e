//! Lens models for camera calibration.
//!
//! This crate holds the closed set of lens models understood by the
//! calibration solver, and the projection engine that maps camera-frame
//! points to pixels (and back).
//!
//! # Key Components
//!
//! - **[`LensModel`]**: tagged variant over every supported model, carrying
//!   the model-specific configuration
//! - **[`LensModelMetadata`]**: static per-type flags (core, behind-camera,
//!   gradients, noncentral)
//! - **[`project`] / [`project_with_gradients`]**: forward projection with
//!   analytic `dq/dp` and `dq/dintrinsics`
//! - **[`unproject`] / [`unproject_with_gradients`]**: pixel to ray
//!
//! # Available Lens Models
//!
//! | name                               | parameters                     |
//! | ---------------------------------- | ------------------------------ |
//! | `LENSMODEL_PINHOLE`                | fx, fy, cx, cy                 |
//! | `LENSMODEL_STEREOGRAPHIC`          | fx, fy, cx, cy                 |
//! | `LENSMODEL_LONLAT`                 | fx, fy, cx, cy                 |
//! | `LENSMODEL_LATLON`                 | fx, fy, cx, cy                 |
//! | `LENSMODEL_OPENCV4/5/8/12`         | core + 4/5/8/12 distortions    |
//! | `LENSMODEL_CAHVOR`                 | core + alpha, beta, r0, r1, r2 |
//! | `LENSMODEL_CAHVORE_linearity=...`  | CAHVOR + e0, e1, e2            |
//! | `LENSMODEL_SPLINED_STEREOGRAPHIC_...` | core + 2·Nx·Ny knots        |

use nalgebra::{Matrix2x3, Matrix2xX};

pub mod lensmodel;
pub mod project;
pub mod unproject;

mod cahvor;
mod cahvore;
mod lonlat;
mod opencv;
mod pinhole;
mod splined;
mod stereographic;

pub use lensmodel::{
    CahvoreConfig, LensModel, LensModelMetadata, LensModelType, SplinedStereographicConfig,
    supported_lensmodels,
};
pub use project::{ProjectedPoint, project, project_point, project_with_gradients};
pub use splined::knots_for_splined_models;
pub use stereographic::{project_stereographic, unproject_stereographic};
pub use unproject::{
    UnprojectedPoint, unproject, unproject_point, unproject_point_with_gradients,
    unproject_with_gradients,
};

/// Step used for central-difference gradient checks.
pub const NUMERICAL_DERIVATIVE_EPS: f64 = 1e-6;

/// Pixel error below which the iterative unprojection stops.
pub const UNPROJECT_TOLERANCE_PIXELS: f64 = 1e-9;

/// Iteration bound of the iterative unprojection.
pub const UNPROJECT_MAX_ITERATIONS: usize = 100;

/// Lens model errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LensModelError {
    #[error("Invalid lens model: {0}")]
    Invalid(String),
    #[error("Unknown lens model: '{0}'")]
    UnknownType(String),
    #[error("Lens model '{0}' requires a configuration")]
    MissingConfig(String),
    #[error("Bad configuration for lens model '{name}': {reason}")]
    BadConfig { name: String, reason: String },
    #[error("{model} expects {expected} intrinsics, got {got}")]
    IntrinsicsSizeMismatch {
        model: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{0} has no gradients")]
    GradientsUnsupported(&'static str),
    #[error("{operation} is not supported by {model}")]
    Unsupported {
        operation: &'static str,
        model: &'static str,
    },
    #[error("Unprojection did not converge after {iterations} iterations (residual {residual:.3e} px)")]
    UnprojectionDidNotConverge { iterations: usize, residual: f64 },
    #[error("Numerical error: {0}")]
    NumericalError(String),
}

pub type LensModelResult<T> = Result<T, LensModelError>;

/// Gradients of one projected point.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionJacobians {
    /// ∂q/∂p (2×3)
    pub dq_dp: Matrix2x3<f64>,
    /// ∂q/∂intrinsics (2×Nparams)
    pub dq_dintrinsics: Matrix2xX<f64>,
}

impl ProjectionJacobians {
    pub fn zeros(nparams: usize) -> Self {
        Self {
            dq_dp: Matrix2x3::zeros(),
            dq_dintrinsics: Matrix2xX::zeros(nparams),
        }
    }
}
