//! # lenscal
//!
//! Camera calibration as a sparse nonlinear least-squares problem: lens
//! intrinsics, camera extrinsics, calibration-object poses and discrete
//! points are solved jointly from observed pixels.
//!
//! ## Features
//!
//! - **Lens models**: pinhole, stereographic, lonlat/latlon, OpenCV, CAHVOR,
//!   CAHVORE and splined stereographic, with analytic gradients
//! - **Problem layout**: packed, scaled state vector with per-class selections
//! - **Residuals**: board corners, discrete points, triangulated points and
//!   regularization, with a sparse Jacobian assembled in parallel
//! - **Levenberg-Marquardt** over a sparse Cholesky factorization, with
//!   iterative outlier rejection
//! - **Geometry utilities**: sensor-link graph traversal, stereo
//!   rectification and calibration uncertainty
//!
//! ## Sign convention
//!
//! Every reprojection residual is `weight · (observed − projected)`, so the
//! Jacobian of a residual is the negated, weighted projection gradient.
//! Columns of the Jacobian are in packed (scaled) units.

// Re-export workspace crates
pub use lenscal_io;
pub use lenscal_lensmodels;
pub use lenscal_poses;

pub use lenscal_io::{
    CameraModel, CameraModelIoError, read_cameramodel_file, read_cameramodel_string,
    write_cameramodel_file, write_cameramodel_string,
};
pub use lenscal_lensmodels::{LensModel, LensModelError, LensModelType, project_point, unproject_point};
pub use lenscal_poses::Rt;

// Local modules
pub mod board;
pub mod error;
pub mod gradient_check;
pub mod graph;
pub mod layout;
pub mod linalg;
pub mod logger;
pub mod observations;
pub mod optimizer;
pub mod problem;
pub mod rectification;
pub mod regularization;
pub mod residuals;
pub mod triangulation;
pub mod uncertainty;

#[cfg(test)]
mod synthetic;

pub use error::{CalibrationError, CalibrationResult};

pub use gradient_check::{GradientCheckReport, check_gradient};
pub use graph::{GraphError, SensorLink, seed_extrinsics_from_links, traverse_sensor_links};
pub use layout::{ProblemLayout, ProblemState, pack_state, unpack_state};
pub use linalg::{LinearSolverType, SparseCholeskySolver, SparseLinearSolver};
pub use logger::{init_logger, init_logger_with_level};
pub use observations::{
    BoardObservation, CameraIndex, ObservedPixel, OptimizationInputs, PointObservation,
    TriangulatedObservation,
};
pub use optimizer::{
    CallbackOutput, LevenbergMarquardtConfig, OptimizationStats, OptimizeConfig, optimize,
    optimizer_callback,
};
pub use problem::{ProblemConstants, ProblemSelections, ProblemSizes};
pub use rectification::{
    RectificationConfig, RectificationMap, RectificationModel, RectifiedSystem, rectification_maps,
    rectified_resolution, rectified_system, stereo_range,
};
pub use uncertainty::CalibrationUncertainty;
