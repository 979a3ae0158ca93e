//! Camera models and the camera model file format.
//!
//! A camera model file is a Python-literal dict:
//!
//! ```text
//! # generated by lenscal
//! {
//!     'lensmodel':  'LENSMODEL_OPENCV8',
//!     'intrinsics': [ 1761.18, 1761.25, 3007.5, 2001.1, -0.2, 0.1, 0.0, 0.0, 0.0, 0.1, -0.05, 0.01, ],
//!     'extrinsics': [ 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, ],
//!     'imagersize': [ 6016, 4016, ],
//! }
//! ```
//!
//! `#` comments, single-quoted strings and trailing commas are accepted on
//! input. Keys other than the four above are ignored.
//!
//! ## Example
//!
//! ```no_run
//! use lenscal_io::read_cameramodel_file;
//!
//! let model = read_cameramodel_file("camera0.cameramodel")?;
//! println!("{} with {} intrinsics", model.lensmodel(), model.intrinsics().len());
//! # Ok::<(), lenscal_io::CameraModelIoError>(())
//! ```

use lenscal_lensmodels::LensModelError;
use thiserror::Error;

pub mod cameramodel;
mod format;

pub use cameramodel::CameraModel;
pub use format::{
    read_cameramodel_file, read_cameramodel_string, write_cameramodel_file,
    write_cameramodel_string,
};

/// Errors that can occur while reading or writing camera models
#[derive(Error, Debug)]
pub enum CameraModelIoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Formatting error: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error(transparent)]
    LensModel(#[from] LensModelError),
}

impl From<serde_json::Error> for CameraModelIoError {
    fn from(err: serde_json::Error) -> Self {
        CameraModelIoError::Parse {
            line: err.line(),
            message: err.to_string(),
        }
    }
}
