//! Error types for the lenscal library
//!
//! Every module-level error folds into [`CalibrationError`] so callers see a
//! single error type.

use lenscal_io::CameraModelIoError;
use lenscal_lensmodels::LensModelError;
use thiserror::Error;

use crate::graph::GraphError;
use crate::linalg::LinAlgError;
use crate::optimizer::OptimizerError;

/// Main result type used throughout the lenscal library
pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// Main error type for the lenscal library
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// Lens model configuration and projection errors
    #[error("Lens model error: {0}")]
    LensModel(#[from] LensModelError),

    /// Camera model file errors
    #[error("Camera model error: {0}")]
    CameraModelIo(#[from] CameraModelIoError),

    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(#[from] LinAlgError),

    /// Optimizer errors
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    /// Sensor graph errors
    #[error("Sensor graph error: {0}")]
    Graph(#[from] GraphError),

    /// A buffer or array does not have the length the problem implies
    #[error("Size mismatch in {what}: expected {expected}, got {got}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Observations that reference something that does not exist
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The camera is observed through more than one extrinsics index
    #[error("Camera {icam_intrinsics} is a moving camera: it has no unique extrinsics")]
    MovingCamera { icam_intrinsics: usize },
}

pub(crate) fn check_size(what: &'static str, expected: usize, got: usize) -> CalibrationResult<()> {
    if expected == got {
        Ok(())
    } else {
        Err(CalibrationError::SizeMismatch {
            what,
            expected,
            got,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_error_display() {
        let error = CalibrationError::SizeMismatch {
            what: "intrinsics",
            expected: 8,
            got: 4,
        };
        assert_eq!(
            error.to_string(),
            "Size mismatch in intrinsics: expected 8, got 4"
        );
    }

    #[test]
    fn test_calibration_error_from_lens_model() {
        let error = CalibrationError::from(LensModelError::UnknownType("LENSMODEL_X".to_string()));
        match error {
            CalibrationError::LensModel(LensModelError::UnknownType(name)) => {
                assert_eq!(name, "LENSMODEL_X")
            }
            _ => panic!("Expected lens model error"),
        }
    }

    #[test]
    fn test_check_size() {
        assert!(check_size("points", 3, 3).is_ok());
        assert!(matches!(
            check_size("points", 3, 2),
            Err(CalibrationError::SizeMismatch { expected: 3, got: 2, .. })
        ));
    }
}
