//! Nonlinear least-squares optimization.
//!
//! - [`levenberg_marquardt`]: the damped Gauss-Newton loop over any
//!   [`LeastSquaresProblem`]
//! - [`calibration`]: the calibration entry points `optimize` and
//!   `optimizer_callback`
//! - [`outliers`]: the outlier-rejection pass run between solves

use std::fmt;
use std::time::Duration;

use faer::Mat;
use thiserror::Error;

use crate::error::CalibrationResult;
use crate::linalg::{LinAlgError, SparseMatrix};

pub mod calibration;
pub mod levenberg_marquardt;
pub mod outliers;

pub use calibration::{
    CalibrationProblem, CallbackOutput, OptimizationStats, OptimizeConfig, optimize,
    optimizer_callback,
};
pub use levenberg_marquardt::{LevenbergMarquardt, LevenbergMarquardtConfig, LevenbergMarquardtSummary};
pub use outliers::{OutlierCounts, count_outliers, mark_outliers};

/// Optimizer errors
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfig(String),

    #[error("Linear solver failed: {0}")]
    LinearSolver(#[from] LinAlgError),

    #[error("Cost is not finite at the initial state: {0}")]
    NonFiniteInitialCost(f64),

    #[error("Problem has {expected} parameters, got a vector of {got}")]
    ParameterCountMismatch { expected: usize, got: usize },
}

/// A residual function `x(b)` with a sparse Jacobian.
pub trait LeastSquaresProblem: Sync {
    fn num_parameters(&self) -> usize;

    fn num_residuals(&self) -> usize;

    /// Residual vector at `params` (a column vector).
    fn evaluate(&self, params: &Mat<f64>) -> CalibrationResult<Mat<f64>>;

    /// Residual vector and `dx/dparams` at `params`.
    fn evaluate_with_jacobian(&self, params: &Mat<f64>) -> CalibrationResult<(Mat<f64>, SparseMatrix)>;

    /// `½‖x‖²`
    fn cost(&self, params: &Mat<f64>) -> CalibrationResult<f64> {
        let residuals = self.evaluate(params)?;
        let norm = residuals.norm_l2();
        Ok(0.5 * norm * norm)
    }
}

/// Detailed convergence information.
#[derive(Debug, Clone)]
pub struct ConvergenceInfo {
    /// Final gradient norm (∞-norm of Jᵀx)
    pub final_gradient_norm: f64,
    /// Final parameter update norm
    pub final_parameter_update_norm: f64,
    /// Cost function evaluation count
    pub cost_evaluations: usize,
    /// Jacobian evaluation count
    pub jacobian_evaluations: usize,
}

impl fmt::Display for ConvergenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final parameter update norm: {:.2e}, Cost evaluations: {}, Jacobian evaluations: {}",
            self.final_gradient_norm,
            self.final_parameter_update_norm,
            self.cost_evaluations,
            self.jacobian_evaluations
        )
    }
}

/// Status of an optimization process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Nothing left to optimize
    Converged,
    /// Maximum number of iterations reached; the best estimate is returned
    MaxIterationsReached,
    /// Relative cost decrease below tolerance
    CostToleranceReached,
    /// Step size below tolerance
    ParameterToleranceReached,
    /// Gradient below tolerance
    GradientToleranceReached,
    /// The cost became non-finite
    NumericalFailure,
    /// Every damped step was rejected until the damping cap or the retry
    /// budget ran out; the best estimate is returned
    DampingLimitReached,
    /// Timeout reached
    Timeout,
    /// Other failure
    Failed(String),
}

impl OptimizationStatus {
    /// Whether the solve ended at a minimum rather than on a limit.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::Converged
                | OptimizationStatus::CostToleranceReached
                | OptimizationStatus::ParameterToleranceReached
                | OptimizationStatus::GradientToleranceReached
        )
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::CostToleranceReached => write!(f, "Cost tolerance reached"),
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "Parameter tolerance reached")
            }
            OptimizationStatus::GradientToleranceReached => write!(f, "Gradient tolerance reached"),
            OptimizationStatus::NumericalFailure => write!(f, "Numerical failure"),
            OptimizationStatus::DampingLimitReached => write!(f, "Damping limit reached"),
            OptimizationStatus::Timeout => write!(f, "Timeout"),
            OptimizationStatus::Failed(msg) => write!(f, "Failed: {msg}"),
        }
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult<T> {
    /// Final parameters
    pub parameters: T,
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Initial cost value
    pub init_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Total time elapsed
    pub elapsed_time: Duration,
    /// Convergence statistics
    pub convergence_info: ConvergenceInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(OptimizationStatus::MaxIterationsReached.to_string(), "Maximum iterations reached");
        assert_eq!(OptimizationStatus::Failed("x".to_string()).to_string(), "Failed: x");
    }

    #[test]
    fn test_status_is_converged() {
        assert!(OptimizationStatus::CostToleranceReached.is_converged());
        assert!(!OptimizationStatus::MaxIterationsReached.is_converged());
        assert!(!OptimizationStatus::NumericalFailure.is_converged());
        assert!(!OptimizationStatus::DampingLimitReached.is_converged());
    }
}
