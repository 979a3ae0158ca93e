//! The calibration problem as a least-squares problem, and the top-level
//! `optimize` / `optimizer_callback` entry points.

use std::fmt;
use std::time::{Duration, Instant};

use faer::Mat;
use tracing::{debug, info, warn};

use crate::error::{CalibrationError, CalibrationResult};
use crate::gradient_check::{DEFAULT_GRADIENT_CHECK_STEP, GRADIENT_CHECK_TOLERANCE, check_gradient};
use crate::layout::{ProblemLayout, ProblemState};
use crate::linalg::SparseMatrix;
use crate::observations::OptimizationInputs;
use crate::optimizer::outliers::{count_outliers, mark_outliers};
use crate::optimizer::{
    LeastSquaresProblem, LevenbergMarquardt, LevenbergMarquardtConfig, OptimizationStatus,
    OptimizerError,
};
use crate::residuals::{evaluate, reprojection_rms};

fn column(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(values.len(), 1, |i, _| values[i])
}

fn to_vec(params: &Mat<f64>) -> Vec<f64> {
    (0..params.nrows()).map(|i| params[(i, 0)]).collect()
}

/// The residuals of `inputs` as a function of the packed state.
pub struct CalibrationProblem<'a> {
    inputs: &'a OptimizationInputs,
    layout: ProblemLayout,
    base: ProblemState,
}

impl<'a> CalibrationProblem<'a> {
    pub fn new(inputs: &'a OptimizationInputs) -> Self {
        Self {
            inputs,
            layout: ProblemLayout::from_inputs(inputs),
            base: ProblemState::from_inputs(inputs),
        }
    }

    pub fn layout(&self) -> &ProblemLayout {
        &self.layout
    }

    /// The packed state of `inputs`.
    pub fn initial_parameters(&self) -> CalibrationResult<Mat<f64>> {
        Ok(column(&self.layout.pack_state(&self.base)?))
    }

    /// The physical state at packed parameters `params`; variables that are
    /// not optimized keep their values from `inputs`.
    pub fn state_at(&self, params: &Mat<f64>) -> CalibrationResult<ProblemState> {
        let mut state = self.base.clone();
        self.layout.unpack_state(&to_vec(params), &mut state)?;
        Ok(state)
    }
}

impl LeastSquaresProblem for CalibrationProblem<'_> {
    fn num_parameters(&self) -> usize {
        self.layout.num_states()
    }

    fn num_residuals(&self) -> usize {
        self.layout.num_measurements()
    }

    fn evaluate(&self, params: &Mat<f64>) -> CalibrationResult<Mat<f64>> {
        let state = self.state_at(params)?;
        Ok(column(&evaluate(self.inputs, &self.layout, &state, false)?.x))
    }

    fn evaluate_with_jacobian(&self, params: &Mat<f64>) -> CalibrationResult<(Mat<f64>, SparseMatrix)> {
        let state = self.state_at(params)?;
        let evaluation = evaluate(self.inputs, &self.layout, &state, true)?;
        let jacobian = evaluation
            .jacobian
            .ok_or_else(|| CalibrationError::InvalidInput("Jacobian was not computed".to_string()))?;
        Ok((column(&evaluation.x), jacobian))
    }
}

/// Settings of [`optimize`].
#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub solver: LevenbergMarquardtConfig,
    /// Outlier threshold in units of the inlier residual RMS
    pub outlier_rejection_k: f64,
    /// Re-solves after outlier marking, at most
    pub max_outlier_rounds: usize,
    /// Compare the analytic Jacobian against finite differences first
    pub check_gradient: bool,
    pub gradient_check_step: f64,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            solver: LevenbergMarquardtConfig::default(),
            outlier_rejection_k: 4.0,
            max_outlier_rounds: 10,
            check_gradient: false,
            gradient_check_step: DEFAULT_GRADIENT_CHECK_STEP,
        }
    }
}

impl OptimizeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solver(mut self, solver: LevenbergMarquardtConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_outlier_rejection_k(mut self, k: f64) -> Self {
        self.outlier_rejection_k = k;
        self
    }

    pub fn with_max_outlier_rounds(mut self, rounds: usize) -> Self {
        self.max_outlier_rounds = rounds;
        self
    }

    pub fn with_check_gradient(mut self, check: bool) -> Self {
        self.check_gradient = check;
        self
    }

    fn validate(&self) -> Result<(), OptimizerError> {
        if !(self.outlier_rejection_k > 0.0) {
            return Err(OptimizerError::InvalidConfig(format!(
                "outlier rejection threshold must be positive, got {}",
                self.outlier_rejection_k
            )));
        }
        Ok(())
    }
}

/// What [`optimize`] reports besides the solved state.
#[derive(Debug, Clone)]
pub struct OptimizationStats {
    /// RMS reprojection error over the inlier board and point observations
    pub rms_reproj_error_pixels: f64,
    pub noutliers_board: usize,
    pub noutliers_point: usize,
    pub noutliers_triangulated_point: usize,
    /// Status of the last solve
    pub status: OptimizationStatus,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Iterations summed over every solve
    pub iterations: usize,
    /// Solves that followed a round of outlier marking
    pub outlier_rounds: usize,
    pub elapsed: Duration,
}

impl fmt::Display for OptimizationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Calibration Summary ===")?;
        writeln!(f, "Status:                    {}", self.status)?;
        writeln!(f, "RMS reprojection error:    {:.4} px", self.rms_reproj_error_pixels)?;
        writeln!(f, "Initial cost:              {:.6e}", self.initial_cost)?;
        writeln!(f, "Final cost:                {:.6e}", self.final_cost)?;
        writeln!(f, "Iterations:                {}", self.iterations)?;
        writeln!(f, "Outlier rounds:            {}", self.outlier_rounds)?;
        writeln!(
            f,
            "Outliers:                  {} board, {} point, {} triangulated",
            self.noutliers_board, self.noutliers_point, self.noutliers_triangulated_point
        )?;
        write!(f, "Total time:                {:?}", self.elapsed)
    }
}

/// Result of one solve over the current outlier set.
struct Solve {
    status: OptimizationStatus,
    initial_cost: f64,
    iterations: usize,
}

/// Solves with the current weights and writes the solution into `inputs`.
fn solve_once(inputs: &mut OptimizationInputs, config: &LevenbergMarquardtConfig) -> CalibrationResult<Solve> {
    let (state, solve) = {
        let problem = CalibrationProblem::new(inputs);
        if problem.num_parameters() == 0 {
            return Ok(Solve {
                status: OptimizationStatus::Converged,
                initial_cost: problem.cost(&Mat::zeros(0, 1))?,
                iterations: 0,
            });
        }
        let result = LevenbergMarquardt::with_config(config.clone()).minimize(&problem, problem.initial_parameters()?)?;
        (
            problem.state_at(&result.parameters)?,
            Solve {
                status: result.status,
                initial_cost: result.init_cost,
                iterations: result.iterations,
            },
        )
    };
    state.write_to(inputs);
    Ok(solve)
}

/// Solves the calibration problem in place.
///
/// `inputs` carries the seed in and the solution out. With outlier rejection
/// selected, outliers are marked after each solve (their weights negated)
/// and the problem is solved again, until a round marks nothing new or
/// `config.max_outlier_rounds` is reached.
///
/// A solve that stops on its iteration or damping limit is not an error: the
/// best estimate is kept and the status is reported.
pub fn optimize(inputs: &mut OptimizationInputs, config: &OptimizeConfig) -> CalibrationResult<OptimizationStats> {
    let start_time = Instant::now();
    config.validate()?;
    inputs.validate()?;
    let layout = ProblemLayout::from_inputs(inputs);
    info!(
        "Calibrating {} with {} states, {} measurements, selections {}",
        inputs.lensmodel.model_type().base_name(),
        layout.num_states(),
        layout.num_measurements(),
        layout.selections()
    );

    if config.check_gradient {
        let report = check_gradient(inputs, config.gradient_check_step)?;
        if !report.is_consistent(GRADIENT_CHECK_TOLERANCE) {
            warn!(
                "Jacobian disagrees with finite differences: max relative error {:.3e}",
                report.max_relative_error
            );
        }
    }

    let first = solve_once(inputs, &config.solver)?;
    let initial_cost = first.initial_cost;
    let mut status = first.status;
    let mut iterations = first.iterations;
    let mut outlier_rounds = 0;

    while layout.selections().do_apply_outlier_rejection && outlier_rounds < config.max_outlier_rounds {
        let x = evaluate(inputs, &layout, &ProblemState::from_inputs(inputs), false)?.x;
        if mark_outliers(inputs, &layout, &x, config.outlier_rejection_k) == 0 {
            break;
        }
        outlier_rounds += 1;
        let solve = solve_once(inputs, &config.solver)?;
        status = solve.status;
        iterations += solve.iterations;
        debug!("Outlier round {}: {}", outlier_rounds, status);
    }

    let evaluation = evaluate(inputs, &layout, &ProblemState::from_inputs(inputs), false)?;
    let outliers = count_outliers(inputs);
    let stats = OptimizationStats {
        rms_reproj_error_pixels: reprojection_rms(&evaluation.x, &layout, inputs),
        noutliers_board: outliers.board,
        noutliers_point: outliers.point,
        noutliers_triangulated_point: outliers.triangulated_point,
        status,
        initial_cost,
        final_cost: evaluation.cost(),
        iterations,
        outlier_rounds,
        elapsed: start_time.elapsed(),
    };
    info!("{}", stats);
    Ok(stats)
}

/// The packed state, residuals and Jacobian at the current state.
#[derive(Debug, Clone)]
pub struct CallbackOutput {
    pub b_packed: Vec<f64>,
    pub x: Vec<f64>,
    pub jacobian: SparseMatrix,
}

/// Evaluates the problem at the current state of `inputs` without solving.
pub fn optimizer_callback(inputs: &OptimizationInputs) -> CalibrationResult<CallbackOutput> {
    inputs.validate()?;
    let problem = CalibrationProblem::new(inputs);
    let b_packed = problem.layout().pack_state(&problem.base)?;
    let evaluation = evaluate(inputs, problem.layout(), &problem.base, true)?;
    let jacobian = evaluation
        .jacobian
        .ok_or_else(|| CalibrationError::InvalidInput("Jacobian was not computed".to_string()))?;
    Ok(CallbackOutput {
        b_packed,
        x: evaluation.x,
        jacobian,
    })
}
