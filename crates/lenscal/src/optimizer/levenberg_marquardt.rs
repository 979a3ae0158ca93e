//! Levenberg-Marquardt algorithm implementation.
//!
//! Each iteration solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λI)·Δ = −Jᵀx
//! ```
//!
//! and accepts the step when it lowers the cost. An accepted step shrinks
//! the damping `λ` toward Gauss-Newton; a rejected step or a failed
//! factorization grows it toward gradient descent, and the step is retried.
//! A rejected step too small to change the cost or the parameters ends the
//! solve at the minimum. A step rejected at the damping cap ends it with
//! [`OptimizationStatus::DampingLimitReached`].

use std::fmt;
use std::ops::Mul;
use std::time::{Duration, Instant};

use faer::Mat;
use tracing::{debug, info};

use crate::error::CalibrationResult;
use crate::linalg::{LinearSolverType, SparseLinearSolver, SparseMatrix};
use crate::optimizer::{
    ConvergenceInfo, LeastSquaresProblem, OptimizationStatus, OptimizerError, SolverResult,
};

/// Configuration of the Levenberg-Marquardt loop.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtConfig {
    /// Type of linear solver for the normal equations
    pub linear_solver_type: LinearSolverType,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Relative cost decrease below which the solve stops
    pub cost_tolerance: f64,
    /// Relative step size below which the solve stops
    pub parameter_tolerance: f64,
    /// ∞-norm of Jᵀx below which the solve stops
    pub gradient_tolerance: f64,
    /// Timeout duration
    pub timeout: Option<Duration>,
    /// Initial damping
    pub damping: f64,
    pub damping_min: f64,
    pub damping_max: f64,
    pub damping_increase_factor: f64,
    pub damping_decrease_factor: f64,
    /// Rejected steps tried before the Jacobian is evaluated again
    pub max_step_retries: usize,
    /// Log every iteration and the final summary at `info` level
    pub verbose: bool,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            linear_solver_type: LinearSolverType::default(),
            max_iterations: 100,
            cost_tolerance: 1e-12,
            parameter_tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            timeout: None,
            damping: 1e-3,
            damping_min: 1e-12,
            damping_max: 1e12,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 0.3,
            max_step_retries: 10,
            verbose: false,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the initial damping parameter.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Set the damping parameter bounds.
    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    /// Set the damping adjustment factors.
    pub fn with_damping_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.damping_increase_factor = increase;
        self.damping_decrease_factor = decrease;
        self
    }

    pub fn with_max_step_retries(mut self, max_step_retries: usize) -> Self {
        self.max_step_retries = max_step_retries;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn validate(&self) -> Result<(), OptimizerError> {
        if !(self.damping > 0.0 && self.damping_min > 0.0 && self.damping_min <= self.damping_max) {
            return Err(OptimizerError::InvalidConfig(format!(
                "damping {} must be positive and within [{}, {}]",
                self.damping, self.damping_min, self.damping_max
            )));
        }
        if self.damping_increase_factor <= 1.0
            || !(self.damping_decrease_factor > 0.0 && self.damping_decrease_factor < 1.0)
        {
            return Err(OptimizerError::InvalidConfig(format!(
                "damping factors must satisfy increase > 1 and 0 < decrease < 1, got {} and {}",
                self.damping_increase_factor, self.damping_decrease_factor
            )));
        }
        Ok(())
    }
}

/// Summary statistics for the Levenberg-Marquardt optimization process.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtSummary {
    /// Initial cost value
    pub initial_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Total number of iterations performed
    pub iterations: usize,
    /// Number of successful steps (cost decreased)
    pub successful_steps: usize,
    /// Number of unsuccessful steps (cost increased, damping increased)
    pub unsuccessful_steps: usize,
    /// Final damping parameter value
    pub final_damping: f64,
    /// Maximum gradient norm encountered
    pub max_gradient_norm: f64,
    /// Final gradient norm
    pub final_gradient_norm: f64,
    /// Final parameter update norm
    pub final_parameter_update_norm: f64,
    /// Total time elapsed
    pub total_time: Duration,
}

impl fmt::Display for LevenbergMarquardtSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Levenberg-Marquardt Optimization Summary ===")?;
        writeln!(f, "Initial cost:              {:.6e}", self.initial_cost)?;
        writeln!(f, "Final cost:                {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "Cost reduction:            {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f, "Total iterations:          {}", self.iterations)?;
        writeln!(f, "Successful steps:          {}", self.successful_steps)?;
        writeln!(f, "Unsuccessful steps:        {}", self.unsuccessful_steps)?;
        writeln!(f, "Final damping parameter:   {:.6e}", self.final_damping)?;
        writeln!(f, "Max gradient norm:         {:.6e}", self.max_gradient_norm)?;
        writeln!(f, "Final gradient norm:       {:.6e}", self.final_gradient_norm)?;
        writeln!(f, "Final param update norm:   {:.6e}", self.final_parameter_update_norm)?;
        write!(f, "Total time:                {:?}", self.total_time)
    }
}

/// How the damped-step search of one iteration ended.
enum StepOutcome {
    Accepted {
        params: Mat<f64>,
        cost: f64,
        step_norm: f64,
    },
    /// Every retry was rejected below the damping cap
    Exhausted,
    Stop(OptimizationStatus),
}

/// Levenberg-Marquardt solver for nonlinear least squares optimization.
pub struct LevenbergMarquardt {
    config: LevenbergMarquardtConfig,
    damping: f64,
    summary: Option<LevenbergMarquardtSummary>,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt solver with default configuration.
    pub fn new() -> Self {
        Self::with_config(LevenbergMarquardtConfig::default())
    }

    /// Create a new Levenberg-Marquardt solver with the given configuration.
    pub fn with_config(config: LevenbergMarquardtConfig) -> Self {
        Self {
            damping: config.damping,
            config,
            summary: None,
        }
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    /// Summary of the last call to [`Self::minimize`].
    pub fn summary(&self) -> Option<&LevenbergMarquardtSummary> {
        self.summary.as_ref()
    }

    fn increase_damping(&mut self) {
        self.damping = (self.damping * self.config.damping_increase_factor).min(self.config.damping_max);
    }

    fn decrease_damping(&mut self) {
        self.damping = (self.damping * self.config.damping_decrease_factor).max(self.config.damping_min);
    }

    /// Check convergence criteria
    fn check_convergence(
        &self,
        iteration: usize,
        relative_cost_change: f64,
        relative_step_norm: f64,
        elapsed: Duration,
    ) -> Option<OptimizationStatus> {
        if let Some(timeout) = self.config.timeout
            && elapsed >= timeout
        {
            return Some(OptimizationStatus::Timeout);
        }
        if iteration >= self.config.max_iterations {
            return Some(OptimizationStatus::MaxIterationsReached);
        }
        if relative_cost_change < self.config.cost_tolerance {
            return Some(OptimizationStatus::CostToleranceReached);
        }
        if relative_step_norm < self.config.parameter_tolerance {
            return Some(OptimizationStatus::ParameterToleranceReached);
        }
        None
    }

    /// Whether a rejected step shows the cost is already at its minimum
    fn check_rejected_step(
        &self,
        current_cost: f64,
        new_cost: f64,
        step_norm: f64,
        params_norm: f64,
    ) -> Option<OptimizationStatus> {
        if (new_cost - current_cost).abs() / current_cost.max(f64::MIN_POSITIVE) < self.config.cost_tolerance {
            return Some(OptimizationStatus::CostToleranceReached);
        }
        if step_norm / (params_norm + self.config.parameter_tolerance) < self.config.parameter_tolerance {
            return Some(OptimizationStatus::ParameterToleranceReached);
        }
        None
    }

    /// ∞-norm of the gradient `Jᵀx`
    fn gradient_norm(residuals: &Mat<f64>, jacobian: &SparseMatrix) -> f64 {
        let gradient = jacobian.as_ref().transpose().mul(residuals.as_ref());
        (0..gradient.nrows()).map(|i| gradient[(i, 0)].abs()).fold(0.0, f64::max)
    }

    /// Minimizes `½‖x(b)‖²` starting from `initial_params`.
    ///
    /// Returns the best parameters found whatever the termination reason; the
    /// reason is reported in [`SolverResult::status`].
    pub fn minimize<P: LeastSquaresProblem>(
        &mut self,
        problem: &P,
        initial_params: Mat<f64>,
    ) -> CalibrationResult<SolverResult<Mat<f64>>> {
        self.config.validate()?;
        if initial_params.nrows() != problem.num_parameters() {
            return Err(OptimizerError::ParameterCountMismatch {
                expected: problem.num_parameters(),
                got: initial_params.nrows(),
            }
            .into());
        }

        let start_time = Instant::now();
        self.damping = self.config.damping;
        let mut linear_solver: Box<dyn SparseLinearSolver> = self.config.linear_solver_type.create();

        let mut params = initial_params;
        let initial_cost = problem.cost(&params)?;
        if !initial_cost.is_finite() {
            return Err(OptimizerError::NonFiniteInitialCost(initial_cost).into());
        }
        let mut current_cost = initial_cost;
        let mut cost_evaluations = 1;
        let mut jacobian_evaluations = 0;
        let mut successful_steps = 0;
        let mut unsuccessful_steps = 0;
        let mut max_gradient_norm: f64 = 0.0;
        let mut final_gradient_norm = 0.0;
        let mut final_parameter_update_norm = 0.0;
        let mut iteration = 0;

        debug!(
            "Starting Levenberg-Marquardt: {} parameters, {} residuals, initial cost {:.6e}",
            problem.num_parameters(),
            problem.num_residuals(),
            initial_cost
        );

        let status = loop {
            let (residuals, jacobian) = problem.evaluate_with_jacobian(&params)?;
            jacobian_evaluations += 1;

            let gradient_norm = Self::gradient_norm(&residuals, &jacobian);
            max_gradient_norm = max_gradient_norm.max(gradient_norm);
            final_gradient_norm = gradient_norm;
            if gradient_norm < self.config.gradient_tolerance {
                break OptimizationStatus::GradientToleranceReached;
            }
            if iteration >= self.config.max_iterations {
                break OptimizationStatus::MaxIterationsReached;
            }

            let mut outcome = StepOutcome::Exhausted;
            for _ in 0..=self.config.max_step_retries {
                let at_damping_limit = self.damping >= self.config.damping_max;
                let step = match linear_solver.solve_augmented_equation(&residuals, &jacobian, self.damping) {
                    Ok(step) => step,
                    Err(e) => {
                        debug!("Damped system not solvable at λ = {:.3e}: {}", self.damping, e);
                        unsuccessful_steps += 1;
                        if at_damping_limit {
                            outcome = StepOutcome::Stop(OptimizationStatus::DampingLimitReached);
                            break;
                        }
                        self.increase_damping();
                        continue;
                    }
                };
                let step_norm = step.norm_l2();
                let new_params = &params + &step;
                let new_cost = problem.cost(&new_params)?;
                cost_evaluations += 1;

                if new_cost.is_finite() && new_cost < current_cost {
                    self.decrease_damping();
                    outcome = StepOutcome::Accepted {
                        params: new_params,
                        cost: new_cost,
                        step_norm,
                    };
                    break;
                }
                unsuccessful_steps += 1;
                if new_cost.is_finite()
                    && let Some(status) =
                        self.check_rejected_step(current_cost, new_cost, step_norm, params.norm_l2())
                {
                    outcome = StepOutcome::Stop(status);
                    break;
                }
                if at_damping_limit {
                    outcome = StepOutcome::Stop(OptimizationStatus::DampingLimitReached);
                    break;
                }
                self.increase_damping();
                debug!(
                    "Iteration {}: rejected step, cost {:.6e} -> {:.6e}, damping = {:.3e}",
                    iteration + 1,
                    current_cost,
                    new_cost,
                    self.damping
                );
            }

            let (new_params, new_cost, step_norm) = match outcome {
                StepOutcome::Accepted { params, cost, step_norm } => (params, cost, step_norm),
                StepOutcome::Stop(status) => break status,
                StepOutcome::Exhausted => {
                    debug!(
                        "Iteration {}: {} steps rejected, damping = {:.3e}",
                        iteration + 1,
                        self.config.max_step_retries + 1,
                        self.damping
                    );
                    if let Some(timeout) = self.config.timeout
                        && start_time.elapsed() >= timeout
                    {
                        break OptimizationStatus::Timeout;
                    }
                    continue;
                }
            };
            iteration += 1;
            successful_steps += 1;

            let relative_cost_change = (current_cost - new_cost) / current_cost.max(f64::MIN_POSITIVE);
            let relative_step_norm = step_norm / (params.norm_l2() + self.config.parameter_tolerance);
            final_parameter_update_norm = step_norm;
            if self.config.verbose {
                info!(
                    "Iteration {}: cost = {:.6e}, reduction = {:.6e}, damping = {:.3e}, step_norm = {:.3e}",
                    iteration,
                    new_cost,
                    current_cost - new_cost,
                    self.damping,
                    step_norm
                );
            } else {
                debug!(
                    "Iteration {}: cost = {:.6e}, damping = {:.3e}, step_norm = {:.3e}",
                    iteration, new_cost, self.damping, step_norm
                );
            }
            params = new_params;
            current_cost = new_cost;

            if let Some(status) =
                self.check_convergence(iteration, relative_cost_change, relative_step_norm, start_time.elapsed())
            {
                break status;
            }
        };

        let elapsed = start_time.elapsed();
        let summary = LevenbergMarquardtSummary {
            initial_cost,
            final_cost: current_cost,
            iterations: iteration,
            successful_steps,
            unsuccessful_steps,
            final_damping: self.damping,
            max_gradient_norm,
            final_gradient_norm,
            final_parameter_update_norm,
            total_time: elapsed,
        };
        if self.config.verbose {
            info!("{}", summary);
        } else {
            debug!("Levenberg-Marquardt finished: {} after {} iterations", status, iteration);
        }
        self.summary = Some(summary);

        Ok(SolverResult {
            parameters: params,
            status,
            init_cost: initial_cost,
            final_cost: current_cost,
            iterations: iteration,
            elapsed_time: elapsed,
            convergence_info: ConvergenceInfo {
                final_gradient_norm,
                final_parameter_update_norm,
                cost_evaluations,
                jacobian_evaluations,
            },
        })
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}
