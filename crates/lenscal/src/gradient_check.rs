//! Analytic Jacobian against central differences.
//!
//! Every packed state variable is perturbed by `±step` and the residual
//! vector re-evaluated. The comparison is done in packed units, where all
//! variables have comparable magnitudes.

use tracing::{debug, warn};

use crate::error::{CalibrationError, CalibrationResult};
use crate::layout::{ProblemLayout, ProblemState};
use crate::linalg::sparse_to_dense;
use crate::observations::OptimizationInputs;
use crate::residuals::evaluate;

/// Default packed-space step.
pub const DEFAULT_GRADIENT_CHECK_STEP: f64 = 1e-4;

/// Relative error above which an entry is reported as a mismatch.
pub const GRADIENT_CHECK_TOLERANCE: f64 = 1e-3;

/// One Jacobian entry compared against its numerical estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientMismatch {
    pub measurement: usize,
    pub state: usize,
    pub analytic: f64,
    pub numerical: f64,
}

impl GradientMismatch {
    /// `|analytic − numerical| / max(1, |analytic|, |numerical|)`
    pub fn relative_error(&self) -> f64 {
        (self.analytic - self.numerical).abs() / 1f64.max(self.analytic.abs()).max(self.numerical.abs())
    }
}

#[derive(Debug, Clone, Default)]
pub struct GradientCheckReport {
    /// Largest relative error over all entries
    pub max_relative_error: f64,
    /// The entry with the largest relative error
    pub worst: Option<GradientMismatch>,
    /// Every entry above [`GRADIENT_CHECK_TOLERANCE`]
    pub mismatches: Vec<GradientMismatch>,
}

impl GradientCheckReport {
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        self.max_relative_error <= tolerance
    }
}

/// Compares `dx/db_packed` at the current state of `inputs` against central
/// differences with the given packed-space `step`.
pub fn check_gradient(inputs: &OptimizationInputs, step: f64) -> CalibrationResult<GradientCheckReport> {
    if !(step > 0.0 && step.is_finite()) {
        return Err(CalibrationError::InvalidInput(format!(
            "gradient check step must be positive, got {step}"
        )));
    }
    inputs.validate()?;
    let layout = ProblemLayout::from_inputs(inputs);
    let state = ProblemState::from_inputs(inputs);
    let b = layout.pack_state(&state)?;

    let jacobian = evaluate(inputs, &layout, &state, true)?
        .jacobian
        .ok_or_else(|| CalibrationError::InvalidInput("Jacobian was not computed".to_string()))?;
    let analytic = sparse_to_dense(&jacobian);

    let residuals_at = |b_packed: &[f64]| -> CalibrationResult<Vec<f64>> {
        let mut perturbed = state.clone();
        layout.unpack_state(b_packed, &mut perturbed)?;
        Ok(evaluate(inputs, &layout, &perturbed, false)?.x)
    };

    let mut report = GradientCheckReport::default();
    for col in 0..layout.num_states() {
        let mut b_plus = b.clone();
        b_plus[col] += step;
        let mut b_minus = b.clone();
        b_minus[col] -= step;
        let x_plus = residuals_at(&b_plus)?;
        let x_minus = residuals_at(&b_minus)?;

        for row in 0..layout.num_measurements() {
            let entry = GradientMismatch {
                measurement: row,
                state: col,
                analytic: analytic[(row, col)],
                numerical: (x_plus[row] - x_minus[row]) / (2.0 * step),
            };
            let error = entry.relative_error();
            if error > report.max_relative_error {
                report.max_relative_error = error;
                report.worst = Some(entry);
            }
            if error > GRADIENT_CHECK_TOLERANCE {
                report.mismatches.push(entry);
            }
        }
    }

    for mismatch in report.mismatches.iter().take(10) {
        warn!(
            "Gradient mismatch at measurement {} state {}: analytic {:.6e}, numerical {:.6e}",
            mismatch.measurement, mismatch.state, mismatch.analytic, mismatch.numerical
        );
    }
    debug!(
        "Gradient check over {} states: max relative error {:.3e}, {} mismatches",
        layout.num_states(),
        report.max_relative_error,
        report.mismatches.len()
    );
    Ok(report)
}
