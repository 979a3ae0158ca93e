//! Uncertainty of a solved calibration.
//!
//! Near the optimum the packed state has covariance
//!
//! ```text
//! Var(b_packed) = σ² (JᵀJ)⁻¹
//! ```
//!
//! where `σ` is the uncertainty of each observed pixel coordinate. `JᵀJ` is
//! factorized once; every covariance block is then a few back-substitutions.

use lenscal_lensmodels::{LensModel, ProjectionJacobians, project_point};
use nalgebra::{DMatrix, Matrix2, Vector3};
use tracing::debug;

use crate::error::{CalibrationError, CalibrationResult};
use crate::layout::{ProblemLayout, ProblemState};
use crate::linalg::{FaerMatrix, LinearSolverType, SparseLinearSolver};
use crate::observations::OptimizationInputs;
use crate::residuals::evaluate;

/// The factorized normal equations of a solved problem.
pub struct CalibrationUncertainty {
    lensmodel: LensModel,
    intrinsics: Vec<Vec<f64>>,
    layout: ProblemLayout,
    solver: Box<dyn SparseLinearSolver>,
    observed_pixel_uncertainty: f64,
}

impl CalibrationUncertainty {
    /// Factorizes `JᵀJ` at the current state of `inputs`, which should be
    /// the optimum. `observed_pixel_uncertainty` is `σ`, in pixels.
    pub fn new(inputs: &OptimizationInputs, observed_pixel_uncertainty: f64) -> CalibrationResult<Self> {
        Self::with_solver(inputs, observed_pixel_uncertainty, LinearSolverType::SparseCholesky)
    }

    pub fn with_solver(
        inputs: &OptimizationInputs,
        observed_pixel_uncertainty: f64,
        solver_type: LinearSolverType,
    ) -> CalibrationResult<Self> {
        if !(observed_pixel_uncertainty > 0.0 && observed_pixel_uncertainty.is_finite()) {
            return Err(CalibrationError::InvalidInput(format!(
                "observed pixel uncertainty must be positive, got {observed_pixel_uncertainty}"
            )));
        }
        inputs.validate()?;
        let layout = ProblemLayout::from_inputs(inputs);
        if layout.num_states() == 0 {
            return Err(CalibrationError::InvalidInput(
                "no variables are optimized; there is no covariance to propagate".to_string(),
            ));
        }

        let state = ProblemState::from_inputs(inputs);
        let jacobian = evaluate(inputs, &layout, &state, true)?
            .jacobian
            .ok_or_else(|| CalibrationError::InvalidInput("Jacobian was not computed".to_string()))?;
        let mut solver = solver_type.create();
        solver.factorize_normal_equation(&jacobian)?;
        debug!(
            "Factorized JᵀJ: {} states, {} measurements",
            layout.num_states(),
            layout.num_measurements()
        );

        Ok(Self {
            lensmodel: inputs.lensmodel,
            intrinsics: inputs.intrinsics.clone(),
            layout,
            solver,
            observed_pixel_uncertainty,
        })
    }

    pub fn observed_pixel_uncertainty(&self) -> f64 {
        self.observed_pixel_uncertainty
    }

    pub fn layout(&self) -> &ProblemLayout {
        &self.layout
    }

    /// `Var(b_packed)` restricted to the packed state columns `states`.
    pub fn covariance_packed(&self, states: &[usize]) -> CalibrationResult<DMatrix<f64>> {
        let nstates = self.layout.num_states();
        if let Some(&bad) = states.iter().find(|&&s| s >= nstates) {
            return Err(CalibrationError::InvalidInput(format!(
                "state {bad} out of range for {nstates} states"
            )));
        }

        let variance = self.observed_pixel_uncertainty * self.observed_pixel_uncertainty;
        let mut covariance = DMatrix::zeros(states.len(), states.len());
        for (j, &col) in states.iter().enumerate() {
            let mut rhs = FaerMatrix::zeros(nstates, 1);
            rhs[(col, 0)] = 1.0;
            let y = self.solver.solve(&rhs)?;
            for (i, &row) in states.iter().enumerate() {
                covariance[(i, j)] = variance * y[(row, 0)];
            }
        }
        Ok(covariance)
    }

    /// Covariance of the intrinsics of camera `icam_intrinsics`, in physical
    /// units. Rows and columns of parameters that are not optimized are zero.
    pub fn covariance_intrinsics(&self, icam_intrinsics: usize) -> CalibrationResult<DMatrix<f64>> {
        if icam_intrinsics >= self.intrinsics.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "camera {icam_intrinsics} out of range for {} cameras",
                self.intrinsics.len()
            )));
        }
        let nparams = self.lensmodel.num_params();
        let optimized: Vec<(usize, usize, f64)> = (0..nparams)
            .filter_map(|iparam| {
                self.layout
                    .intrinsics_state(icam_intrinsics, iparam)
                    .map(|(state, scale)| (iparam, state, scale))
            })
            .collect();

        let states: Vec<usize> = optimized.iter().map(|&(_, state, _)| state).collect();
        let packed = self.covariance_packed(&states)?;

        let mut covariance = DMatrix::zeros(nparams, nparams);
        for (a, &(pa, _, sa)) in optimized.iter().enumerate() {
            for (b, &(pb, _, sb)) in optimized.iter().enumerate() {
                covariance[(pa, pb)] = sa * sb * packed[(a, b)];
            }
        }
        Ok(covariance)
    }

    /// 2×2 covariance of the projection of `p_cam` (camera coordinates)
    /// through camera `icam_intrinsics`, from the intrinsics uncertainty.
    pub fn projection_uncertainty(
        &self,
        icam_intrinsics: usize,
        p_cam: &Vector3<f64>,
    ) -> CalibrationResult<Matrix2<f64>> {
        let covariance = self.covariance_intrinsics(icam_intrinsics)?;
        let intrinsics = &self.intrinsics[icam_intrinsics];
        let mut jacobians = ProjectionJacobians::zeros(intrinsics.len());
        project_point(p_cam, &self.lensmodel, intrinsics, Some(&mut jacobians))?;

        let dq_dintrinsics = &jacobians.dq_dintrinsics;
        Ok(dq_dintrinsics * covariance * dq_dintrinsics.transpose())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse_to_dense;
    use crate::problem::ProblemSelections;
    use crate::synthetic::{PINHOLE_TRUTH, pinhole_board_inputs};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn solved_inputs() -> Result<OptimizationInputs, Box<dyn std::error::Error>> {
        let mut inputs = pinhole_board_inputs()?;
        inputs.intrinsics = vec![PINHOLE_TRUTH.to_vec()];
        Ok(inputs)
    }

    #[test]
    fn test_matches_dense_inverse() -> TestResult {
        let inputs = solved_inputs()?;
        let sigma = 0.3;
        let uncertainty = CalibrationUncertainty::new(&inputs, sigma)?;
        let covariance = uncertainty.covariance_intrinsics(0)?;

        let layout = ProblemLayout::from_inputs(&inputs);
        let state = ProblemState::from_inputs(&inputs);
        let jacobian = evaluate(&inputs, &layout, &state, true)?
            .jacobian
            .ok_or("no Jacobian")?;
        let j = sparse_to_dense(&jacobian);
        let inverse = (j.transpose() * &j).try_inverse().ok_or("JᵀJ is singular")?;

        let expected = |a: usize, b: usize| -> Result<f64, Box<dyn std::error::Error>> {
            let (ca, sa) = layout.intrinsics_state(0, a).ok_or("intrinsics not optimized")?;
            let (cb, sb) = layout.intrinsics_state(0, b).ok_or("intrinsics not optimized")?;
            Ok(sigma * sigma * sa * sb * inverse[(ca, cb)])
        };
        for a in 0..4 {
            for b in 0..4 {
                let want = expected(a, b)?;
                let scale = (expected(a, a)? * expected(b, b)?).sqrt();
                let got = covariance[(a, b)];
                assert!((got - want).abs() <= 1e-6 * scale, "({a},{b}): {got} vs {want}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_covariance_scales_with_pixel_variance() -> TestResult {
        let inputs = solved_inputs()?;
        let unit = CalibrationUncertainty::new(&inputs, 1.0)?.covariance_intrinsics(0)?;
        let half = CalibrationUncertainty::new(&inputs, 0.5)?.covariance_intrinsics(0)?;

        for a in 0..4 {
            assert!(unit[(a, a)] > 0.0);
            for b in 0..4 {
                assert!((unit[(a, b)] - unit[(b, a)]).abs() <= 1e-9 * unit[(a, a)].max(unit[(b, b)]));
                assert!((half[(a, b)] - 0.25 * unit[(a, b)]).abs() <= 1e-9 * unit[(a, a)].max(unit[(b, b)]));
            }
        }
        Ok(())
    }

    #[test]
    fn test_projection_uncertainty_is_positive() -> TestResult {
        let inputs = solved_inputs()?;
        let uncertainty = CalibrationUncertainty::new(&inputs, 0.5)?;
        let center = uncertainty.projection_uncertainty(0, &Vector3::new(0.0, 0.0, 1.0))?;
        let corner = uncertainty.projection_uncertainty(0, &Vector3::new(0.35, 0.25, 1.0))?;

        for var in [center, corner] {
            assert!(var[(0, 0)] > 0.0);
            assert!(var[(1, 1)] > 0.0);
            assert!((var[(0, 1)] - var[(1, 0)]).abs() <= 1e-9 * var[(0, 0)].max(var[(1, 1)]));
            assert!(var.determinant() >= -1e-12 * var[(0, 0)] * var[(1, 1)]);
        }
        Ok(())
    }

    #[test]
    fn test_fixed_intrinsics_have_no_uncertainty() -> TestResult {
        let mut inputs = solved_inputs()?;
        inputs.selections = inputs.selections.with_intrinsics_core(false);
        let uncertainty = CalibrationUncertainty::new(&inputs, 1.0)?;

        assert_eq!(uncertainty.covariance_intrinsics(0)?, DMatrix::zeros(4, 4));
        let var = uncertainty.projection_uncertainty(0, &Vector3::new(0.1, 0.0, 1.0))?;
        assert_eq!(var, Matrix2::zeros());
        Ok(())
    }

    #[test]
    fn test_rejects_bad_inputs() -> TestResult {
        let inputs = solved_inputs()?;
        assert!(CalibrationUncertainty::new(&inputs, 0.0).is_err());

        let uncertainty = CalibrationUncertainty::new(&inputs, 1.0)?;
        assert!(uncertainty.covariance_intrinsics(1).is_err());
        assert!(uncertainty.covariance_packed(&[uncertainty.layout().num_states()]).is_err());

        let mut fixed = solved_inputs()?;
        fixed.selections = ProblemSelections::none();
        assert!(CalibrationUncertainty::new(&fixed, 1.0).is_err());
        Ok(())
    }
}
