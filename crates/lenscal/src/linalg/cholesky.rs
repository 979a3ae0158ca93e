use std::fmt::Debug;
use std::ops::Mul;

use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers;
use faer::sparse::{SparseColMat, Triplet};
use faer::{Mat, Side};

use super::{FaerMatrix, LinAlgError, LinAlgResult, SparseLinearSolver, SparseMatrix};

/// Sparse Cholesky factorization of the normal equations (faer).
#[derive(Debug, Clone)]
pub struct SparseCholeskySolver {
    factorization: Option<solvers::Llt<usize, f64>>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        SparseCholeskySolver {
            factorization: None,
        }
    }

    /// H = JᵀJ
    fn normal_matrix(jacobian: &SparseMatrix) -> LinAlgResult<SparseMatrix> {
        Ok(jacobian
            .as_ref()
            .transpose()
            .to_col_major()
            .map_err(|e| LinAlgError::MatrixConversion(format!("Jᵀ: {e:?}")))?
            .mul(jacobian.as_ref()))
    }

    fn factorize(hessian: &SparseMatrix) -> LinAlgResult<solvers::Llt<usize, f64>> {
        let sym = solvers::SymbolicLlt::try_new(hessian.symbolic(), Side::Lower).map_err(|e| {
            LinAlgError::FactorizationFailed(format!("Symbolic Cholesky failed: {e:?}"))
        })?;
        solvers::Llt::try_new_with_symbolic(sym, hessian.as_ref(), Side::Lower)
            .map_err(|e| LinAlgError::SingularMatrix(format!("Normal matrix not positive definite: {e:?}")))
    }
}

impl Default for SparseCholeskySolver {
    fn default() -> Self {
        Self::new()
    }
}

fn check_finite(solution: Mat<f64>) -> LinAlgResult<Mat<f64>> {
    for i in 0..solution.nrows() {
        if !solution[(i, 0)].is_finite() {
            return Err(LinAlgError::SingularMatrix(format!(
                "non-finite solution component {i}"
            )));
        }
    }
    Ok(solution)
}

impl SparseLinearSolver for SparseCholeskySolver {
    fn solve_augmented_equation(
        &mut self,
        residuals: &FaerMatrix,
        jacobian: &SparseMatrix,
        lambda: f64,
    ) -> LinAlgResult<FaerMatrix> {
        let n = jacobian.ncols();
        let hessian = Self::normal_matrix(jacobian)?;
        let gradient = jacobian.as_ref().transpose().mul(-residuals);

        // H_aug = H + lambda * I
        let lambda_i_triplets: Vec<_> = (0..n).map(|i| Triplet::new(i, i, lambda)).collect();
        let lambda_i = SparseColMat::try_new_from_triplets(n, n, &lambda_i_triplets)
            .map_err(|e| LinAlgError::SparseMatrixCreation(format!("λI: {e:?}")))?;
        let augmented_hessian = hessian + lambda_i;

        // The pattern of JᵀJ changes when outliers zero out rows, so the
        // symbolic factorization is not cached.
        let cholesky = Self::factorize(&augmented_hessian)?;
        check_finite(cholesky.solve(gradient))
    }

    fn factorize_normal_equation(&mut self, jacobian: &SparseMatrix) -> LinAlgResult<()> {
        self.factorization = None;
        let hessian = Self::normal_matrix(jacobian)?;
        self.factorization = Some(Self::factorize(&hessian)?);
        Ok(())
    }

    fn solve(&self, rhs: &FaerMatrix) -> LinAlgResult<FaerMatrix> {
        let cholesky = self
            .factorization
            .as_ref()
            .ok_or_else(|| LinAlgError::InvalidState("JᵀJ has not been factorized".to_string()))?;
        check_finite(cholesky.solve(rhs))
    }

    fn is_factorized(&self) -> bool {
        self.factorization.is_some()
    }
}
