use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use super::{FaerMatrix, LinAlgError, LinAlgResult, SparseLinearSolver, SparseMatrix, sparse_to_dense};

/// Dense Cholesky factorization of the normal equations (nalgebra).
///
/// Builds `JᵀJ` densely, so it only suits problems with a few hundred
/// state variables. Used to cross-check the sparse path.
#[derive(Debug, Clone, Default)]
pub struct DenseCholeskySolver {
    factorization: Option<Cholesky<f64, Dyn>>,
}

impl DenseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn factorize(hessian: DMatrix<f64>) -> LinAlgResult<Cholesky<f64, Dyn>> {
        Cholesky::new(hessian).ok_or_else(|| {
            LinAlgError::SingularMatrix("Normal matrix not positive definite".to_string())
        })
    }
}

fn to_dvector(m: &FaerMatrix) -> DVector<f64> {
    DVector::from_fn(m.nrows(), |i, _| m[(i, 0)])
}

fn to_faer(v: &DVector<f64>) -> FaerMatrix {
    FaerMatrix::from_fn(v.len(), 1, |i, _| v[i])
}

impl SparseLinearSolver for DenseCholeskySolver {
    fn solve_augmented_equation(
        &mut self,
        residuals: &FaerMatrix,
        jacobian: &SparseMatrix,
        lambda: f64,
    ) -> LinAlgResult<FaerMatrix> {
        if residuals.nrows() != jacobian.nrows() {
            return Err(LinAlgError::InvalidInput(format!(
                "{} residuals for a Jacobian with {} rows",
                residuals.nrows(),
                jacobian.nrows()
            )));
        }
        let j = sparse_to_dense(jacobian);
        let mut hessian = j.transpose() * &j;
        for i in 0..hessian.nrows() {
            hessian[(i, i)] += lambda;
        }
        let gradient = -(j.transpose() * to_dvector(residuals));
        let cholesky = Self::factorize(hessian)?;
        Ok(to_faer(&cholesky.solve(&gradient)))
    }

    fn factorize_normal_equation(&mut self, jacobian: &SparseMatrix) -> LinAlgResult<()> {
        self.factorization = None;
        let j = sparse_to_dense(jacobian);
        self.factorization = Some(Self::factorize(j.transpose() * &j)?);
        Ok(())
    }

    fn solve(&self, rhs: &FaerMatrix) -> LinAlgResult<FaerMatrix> {
        let cholesky = self
            .factorization
            .as_ref()
            .ok_or_else(|| LinAlgError::InvalidState("JᵀJ has not been factorized".to_string()))?;
        Ok(to_faer(&cholesky.solve(&to_dvector(rhs))))
    }

    fn is_factorized(&self) -> bool {
        self.factorization.is_some()
    }
}
