//! Sparse linear algebra boundary.
//!
//! The optimizer only talks to the factorization through
//! [`SparseLinearSolver`]:
//! - `solve_augmented_equation` for the damped Levenberg-Marquardt step
//! - `factorize_normal_equation` + `solve` for uncertainty propagation
//!   through `(JᵀJ)⁻¹` at the solution

use faer::sparse::Triplet;
use thiserror::Error;

pub mod cholesky;
pub mod dense;

pub use cholesky::SparseCholeskySolver;
pub use dense::DenseCholeskySolver;

/// Type alias for sparse matrices using faer
pub type SparseMatrix = faer::sparse::SparseColMat<usize, f64>;

/// Type alias for faer matrices (used for vectors)
pub type FaerMatrix = faer::Mat<f64>;

/// Linear algebra errors
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    #[error("Factorization failed: {0}")]
    FactorizationFailed(String),

    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    #[error("Sparse matrix creation failed: {0}")]
    SparseMatrixCreation(String),

    #[error("Matrix conversion failed: {0}")]
    MatrixConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Factorization of the least-squares normal equations.
pub trait SparseLinearSolver: Send {
    /// Solves `(JᵀJ + λI)·Δ = −Jᵀx`.
    fn solve_augmented_equation(
        &mut self,
        residuals: &FaerMatrix,
        jacobian: &SparseMatrix,
        lambda: f64,
    ) -> LinAlgResult<FaerMatrix>;

    /// Factorizes `JᵀJ` and keeps the factor for [`Self::solve`].
    fn factorize_normal_equation(&mut self, jacobian: &SparseMatrix) -> LinAlgResult<()>;

    /// Solves `JᵀJ·y = rhs` with the stored factor.
    fn solve(&self, rhs: &FaerMatrix) -> LinAlgResult<FaerMatrix>;

    /// Whether [`Self::factorize_normal_equation`] has succeeded.
    fn is_factorized(&self) -> bool;
}

/// Linear solver choice
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    /// Sparse Cholesky (faer)
    #[default]
    SparseCholesky,
    /// Dense Cholesky (nalgebra); for small problems and cross-checking
    DenseCholesky,
}

impl LinearSolverType {
    pub fn create(self) -> Box<dyn SparseLinearSolver> {
        match self {
            LinearSolverType::SparseCholesky => Box::new(SparseCholeskySolver::new()),
            LinearSolverType::DenseCholesky => Box::new(DenseCholeskySolver::new()),
        }
    }
}

/// Builds a sparse matrix from `(row, col, value)` entries; duplicates are summed.
pub fn triplets_to_sparse(
    rows: usize,
    cols: usize,
    entries: &[(usize, usize, f64)],
) -> LinAlgResult<SparseMatrix> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|&(row, col, _)| (col, row));

    let mut merged: Vec<(usize, usize, f64)> = Vec::with_capacity(sorted.len());
    for (row, col, val) in sorted {
        match merged.last_mut() {
            Some(last) if last.0 == row && last.1 == col => last.2 += val,
            _ => merged.push((row, col, val)),
        }
    }
    let triplets: Vec<_> = merged
        .into_iter()
        .map(|(row, col, val)| Triplet::new(row, col, val))
        .collect();
    faer::sparse::SparseColMat::try_new_from_triplets(rows, cols, &triplets)
        .map_err(|e| LinAlgError::SparseMatrixCreation(format!("{rows}x{cols}: {e:?}")))
}

/// Copies a sparse matrix into a dense nalgebra matrix.
pub fn sparse_to_dense(matrix: &SparseMatrix) -> nalgebra::DMatrix<f64> {
    let mut dense = nalgebra::DMatrix::zeros(matrix.nrows(), matrix.ncols());
    let symbolic = matrix.symbolic();
    for col in 0..matrix.ncols() {
        let row_indices = symbolic.row_idx_of_col_raw(col);
        let col_values = matrix.val_of_col(col);
        for (idx, &row) in row_indices.iter().enumerate() {
            dense[(row, col)] += col_values[idx];
        }
    }
    dense
}
