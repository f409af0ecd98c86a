use faer::Mat;
use faer::linalg::solvers::Solve;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::error::{FvmError, Result};

/// Numeric solve of an assembled system `A x = b`.
pub trait LinearSolver {
    fn name(&self) -> &str;

    fn solve(&mut self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>>;
}

/// Sparse LU factorization with partial pivoting. The assembled CSR
/// pattern is handed to faer as-is; no dense copy is made.
#[derive(Clone, Copy, Debug, Default)]
pub struct SparseLu;

impl LinearSolver for SparseLu {
    fn name(&self) -> &str {
        "sparse LU"
    }

    fn solve(&mut self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
        let n = a.nrows();
        if a.ncols() != n || b.len() != n {
            return Err(FvmError::config(format!(
                "linear system {}x{} with right-hand side of length {}",
                n,
                a.ncols(),
                b.len()
            )));
        }
        if b.iter().all(|v| *v == 0.0) {
            return Ok(DVector::zeros(n));
        }

        let triplets: Vec<Triplet<usize, usize, f64>> =
            a.triplet_iter().map(|(i, j, v)| Triplet::new(i, j, *v)).collect();
        let mat = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| FvmError::config(format!("invalid sparse pattern: {e:?}")))?;
        let lu = mat
            .sp_lu()
            .map_err(|e| FvmError::numeric(format!("sparse LU failed: {e:?}")))?;

        let mut rhs = Mat::from_fn(n, 1, |i, _| b[i]);
        lu.solve_in_place(&mut rhs);
        let x = DVector::from_fn(n, |i, _| rhs[(i, 0)]);
        if !x.iter().all(|v| v.is_finite()) {
            return Err(FvmError::numeric("linear solve produced non-finite values"));
        }
        Ok(x)
    }
}
