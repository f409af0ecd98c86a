use crate::error::{FvmError, Result};
use crate::numerics::block_matrix::BlockView;
use crate::physics::EquationTerm;
use crate::unknowns::UnknownQuantityHandler;

/// Element weights of a diagonal term.
#[derive(Clone, Debug, PartialEq)]
pub enum Weights {
    Scalar(f64),
    PerElement(Vec<f64>),
}

impl Default for Weights {
    fn default() -> Self {
        Weights::Scalar(1.0)
    }
}

impl Weights {
    #[inline]
    pub fn at(&self, i: usize) -> f64 {
        match self {
            Weights::Scalar(w) => *w,
            Weights::PerElement(w) => w[i],
        }
    }

    /// Fails when per-element weights do not cover `n` elements.
    pub fn check_len(&self, n: usize, name: &str) -> Result<()> {
        match self {
            Weights::PerElement(w) if w.len() != n => Err(FvmError::config(format!(
                "{name}: {} weights for an unknown with {n} elements",
                w.len()
            ))),
            _ => Ok(()),
        }
    }
}

impl From<f64> for Weights {
    fn from(w: f64) -> Self {
        Weights::Scalar(w)
    }
}

impl From<Vec<f64>> for Weights {
    fn from(w: Vec<f64>) -> Self {
        Weights::PerElement(w)
    }
}

/// `w x` on the diagonal of the block.
#[derive(Clone, Debug)]
pub struct IdentityTerm {
    size: usize,
    weights: Weights,
}

impl IdentityTerm {
    pub fn new(size: usize) -> Self {
        Self::weighted(size, 1.0)
    }

    pub fn weighted(size: usize, weights: impl Into<Weights>) -> Self {
        Self {
            size,
            weights: weights.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn set_weights(&mut self, weights: impl Into<Weights>) {
        self.weights = weights.into();
    }
}

impl EquationTerm for IdentityTerm {
    fn rebuild(&mut self, _t: f64, _dt: f64, _unknowns: &UnknownQuantityHandler) -> Result<()> {
        self.weights.check_len(self.size, "identity term")
    }

    fn nnz_per_row(&self) -> usize {
        1
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, _rhs: &mut [f64]) -> Result<()> {
        for i in 0..self.size {
            mat.set_element(i, i, self.weights.at(i))?;
        }
        Ok(())
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        if vec.len() < self.size || x.len() < self.size {
            return Err(FvmError::config("identity term: vector shorter than the unknown"));
        }
        for i in 0..self.size {
            vec[i] += self.weights.at(i) * x[i];
        }
        Ok(())
    }

    fn set_jacobian_block(
        &mut self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        _x: &[f64],
        _unknowns: &UnknownQuantityHandler,
    ) -> Result<()> {
        if uqty_id == deriv_id {
            self.set_matrix_elements(jac, &mut [])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::block_matrix::BlockMatrix;

    #[test]
    fn weighted_diagonal() {
        let mut m = BlockMatrix::new();
        m.create_sub_equation(3, 1).unwrap();
        m.construct_system().unwrap();
        let term = IdentityTerm::weighted(3, vec![1.0, 2.0, 3.0]);
        term.set_matrix_elements(&mut m.select_sub_equation(0, 0).unwrap(), &mut [])
            .unwrap();
        assert_eq!(m.get(1, 1), 2.0);
        assert_eq!(m.get(0, 1), 0.0);

        let mut vec = vec![1.0; 3];
        term.set_vector_elements(&mut vec, &[1.0, 1.0, 2.0]).unwrap();
        assert_eq!(vec, vec![2.0, 3.0, 7.0]);
    }

    #[test]
    fn mismatched_weights_fail_on_rebuild() {
        let mut term = IdentityTerm::weighted(3, vec![1.0, 2.0]);
        let uqh = UnknownQuantityHandler::new();
        assert!(matches!(term.rebuild(0.0, 1.0, &uqh), Err(FvmError::Configuration(_))));
    }
}
