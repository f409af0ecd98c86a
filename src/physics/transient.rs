use crate::error::{FvmError, Result};
use crate::numerics::block_matrix::BlockView;
use crate::physics::EquationTerm;
use crate::physics::identity::Weights;
use crate::unknowns::UnknownQuantityHandler;

/// Backward-Euler time derivative `-w (x - x_prev) / dt` of one unknown.
#[derive(Clone, Debug)]
pub struct TransientTerm {
    unknown_id: usize,
    weights: Weights,
    dt: f64,
    previous: Vec<f64>,
}

impl TransientTerm {
    pub fn new(unknown_id: usize) -> Self {
        Self::weighted(unknown_id, 1.0)
    }

    pub fn weighted(unknown_id: usize, weights: impl Into<Weights>) -> Self {
        Self {
            unknown_id,
            weights: weights.into(),
            dt: 0.0,
            previous: Vec::new(),
        }
    }

    pub fn unknown_id(&self) -> usize {
        self.unknown_id
    }

    fn check_rebuilt(&self) -> Result<()> {
        if self.dt <= 0.0 {
            return Err(FvmError::config(format!(
                "transient term of unknown {} used without a positive time step",
                self.unknown_id
            )));
        }
        Ok(())
    }
}

impl EquationTerm for TransientTerm {
    fn rebuild(&mut self, _t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()> {
        let previous = unknowns.get_unknown_data_previous(self.unknown_id)?;
        self.weights.check_len(previous.len(), "transient term")?;
        self.dt = dt;
        self.previous.clear();
        self.previous.extend_from_slice(previous);
        Ok(())
    }

    fn nnz_per_row(&self) -> usize {
        1
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        self.check_rebuilt()?;
        for (i, prev) in self.previous.iter().enumerate() {
            let w = self.weights.at(i) / self.dt;
            mat.set_element(i, i, -w)?;
            rhs[i] += w * prev;
        }
        Ok(())
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        self.check_rebuilt()?;
        if vec.len() < self.previous.len() || x.len() < self.previous.len() {
            return Err(FvmError::config("transient term: vector shorter than the unknown"));
        }
        for (i, prev) in self.previous.iter().enumerate() {
            vec[i] -= self.weights.at(i) * (x[i] - prev) / self.dt;
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
        if uqty_id != deriv_id {
            return Ok(());
        }
        self.check_rebuilt()?;
        for i in 0..self.previous.len() {
            jac.set_element(i, i, -self.weights.at(i) / self.dt)?;
        }
        Ok(())
    }
}
