use std::sync::Arc;

use crate::discretization::Grid;
use crate::error::{FvmError, Result};
use crate::numerics::block_matrix::BlockView;
use crate::physics::bc::{BoundaryCondition, BoundaryConditionTerm};
use crate::physics::{Dependency, EquationTerm, Term, merge_dependencies};
use crate::unknowns::UnknownQuantityHandler;

/// Ordered terms and boundary conditions coupling one row unknown to one
/// column unknown.
///
/// Terms are rebuilt and assembled in insertion order. Boundary conditions
/// are rebuilt after all terms, since they read the terms' coefficients.
/// All `set_*` methods add to what the buffers already hold.
#[derive(Default)]
pub struct Operator {
    terms: Vec<Term>,
    boundary_conditions: Vec<BoundaryCondition>,
}

impl Operator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a term. Terms writing into a buffer owned elsewhere are
    /// rejected: each coefficient buffer has exactly one writer per rebuild,
    /// its owner, and a borrower is only driven by an owning composite term.
    pub fn add_term(&mut self, term: impl Into<Term>) -> Result<()> {
        let term = term.into();
        if term.is_shared() {
            return Err(FvmError::config(format!(
                "{} term with borrowed coefficients must be added through its owning term",
                term.kind()
            )));
        }
        self.terms.push(term);
        Ok(())
    }

    pub fn with_term(mut self, term: impl Into<Term>) -> Result<Self> {
        self.add_term(term)?;
        Ok(self)
    }

    pub fn add_boundary_condition(&mut self, bc: impl Into<BoundaryCondition>) {
        self.boundary_conditions.push(bc.into());
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn boundary_conditions(&self) -> &[BoundaryCondition] {
        &self.boundary_conditions
    }

    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.boundary_conditions.is_empty()
    }

    /// True if the operator is a single prescribed value.
    pub fn is_predetermined(&self) -> bool {
        self.boundary_conditions.is_empty() && self.terms.len() == 1 && self.terms[0].is_prescribed()
    }

    /// Values of a predetermined operator at the time of the last rebuild.
    pub fn predetermined_values(&self) -> Option<&[f64]> {
        match self.terms.as_slice() {
            [Term::Prescribed(p)] if self.boundary_conditions.is_empty() => Some(p.values()),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        merge_dependencies(self.terms.iter().flat_map(Term::dependencies).collect())
    }

    pub fn nnz_per_row(&self) -> usize {
        let terms = self.terms.iter().map(Term::nnz_per_row).max().unwrap_or(0);
        terms + self.boundary_conditions.iter().map(|bc| bc.nnz_per_row()).sum::<usize>()
    }

    pub fn nnz_per_row_jacobian(&self) -> usize {
        let terms = self.terms.iter().map(Term::nnz_per_row_jacobian).max().unwrap_or(0);
        let deps: usize = self.dependencies().iter().map(|d| d.n_multiples).sum();
        terms + deps + self.boundary_conditions.iter().map(|bc| bc.nnz_per_row()).sum::<usize>()
    }

    pub fn rebuild_terms(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()> {
        for term in &mut self.terms {
            term.rebuild(t, dt, unknowns)?;
        }
        for bc in &mut self.boundary_conditions {
            bc.rebuild(t, dt, unknowns, &self.terms)?;
        }
        Ok(())
    }

    pub fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<bool> {
        let mut changed = false;
        for term in &mut self.terms {
            changed |= term.grid_rebuilt(grid)?;
        }
        for bc in &mut self.boundary_conditions {
            bc.grid_rebuilt(grid)?;
        }
        Ok(changed)
    }

    pub fn has_overriding_bc(&self) -> bool {
        self.boundary_conditions.iter().any(|bc| bc.overrides())
    }

    /// Block-local rows owned by overriding boundary conditions.
    pub fn overridden_rows(&self) -> Vec<usize> {
        self.boundary_conditions
            .iter()
            .filter(|bc| bc.overrides())
            .flat_map(|bc| bc.overridden_rows().iter().copied())
            .collect()
    }

    pub fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        for term in &self.terms {
            term.set_matrix_elements(mat, rhs)?;
        }
        for bc in self.boundary_conditions.iter().filter(|bc| !bc.overrides()) {
            bc.add_to_matrix_elements(mat, rhs)?;
        }
        Ok(())
    }

    pub fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        for term in &self.terms {
            term.set_vector_elements(vec, x)?;
        }
        for bc in self.boundary_conditions.iter().filter(|bc| !bc.overrides()) {
            bc.add_to_vector_elements(vec, x)?;
        }
        Ok(())
    }

    /// `uqty_id` is the column unknown of this operator, `x` its value.
    pub fn set_jacobian_block(
        &mut self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        x: &[f64],
        unknowns: &UnknownQuantityHandler,
    ) -> Result<()> {
        for term in &mut self.terms {
            term.set_jacobian_block(uqty_id, deriv_id, jac, x, unknowns)?;
        }
        for bc in self.boundary_conditions.iter().filter(|bc| !bc.overrides()) {
            bc.add_to_jacobian_block(uqty_id, deriv_id, jac, x)?;
        }
        Ok(())
    }

    /// Overriding pass of the matrix assembly; the owned rows must have been
    /// cleared and the matrix partially assembled.
    pub fn set_matrix_elements_bc(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        for bc in self.boundary_conditions.iter().filter(|bc| bc.overrides()) {
            bc.add_to_matrix_elements(mat, rhs)?;
        }
        Ok(())
    }

    pub fn set_vector_elements_bc(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        for bc in self.boundary_conditions.iter().filter(|bc| bc.overrides()) {
            bc.add_to_vector_elements(vec, x)?;
        }
        Ok(())
    }

    pub fn set_jacobian_block_bc(
        &self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        x: &[f64],
    ) -> Result<()> {
        for bc in self.boundary_conditions.iter().filter(|bc| bc.overrides()) {
            bc.add_to_jacobian_block(uqty_id, deriv_id, jac, x)?;
        }
        Ok(())
    }
}
