use std::collections::BTreeMap;
use std::sync::Arc;

use crate::discretization::Grid;
use crate::error::Result;
use crate::physics::Term;
use crate::physics::operator::Operator;
use crate::unknowns::UnknownQuantityHandler;

/// The equation of one unknown: one [`Operator`] per column unknown it
/// couples to, kept in column order.
pub struct UnknownQuantityEquation {
    unknown_id: usize,
    description: String,
    operators: BTreeMap<usize, Operator>,
}

impl UnknownQuantityEquation {
    pub fn new(unknown_id: usize, description: impl Into<String>) -> Self {
        Self {
            unknown_id,
            description: description.into(),
            operators: BTreeMap::new(),
        }
    }

    pub fn unknown_id(&self) -> usize {
        self.unknown_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Installs the operator acting on `column_id`, replacing any previous one.
    pub fn set_operator(&mut self, column_id: usize, operator: Operator) {
        self.operators.insert(column_id, operator);
    }

    pub fn with_operator(mut self, column_id: usize, operator: Operator) -> Self {
        self.set_operator(column_id, operator);
        self
    }

    /// Appends a term to the operator acting on `column_id`.
    pub fn add_term(&mut self, column_id: usize, term: impl Into<Term>) -> Result<()> {
        self.operators.entry(column_id).or_default().add_term(term)
    }

    pub fn operator(&self, column_id: usize) -> Option<&Operator> {
        self.operators.get(&column_id)
    }

    pub fn operator_mut(&mut self, column_id: usize) -> Option<&mut Operator> {
        self.operators.get_mut(&column_id)
    }

    pub fn operators(&self) -> impl Iterator<Item = (usize, &Operator)> {
        self.operators.iter().map(|(id, op)| (*id, op))
    }

    pub fn operators_mut(&mut self) -> impl Iterator<Item = (usize, &mut Operator)> {
        self.operators.iter_mut().map(|(id, op)| (*id, op))
    }

    /// True if the unknown is given by a prescribed value of itself and
    /// takes no part in the linear system.
    pub fn is_predetermined(&self) -> bool {
        self.operators.len() == 1
            && self
                .operators
                .get(&self.unknown_id)
                .is_some_and(Operator::is_predetermined)
    }

    pub fn predetermined_values(&self) -> Option<&[f64]> {
        if !self.is_predetermined() {
            return None;
        }
        self.operators.get(&self.unknown_id)?.predetermined_values()
    }

    pub fn nnz_per_row(&self) -> usize {
        self.operators.values().map(Operator::nnz_per_row).sum::<usize>().max(1)
    }

    pub fn nnz_per_row_jacobian(&self) -> usize {
        self.operators
            .values()
            .map(Operator::nnz_per_row_jacobian)
            .sum::<usize>()
            .max(1)
    }

    pub fn rebuild_terms(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()> {
        for op in self.operators.values_mut() {
            op.rebuild_terms(t, dt, unknowns)?;
        }
        Ok(())
    }

    pub fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<bool> {
        let mut changed = false;
        for op in self.operators.values_mut() {
            changed |= op.grid_rebuilt(grid)?;
        }
        Ok(changed)
    }

    pub fn overridden_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.operators.values().flat_map(Operator::overridden_rows).collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::identity::IdentityTerm;
    use crate::physics::prescribed::PrescribedParameter;

    #[test]
    fn predetermined_only_for_a_lone_prescribed_self_operator() {
        let mut eq = UnknownQuantityEquation::new(1, "prescribed");
        eq.add_term(1, PrescribedParameter::constant(vec![3.0])).unwrap();
        assert!(eq.is_predetermined());
        assert_eq!(eq.predetermined_values(), Some(&[3.0][..]));

        eq.add_term(0, IdentityTerm::new(1)).unwrap();
        assert!(!eq.is_predetermined());
        assert_eq!(eq.operators().map(|(id, _)| id).collect::<Vec<_>>(), vec![0, 1]);
    }
}
