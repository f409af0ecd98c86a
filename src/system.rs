use std::collections::BTreeMap;
use std::sync::Arc;

use crate::discretization::Grid;
use crate::discretization::generator::fluid_grid_like;
use crate::error::{FvmError, Result};
use crate::numerics::rebuild::AuxiliaryHandler;
use crate::physics::equation::UnknownQuantityEquation;
use crate::unknowns::{FluxGridType, UnknownQuantityHandler};

/// Grid, unknowns, their equations and the auxiliary physics handlers of
/// one simulation.
pub struct EquationSystem {
    pub(crate) grid: Arc<Grid>,
    pub(crate) unknowns: UnknownQuantityHandler,
    pub(crate) equations: BTreeMap<usize, UnknownQuantityEquation>,
    pub(crate) handlers: Vec<Box<dyn AuxiliaryHandler>>,
}

impl EquationSystem {
    pub fn new(grid: Arc<Grid>) -> Self {
        Self {
            grid,
            unknowns: UnknownQuantityHandler::new(),
            equations: BTreeMap::new(),
            handlers: Vec::new(),
        }
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn unknowns(&self) -> &UnknownQuantityHandler {
        &self.unknowns
    }

    pub fn unknowns_mut(&mut self) -> &mut UnknownQuantityHandler {
        &mut self.unknowns
    }

    /// Declares an unknown on the system's grid.
    pub fn define_unknown(
        &mut self,
        name: &str,
        description: &str,
        n_multiples: usize,
        flux_grid_type: FluxGridType,
    ) -> Result<usize> {
        self.unknowns
            .insert(name, description, &self.grid, n_multiples, flux_grid_type)
    }

    /// Declares a fluid unknown: `n_multiples` values per radius.
    pub fn define_fluid_unknown(&mut self, name: &str, description: &str, n_multiples: usize) -> Result<usize> {
        let grid = fluid_grid_like(&self.grid)?;
        self.unknowns
            .insert(name, description, &grid, n_multiples, FluxGridType::Distribution)
    }

    /// Installs the equation of its unknown, replacing any previous one.
    pub fn set_equation(&mut self, equation: UnknownQuantityEquation) -> Result<()> {
        let id = equation.unknown_id();
        let rows = self.unknowns.size(id)?;
        for (col, op) in equation.operators() {
            self.unknowns.get(col)?;
            for term in op.terms() {
                match term.size() {
                    Some(n) if n != rows => {
                        return Err(FvmError::config(format!(
                            "{} term of length {n} in the equation for '{}' ({rows} elements)",
                            term.kind(),
                            self.unknowns.name(id)?
                        )));
                    }
                    _ => {}
                }
            }
        }
        log::debug!(
            "equation for '{}': {}",
            self.unknowns.name(id)?,
            equation.description()
        );
        self.equations.insert(id, equation);
        Ok(())
    }

    pub fn equation(&self, id: usize) -> Option<&UnknownQuantityEquation> {
        self.equations.get(&id)
    }

    pub fn equation_mut(&mut self, id: usize) -> Option<&mut UnknownQuantityEquation> {
        self.equations.get_mut(&id)
    }

    pub fn add_handler(&mut self, handler: impl AuxiliaryHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Unknowns solved for in the linear system: those with an equation
    /// that is not predetermined, in ID order.
    pub fn nontrivial_unknowns(&self) -> Vec<usize> {
        self.equations
            .iter()
            .filter(|(_, eq)| !eq.is_predetermined())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Fails if some unknown has no equation.
    pub fn check_consistency(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .unknowns
            .iter()
            .filter(|u| !self.equations.contains_key(&u.id))
            .map(|u| u.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FvmError::config(format!(
                "no equation given for unknown(s): {}",
                missing.join(", ")
            )))
        }
    }

    /// Switches every term to `grid`.
    ///
    /// Unknown buffers are not resized or interpolated: the new grid may move
    /// faces or change the metric, but must give every unknown the same
    /// number of elements. A change of resolution needs a new system. On
    /// error nothing is switched and the system stays on its previous grid.
    pub fn grid_rebuilt(&mut self, grid: Arc<Grid>) -> Result<bool> {
        let fluid = fluid_grid_like(&grid)?;
        for uqty in self.unknowns.iter() {
            let n = uqty.data.flux_grid_type().nelements(&grid);
            let n_fluid = uqty.data.flux_grid_type().nelements(&fluid);
            if uqty.data.nelements() != n && uqty.data.nelements() != n_fluid {
                return Err(FvmError::config(format!(
                    "unknown '{}' does not fit the rebuilt grid",
                    uqty.name
                )));
            }
        }
        let mut changed = false;
        for eq in self.equations.values_mut() {
            changed |= eq.grid_rebuilt(&grid)?;
        }
        self.grid = grid;
        log::info!("grid rebuilt: {} cells, reallocated: {changed}", self.grid.ncells());
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::kinetic_grid;
    use crate::physics::identity::IdentityTerm;
    use crate::physics::prescribed::PrescribedParameter;

    #[test]
    fn nontrivial_excludes_predetermined() {
        let grid = Arc::new(kinetic_grid(2, 1.0, 3, 1.0, 2).unwrap());
        let mut system = EquationSystem::new(grid);
        let f = system.define_unknown("f", "distribution", 1, FluxGridType::Distribution).unwrap();
        let e = system.define_fluid_unknown("E", "electric field", 1).unwrap();
        assert_eq!(system.unknowns().size(f).unwrap(), 12);
        assert_eq!(system.unknowns().size(e).unwrap(), 2);
        assert!(system.check_consistency().is_err());

        let mut eq = UnknownQuantityEquation::new(e, "prescribed");
        eq.add_term(e, PrescribedParameter::constant(vec![1.0, 1.0])).unwrap();
        system.set_equation(eq).unwrap();
        let mut eq = UnknownQuantityEquation::new(f, "identity");
        eq.add_term(f, IdentityTerm::new(12)).unwrap();
        system.set_equation(eq).unwrap();

        system.check_consistency().unwrap();
        assert_eq!(system.nontrivial_unknowns(), vec![f]);
    }

    #[test]
    fn prescribed_length_must_match_the_unknown() {
        let grid = Arc::new(kinetic_grid(1, 1.0, 2, 1.0, 1).unwrap());
        let mut system = EquationSystem::new(grid);
        let v = system.define_fluid_unknown("V", "voltage", 1).unwrap();

        let mut eq = UnknownQuantityEquation::new(v, "prescribed");
        eq.add_term(v, PrescribedParameter::constant(vec![7.0, 8.0, 9.0])).unwrap();
        assert!(matches!(system.set_equation(eq), Err(FvmError::Configuration(_))));

        let mut eq = UnknownQuantityEquation::new(v, "identity");
        eq.add_term(v, IdentityTerm::new(2)).unwrap();
        assert!(matches!(system.set_equation(eq), Err(FvmError::Configuration(_))));
        assert!(system.equation(v).is_none());
    }

    #[test]
    fn grid_rebuild_keeps_unknown_sizes() {
        let grid = Arc::new(kinetic_grid(2, 1.0, 3, 1.0, 2).unwrap());
        let mut system = EquationSystem::new(grid);
        let f = system.define_unknown("f", "distribution", 1, FluxGridType::Distribution).unwrap();
        let mut eq = UnknownQuantityEquation::new(f, "identity");
        eq.add_term(f, IdentityTerm::new(12)).unwrap();
        system.set_equation(eq).unwrap();

        // Same cell counts on a stretched domain.
        let stretched = Arc::new(kinetic_grid(2, 2.0, 3, 3.0, 2).unwrap());
        assert!(!system.grid_rebuilt(Arc::clone(&stretched)).unwrap());
        assert!(Arc::ptr_eq(system.grid(), &stretched));

        let finer = Arc::new(kinetic_grid(2, 2.0, 4, 3.0, 2).unwrap());
        assert!(matches!(system.grid_rebuilt(finer), Err(FvmError::Configuration(_))));
        assert!(Arc::ptr_eq(system.grid(), &stretched));
        assert_eq!(system.unknowns().size(f).unwrap(), 12);
    }

    #[test]
    fn equation_for_missing_unknown_is_rejected() {
        let grid = Arc::new(kinetic_grid(1, 1.0, 2, 1.0, 1).unwrap());
        let mut system = EquationSystem::new(grid);
        let eq = UnknownQuantityEquation::new(3, "nothing");
        assert!(matches!(system.set_equation(eq), Err(FvmError::Configuration(_))));
    }
}
