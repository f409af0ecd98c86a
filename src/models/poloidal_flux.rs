use std::sync::Arc;

use crate::discretization::Grid;
use crate::error::Result;
use crate::physics::EquationTerm;
use crate::physics::equation::UnknownQuantityEquation;
use crate::physics::identity::IdentityTerm;
use crate::physics::prescribed::{DataSource, PrescribedParameter};
use crate::physics::transient::TransientTerm;
use crate::system::EquationSystem;

/// Unknown IDs of the poloidal flux system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoloidalFlux {
    pub psi: usize,
    pub v_loop: usize,
}

/// `dpsi/dt = V_loop` on every radius of `grid`, with a prescribed loop
/// voltage. `psi0` defaults to zero.
pub fn poloidal_flux_system(
    grid: Arc<Grid>,
    v_loop: DataSource,
    psi0: Option<&[f64]>,
    t0: f64,
) -> Result<(EquationSystem, PoloidalFlux)> {
    let nr = grid.nr();
    let mut system = EquationSystem::new(grid);
    let psi = system.define_fluid_unknown("psi_p", "poloidal flux", 1)?;
    let v = system.define_fluid_unknown("V_loop", "loop voltage", 1)?;

    let mut eq = UnknownQuantityEquation::new(psi, "dpsi/dt = V_loop");
    eq.add_term(psi, TransientTerm::new(psi))?;
    eq.add_term(v, IdentityTerm::new(nr))?;
    system.set_equation(eq)?;

    let mut v_loop = PrescribedParameter::new(nr, v_loop)?;
    v_loop.rebuild(t0, 0.0, system.unknowns())?;
    let v0 = v_loop.values().to_vec();
    let mut eq = UnknownQuantityEquation::new(v, "prescribed loop voltage");
    eq.add_term(v, v_loop)?;
    system.set_equation(eq)?;

    system.unknowns_mut().set_initial_value(psi, psi0, t0)?;
    system.unknowns_mut().set_initial_value(v, Some(&v0), t0)?;

    log::info!("poloidal flux system: {nr} radii");
    Ok((system, PoloidalFlux { psi, v_loop: v }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::fluid_grid;
    use crate::numerics::solver::{Solver, SolverSettings};

    #[test]
    fn flux_grows_with_loop_voltage() {
        let grid = Arc::new(fluid_grid(3, 1.0).unwrap());
        let (mut system, ids) =
            poloidal_flux_system(grid, DataSource::Constant(vec![1.0, 2.0, 3.0]), None, 0.0).unwrap();
        assert_eq!(system.nontrivial_unknowns(), vec![ids.psi]);
        assert_eq!(system.unknowns().get_unknown_data(ids.v_loop).unwrap(), &[1.0, 2.0, 3.0]);

        let mut solver = Solver::new(SolverSettings::default()).unwrap();
        solver.initialize_from_system(&system).unwrap();
        solver.solve(&mut system, 0.5, 0.5).unwrap();
        let psi = system.unknowns().get_unknown_data(ids.psi).unwrap();
        for (got, want) in psi.iter().zip([0.5, 1.0, 1.5]) {
            assert!((got - want).abs() < 1e-12);
        }
    }
}
