use std::sync::Arc;

use crate::discretization::generator::{uniform_pxi_grid, uniform_radial_grid};
use crate::discretization::{Grid, Metric, MomentumMetric, RadialMetric};
use crate::error::{FvmError, Result};
use crate::physics::Dependency;
use crate::physics::advection::{AdvectionCoefficients, AdvectionModel};
use crate::physics::advection_diffusion::AdvectionDiffusionTerm;
use crate::physics::bc::{Boundary, Direction, ExternalLoss, Side};
use crate::physics::diffusion::{DiffusionCoefficients, DiffusionModel};
use crate::physics::equation::UnknownQuantityEquation;
use crate::physics::identity::IdentityTerm;
use crate::physics::interpolation::InterpolationScheme;
use crate::physics::operator::Operator;
use crate::physics::prescribed::{DataSource, PrescribedParameter};
use crate::physics::transient::TransientTerm;
use crate::system::EquationSystem;
use crate::unknowns::{FluxGridType, UnknownQuantityHandler};

/// Acceleration along the magnetic field by the electric field `E(r)`:
/// `F_p = E xi` on p faces and `F_xi = E (1 - xi^2) / p` on xi faces.
pub struct ElectricFieldAcceleration {
    e_field: usize,
}

impl ElectricFieldAcceleration {
    pub fn new(e_field: usize) -> Self {
        Self { e_field }
    }

    /// Writes the coefficients per unit field, scaled by `e(ir)`.
    fn fill(grid: &Grid, coeffs: &mut AdvectionCoefficients, e: impl Fn(usize) -> f64) {
        for ir in 0..grid.nr() {
            let mg = grid.momentum(ir);
            let (n1, n2) = mg.shape();
            let e_ir = e(ir);
            let f1 = coeffs.f1.at_mut(ir);
            for j in 0..n2 {
                for i in 0..=n1 {
                    f1[j * (n1 + 1) + i] += e_ir * mg.p2()[j];
                }
            }
            let f2 = coeffs.f2.at_mut(ir);
            for j in 0..=n2 {
                let xi = mg.p2_f()[j];
                for i in 0..n1 {
                    f2[j * n1 + i] += e_ir * (1.0 - xi * xi) / mg.p1()[i];
                }
            }
        }
    }
}

impl AdvectionModel for ElectricFieldAcceleration {
    fn rebuild(
        &mut self,
        _t: f64,
        _dt: f64,
        unknowns: &UnknownQuantityHandler,
        grid: &Grid,
        coeffs: &mut AdvectionCoefficients,
    ) -> Result<()> {
        let e = unknowns.get_unknown_data(self.e_field)?;
        if e.len() != grid.nr() {
            return Err(FvmError::config(format!(
                "electric field has {} values for {} radii",
                e.len(),
                grid.nr()
            )));
        }
        Self::fill(grid, coeffs, |ir| e[ir]);
        Ok(())
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(self.e_field, 1)]
    }

    fn set_partial_coefficients(
        &mut self,
        deriv_id: usize,
        _n: usize,
        _unknowns: &UnknownQuantityHandler,
        grid: &Grid,
        dcoeffs: &mut AdvectionCoefficients,
    ) -> Result<()> {
        if deriv_id == self.e_field {
            Self::fill(grid, dcoeffs, |_| 1.0);
        }
        Ok(())
    }
}

/// Pitch-angle scattering at constant frequency: `D_xixi = nu (1 - xi^2)`.
pub struct PitchAngleScattering {
    pub nu: f64,
}

impl DiffusionModel for PitchAngleScattering {
    fn rebuild(
        &mut self,
        _t: f64,
        _dt: f64,
        _unknowns: &UnknownQuantityHandler,
        grid: &Grid,
        coeffs: &mut DiffusionCoefficients,
    ) -> Result<()> {
        for ir in 0..grid.nr() {
            let mg = grid.momentum(ir);
            let (n1, n2) = mg.shape();
            let d22 = coeffs.d22.at_mut(ir);
            for j in 0..=n2 {
                let xi = mg.p2_f()[j];
                for i in 0..n1 {
                    d22[j * n1 + i] += self.nu * (1.0 - xi * xi);
                }
            }
        }
        Ok(())
    }
}

/// Constant radial diffusion `D_rr`.
pub struct RadialTransport {
    pub drr: f64,
}

impl DiffusionModel for RadialTransport {
    fn rebuild(
        &mut self,
        _t: f64,
        _dt: f64,
        _unknowns: &UnknownQuantityHandler,
        _grid: &Grid,
        coeffs: &mut DiffusionCoefficients,
    ) -> Result<()> {
        for v in coeffs.drr.as_mut_slice() {
            *v += self.drr;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KineticSettings {
    pub nr: usize,
    pub a: f64,
    pub np: usize,
    pub pmin: f64,
    pub pmax: f64,
    pub nxi: usize,
    /// Externally applied field the electric field relaxes to.
    pub e_applied: f64,
    pub nu: f64,
    pub drr: f64,
    pub scheme: InterpolationScheme,
    /// Drop particles leaving through the outer radial boundary.
    pub radial_loss: bool,
}

impl Default for KineticSettings {
    fn default() -> Self {
        Self {
            nr: 4,
            a: 1.0,
            np: 8,
            pmin: 0.1,
            pmax: 2.0,
            nxi: 6,
            e_applied: 0.1,
            nu: 0.5,
            drr: 0.01,
            scheme: InterpolationScheme::Central,
            radial_loss: true,
        }
    }
}

/// Unknown IDs of the kinetic system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KineticIds {
    pub f: usize,
    pub e_field: usize,
    pub e_applied: usize,
}

/// Grid of the kinetic system. The momentum grid starts at `pmin > 0` so
/// that every xi face carries a finite `1/p`.
pub fn kinetic_system_grid(settings: &KineticSettings) -> Result<Grid> {
    if settings.pmin <= 0.0 || settings.pmax <= settings.pmin {
        return Err(FvmError::config("kinetic grid needs 0 < pmin < pmax"));
    }
    Grid::uniform_momentum(
        uniform_radial_grid(settings.nr, settings.a)?,
        uniform_pxi_grid(settings.np, settings.pmin, settings.pmax, settings.nxi)?,
        Metric {
            radial: RadialMetric::Cylindrical,
            momentum: MomentumMetric::Spherical,
        },
    )
}

/// Distribution `f` advanced by field acceleration, pitch-angle scattering
/// and radial transport, coupled to a fluid electric field `E` that equals a
/// prescribed applied field.
pub fn kinetic_system(
    settings: &KineticSettings,
    f0: impl Fn(f64, f64, f64) -> f64,
) -> Result<(EquationSystem, KineticIds)> {
    let grid = Arc::new(kinetic_system_grid(settings)?);
    let nr = grid.nr();
    let mut system = EquationSystem::new(Arc::clone(&grid));
    let f = system.define_unknown("f", "distribution function", 1, FluxGridType::Distribution)?;
    let e = system.define_fluid_unknown("E_field", "parallel electric field", 1)?;
    let e_ext = system.define_fluid_unknown("E_applied", "applied electric field", 1)?;

    let mut transport = AdvectionDiffusionTerm::new(Arc::clone(&grid)).with_scheme(settings.scheme);
    transport.add_advection(ElectricFieldAcceleration::new(e))?;
    transport.add_diffusion(PitchAngleScattering { nu: settings.nu })?;
    if nr > 1 {
        transport.add_diffusion(RadialTransport { drr: settings.drr })?;
    }
    let mut op = Operator::new().with_term(TransientTerm::new(f))?.with_term(transport)?;
    if settings.radial_loss && nr > 1 {
        op.add_boundary_condition(ExternalLoss::new(
            Arc::clone(&grid),
            Boundary::new(Direction::Radial, Side::Upper),
        ));
    }
    system.set_equation(UnknownQuantityEquation::new(f, "df/dt = transport").with_operator(f, op))?;

    let mut eq = UnknownQuantityEquation::new(e, "E = E_applied");
    eq.add_term(e, IdentityTerm::weighted(nr, -1.0))?;
    eq.add_term(e_ext, IdentityTerm::new(nr))?;
    system.set_equation(eq)?;

    let mut eq = UnknownQuantityEquation::new(e_ext, "prescribed applied field");
    eq.add_term(
        e_ext,
        PrescribedParameter::new(nr, DataSource::Constant(vec![settings.e_applied; nr]))?,
    )?;
    system.set_equation(eq)?;

    let mut values = Vec::with_capacity(grid.ncells());
    for ir in 0..nr {
        let r = grid.radial().r()[ir];
        let mg = grid.momentum(ir);
        for &xi in mg.p2() {
            for &p in mg.p1() {
                values.push(f0(r, p, xi));
            }
        }
    }
    let unknowns = system.unknowns_mut();
    unknowns.set_initial_value(f, Some(&values), 0.0)?;
    unknowns.set_initial_value(e, Some(&vec![settings.e_applied; nr]), 0.0)?;
    unknowns.set_initial_value(e_ext, Some(&vec![settings.e_applied; nr]), 0.0)?;

    log::info!(
        "kinetic system: {} radii, {}x{} momentum cells, {} unknowns in f",
        nr,
        grid.n1(0),
        grid.n2(0),
        grid.ncells()
    );
    Ok((system, KineticIds { f, e_field: e, e_applied: e_ext }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::solver::{Solver, SolverSettings, SolverType};

    fn maxwellian(_r: f64, p: f64, _xi: f64) -> f64 {
        (-p * p).exp()
    }

    #[test]
    fn e_field_is_nontrivial() {
        let (system, ids) = kinetic_system(&KineticSettings::default(), maxwellian).unwrap();
        assert_eq!(system.nontrivial_unknowns(), vec![ids.f, ids.e_field]);
        assert_eq!(system.unknowns().size(ids.f).unwrap(), 4 * 8 * 6);
    }

    #[test]
    fn density_is_conserved_without_loss() {
        let settings = KineticSettings { radial_loss: false, ..KineticSettings::default() };
        let (mut system, ids) = kinetic_system(&settings, maxwellian).unwrap();
        let grid = Arc::clone(system.grid());
        let n0 = grid.integrate(system.unknowns().get_unknown_data(ids.f).unwrap());

        let mut solver = Solver::new(SolverSettings::default()).unwrap();
        solver.initialize_from_system(&system).unwrap();
        for k in 1..=3 {
            solver.solve(&mut system, 0.1 * k as f64, 0.1).unwrap();
            system.unknowns_mut().save_step(0.1 * k as f64, false);
        }
        let n1 = grid.integrate(system.unknowns().get_unknown_data(ids.f).unwrap());
        assert!((n1 - n0).abs() < 1e-10 * n0);
    }

    #[test]
    fn radial_loss_removes_particles() {
        let (mut system, ids) = kinetic_system(&KineticSettings::default(), maxwellian).unwrap();
        let grid = Arc::clone(system.grid());
        let n0 = grid.integrate(system.unknowns().get_unknown_data(ids.f).unwrap());

        let settings = SolverSettings { kind: SolverType::NonLinear, ..SolverSettings::default() };
        let mut solver = Solver::new(settings).unwrap();
        solver.initialize_from_system(&system).unwrap();
        let result = solver.solve(&mut system, 0.1, 0.1).unwrap();
        assert!(result.converged);
        let n1 = grid.integrate(system.unknowns().get_unknown_data(ids.f).unwrap());
        assert!(n1 < n0);
    }
}
