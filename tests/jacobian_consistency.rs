use std::ops::Range;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use plasma_fvm::discretization::Grid;
use plasma_fvm::discretization::generator::cartesian_grid;
use plasma_fvm::models::kinetic::{KineticSettings, kinetic_system};
use plasma_fvm::numerics::block_matrix::BlockMatrix;
use plasma_fvm::numerics::solver::{Solver, SolverSettings, SolverType};
use plasma_fvm::physics::Dependency;
use plasma_fvm::physics::advection::{AdvectionCoefficients, AdvectionFn, AdvectionTerm};
use plasma_fvm::physics::bc::{
    Boundary, BoundaryCondition, Dirichlet, Direction, ExternalLoss, GeneralizedBc, Robin, Side, robin_ghost_val,
};
use plasma_fvm::physics::diffusion::{DiffusionCoefficients, DiffusionFn, DiffusionModel, DiffusionTerm};
use plasma_fvm::physics::equation::UnknownQuantityEquation;
use plasma_fvm::physics::identity::IdentityTerm;
use plasma_fvm::physics::interpolation::{FluxLimiter, InterpolationScheme};
use plasma_fvm::physics::operator::Operator;
use plasma_fvm::unknowns::{FluxGridType, UnknownQuantityHandler};
use plasma_fvm::{EquationSystem, FvmError};

fn newton_solver(system: &EquationSystem) -> Solver {
    let settings = SolverSettings {
        kind: SolverType::NonLinear,
        ..SolverSettings::default()
    };
    let mut solver = Solver::new(settings).unwrap();
    solver.initialize_from_system(system).unwrap();
    solver
}

/// Current values of the non-trivial unknowns, concatenated.
fn state(system: &EquationSystem, solver: &Solver) -> Vec<f64> {
    let mut x = vec![0.0; solver.size()];
    for id in solver.nontrivial_unknowns() {
        let offset = solver.offset_of(id).unwrap();
        let data = system.unknowns().get_unknown_data(id).unwrap();
        x[offset..offset + data.len()].copy_from_slice(data);
    }
    x
}

fn residual_at(system: &mut EquationSystem, solver: &mut Solver, x: &[f64]) -> Vec<f64> {
    for id in solver.nontrivial_unknowns() {
        let offset = solver.offset_of(id).unwrap();
        system.unknowns_mut().store(id, x, offset, false).unwrap();
    }
    solver.rebuild_terms(system, 0.1, 0.1).unwrap();
    let mut f = vec![0.0; solver.size()];
    solver.build_vector(system, &mut f).unwrap();
    f
}

/// Jacobian at the current state, assembled as a dense matrix.
fn jacobian(system: &mut EquationSystem, solver: &mut Solver) -> nalgebra::DMatrix<f64> {
    let x0 = state(system, solver);
    let _ = residual_at(system, solver, &x0);
    let mut jac: BlockMatrix = solver.matrix().clone();
    solver.build_jacobian(system, &mut jac).unwrap();
    jac.to_dense().unwrap()
}

/// Compares the assembled Jacobian against central differences of the
/// residual, column by column.
fn check_jacobian(system: &mut EquationSystem, solver: &mut Solver) {
    let n = solver.size();
    check_jacobian_columns(system, solver, 0..n);
}

fn check_jacobian_columns(system: &mut EquationSystem, solver: &mut Solver, columns: Range<usize>) {
    let x0 = state(system, solver);
    let dense = jacobian(system, solver);
    let scale = dense.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);

    for c in columns {
        let h = 1e-6 * x0[c].abs().max(1.0);
        let mut xp = x0.clone();
        xp[c] += h;
        let fp = residual_at(system, solver, &xp);
        let mut xm = x0.clone();
        xm[c] -= h;
        let fm = residual_at(system, solver, &xm);
        for r in 0..x0.len() {
            let fd = (fp[r] - fm[r]) / (2.0 * h);
            let analytic = dense[(r, c)];
            assert!(
                (fd - analytic).abs() <= 1e-6 * (analytic.abs() + scale),
                "J[{r},{c}]: analytic {analytic}, finite difference {fd}"
            );
        }
    }
    let _ = residual_at(system, solver, &x0);
}

fn random_kinetic_settings(rng: &mut StdRng, scheme: InterpolationScheme) -> KineticSettings {
    KineticSettings {
        nr: rng.random_range(1..4),
        np: rng.random_range(2..6),
        nxi: rng.random_range(2..5),
        pmin: rng.random_range(0.05..0.5),
        pmax: rng.random_range(1.0..3.0),
        e_applied: rng.random_range(-1.0..1.0),
        nu: rng.random_range(0.0..1.0),
        drr: rng.random_range(0.0..0.1),
        scheme,
        ..KineticSettings::default()
    }
}

// `f` is the first unknown the kinetic system defines.
const LIMITED: InterpolationScheme = InterpolationScheme::Limited {
    limiter: FluxLimiter::VanLeer,
    unknown_id: 0,
};

#[test]
fn kinetic_jacobian_matches_finite_differences() {
    let mut rng = StdRng::seed_from_u64(2024);
    for scheme in [InterpolationScheme::Central, InterpolationScheme::Upwind, LIMITED] {
        let settings = random_kinetic_settings(&mut rng, scheme);
        let a: f64 = rng.random_range(0.5..2.0);
        let (mut system, ids) = kinetic_system(&settings, |r, p, xi| (1.0 + xi * r) * (-a * p * p).exp()).unwrap();
        assert_eq!(ids.f, 0);
        // Move E away from its equilibrium so the coupling block is exercised.
        let nr = settings.nr;
        let e: Vec<f64> = (0..nr).map(|_| rng.random_range(-1.0..1.0)).collect();
        system.unknowns_mut().store(ids.e_field, &e, 0, false).unwrap();

        let mut solver = newton_solver(&system);
        if scheme == LIMITED {
            // The limiter weights are frozen in the Jacobian; they depend on
            // f only, so the field columns must still match exactly.
            let offset = solver.offset_of(ids.e_field).unwrap();
            check_jacobian_columns(&mut system, &mut solver, offset..offset + nr);
        } else {
            check_jacobian(&mut system, &mut solver);
        }
    }
}

#[test]
fn limited_jacobian_on_oscillating_distribution() {
    // Neighbouring cells alternate in every direction, so every gradient
    // ratio is negative and the limiter sits on its flat branch.
    let mut rng = StdRng::seed_from_u64(77);
    for _ in 0..3 {
        let settings = random_kinetic_settings(&mut rng, LIMITED);
        let (mut system, ids) = kinetic_system(&settings, |_, _, _| 1.0).unwrap();
        let grid = Arc::clone(system.grid());
        let mut f = Vec::with_capacity(grid.ncells());
        for ir in 0..grid.nr() {
            let (n1, n2) = grid.momentum(ir).shape();
            for j in 0..n2 {
                for i in 0..n1 {
                    let sign = if (ir + i + j) % 2 == 0 { 1.0 } else { -1.0 };
                    f.push(1.0 + 0.5 * sign);
                }
            }
        }
        system.unknowns_mut().store(ids.f, &f, 0, false).unwrap();
        let e: Vec<f64> = (0..settings.nr).map(|_| rng.random_range(0.2..1.0)).collect();
        system.unknowns_mut().store(ids.e_field, &e, 0, false).unwrap();

        let mut solver = newton_solver(&system);
        check_jacobian(&mut system, &mut solver);
    }
}

const F_ADV: f64 = 0.8;
const D_DIFF: f64 = 0.6;
const U0: [f64; 5] = [1.0, 2.0, 1.5, 3.0, 2.5];

/// Steady advection-diffusion of `u` on five momentum cells, closed by `bc`.
fn transport_with_boundary(bc: impl FnOnce(&Arc<Grid>) -> BoundaryCondition) -> (EquationSystem, Solver) {
    let grid = Arc::new(cartesian_grid(1, U0.len(), 1).unwrap());
    let mut system = EquationSystem::new(Arc::clone(&grid));
    let u = system.define_unknown("u", "", 1, FluxGridType::Distribution).unwrap();
    system.unknowns_mut().set_initial_value(u, Some(&U0), 0.0).unwrap();

    let adv: AdvectionFn = Box::new(|_t, _u, _g, c: &mut AdvectionCoefficients| {
        c.f1.fill(F_ADV);
        Ok(())
    });
    let diff: DiffusionFn = Box::new(|_t, _u, _g, c: &mut DiffusionCoefficients| {
        c.d11.fill(D_DIFF);
        Ok(())
    });
    let mut op = Operator::new()
        .with_term(AdvectionTerm::with_model(Arc::clone(&grid), adv))
        .unwrap()
        .with_term(DiffusionTerm::with_model(Arc::clone(&grid), diff))
        .unwrap();
    op.add_boundary_condition(bc(&grid));
    system
        .set_equation(UnknownQuantityEquation::new(u, "div(F u) + div(D grad u) = 0").with_operator(u, op))
        .unwrap();

    let solver = newton_solver(&system);
    (system, solver)
}

#[test]
fn external_loss_balances_outflow() {
    let (mut system, mut solver) = transport_with_boundary(|grid| {
        ExternalLoss::new(Arc::clone(grid), Boundary::new(Direction::P1, Side::Upper)).into()
    });
    check_jacobian(&mut system, &mut solver);

    let grid = Arc::clone(system.grid());
    let residual = residual_at(&mut system, &mut solver, &U0);
    let n = U0.len();
    let vp_f = grid.vp_f1(0)[n];
    let width = grid.momentum(0).dp1(n - 1);
    // Interior fluxes cancel; what is left is the flux through the outer face
    // with a zero exterior value one cell width away.
    let last = U0[n - 1];
    let expected = vp_f * (F_ADV * last + D_DIFF * (0.0 - last) / width);
    assert!((grid.integrate(&residual) - expected).abs() < 1e-12);
}

#[test]
fn robin_balances_ghost_flux() {
    let (alpha, gamma) = (2.0, 0.5);
    let (mut system, mut solver) = transport_with_boundary(|grid| {
        Robin::new(
            Arc::clone(grid),
            Boundary::new(Direction::P1, Side::Lower),
            GeneralizedBc::robin(alpha, gamma),
        )
        .into()
    });
    check_jacobian(&mut system, &mut solver);

    let grid = Arc::clone(system.grid());
    let residual = residual_at(&mut system, &mut solver, &U0);
    let vp_f = grid.vp_f1(0)[0];
    let width = grid.momentum(0).dp1(0);
    // alpha u + du/dn = alpha gamma on the face, through a ghost cell.
    let ghost = robin_ghost_val(U0[0], alpha, 1.0, alpha * gamma, 0.5 * width).unwrap();
    let face = 0.5 * (U0[0] + ghost);
    let outward_gradient = (ghost - U0[0]) / width;
    assert!((alpha * face + outward_gradient - alpha * gamma).abs() < 1e-12);
    let expected = vp_f * (-F_ADV * face + D_DIFF * outward_gradient);
    assert!((grid.integrate(&residual) - expected).abs() < 1e-12);
}

#[test]
fn dirichlet_rows_are_exact_on_the_newton_path() {
    let value = 4.0;
    let (mut system, mut solver) = transport_with_boundary(|grid| {
        Dirichlet::new(grid, Boundary::new(Direction::P1, Side::Upper), value).into()
    });
    check_jacobian(&mut system, &mut solver);

    let n = U0.len();
    let dense = jacobian(&mut system, &mut solver);
    for c in 0..n {
        assert_eq!(dense[(n - 1, c)], if c == n - 1 { 1.0 } else { 0.0 });
    }

    let grid = Arc::clone(system.grid());
    let residual = residual_at(&mut system, &mut solver, &U0);
    assert!((residual[n - 1] - (U0[n - 1] - value)).abs() < 1e-14);

    // The free cells exchange content only through the face shared with the
    // fixed cell; the closed lower end carries nothing.
    let mg = grid.momentum(0);
    let vp_f = grid.vp_f1(0)[n - 1];
    let spacing = mg.p1()[n - 1] - mg.p1()[n - 2];
    let face = 0.5 * (U0[n - 2] + U0[n - 1]);
    let expected = vp_f * (F_ADV * face + D_DIFF * (U0[n - 1] - U0[n - 2]) / spacing);
    let mut free = residual.clone();
    free[n - 1] = 0.0;
    assert!((grid.integrate(&free) - expected).abs() < 1e-12);
}

/// Diffusion depending on another unknown without providing its derivative.
struct Opaque {
    source: usize,
}

impl DiffusionModel for Opaque {
    fn rebuild(
        &mut self,
        _t: f64,
        _dt: f64,
        unknowns: &UnknownQuantityHandler,
        _grid: &Grid,
        coeffs: &mut DiffusionCoefficients,
    ) -> plasma_fvm::Result<()> {
        let d = unknowns.get_unknown_data(self.source)?[0];
        coeffs.d11.fill(d);
        Ok(())
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::new(self.source, 1)]
    }
}

#[test]
fn missing_diffusion_partials_are_reported() {
    let grid = Arc::new(cartesian_grid(1, 3, 1).unwrap());
    let mut system = EquationSystem::new(Arc::clone(&grid));
    let u = system.define_unknown("u", "", 1, FluxGridType::Distribution).unwrap();
    let d = system.define_fluid_unknown("D", "", 1).unwrap();
    system.unknowns_mut().set_initial_value(u, Some(&[1.0, 2.0, 4.0]), 0.0).unwrap();
    system.unknowns_mut().set_initial_value(d, Some(&[1.0]), 0.0).unwrap();

    let op = Operator::new()
        .with_term(DiffusionTerm::with_model(Arc::clone(&grid), Opaque { source: d }))
        .unwrap();
    system.set_equation(UnknownQuantityEquation::new(u, "du = div(D grad u)").with_operator(u, op)).unwrap();
    let mut eq = UnknownQuantityEquation::new(d, "D = 1");
    eq.add_term(d, IdentityTerm::new(1)).unwrap();
    system.set_equation(eq).unwrap();

    let mut solver = newton_solver(&system);
    solver.rebuild_terms(&mut system, 0.0, 1.0).unwrap();
    let mut jac = solver.matrix().clone();
    let err = solver.build_jacobian(&mut system, &mut jac).unwrap_err();
    assert!(matches!(err, FvmError::NotImplemented(_)));
}
