use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use plasma_fvm::discretization::generator::power_law_faces;
use plasma_fvm::discretization::{Grid, Metric, MomentumGrid, MomentumMetric, RadialGrid, RadialMetric};
use plasma_fvm::physics::EquationTerm;
use plasma_fvm::physics::advection::{AdvectionCoefficients, AdvectionFn, AdvectionTerm};
use plasma_fvm::physics::diffusion::{DiffusionCoefficients, DiffusionFn, DiffusionTerm};
use plasma_fvm::physics::interpolation::InterpolationScheme;
use plasma_fvm::unknowns::UnknownQuantityHandler;

fn random_grid(rng: &mut StdRng) -> Grid {
    let nr = rng.random_range(1..5);
    let n1 = rng.random_range(1..7);
    let n2 = rng.random_range(1..5);
    let radial = RadialGrid::from_faces(power_law_faces(0.0, 1.0, nr, rng.random_range(1.0..2.0))).unwrap();
    let momentum = MomentumGrid::from_faces(
        power_law_faces(0.0, 3.0, n1, rng.random_range(1.0..2.0)),
        power_law_faces(-1.0, 1.0, n2, 1.0),
    )
    .unwrap();
    Grid::uniform_momentum(
        radial,
        momentum,
        Metric {
            radial: RadialMetric::Cylindrical,
            momentum: MomentumMetric::Spherical,
        },
    )
    .unwrap()
}

fn random_values(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.random_range(-1.0..1.0)).collect()
}

/// Integral of the term's contribution and the integral of its magnitude.
fn integrated(grid: &Grid, term: &impl EquationTerm, x: &[f64]) -> (f64, f64) {
    let mut vec = vec![0.0; grid.ncells()];
    term.set_vector_elements(&mut vec, x).unwrap();
    let abs: Vec<f64> = vec.iter().map(|v| v.abs()).collect();
    (grid.integrate(&vec), grid.integrate(&abs))
}

fn advection_term(rng: &mut StdRng, grid: &Arc<Grid>, scheme: InterpolationScheme) -> AdvectionTerm {
    let fr = random_values(rng, grid.ncells_fr());
    let f1 = random_values(rng, grid.ncells_f1());
    let f2 = random_values(rng, grid.ncells_f2());
    let model: AdvectionFn = Box::new(move |_t, _u, _g, c: &mut AdvectionCoefficients| {
        c.fr.as_mut_slice().copy_from_slice(&fr);
        c.f1.as_mut_slice().copy_from_slice(&f1);
        c.f2.as_mut_slice().copy_from_slice(&f2);
        Ok(())
    });
    let mut term = AdvectionTerm::with_model(Arc::clone(grid), model).with_scheme(scheme);
    term.rebuild(0.0, 1.0, &UnknownQuantityHandler::new()).unwrap();
    term
}

fn diffusion_term(rng: &mut StdRng, grid: &Arc<Grid>) -> DiffusionTerm {
    let drr = random_values(rng, grid.ncells_fr());
    let d11 = random_values(rng, grid.ncells_f1());
    let d12 = random_values(rng, grid.ncells_f1());
    let d21 = random_values(rng, grid.ncells_f2());
    let d22 = random_values(rng, grid.ncells_f2());
    let model: DiffusionFn = Box::new(move |_t, _u, _g, c: &mut DiffusionCoefficients| {
        c.drr.as_mut_slice().copy_from_slice(&drr);
        c.d11.as_mut_slice().copy_from_slice(&d11);
        c.d12.as_mut_slice().copy_from_slice(&d12);
        c.d21.as_mut_slice().copy_from_slice(&d21);
        c.d22.as_mut_slice().copy_from_slice(&d22);
        Ok(())
    });
    let mut term = DiffusionTerm::with_model(Arc::clone(grid), model);
    term.rebuild(0.0, 1.0, &UnknownQuantityHandler::new()).unwrap();
    term
}

#[test]
fn constant_field_has_zero_net_flux() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..5 {
        let grid = Arc::new(random_grid(&mut rng));
        let x = vec![rng.random_range(0.5..2.0); grid.ncells()];

        let adv = advection_term(&mut rng, &grid, InterpolationScheme::Central);
        let (net, scale) = integrated(&grid, &adv, &x);
        assert!(net.abs() <= 1e-12 * scale.max(1.0), "advection: {net} vs {scale}");

        let diff = diffusion_term(&mut rng, &grid);
        let mut vec = vec![0.0; grid.ncells()];
        diff.set_vector_elements(&mut vec, &x).unwrap();
        assert!(vec.iter().all(|v| v.abs() < 1e-10), "diffusion of a constant field");
    }
}

#[test]
fn fluxes_telescope_for_any_field() {
    let mut rng = StdRng::seed_from_u64(1234);
    for scheme in [
        InterpolationScheme::Central,
        InterpolationScheme::Upwind,
        InterpolationScheme::Downwind,
    ] {
        let grid = Arc::new(random_grid(&mut rng));
        let x = random_values(&mut rng, grid.ncells());

        let adv = advection_term(&mut rng, &grid, scheme);
        let (net, scale) = integrated(&grid, &adv, &x);
        assert!(net.abs() <= 1e-12 * scale.max(1.0), "advection {scheme:?}: {net} vs {scale}");

        let diff = diffusion_term(&mut rng, &grid);
        let (net, scale) = integrated(&grid, &diff, &x);
        assert!(net.abs() <= 1e-12 * scale.max(1.0), "diffusion: {net} vs {scale}");
    }
}
