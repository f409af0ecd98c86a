use super::grid::{Grid, Metric, MomentumGrid, MomentumMetric, RadialGrid, RadialMetric};
use crate::error::{FvmError, Result};

/// `n+1` equidistant faces covering `[x0, x1]`.
pub fn uniform_faces(x0: f64, x1: f64, n: usize) -> Vec<f64> {
    let dx = (x1 - x0) / n as f64;
    (0..=n).map(|i| x0 + i as f64 * dx).collect()
}

/// Faces clustered towards `x0` by a power law; `exponent > 1` refines near the lower end.
pub fn power_law_faces(x0: f64, x1: f64, n: usize, exponent: f64) -> Vec<f64> {
    (0..=n)
        .map(|i| x0 + (x1 - x0) * (i as f64 / n as f64).powf(exponent))
        .collect()
}

/// Uniform radial grid on `[0, a]`.
pub fn uniform_radial_grid(nr: usize, a: f64) -> Result<RadialGrid> {
    if nr == 0 {
        return Err(FvmError::config("radial grid: nr must be positive"));
    }
    RadialGrid::from_faces(uniform_faces(0.0, a, nr))
}

/// Single-cell momentum grid used by fluid (radius-only) quantities.
pub fn fluid_momentum_grid() -> MomentumGrid {
    MomentumGrid::single_cell()
}

/// Uniform p-xi grid: `np` cells in `[pmin, pmax]`, `nxi` cells in `[-1, 1]`.
pub fn uniform_pxi_grid(np: usize, pmin: f64, pmax: f64, nxi: usize) -> Result<MomentumGrid> {
    if np == 0 || nxi == 0 {
        return Err(FvmError::config("momentum grid: np and nxi must be positive"));
    }
    MomentumGrid::from_faces(uniform_faces(pmin, pmax, np), uniform_faces(-1.0, 1.0, nxi))
}

/// Cylindrical radial grid with a single momentum cell per radius.
pub fn fluid_grid(nr: usize, a: f64) -> Result<Grid> {
    Grid::uniform_momentum(
        uniform_radial_grid(nr, a)?,
        fluid_momentum_grid(),
        Metric {
            radial: RadialMetric::Cylindrical,
            momentum: MomentumMetric::Cartesian,
        },
    )
}

/// Radius-only companion of `grid`, on which fluid quantities live.
pub fn fluid_grid_like(grid: &Grid) -> Result<Grid> {
    Grid::uniform_momentum(
        grid.radial().clone(),
        fluid_momentum_grid(),
        Metric {
            radial: grid.metric().radial,
            momentum: MomentumMetric::Cartesian,
        },
    )
}

/// Cylindrical radial grid carrying a uniform p-xi grid at every radius.
pub fn kinetic_grid(nr: usize, a: f64, np: usize, pmax: f64, nxi: usize) -> Result<Grid> {
    Grid::uniform_momentum(
        uniform_radial_grid(nr, a)?,
        uniform_pxi_grid(np, 0.0, pmax, nxi)?,
        Metric {
            radial: RadialMetric::Cylindrical,
            momentum: MomentumMetric::Spherical,
        },
    )
}

/// Unit-spaced Cartesian grid, `nr` x `n1` x `n2` cells with V' = 1.
pub fn cartesian_grid(nr: usize, n1: usize, n2: usize) -> Result<Grid> {
    if nr == 0 || n1 == 0 || n2 == 0 {
        return Err(FvmError::config("cartesian grid: all dimensions must be positive"));
    }
    Grid::uniform_momentum(
        RadialGrid::from_faces(uniform_faces(0.0, nr as f64, nr))?,
        MomentumGrid::from_faces(uniform_faces(0.0, n1 as f64, n1), uniform_faces(0.0, n2 as f64, n2))?,
        Metric::default(),
    )
}
