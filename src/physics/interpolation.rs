use crate::discretization::{FaceArray, FaceGrid, Grid};
use crate::error::{FvmError, Result};
use crate::physics::advection::AdvectionCoefficients;
use crate::physics::storage::CoefficientSet;

/// TVD flux limiters, `psi(r)` with `0 <= psi <= 2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FluxLimiter {
    Minmod,
    VanLeer,
    Superbee,
}

impl FluxLimiter {
    pub fn psi(self, r: f64) -> f64 {
        match self {
            FluxLimiter::Minmod => r.min(1.0).max(0.0),
            FluxLimiter::VanLeer => {
                if r <= 0.0 {
                    0.0
                } else {
                    2.0 * r / (1.0 + r)
                }
            }
            FluxLimiter::Superbee => (2.0 * r).min(1.0).max(r.min(2.0)).max(0.0),
        }
    }
}

/// How face values are interpolated from the two neighbouring cells.
///
/// The advection term represents `+d(F x)/dp`, i.e. transport with velocity
/// `-F`; "upwind" below is taken with respect to that velocity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum InterpolationScheme {
    /// δ = 1/2 on every face.
    #[default]
    Central,
    Upwind,
    Downwind,
    /// Upwind-biased TVD scheme evaluated on the current value of `unknown_id`.
    Limited { limiter: FluxLimiter, unknown_id: usize },
    /// δ is set by the caller and never recomputed.
    Custom,
}

/// Face interpolation weights: the face value is `(1-δ) x_lower + δ x_upper`.
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolationCoefficients {
    pub deltar: FaceArray,
    pub delta1: FaceArray,
    pub delta2: FaceArray,
}

impl CoefficientSet for InterpolationCoefficients {
    fn allocate(grid: &Grid) -> Self {
        Self {
            deltar: FaceArray::filled(grid, FaceGrid::Radial, 0.5),
            delta1: FaceArray::filled(grid, FaceGrid::P1, 0.5),
            delta2: FaceArray::filled(grid, FaceGrid::P2, 0.5),
        }
    }

    fn reset(&mut self) {
        self.deltar.fill(0.5);
        self.delta1.fill(0.5);
        self.delta2.fill(0.5);
    }

    fn matches(&self, grid: &Grid) -> bool {
        self.deltar.matches(grid) && self.delta1.matches(grid) && self.delta2.matches(grid)
    }

    fn reshape(&mut self, grid: &Grid) -> bool {
        let changed = self.deltar.reshape(grid) | self.delta1.reshape(grid) | self.delta2.reshape(grid);
        self.reset();
        changed
    }
}

/// δ on a face with coefficient `f`, given the cell values needed by the
/// limiter: `lower2, lower, upper, upper2` (outer ones absent at boundaries).
fn face_delta(
    scheme: &InterpolationScheme,
    f: f64,
    lower2: Option<f64>,
    lower: f64,
    upper: f64,
    upper2: Option<f64>,
) -> f64 {
    match scheme {
        InterpolationScheme::Central => 0.5,
        InterpolationScheme::Upwind | InterpolationScheme::Downwind if f == 0.0 => 0.5,
        InterpolationScheme::Upwind => {
            if f > 0.0 {
                1.0
            } else {
                0.0
            }
        }
        InterpolationScheme::Downwind => {
            if f > 0.0 {
                0.0
            } else {
                1.0
            }
        }
        InterpolationScheme::Limited { limiter, .. } => {
            if f == 0.0 {
                return 0.5;
            }
            // Velocity -F: for F > 0 the upper cell is upwind.
            let (up, down, far) = if f > 0.0 {
                (upper, lower, upper2)
            } else {
                (lower, upper, lower2)
            };
            let psi = match far {
                Some(far) if down != up => limiter.psi((up - far) / (down - up)),
                _ => 0.0,
            };
            if f > 0.0 { 1.0 - 0.5 * psi } else { 0.5 * psi }
        }
        InterpolationScheme::Custom => 0.5,
    }
}

impl InterpolationCoefficients {
    /// Recomputes δ on every interior face from the advection coefficients
    /// and, for limited schemes, the distribution `x`.
    pub fn update(
        &mut self,
        scheme: &InterpolationScheme,
        grid: &Grid,
        coeffs: &AdvectionCoefficients,
        x: Option<&[f64]>,
    ) -> Result<()> {
        if matches!(scheme, InterpolationScheme::Custom) {
            return Ok(());
        }
        let limited = matches!(scheme, InterpolationScheme::Limited { .. });
        let x = match x {
            Some(x) if x.len() >= grid.ncells() => x,
            Some(x) => {
                return Err(FvmError::config(format!(
                    "interpolation: state vector has {} elements, grid has {} cells",
                    x.len(),
                    grid.ncells()
                )));
            }
            None if limited => {
                return Err(FvmError::config("limited interpolation requires the unknown's value"));
            }
            None => &[][..],
        };
        let value = |ir: usize, i: usize, j: usize| -> f64 {
            if limited {
                x[grid.cell_offset(ir) + j * grid.n1(ir) + i]
            } else {
                0.0
            }
        };

        let nr = grid.nr();
        for ir in 1..nr {
            let (n1, n2) = grid.momentum(ir).shape();
            for j in 0..n2 {
                for i in 0..n1 {
                    let idx = j * n1 + i;
                    let f = coeffs.fr.at(ir)[idx];
                    let lower2 = (ir >= 2).then(|| value(ir - 2, i, j));
                    let upper2 = (ir + 1 < nr).then(|| value(ir + 1, i, j));
                    self.deltar.at_mut(ir)[idx] =
                        face_delta(scheme, f, lower2, value(ir - 1, i, j), value(ir, i, j), upper2);
                }
            }
        }

        for ir in 0..nr {
            let (n1, n2) = grid.momentum(ir).shape();
            for j in 0..n2 {
                for i in 1..n1 {
                    let fidx = j * (n1 + 1) + i;
                    let f = coeffs.f1.at(ir)[fidx];
                    let lower2 = (i >= 2).then(|| value(ir, i - 2, j));
                    let upper2 = (i + 1 < n1).then(|| value(ir, i + 1, j));
                    self.delta1.at_mut(ir)[fidx] =
                        face_delta(scheme, f, lower2, value(ir, i - 1, j), value(ir, i, j), upper2);
                }
            }
            for j in 1..n2 {
                for i in 0..n1 {
                    let fidx = j * n1 + i;
                    let f = coeffs.f2.at(ir)[fidx];
                    let lower2 = (j >= 2).then(|| value(ir, i, j - 2));
                    let upper2 = (j + 1 < n2).then(|| value(ir, i, j + 1));
                    self.delta2.at_mut(ir)[fidx] =
                        face_delta(scheme, f, lower2, value(ir, i, j - 1), value(ir, i, j), upper2);
                }
            }
        }
        Ok(())
    }
}
