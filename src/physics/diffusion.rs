use std::cell::{Ref, RefMut};
use std::sync::Arc;

use crate::discretization::{FaceArray, FaceGrid, Grid, MomentumGrid};
use crate::error::{FvmError, Result};
use crate::numerics::block_matrix::BlockView;
use crate::physics::advection::{check_dependency, check_state_length};
use crate::physics::storage::{CoefficientSet, CoefficientStorage, SharedCoefficients};
use crate::physics::{Dependency, EquationTerm};
use crate::unknowns::UnknownQuantityHandler;

/// Diffusion coefficients: `drr` on radial faces, `d11`/`d12` on p1 faces
/// and `d21`/`d22` on p2 faces.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffusionCoefficients {
    pub drr: FaceArray,
    pub d11: FaceArray,
    pub d12: FaceArray,
    pub d21: FaceArray,
    pub d22: FaceArray,
}

impl CoefficientSet for DiffusionCoefficients {
    fn allocate(grid: &Grid) -> Self {
        Self {
            drr: FaceArray::new(grid, FaceGrid::Radial),
            d11: FaceArray::new(grid, FaceGrid::P1),
            d12: FaceArray::new(grid, FaceGrid::P1),
            d21: FaceArray::new(grid, FaceGrid::P2),
            d22: FaceArray::new(grid, FaceGrid::P2),
        }
    }

    fn reset(&mut self) {
        self.drr.reset();
        self.d11.reset();
        self.d12.reset();
        self.d21.reset();
        self.d22.reset();
    }

    fn matches(&self, grid: &Grid) -> bool {
        self.drr.matches(grid)
            && self.d11.matches(grid)
            && self.d12.matches(grid)
            && self.d21.matches(grid)
            && self.d22.matches(grid)
    }

    fn reshape(&mut self, grid: &Grid) -> bool {
        self.drr.reshape(grid)
            | self.d11.reshape(grid)
            | self.d12.reshape(grid)
            | self.d21.reshape(grid)
            | self.d22.reshape(grid)
    }
}

/// Physics plug-in providing the coefficients of a [`DiffusionTerm`].
pub trait DiffusionModel {
    /// Adds the coefficients at time `t` to the zeroed (or partially filled) buffer.
    fn rebuild(
        &mut self,
        t: f64,
        dt: f64,
        unknowns: &UnknownQuantityHandler,
        grid: &Grid,
        coeffs: &mut DiffusionCoefficients,
    ) -> Result<()>;

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Derivatives of the coefficients with respect to multiple `n` of
    /// `deriv_id`, laid out as for [`crate::physics::advection::AdvectionModel::set_partial_coefficients`].
    ///
    /// Diffusion terms get no automatic cross-unknown Jacobian: a model that
    /// declares dependencies must implement this itself.
    fn set_partial_coefficients(
        &mut self,
        deriv_id: usize,
        _n: usize,
        _unknowns: &UnknownQuantityHandler,
        _grid: &Grid,
        _dcoeffs: &mut DiffusionCoefficients,
    ) -> Result<()> {
        Err(FvmError::NotImplemented(format!(
            "diffusion coefficient derivative with respect to unknown {deriv_id}"
        )))
    }
}

pub type DiffusionFn =
    Box<dyn FnMut(f64, &UnknownQuantityHandler, &Grid, &mut DiffusionCoefficients) -> Result<()>>;

impl DiffusionModel for DiffusionFn {
    fn rebuild(
        &mut self,
        t: f64,
        _dt: f64,
        unknowns: &UnknownQuantityHandler,
        grid: &Grid,
        coeffs: &mut DiffusionCoefficients,
    ) -> Result<()> {
        self(t, unknowns, grid, coeffs)
    }
}

/// Neighbours and spacing used for the derivative along p2 at row `j`:
/// central in the interior, one-sided at the edges.
fn p2_derivative_stencil(mg: &MomentumGrid, j: usize) -> (usize, usize, f64) {
    let n2 = mg.np2();
    let (lo, hi) = if j == 0 {
        (0, 1)
    } else if j + 1 == n2 {
        (n2 - 2, n2 - 1)
    } else {
        (j - 1, j + 1)
    };
    (lo, hi, mg.p2()[hi] - mg.p2()[lo])
}

fn p1_derivative_stencil(mg: &MomentumGrid, i: usize) -> (usize, usize, f64) {
    let n1 = mg.np1();
    let (lo, hi) = if i == 0 {
        (0, 1)
    } else if i + 1 == n1 {
        (n1 - 2, n1 - 1)
    } else {
        (i - 1, i + 1)
    };
    (lo, hi, mg.p1()[hi] - mg.p1()[lo])
}

/// Visits every `(row, column, weight)` entry of the diffusion stencil
/// (5-point, or 9-point when cross terms are active). Each face flux is
/// computed from face quantities only, so fluxes telescope between cells.
pub(crate) fn diffusion_stencil<E>(
    grid: &Grid,
    coeffs: &DiffusionCoefficients,
    owner: Option<usize>,
    mut emit: E,
) -> Result<()>
where
    E: FnMut(usize, usize, f64) -> Result<()>,
{
    let nr = grid.nr();
    let owns = |k: usize| owner.is_none_or(|o| o == k);

    for ir in 0..nr {
        let mg = grid.momentum(ir);
        let (n1, n2) = mg.shape();
        let offset = grid.cell_offset(ir);
        let vp = grid.vp(ir);
        let radial = grid.radial();
        let dr = radial.dr(ir);

        if nr > 1 {
            for idx in 0..n1 * n2 {
                let row = offset + idx;
                let vol = vp[idx] * dr;
                if ir > 0 && owns(ir) {
                    let s = grid.vp_fr(ir)[idx] * coeffs.drr.at(ir)[idx] / (vol * radial.dr_f(ir));
                    emit(row, grid.cell_offset(ir - 1) + idx, s)?;
                    emit(row, row, -s)?;
                }
                if ir + 1 < nr && owns(ir + 1) {
                    let s = grid.vp_fr(ir + 1)[idx] * coeffs.drr.at(ir + 1)[idx]
                        / (vol * radial.dr_f(ir + 1));
                    emit(row, grid.cell_offset(ir + 1) + idx, s)?;
                    emit(row, row, -s)?;
                }
            }
        }

        if !owns(ir) {
            continue;
        }
        let cell = |i: usize, j: usize| offset + j * n1 + i;

        if n1 > 1 {
            let d11 = coeffs.d11.at(ir);
            let d12 = coeffs.d12.at(ir);
            let vp_f1 = grid.vp_f1(ir);
            for j in 0..n2 {
                for i in 0..n1 {
                    let row = cell(i, j);
                    let vol = vp[j * n1 + i] * mg.dp1(i);
                    // Lower face (sign -1) at i, upper face (sign +1) at i+1.
                    for (face, sign) in [(i, -1.0), (i + 1, 1.0)] {
                        if face == 0 || face == n1 {
                            continue;
                        }
                        let fidx = j * (n1 + 1) + face;
                        let s = vp_f1[fidx] * d11[fidx] / (vol * mg.dp1_f(face));
                        // Flux d11 (x_face - x_{face-1}) / dp
                        emit(row, cell(face, j), sign * s)?;
                        emit(row, cell(face - 1, j), -sign * s)?;

                        if n2 > 1 {
                            let (lo, hi, h) = p2_derivative_stencil(mg, j);
                            let s = sign * 0.5 * vp_f1[fidx] * d12[fidx] / (vol * h);
                            for c in [face - 1, face] {
                                emit(row, cell(c, hi), s)?;
                                emit(row, cell(c, lo), -s)?;
                            }
                        }
                    }
                }
            }
        }

        if n2 > 1 {
            let d22 = coeffs.d22.at(ir);
            let d21 = coeffs.d21.at(ir);
            let vp_f2 = grid.vp_f2(ir);
            for j in 0..n2 {
                for i in 0..n1 {
                    let row = cell(i, j);
                    let vol = vp[j * n1 + i] * mg.dp2(j);
                    for (face, sign) in [(j, -1.0), (j + 1, 1.0)] {
                        if face == 0 || face == n2 {
                            continue;
                        }
                        let fidx = face * n1 + i;
                        let s = vp_f2[fidx] * d22[fidx] / (vol * mg.dp2_f(face));
                        emit(row, cell(i, face), sign * s)?;
                        emit(row, cell(i, face - 1), -sign * s)?;

                        if n1 > 1 {
                            let (lo, hi, h) = p1_derivative_stencil(mg, i);
                            let s = sign * 0.5 * vp_f2[fidx] * d21[fidx] / (vol * h);
                            for r in [face - 1, face] {
                                emit(row, cell(hi, r), s)?;
                                emit(row, cell(lo, r), -s)?;
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Finite-volume discretization of `+div(D grad x)` with radial, direct
/// momentum and mixed momentum diffusion.
pub struct DiffusionTerm {
    grid: Arc<Grid>,
    coefficients: CoefficientStorage<DiffusionCoefficients>,
    model: Option<Box<dyn DiffusionModel>>,
    partials: Option<DiffusionCoefficients>,
}

impl DiffusionTerm {
    pub fn new(grid: Arc<Grid>) -> Self {
        Self {
            coefficients: CoefficientStorage::owned(&grid),
            grid,
            model: None,
            partials: None,
        }
    }

    pub fn with_model(grid: Arc<Grid>, model: impl DiffusionModel + 'static) -> Self {
        let mut term = Self::new(grid);
        term.model = Some(Box::new(model));
        term
    }

    pub fn with_shared(grid: Arc<Grid>, coefficients: SharedCoefficients<DiffusionCoefficients>) -> Result<Self> {
        Ok(Self {
            coefficients: CoefficientStorage::borrowed(coefficients, &grid, "diffusion coefficients")?,
            grid,
            model: None,
            partials: None,
        })
    }

    pub fn set_model(&mut self, model: impl DiffusionModel + 'static) {
        self.model = Some(Box::new(model));
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn is_shared(&self) -> bool {
        self.coefficients.is_shared()
    }

    pub fn coefficients(&self) -> Result<Ref<'_, DiffusionCoefficients>> {
        self.coefficients.read()
    }

    pub fn coefficients_mut(&self) -> Result<RefMut<'_, DiffusionCoefficients>> {
        if self.is_shared() {
            return Err(FvmError::config(
                "shared diffusion coefficients can only be modified by their owner",
            ));
        }
        self.coefficients.write()
    }

    pub(crate) fn share(&self) -> Result<SharedCoefficients<DiffusionCoefficients>> {
        self.coefficients.share()
    }

    pub(crate) fn reset_coefficients(&self) -> Result<()> {
        self.coefficients.reset()
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        self.model.as_ref().map(|m| m.dependencies()).unwrap_or_default()
    }

    pub(crate) fn set_dependency_jacobian(
        &mut self,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        x: &[f64],
        unknowns: &UnknownQuantityHandler,
    ) -> Result<()> {
        let Some(model) = self.model.as_mut() else {
            return Ok(());
        };
        let deps: Vec<Dependency> = model
            .dependencies()
            .into_iter()
            .filter(|d| d.unknown_id == deriv_id)
            .collect();
        if deps.is_empty() {
            return Ok(());
        }
        let grid = &self.grid;
        if x.len() < grid.ncells() {
            return Err(FvmError::config("diffusion Jacobian: state vector too short"));
        }
        let partials = self
            .partials
            .get_or_insert_with(|| DiffusionCoefficients::allocate(grid));
        let nr = grid.nr();

        for dep in deps {
            check_dependency(grid, &dep, unknowns)?;
            for n in 0..dep.n_multiples {
                partials.reset();
                model.set_partial_coefficients(deriv_id, n, unknowns, grid, partials)?;
                for k in 0..nr {
                    let col = n * nr + k;
                    diffusion_stencil(grid, partials, Some(k), |row, c, w| {
                        jac.set_element(row, col, w * x[c])
                    })?;
                }
            }
        }
        Ok(())
    }

    pub fn nnz_per_row_for(grid: &Grid) -> usize {
        let radial = 2 * usize::from(grid.nr() > 1);
        let (n1, n2) = (grid.n1(0), grid.n2(0));
        let momentum = match (n1 > 1, n2 > 1) {
            (true, true) => 9,
            (true, false) | (false, true) => 3,
            (false, false) => 1,
        };
        radial + momentum
    }
}

impl EquationTerm for DiffusionTerm {
    fn rebuild(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()> {
        let Some(model) = self.model.as_mut() else {
            return Ok(());
        };
        if !self.coefficients.is_shared() {
            self.coefficients.reset()?;
        }
        let mut coeffs = self.coefficients.write()?;
        model.rebuild(t, dt, unknowns, &self.grid, &mut coeffs)
    }

    fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<bool> {
        self.grid = Arc::clone(grid);
        self.partials = None;
        self.coefficients.grid_rebuilt(grid, "diffusion coefficients")
    }

    fn nnz_per_row(&self) -> usize {
        Self::nnz_per_row_for(&self.grid)
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, _rhs: &mut [f64]) -> Result<()> {
        let coeffs = self.coefficients.read()?;
        diffusion_stencil(&self.grid, &coeffs, None, |row, col, w| mat.set_element(row, col, w))
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        check_state_length(&self.grid, x, vec)?;
        let coeffs = self.coefficients.read()?;
        diffusion_stencil(&self.grid, &coeffs, None, |row, col, w| {
            vec[row] += w * x[col];
            Ok(())
        })
    }

    fn set_jacobian_block(
        &mut self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        x: &[f64],
        unknowns: &UnknownQuantityHandler,
    ) -> Result<()> {
        if uqty_id == deriv_id && !self.is_shared() {
            self.set_matrix_elements(jac, &mut [])?;
        }
        self.set_dependency_jacobian(deriv_id, jac, x, unknowns)
    }
}
