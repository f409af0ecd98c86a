use std::cell::Ref;
use std::sync::Arc;

use crate::discretization::{FaceArray, FaceGrid, Grid};
use crate::error::{FvmError, Result};
use crate::numerics::block_matrix::BlockView;
use crate::physics::interpolation::{InterpolationCoefficients, InterpolationScheme};
use crate::physics::storage::{CoefficientSet, CoefficientStorage, SharedCoefficients};
use crate::physics::{Dependency, EquationTerm};
use crate::unknowns::UnknownQuantityHandler;

/// Flux coefficients `F` of an advection term on the three face grids.
#[derive(Clone, Debug, PartialEq)]
pub struct AdvectionCoefficients {
    pub fr: FaceArray,
    pub f1: FaceArray,
    pub f2: FaceArray,
}

impl CoefficientSet for AdvectionCoefficients {
    fn allocate(grid: &Grid) -> Self {
        Self {
            fr: FaceArray::new(grid, FaceGrid::Radial),
            f1: FaceArray::new(grid, FaceGrid::P1),
            f2: FaceArray::new(grid, FaceGrid::P2),
        }
    }

    fn reset(&mut self) {
        self.fr.reset();
        self.f1.reset();
        self.f2.reset();
    }

    fn matches(&self, grid: &Grid) -> bool {
        self.fr.matches(grid) && self.f1.matches(grid) && self.f2.matches(grid)
    }

    fn reshape(&mut self, grid: &Grid) -> bool {
        self.fr.reshape(grid) | self.f1.reshape(grid) | self.f2.reshape(grid)
    }
}

/// Physics plug-in providing the coefficients of an [`AdvectionTerm`].
pub trait AdvectionModel {
    /// Adds the coefficients at time `t` to `coeffs`. The buffer has been
    /// zeroed by its owner and may already hold other models' contributions.
    fn rebuild(
        &mut self,
        t: f64,
        dt: f64,
        unknowns: &UnknownQuantityHandler,
        grid: &Grid,
        coeffs: &mut AdvectionCoefficients,
    ) -> Result<()>;

    /// Unknowns the coefficients depend on.
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Writes the derivative of every coefficient with respect to multiple
    /// `n` of unknown `deriv_id` into the zeroed buffer `dcoeffs`.
    ///
    /// Coefficients on the momentum faces of radius `ir` and on radial face
    /// `ir` are differentiated with respect to the dependency's value at
    /// radius `ir` (the outermost radial face belongs to the last radius).
    fn set_partial_coefficients(
        &mut self,
        deriv_id: usize,
        _n: usize,
        _unknowns: &UnknownQuantityHandler,
        _grid: &Grid,
        _dcoeffs: &mut AdvectionCoefficients,
    ) -> Result<()> {
        Err(FvmError::NotImplemented(format!(
            "advection coefficient derivative with respect to unknown {deriv_id}"
        )))
    }
}

/// Closure form of an [`AdvectionModel`] without dependencies.
pub type AdvectionFn =
    Box<dyn FnMut(f64, &UnknownQuantityHandler, &Grid, &mut AdvectionCoefficients) -> Result<()>>;

impl AdvectionModel for AdvectionFn {
    fn rebuild(
        &mut self,
        t: f64,
        _dt: f64,
        unknowns: &UnknownQuantityHandler,
        grid: &Grid,
        coeffs: &mut AdvectionCoefficients,
    ) -> Result<()> {
        self(t, unknowns, grid, coeffs)
    }
}

/// Visits every `(row, column, weight)` entry of the advection stencil.
///
/// With `owner = Some(k)` only faces whose coefficients belong to radius `k`
/// are visited; boundary faces are never visited.
pub(crate) fn advection_stencil<E>(
    grid: &Grid,
    coeffs: &AdvectionCoefficients,
    delta: &InterpolationCoefficients,
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
        let dr = grid.radial().dr(ir);

        if nr > 1 {
            for idx in 0..n1 * n2 {
                let row = offset + idx;
                let vol = vp[idx] * dr;
                if ir > 0 && owns(ir) {
                    let s = -grid.vp_fr(ir)[idx] * coeffs.fr.at(ir)[idx] / vol;
                    let d = delta.deltar.at(ir)[idx];
                    emit(row, grid.cell_offset(ir - 1) + idx, (1.0 - d) * s)?;
                    emit(row, row, d * s)?;
                }
                if ir + 1 < nr && owns(ir + 1) {
                    let s = grid.vp_fr(ir + 1)[idx] * coeffs.fr.at(ir + 1)[idx] / vol;
                    let d = delta.deltar.at(ir + 1)[idx];
                    emit(row, row, (1.0 - d) * s)?;
                    emit(row, grid.cell_offset(ir + 1) + idx, d * s)?;
                }
            }
        }

        if !owns(ir) {
            continue;
        }

        if n1 > 1 {
            let f1 = coeffs.f1.at(ir);
            let d1 = delta.delta1.at(ir);
            let vp_f1 = grid.vp_f1(ir);
            for j in 0..n2 {
                for i in 0..n1 {
                    let row = offset + j * n1 + i;
                    let vol = vp[j * n1 + i] * mg.dp1(i);
                    if i > 0 {
                        let fidx = j * (n1 + 1) + i;
                        let s = -vp_f1[fidx] * f1[fidx] / vol;
                        emit(row, row - 1, (1.0 - d1[fidx]) * s)?;
                        emit(row, row, d1[fidx] * s)?;
                    }
                    if i + 1 < n1 {
                        let fidx = j * (n1 + 1) + i + 1;
                        let s = vp_f1[fidx] * f1[fidx] / vol;
                        emit(row, row, (1.0 - d1[fidx]) * s)?;
                        emit(row, row + 1, d1[fidx] * s)?;
                    }
                }
            }
        }

        if n2 > 1 {
            let f2 = coeffs.f2.at(ir);
            let d2 = delta.delta2.at(ir);
            let vp_f2 = grid.vp_f2(ir);
            for j in 0..n2 {
                for i in 0..n1 {
                    let row = offset + j * n1 + i;
                    let vol = vp[j * n1 + i] * mg.dp2(j);
                    if j > 0 {
                        let fidx = j * n1 + i;
                        let s = -vp_f2[fidx] * f2[fidx] / vol;
                        emit(row, row - n1, (1.0 - d2[fidx]) * s)?;
                        emit(row, row, d2[fidx] * s)?;
                    }
                    if j + 1 < n2 {
                        let fidx = (j + 1) * n1 + i;
                        let s = vp_f2[fidx] * f2[fidx] / vol;
                        emit(row, row, (1.0 - d2[fidx]) * s)?;
                        emit(row, row + n1, d2[fidx] * s)?;
                    }
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn check_state_length(grid: &Grid, x: &[f64], vec: &[f64]) -> Result<()> {
    let n = grid.ncells();
    if x.len() < n || vec.len() < n {
        return Err(FvmError::config(format!(
            "state/result vectors of length {}/{} applied to grid with {} cells",
            x.len(),
            vec.len(),
            n
        )));
    }
    Ok(())
}

/// Checks that a dependency's buffer holds `n_multiples` fluid (per-radius) values.
pub(crate) fn check_dependency(
    grid: &Grid,
    dep: &Dependency,
    unknowns: &UnknownQuantityHandler,
) -> Result<()> {
    let size = unknowns.size(dep.unknown_id)?;
    if size != dep.n_multiples * grid.nr() {
        return Err(FvmError::config(format!(
            "dependency on unknown {} expects {} x {} radial values, found {}",
            dep.unknown_id,
            dep.n_multiples,
            grid.nr(),
            size
        )));
    }
    Ok(())
}

/// Finite-volume discretization of `+div(F x)` over the radial and both
/// momentum directions.
///
/// For cell `i` in one direction the term evaluates to
/// `(Phi_{i+1/2} - Phi_{i-1/2}) / (V'_i Δ_i)` with the face flux
/// `Phi = V'_face F ((1-δ) x_lower + δ x_upper)`.
pub struct AdvectionTerm {
    grid: Arc<Grid>,
    coefficients: CoefficientStorage<AdvectionCoefficients>,
    interpolation: CoefficientStorage<InterpolationCoefficients>,
    scheme: InterpolationScheme,
    model: Option<Box<dyn AdvectionModel>>,
    partials: Option<AdvectionCoefficients>,
}

impl AdvectionTerm {
    /// Term with owned, zero coefficients and no model; coefficients are
    /// then set through [`AdvectionTerm::coefficients_mut`].
    pub fn new(grid: Arc<Grid>) -> Self {
        Self {
            coefficients: CoefficientStorage::owned(&grid),
            interpolation: CoefficientStorage::owned(&grid),
            grid,
            scheme: InterpolationScheme::default(),
            model: None,
            partials: None,
        }
    }

    pub fn with_model(grid: Arc<Grid>, model: impl AdvectionModel + 'static) -> Self {
        let mut term = Self::new(grid);
        term.model = Some(Box::new(model));
        term
    }

    /// Term writing into coefficient and interpolation buffers owned by
    /// another component. Fails if the buffers do not match `grid`.
    pub fn with_shared(
        grid: Arc<Grid>,
        coefficients: SharedCoefficients<AdvectionCoefficients>,
        interpolation: SharedCoefficients<InterpolationCoefficients>,
    ) -> Result<Self> {
        Ok(Self {
            coefficients: CoefficientStorage::borrowed(coefficients, &grid, "advection coefficients")?,
            interpolation: CoefficientStorage::borrowed(interpolation, &grid, "interpolation coefficients")?,
            grid,
            scheme: InterpolationScheme::Custom,
            model: None,
            partials: None,
        })
    }

    pub fn set_model(&mut self, model: impl AdvectionModel + 'static) {
        self.model = Some(Box::new(model));
    }

    pub fn with_scheme(mut self, scheme: InterpolationScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn set_scheme(&mut self, scheme: InterpolationScheme) {
        self.scheme = scheme;
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn is_shared(&self) -> bool {
        self.coefficients.is_shared()
    }

    pub fn coefficients(&self) -> Result<Ref<'_, AdvectionCoefficients>> {
        self.coefficients.read()
    }

    /// Mutable access for the owner of the coefficients.
    pub fn coefficients_mut(&self) -> Result<std::cell::RefMut<'_, AdvectionCoefficients>> {
        if self.is_shared() {
            return Err(FvmError::config(
                "shared advection coefficients can only be modified by their owner",
            ));
        }
        self.coefficients.write()
    }

    pub fn interpolation(&self) -> Result<Ref<'_, InterpolationCoefficients>> {
        self.interpolation.read()
    }

    /// Mutable δ access; only meaningful together with [`InterpolationScheme::Custom`].
    pub fn interpolation_mut(&self) -> Result<std::cell::RefMut<'_, InterpolationCoefficients>> {
        if self.interpolation.is_shared() {
            return Err(FvmError::config(
                "shared interpolation coefficients can only be modified by their owner",
            ));
        }
        self.interpolation.write()
    }

    pub(crate) fn share(
        &self,
    ) -> Result<(
        SharedCoefficients<AdvectionCoefficients>,
        SharedCoefficients<InterpolationCoefficients>,
    )> {
        Ok((self.coefficients.share()?, self.interpolation.share()?))
    }

    pub(crate) fn reset_coefficients(&self) -> Result<()> {
        self.coefficients.reset()
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        self.model.as_ref().map(|m| m.dependencies()).unwrap_or_default()
    }

    /// Recomputes δ from the current coefficients (owner only).
    pub(crate) fn update_interpolation(&self, unknowns: &UnknownQuantityHandler) -> Result<()> {
        if self.interpolation.is_shared() {
            return Ok(());
        }
        let x = match self.scheme {
            InterpolationScheme::Limited { unknown_id, .. } => Some(unknowns.get_unknown_data(unknown_id)?),
            _ => None,
        };
        let coeffs = self.coefficients.read()?;
        self.interpolation
            .write()?
            .update(&self.scheme, &self.grid, &coeffs, x)
    }

    /// Adds the Jacobian columns coming from the dependence of the
    /// coefficients on `deriv_id`, one column per multiple and radius.
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
            return Err(FvmError::config("advection Jacobian: state vector too short"));
        }
        let partials = self
            .partials
            .get_or_insert_with(|| AdvectionCoefficients::allocate(grid));
        let delta = self.interpolation.read()?;
        let nr = grid.nr();

        for dep in deps {
            check_dependency(grid, &dep, unknowns)?;
            for n in 0..dep.n_multiples {
                partials.reset();
                model.set_partial_coefficients(deriv_id, n, unknowns, grid, partials)?;
                for k in 0..nr {
                    let col = n * nr + k;
                    advection_stencil(grid, partials, &delta, Some(k), |row, c, w| {
                        jac.set_element(row, col, w * x[c])
                    })?;
                }
            }
        }
        Ok(())
    }

    pub fn nnz_per_row_for(grid: &Grid) -> usize {
        let radial = usize::from(grid.nr() > 1);
        let p1 = usize::from(grid.n1(0) > 1);
        let p2 = usize::from(grid.n2(0) > 1);
        1 + 2 * (radial + p1 + p2)
    }
}

impl EquationTerm for AdvectionTerm {
    fn rebuild(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()> {
        let Some(model) = self.model.as_mut() else {
            return self.update_interpolation(unknowns);
        };
        if !self.coefficients.is_shared() {
            self.coefficients.reset()?;
        }
        {
            let mut coeffs = self.coefficients.write()?;
            model.rebuild(t, dt, unknowns, &self.grid, &mut coeffs)?;
        }
        self.update_interpolation(unknowns)
    }

    fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<bool> {
        self.grid = Arc::clone(grid);
        let changed = self.coefficients.grid_rebuilt(grid, "advection coefficients")?;
        let changed = self.interpolation.grid_rebuilt(grid, "interpolation coefficients")? || changed;
        self.partials = None;
        Ok(changed)
    }

    fn nnz_per_row(&self) -> usize {
        Self::nnz_per_row_for(&self.grid)
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, _rhs: &mut [f64]) -> Result<()> {
        let coeffs = self.coefficients.read()?;
        let delta = self.interpolation.read()?;
        advection_stencil(&self.grid, &coeffs, &delta, None, |row, col, w| {
            mat.set_element(row, col, w)
        })
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        check_state_length(&self.grid, x, vec)?;
        let coeffs = self.coefficients.read()?;
        let delta = self.interpolation.read()?;
        advection_stencil(&self.grid, &coeffs, &delta, None, |row, col, w| {
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
        // Shared coefficients are assembled by their owner.
        if uqty_id == deriv_id && !self.is_shared() {
            self.set_matrix_elements(jac, &mut [])?;
        }
        self.set_dependency_jacobian(deriv_id, jac, x, unknowns)
    }
}
