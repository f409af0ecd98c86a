use std::collections::HashMap;
use std::time::Instant;

use nalgebra::DVector;

use crate::error::{FvmError, Result};
use crate::numerics::Convergence;
use crate::numerics::block_matrix::BlockMatrix;
use crate::numerics::linear::{SparseLu, LinearSolver};
use crate::numerics::preconditioner::{DiagonalPreconditioner, PreconditionerSettings};
use crate::numerics::rebuild::{RebuildStage, rebuild_order};
use crate::numerics::timing::{Timer, TimingStats};
use crate::physics::equation::UnknownQuantityEquation;
use crate::system::EquationSystem;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverType {
    /// One linear solve per step with the terms evaluated at the start of the step.
    #[default]
    LinearlyImplicit,
    /// Newton iteration on the fully implicit residual.
    NonLinear,
}

#[derive(Clone, Debug)]
pub struct SolverSettings {
    pub kind: SolverType,
    pub max_iterations: usize,
    pub convergence: Convergence,
    pub preconditioner: PreconditionerSettings,
    /// Logs every Newton iteration at info level instead of debug.
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            kind: SolverType::LinearlyImplicit,
            max_iterations: 100,
            convergence: Convergence::default(),
            preconditioner: PreconditionerSettings::default(),
            verbose: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SolverResult {
    pub iterations: usize,
    pub converged: bool,
    /// Norm of the full residual per iteration (empty for linear solves).
    pub residual_norms: Vec<f64>,
    /// Norm of the full update per iteration.
    pub update_norms: Vec<f64>,
}

/// Placement of a non-trivial unknown in the global system.
#[derive(Clone, Copy, Debug)]
struct Block {
    unknown_id: usize,
    index: usize,
    offset: usize,
    size: usize,
}

pub struct Solver {
    settings: SolverSettings,
    blocks: Vec<Block>,
    block_of: HashMap<usize, usize>,
    size: usize,
    matrix: BlockMatrix,
    vector: Vec<f64>,
    linear_solver: Box<dyn LinearSolver>,
    preconditioner: Option<DiagonalPreconditioner>,
    rebuild_order: Vec<RebuildStage>,
    timers: TimingStats,
}

impl Solver {
    pub fn new(settings: SolverSettings) -> Result<Self> {
        if settings.kind == SolverType::NonLinear && settings.max_iterations == 0 {
            return Err(FvmError::config("Newton solver needs at least one iteration"));
        }
        Ok(Self {
            settings,
            blocks: Vec::new(),
            block_of: HashMap::new(),
            size: 0,
            matrix: BlockMatrix::new(),
            vector: Vec::new(),
            linear_solver: Box::new(SparseLu),
            preconditioner: None,
            rebuild_order: rebuild_order()?,
            timers: TimingStats::new(),
        })
    }

    pub fn with_linear_solver(mut self, solver: impl LinearSolver + 'static) -> Self {
        self.linear_solver = Box::new(solver);
        self
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn timers(&self) -> &TimingStats {
        &self.timers
    }

    pub fn reset_timers(&mut self) {
        self.timers.reset();
    }

    /// Size of the global system.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn nontrivial_unknowns(&self) -> Vec<usize> {
        self.blocks.iter().map(|b| b.unknown_id).collect()
    }

    /// Global offset of a non-trivial unknown.
    pub fn offset_of(&self, unknown_id: usize) -> Option<usize> {
        self.block_of.get(&unknown_id).map(|&b| self.blocks[b].offset)
    }

    /// The most recently assembled matrix or Jacobian, without the
    /// preconditioner's scaling.
    pub fn matrix(&self) -> &BlockMatrix {
        &self.matrix
    }

    /// Lays out the global system: one sub-equation per entry of
    /// `nontrivial`, in the given order.
    pub fn initialize(&mut self, system: &EquationSystem, nontrivial: &[usize]) -> Result<()> {
        let mut matrix = BlockMatrix::new();
        let mut blocks = Vec::with_capacity(nontrivial.len());
        let mut block_of = HashMap::new();
        let mut offset = 0;
        for &id in nontrivial {
            let equation = system.equation(id).ok_or_else(|| {
                FvmError::config(format!("unknown {id} has no equation"))
            })?;
            if block_of.contains_key(&id) {
                return Err(FvmError::config(format!("unknown {id} listed twice")));
            }
            let size = system.unknowns().size(id)?;
            let index = matrix.create_sub_equation(size, equation.nnz_per_row_jacobian())?;
            block_of.insert(id, index);
            blocks.push(Block { unknown_id: id, index, offset, size });
            offset += size;
        }
        matrix.construct_system()?;

        let layout: Vec<(usize, usize, usize)> =
            blocks.iter().map(|b| (b.unknown_id, b.offset, b.size)).collect();
        self.preconditioner = Some(DiagonalPreconditioner::new(
            self.settings.preconditioner.clone(),
            &layout,
        )?);
        self.matrix = matrix;
        self.vector = vec![0.0; offset];
        self.blocks = blocks;
        self.block_of = block_of;
        self.size = offset;

        log::info!(
            "solver initialized: {} non-trivial unknowns, {} rows, {:?}",
            self.blocks.len(),
            self.size,
            self.settings.kind
        );
        for b in &self.blocks {
            log::debug!(
                "  {:<20} rows {:>6}..{:<6}",
                system.unknowns().name(b.unknown_id)?,
                b.offset,
                b.offset + b.size
            );
        }
        Ok(())
    }

    /// `initialize` with the system's own non-trivial unknowns.
    pub fn initialize_from_system(&mut self, system: &EquationSystem) -> Result<()> {
        system.check_consistency()?;
        let nontrivial = system.nontrivial_unknowns();
        self.initialize(system, &nontrivial)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.matrix.is_constructed() {
            Ok(())
        } else {
            Err(FvmError::NotConstructed)
        }
    }

    /// Rebuilds handlers, predetermined unknowns and terms for time `t`,
    /// stage by stage in dependency order.
    pub fn rebuild_terms(&mut self, system: &mut EquationSystem, t: f64, dt: f64) -> Result<()> {
        let EquationSystem { unknowns, equations, handlers, .. } = &mut *system;
        for &stage in &self.rebuild_order {
            let start = Instant::now();
            for handler in handlers.iter_mut().filter(|h| h.stage() == stage) {
                log::trace!("rebuild {stage}: {}", handler.name());
                handler.rebuild(t, dt, unknowns)?;
            }
            match stage {
                RebuildStage::Predetermined => {
                    for (&id, eq) in equations.iter_mut().filter(|(_, eq)| eq.is_predetermined()) {
                        eq.rebuild_terms(t, dt, unknowns)?;
                        let values = eq.predetermined_values().ok_or_else(|| {
                            FvmError::config(format!("predetermined unknown {id} has no values"))
                        })?;
                        if values.len() != unknowns.size(id)? {
                            return Err(FvmError::config(format!(
                                "prescribed value of '{}' has {} elements, expected {}",
                                unknowns.name(id)?,
                                values.len(),
                                unknowns.size(id)?
                            )));
                        }
                        unknowns.store(id, values, 0, true)?;
                    }
                }
                RebuildStage::Terms => {
                    for b in &self.blocks {
                        if let Some(eq) = equations.get_mut(&b.unknown_id) {
                            eq.rebuild_terms(t, dt, unknowns)?;
                        }
                    }
                }
                _ => {}
            }
            self.timers.stop(Timer::Rebuild(stage), start);
        }
        Ok(())
    }

    /// Assembles `mat x = -rhs` for the current term coefficients.
    /// Trivial columns contribute to `rhs` with their current values.
    pub fn build_matrix(&self, system: &EquationSystem, mat: &mut BlockMatrix, rhs: &mut [f64]) -> Result<()> {
        self.check_length(rhs)?;
        mat.zero()?;
        rhs.fill(0.0);
        let unknowns = system.unknowns();
        for b in &self.blocks {
            let eq = self.equation(system, b.unknown_id)?;
            let rhs_b = &mut rhs[b.offset..b.offset + b.size];
            for (col, op) in eq.operators() {
                match self.block_of.get(&col) {
                    Some(&cb) => {
                        let mut view = mat.select_sub_equation(b.index, cb)?;
                        op.set_matrix_elements(&mut view, rhs_b)?;
                    }
                    None => op.set_vector_elements(rhs_b, unknowns.get_unknown_data(col)?)?,
                }
            }
        }

        if self.has_overriding_bcs(system) {
            mat.partial_assemble()?;
            self.clear_overridden_rows(system, Some(&mut *mat), rhs)?;
            for b in &self.blocks {
                let eq = self.equation(system, b.unknown_id)?;
                let rhs_b = &mut rhs[b.offset..b.offset + b.size];
                for (col, op) in eq.operators().filter(|(_, op)| op.has_overriding_bc()) {
                    match self.block_of.get(&col) {
                        Some(&cb) => {
                            let mut view = mat.select_sub_equation(b.index, cb)?;
                            op.set_matrix_elements_bc(&mut view, rhs_b)?;
                        }
                        None => op.set_vector_elements_bc(rhs_b, unknowns.get_unknown_data(col)?)?,
                    }
                }
            }
        }
        mat.assemble()
    }

    /// Evaluates the residual `F(x)` at the unknowns' current values.
    pub fn build_vector(&self, system: &EquationSystem, vec: &mut [f64]) -> Result<()> {
        self.check_length(vec)?;
        vec.fill(0.0);
        let unknowns = system.unknowns();
        for b in &self.blocks {
            let eq = self.equation(system, b.unknown_id)?;
            let vec_b = &mut vec[b.offset..b.offset + b.size];
            for (col, op) in eq.operators() {
                op.set_vector_elements(vec_b, unknowns.get_unknown_data(col)?)?;
            }
        }

        if self.has_overriding_bcs(system) {
            self.clear_overridden_rows(system, None, vec)?;
            for b in &self.blocks {
                let eq = self.equation(system, b.unknown_id)?;
                let vec_b = &mut vec[b.offset..b.offset + b.size];
                for (col, op) in eq.operators().filter(|(_, op)| op.has_overriding_bc()) {
                    op.set_vector_elements_bc(vec_b, unknowns.get_unknown_data(col)?)?;
                }
            }
        }
        Ok(())
    }

    /// Assembles `dF/dx` over all non-trivial unknowns.
    pub fn build_jacobian(&self, system: &mut EquationSystem, jac: &mut BlockMatrix) -> Result<()> {
        jac.zero()?;
        let overriding = self.has_overriding_bcs(system);
        let unknowns = &system.unknowns;
        let equations = &mut system.equations;
        for b in &self.blocks {
            let eq = equations
                .get_mut(&b.unknown_id)
                .ok_or_else(|| FvmError::config(format!("unknown {} has no equation", b.unknown_id)))?;
            for (col, op) in eq.operators_mut() {
                let x = unknowns.get_unknown_data(col)?;
                for d in &self.blocks {
                    let mut view = jac.select_sub_equation(b.index, d.index)?;
                    op.set_jacobian_block(col, d.unknown_id, &mut view, x, unknowns)?;
                }
            }
        }

        if overriding {
            jac.partial_assemble()?;
            let mut scratch = vec![0.0; self.size];
            self.clear_overridden_rows(system, Some(&mut *jac), &mut scratch)?;
            for b in &self.blocks {
                let eq = self.equation(system, b.unknown_id)?;
                for (col, op) in eq.operators().filter(|(_, op)| op.has_overriding_bc()) {
                    let x = system.unknowns().get_unknown_data(col)?;
                    for d in &self.blocks {
                        let mut view = jac.select_sub_equation(b.index, d.index)?;
                        op.set_jacobian_block_bc(col, d.unknown_id, &mut view, x)?;
                    }
                }
            }
        }
        jac.assemble()
    }

    /// L2 norm of each non-trivial unknown's slice of `vec`.
    pub fn calculate_nontrivial_2norm(&self, vec: &[f64]) -> Result<Vec<f64>> {
        self.check_length(vec)?;
        Ok(self
            .blocks
            .iter()
            .map(|b| {
                vec[b.offset..b.offset + b.size]
                    .iter()
                    .map(|v| v * v)
                    .sum::<f64>()
                    .sqrt()
            })
            .collect())
    }

    pub fn precondition(&mut self, mat: &mut BlockMatrix, rhs: &mut [f64]) -> Result<()> {
        match self.preconditioner.as_mut() {
            Some(pc) if pc.is_enabled() => {
                let start = Instant::now();
                pc.precondition(mat, rhs)?;
                self.timers.stop(Timer::Precondition, start);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn unprecondition(&self, x: &mut [f64]) {
        if let Some(pc) = &self.preconditioner {
            pc.unprecondition(x);
        }
    }

    fn restore_matrix(&self, mat: &mut BlockMatrix) -> Result<()> {
        match &self.preconditioner {
            Some(pc) => pc.restore(mat),
            None => Ok(()),
        }
    }

    /// Advances the non-trivial unknowns to time `t` (step length `dt`) and
    /// stores the solution in the unknown quantity handler.
    pub fn solve(&mut self, system: &mut EquationSystem, t: f64, dt: f64) -> Result<SolverResult> {
        self.ensure_initialized()?;
        let mut matrix = std::mem::take(&mut self.matrix);
        let mut vector = std::mem::take(&mut self.vector);
        let result = match self.settings.kind {
            SolverType::LinearlyImplicit => self.solve_linear(system, t, dt, &mut matrix, &mut vector),
            SolverType::NonLinear => self.solve_newton(system, t, dt, &mut matrix, &mut vector),
        };
        self.matrix = matrix;
        self.vector = vector;
        result
    }

    fn solve_linear(
        &mut self,
        system: &mut EquationSystem,
        t: f64,
        dt: f64,
        mat: &mut BlockMatrix,
        rhs: &mut [f64],
    ) -> Result<SolverResult> {
        self.rebuild_terms(system, t, dt)?;

        let start = Instant::now();
        self.build_matrix(system, mat, rhs)?;
        self.timers.stop(Timer::Matrix, start);

        let mut b: Vec<f64> = rhs.iter().map(|v| -v).collect();
        self.precondition(mat, &mut b)?;
        let solved = self.linear_solve(mat, b);
        self.restore_matrix(mat)?;
        let mut x = solved?;
        self.unprecondition(&mut x);
        check_finite(&x, "linear solve")?;

        for blk in &self.blocks {
            system.unknowns_mut().store(blk.unknown_id, &x, blk.offset, false)?;
        }
        let norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
        log::debug!("t = {t:.6e}: linear solve of {} rows, |x| = {norm:.3e}", self.size);
        Ok(SolverResult {
            iterations: 1,
            converged: true,
            residual_norms: Vec::new(),
            update_norms: vec![norm],
        })
    }

    fn solve_newton(
        &mut self,
        system: &mut EquationSystem,
        t: f64,
        dt: f64,
        jac: &mut BlockMatrix,
        residual: &mut [f64],
    ) -> Result<SolverResult> {
        let mut x = vec![0.0; self.size];
        for b in &self.blocks {
            x[b.offset..b.offset + b.size].copy_from_slice(system.unknowns().get_unknown_data(b.unknown_id)?);
        }

        let mut result = SolverResult::default();
        let mut initial_norms: Option<Vec<f64>> = None;
        let mut previous_residual: Option<f64> = None;
        let max_iter = self.settings.max_iterations;
        log_header(self.size, t, self.settings.verbose);

        for iter in 1..=max_iter {
            self.rebuild_terms(system, t, dt)?;

            let start = Instant::now();
            self.build_vector(system, residual)?;
            self.timers.stop(Timer::Vector, start);
            check_finite(residual, "residual")?;

            let start = Instant::now();
            self.build_jacobian(system, jac)?;
            self.timers.stop(Timer::Jacobian, start);

            let res_norms = self.calculate_nontrivial_2norm(residual)?;
            let initial = initial_norms.get_or_insert_with(|| res_norms.clone());

            let mut b: Vec<f64> = residual.iter().map(|v| -v).collect();
            self.precondition(jac, &mut b)?;
            let solved = self.linear_solve(jac, b);
            self.restore_matrix(jac)?;
            let mut dx = solved?;
            self.unprecondition(&mut dx);
            check_finite(&dx, "Newton update")?;

            for (xi, di) in x.iter_mut().zip(&dx) {
                *xi += di;
            }
            for blk in &self.blocks {
                system.unknowns_mut().store(blk.unknown_id, &x, blk.offset, false)?;
            }

            let converged = self.blocks.iter().zip(initial.iter()).all(|(blk, &init)| {
                let r = blk.offset..blk.offset + blk.size;
                self.settings.convergence.check_convergence(
                    &residual[r.clone()],
                    &dx[r.clone()],
                    &x[r],
                    init,
                )
            });

            let res_norm = res_norms.iter().map(|v| v * v).sum::<f64>().sqrt();
            let init_norm = initial.iter().map(|v| v * v).sum::<f64>().sqrt();
            let dx_norm = dx.iter().map(|v| v * v).sum::<f64>().sqrt();
            let step_percent = previous_residual.map_or(0.0, |prev| {
                if prev > 0.0 { (prev - res_norm) / prev * 100.0 } else { 0.0 }
            });
            previous_residual = Some(res_norm);
            log_iteration(iter, max_iter, res_norm, dx_norm, step_percent, init_norm, self.settings.verbose);

            result.iterations = iter;
            result.residual_norms.push(res_norm);
            result.update_norms.push(dx_norm);
            if converged {
                result.converged = true;
                return Ok(result);
            }
        }

        Err(FvmError::numeric(format!(
            "Newton iteration did not converge in {max_iter} iterations at t = {t:.6e}"
        )))
    }

    fn linear_solve(&mut self, mat: &BlockMatrix, b: Vec<f64>) -> Result<Vec<f64>> {
        let start = Instant::now();
        let x = self.linear_solver.solve(mat.csr()?, &DVector::from_vec(b))?;
        self.timers.stop(Timer::LinearSolve, start);
        Ok(x.as_slice().to_vec())
    }

    fn equation<'a>(
        &self,
        system: &'a EquationSystem,
        id: usize,
    ) -> Result<&'a UnknownQuantityEquation> {
        system
            .equation(id)
            .ok_or_else(|| FvmError::config(format!("unknown {id} has no equation")))
    }

    fn has_overriding_bcs(&self, system: &EquationSystem) -> bool {
        self.blocks.iter().any(|b| {
            system
                .equation(b.unknown_id)
                .is_some_and(|eq| eq.operators().any(|(_, op)| op.has_overriding_bc()))
        })
    }

    /// Zeroes every row owned by an overriding boundary condition across the
    /// full width of the matrix, together with its vector entry.
    fn clear_overridden_rows(
        &self,
        system: &EquationSystem,
        mut mat: Option<&mut BlockMatrix>,
        vec: &mut [f64],
    ) -> Result<()> {
        for b in &self.blocks {
            for row in self.equation(system, b.unknown_id)?.overridden_rows() {
                if row >= b.size {
                    return Err(FvmError::config(format!(
                        "boundary condition row {row} outside unknown {} of size {}",
                        b.unknown_id, b.size
                    )));
                }
                if let Some(m) = mat.as_deref_mut() {
                    m.zero_row(b.offset + row, 0..self.size)?;
                }
                vec[b.offset + row] = 0.0;
            }
        }
        Ok(())
    }

    fn check_length(&self, vec: &[f64]) -> Result<()> {
        if vec.len() != self.size {
            return Err(FvmError::config(format!(
                "vector of length {} for system of size {}",
                vec.len(),
                self.size
            )));
        }
        Ok(())
    }
}

fn check_finite(values: &[f64], what: &str) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(FvmError::numeric(format!("{what}: non-finite value at row {i}"))),
        None => Ok(()),
    }
}

fn log_header(size: usize, t: f64, verbose: bool) {
    let level = if verbose { log::Level::Info } else { log::Level::Debug };
    log::log!(level, "Newton solve at t = {t:.6e}, {size} unknowns");
    log::log!(level, "    Iter   | Residual |  Update   |  Step % |  Initial");
}

fn log_iteration(
    iter: usize,
    max_iter: usize,
    res_norm: f64,
    dx_norm: f64,
    step_percent: f64,
    init: f64,
    verbose: bool,
) {
    let level = if verbose { log::Level::Info } else { log::Level::Debug };
    log::log!(
        level,
        "{iter:>4}/{max_iter} | {res_norm:>8.3e} | {dx_norm:>9.3e} | {step_percent:>6.2}% | {init:>8.3e}"
    );
}
