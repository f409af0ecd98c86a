use std::sync::Arc;

use crate::discretization::Grid;
use crate::error::Result;
use crate::numerics::block_matrix::BlockView;
use crate::physics::advection::{AdvectionModel, AdvectionTerm};
use crate::physics::diffusion::{DiffusionModel, DiffusionTerm};
use crate::physics::interpolation::InterpolationScheme;
use crate::physics::{Dependency, EquationTerm, merge_dependencies};
use crate::unknowns::UnknownQuantityHandler;

/// Sum of several advection and diffusion contributions sharing one set of
/// coefficient buffers, so the stencil is assembled once.
///
/// The composite owns the buffers. Each model is wrapped in a sub-term that
/// borrows them and only accumulates into them during
/// [`EquationTerm::rebuild`], after the owner has reset them. The owner then
/// recomputes the interpolation weights from the summed coefficients.
pub struct AdvectionDiffusionTerm {
    advection: AdvectionTerm,
    diffusion: DiffusionTerm,
    advection_terms: Vec<AdvectionTerm>,
    diffusion_terms: Vec<DiffusionTerm>,
}

impl AdvectionDiffusionTerm {
    pub fn new(grid: Arc<Grid>) -> Self {
        Self {
            advection: AdvectionTerm::new(Arc::clone(&grid)),
            diffusion: DiffusionTerm::new(grid),
            advection_terms: Vec::new(),
            diffusion_terms: Vec::new(),
        }
    }

    pub fn with_scheme(mut self, scheme: InterpolationScheme) -> Self {
        self.advection.set_scheme(scheme);
        self
    }

    pub fn add_advection(&mut self, model: impl AdvectionModel + 'static) -> Result<()> {
        let (coeffs, delta) = self.advection.share()?;
        let mut term = AdvectionTerm::with_shared(Arc::clone(self.advection.grid()), coeffs, delta)?;
        term.set_model(model);
        self.advection_terms.push(term);
        Ok(())
    }

    pub fn add_diffusion(&mut self, model: impl DiffusionModel + 'static) -> Result<()> {
        let coeffs = self.diffusion.share()?;
        let mut term = DiffusionTerm::with_shared(Arc::clone(self.diffusion.grid()), coeffs)?;
        term.set_model(model);
        self.diffusion_terms.push(term);
        Ok(())
    }

    /// The owning advection term holding the summed coefficients.
    pub fn advection(&self) -> &AdvectionTerm {
        &self.advection
    }

    pub fn diffusion(&self) -> &DiffusionTerm {
        &self.diffusion
    }

    pub fn n_terms(&self) -> usize {
        self.advection_terms.len() + self.diffusion_terms.len()
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        merge_dependencies(
            self.advection_terms
                .iter()
                .flat_map(|t| t.dependencies())
                .chain(self.diffusion_terms.iter().flat_map(|t| t.dependencies()))
                .collect(),
        )
    }
}

impl EquationTerm for AdvectionDiffusionTerm {
    fn rebuild(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()> {
        self.advection.reset_coefficients()?;
        self.diffusion.reset_coefficients()?;
        for term in &mut self.advection_terms {
            term.rebuild(t, dt, unknowns)?;
        }
        for term in &mut self.diffusion_terms {
            term.rebuild(t, dt, unknowns)?;
        }
        // Without a model the owners only refresh their interpolation weights.
        self.advection.rebuild(t, dt, unknowns)?;
        self.diffusion.rebuild(t, dt, unknowns)
    }

    fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<bool> {
        // Owners reshape first; borrowers then verify the new shape.
        let mut changed = self.advection.grid_rebuilt(grid)?;
        changed |= self.diffusion.grid_rebuilt(grid)?;
        for term in &mut self.advection_terms {
            term.grid_rebuilt(grid)?;
        }
        for term in &mut self.diffusion_terms {
            term.grid_rebuilt(grid)?;
        }
        Ok(changed)
    }

    fn nnz_per_row(&self) -> usize {
        let adv = if self.advection_terms.is_empty() { 0 } else { self.advection.nnz_per_row() };
        let diff = if self.diffusion_terms.is_empty() { 0 } else { self.diffusion.nnz_per_row() };
        adv.max(diff).max(1)
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        self.advection.set_matrix_elements(mat, rhs)?;
        self.diffusion.set_matrix_elements(mat, rhs)
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        self.advection.set_vector_elements(vec, x)?;
        self.diffusion.set_vector_elements(vec, x)
    }

    fn set_jacobian_block(
        &mut self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        x: &[f64],
        unknowns: &UnknownQuantityHandler,
    ) -> Result<()> {
        // The owners hold no model: they contribute the self block only.
        self.advection.set_jacobian_block(uqty_id, deriv_id, jac, x, unknowns)?;
        self.diffusion.set_jacobian_block(uqty_id, deriv_id, jac, x, unknowns)?;
        for term in &mut self.advection_terms {
            term.set_dependency_jacobian(deriv_id, jac, x, unknowns)?;
        }
        for term in &mut self.diffusion_terms {
            term.set_dependency_jacobian(deriv_id, jac, x, unknowns)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::cartesian_grid;
    use crate::physics::advection::{AdvectionCoefficients, AdvectionFn};
    use crate::physics::diffusion::{DiffusionCoefficients, DiffusionFn};
    use crate::physics::operator::Operator;
    use crate::unknowns::FluxGridType;

    fn constant_advection(value: f64) -> AdvectionFn {
        Box::new(move |_, _, _, c: &mut AdvectionCoefficients| {
            for v in c.f1.as_mut_slice() {
                *v += value;
            }
            Ok(())
        })
    }

    #[test]
    fn sub_terms_accumulate_into_owner_buffers() {
        let grid = Arc::new(cartesian_grid(1, 4, 1).unwrap());
        let mut uqh = UnknownQuantityHandler::new();
        uqh.insert("f", "", &grid, 1, FluxGridType::Distribution).unwrap();

        let mut term = AdvectionDiffusionTerm::new(Arc::clone(&grid)).with_scheme(InterpolationScheme::Upwind);
        term.add_advection(constant_advection(1.0)).unwrap();
        term.add_advection(constant_advection(-3.0)).unwrap();
        let diffusion: DiffusionFn = Box::new(|_, _, _, c: &mut DiffusionCoefficients| {
            c.d11.fill(0.5);
            Ok(())
        });
        term.add_diffusion(diffusion).unwrap();
        assert_eq!(term.n_terms(), 3);

        // Rebuilding twice must not double the coefficients.
        for _ in 0..2 {
            term.rebuild(0.0, 1.0, &uqh).unwrap();
        }
        assert_eq!(term.advection().coefficients().unwrap().f1.at(0)[2], -2.0);
        // Net F < 0: the lower cell is upwind.
        assert_eq!(term.advection().interpolation().unwrap().delta1.at(0)[2], 0.0);
        assert_eq!(term.diffusion().coefficients().unwrap().d11.at(0)[1], 0.5);

        let x = vec![1.0; 4];
        let mut vec = vec![0.0; 4];
        term.set_vector_elements(&mut vec, &x).unwrap();
        assert!(grid.integrate(&vec).abs() < 1e-12);
    }

    #[test]
    fn borrowers_cannot_touch_owner_buffers() {
        let grid = Arc::new(cartesian_grid(1, 3, 1).unwrap());
        let mut term = AdvectionDiffusionTerm::new(Arc::clone(&grid));
        term.add_advection(constant_advection(1.0)).unwrap();
        let borrower = &term.advection_terms[0];
        assert!(borrower.is_shared());
        assert!(borrower.coefficients_mut().is_err());
        assert!(borrower.reset_coefficients().is_err());
    }

    #[test]
    fn grid_rebuild_reshapes_owner_then_borrowers() {
        let grid = Arc::new(cartesian_grid(1, 3, 1).unwrap());
        let mut term = AdvectionDiffusionTerm::new(grid);
        term.add_advection(constant_advection(1.0)).unwrap();
        let finer = Arc::new(cartesian_grid(2, 5, 1).unwrap());
        assert!(term.grid_rebuilt(&finer).unwrap());
        assert!(term.advection().coefficients().unwrap().f1.matches(&finer));
    }

    /// Coefficient model that only declares a dependency.
    struct Coupled {
        source: usize,
        n: usize,
    }

    impl AdvectionModel for Coupled {
        fn rebuild(
            &mut self,
            _t: f64,
            _dt: f64,
            _unknowns: &UnknownQuantityHandler,
            _grid: &Grid,
            _coeffs: &mut AdvectionCoefficients,
        ) -> Result<()> {
            Ok(())
        }

        fn dependencies(&self) -> Vec<Dependency> {
            vec![Dependency::new(self.source, self.n)]
        }
    }

    impl DiffusionModel for Coupled {
        fn rebuild(
            &mut self,
            _t: f64,
            _dt: f64,
            _unknowns: &UnknownQuantityHandler,
            _grid: &Grid,
            _coeffs: &mut DiffusionCoefficients,
        ) -> Result<()> {
            Ok(())
        }

        fn dependencies(&self) -> Vec<Dependency> {
            vec![Dependency::new(self.source, self.n)]
        }
    }

    #[test]
    fn shared_dependencies_are_counted_once() {
        let grid = Arc::new(cartesian_grid(1, 4, 1).unwrap());
        let mut term = AdvectionDiffusionTerm::new(grid);
        term.add_advection(Coupled { source: 2, n: 1 }).unwrap();
        term.add_advection(Coupled { source: 1, n: 1 }).unwrap();
        term.add_diffusion(Coupled { source: 2, n: 3 }).unwrap();
        assert_eq!(term.dependencies(), vec![Dependency::new(1, 1), Dependency::new(2, 3)]);

        let base = term.nnz_per_row();
        let op = Operator::new().with_term(term).unwrap();
        assert_eq!(op.nnz_per_row_jacobian(), base + 4);
    }
}
