pub mod advection;
pub mod advection_diffusion;
pub mod bc;
pub mod diffusion;
pub mod equation;
pub mod identity;
pub mod interpolation;
pub mod operator;
pub mod prescribed;
pub mod storage;
pub mod transient;

use std::sync::Arc;

use crate::discretization::Grid;
use crate::error::Result;
use crate::numerics::block_matrix::BlockView;
use crate::unknowns::UnknownQuantityHandler;

use advection::AdvectionTerm;
use advection_diffusion::AdvectionDiffusionTerm;
use diffusion::DiffusionTerm;
use identity::IdentityTerm;
use prescribed::PrescribedParameter;
use transient::TransientTerm;

/// Unknown on which a term's coefficients depend: `n_multiples` values per radius.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub unknown_id: usize,
    pub n_multiples: usize,
}

impl Dependency {
    pub fn new(unknown_id: usize, n_multiples: usize) -> Self {
        Self {
            unknown_id,
            n_multiples,
        }
    }
}

/// One entry per unknown, keeping the largest multiple count.
pub(crate) fn merge_dependencies(mut deps: Vec<Dependency>) -> Vec<Dependency> {
    deps.sort_unstable_by_key(|d| d.unknown_id);
    deps.dedup_by(|next, kept| {
        if next.unknown_id != kept.unknown_id {
            return false;
        }
        kept.n_multiples = kept.n_multiples.max(next.n_multiples);
        true
    });
    deps
}

/// Contract every equation term implements.
///
/// A term contributes to the residual `F(x) = M x + rhs` of its row unknown.
/// All `set_*` methods add into the buffers they are given.
pub trait EquationTerm {
    /// Recomputes the term's coefficients for time `t`.
    fn rebuild(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()>;

    /// Follows a grid change; returns true if any buffer was reallocated.
    fn grid_rebuilt(&mut self, _grid: &Arc<Grid>) -> Result<bool> {
        Ok(false)
    }

    fn nnz_per_row(&self) -> usize;

    fn nnz_per_row_jacobian(&self) -> usize {
        self.nnz_per_row()
    }

    /// Writes `M` into `mat` and the constant part into `rhs` (block-local).
    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()>;

    /// Adds `M x + rhs` to `vec`, with `x` the value of the column unknown.
    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()>;

    /// Adds `dF/d(deriv_id)` to `jac`. `x` is the current value of the
    /// term's column unknown.
    fn set_jacobian_block(
        &mut self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        x: &[f64],
        unknowns: &UnknownQuantityHandler,
    ) -> Result<()>;
}

/// Closed set of term kinds, plus a plug-in variant for physics-specific terms.
pub enum Term {
    Transient(TransientTerm),
    Identity(IdentityTerm),
    Prescribed(PrescribedParameter),
    Advection(AdvectionTerm),
    Diffusion(DiffusionTerm),
    AdvectionDiffusion(AdvectionDiffusionTerm),
    Custom(Box<dyn EquationTerm>),
}

macro_rules! dispatch {
    ($self:expr, $term:ident => $body:expr) => {
        match $self {
            Term::Transient($term) => $body,
            Term::Identity($term) => $body,
            Term::Prescribed($term) => $body,
            Term::Advection($term) => $body,
            Term::Diffusion($term) => $body,
            Term::AdvectionDiffusion($term) => $body,
            Term::Custom($term) => $body,
        }
    };
}

impl Term {
    pub fn custom(term: impl EquationTerm + 'static) -> Self {
        Term::Custom(Box::new(term))
    }

    /// True for terms writing into a coefficient buffer owned elsewhere.
    pub fn is_shared(&self) -> bool {
        match self {
            Term::Advection(t) => t.is_shared(),
            Term::Diffusion(t) => t.is_shared(),
            _ => false,
        }
    }

    pub fn is_prescribed(&self) -> bool {
        matches!(self, Term::Prescribed(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Term::Transient(_) => "transient",
            Term::Identity(_) => "identity",
            Term::Prescribed(_) => "prescribed",
            Term::Advection(_) => "advection",
            Term::Diffusion(_) => "diffusion",
            Term::AdvectionDiffusion(_) => "advection-diffusion",
            Term::Custom(_) => "custom",
        }
    }

    /// Number of rows the term writes, for terms that carry their own length.
    pub fn size(&self) -> Option<usize> {
        match self {
            Term::Identity(t) => Some(t.size()),
            Term::Prescribed(t) => Some(t.size()),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        match self {
            Term::Advection(t) => t.dependencies(),
            Term::Diffusion(t) => t.dependencies(),
            Term::AdvectionDiffusion(t) => t.dependencies(),
            _ => Vec::new(),
        }
    }

    /// Advection coefficients, for boundary conditions acting on this term.
    pub fn advection(&self) -> Option<&AdvectionTerm> {
        match self {
            Term::Advection(t) => Some(t),
            Term::AdvectionDiffusion(t) => Some(t.advection()),
            _ => None,
        }
    }

    pub fn diffusion(&self) -> Option<&DiffusionTerm> {
        match self {
            Term::Diffusion(t) => Some(t),
            Term::AdvectionDiffusion(t) => Some(t.diffusion()),
            _ => None,
        }
    }
}

impl EquationTerm for Term {
    fn rebuild(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()> {
        dispatch!(self, term => term.rebuild(t, dt, unknowns))
    }

    fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<bool> {
        dispatch!(self, term => term.grid_rebuilt(grid))
    }

    fn nnz_per_row(&self) -> usize {
        dispatch!(self, term => term.nnz_per_row())
    }

    fn nnz_per_row_jacobian(&self) -> usize {
        dispatch!(self, term => term.nnz_per_row_jacobian())
    }

    fn set_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        dispatch!(self, term => term.set_matrix_elements(mat, rhs))
    }

    fn set_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        dispatch!(self, term => term.set_vector_elements(vec, x))
    }

    fn set_jacobian_block(
        &mut self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        x: &[f64],
        unknowns: &UnknownQuantityHandler,
    ) -> Result<()> {
        dispatch!(self, term => term.set_jacobian_block(uqty_id, deriv_id, jac, x, unknowns))
    }
}

impl From<TransientTerm> for Term {
    fn from(t: TransientTerm) -> Self {
        Term::Transient(t)
    }
}

impl From<IdentityTerm> for Term {
    fn from(t: IdentityTerm) -> Self {
        Term::Identity(t)
    }
}

impl From<PrescribedParameter> for Term {
    fn from(t: PrescribedParameter) -> Self {
        Term::Prescribed(t)
    }
}

impl From<AdvectionTerm> for Term {
    fn from(t: AdvectionTerm) -> Self {
        Term::Advection(t)
    }
}

impl From<DiffusionTerm> for Term {
    fn from(t: DiffusionTerm) -> Self {
        Term::Diffusion(t)
    }
}

impl From<AdvectionDiffusionTerm> for Term {
    fn from(t: AdvectionDiffusionTerm) -> Self {
        Term::AdvectionDiffusion(t)
    }
}
