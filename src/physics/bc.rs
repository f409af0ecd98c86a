use std::sync::Arc;

use crate::discretization::Grid;
use crate::error::{FvmError, Result};
use crate::numerics::block_matrix::BlockView;
use crate::physics::Term;
use crate::unknowns::UnknownQuantityHandler;

/// Flux direction of a boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Radial,
    P1,
    P2,
}

/// Which end of a direction the boundary sits at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Lower,
    Upper,
}

impl Side {
    /// Sign of the outward normal along the direction.
    pub fn sign(self) -> f64 {
        match self {
            Side::Lower => -1.0,
            Side::Upper => 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Boundary {
    pub direction: Direction,
    pub side: Side,
}

impl Boundary {
    pub fn new(direction: Direction, side: Side) -> Self {
        Self { direction, side }
    }
}

/// Location of a boundary face, handed to coefficient functions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryPoint {
    pub ir: usize,
    pub i: usize,
    pub j: usize,
    pub r: f64,
    pub p1: f64,
    pub p2: f64,
}

/// One face on the domain boundary together with the cell it bounds.
#[derive(Clone, Copy, Debug)]
struct BoundaryFace {
    /// Block-local row of the boundary cell.
    row: usize,
    /// Face-array block and index of the face.
    block: usize,
    fidx: usize,
    vp_f: f64,
    /// `V'` of the cell times its width along the direction.
    vol: f64,
    width: f64,
    point: BoundaryPoint,
}

fn boundary_faces(grid: &Grid, boundary: Boundary) -> Vec<BoundaryFace> {
    let nr = grid.nr();
    let radial = grid.radial();
    let mut faces = Vec::new();
    match boundary.direction {
        Direction::Radial => {
            let (ir, block) = match boundary.side {
                Side::Lower => (0, 0),
                Side::Upper => (nr - 1, nr),
            };
            let mg = grid.momentum(ir);
            let (n1, n2) = mg.shape();
            let width = radial.dr(ir);
            for j in 0..n2 {
                for i in 0..n1 {
                    let idx = j * n1 + i;
                    faces.push(BoundaryFace {
                        row: grid.cell_offset(ir) + idx,
                        block,
                        fidx: idx,
                        vp_f: grid.vp_fr(block)[idx],
                        vol: grid.vp(ir)[idx] * width,
                        width,
                        point: BoundaryPoint {
                            ir,
                            i,
                            j,
                            r: radial.r_f()[block],
                            p1: mg.p1()[i],
                            p2: mg.p2()[j],
                        },
                    });
                }
            }
        }
        Direction::P1 => {
            for ir in 0..nr {
                let mg = grid.momentum(ir);
                let (n1, n2) = mg.shape();
                let (i, face) = match boundary.side {
                    Side::Lower => (0, 0),
                    Side::Upper => (n1 - 1, n1),
                };
                for j in 0..n2 {
                    let idx = j * n1 + i;
                    let fidx = j * (n1 + 1) + face;
                    faces.push(BoundaryFace {
                        row: grid.cell_offset(ir) + idx,
                        block: ir,
                        fidx,
                        vp_f: grid.vp_f1(ir)[fidx],
                        vol: grid.vp(ir)[idx] * mg.dp1(i),
                        width: mg.dp1(i),
                        point: BoundaryPoint {
                            ir,
                            i,
                            j,
                            r: radial.r()[ir],
                            p1: mg.p1_f()[face],
                            p2: mg.p2()[j],
                        },
                    });
                }
            }
        }
        Direction::P2 => {
            for ir in 0..nr {
                let mg = grid.momentum(ir);
                let (n1, n2) = mg.shape();
                let (j, face) = match boundary.side {
                    Side::Lower => (0, 0),
                    Side::Upper => (n2 - 1, n2),
                };
                for i in 0..n1 {
                    let idx = j * n1 + i;
                    let fidx = face * n1 + i;
                    faces.push(BoundaryFace {
                        row: grid.cell_offset(ir) + idx,
                        block: ir,
                        fidx,
                        vp_f: grid.vp_f2(ir)[fidx],
                        vol: grid.vp(ir)[idx] * mg.dp2(j),
                        width: mg.dp2(j),
                        point: BoundaryPoint {
                            ir,
                            i,
                            j,
                            r: radial.r()[ir],
                            p1: mg.p1()[i],
                            p2: mg.p2_f()[face],
                        },
                    });
                }
            }
        }
    }
    faces
}

/// Sum of the advection coefficient `F` and direct diffusion coefficient
/// `D` on a boundary face over all transport terms of an operator.
fn face_transport(terms: &[Term], direction: Direction, face: &BoundaryFace) -> Result<(f64, f64)> {
    let (mut f, mut d) = (0.0, 0.0);
    for term in terms {
        if let Some(adv) = term.advection() {
            let c = adv.coefficients()?;
            let arr = match direction {
                Direction::Radial => &c.fr,
                Direction::P1 => &c.f1,
                Direction::P2 => &c.f2,
            };
            f += arr.at(face.block)[face.fidx];
        }
        if let Some(diff) = term.diffusion() {
            let c = diff.coefficients()?;
            let arr = match direction {
                Direction::Radial => &c.drr,
                Direction::P1 => &c.d11,
                Direction::P2 => &c.d22,
            };
            d += arr.at(face.block)[face.fidx];
        }
    }
    Ok((f, d))
}

/// Shared function type for BC coefficients that may depend on time and position.
pub type SFn = Arc<dyn Fn(f64, BoundaryPoint) -> f64 + Send + Sync>;

/// Local trait allowing convenient conversion into [`SFn`].
pub trait IntoSFn {
    fn into_sfn(self) -> SFn;
}

fn c(val: f64) -> SFn {
    Arc::new(move |_, _| val)
}

impl IntoSFn for f64 {
    fn into_sfn(self) -> SFn {
        c(self)
    }
}

impl<F> IntoSFn for F
where
    F: Fn(f64, BoundaryPoint) -> f64 + Send + Sync + 'static,
{
    fn into_sfn(self) -> SFn {
        Arc::new(self)
    }
}

/// `alpha u + beta du/dn = gamma` on a boundary face.
#[derive(Clone)]
pub struct GeneralizedBc {
    pub alpha: SFn,
    pub beta: SFn,
    pub gamma: SFn,
}

impl GeneralizedBc {
    pub fn dirichlet(g: impl IntoSFn) -> Self {
        Self {
            alpha: c(1.0),
            beta: c(0.0),
            gamma: g.into_sfn(),
        }
    }

    pub fn neumann(q: impl IntoSFn) -> Self {
        Self {
            alpha: c(0.0),
            beta: c(1.0),
            gamma: q.into_sfn(),
        }
    }

    pub fn robin(k: impl IntoSFn, g: impl IntoSFn) -> Self {
        let kf = k.into_sfn();
        let gf = g.into_sfn();
        Self {
            alpha: kf.clone(),
            beta: c(1.0),
            gamma: Arc::new(move |t, p| kf(t, p) * gf(t, p)),
        }
    }
}

/// Ghost-cell value `a u_i + b` enforcing the generalized condition on the
/// face at distance `delta` from the centre of boundary cell `i`.
#[inline]
pub fn robin_ghost_coeffs(alpha: f64, beta: f64, gamma: f64, delta: f64) -> Result<(f64, f64)> {
    if beta == 0.0 {
        if alpha == 0.0 {
            return Err(FvmError::config("boundary condition with alpha = beta = 0"));
        }
        Ok((-1.0, 2.0 * gamma / alpha))
    } else {
        let denom = alpha + beta / delta;
        if denom == 0.0 {
            return Err(FvmError::config("degenerate Robin boundary condition"));
        }
        Ok((-(alpha - beta / delta) / denom, 2.0 * gamma / denom))
    }
}

#[inline]
pub fn robin_ghost_val(u_i: f64, alpha: f64, beta: f64, gamma: f64, delta: f64) -> Result<f64> {
    let (a, b) = robin_ghost_coeffs(alpha, beta, gamma, delta)?;
    Ok(a * u_i + b)
}

/// Contract of a boundary condition attached to an operator.
///
/// Non-overriding conditions add to the rows of their boundary cells.
/// Overriding conditions own their rows: the solver clears those rows in
/// every block after the interior assembly and the condition then inserts
/// its values.
pub trait BoundaryConditionTerm {
    /// Recomputes the condition for time `t`; `terms` are the terms of the
    /// operator the condition belongs to.
    fn rebuild(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler, terms: &[Term]) -> Result<()>;

    fn grid_rebuilt(&mut self, _grid: &Arc<Grid>) -> Result<()> {
        Ok(())
    }

    fn overrides(&self) -> bool {
        false
    }

    /// Block-local rows owned by an overriding condition.
    fn overridden_rows(&self) -> &[usize] {
        &[]
    }

    /// Additional non-zeros per row beyond those of the operator's terms.
    fn nnz_per_row(&self) -> usize {
        0
    }

    fn add_to_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()>;

    fn add_to_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()>;

    fn add_to_jacobian_block(
        &self,
        uqty_id: usize,
        deriv_id: usize,
        jac: &mut BlockView<'_>,
        x: &[f64],
    ) -> Result<()>;
}

/// Per boundary cell: the residual gains `diag * x[row] + constant`.
#[derive(Clone, Debug, Default)]
struct LinearBoundaryRows {
    rows: Vec<(usize, f64, f64)>,
}

impl LinearBoundaryRows {
    fn add_to_matrix(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        for &(row, diag, constant) in &self.rows {
            mat.set_element(row, row, diag)?;
            rhs[row] += constant;
        }
        Ok(())
    }

    fn add_to_vector(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        for &(row, diag, constant) in &self.rows {
            let (Some(v), Some(xr)) = (vec.get_mut(row), x.get(row)) else {
                return Err(FvmError::config(format!("boundary row {row} outside the unknown")));
            };
            *v += diag * xr + constant;
        }
        Ok(())
    }

    fn add_to_jacobian(&self, jac: &mut BlockView<'_>) -> Result<()> {
        for &(row, diag, _) in &self.rows {
            jac.set_element(row, row, diag)?;
        }
        Ok(())
    }
}

/// Flux leaving the domain through a boundary. The advective flux uses the
/// boundary cell value; the diffusive flux assumes a zero exterior value one
/// cell width away.
pub struct ExternalLoss {
    grid: Arc<Grid>,
    boundary: Boundary,
    linear: LinearBoundaryRows,
}

impl ExternalLoss {
    pub fn new(grid: Arc<Grid>, boundary: Boundary) -> Self {
        Self {
            grid,
            boundary,
            linear: LinearBoundaryRows::default(),
        }
    }
}

impl BoundaryConditionTerm for ExternalLoss {
    fn rebuild(&mut self, _t: f64, _dt: f64, _unknowns: &UnknownQuantityHandler, terms: &[Term]) -> Result<()> {
        let s = self.boundary.side.sign();
        self.linear.rows.clear();
        for face in boundary_faces(&self.grid, self.boundary) {
            let (f, d) = face_transport(terms, self.boundary.direction, &face)?;
            let diag = face.vp_f * (s * f - d / face.width) / face.vol;
            self.linear.rows.push((face.row, diag, 0.0));
        }
        Ok(())
    }

    fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<()> {
        self.grid = Arc::clone(grid);
        self.linear.rows.clear();
        Ok(())
    }

    fn add_to_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        self.linear.add_to_matrix(mat, rhs)
    }

    fn add_to_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        self.linear.add_to_vector(vec, x)
    }

    fn add_to_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, _x: &[f64]) -> Result<()> {
        if uqty_id == deriv_id {
            self.linear.add_to_jacobian(jac)?;
        }
        Ok(())
    }
}

/// Generalized (Robin) condition imposed through a ghost cell whose value is
/// linear in the boundary cell value.
pub struct Robin {
    grid: Arc<Grid>,
    boundary: Boundary,
    bc: GeneralizedBc,
    linear: LinearBoundaryRows,
}

impl Robin {
    pub fn new(grid: Arc<Grid>, boundary: Boundary, bc: GeneralizedBc) -> Self {
        Self {
            grid,
            boundary,
            bc,
            linear: LinearBoundaryRows::default(),
        }
    }
}

impl BoundaryConditionTerm for Robin {
    fn rebuild(&mut self, t: f64, _dt: f64, _unknowns: &UnknownQuantityHandler, terms: &[Term]) -> Result<()> {
        let s = self.boundary.side.sign();
        self.linear.rows.clear();
        for face in boundary_faces(&self.grid, self.boundary) {
            let p = face.point;
            let (a, b) = robin_ghost_coeffs(
                (self.bc.alpha)(t, p),
                (self.bc.beta)(t, p),
                (self.bc.gamma)(t, p),
                0.5 * face.width,
            )?;
            let (f, d) = face_transport(terms, self.boundary.direction, &face)?;
            // Face value (u + g)/2, outward gradient (g - u)/width.
            let diag = face.vp_f * (s * f * 0.5 * (1.0 + a) + d * (a - 1.0) / face.width) / face.vol;
            let constant = face.vp_f * (s * f * 0.5 * b + d * b / face.width) / face.vol;
            self.linear.rows.push((face.row, diag, constant));
        }
        Ok(())
    }

    fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<()> {
        self.grid = Arc::clone(grid);
        self.linear.rows.clear();
        Ok(())
    }

    fn add_to_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        self.linear.add_to_matrix(mat, rhs)
    }

    fn add_to_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        self.linear.add_to_vector(vec, x)
    }

    fn add_to_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, _x: &[f64]) -> Result<()> {
        if uqty_id == deriv_id {
            self.linear.add_to_jacobian(jac)?;
        }
        Ok(())
    }
}

/// Rows fixed to a value: each owned row of the residual is exactly `x - v`.
pub struct Dirichlet {
    rows: Vec<usize>,
    points: Vec<BoundaryPoint>,
    value: SFn,
    current: Vec<f64>,
}

impl Dirichlet {
    /// Fixes every cell adjacent to `boundary`.
    pub fn new(grid: &Grid, boundary: Boundary, value: impl IntoSFn) -> Self {
        let faces = boundary_faces(grid, boundary);
        Self {
            rows: faces.iter().map(|f| f.row).collect(),
            points: faces.iter().map(|f| f.point).collect(),
            value: value.into_sfn(),
            current: vec![0.0; faces.len()],
        }
    }

    /// Fixes arbitrary block-local rows; the value function sees a default point.
    pub fn rows(rows: Vec<usize>, value: impl IntoSFn) -> Self {
        let point = BoundaryPoint {
            ir: 0,
            i: 0,
            j: 0,
            r: 0.0,
            p1: 0.0,
            p2: 0.0,
        };
        Self {
            points: vec![point; rows.len()],
            current: vec![0.0; rows.len()],
            rows,
            value: value.into_sfn(),
        }
    }
}

impl BoundaryConditionTerm for Dirichlet {
    fn rebuild(&mut self, t: f64, _dt: f64, _unknowns: &UnknownQuantityHandler, _terms: &[Term]) -> Result<()> {
        for (v, p) in self.current.iter_mut().zip(&self.points) {
            *v = (self.value)(t, *p);
        }
        Ok(())
    }

    fn overrides(&self) -> bool {
        true
    }

    fn overridden_rows(&self) -> &[usize] {
        &self.rows
    }

    fn add_to_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        for (&row, v) in self.rows.iter().zip(&self.current) {
            mat.insert_element(row, row, 1.0)?;
            rhs[row] -= v;
        }
        Ok(())
    }

    fn add_to_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        for (&row, v) in self.rows.iter().zip(&self.current) {
            vec[row] += x[row] - v;
        }
        Ok(())
    }

    fn add_to_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, _x: &[f64]) -> Result<()> {
        if uqty_id == deriv_id {
            for &row in &self.rows {
                jac.insert_element(row, row, 1.0)?;
            }
        }
        Ok(())
    }
}

/// Closed set of boundary condition kinds, plus a plug-in variant.
pub enum BoundaryCondition {
    ExternalLoss(ExternalLoss),
    Robin(Robin),
    Dirichlet(Dirichlet),
    Custom(Box<dyn BoundaryConditionTerm>),
}

macro_rules! dispatch_bc {
    ($self:expr, $bc:ident => $body:expr) => {
        match $self {
            BoundaryCondition::ExternalLoss($bc) => $body,
            BoundaryCondition::Robin($bc) => $body,
            BoundaryCondition::Dirichlet($bc) => $body,
            BoundaryCondition::Custom($bc) => $body,
        }
    };
}

impl BoundaryConditionTerm for BoundaryCondition {
    fn rebuild(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler, terms: &[Term]) -> Result<()> {
        dispatch_bc!(self, bc => bc.rebuild(t, dt, unknowns, terms))
    }

    fn grid_rebuilt(&mut self, grid: &Arc<Grid>) -> Result<()> {
        dispatch_bc!(self, bc => bc.grid_rebuilt(grid))
    }

    fn overrides(&self) -> bool {
        dispatch_bc!(self, bc => bc.overrides())
    }

    fn overridden_rows(&self) -> &[usize] {
        dispatch_bc!(self, bc => bc.overridden_rows())
    }

    fn nnz_per_row(&self) -> usize {
        dispatch_bc!(self, bc => bc.nnz_per_row())
    }

    fn add_to_matrix_elements(&self, mat: &mut BlockView<'_>, rhs: &mut [f64]) -> Result<()> {
        dispatch_bc!(self, bc => bc.add_to_matrix_elements(mat, rhs))
    }

    fn add_to_vector_elements(&self, vec: &mut [f64], x: &[f64]) -> Result<()> {
        dispatch_bc!(self, bc => bc.add_to_vector_elements(vec, x))
    }

    fn add_to_jacobian_block(&self, uqty_id: usize, deriv_id: usize, jac: &mut BlockView<'_>, x: &[f64]) -> Result<()> {
        dispatch_bc!(self, bc => bc.add_to_jacobian_block(uqty_id, deriv_id, jac, x))
    }
}

impl From<ExternalLoss> for BoundaryCondition {
    fn from(bc: ExternalLoss) -> Self {
        BoundaryCondition::ExternalLoss(bc)
    }
}

impl From<Robin> for BoundaryCondition {
    fn from(bc: Robin) -> Self {
        BoundaryCondition::Robin(bc)
    }
}

impl From<Dirichlet> for BoundaryCondition {
    fn from(bc: Dirichlet) -> Self {
        BoundaryCondition::Dirichlet(bc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::cartesian_grid;
    use crate::physics::EquationTerm;
    use crate::physics::advection::AdvectionTerm;
    use crate::physics::diffusion::DiffusionTerm;

    #[test]
    fn ghost_value_satisfies_condition() {
        let (alpha, beta, gamma, delta) = (2.0, 0.5, 3.0, 0.25);
        let u = 1.7;
        let g = robin_ghost_val(u, alpha, beta, gamma, delta).unwrap();
        let face = 0.5 * (u + g);
        let grad = (g - u) / (2.0 * delta);
        assert!((alpha * face + beta * grad - gamma).abs() < 1e-12);

        let g = robin_ghost_val(u, 1.0, 0.0, 2.0, delta).unwrap();
        assert!((0.5 * (u + g) - 2.0).abs() < 1e-12);
        assert!(robin_ghost_val(u, 0.0, 0.0, 1.0, delta).is_err());
    }

    #[test]
    fn external_loss_removes_boundary_flux() {
        let grid = Arc::new(cartesian_grid(1, 3, 1).unwrap());
        let adv = AdvectionTerm::new(Arc::clone(&grid));
        adv.coefficients_mut().unwrap().f1.fill(-2.0);
        let terms = vec![Term::from(adv)];

        let mut loss = ExternalLoss::new(Arc::clone(&grid), Boundary::new(Direction::P1, Side::Upper));
        loss.rebuild(0.0, 1.0, &UnknownQuantityHandler::new(), &terms).unwrap();

        let x = vec![1.0, 1.0, 4.0];
        let mut vec = vec![0.0; 3];
        terms[0].set_vector_elements(&mut vec, &x).unwrap();
        loss.add_to_vector_elements(&mut vec, &x).unwrap();
        // Total content changes by exactly the outflow V' F x_last.
        assert!((grid.integrate(&vec) - (-2.0 * 4.0)).abs() < 1e-12);
    }

    #[test]
    fn neumann_zero_adds_nothing() {
        let grid = Arc::new(cartesian_grid(1, 4, 1).unwrap());
        let diff = DiffusionTerm::new(Arc::clone(&grid));
        diff.coefficients_mut().unwrap().d11.fill(1.0);
        let terms = vec![Term::from(diff)];
        let mut bc = Robin::new(
            Arc::clone(&grid),
            Boundary::new(Direction::P1, Side::Lower),
            GeneralizedBc::neumann(0.0),
        );
        bc.rebuild(0.0, 1.0, &UnknownQuantityHandler::new(), &terms).unwrap();
        let mut vec = vec![0.0; 4];
        bc.add_to_vector_elements(&mut vec, &[3.0, 1.0, 2.0, 5.0]).unwrap();
        assert!(vec.iter().all(|v| v.abs() < 1e-14));
    }

    #[test]
    fn dirichlet_selects_boundary_cells() {
        let grid = cartesian_grid(3, 2, 2).unwrap();
        let bc = Dirichlet::new(&grid, Boundary::new(Direction::Radial, Side::Upper), 1.0);
        assert_eq!(bc.overridden_rows(), &[8, 9, 10, 11]);
        let bc = Dirichlet::new(&grid, Boundary::new(Direction::P1, Side::Lower), 1.0);
        assert_eq!(bc.overridden_rows(), &[0, 2, 4, 6, 8, 10]);
    }
}
