use crate::error::{FvmError, Result};

/// Checks that a face array describes at least one cell and is strictly increasing.
fn validate_faces(name: &str, faces: &[f64]) -> Result<()> {
    if faces.len() < 2 {
        return Err(FvmError::config(format!(
            "{name}: at least two faces are required, got {}",
            faces.len()
        )));
    }
    if faces.iter().any(|f| !f.is_finite()) {
        return Err(FvmError::config(format!("{name}: non-finite face coordinate")));
    }
    if faces.windows(2).any(|w| w[1] <= w[0]) {
        return Err(FvmError::config(format!(
            "{name}: face coordinates must be strictly increasing"
        )));
    }
    Ok(())
}

fn centres_of(faces: &[f64]) -> Vec<f64> {
    faces.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
}

fn widths_of(faces: &[f64]) -> Vec<f64> {
    faces.windows(2).map(|w| w[1] - w[0]).collect()
}

/// One-dimensional radial partition.
#[derive(Clone, Debug, PartialEq)]
pub struct RadialGrid {
    r: Vec<f64>,
    r_f: Vec<f64>,
    dr: Vec<f64>,
}

impl RadialGrid {
    /// Builds the grid from its `nr+1` face coordinates; cell centres are face midpoints.
    pub fn from_faces(r_f: Vec<f64>) -> Result<Self> {
        validate_faces("radial grid", &r_f)?;
        Ok(Self {
            r: centres_of(&r_f),
            dr: widths_of(&r_f),
            r_f,
        })
    }

    pub fn nr(&self) -> usize {
        self.r.len()
    }

    pub fn r(&self) -> &[f64] {
        &self.r
    }

    pub fn r_f(&self) -> &[f64] {
        &self.r_f
    }

    pub fn dr(&self, ir: usize) -> f64 {
        self.dr[ir]
    }

    /// Distance between the centres on either side of interior face `ir` (`1 <= ir < nr`).
    pub fn dr_f(&self, ir: usize) -> f64 {
        self.r[ir] - self.r[ir - 1]
    }
}

/// Two-dimensional momentum grid owned by a single radial cell.
///
/// Cells are stored row-major with p1 running fastest: cell `(i, j)` has
/// the flat index `j*np1 + i`.
#[derive(Clone, Debug, PartialEq)]
pub struct MomentumGrid {
    p1: Vec<f64>,
    p1_f: Vec<f64>,
    dp1: Vec<f64>,
    p2: Vec<f64>,
    p2_f: Vec<f64>,
    dp2: Vec<f64>,
}

impl MomentumGrid {
    pub fn from_faces(p1_f: Vec<f64>, p2_f: Vec<f64>) -> Result<Self> {
        validate_faces("momentum grid (p1)", &p1_f)?;
        validate_faces("momentum grid (p2)", &p2_f)?;
        Ok(Self {
            p1: centres_of(&p1_f),
            dp1: widths_of(&p1_f),
            p1_f,
            p2: centres_of(&p2_f),
            dp2: widths_of(&p2_f),
            p2_f,
        })
    }

    /// The 1x1 grid on `[0,1] x [0,1]` carried by fluid quantities.
    pub fn single_cell() -> Self {
        Self {
            p1: vec![0.5],
            p1_f: vec![0.0, 1.0],
            dp1: vec![1.0],
            p2: vec![0.5],
            p2_f: vec![0.0, 1.0],
            dp2: vec![1.0],
        }
    }

    pub fn np1(&self) -> usize {
        self.p1.len()
    }

    pub fn np2(&self) -> usize {
        self.p2.len()
    }

    pub fn ncells(&self) -> usize {
        self.np1() * self.np2()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.np1(), self.np2())
    }

    pub fn p1(&self) -> &[f64] {
        &self.p1
    }

    pub fn p1_f(&self) -> &[f64] {
        &self.p1_f
    }

    pub fn p2(&self) -> &[f64] {
        &self.p2
    }

    pub fn p2_f(&self) -> &[f64] {
        &self.p2_f
    }

    pub fn dp1(&self, i: usize) -> f64 {
        self.dp1[i]
    }

    pub fn dp2(&self, j: usize) -> f64 {
        self.dp2[j]
    }

    /// Centre distance across interior p1 face `i` (`1 <= i < np1`).
    pub fn dp1_f(&self, i: usize) -> f64 {
        self.p1[i] - self.p1[i - 1]
    }

    /// Centre distance across interior p2 face `j` (`1 <= j < np2`).
    pub fn dp2_f(&self, j: usize) -> f64 {
        self.p2[j] - self.p2[j - 1]
    }
}

/// Radial factor of the phase-space Jacobian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RadialMetric {
    #[default]
    Uniform,
    /// V' proportional to r (vanishes on the magnetic axis).
    Cylindrical,
}

/// Momentum factor of the phase-space Jacobian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MomentumMetric {
    #[default]
    Cartesian,
    /// p1 = p, p2 = xi; V' proportional to p^2.
    Spherical,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Metric {
    pub radial: RadialMetric,
    pub momentum: MomentumMetric,
}

impl Metric {
    pub fn vp(&self, r: f64, p1: f64, _p2: f64) -> f64 {
        let radial = match self.radial {
            RadialMetric::Uniform => 1.0,
            RadialMetric::Cylindrical => r,
        };
        let momentum = match self.momentum {
            MomentumMetric::Cartesian => 1.0,
            MomentumMetric::Spherical => p1 * p1,
        };
        radial * momentum
    }
}

/// The complete two-level computational grid: `nr` radial cells, each with
/// its own momentum grid, plus the Jacobian metric evaluated on cells and on
/// the three face grids.
#[derive(Clone, Debug)]
pub struct Grid {
    radial: RadialGrid,
    momentum: Vec<MomentumGrid>,
    metric: Metric,
    cell_offsets: Vec<usize>,
    vp: Vec<Vec<f64>>,
    vp_fr: Vec<Vec<f64>>,
    vp_f1: Vec<Vec<f64>>,
    vp_f2: Vec<Vec<f64>>,
}

impl Grid {
    pub fn new(radial: RadialGrid, momentum: Vec<MomentumGrid>, metric: Metric) -> Result<Self> {
        let nr = radial.nr();
        if momentum.len() != nr {
            return Err(FvmError::config(format!(
                "grid: {} momentum grids given for {} radial cells",
                momentum.len(),
                nr
            )));
        }
        // Radial fluxes couple cell (i, j) of neighbouring radii.
        if let Some(first) = momentum.first()
            && momentum.iter().any(|mg| mg.shape() != first.shape())
        {
            return Err(FvmError::config(
                "grid: all radii must share the same momentum grid shape",
            ));
        }

        let mut cell_offsets = Vec::with_capacity(nr + 1);
        let mut offset = 0;
        for mg in &momentum {
            cell_offsets.push(offset);
            offset += mg.ncells();
        }
        cell_offsets.push(offset);

        let r = radial.r();
        let r_f = radial.r_f();
        let mut vp = Vec::with_capacity(nr);
        let mut vp_f1 = Vec::with_capacity(nr);
        let mut vp_f2 = Vec::with_capacity(nr);
        for (ir, mg) in momentum.iter().enumerate() {
            let (n1, n2) = mg.shape();
            let mut cell = Vec::with_capacity(n1 * n2);
            let mut f2 = Vec::with_capacity(n1 * (n2 + 1));
            for j in 0..n2 {
                for i in 0..n1 {
                    cell.push(metric.vp(r[ir], mg.p1[i], mg.p2[j]));
                }
            }
            let mut f1 = Vec::with_capacity((n1 + 1) * n2);
            for j in 0..n2 {
                for i in 0..=n1 {
                    f1.push(metric.vp(r[ir], mg.p1_f[i], mg.p2[j]));
                }
            }
            for j in 0..=n2 {
                for i in 0..n1 {
                    f2.push(metric.vp(r[ir], mg.p1[i], mg.p2_f[j]));
                }
            }
            vp.push(cell);
            vp_f1.push(f1);
            vp_f2.push(f2);
        }

        let mut vp_fr = Vec::with_capacity(nr + 1);
        for (ir, rf) in r_f.iter().enumerate() {
            let mg = &momentum[ir.min(nr - 1)];
            let (n1, n2) = mg.shape();
            let mut fr = Vec::with_capacity(n1 * n2);
            for j in 0..n2 {
                for i in 0..n1 {
                    fr.push(metric.vp(*rf, mg.p1[i], mg.p2[j]));
                }
            }
            vp_fr.push(fr);
        }

        Ok(Self {
            radial,
            momentum,
            metric,
            cell_offsets,
            vp,
            vp_fr,
            vp_f1,
            vp_f2,
        })
    }

    /// Same momentum grid at every radius.
    pub fn uniform_momentum(radial: RadialGrid, momentum: MomentumGrid, metric: Metric) -> Result<Self> {
        let nr = radial.nr();
        Self::new(radial, vec![momentum; nr], metric)
    }

    pub fn nr(&self) -> usize {
        self.radial.nr()
    }

    pub fn radial(&self) -> &RadialGrid {
        &self.radial
    }

    pub fn momentum(&self, ir: usize) -> &MomentumGrid {
        &self.momentum[ir]
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn n1(&self, ir: usize) -> usize {
        self.momentum[ir].np1()
    }

    pub fn n2(&self, ir: usize) -> usize {
        self.momentum[ir].np2()
    }

    /// True when every radius carries a single momentum cell.
    pub fn is_fluid(&self) -> bool {
        self.momentum.iter().all(|mg| mg.ncells() == 1)
    }

    /// Total number of cells over all radii.
    pub fn ncells(&self) -> usize {
        self.cell_offsets[self.nr()]
    }

    pub fn ncells_at(&self, ir: usize) -> usize {
        self.momentum[ir].ncells()
    }

    /// Index of the first cell of radius `ir` in a distribution-sized vector.
    pub fn cell_offset(&self, ir: usize) -> usize {
        self.cell_offsets[ir]
    }

    /// Number of points on the radial flux grid: `nr+1` faces, each with a
    /// full momentum grid (the outermost face reuses the last radius).
    pub fn ncells_fr(&self) -> usize {
        let nr = self.nr();
        (0..=nr).map(|ir| self.momentum[ir.min(nr - 1)].ncells()).sum()
    }

    pub fn ncells_f1(&self) -> usize {
        self.momentum.iter().map(|mg| (mg.np1() + 1) * mg.np2()).sum()
    }

    pub fn ncells_f2(&self) -> usize {
        self.momentum.iter().map(|mg| mg.np1() * (mg.np2() + 1)).sum()
    }

    pub fn vp(&self, ir: usize) -> &[f64] {
        &self.vp[ir]
    }

    /// Metric on radial face `ir` (`0 <= ir <= nr`).
    pub fn vp_fr(&self, ir: usize) -> &[f64] {
        &self.vp_fr[ir]
    }

    pub fn vp_f1(&self, ir: usize) -> &[f64] {
        &self.vp_f1[ir]
    }

    pub fn vp_f2(&self, ir: usize) -> &[f64] {
        &self.vp_f2[ir]
    }

    /// Phase-space volume `V' dr dp1 dp2` of cell `(i, j)` at radius `ir`.
    pub fn cell_volume(&self, ir: usize, i: usize, j: usize) -> f64 {
        let mg = &self.momentum[ir];
        self.vp[ir][j * mg.np1() + i] * self.radial.dr(ir) * mg.dp1(i) * mg.dp2(j)
    }

    /// Volume-weighted sum of a distribution-sized vector.
    pub fn integrate(&self, vec: &[f64]) -> f64 {
        let mut sum = 0.0;
        for ir in 0..self.nr() {
            let (n1, n2) = self.momentum[ir].shape();
            let offset = self.cell_offset(ir);
            for j in 0..n2 {
                for i in 0..n1 {
                    sum += self.cell_volume(ir, i, j) * vec[offset + j * n1 + i];
                }
            }
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid(metric: Metric) -> Grid {
        let radial = RadialGrid::from_faces(vec![0.0, 0.5, 1.0]).unwrap();
        let mg = MomentumGrid::from_faces(vec![0.0, 1.0, 2.0, 4.0], vec![-1.0, 0.0, 1.0]).unwrap();
        Grid::uniform_momentum(radial, mg, metric).unwrap()
    }

    #[test]
    fn face_grid_counts() {
        let grid = small_grid(Metric::default());
        assert_eq!(grid.ncells(), 2 * 3 * 2);
        assert_eq!(grid.ncells_fr(), 3 * 6);
        assert_eq!(grid.ncells_f1(), 2 * 4 * 2);
        assert_eq!(grid.ncells_f2(), 2 * 3 * 3);
        assert_eq!(grid.cell_offset(1), 6);
    }

    #[test]
    fn spherical_metric_vanishes_at_origin() {
        let metric = Metric {
            radial: RadialMetric::Cylindrical,
            momentum: MomentumMetric::Spherical,
        };
        let grid = small_grid(metric);
        // First p1 face sits at p = 0.
        assert_eq!(grid.vp_f1(0)[0], 0.0);
        // Axis face r = 0.
        assert!(grid.vp_fr(0).iter().all(|v| *v == 0.0));
        assert!((grid.vp(1)[1] - 0.75 * 1.5 * 1.5).abs() < 1e-14);
    }

    #[test]
    fn rejects_bad_faces_and_mismatched_shapes() {
        assert!(RadialGrid::from_faces(vec![0.0]).is_err());
        assert!(MomentumGrid::from_faces(vec![0.0, 1.0, 0.5], vec![0.0, 1.0]).is_err());

        let radial = RadialGrid::from_faces(vec![0.0, 0.5, 1.0]).unwrap();
        let a = MomentumGrid::from_faces(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap();
        let b = MomentumGrid::from_faces(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]).unwrap();
        let err = Grid::new(radial, vec![a, b], Metric::default()).unwrap_err();
        assert!(matches!(err, FvmError::Configuration(_)));
    }

    #[test]
    fn integrate_sums_cell_volumes() {
        let grid = small_grid(Metric::default());
        let ones = vec![1.0; grid.ncells()];
        // [0,1] x [0,4] x [-1,1]
        assert!((grid.integrate(&ones) - 8.0).abs() < 1e-12);
    }
}
