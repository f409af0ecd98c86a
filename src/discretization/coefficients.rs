use super::grid::Grid;
use crate::error::{FvmError, Result};

/// Which grid a coefficient array lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceGrid {
    /// Cell centres, `n1*n2` points per radius.
    Cell,
    /// Radial faces, `nr+1` blocks of `n1*n2` points.
    Radial,
    /// p1 faces, `(n1+1)*n2` points per radius.
    P1,
    /// p2 faces, `n1*(n2+1)` points per radius.
    P2,
}

impl FaceGrid {
    /// Per-block sizes of this face grid on `grid`.
    pub fn block_sizes(self, grid: &Grid) -> Vec<usize> {
        let nr = grid.nr();
        match self {
            FaceGrid::Cell => (0..nr).map(|ir| grid.n1(ir) * grid.n2(ir)).collect(),
            FaceGrid::Radial => (0..=nr)
                .map(|ir| {
                    let k = ir.min(nr - 1);
                    grid.n1(k) * grid.n2(k)
                })
                .collect(),
            FaceGrid::P1 => (0..nr).map(|ir| (grid.n1(ir) + 1) * grid.n2(ir)).collect(),
            FaceGrid::P2 => (0..nr).map(|ir| grid.n1(ir) * (grid.n2(ir) + 1)).collect(),
        }
    }
}

fn offsets_from(sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(sizes.len() + 1);
    let mut acc = 0;
    offsets.push(0);
    for s in sizes {
        acc += s;
        offsets.push(acc);
    }
    offsets
}

/// A grid-shaped array stored in one contiguous allocation, with an offset
/// table giving the slice belonging to each radius (or radial face).
#[derive(Clone, Debug, PartialEq)]
pub struct FaceArray {
    kind: FaceGrid,
    offsets: Vec<usize>,
    data: Vec<f64>,
}

impl FaceArray {
    pub fn new(grid: &Grid, kind: FaceGrid) -> Self {
        Self::filled(grid, kind, 0.0)
    }

    pub fn filled(grid: &Grid, kind: FaceGrid, value: f64) -> Self {
        let offsets = offsets_from(&kind.block_sizes(grid));
        let len = offsets.last().copied().unwrap_or(0);
        Self {
            kind,
            offsets,
            data: vec![value; len],
        }
    }

    pub fn kind(&self) -> FaceGrid {
        self.kind
    }

    pub fn nblocks(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn at(&self, ir: usize) -> &[f64] {
        &self.data[self.offsets[ir]..self.offsets[ir + 1]]
    }

    pub fn at_mut(&mut self, ir: usize) -> &mut [f64] {
        &mut self.data[self.offsets[ir]..self.offsets[ir + 1]]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn reset(&mut self) {
        self.fill(0.0);
    }

    /// Adds `scale * other` element-wise; both arrays must share a layout.
    pub fn add_scaled(&mut self, other: &FaceArray, scale: f64) -> Result<()> {
        if self.offsets != other.offsets {
            return Err(FvmError::config("cannot combine coefficient arrays of different shape"));
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += scale * b;
        }
        Ok(())
    }

    /// True if the layout equals the one freshly computed from `grid`.
    pub fn matches(&self, grid: &Grid) -> bool {
        self.offsets == offsets_from(&self.kind.block_sizes(grid))
    }

    pub fn check_shape(&self, grid: &Grid, name: &str) -> Result<()> {
        if self.matches(grid) {
            return Ok(());
        }
        let expected = offsets_from(&self.kind.block_sizes(grid));
        Err(FvmError::config(format!(
            "{name}: coefficient array has {} elements in {} blocks, grid requires {} in {}",
            self.len(),
            self.nblocks(),
            expected.last().copied().unwrap_or(0),
            expected.len() - 1
        )))
    }

    /// Re-derives the layout from `grid` and zeroes the data. Returns true
    /// if the allocation had to change.
    pub fn reshape(&mut self, grid: &Grid) -> bool {
        if self.matches(grid) {
            self.reset();
            return false;
        }
        *self = Self::new(grid, self.kind);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::cartesian_grid;

    #[test]
    fn per_radius_slices_are_contiguous() {
        let grid = cartesian_grid(3, 4, 2).unwrap();
        let mut f1 = FaceArray::new(&grid, FaceGrid::P1);
        assert_eq!(f1.len(), grid.ncells_f1());
        assert_eq!(f1.nblocks(), 3);
        f1.at_mut(1)[0] = 7.0;
        assert_eq!(f1.as_slice()[5 * 2], 7.0);

        let fr = FaceArray::new(&grid, FaceGrid::Radial);
        assert_eq!(fr.len(), grid.ncells_fr());
        assert_eq!(fr.nblocks(), 4);
    }

    #[test]
    fn reshape_follows_grid() {
        let small = cartesian_grid(2, 2, 2).unwrap();
        let large = cartesian_grid(2, 3, 2).unwrap();
        let mut f2 = FaceArray::filled(&small, FaceGrid::P2, 1.0);
        assert!(f2.check_shape(&large, "f2").is_err());
        assert!(f2.reshape(&large));
        assert_eq!(f2.len(), large.ncells_f2());
        assert!(f2.as_slice().iter().all(|v| *v == 0.0));
        assert!(!f2.reshape(&large));
    }
}
