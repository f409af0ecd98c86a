use crate::discretization::{FaceGrid, Grid};
use crate::error::{FvmError, Result};

/// Spatial layout of an unknown quantity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FluxGridType {
    /// Cell centred, the usual choice.
    #[default]
    Distribution,
    RadialFlux,
    P1Flux,
    P2Flux,
}

impl FluxGridType {
    pub fn face_grid(self) -> FaceGrid {
        match self {
            FluxGridType::Distribution => FaceGrid::Cell,
            FluxGridType::RadialFlux => FaceGrid::Radial,
            FluxGridType::P1Flux => FaceGrid::P1,
            FluxGridType::P2Flux => FaceGrid::P2,
        }
    }

    /// Number of points per multiple on `grid`.
    pub fn nelements(self, grid: &Grid) -> usize {
        match self {
            FluxGridType::Distribution => grid.ncells(),
            FluxGridType::RadialFlux => grid.ncells_fr(),
            FluxGridType::P1Flux => grid.ncells_f1(),
            FluxGridType::P2Flux => grid.ncells_f2(),
        }
    }
}

/// Current, previous and saved values of one unknown quantity.
///
/// `data.len() == nelements * n_multiples` at all times.
#[derive(Clone, Debug)]
pub struct QuantityData {
    flux_grid_type: FluxGridType,
    n_multiples: usize,
    nelements: usize,
    /// `(nr, n1, n2)` of the grid the quantity was created on.
    grid_dims: (usize, usize, usize),

    data: Vec<f64>,
    old_data: Vec<f64>,
    old_time: f64,
    has_changed: bool,

    times: Vec<f64>,
    snapshots: Vec<Vec<f64>>,
    has_initial_value: bool,
}

impl QuantityData {
    pub fn new(grid: &Grid, n_multiples: usize, flux_grid_type: FluxGridType) -> Result<Self> {
        if n_multiples == 0 {
            return Err(FvmError::config("quantity must have at least one multiple"));
        }
        let nelements = flux_grid_type.nelements(grid);
        let size = nelements * n_multiples;
        Ok(Self {
            flux_grid_type,
            n_multiples,
            nelements,
            grid_dims: (grid.nr(), grid.n1(0), grid.n2(0)),
            data: vec![0.0; size],
            old_data: vec![0.0; size],
            old_time: 0.0,
            has_changed: true,
            times: Vec::new(),
            snapshots: Vec::new(),
            has_initial_value: false,
        })
    }

    pub fn flux_grid_type(&self) -> FluxGridType {
        self.flux_grid_type
    }

    pub fn n_multiples(&self) -> usize {
        self.n_multiples
    }

    /// Points per multiple.
    pub fn nelements(&self) -> usize {
        self.nelements
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn previous(&self) -> &[f64] {
        &self.old_data
    }

    pub fn old_time(&self) -> f64 {
        self.old_time
    }

    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    /// Copies `vec[offset..offset+size]` into the current data. When
    /// `may_be_constant` is set, an identical vector leaves the change flag down.
    pub fn store(&mut self, vec: &[f64], offset: usize, may_be_constant: bool) -> Result<()> {
        let n = self.size();
        let src = vec.get(offset..offset + n).ok_or_else(|| {
            FvmError::config(format!(
                "store: vector of length {} too short for {} elements at offset {}",
                vec.len(),
                n,
                offset
            ))
        })?;
        if may_be_constant && src == self.data.as_slice() {
            self.has_changed = false;
            return Ok(());
        }
        self.data.copy_from_slice(src);
        self.has_changed = true;
        Ok(())
    }

    /// Accepts the current data as the state at time `t`. Only a `true_save`
    /// adds a snapshot to the output history.
    pub fn save_step(&mut self, t: f64, true_save: bool) {
        self.old_data.copy_from_slice(&self.data);
        self.old_time = t;
        if true_save {
            self.times.push(t);
            self.snapshots.push(self.data.clone());
        }
    }

    /// Rolls the current data back to the last accepted step.
    pub fn restore(&mut self) {
        self.data.copy_from_slice(&self.old_data);
        self.has_changed = true;
    }

    /// Sets the initial value (zero if `None`). A second call replaces the
    /// first snapshot instead of appending a new one.
    pub fn set_initial_value(&mut self, value: Option<&[f64]>, t0: f64) -> Result<()> {
        match value {
            Some(v) if v.len() != self.size() => {
                return Err(FvmError::config(format!(
                    "initial value has {} elements, quantity has {}",
                    v.len(),
                    self.size()
                )));
            }
            Some(v) => self.data.copy_from_slice(v),
            None => self.data.fill(0.0),
        }
        self.old_data.copy_from_slice(&self.data);
        self.old_time = t0;
        self.has_changed = true;

        if self.has_initial_value {
            self.times[0] = t0;
            self.snapshots[0].copy_from_slice(&self.data);
        } else {
            self.times.insert(0, t0);
            self.snapshots.insert(0, self.data.clone());
            self.has_initial_value = true;
        }
        Ok(())
    }

    pub fn history_times(&self) -> &[f64] {
        &self.times
    }

    pub fn history(&self) -> &[Vec<f64>] {
        &self.snapshots
    }

    /// Output shape `[nt, nMultiples?, nr, n2?, n1?]`, with `+1` on the
    /// dimension carrying fluxes. Momentum dimensions are only present when
    /// the momentum grid has more than one cell.
    pub fn history_dims(&self) -> Vec<usize> {
        let (nr, n1, n2) = self.grid_dims;
        let mut dims = vec![self.times.len()];
        if self.n_multiples > 1 {
            dims.push(self.n_multiples);
        }
        let radial_extra = usize::from(self.flux_grid_type == FluxGridType::RadialFlux);
        dims.push(nr + radial_extra);
        if n1 > 1 || n2 > 1 {
            dims.push(n2 + usize::from(self.flux_grid_type == FluxGridType::P2Flux));
            dims.push(n1 + usize::from(self.flux_grid_type == FluxGridType::P1Flux));
        }
        dims
    }
}

/// A named unknown with a fixed ID.
#[derive(Clone, Debug)]
pub struct UnknownQuantity {
    pub name: String,
    pub description: String,
    pub id: usize,
    pub data: QuantityData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{cartesian_grid, fluid_grid};

    #[test]
    fn buffer_length_follows_layout() {
        let grid = cartesian_grid(2, 3, 4).unwrap();
        let q = QuantityData::new(&grid, 2, FluxGridType::P1Flux).unwrap();
        assert_eq!(q.size(), 2 * grid.ncells_f1());
        assert!(QuantityData::new(&grid, 0, FluxGridType::Distribution).is_err());
    }

    #[test]
    fn store_and_save_step() {
        let grid = fluid_grid(3, 1.0).unwrap();
        let mut q = QuantityData::new(&grid, 1, FluxGridType::Distribution).unwrap();
        q.set_initial_value(Some(&[1.0, 2.0, 3.0]), 0.0).unwrap();

        q.store(&[9.0, 4.0, 5.0, 6.0], 1, false).unwrap();
        assert_eq!(q.data(), &[4.0, 5.0, 6.0]);
        assert_eq!(q.previous(), &[1.0, 2.0, 3.0]);

        q.store(&[4.0, 5.0, 6.0], 0, true).unwrap();
        assert!(!q.has_changed());
        assert!(q.store(&[1.0], 0, false).is_err());

        q.save_step(0.5, false);
        assert_eq!(q.previous(), &[4.0, 5.0, 6.0]);
        assert_eq!(q.history().len(), 1);
        q.save_step(1.0, true);
        assert_eq!(q.history_times(), &[0.0, 1.0]);
    }

    #[test]
    fn initial_value_is_overwritten() {
        let grid = fluid_grid(2, 1.0).unwrap();
        let mut q = QuantityData::new(&grid, 1, FluxGridType::Distribution).unwrap();
        q.set_initial_value(None, 0.0).unwrap();
        q.set_initial_value(Some(&[1.0, 1.0]), 0.1).unwrap();
        assert_eq!(q.history().len(), 1);
        assert_eq!(q.history_times(), &[0.1]);
        assert_eq!(q.history()[0], vec![1.0, 1.0]);
    }

    #[test]
    fn restore_rolls_back() {
        let grid = fluid_grid(1, 1.0).unwrap();
        let mut q = QuantityData::new(&grid, 1, FluxGridType::Distribution).unwrap();
        q.set_initial_value(Some(&[2.0]), 0.0).unwrap();
        q.store(&[3.0], 0, false).unwrap();
        q.restore();
        assert_eq!(q.data(), &[2.0]);
    }

    #[test]
    fn history_dims_layout() {
        let fluid = fluid_grid(4, 1.0).unwrap();
        let mut ions = QuantityData::new(&fluid, 3, FluxGridType::Distribution).unwrap();
        ions.set_initial_value(None, 0.0).unwrap();
        assert_eq!(ions.history_dims(), vec![1, 3, 4]);

        let kinetic = cartesian_grid(2, 5, 3).unwrap();
        let f = QuantityData::new(&kinetic, 1, FluxGridType::Distribution).unwrap();
        assert_eq!(f.history_dims(), vec![0, 2, 3, 5]);
        let fr = QuantityData::new(&kinetic, 1, FluxGridType::RadialFlux).unwrap();
        assert_eq!(fr.history_dims(), vec![0, 3, 3, 5]);
        let f1 = QuantityData::new(&kinetic, 1, FluxGridType::P1Flux).unwrap();
        assert_eq!(f1.history_dims(), vec![0, 2, 3, 6]);
    }
}
