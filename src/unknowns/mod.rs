pub mod quantity;

use std::collections::HashMap;

use crate::discretization::Grid;
use crate::error::{FvmError, Result};

pub use quantity::{FluxGridType, QuantityData, UnknownQuantity};

/// Registry of all unknown quantities of an equation system, addressed by
/// the ID handed out by [`UnknownQuantityHandler::insert`].
#[derive(Clone, Debug, Default)]
pub struct UnknownQuantityHandler {
    unknowns: Vec<UnknownQuantity>,
    ids: HashMap<String, usize>,
}

impl UnknownQuantityHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new unknown and returns its ID.
    pub fn insert(
        &mut self,
        name: &str,
        description: &str,
        grid: &Grid,
        n_multiples: usize,
        flux_grid_type: FluxGridType,
    ) -> Result<usize> {
        if self.ids.contains_key(name) {
            return Err(FvmError::config(format!("unknown quantity '{name}' already defined")));
        }
        let id = self.unknowns.len();
        self.unknowns.push(UnknownQuantity {
            name: name.to_string(),
            description: description.to_string(),
            id,
            data: QuantityData::new(grid, n_multiples, flux_grid_type)?,
        });
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn id_of(&self, name: &str) -> Result<usize> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| FvmError::config(format!("no unknown quantity named '{name}'")))
    }

    pub fn get(&self, id: usize) -> Result<&UnknownQuantity> {
        self.unknowns
            .get(id)
            .ok_or_else(|| FvmError::config(format!("no unknown quantity with ID {id}")))
    }

    fn get_mut(&mut self, id: usize) -> Result<&mut UnknownQuantity> {
        self.unknowns
            .get_mut(id)
            .ok_or_else(|| FvmError::config(format!("no unknown quantity with ID {id}")))
    }

    pub fn name(&self, id: usize) -> Result<&str> {
        Ok(&self.get(id)?.name)
    }

    pub fn size(&self, id: usize) -> Result<usize> {
        Ok(self.get(id)?.data.size())
    }

    pub fn get_unknown_data(&self, id: usize) -> Result<&[f64]> {
        Ok(self.get(id)?.data.data())
    }

    pub fn get_unknown_data_previous(&self, id: usize) -> Result<&[f64]> {
        Ok(self.get(id)?.data.previous())
    }

    pub fn store(&mut self, id: usize, vec: &[f64], offset: usize, may_be_constant: bool) -> Result<()> {
        self.get_mut(id)?.data.store(vec, offset, may_be_constant)
    }

    pub fn set_initial_value(&mut self, id: usize, value: Option<&[f64]>, t0: f64) -> Result<()> {
        self.get_mut(id)?.data.set_initial_value(value, t0)
    }

    pub fn save_step(&mut self, t: f64, true_save: bool) {
        for uqty in &mut self.unknowns {
            uqty.data.save_step(t, true_save);
        }
    }

    pub fn restore(&mut self) {
        for uqty in &mut self.unknowns {
            uqty.data.restore();
        }
    }

    pub fn len(&self) -> usize {
        self.unknowns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unknowns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnknownQuantity> {
        self.unknowns.iter()
    }
}
