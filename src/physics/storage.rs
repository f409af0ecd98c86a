use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::discretization::Grid;
use crate::error::{FvmError, Result};

/// Handle through which a coefficient buffer is lent to other terms.
pub type SharedCoefficients<T> = Rc<RefCell<T>>;

/// A set of grid-shaped coefficient arrays.
pub trait CoefficientSet {
    fn allocate(grid: &Grid) -> Self;

    /// Restores the value the set holds right after allocation.
    fn reset(&mut self);

    fn matches(&self, grid: &Grid) -> bool;

    /// Re-derives all arrays from `grid`; returns true if any allocation changed.
    fn reshape(&mut self, grid: &Grid) -> bool;
}

/// Ownership of a term's coefficient buffer.
///
/// Only the owner resets or reallocates a buffer. A borrower never resizes
/// it and only writes into it while its owner drives the rebuild, so at any
/// moment a buffer has at most one writer. The `RefCell` turns a violation
/// of that rule into a [`FvmError::Configuration`] instead of aliasing.
pub enum CoefficientStorage<T> {
    Owned(SharedCoefficients<T>),
    Borrowed(SharedCoefficients<T>),
}

impl<T: CoefficientSet> CoefficientStorage<T> {
    pub fn owned(grid: &Grid) -> Self {
        CoefficientStorage::Owned(Rc::new(RefCell::new(T::allocate(grid))))
    }

    /// Borrows a buffer owned elsewhere; its shape must match `grid`.
    pub fn borrowed(handle: SharedCoefficients<T>, grid: &Grid, name: &str) -> Result<Self> {
        let storage = CoefficientStorage::Borrowed(handle);
        storage.check_shape(grid, name)?;
        Ok(storage)
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, CoefficientStorage::Borrowed(_))
    }

    fn cell(&self) -> &RefCell<T> {
        match self {
            CoefficientStorage::Owned(c) | CoefficientStorage::Borrowed(c) => c,
        }
    }

    pub fn read(&self) -> Result<Ref<'_, T>> {
        self.cell()
            .try_borrow()
            .map_err(|_| FvmError::config("coefficient buffer is being written while read"))
    }

    pub fn write(&self) -> Result<RefMut<'_, T>> {
        self.cell()
            .try_borrow_mut()
            .map_err(|_| FvmError::config("coefficient buffer already has an active writer"))
    }

    /// A handle for lending the buffer to a borrower. Only owners may lend.
    pub fn share(&self) -> Result<SharedCoefficients<T>> {
        match self {
            CoefficientStorage::Owned(c) => Ok(Rc::clone(c)),
            CoefficientStorage::Borrowed(_) => Err(FvmError::config(
                "a borrowed coefficient buffer cannot be lent on",
            )),
        }
    }

    /// Owner-only reset to the allocation value.
    pub fn reset(&self) -> Result<()> {
        match self {
            CoefficientStorage::Owned(_) => {
                self.write()?.reset();
                Ok(())
            }
            CoefficientStorage::Borrowed(_) => Err(FvmError::config(
                "only the owner may reset a shared coefficient buffer",
            )),
        }
    }

    pub fn check_shape(&self, grid: &Grid, name: &str) -> Result<()> {
        if self.read()?.matches(grid) {
            Ok(())
        } else {
            Err(FvmError::config(format!(
                "{name}: shared coefficient buffer does not match the grid shape"
            )))
        }
    }

    /// Follows a grid rebuild: owned buffers are reshaped and zeroed,
    /// borrowed buffers must already have been reshaped by their owner.
    pub fn grid_rebuilt(&self, grid: &Grid, name: &str) -> Result<bool> {
        match self {
            CoefficientStorage::Owned(_) => Ok(self.write()?.reshape(grid)),
            CoefficientStorage::Borrowed(_) => {
                self.check_shape(grid, name)?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::cartesian_grid;
    use crate::physics::advection::AdvectionCoefficients;

    #[test]
    fn borrowed_buffer_follows_owner() {
        let grid = cartesian_grid(1, 3, 1).unwrap();
        let owner = CoefficientStorage::<AdvectionCoefficients>::owned(&grid);
        let borrower = CoefficientStorage::borrowed(owner.share().unwrap(), &grid, "f").unwrap();
        assert!(borrower.is_shared());
        assert!(borrower.share().is_err());
        assert!(borrower.reset().is_err());

        owner.write().unwrap().f1.at_mut(0)[1] = 2.0;
        assert_eq!(borrower.read().unwrap().f1.at(0)[1], 2.0);
    }

    #[test]
    fn concurrent_writer_is_a_configuration_error() {
        let grid = cartesian_grid(1, 2, 1).unwrap();
        let owner = CoefficientStorage::<AdvectionCoefficients>::owned(&grid);
        let borrower = CoefficientStorage::borrowed(owner.share().unwrap(), &grid, "f").unwrap();
        let _guard = owner.write().unwrap();
        assert!(matches!(borrower.write(), Err(FvmError::Configuration(_))));
        assert!(matches!(borrower.read(), Err(FvmError::Configuration(_))));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let small = cartesian_grid(1, 2, 1).unwrap();
        let large = cartesian_grid(1, 4, 1).unwrap();
        let owner = CoefficientStorage::<AdvectionCoefficients>::owned(&small);
        assert!(matches!(
            CoefficientStorage::borrowed(owner.share().unwrap(), &large, "f"),
            Err(FvmError::Configuration(_))
        ));

        let borrower = CoefficientStorage::borrowed(owner.share().unwrap(), &small, "f").unwrap();
        // The borrower notices the stale buffer before the owner reshapes it.
        assert!(borrower.grid_rebuilt(&large, "f").is_err());
        assert!(owner.grid_rebuilt(&large, "f").unwrap());
        assert!(!borrower.grid_rebuilt(&large, "f").unwrap());
    }
}
