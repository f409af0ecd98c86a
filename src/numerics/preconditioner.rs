use std::collections::HashMap;

use crate::error::{FvmError, Result};
use crate::numerics::block_matrix::BlockMatrix;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreconditionerSettings {
    pub enabled: bool,
    /// Row scale per unknown ID (applied to that unknown's equation).
    pub equation_scales: HashMap<usize, f64>,
    /// Column scale per unknown ID.
    pub unknown_scales: HashMap<usize, f64>,
    /// Scales every row by the inverse magnitude of its diagonal, on top of
    /// the equation scales.
    pub jacobi: bool,
}

/// Diagonal rescaling `A' = R A C`, `b' = R b`, `x = C x'`.
#[derive(Clone, Debug)]
pub struct DiagonalPreconditioner {
    settings: PreconditionerSettings,
    rows: Vec<f64>,
    cols: Vec<f64>,
    /// Row scales of the last `precondition` call, Jacobi factors included.
    applied: Vec<f64>,
}

impl DiagonalPreconditioner {
    /// `blocks` lists `(unknown ID, offset, size)` of every sub-equation.
    pub fn new(settings: PreconditionerSettings, blocks: &[(usize, usize, usize)]) -> Result<Self> {
        let size = blocks.iter().map(|(_, o, s)| o + s).max().unwrap_or(0);
        let mut rows = vec![1.0; size];
        let mut cols = vec![1.0; size];
        for &(id, offset, n) in blocks {
            let r = settings.equation_scales.get(&id).copied().unwrap_or(1.0);
            let c = settings.unknown_scales.get(&id).copied().unwrap_or(1.0);
            if r == 0.0 || c == 0.0 || !r.is_finite() || !c.is_finite() {
                return Err(FvmError::config(format!("invalid preconditioner scale for unknown {id}")));
            }
            rows[offset..offset + n].fill(r);
            cols[offset..offset + n].fill(c);
        }
        Ok(Self {
            settings,
            rows,
            cols,
            applied: Vec::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Scales an assembled matrix and its right-hand side in place.
    pub fn precondition(&mut self, mat: &mut BlockMatrix, rhs: &mut [f64]) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }
        let mut rows = self.rows.clone();
        if self.settings.jacobi {
            for (i, r) in rows.iter_mut().enumerate() {
                let d = (mat.get(i, i) * self.cols[i]).abs();
                if d > 1e-300 {
                    *r /= d;
                }
            }
        }
        mat.scale(&rows, &self.cols)?;
        for (b, r) in rhs.iter_mut().zip(&rows) {
            *b *= r;
        }
        self.applied = rows;
        Ok(())
    }

    /// Undoes the scaling of the last [`DiagonalPreconditioner::precondition`]
    /// call on the same matrix.
    pub fn restore(&self, mat: &mut BlockMatrix) -> Result<()> {
        if !self.settings.enabled || self.applied.is_empty() {
            return Ok(());
        }
        let rows: Vec<f64> = self.applied.iter().map(|r| 1.0 / r).collect();
        let cols: Vec<f64> = self.cols.iter().map(|c| 1.0 / c).collect();
        mat.scale(&rows, &cols)
    }

    /// Maps the solution of the scaled system back to the unknowns.
    pub fn unprecondition(&self, x: &mut [f64]) {
        if !self.settings.enabled {
            return;
        }
        for (v, c) in x.iter_mut().zip(&self.cols) {
            *v *= c;
        }
    }
}
