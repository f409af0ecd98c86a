use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;

use crate::error::{FvmError, Result};

/// How `set_element` combines a value with what is already stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertMode {
    Add,
    Insert,
}

/// Contiguous row/column range reserved for one unknown quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubEquation {
    pub offset: usize,
    pub size: usize,
    pub nnz_per_row: usize,
}

/// Square sparse matrix partitioned into sub-equation blocks.
///
/// Values are staged row by row while terms write into the matrix and are
/// compressed into a [`CsrMatrix`] by [`BlockMatrix::assemble`]. Add and
/// insert writes may not be mixed without a [`BlockMatrix::partial_assemble`]
/// in between.
#[derive(Clone, Debug, Default)]
pub struct BlockMatrix {
    sub_equations: Vec<SubEquation>,
    size: usize,
    constructed: bool,
    rows: Vec<Vec<(usize, f64)>>,
    pending_mode: Option<InsertMode>,
    assembled: Option<CsrMatrix<f64>>,
}

impl BlockMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next `size` rows and columns; returns the sub-equation index.
    pub fn create_sub_equation(&mut self, size: usize, nnz_per_row: usize) -> Result<usize> {
        if self.constructed {
            return Err(FvmError::config(
                "cannot create a sub-equation after the system has been constructed",
            ));
        }
        if size == 0 {
            return Err(FvmError::config("sub-equation size must be positive"));
        }
        self.sub_equations.push(SubEquation {
            offset: self.size,
            size,
            nnz_per_row,
        });
        self.size += size;
        Ok(self.sub_equations.len() - 1)
    }

    /// Fixes the layout and allocates the staging rows.
    pub fn construct_system(&mut self) -> Result<()> {
        if self.constructed {
            return Err(FvmError::config("block matrix has already been constructed"));
        }
        if self.sub_equations.is_empty() {
            return Err(FvmError::config(
                "block matrix needs at least one sub-equation before construction",
            ));
        }
        let mut rows = Vec::with_capacity(self.size);
        for eq in &self.sub_equations {
            for _ in 0..eq.size {
                rows.push(Vec::with_capacity(eq.nnz_per_row));
            }
        }
        self.rows = rows;
        self.constructed = true;
        log::debug!(
            "block matrix constructed: {} sub-equations, size {}",
            self.sub_equations.len(),
            self.size
        );
        Ok(())
    }

    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    pub fn n_sub_equations(&self) -> usize {
        self.sub_equations.len()
    }

    /// Total number of rows (and columns).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sub_equation(&self, block: usize) -> Result<&SubEquation> {
        self.sub_equations.get(block).ok_or(FvmError::InvalidBlock {
            index: block,
            count: self.sub_equations.len(),
        })
    }

    /// Global index of the first row of `block`.
    pub fn get_offset(&self, block: usize) -> Result<usize> {
        Ok(self.sub_equation(block)?.offset)
    }

    fn ensure_constructed(&self) -> Result<()> {
        if self.constructed {
            Ok(())
        } else {
            Err(FvmError::NotConstructed)
        }
    }

    /// Returns a view addressing the `(row_block, col_block)` block with block-local indices.
    pub fn select_sub_equation(&mut self, row_block: usize, col_block: usize) -> Result<BlockView<'_>> {
        self.ensure_constructed()?;
        let row = *self.sub_equation(row_block)?;
        let col = *self.sub_equation(col_block)?;
        Ok(BlockView {
            matrix: self,
            row_offset: row.offset,
            col_offset: col.offset,
            nrows: row.size,
            ncols: col.size,
        })
    }

    /// Writes one element using global indices.
    pub fn set_element(&mut self, row: usize, col: usize, value: f64, mode: InsertMode) -> Result<()> {
        self.ensure_constructed()?;
        if row >= self.size || col >= self.size {
            return Err(FvmError::config(format!(
                "element ({row}, {col}) outside matrix of size {}",
                self.size
            )));
        }
        match self.pending_mode {
            Some(m) if m != mode => {
                return Err(FvmError::config(
                    "add and insert writes must be separated by a partial assembly",
                ));
            }
            _ => self.pending_mode = Some(mode),
        }
        self.assembled = None;

        let entries = &mut self.rows[row];
        match entries.iter_mut().find(|(c, _)| *c == col) {
            Some((_, v)) => match mode {
                InsertMode::Add => *v += value,
                InsertMode::Insert => *v = value,
            },
            None => entries.push((col, value)),
        }
        Ok(())
    }

    /// Stored value at `(row, col)`, zero if the entry is absent.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows
            .get(row)
            .and_then(|r| r.iter().find(|(c, _)| *c == col))
            .map_or(0.0, |(_, v)| *v)
    }

    /// Sets all stored values to zero, keeping the sparsity pattern.
    pub fn zero(&mut self) -> Result<()> {
        self.ensure_constructed()?;
        for row in &mut self.rows {
            for (_, v) in row.iter_mut() {
                *v = 0.0;
            }
        }
        self.pending_mode = None;
        self.assembled = None;
        Ok(())
    }

    /// Zeroes the entries of global row `row` whose column lies in `cols`.
    pub fn zero_row(&mut self, row: usize, cols: std::ops::Range<usize>) -> Result<()> {
        self.ensure_constructed()?;
        let entries = self.rows.get_mut(row).ok_or_else(|| {
            FvmError::config(format!("row {row} outside matrix of size {}", self.size))
        })?;
        for (c, v) in entries.iter_mut() {
            if cols.contains(c) {
                *v = 0.0;
            }
        }
        self.assembled = None;
        Ok(())
    }

    /// Ends the current add/insert phase so the next one may use another mode.
    pub fn partial_assemble(&mut self) -> Result<()> {
        self.ensure_constructed()?;
        self.pending_mode = None;
        Ok(())
    }

    /// Compresses the staged values into CSR form.
    pub fn assemble(&mut self) -> Result<()> {
        self.ensure_constructed()?;
        self.pending_mode = None;

        let nnz: usize = self.rows.iter().map(Vec::len).sum();
        let mut row_offsets = Vec::with_capacity(self.size + 1);
        let mut col_indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        row_offsets.push(0);
        for row in &mut self.rows {
            row.sort_unstable_by_key(|(c, _)| *c);
            for (c, v) in row.iter() {
                col_indices.push(*c);
                values.push(*v);
            }
            row_offsets.push(col_indices.len());
        }

        let csr = CsrMatrix::try_from_csr_data(self.size, self.size, row_offsets, col_indices, values)
            .map_err(|e| FvmError::numeric(format!("failed to assemble block matrix: {e}")))?;
        self.assembled = Some(csr);
        Ok(())
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled.is_some()
    }

    /// The assembled matrix. Fails if there were writes since the last [`BlockMatrix::assemble`].
    pub fn csr(&self) -> Result<&CsrMatrix<f64>> {
        self.ensure_constructed()?;
        self.assembled
            .as_ref()
            .ok_or_else(|| FvmError::config("block matrix must be assembled before use"))
    }

    pub fn to_dense(&self) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from(self.csr()?))
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn mul_vec(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        let csr = self.csr()?;
        if x.len() != self.size {
            return Err(FvmError::config(format!(
                "vector of length {} applied to matrix of size {}",
                x.len(),
                self.size
            )));
        }
        Ok(csr * x)
    }

    /// Replaces `A` by `diag(rows) * A * diag(cols)`, both in the staged and the assembled form.
    pub fn scale(&mut self, rows: &[f64], cols: &[f64]) -> Result<()> {
        self.ensure_constructed()?;
        if rows.len() != self.size || cols.len() != self.size {
            return Err(FvmError::config("scaling vectors must match the matrix size"));
        }
        for (i, row) in self.rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut() {
                *v *= rows[i] * cols[*c];
            }
        }
        if let Some(csr) = self.assembled.as_mut() {
            let offsets = csr.row_offsets().to_vec();
            let cols_idx = csr.col_indices().to_vec();
            let values = csr.values_mut();
            for i in 0..offsets.len() - 1 {
                for k in offsets[i]..offsets[i + 1] {
                    values[k] *= rows[i] * cols[cols_idx[k]];
                }
            }
        }
        Ok(())
    }
}

/// Block-local addressing into a [`BlockMatrix`], produced by
/// [`BlockMatrix::select_sub_equation`]. Offsets travel with the view, so
/// nothing has to be restored after use.
pub struct BlockView<'a> {
    matrix: &'a mut BlockMatrix,
    row_offset: usize,
    col_offset: usize,
    nrows: usize,
    ncols: usize,
}

impl BlockView<'_> {
    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    pub fn col_offset(&self) -> usize {
        self.col_offset
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    fn check(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.nrows || col >= self.ncols {
            return Err(FvmError::config(format!(
                "element ({row}, {col}) outside {}x{} block at ({}, {})",
                self.nrows, self.ncols, self.row_offset, self.col_offset
            )));
        }
        Ok(())
    }

    /// Adds `value` to the block-local element `(row, col)`.
    pub fn set_element(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.check(row, col)?;
        self.matrix
            .set_element(self.row_offset + row, self.col_offset + col, value, InsertMode::Add)
    }

    /// Overwrites the block-local element `(row, col)`.
    pub fn insert_element(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.check(row, col)?;
        self.matrix
            .set_element(self.row_offset + row, self.col_offset + col, value, InsertMode::Insert)
    }

    /// Zeroes block-local row `row` within this block's columns only.
    pub fn zero_row(&mut self, row: usize) -> Result<()> {
        self.check(row, 0)?;
        self.matrix
            .zero_row(self.row_offset + row, self.col_offset..self.col_offset + self.ncols)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.matrix.get(self.row_offset + row, self.col_offset + col)
    }
}
