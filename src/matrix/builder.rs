//! Accumulation structure for assembling sparse matrices from many small
//! local contributions.

use std::collections::BTreeMap;

use crate::core::budget::{entry_bytes, value_bytes};
use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::matrix::sparse::SparseMatrix;

/// Row-wise accumulator. `compile` turns it into the compact MCSR layout;
/// compiling twice without intervening changes yields equal matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBuilder<T> {
    n: usize,
    diag: Vec<T>,
    rows: Vec<BTreeMap<usize, T>>,
}

impl<T: Scalar> MatrixBuilder<T> {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            diag: vec![T::zero(); n],
            rows: vec![BTreeMap::new(); n],
        }
    }

    /// Starts from the entries of a compiled matrix.
    pub fn from_matrix(m: &SparseMatrix<T>) -> Self {
        let n = m.dim();
        let rows = (0..n).map(|i| m.row(i).collect()).collect();
        Self {
            n,
            diag: m.diagonal().to_vec(),
            rows,
        }
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    fn check_index(&self, row: usize, col: usize) -> Result<(), EqError> {
        if row >= self.n {
            return Err(EqError::out_of_range("row", row, self.n));
        }
        if col >= self.n {
            return Err(EqError::out_of_range("column", col, self.n));
        }
        Ok(())
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<(), EqError> {
        self.check_index(row, col)?;
        if row == col {
            self.diag[row] = value;
        } else {
            self.rows[row].insert(col, value);
        }
        Ok(())
    }

    pub fn add(&mut self, row: usize, col: usize, value: T) -> Result<(), EqError> {
        self.check_index(row, col)?;
        if row == col {
            self.diag[row] += value;
        } else {
            *self.rows[row].entry(col).or_insert_with(T::zero) += value;
        }
        Ok(())
    }

    pub fn get(&self, row: usize, col: usize) -> Result<T, EqError> {
        self.check_index(row, col)?;
        if row == col {
            return Ok(self.diag[row]);
        }
        Ok(self.rows[row].get(&col).copied().unwrap_or_else(T::zero))
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.diag.iter_mut().for_each(|d| *d = T::zero());
        self.rows.iter_mut().for_each(BTreeMap::clear);
    }

    /// Zeroes every value but keeps the sparsity pattern.
    pub fn zero_values(&mut self) {
        self.diag.iter_mut().for_each(|d| *d = T::zero());
        for row in &mut self.rows {
            row.values_mut().for_each(|v| *v = T::zero());
        }
    }

    /// True when no off-diagonal entry is stored and the diagonal is zero.
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(BTreeMap::is_empty) && self.diag.iter().all(|d| *d == T::zero())
    }

    /// True when the builder holds exactly the identity.
    pub fn is_identity(&self) -> bool {
        self.rows
            .iter()
            .all(|r| r.values().all(|v| *v == T::zero()))
            && self.diag.iter().all(|d| *d == T::one())
    }

    pub fn off_diagonal_nnz(&self) -> usize {
        self.rows.iter().map(BTreeMap::len).sum()
    }

    /// Stored `(row, col, value)` triplets: the nonzero diagonal plus every
    /// off-diagonal entry, by row.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        self.rows.iter().enumerate().flat_map(move |(i, row)| {
            let d = self.diag[i];
            let diag = (d != T::zero()).then_some((i, i, d));
            diag.into_iter()
                .chain(row.iter().map(move |(&j, &v)| (i, j, v)))
        })
    }

    /// Converts to the compact MCSR layout.
    pub fn compile(&self) -> SparseMatrix<T> {
        SparseMatrix::from_row_maps(self.diag.clone(), self.rows.clone())
    }

    pub fn memory_bytes(&self) -> u64 {
        value_bytes::<T>(self.n) + entry_bytes::<T>(self.off_diagonal_nnz())
    }
}
