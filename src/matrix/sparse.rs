//! Modified compressed sparse row (MCSR) matrix.
//!
//! The diagonal is stored densely and is always present (possibly zero).
//! Off-diagonal entries of every row are stored in `col_idx`/`values`,
//! delimited by `row_ptr`, with strictly increasing column indices below `n`.
//! Matrices are normally produced by [`MatrixBuilder::compile`] from an
//! accumulation structure; every constructor upholds the layout invariant.
//!
//! [`MatrixBuilder::compile`]: crate::matrix::builder::MatrixBuilder::compile

use std::collections::BTreeMap;

use crate::core::budget::{entry_bytes, value_bytes};
use crate::core::traits::{Indexing, MatVec, Scalar};
use crate::error::EqError;
use crate::matrix::builder::MatrixBuilder;
use crate::matrix::permutation::Permutation;

#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<T> {
    n: usize,
    diag: Vec<T>,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

impl<T: Scalar> SparseMatrix<T> {
    /// The n×n zero matrix (diagonal stored as explicit zeros).
    pub fn new(n: usize) -> Self {
        Self {
            n,
            diag: vec![T::zero(); n],
            row_ptr: vec![0; n + 1],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn identity(n: usize) -> Self {
        Self::from_diagonal(vec![T::one(); n])
    }

    pub fn from_diagonal(diag: Vec<T>) -> Self {
        let n = diag.len();
        Self {
            n,
            diag,
            row_ptr: vec![0; n + 1],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Accumulates `(row, col, value)` triplets; duplicates are summed.
    pub fn from_triplets<I>(n: usize, triplets: I) -> Result<Self, EqError>
    where
        I: IntoIterator<Item = (usize, usize, T)>,
    {
        let mut builder = MatrixBuilder::new(n);
        for (row, col, value) in triplets {
            builder.add(row, col, value)?;
        }
        Ok(builder.compile())
    }

    /// Builds from a dense diagonal plus per-row maps of off-diagonal entries.
    /// Any diagonal key present in a row map is folded into the diagonal.
    pub(crate) fn from_row_maps(mut diag: Vec<T>, rows: Vec<BTreeMap<usize, T>>) -> Self {
        let n = diag.len();
        debug_assert_eq!(rows.len(), n);
        let nnz: usize = rows.iter().map(|r| r.len()).sum();
        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        row_ptr.push(0);
        for (i, row) in rows.into_iter().enumerate() {
            for (j, v) in row {
                if j == i {
                    diag[i] += v;
                } else {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Self {
            n,
            diag,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Full rows as maps, diagonal included.
    pub(crate) fn to_row_maps(&self) -> Vec<BTreeMap<usize, T>> {
        (0..self.n)
            .map(|i| self.row_with_diagonal(i).collect())
            .collect()
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Stored entries, counting the whole diagonal.
    pub fn nnz(&self) -> usize {
        self.n + self.values.len()
    }

    pub fn off_diagonal_nnz(&self) -> usize {
        self.values.len()
    }

    pub fn diagonal(&self) -> &[T] {
        &self.diag
    }

    pub fn is_diagonal(&self) -> bool {
        self.values.is_empty()
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_idx
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Off-diagonal `(col, value)` pairs of `row`, by increasing column.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// All `(col, value)` pairs of `row`, diagonal included, by increasing column.
    pub fn row_with_diagonal(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        let split = start + self.col_idx[start..end].partition_point(|&c| c < row);
        let lower = (start..split).map(move |k| (self.col_idx[k], self.values[k]));
        let upper = (split..end).map(move |k| (self.col_idx[k], self.values[k]));
        lower
            .chain(std::iter::once((row, self.diag[row])))
            .chain(upper)
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

    /// Position of an off-diagonal entry in `values`, or the insertion point.
    fn locate(&self, row: usize, col: usize) -> Result<usize, usize> {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.col_idx[start..end]
            .binary_search(&col)
            .map(|k| start + k)
            .map_err(|k| start + k)
    }

    /// Reads an entry; absent entries read as zero.
    pub fn get(&self, row: usize, col: usize) -> Result<T, EqError> {
        self.check_index(row, col)?;
        if row == col {
            return Ok(self.diag[row]);
        }
        Ok(self.locate(row, col).map_or(T::zero(), |k| self.values[k]))
    }

    /// Creates or overwrites an entry.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<(), EqError> {
        self.check_index(row, col)?;
        if row == col {
            self.diag[row] = value;
            return Ok(());
        }
        match self.locate(row, col) {
            Ok(k) => self.values[k] = value,
            Err(k) => self.insert_at(row, k, col, value),
        }
        Ok(())
    }

    /// Accumulates into an entry, creating it if absent.
    pub fn add(&mut self, row: usize, col: usize, value: T) -> Result<(), EqError> {
        self.check_index(row, col)?;
        if row == col {
            self.diag[row] += value;
            return Ok(());
        }
        match self.locate(row, col) {
            Ok(k) => self.values[k] += value,
            Err(k) => self.insert_at(row, k, col, value),
        }
        Ok(())
    }

    fn insert_at(&mut self, row: usize, pos: usize, col: usize, value: T) {
        self.col_idx.insert(pos, col);
        self.values.insert(pos, value);
        for p in &mut self.row_ptr[row + 1..] {
            *p += 1;
        }
    }

    /// y = A·x with a dimension check.
    pub fn mul_vec(&self, x: &[T]) -> Result<Vec<T>, EqError> {
        EqError::dims(self.n, x.len())?;
        let mut y = vec![T::zero(); self.n];
        self.matvec(x, &mut y);
        Ok(y)
    }

    /// C = self · other.
    pub fn matrix_product(&self, other: &Self) -> Result<Self, EqError> {
        EqError::dims(self.n, other.n)?;
        let mut rows = Vec::with_capacity(self.n);
        let mut diag = vec![T::zero(); self.n];
        for i in 0..self.n {
            let mut acc: BTreeMap<usize, T> = BTreeMap::new();
            for (k, a_ik) in self.row_with_diagonal(i) {
                if a_ik == T::zero() {
                    continue;
                }
                for (j, b_kj) in other.row_with_diagonal(k) {
                    if b_kj == T::zero() {
                        continue;
                    }
                    *acc.entry(j).or_insert_with(T::zero) += a_ik * b_kj;
                }
            }
            if let Some(d) = acc.remove(&i) {
                diag[i] = d;
            }
            rows.push(acc);
        }
        Ok(Self::from_row_maps(diag, rows))
    }

    /// C = a·A + b·B, merging the row patterns.
    pub fn linear_combination(a: T, ma: &Self, b: T, mb: &Self) -> Result<Self, EqError> {
        EqError::dims(ma.n, mb.n)?;
        let n = ma.n;
        let diag = ma
            .diag
            .iter()
            .zip(&mb.diag)
            .map(|(&x, &y)| a * x + b * y)
            .collect();
        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::with_capacity(ma.values.len() + mb.values.len());
        let mut values = Vec::with_capacity(ma.values.len() + mb.values.len());
        row_ptr.push(0);
        for i in 0..n {
            let (mut p, pe) = (ma.row_ptr[i], ma.row_ptr[i + 1]);
            let (mut q, qe) = (mb.row_ptr[i], mb.row_ptr[i + 1]);
            while p < pe || q < qe {
                let cp = if p < pe { ma.col_idx[p] } else { usize::MAX };
                let cq = if q < qe { mb.col_idx[q] } else { usize::MAX };
                if cp < cq {
                    col_idx.push(cp);
                    values.push(a * ma.values[p]);
                    p += 1;
                } else if cq < cp {
                    col_idx.push(cq);
                    values.push(b * mb.values[q]);
                    q += 1;
                } else {
                    col_idx.push(cp);
                    values.push(a * ma.values[p] + b * mb.values[q]);
                    p += 1;
                    q += 1;
                }
            }
            row_ptr.push(col_idx.len());
        }
        Ok(Self {
            n,
            diag,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// A⁻¹. Diagonal matrices invert entry-wise; general matrices by
    /// Gauss–Jordan elimination on `[A | I]` with partial pivoting, so zero
    /// diagonals (a variable swap, say) are fine as long as A is nonsingular.
    pub fn invert(&self) -> Result<Self, EqError> {
        if self.is_diagonal() {
            let mut diag = Vec::with_capacity(self.n);
            for (i, &d) in self.diag.iter().enumerate() {
                if d == T::zero() {
                    return Err(EqError::ZeroPivot { row: i });
                }
                diag.push(d.inv());
            }
            return Ok(Self::from_diagonal(diag));
        }

        let n = self.n;
        let mut rows = self.to_row_maps();
        let mut inv: Vec<BTreeMap<usize, T>> =
            (0..n).map(|i| BTreeMap::from([(i, T::one())])).collect();
        for k in 0..n {
            let pivot = (k..n)
                .filter_map(|i| rows[i].get(&k).map(|v| (i, v.abs())))
                .filter(|&(_, m)| m > 0.0)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
                .ok_or(EqError::ZeroPivot { row: k })?;
            rows.swap(k, pivot);
            inv.swap(k, pivot);

            let d = rows[k].remove(&k).ok_or(EqError::ZeroPivot { row: k })?.inv();
            rows[k].values_mut().for_each(|v| *v *= d);
            inv[k].values_mut().for_each(|v| *v *= d);
            let pivot_row: Vec<(usize, T)> = rows[k].iter().map(|(&c, &v)| (c, v)).collect();
            let pivot_inv: Vec<(usize, T)> = inv[k].iter().map(|(&c, &v)| (c, v)).collect();
            for i in (0..n).filter(|&i| i != k) {
                let Some(f) = rows[i].remove(&k) else {
                    continue;
                };
                for &(c, v) in &pivot_row {
                    *rows[i].entry(c).or_insert_with(T::zero) -= f * v;
                }
                for &(c, v) in &pivot_inv {
                    *inv[i].entry(c).or_insert_with(T::zero) -= f * v;
                }
            }
        }

        let mut builder = MatrixBuilder::new(n);
        for (i, row) in inv.into_iter().enumerate() {
            for (j, v) in row {
                if v != T::zero() {
                    builder.set(i, j, v)?;
                }
            }
        }
        Ok(builder.compile())
    }

    /// B = P·A·Pᵗ, i.e. `B[k][l] = A[perm[k]][perm[l]]`.
    pub fn permute(&self, p: &Permutation) -> Result<Self, EqError> {
        EqError::dims(self.n, p.len())?;
        let mut diag = Vec::with_capacity(self.n);
        let mut row_ptr = Vec::with_capacity(self.n + 1);
        let mut col_idx = Vec::with_capacity(self.values.len());
        let mut values = Vec::with_capacity(self.values.len());
        let mut scratch: Vec<(usize, T)> = Vec::new();
        row_ptr.push(0);
        for k in 0..self.n {
            let old = p.old_index(k);
            diag.push(self.diag[old]);
            scratch.clear();
            scratch.extend(self.row(old).map(|(c, v)| (p.new_index(c), v)));
            scratch.sort_unstable_by_key(|&(c, _)| c);
            for &(c, v) in &scratch {
                col_idx.push(c);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Ok(Self {
            n: self.n,
            diag,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// A ← diag(sr)·A·diag(sc).
    pub fn scale(&mut self, sr: &[T], sc: &[T]) -> Result<(), EqError> {
        self.scale_rows(sr)?;
        self.scale_columns(sc)
    }

    pub fn scale_rows(&mut self, s: &[T]) -> Result<(), EqError> {
        EqError::dims(self.n, s.len())?;
        for i in 0..self.n {
            self.diag[i] *= s[i];
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                self.values[k] *= s[i];
            }
        }
        Ok(())
    }

    pub fn scale_columns(&mut self, s: &[T]) -> Result<(), EqError> {
        EqError::dims(self.n, s.len())?;
        for (d, &si) in self.diag.iter_mut().zip(s) {
            *d *= si;
        }
        for (v, &c) in self.values.iter_mut().zip(&self.col_idx) {
            *v *= s[c];
        }
        Ok(())
    }

    pub fn transpose(&self) -> Self {
        let mut counts = vec![0usize; self.n + 1];
        for &c in &self.col_idx {
            counts[c + 1] += 1;
        }
        for i in 0..self.n {
            counts[i + 1] += counts[i];
        }
        let row_ptr = counts.clone();
        let mut next = counts;
        let mut col_idx = vec![0; self.values.len()];
        let mut values = vec![T::zero(); self.values.len()];
        for i in 0..self.n {
            for (j, v) in self.row(i) {
                let slot = next[j];
                col_idx[slot] = i;
                values[slot] = v;
                next[j] += 1;
            }
        }
        Self {
            n: self.n,
            diag: self.diag.clone(),
            row_ptr,
            col_idx,
            values,
        }
    }

    /// The leading m×m block.
    pub fn leading_block(&self, m: usize) -> Result<Self, EqError> {
        if m > self.n {
            return Err(EqError::out_of_range("block size", m, self.n + 1));
        }
        if m == self.n {
            return Ok(self.clone());
        }
        let mut row_ptr = Vec::with_capacity(m + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for i in 0..m {
            for (c, v) in self.row(i) {
                if c < m {
                    col_idx.push(c);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Ok(Self {
            n: m,
            diag: self.diag[..m].to_vec(),
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Standard CSR triple with the diagonal merged into each row.
    pub fn to_csr(&self) -> (Vec<usize>, Vec<usize>, Vec<T>) {
        let mut row_ptr = Vec::with_capacity(self.n + 1);
        let mut col_idx = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        row_ptr.push(0);
        for i in 0..self.n {
            for (c, v) in self.row_with_diagonal(i) {
                col_idx.push(c);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        (row_ptr, col_idx, values)
    }

    /// Verifies the MCSR layout invariant.
    pub fn check_invariants(&self) -> Result<(), EqError> {
        EqError::dims(self.n, self.diag.len())?;
        EqError::dims(self.n + 1, self.row_ptr.len())?;
        if self.row_ptr[0] != 0 || self.row_ptr[self.n] != self.values.len() {
            return Err(EqError::DimensionMismatch {
                expected: self.values.len(),
                got: self.row_ptr[self.n],
            });
        }
        for i in 0..self.n {
            let (s, e) = (self.row_ptr[i], self.row_ptr[i + 1]);
            if s > e {
                return Err(EqError::out_of_range("row pointer", s, e + 1));
            }
            let mut prev: Option<usize> = None;
            for &c in &self.col_idx[s..e] {
                if c >= self.n {
                    return Err(EqError::out_of_range("column", c, self.n));
                }
                if c == i || prev.is_some_and(|p| p >= c) {
                    return Err(EqError::Format {
                        path: String::from("<matrix>"),
                        line: i,
                        message: format!("column {c} duplicated, unsorted or diagonal"),
                    });
                }
                prev = Some(c);
            }
        }
        Ok(())
    }

    /// max |i - j| over stored off-diagonal entries.
    pub fn bandwidth(&self) -> usize {
        (0..self.n)
            .flat_map(|i| self.row(i).map(move |(j, _)| i.abs_diff(j)))
            .max()
            .unwrap_or(0)
    }

    /// Largest magnitude in a row, diagonal included.
    pub fn row_max_abs(&self, row: usize) -> f64 {
        self.row_with_diagonal(row)
            .fold(0.0, |acc: f64, (_, v)| acc.max(v.abs()))
    }

    /// First row whose entries are all zero, diagonal included.
    pub fn first_empty_row(&self) -> Option<usize> {
        (0..self.n).find(|&i| self.row_max_abs(i) == 0.0)
    }

    pub fn memory_bytes(&self) -> u64 {
        value_bytes::<T>(self.n)
            + entry_bytes::<T>(self.values.len())
            + value_bytes::<usize>(self.row_ptr.len())
    }
}

impl<T: Scalar> MatVec<T> for SparseMatrix<T> {
    fn matvec(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.n, "Input vector x has incorrect length");
        assert_eq!(y.len(), self.n, "Output vector y has incorrect length");
        for i in 0..self.n {
            let mut sum = self.diag[i] * x[i];
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            y[i] = sum;
        }
    }

    fn work_per_product(&self) -> u64 {
        self.nnz() as u64
    }
}

impl<T> Indexing for SparseMatrix<T> {
    fn nrows(&self) -> usize {
        self.n
    }
}
