//! Row-wise (IKJ) LU factorization of MCSR matrices.
//!
//! A single kernel serves both the incomplete factorization used for
//! preconditioning (threshold dropping plus a per-row fill cap, Saad's ILUT)
//! and the complete factorization of the direct solver (no dropping).
//! No pivoting is performed: the caller orders the system beforehand.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, §10.4.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::core::budget::{WorkBudget, entry_bytes, value_bytes};
use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::matrix::sparse::SparseMatrix;

/// Sparse row structure for storing L/U factors.
///
/// Each row stores the column indices and values of nonzero entries.
#[derive(Clone, Debug, Default)]
pub struct SparseRow<T> {
    /// Column indices of nonzero entries, increasing
    pub cols: Vec<usize>,
    /// Values of nonzero entries
    pub vals: Vec<T>,
}

impl<T> SparseRow<T> {
    /// Create an empty sparse row
    pub fn new() -> Self {
        Self {
            cols: Vec::new(),
            vals: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}

/// Dropping and pivot rules for one factorization.
#[derive(Clone, Debug, PartialEq)]
pub struct FactorRule {
    /// Maximum entries kept in the L part and in the U part of each row.
    /// `None` keeps everything.
    pub fill: Option<usize>,
    /// Entries below `droptol * ‖aᵢ‖₂` are dropped.
    pub droptol: f64,
    /// A pivot is rejected when `|uᵢᵢ| <= pivot_threshold * max_j |aᵢⱼ|`.
    pub pivot_threshold: f64,
}

impl FactorRule {
    /// Complete factorization: nothing is dropped.
    pub fn complete(pivot_threshold: f64) -> Self {
        Self {
            fill: None,
            droptol: 0.0,
            pivot_threshold,
        }
    }

    /// Incomplete factorization with threshold dropping and a fill cap.
    pub fn ilut(fill: usize, droptol: f64, pivot_threshold: f64) -> Self {
        Self {
            fill: Some(fill),
            droptol,
            pivot_threshold,
        }
    }

    fn drops(&self) -> bool {
        self.fill.is_some() || self.droptol > 0.0
    }
}

/// L (unit lower, strict part stored) and U (diagonal plus strict upper part).
#[derive(Clone, Debug)]
pub struct LuFactors<T> {
    n: usize,
    l: Vec<SparseRow<T>>,
    u: Vec<SparseRow<T>>,
    u_diag: Vec<T>,
}

impl<T: Scalar> LuFactors<T> {
    pub fn dim(&self) -> usize {
        self.n
    }

    /// Stored entries of L and U, diagonal included.
    pub fn nnz(&self) -> usize {
        let off: usize = self.l.iter().chain(&self.u).map(SparseRow::len).sum();
        self.n + off
    }

    /// Largest number of off-diagonal entries any row holds in L or U.
    pub fn max_row_fill(&self) -> usize {
        self.l
            .iter()
            .chain(&self.u)
            .map(SparseRow::len)
            .max()
            .unwrap_or(0)
    }

    pub fn memory_bytes(&self) -> u64 {
        value_bytes::<T>(self.n) + entry_bytes::<T>(self.nnz() - self.n)
    }

    /// Work units of one forward/backward substitution.
    pub fn work_per_solve(&self) -> u64 {
        self.nnz() as u64
    }

    pub fn diagonal(&self) -> &[T] {
        &self.u_diag
    }

    /// x ← U⁻¹ L⁻¹ x
    pub fn solve_in_place(&self, x: &mut [T]) {
        debug_assert_eq!(x.len(), self.n);
        // Forward substitution: L y = x (unit diagonal)
        for i in 0..self.n {
            let row = &self.l[i];
            let mut sum = x[i];
            for (&j, &v) in row.cols.iter().zip(&row.vals) {
                sum -= v * x[j];
            }
            x[i] = sum;
        }
        // Backward substitution: U z = y
        for i in (0..self.n).rev() {
            let row = &self.u[i];
            let mut sum = x[i];
            for (&j, &v) in row.cols.iter().zip(&row.vals) {
                sum -= v * x[j];
            }
            x[i] = sum / self.u_diag[i];
        }
    }
}

/// Factorizes `a` row by row under `rule`, reserving each row's storage in
/// `budget` before it is stored and charging the elimination work after it.
///
/// On success the factors keep their reservation (see
/// [`LuFactors::memory_bytes`]); on failure everything reserved so far is
/// released again.
pub fn factorize<T: Scalar>(
    a: &SparseMatrix<T>,
    rule: &FactorRule,
    budget: &mut WorkBudget,
) -> Result<LuFactors<T>, EqError> {
    let mut reserved = 0;
    let result = factorize_rows(a, rule, budget, &mut reserved);
    if result.is_err() {
        budget.release(reserved);
    }
    result
}

fn factorize_rows<T: Scalar>(
    a: &SparseMatrix<T>,
    rule: &FactorRule,
    budget: &mut WorkBudget,
    reserved: &mut u64,
) -> Result<LuFactors<T>, EqError> {
    let n = a.dim();
    let mut l: Vec<SparseRow<T>> = Vec::with_capacity(n);
    let mut u: Vec<SparseRow<T>> = Vec::with_capacity(n);
    let mut u_diag: Vec<T> = Vec::with_capacity(n);

    let mut w = vec![T::zero(); n];
    let mut in_row = vec![false; n];
    let mut pattern: Vec<usize> = Vec::new();
    let mut lower: BinaryHeap<Reverse<usize>> = BinaryHeap::new();

    for i in 0..n {
        let mut row_norm_sq = 0.0;
        let mut row_max: f64 = 0.0;
        for (j, v) in a.row_with_diagonal(i) {
            w[j] = v;
            in_row[j] = true;
            pattern.push(j);
            if j < i {
                lower.push(Reverse(j));
            }
            row_norm_sq += v.norm_sqr();
            row_max = row_max.max(v.abs());
        }
        let tau = rule.droptol * row_norm_sq.sqrt();
        let mut work: u64 = 0;

        while let Some(Reverse(k)) = lower.pop() {
            let wk = w[k] / u_diag[k];
            if rule.drops() && wk.abs() < tau {
                w[k] = T::zero();
                continue;
            }
            w[k] = wk;
            let urow = &u[k];
            for (&j, &ukj) in urow.cols.iter().zip(&urow.vals) {
                if !in_row[j] {
                    in_row[j] = true;
                    w[j] = T::zero();
                    pattern.push(j);
                    if j < i {
                        lower.push(Reverse(j));
                    }
                }
                w[j] -= wk * ukj;
            }
            work += urow.len() as u64 + 1;
        }

        let pivot = w[i];
        if pivot == T::zero()
            || !pivot.is_finite()
            || pivot.abs() <= rule.pivot_threshold * row_max
        {
            return Err(EqError::ZeroPivot { row: i });
        }

        let mut lrow: Vec<(usize, T)> = Vec::new();
        let mut urow: Vec<(usize, T)> = Vec::new();
        for &j in &pattern {
            let v = w[j];
            w[j] = T::zero();
            in_row[j] = false;
            if j == i || v == T::zero() {
                continue;
            }
            if rule.drops() && v.abs() < tau {
                continue;
            }
            if j < i {
                lrow.push((j, v));
            } else {
                urow.push((j, v));
            }
        }
        pattern.clear();

        if let Some(fill) = rule.fill {
            keep_largest(&mut lrow, fill);
            keep_largest(&mut urow, fill);
        }
        lrow.sort_unstable_by_key(|&(j, _)| j);
        urow.sort_unstable_by_key(|&(j, _)| j);

        let bytes = entry_bytes::<T>(lrow.len() + urow.len()) + value_bytes::<T>(1);
        budget.reserve(bytes)?;
        *reserved += bytes;
        budget.charge(work)?;

        l.push(into_sparse_row(lrow));
        u.push(into_sparse_row(urow));
        u_diag.push(pivot);
    }

    Ok(LuFactors { n, l, u, u_diag })
}

/// Keeps the `fill` entries of largest magnitude.
fn keep_largest<T: Scalar>(entries: &mut Vec<(usize, T)>, fill: usize) {
    if entries.len() > fill {
        entries.sort_unstable_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(fill);
    }
}

fn into_sparse_row<T>(entries: Vec<(usize, T)>) -> SparseRow<T> {
    let (cols, vals) = entries.into_iter().unzip();
    SparseRow { cols, vals }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::MatVec;
    use approx::assert_abs_diff_eq;

    fn tridiag(n: usize) -> SparseMatrix<f64> {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 4.0));
            if i > 0 {
                t.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                t.push((i, i + 1, -2.0));
            }
        }
        SparseMatrix::from_triplets(n, t).unwrap()
    }

    #[test]
    fn complete_factorization_solves_exactly() {
        let a = tridiag(6);
        let lu = factorize(&a, &FactorRule::complete(0.0), &mut WorkBudget::unlimited()).unwrap();
        let x_true: Vec<f64> = (0..6).map(|i| i as f64 - 2.5).collect();
        let mut b = vec![0.0; 6];
        a.matvec(&x_true, &mut b);
        lu.solve_in_place(&mut b);
        for (xi, ti) in b.iter().zip(&x_true) {
            assert_abs_diff_eq!(*xi, *ti, epsilon = 1e-12);
        }
    }

    #[test]
    fn fill_cap_limits_rows() {
        // dense lower-left coupling generates fill in complete LU
        let n = 8;
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 10.0));
            t.push((i, 0, 1.0));
            t.push((0, i, 1.0));
        }
        let a = SparseMatrix::from_triplets(n, t).unwrap();
        let mut budget = WorkBudget::unlimited();
        let lu = factorize(&a, &FactorRule::ilut(1, 1e-3, 0.0), &mut budget).unwrap();
        assert!(lu.max_row_fill() <= 1);
    }

    #[test]
    fn zero_pivot_reports_row() {
        let a =
            SparseMatrix::from_triplets(3, vec![(0, 0, 1.0), (1, 2, 1.0), (2, 2, 1.0)]).unwrap();
        let mut budget = WorkBudget::unlimited();
        let err = factorize(&a, &FactorRule::complete(0.0), &mut budget).unwrap_err();
        assert_eq!(err, EqError::ZeroPivot { row: 1 });
    }

    #[test]
    fn byte_budget_stops_factorization() {
        let a = tridiag(50);
        let mut budget = WorkBudget::new(None, Some(64));
        let err = factorize(&a, &FactorRule::complete(0.0), &mut budget).unwrap_err();
        assert!(err.is_resource_limit());
        assert_eq!(budget.bytes_used(), 0);
    }
}
