//! Pre-elimination of flagged equations.
//!
//! Flagged equations are permuted to the back of the system and eliminated
//! by Gaussian elimination without further pivoting. The leading block left
//! behind no longer couples to the eliminated unknowns and is handed to the
//! solver; the eliminated unknowns are recovered afterwards by
//! back-substitution into the eliminated rows.

use std::collections::BTreeMap;

use crate::core::budget::WorkBudget;
use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::matrix::permutation::Permutation;
use crate::matrix::sparse::SparseMatrix;

/// One elimination step: `row_i += factor · row_pivot` for every listed row.
#[derive(Debug, Clone, PartialEq)]
pub struct EliminationStep<T> {
    pub pivot: usize,
    pub updates: Vec<(usize, T)>,
}

/// The elimination coefficient matrix `E`, kept as its ordered sequence of
/// elementary row operations.
#[derive(Debug, Clone, PartialEq)]
pub struct EliminationFactors<T> {
    n: usize,
    steps: Vec<EliminationStep<T>>,
}

impl<T: Scalar> EliminationFactors<T> {
    pub fn identity(n: usize) -> Self {
        Self {
            n,
            steps: Vec::new(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.steps.iter().all(|s| s.updates.is_empty())
    }

    /// b ← E·b
    pub fn apply(&self, b: &mut [T]) -> Result<(), EqError> {
        EqError::dims(self.n, b.len())?;
        for step in &self.steps {
            let bp = b[step.pivot];
            for &(i, f) in &step.updates {
                b[i] += f * bp;
            }
        }
        Ok(())
    }

    /// Materialises `E` as a sparse matrix.
    pub fn to_matrix(&self) -> SparseMatrix<T> {
        let mut rows: Vec<BTreeMap<usize, T>> = (0..self.n)
            .map(|i| BTreeMap::from([(i, T::one())]))
            .collect();
        for step in &self.steps {
            let pivot_row: Vec<(usize, T)> =
                rows[step.pivot].iter().map(|(&c, &v)| (c, v)).collect();
            for &(i, f) in &step.updates {
                for &(c, v) in &pivot_row {
                    *rows[i].entry(c).or_insert_with(T::zero) += f * v;
                }
            }
        }
        SparseMatrix::from_row_maps(vec![T::zero(); self.n], rows)
    }
}

/// Ordering that moves flagged equations to the back. Unflagged equations
/// keep their relative order; flagged ones are sorted by ascending priority
/// (ties by index), so higher priorities are eliminated later.
///
/// Returns the permutation and the size of the leading, non-eliminated block.
pub fn elimination_order(
    flags: &[bool],
    priority: &[i32],
) -> Result<(Permutation, usize), EqError> {
    EqError::dims(flags.len(), priority.len())?;
    let mut perm: Vec<usize> = (0..flags.len()).filter(|&i| !flags[i]).collect();
    let leading = perm.len();
    let mut flagged: Vec<usize> = (0..flags.len()).filter(|&i| flags[i]).collect();
    flagged.sort_by_key(|&i| (priority[i], i));
    perm.extend(flagged);
    Ok((Permutation::from_vec(perm)?, leading))
}

/// Eliminates the pivots `leading..n` from `rows` in place.
///
/// `rows` are full rows (diagonal included) of the permuted system; `perm`
/// is used only to report the original index of a failing pivot row.
pub fn eliminate<T: Scalar>(
    rows: &mut [BTreeMap<usize, T>],
    leading: usize,
    pivot_threshold: f64,
    perm: &Permutation,
    budget: &mut WorkBudget,
) -> Result<EliminationFactors<T>, EqError> {
    let n = rows.len();
    let mut steps = Vec::with_capacity(n.saturating_sub(leading));
    let mut pivot_row: Vec<(usize, T)> = Vec::new();

    for k in leading..n {
        let akk = rows[k].get(&k).copied().unwrap_or_else(T::zero);
        let row_max = rows[k].values().fold(0.0, |acc: f64, v| acc.max(v.abs()));
        if akk == T::zero() || !akk.is_finite() || akk.abs() <= pivot_threshold * row_max {
            return Err(EqError::ZeroPivot {
                row: perm.old_index(k),
            });
        }

        pivot_row.clear();
        pivot_row.extend(rows[k].iter().filter(|&(&c, _)| c != k).map(|(&c, &v)| (c, v)));

        let mut updates = Vec::new();
        let mut work: u64 = 0;
        for (i, row) in rows.iter_mut().enumerate() {
            if i == k || (i < k && i >= leading) {
                continue;
            }
            let Some(aik) = row.remove(&k) else {
                continue;
            };
            let f = -(aik / akk);
            for &(c, v) in &pivot_row {
                *row.entry(c).or_insert_with(T::zero) += f * v;
            }
            work += pivot_row.len() as u64 + 1;
            updates.push((i, f));
        }
        budget.charge(work)?;
        steps.push(EliminationStep { pivot: k, updates });
    }

    Ok(EliminationFactors { n, steps })
}

/// Recovers the eliminated unknowns `leading..n` of `x`, whose leading part
/// already holds the solution of the reduced system. `reduced` and `b` are the
/// system after elimination.
pub fn back_substitute<T: Scalar>(
    reduced: &SparseMatrix<T>,
    leading: usize,
    b: &[T],
    x: &mut [T],
) -> Result<(), EqError> {
    let n = reduced.dim();
    EqError::dims(n, b.len())?;
    EqError::dims(n, x.len())?;
    for k in (leading..n).rev() {
        let mut sum = b[k];
        for (j, v) in reduced.row(k) {
            sum -= v * x[j];
        }
        let d = reduced.diagonal()[k];
        if d == T::zero() {
            return Err(EqError::ZeroPivot { row: k });
        }
        x[k] = sum / d;
    }
    Ok(())
}

/// Rows of `m` as full row maps, the layout [`eliminate`] works on.
pub fn working_rows<T: Scalar>(m: &SparseMatrix<T>) -> Vec<BTreeMap<usize, T>> {
    m.to_row_maps()
}

/// Compiles working rows back into an MCSR matrix.
pub fn compile_rows<T: Scalar>(rows: Vec<BTreeMap<usize, T>>) -> SparseMatrix<T> {
    let n = rows.len();
    SparseMatrix::from_row_maps(vec![T::zero(); n], rows)
}
