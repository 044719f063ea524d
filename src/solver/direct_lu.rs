//! Direct sparse solver: complete LU factorization without pivoting.
//!
//! The factorization grows row by row; every row's storage is reserved in the
//! byte budget before it is kept and its elimination work is charged to the
//! work budget, so an oversized system fails with a resource error instead of
//! exhausting memory. The caller is expected to order the system first
//! (pre-elimination ordering, optionally followed by reverse Cuthill–McKee).
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, §10.3.

use crate::core::budget::WorkBudget;
use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::matrix::factors::{FactorRule, LuFactors, factorize};
use crate::matrix::SparseMatrix;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;

/// Largest dimension whose dense square still fits a 32-bit index.
pub const MAX_DIRECT_DIMENSION: usize = 65_535;

/// LU solver over MCSR matrices.
///
/// Stores the LU factorization for reuse across right-hand sides.
#[derive(Debug, Clone)]
pub struct SparseLu<T> {
    pivot_threshold: f64,
    factor: Option<LuFactors<T>>,
}

impl<T: Scalar> SparseLu<T> {
    /// Create a new LU solver (no factorization yet).
    pub fn new(pivot_threshold: f64) -> Self {
        Self {
            pivot_threshold,
            factor: None,
        }
    }

    /// Checks that `n * n` stays inside the index range.
    pub fn check_index_range(n: usize) -> Result<(), EqError> {
        match n.checked_mul(n) {
            Some(sq) if sq <= u32::MAX as usize => Ok(()),
            _ => Err(EqError::IndexRange { dimension: n }),
        }
    }

    /// Computes and caches the factorization of `a`.
    pub fn factor(&mut self, a: &SparseMatrix<T>, budget: &mut WorkBudget) -> Result<(), EqError> {
        self.factor = None;
        Self::check_index_range(a.dim())?;
        let factor = factorize(a, &FactorRule::complete(self.pivot_threshold), budget)?;
        log::debug!(
            "sparse LU: n = {}, nnz(A) = {}, nnz(LU) = {}",
            a.dim(),
            a.nnz(),
            factor.nnz()
        );
        self.factor = Some(factor);
        Ok(())
    }

    pub fn factors(&self) -> Option<&LuFactors<T>> {
        self.factor.as_ref()
    }

    /// Solve using the cached LU factorization.
    pub fn solve_cached(
        &self,
        b: &[T],
        x: &mut [T],
        budget: &mut WorkBudget,
    ) -> Result<(), EqError> {
        let factor = self.factor.as_ref().ok_or(EqError::NotCompiled)?;
        EqError::dims(factor.dim(), b.len())?;
        EqError::dims(factor.dim(), x.len())?;
        budget.charge(factor.work_per_solve())?;
        x.copy_from_slice(b);
        factor.solve_in_place(x);
        Ok(())
    }

    /// Bytes held by the cached factorization.
    pub fn memory_bytes(&self) -> u64 {
        self.factor.as_ref().map_or(0, LuFactors::memory_bytes)
    }
}

impl<T: Scalar> LinearSolver<SparseMatrix<T>, T> for SparseLu<T> {
    /// Factor `a` (unless a factorization of the same dimension is cached)
    /// and solve. Direct solvers ignore the preconditioner and the initial
    /// guess.
    fn solve(
        &mut self,
        a: &SparseMatrix<T>,
        _pc: Option<&dyn Preconditioner<T>>,
        b: &[T],
        x: &mut [T],
        budget: &mut WorkBudget,
    ) -> Result<SolveStats, EqError> {
        if self.factor.as_ref().is_none_or(|f| f.dim() != a.dim()) {
            self.factor(a, budget)?;
        }
        self.solve_cached(b, x, budget)?;
        // For direct solvers, always converged in 1 iteration
        Ok(SolveStats::converged(1, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;

    #[test]
    fn lu_solves_nonsymmetric_system() {
        let a = SparseMatrix::from_triplets(
            4,
            vec![
                (0, 0, -2.0),
                (0, 2, 0.5),
                (1, 1, -3.0),
                (1, 0, 1.0),
                (2, 2, -2.0),
                (2, 3, 0.7),
                (3, 3, -3.0),
                (3, 1, 0.2),
            ],
        )
        .unwrap();
        let x_true = vec![1.0, -1.0, 2.0, 0.5];
        let b = a.mul_vec(&x_true).unwrap();
        let mut x = vec![0.0; 4];
        let mut lu = SparseLu::new(0.0);
        lu.solve(&a, None, &b, &mut x, &mut WorkBudget::unlimited()).unwrap();
        for (xi, ti) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!(*xi, *ti, epsilon = 1e-12);
        }
    }

    #[test]
    fn complex_lu() {
        let i = Complex64::new(0.0, 1.0);
        let one = Complex64::new(1.0, 0.0);
        let two = Complex64::new(2.0, 0.0);
        let a =
            SparseMatrix::from_triplets(2, vec![(0, 0, i), (0, 1, one), (1, 0, one), (1, 1, two)])
                .unwrap();
        let x_true = vec![Complex64::new(1.0, 2.0), Complex64::new(-1.0, 0.5)];
        let b = a.mul_vec(&x_true).unwrap();
        let mut x = vec![Complex64::new(0.0, 0.0); 2];
        SparseLu::new(0.0)
            .solve(&a, None, &b, &mut x, &mut WorkBudget::unlimited())
            .unwrap();
        for (xi, ti) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!((xi - ti).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn index_range_ceiling() {
        assert!(SparseLu::<f64>::check_index_range(MAX_DIRECT_DIMENSION).is_ok());
        assert_eq!(
            SparseLu::<f64>::check_index_range(MAX_DIRECT_DIMENSION + 1),
            Err(EqError::IndexRange {
                dimension: MAX_DIRECT_DIMENSION + 1
            })
        );
    }

    #[test]
    fn work_budget_is_enforced() {
        let n = 30;
        let mut t = Vec::new();
        for r in 0..n {
            for c in 0..n {
                t.push((r, c, if r == c { 50.0 } else { 1.0 }));
            }
        }
        let a = SparseMatrix::from_triplets(n, t).unwrap();
        let mut budget = WorkBudget::new(Some(1_000), None);
        let err = SparseLu::new(0.0).factor(&a, &mut budget).unwrap_err();
        assert!(matches!(err, EqError::ResourceLimit { .. }));
    }
}
