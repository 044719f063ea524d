//! Iterative refinement with an (incomplete) factorization.
//!
//! x ← x + M⁻¹(b − A·x). With an exact factorization this converges in one
//! step; with ILUT it is the plain "ILU solve" that needs no Krylov basis.

use crate::core::budget::{WorkBudget, value_bytes};
use crate::core::traits::{MatVec, Scalar};
use crate::core::wrappers::{axpy, norm, residual};
use crate::error::EqError;
use crate::preconditioner::Preconditioner;
use crate::solver::{LinearSolver, pc_work, precondition};
use crate::utils::convergence::{Convergence, SolveStats};

pub struct RefinementSolver {
    pub conv: Convergence,
}

impl RefinementSolver {
    pub fn new(tol: f64, max_iters: usize) -> Self {
        Self {
            conv: Convergence { tol, max_iters },
        }
    }
}

impl<M, T> LinearSolver<M, T> for RefinementSolver
where
    M: MatVec<T>,
    T: Scalar,
{
    fn solve(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<T>>,
        b: &[T],
        x: &mut [T],
        budget: &mut WorkBudget,
    ) -> Result<SolveStats, EqError> {
        let n = b.len();
        EqError::dims(n, x.len())?;
        let b_norm = norm(b);
        if b_norm == 0.0 {
            x.fill(T::zero());
            return Ok(SolveStats::converged(0, 0.0));
        }
        let threshold = self.conv.threshold(b_norm);
        let bytes = value_bytes::<T>(2 * n);
        budget.reserve(bytes)?;

        let mut r = vec![T::zero(); n];
        let mut z = vec![T::zero(); n];
        let per_iteration = a.work_per_product() + pc_work(pc) + 2 * n as u64;
        let mut run = || -> Result<SolveStats, EqError> {
            let mut i = 0;
            loop {
                budget.charge(per_iteration)?;
                let res = residual(a, x, b, &mut r);
                let (stop, stats) = self.conv.check(res, threshold, i);
                if stop {
                    return Ok(stats);
                }
                i += 1;
                precondition(pc, &r, &mut z)?;
                axpy(T::one(), &z, x);
            }
        };
        let result = run();
        budget.release(bytes);
        self.conv.finish(result?, b_norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::SparseMatrix;
    use crate::preconditioner::Ilut;
    use approx::assert_abs_diff_eq;

    fn laplacian_2d(k: usize) -> SparseMatrix<f64> {
        let n = k * k;
        let mut t = Vec::new();
        for i in 0..k {
            for j in 0..k {
                let row = i * k + j;
                t.push((row, row, 4.0));
                if i > 0 {
                    t.push((row, row - k, -1.0));
                }
                if i + 1 < k {
                    t.push((row, row + k, -1.0));
                }
                if j > 0 {
                    t.push((row, row - 1, -1.0));
                }
                if j + 1 < k {
                    t.push((row, row + 1, -1.0));
                }
            }
        }
        SparseMatrix::from_triplets(n, t).unwrap()
    }

    #[test]
    fn exact_factorization_converges_in_one_step() {
        let a = laplacian_2d(5);
        let b = vec![1.0; 25];
        let mut budget = WorkBudget::unlimited();
        let mut pc = Ilut::complete(0.0);
        pc.setup(&a, &mut budget).unwrap();
        let mut x = vec![0.0; 25];
        let stats = RefinementSolver::new(1e-10, 5)
            .solve(&a, Some(&pc), &b, &mut x, &mut budget)
            .unwrap();
        assert_eq!(stats.iterations, 1);
        let ax = a.mul_vec(&x).unwrap();
        for v in ax {
            assert_abs_diff_eq!(v, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn incomplete_factorization_refines() {
        let a = laplacian_2d(6);
        let b = vec![1.0; 36];
        let mut budget = WorkBudget::unlimited();
        let mut pc = Ilut::new(3, 1e-2);
        pc.setup(&a, &mut budget).unwrap();
        let mut x = vec![0.0; 36];
        let stats = RefinementSolver::new(1e-8, 200)
            .solve(&a, Some(&pc), &b, &mut x, &mut budget)
            .unwrap();
        assert!(stats.converged);
        assert!(stats.iterations > 1);
    }
}
