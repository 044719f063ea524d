//! BiCGStab solver (Saad §7.4.2), right-preconditioned.

use crate::core::budget::{WorkBudget, value_bytes};
use crate::core::traits::{MatVec, Scalar};
use crate::core::wrappers::{axpy, dot, norm, residual};
use crate::error::EqError;
use crate::preconditioner::Preconditioner;
use crate::solver::{LinearSolver, pc_work, precondition};
use crate::utils::convergence::{Convergence, SolveStats};

/// Work vectors held during one solve: r, r̂, p, p̂, v, s, ŝ, t.
const WORK_VECTORS: usize = 8;

pub struct BiCgStabSolver {
    pub conv: Convergence,
    /// Log progress every this many iterations (0 = never).
    pub print_interval: usize,
}

impl BiCgStabSolver {
    pub fn new(tol: f64, max_iters: usize) -> Self {
        Self {
            conv: Convergence { tol, max_iters },
            print_interval: 0,
        }
    }

    pub fn with_print_interval(mut self, every: usize) -> Self {
        self.print_interval = every;
        self
    }

    fn iterate<M: MatVec<T>, T: Scalar>(
        &self,
        a: &M,
        pc: Option<&dyn Preconditioner<T>>,
        x: &mut [T],
        mut r: Vec<T>,
        threshold: f64,
        budget: &mut WorkBudget,
    ) -> Result<SolveStats, EqError> {
        let n = x.len();
        let r_hat = r.clone();
        let mut p = vec![T::zero(); n];
        let mut p_hat = vec![T::zero(); n];
        let mut v = vec![T::zero(); n];
        let mut s = vec![T::zero(); n];
        let mut s_hat = vec![T::zero(); n];
        let mut t = vec![T::zero(); n];
        let mut rho_prev = T::one();
        let mut alpha = T::one();
        let mut omega = T::one();
        let per_iteration = 2 * a.work_per_product() + 2 * pc_work(pc) + 10 * n as u64;
        let mut stats = SolveStats {
            iterations: 0,
            final_residual: norm(&r),
            converged: false,
        };

        for i in 1..=self.conv.max_iters {
            budget.charge(per_iteration)?;
            let rho = dot(&r_hat, &r);
            if rho.abs() < f64::MIN_POSITIVE {
                log::warn!("BiCGStab breakdown (rho = 0) at iteration {i}");
                return Ok(stats);
            }
            let beta = (rho / rho_prev) * (alpha / omega);
            // p = r + beta * (p - omega * v)
            for ((pj, rj), vj) in p.iter_mut().zip(&r).zip(&v) {
                *pj = *rj + beta * (*pj - omega * *vj);
            }
            precondition(pc, &p, &mut p_hat)?;
            a.matvec(&p_hat, &mut v);
            let alpha_den = dot(&r_hat, &v);
            if alpha_den.abs() < f64::MIN_POSITIVE {
                log::warn!("BiCGStab breakdown (r̂·v = 0) at iteration {i}");
                return Ok(stats);
            }
            alpha = rho / alpha_den;
            // s = r - alpha * v
            for ((sj, rj), vj) in s.iter_mut().zip(&r).zip(&v) {
                *sj = *rj - alpha * *vj;
            }
            let s_norm = norm(&s);
            if s_norm <= threshold {
                axpy(alpha, &p_hat, x);
                return Ok(SolveStats::converged(i, s_norm));
            }
            precondition(pc, &s, &mut s_hat)?;
            a.matvec(&s_hat, &mut t);
            let tt = dot(&t, &t);
            if tt.abs() < f64::MIN_POSITIVE {
                log::warn!("BiCGStab breakdown (t = 0) at iteration {i}");
                axpy(alpha, &p_hat, x);
                stats.iterations = i;
                stats.final_residual = s_norm;
                return Ok(stats);
            }
            omega = dot(&t, &s) / tt;
            // x = x + alpha * p̂ + omega * ŝ
            axpy(alpha, &p_hat, x);
            axpy(omega, &s_hat, x);
            // r = s - omega * t
            for ((rj, sj), tj) in r.iter_mut().zip(&s).zip(&t) {
                *rj = *sj - omega * *tj;
            }
            let (stop, s_stats) = self.conv.check(norm(&r), threshold, i);
            stats = s_stats;
            if self.print_interval > 0 && i % self.print_interval == 0 {
                log::info!("BiCGStab iteration {i}: residual {:e}", stats.final_residual);
            }
            if stop {
                return Ok(stats);
            }
            if omega.abs() < f64::MIN_POSITIVE {
                log::warn!("BiCGStab breakdown (omega = 0) at iteration {i}");
                return Ok(stats);
            }
            rho_prev = rho;
        }
        Ok(stats)
    }
}

impl<M, T> LinearSolver<M, T> for BiCgStabSolver
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

        // r0 = b - A x0
        let mut r = vec![T::zero(); n];
        budget.charge(a.work_per_product())?;
        let r_norm = residual(a, x, b, &mut r);
        if r_norm <= threshold {
            return Ok(SolveStats::converged(0, r_norm));
        }

        let bytes = value_bytes::<T>(WORK_VECTORS * n);
        budget.reserve(bytes)?;
        let result = self.iterate(a, pc, x, r, threshold, budget);
        budget.release(bytes);
        self.conv.finish(result?, b_norm)
    }
}
