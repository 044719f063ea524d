//! Factory for Krylov Subspace Methods (KSP).
//!
//! `KspContext` selects the iterative method and the preconditioner from the
//! solver parameters and solves one or more right-hand sides sharing a
//! matrix. With the ILUT preconditioner it also searches for a workable
//! fill-in/drop-tolerance pair: an attempt that fails to converge (or hits a
//! zero pivot) is retried with twice the fill and a tenth of the tolerance
//! until the configured ranges are exhausted. The last successful pair is
//! remembered in [`IlutTuning`] and seeds the next solve.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.

use crate::config::options::{IlutTuning, IterativeKind, PreconditionerKind, SolverParameters};
use crate::context::pc_context::PC;
use crate::core::budget::WorkBudget;
use crate::core::traits::Scalar;
use crate::core::wrappers::norm;
use crate::error::EqError;
use crate::matrix::SparseMatrix;
use crate::preconditioner::Preconditioner;
use crate::solver::{BiCgStabSolver, GmresSolver, LinearSolver, RefinementSolver};
use crate::utils::convergence::SolveStats;

/// What an iterative solve used; filled in as it goes, so it is meaningful
/// after a failure too.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KspReport {
    /// Maximum over right-hand sides of the iterations of the last attempt.
    pub iterations: usize,
    /// Maximum relative residual reported by the solver.
    pub residual: f64,
    pub fill_used: usize,
    pub tol_used: f64,
    /// Preconditioner set-ups tried.
    pub attempts: usize,
}

/// Context and configuration for an iterative solve.
#[derive(Debug, Clone, PartialEq)]
pub struct KspContext {
    /// The iterative method to use
    pub kind: IterativeKind,
    pub preconditioner: PreconditionerKind,
    /// Relative residual target
    pub tol: f64,
    /// Maximum number of iterations
    pub max_it: usize,
    /// Restart parameter (for GMRES)
    pub restart: usize,
    pub print_interval: usize,
    pub pivot_threshold: f64,
    pub fill_range: (usize, usize),
    pub tol_range: (f64, f64),
}

/// Failures that a richer preconditioner may cure.
fn retryable(e: &EqError) -> bool {
    matches!(e, EqError::NotConverged { .. } | EqError::ZeroPivot { .. })
}

impl KspContext {
    pub fn from_parameters(parms: &SolverParameters) -> Self {
        Self {
            kind: parms.iterative_kind,
            preconditioner: parms.preconditioner,
            tol: parms.accuracy,
            max_it: parms.max_iterations,
            restart: parms.gmres_restart,
            print_interval: parms.print_interval,
            pivot_threshold: parms.pivot_threshold,
            fill_range: (parms.fill_min, parms.fill_max),
            tol_range: (parms.tol_min, parms.tol_max),
        }
    }

    /// Starting point of the ILUT search: the remembered suggestion, or the
    /// cheapest pair of the ranges.
    fn initial_ilut(&self, tuning: &IlutTuning) -> (usize, f64) {
        let (fill_min, fill_max) = self.fill_range;
        let (tol_min, tol_max) = self.tol_range;
        let fill = tuning.suggested_fill.unwrap_or(fill_min).clamp(fill_min, fill_max);
        let tol = tuning.suggested_tol.unwrap_or(tol_max).clamp(tol_min, tol_max);
        (fill, tol)
    }

    /// Next, more expensive pair, or `None` when the ranges are exhausted.
    fn richer_ilut(&self, fill: usize, tol: f64) -> Option<(usize, f64)> {
        let (_, fill_max) = self.fill_range;
        let (tol_min, _) = self.tol_range;
        if fill >= fill_max && tol <= tol_min {
            return None;
        }
        Some(((fill.max(1) * 2).min(fill_max), (tol * 0.1).max(tol_min)))
    }

    /// One notch cheaper than `(fill, tol)`, within the ranges.
    fn cheaper_ilut(&self, fill: usize, tol: f64) -> (usize, f64) {
        let (fill_min, _) = self.fill_range;
        let (_, tol_max) = self.tol_range;
        ((fill / 2).max(fill_min), (tol * 10.0).min(tol_max))
    }

    /// Solve `A·xs[k] = rhs[k]` for every right-hand side with one
    /// preconditioner per attempt. Every `xs[k]` starts from zero.
    pub fn solve<T: Scalar>(
        &self,
        a: &SparseMatrix<T>,
        rhs: &[Vec<T>],
        xs: &mut [Vec<T>],
        tuning: &mut IlutTuning,
        budget: &mut WorkBudget,
        report: &mut KspReport,
    ) -> Result<(), EqError> {
        EqError::dims(rhs.len(), xs.len())?;
        if self.preconditioner != PreconditionerKind::Ilut {
            let pc = PC::from_kind(self.preconditioner, 0, 0.0);
            return self.attempt(a, pc, rhs, xs, budget, report);
        }

        let (mut fill, mut tol) = self.initial_ilut(tuning);
        loop {
            report.fill_used = fill;
            report.tol_used = tol;
            let pc = PC::Ilut { fill, droptol: tol };
            match self.attempt(a, pc, rhs, xs, budget, report) {
                Ok(()) => {
                    let (next_fill, next_tol) = if report.iterations < self.max_it / 4 {
                        self.cheaper_ilut(fill, tol)
                    } else {
                        (fill, tol)
                    };
                    tuning.suggested_fill = Some(next_fill);
                    tuning.suggested_tol = Some(next_tol);
                    return Ok(());
                }
                Err(e) if retryable(&e) => match self.richer_ilut(fill, tol) {
                    Some((f, t)) => {
                        log::debug!(
                            "ILUT(fill = {fill}, tol = {tol:e}) failed: {e}; \
                             retrying with fill = {f}, tol = {t:e}"
                        );
                        (fill, tol) = (f, t);
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Set up `pc` and solve every right-hand side with it.
    fn attempt<T: Scalar>(
        &self,
        a: &SparseMatrix<T>,
        pc: PC,
        rhs: &[Vec<T>],
        xs: &mut [Vec<T>],
        budget: &mut WorkBudget,
        report: &mut KspReport,
    ) -> Result<(), EqError> {
        report.attempts += 1;
        report.iterations = 0;
        report.residual = 0.0;
        let mut built = pc.build::<T>(self.pivot_threshold);
        if let Some(p) = built.as_mut() {
            p.setup(a, budget)?;
        }
        let held = built.as_ref().map_or(0, |p| p.memory_bytes());
        if let PC::Lu = pc {
            report.fill_used = a.dim();
            report.tol_used = 0.0;
        }

        // Every column runs to its own end; the worst non-convergence is
        // reported once all of them hold their last iterate.
        let mut columns = || -> Result<(), EqError> {
            let mut converged = true;
            for (b, x) in rhs.iter().zip(xs.iter_mut()) {
                x.fill(T::zero());
                let (iterations, rel) = match self.run(a, built.as_deref(), b, x, budget) {
                    Ok(stats) => {
                        let b_norm = norm(b);
                        let rel = if b_norm > 0.0 { stats.final_residual / b_norm } else { 0.0 };
                        (stats.iterations, rel)
                    }
                    Err(EqError::NotConverged { iterations, residual }) => {
                        converged = false;
                        (iterations, residual)
                    }
                    Err(e) => return Err(e),
                };
                report.iterations = report.iterations.max(iterations);
                report.residual = report.residual.max(rel);
            }
            if converged {
                Ok(())
            } else {
                Err(EqError::NotConverged {
                    iterations: report.iterations,
                    residual: report.residual,
                })
            }
        };
        let result = columns();
        budget.release(held);
        result
    }

    fn run<T: Scalar>(
        &self,
        a: &SparseMatrix<T>,
        pc: Option<&dyn Preconditioner<T>>,
        b: &[T],
        x: &mut [T],
        budget: &mut WorkBudget,
    ) -> Result<SolveStats, EqError> {
        match self.kind {
            IterativeKind::BiCgStab => BiCgStabSolver::new(self.tol, self.max_it)
                .with_print_interval(self.print_interval)
                .solve(a, pc, b, x, budget),
            IterativeKind::Gmres => GmresSolver::new(self.restart, self.tol, self.max_it)
                .with_print_interval(self.print_interval)
                .solve(a, pc, b, x, budget),
            IterativeKind::Refinement => {
                RefinementSolver::new(self.tol, self.max_it).solve(a, pc, b, x, budget)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convection_diffusion(n: usize) -> SparseMatrix<f64> {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 2.5));
            if i > 0 {
                t.push((i, i - 1, -1.5));
            }
            if i + 1 < n {
                t.push((i, i + 1, -0.6));
            }
            if i + 5 < n {
                t.push((i, i + 5, -0.1));
            }
        }
        SparseMatrix::from_triplets(n, t).unwrap()
    }

    fn context(kind: IterativeKind) -> KspContext {
        let mut parms = SolverParameters::new(60);
        parms.iterative_kind = kind;
        parms.accuracy = 1e-10;
        parms.max_iterations = 400;
        parms.fill_min = 1;
        parms.fill_max = 16;
        parms.tol_min = 1e-8;
        parms.tol_max = 1e-1;
        KspContext::from_parameters(&parms)
    }

    #[test]
    fn every_kind_solves_multiple_rhs() {
        let a = convection_diffusion(60);
        let rhs = vec![vec![1.0; 60], (0..60).map(|i| i as f64).collect()];
        for kind in [IterativeKind::BiCgStab, IterativeKind::Gmres, IterativeKind::Refinement] {
            let ksp = context(kind);
            let mut xs = vec![vec![0.0; 60]; 2];
            let mut tuning = IlutTuning::default();
            let mut report = KspReport::default();
            ksp.solve(&a, &rhs, &mut xs, &mut tuning, &mut WorkBudget::unlimited(), &mut report)
                .unwrap();
            for (b, x) in rhs.iter().zip(&xs) {
                let ax = a.mul_vec(x).unwrap();
                let err: f64 = ax.iter().zip(b).map(|(u, v)| (u - v).abs()).fold(0.0, f64::max);
                assert!(err < 1e-6, "{kind:?}: residual {err}");
            }
            assert!(report.attempts >= 1);
            assert!(tuning.suggested_fill.is_some());
        }
    }

    #[test]
    fn failed_attempts_enrich_the_preconditioner() {
        let a = convection_diffusion(60);
        let rhs = vec![vec![1.0; 60]];
        let mut ksp = context(IterativeKind::Refinement);
        ksp.max_it = 3;
        let mut xs = vec![vec![0.0; 60]];
        let mut tuning = IlutTuning::default();
        let mut report = KspReport::default();
        let mut budget = WorkBudget::unlimited();
        ksp.solve(&a, &rhs, &mut xs, &mut tuning, &mut budget, &mut report)
            .unwrap();
        assert!(report.attempts > 1);
        assert!(report.fill_used > 1);
        assert_eq!(budget.bytes_used(), 0);
    }

    #[test]
    fn other_preconditioners_get_one_attempt() {
        let a = convection_diffusion(60);
        let rhs = vec![vec![1.0; 60]];
        let mut ksp = context(IterativeKind::BiCgStab);
        ksp.preconditioner = PreconditionerKind::None;
        ksp.max_it = 2;
        let mut xs = vec![vec![0.0; 60]];
        let mut report = KspReport::default();
        let err = ksp
            .solve(
                &a,
                &rhs,
                &mut xs,
                &mut IlutTuning::default(),
                &mut WorkBudget::unlimited(),
                &mut report,
            )
            .unwrap_err();
        assert!(matches!(err, EqError::NotConverged { iterations: 2, .. }));
        assert_eq!(report.iterations, 2);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn every_column_keeps_its_last_iterate() {
        let a = convection_diffusion(60);
        let rhs = vec![vec![1.0; 60], (0..60).map(|i| (i as f64).cos()).collect()];
        let mut ksp = context(IterativeKind::BiCgStab);
        ksp.preconditioner = PreconditionerKind::Jacobi;
        ksp.max_it = 2;
        let mut xs = vec![vec![0.0; 60]; 2];
        let mut report = KspReport::default();
        let err = ksp
            .solve(
                &a,
                &rhs,
                &mut xs,
                &mut IlutTuning::default(),
                &mut WorkBudget::unlimited(),
                &mut report,
            )
            .unwrap_err();
        assert!(matches!(err, EqError::NotConverged { iterations: 2, .. }));
        for x in &xs {
            assert!(x.iter().any(|&v| v != 0.0));
        }
    }

    #[test]
    fn suggestion_seeds_next_solve() {
        let ksp = context(IterativeKind::Gmres);
        let tuning = IlutTuning {
            suggested_fill: Some(100),
            suggested_tol: Some(1e-3),
        };
        assert_eq!(ksp.initial_ilut(&tuning), (16, 1e-3));
        assert_eq!(ksp.richer_ilut(16, 1e-8), None);
        assert_eq!(ksp.cheaper_ilut(8, 1e-3), (4, 1e-2));
    }
}
