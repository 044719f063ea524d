//! Solve orchestration.
//!
//! `solve` runs the whole pipeline on an equation system:
//!
//! 1. assemble `A = Sr·(Tb·As + Ab)·Tv·Sc`, `b = Sr·(Tb·bs + bb)`;
//! 2. order flagged equations last (`P`) and pre-eliminate them (`E`);
//! 3. reorder the remaining leading block by reverse Cuthill–McKee;
//! 4. solve the leading block with the external backend, the iterative
//!    path, or direct LU (iterative first, falling back to direct when both
//!    are enabled);
//! 5. back-substitute the eliminated unknowns and undo the permutation,
//!    scaling and variable substitution.
//!
//! Work and memory are charged to one [`WorkBudget`] per call, and the
//! statistics on the parameter record are written whatever the outcome.

use crate::config::options::{OutputFlags, SolveStatistics, SolverParameters, Strategy};
use crate::context::{KspContext, KspReport};
use crate::core::budget::WorkBudget;
use crate::core::traits::{NumericKind, Scalar};
use crate::core::wrappers::{norm, residual};
use crate::error::EqError;
use crate::io::SystemFile;
use crate::matrix::elimination::{
    EliminationFactors, back_substitute, compile_rows, eliminate, elimination_order, working_rows,
};
use crate::matrix::ordering::reverse_cuthill_mckee;
use crate::matrix::{Permutation, SparseMatrix};
use crate::solver::backend::{BackendCapabilities, BackendRequest};
use crate::solver::SparseLu;
use crate::system::assembly::{self, CompiledTransforms, Ordering, TransformCache};
use crate::system::equation_system::{EquationSystem, SystemState};

impl<T: Scalar> EquationSystem<T> {
    /// Assembles and solves the system, writing every solution column.
    ///
    /// On failure the error is also recorded for [`is_valid`](Self::is_valid).
    /// A non-converged iterative solve still leaves its last iterate in the
    /// solution.
    pub fn solve(&mut self, parms: &mut SolverParameters) -> Result<(), EqError> {
        let r = self.usable("solve before allocate");
        self.record(r)?;

        let mut budget = WorkBudget::new(parms.work_limit, parms.byte_limit);
        let mut stats = SolveStatistics::default();
        let mut cache = std::mem::take(&mut self.cache);
        let result = self.run(&mut cache, parms, &mut budget, &mut stats);
        self.cache = cache;

        stats.work_used = budget.work_used();
        stats.bytes_peak = budget.bytes_peak();
        match &result {
            Ok(()) => {
                log::info!(
                    "solved n = {} ({} rhs) by {}: {} iteration(s), relative residual {:e}, \
                     {} work units, {} bytes peak",
                    self.n,
                    self.rhs_count,
                    stats.strategy.map_or_else(|| String::from("-"), |s| s.to_string()),
                    stats.iterations,
                    stats.accuracy_achieved,
                    stats.work_used,
                    stats.bytes_peak
                );
                self.state = SystemState::Solved;
                self.clear_error();
            }
            Err(e) => log::warn!("solve of n = {} failed: {e}", self.n),
        }
        parms.statistics = stats;
        self.record(result)
    }

    fn run(
        &mut self,
        cache: &mut TransformCache<T>,
        parms: &mut SolverParameters,
        budget: &mut WorkBudget,
        stats: &mut SolveStatistics,
    ) -> Result<(), EqError> {
        parms.validate()?;
        cache.transforms(self, parms)?;
        let transforms = cache.transforms.take().ok_or(EqError::NotCompiled)?;
        let result = self.run_assembled(cache, &transforms, parms, budget, stats);
        cache.transforms = Some(transforms);
        result
    }

    fn run_assembled(
        &mut self,
        cache: &mut TransformCache<T>,
        transforms: &CompiledTransforms<T>,
        parms: &mut SolverParameters,
        budget: &mut WorkBudget,
        stats: &mut SolveStatistics,
    ) -> Result<(), EqError> {
        if parms.output.contains(OutputFlags::SYSTEM) {
            let path = parms.output_dir.join(format!("{}.sys", parms.output_prefix));
            let file = self.system_file(parms, parms.output.contains(OutputFlags::AUXILIARY))?;
            crate::io::write_system(&path, &file)?;
        }

        let (a, rhs) = assembly::assemble(self, transforms, parms)?;
        if let Some(row) = a.first_empty_row() {
            stats.disconnected = true;
            return Err(EqError::ZeroPivot { row });
        }
        let held = a.memory_bytes();
        budget.reserve(held)?;
        let result = self.eliminate_and_solve(cache, transforms, a, rhs, parms, budget, stats);
        budget.release(held);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn eliminate_and_solve(
        &mut self,
        cache: &mut TransformCache<T>,
        transforms: &CompiledTransforms<T>,
        a: SparseMatrix<T>,
        mut rhs: Vec<Vec<T>>,
        parms: &mut SolverParameters,
        budget: &mut WorkBudget,
        stats: &mut SolveStatistics,
    ) -> Result<(), EqError> {
        let n = self.n;
        let cached = cache.ordering_for(n, parms).cloned();
        let (perm, leading) = match &cached {
            Some(o) => (o.elimination.clone(), o.leading),
            None if parms.elimination => elimination_order(&self.elimination, &self.priority)?,
            None => (Permutation::identity(n), n),
        };
        stats.eliminated = n - leading;

        let permuted = if perm.is_identity() { a } else { a.permute(&perm)? };
        for b in &mut rhs {
            *b = perm.apply(b.as_slice())?;
        }

        cache.assembled = None;
        let (reduced, factors) = if leading < n {
            // Elimination works on rows moved out of the assembled matrix;
            // when it fails the assembled system is gone.
            let mut rows = working_rows(&permuted);
            drop(permuted);
            match eliminate(&mut rows, leading, parms.pivot_threshold, &perm, budget) {
                Ok(e) => (compile_rows(rows), e),
                Err(e) => {
                    stats.destroyed = true;
                    return Err(e);
                }
            }
        } else {
            (permuted, EliminationFactors::identity(n))
        };
        for b in &mut rhs {
            factors.apply(b)?;
        }
        log::debug!("pre-elimination: {} of {n} equations eliminated", n - leading);

        let ordering = match cached {
            Some(o) => o,
            None => Ordering {
                key: assembly::ordering_key(parms),
                inner: inner_ordering(&reduced, leading, parms.bandwidth_reduction)?,
                elimination: perm,
                leading,
            },
        };
        let result =
            self.solve_reduced(&reduced, &ordering, transforms, &rhs, parms, budget, stats);
        cache.ordering = Some(ordering);
        cache.assembled = Some(reduced);
        result
    }

    /// Solves the pre-eliminated system `reduced` (rows and columns in
    /// elimination order, right-hand sides already multiplied by `E`) and
    /// maps the result back into the solution columns.
    #[allow(clippy::too_many_arguments)]
    fn solve_reduced(
        &mut self,
        reduced: &SparseMatrix<T>,
        ordering: &Ordering,
        transforms: &CompiledTransforms<T>,
        rhs: &[Vec<T>],
        parms: &mut SolverParameters,
        budget: &mut WorkBudget,
        stats: &mut SolveStatistics,
    ) -> Result<(), EqError> {
        let n = self.n;
        let leading = ordering.leading;
        let lead = reduced.leading_block(leading)?;
        let inner = match &ordering.inner {
            Some(q) => {
                let p = lead.permute(q)?;
                log::debug!("bandwidth reduction: {} -> {}", lead.bandwidth(), p.bandwidth());
                p
            }
            None => lead,
        };
        let inner_rhs = rhs
            .iter()
            .map(|b| match &ordering.inner {
                Some(q) => q.apply(&b[..leading]),
                None => Ok(b[..leading].to_vec()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if parms.output.contains(OutputFlags::INNER_SYSTEM) {
            let path = parms.output_dir.join(format!("{}.inner.sys", parms.output_prefix));
            let file = SystemFile {
                matrix: inner.clone(),
                rhs: inner_rhs.clone(),
                auxiliary: None,
            };
            crate::io::write_system(&path, &file)?;
        }

        let mut ys = vec![vec![T::zero(); leading]; self.rhs_count];
        let solved = if leading == 0 {
            Ok(())
        } else {
            self.solve_inner(&inner, &inner_rhs, &mut ys, parms, budget, stats)
        };
        if solved.as_ref().is_err_and(|e| !e.is_not_converged()) {
            return solved;
        }
        stats.accuracy_achieved = relative_residual(&inner, &inner_rhs, &ys);

        for (k, y) in ys.into_iter().enumerate() {
            let mut xp = match &ordering.inner {
                Some(q) => q.apply_inverse(&y)?,
                None => y,
            };
            xp.resize(n, T::zero());
            back_substitute(reduced, leading, &rhs[k], &mut xp)?;
            let u = ordering.elimination.apply_inverse(&xp)?;
            self.x[k] = assembly::recover(transforms, u)?;
        }
        solved
    }

    fn solve_inner(
        &mut self,
        inner: &SparseMatrix<T>,
        rhs: &[Vec<T>],
        ys: &mut [Vec<T>],
        parms: &mut SolverParameters,
        budget: &mut WorkBudget,
        stats: &mut SolveStatistics,
    ) -> Result<(), EqError> {
        if parms.use_backend {
            stats.strategy = Some(Strategy::Backend);
            return self.solve_backend(inner, rhs, ys, parms);
        }

        if parms.iterative {
            stats.strategy = Some(Strategy::Iterative);
            let ksp = KspContext::from_parameters(parms);
            let mut report = KspReport::default();
            let result = ksp.solve(inner, rhs, ys, &mut parms.tuning, budget, &mut report);
            stats.iterations = report.iterations;
            stats.fill_used = report.fill_used;
            stats.tol_used = report.tol_used;
            stats.attempts = report.attempts;
            match result {
                Ok(()) => return Ok(()),
                Err(e) if parms.direct => {
                    log::warn!("iterative solve failed ({e}); falling back to direct LU");
                }
                Err(e) => return Err(e),
            }
        }

        if !parms.direct {
            return Err(EqError::Unsupported("no solving strategy enabled"));
        }
        stats.strategy = Some(Strategy::Direct);
        let mut lu = SparseLu::new(parms.pivot_threshold);
        lu.factor(inner, budget)?;
        let held = lu.memory_bytes();
        let mut substitute = || -> Result<(), EqError> {
            for (b, y) in rhs.iter().zip(ys.iter_mut()) {
                lu.solve_cached(b, y, budget)?;
            }
            Ok(())
        };
        let result = substitute();
        budget.release(held);
        stats.iterations = 1;
        stats.fill_used = lu.factors().map_or(0, |f| f.max_row_fill());
        stats.tol_used = 0.0;
        result
    }

    fn solve_backend(
        &mut self,
        inner: &SparseMatrix<T>,
        rhs: &[Vec<T>],
        ys: &mut [Vec<T>],
        parms: &SolverParameters,
    ) -> Result<(), EqError> {
        let backend = self
            .backend
            .as_mut()
            .ok_or(EqError::Unsupported("no solver backend registered"))?;
        let (row_ptr, col_idx, values) = inner.to_csr();
        let mut capabilities = BackendCapabilities::for_kind(T::KIND);
        capabilities.verbosity = parms.verbosity;
        capabilities.byte_limit = parms.byte_limit;
        log::debug!(
            "handing n = {} to backend {} ({})",
            inner.dim(),
            backend.name(),
            if T::KIND == NumericKind::Complex { "complex" } else { "real" }
        );
        for (b, y) in rhs.iter().zip(ys.iter_mut()) {
            let request = BackendRequest {
                n: inner.dim(),
                row_ptr: &row_ptr,
                col_idx: &col_idx,
                values: &values,
                rhs: b,
                capabilities,
            };
            let x = backend.solve(&request)?;
            EqError::dims(inner.dim(), x.len())?;
            *y = x;
        }
        Ok(())
    }
}

/// Bandwidth-reducing ordering of the leading block, `None` when it would
/// change nothing.
fn inner_ordering<T: Scalar>(
    reduced: &SparseMatrix<T>,
    leading: usize,
    bandwidth_reduction: bool,
) -> Result<Option<Permutation>, EqError> {
    if !bandwidth_reduction || leading < 2 {
        return Ok(None);
    }
    let q = reverse_cuthill_mckee(&reduced.leading_block(leading)?, leading)?;
    Ok((!q.is_identity()).then_some(q))
}

/// Largest ‖b − A·y‖/‖b‖ over the columns; zero right-hand sides count as exact.
fn relative_residual<T: Scalar>(a: &SparseMatrix<T>, rhs: &[Vec<T>], ys: &[Vec<T>]) -> f64 {
    let mut r = vec![T::zero(); a.dim()];
    rhs.iter()
        .zip(ys)
        .map(|(b, y)| {
            let b_norm = norm(b);
            if b_norm == 0.0 {
                0.0
            } else {
                residual(a, y, b, &mut r) / b_norm
            }
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::options::{IterativeKind, PreconditionerKind, Usage};
    use crate::system::equation_system::{MatrixPart, VectorPart};
    use approx::assert_abs_diff_eq;

    fn tridiagonal(parms: &SolverParameters) -> EquationSystem<f64> {
        let n = parms.dimension;
        let mut sys = EquationSystem::new();
        sys.allocate(parms).unwrap();
        for i in 0..n {
            sys.add(MatrixPart::As, i, i, -3.0).unwrap();
            if i > 0 {
                sys.add(MatrixPart::As, i, i - 1, 1.0).unwrap();
            }
            if i + 1 < n {
                sys.add(MatrixPart::As, i, i + 1, 0.5).unwrap();
            }
        }
        sys
    }

    fn set_rhs_from(sys: &mut EquationSystem<f64>, x0: &[f64]) {
        let a = sys.a_s.compile();
        let b = a.mul_vec(x0).unwrap();
        sys.set_vector_values(VectorPart::Bs(0), &b).unwrap();
    }

    #[test]
    fn direct_solve_recovers_known_solution() {
        let mut parms = SolverParameters::new(10);
        let mut sys = tridiagonal(&parms);
        let x0: Vec<f64> = (0..10).map(|i| i as f64 - 4.5).collect();
        set_rhs_from(&mut sys, &x0);
        sys.solve(&mut parms).unwrap();
        for (x, t) in sys.solution(0).unwrap().iter().zip(&x0) {
            assert_abs_diff_eq!(*x, *t, epsilon = 1e-10);
        }
        assert_eq!(sys.state(), SystemState::Solved);
        assert_eq!(parms.statistics.strategy, Some(Strategy::Direct));
        assert!(parms.statistics.work_used > 0);
    }

    #[test]
    fn elimination_and_transforms_compose() {
        let mut parms = SolverParameters::new(10);
        parms.usage = Usage::TV | Usage::SR | Usage::SC;
        let mut sys = tridiagonal(&parms);
        let x0: Vec<f64> = (0..10).map(|i| 1.0 + 0.1 * i as f64).collect();
        set_rhs_from(&mut sys, &x0);
        // Tv = diag(2), Sc = diag(0.5): x = Tv·Sc·u = u, scaling rows must not matter.
        for i in 0..10 {
            sys.set(MatrixPart::Tv, i, i, 2.0).unwrap();
            sys.set_vector(VectorPart::Sc, i, 0.5).unwrap();
            sys.set_vector(VectorPart::Sr, i, 1.0 + i as f64).unwrap();
        }
        sys.set_elimination(3, true, 1).unwrap();
        sys.set_elimination(7, true, 0).unwrap();
        sys.solve(&mut parms).unwrap();
        assert_eq!(parms.statistics.eliminated, 2);
        for (x, t) in sys.solution(0).unwrap().iter().zip(&x0) {
            assert_abs_diff_eq!(*x, *t, epsilon = 1e-10);
        }
    }

    #[test]
    fn iterative_falls_back_to_direct() {
        let mut parms = SolverParameters::new(10);
        parms.direct = true;
        parms.iterative = true;
        parms.preconditioner = PreconditionerKind::None;
        parms.iterative_kind = IterativeKind::Refinement;
        parms.max_iterations = 1;
        let mut sys = tridiagonal(&parms);
        let x0 = vec![1.0; 10];
        set_rhs_from(&mut sys, &x0);
        sys.solve(&mut parms).unwrap();
        assert_eq!(parms.statistics.strategy, Some(Strategy::Direct));
        for x in sys.solution(0).unwrap() {
            assert_abs_diff_eq!(*x, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn empty_equation_marks_disconnected() {
        let mut parms = SolverParameters::new(4);
        let mut sys = tridiagonal(&parms);
        for j in 0..4 {
            sys.set(MatrixPart::As, 2, j, 0.0).unwrap();
        }
        let err = sys.solve(&mut parms).unwrap_err();
        assert_eq!(err, EqError::ZeroPivot { row: 2 });
        assert!(parms.statistics.disconnected);
        assert_eq!(sys.is_valid(), Err(EqError::ZeroPivot { row: 2 }));
    }

    #[test]
    fn failed_elimination_destroys_assembled_system() {
        let mut parms = SolverParameters::new(4);
        let mut sys = tridiagonal(&parms);
        // Row 1 keeps only a tiny diagonal next to large couplings.
        sys.set(MatrixPart::As, 1, 1, 1e-20).unwrap();
        sys.set_elimination(1, true, 0).unwrap();
        sys.set_vector_values(VectorPart::Bs(0), &[1.0, 1.0, 1.0, 1.0]).unwrap();
        let err = sys.solve(&mut parms).unwrap_err();
        assert_eq!(err, EqError::ZeroPivot { row: 1 });
        assert!(parms.statistics.destroyed);
        assert!(sys.assembled().is_none());
        assert_eq!(sys.entry(MatrixPart::As, 1, 0).unwrap(), 1.0);
    }

    #[test]
    fn failed_inner_solve_keeps_assembled_system() {
        let mut parms = SolverParameters::new(2);
        parms.bandwidth_reduction = false;
        let mut sys = EquationSystem::new();
        sys.allocate(&parms).unwrap();
        sys.set(MatrixPart::As, 0, 1, 1.0).unwrap();
        sys.set(MatrixPart::As, 1, 0, 1.0).unwrap();
        sys.set_vector_values(VectorPart::Bs(0), &[1.0, 2.0]).unwrap();

        let err = sys.solve(&mut parms).unwrap_err();
        assert_eq!(err, EqError::ZeroPivot { row: 0 });
        assert!(!parms.statistics.destroyed);
        let assembled = sys.assembled().unwrap();
        assert_eq!(assembled.get(0, 1).unwrap(), 1.0);
        assert_eq!(assembled.get(1, 0).unwrap(), 1.0);

        // A retry with a different strategy still sees the same system.
        parms.use_backend = true;
        sys.set_backend(Box::new(crate::solver::FaerDenseBackend::new()));
        sys.solve(&mut parms).unwrap();
        assert_abs_diff_eq!(sys.solution(0).unwrap()[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sys.solution(0).unwrap()[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn ordering_options_apply_between_solves() {
        let mut parms = SolverParameters::new(10);
        let mut sys = tridiagonal(&parms);
        let x0: Vec<f64> = (0..10).map(|i| 0.5 * i as f64).collect();
        set_rhs_from(&mut sys, &x0);
        sys.set_elimination(6, true, 0).unwrap();
        sys.solve(&mut parms).unwrap();
        assert_eq!(parms.statistics.eliminated, 1);

        parms.elimination = false;
        sys.solve(&mut parms).unwrap();
        assert_eq!(parms.statistics.eliminated, 0);
        for (x, t) in sys.solution(0).unwrap().iter().zip(&x0) {
            assert_abs_diff_eq!(*x, *t, epsilon = 1e-10);
        }

        parms.bandwidth_reduction = false;
        sys.solve(&mut parms).unwrap();
        let ordering = sys.cache.ordering.as_ref().unwrap();
        assert_eq!(ordering.key, (false, false));
        assert!(ordering.inner.is_none());

        parms.elimination = true;
        sys.solve(&mut parms).unwrap();
        assert_eq!(parms.statistics.eliminated, 1);
    }

    #[test]
    fn backend_path_requires_registration() {
        let mut parms = SolverParameters::new(5);
        parms.use_backend = true;
        let mut sys = tridiagonal(&parms);
        set_rhs_from(&mut sys, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(matches!(sys.solve(&mut parms), Err(EqError::Unsupported(_))));
        sys.set_backend(Box::new(crate::solver::FaerDenseBackend::new()));
        sys.solve(&mut parms).unwrap();
        assert_eq!(parms.statistics.strategy, Some(Strategy::Backend));
        for (x, t) in sys.solution(0).unwrap().iter().zip([1.0, 2.0, 3.0, 4.0, 5.0]) {
            assert_abs_diff_eq!(*x, t, epsilon = 1e-12);
        }
    }
}
