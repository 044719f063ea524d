//! Convergence tracking & tolerance checks for iterative solvers.

use crate::error::EqError;

/// Stopping criteria.
///
/// An iterate is accepted once `‖b − A·x‖₂ <= max(tol, √ε) · ‖b‖₂`.
#[derive(Clone, Debug, PartialEq)]
pub struct Convergence {
    pub tol: f64,
    pub max_iters: usize,
}

/// Outcome of one solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    /// Absolute residual norm of the returned iterate.
    pub final_residual: f64,
    pub converged: bool,
}

impl SolveStats {
    pub fn converged(iterations: usize, final_residual: f64) -> Self {
        Self {
            iterations,
            final_residual,
            converged: true,
        }
    }
}

impl Convergence {
    pub fn new(tol: f64, max_iters: usize) -> Self {
        Self { tol, max_iters }
    }

    /// Effective relative tolerance, floored at the square root of machine epsilon.
    pub fn effective_tol(&self) -> f64 {
        self.tol.max(f64::EPSILON.sqrt())
    }

    /// Absolute residual threshold for a right-hand side of norm `b_norm`.
    pub fn threshold(&self, b_norm: f64) -> f64 {
        self.effective_tol() * b_norm
    }

    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    pub fn check(&self, res_norm: f64, threshold: f64, i: usize) -> (bool, SolveStats) {
        let converged = res_norm <= threshold;
        (
            converged || i >= self.max_iters,
            SolveStats {
                iterations: i,
                final_residual: res_norm,
                converged,
            },
        )
    }

    /// Turns final stats into the solver result: unconverged runs become
    /// `NotConverged` carrying the relative residual.
    pub fn finish(&self, stats: SolveStats, b_norm: f64) -> Result<SolveStats, EqError> {
        if stats.converged {
            return Ok(stats);
        }
        let residual = if b_norm > 0.0 {
            stats.final_residual / b_norm
        } else {
            stats.final_residual
        };
        Err(EqError::NotConverged {
            iterations: stats.iterations,
            residual,
        })
    }
}
