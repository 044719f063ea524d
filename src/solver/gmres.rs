//! Generalized Minimal Residual (GMRES) solver with fixed restart (Saad §6.4)
//!
//! Restarted GMRES(m) with right preconditioning: the Arnoldi process runs on
//! A·M⁻¹ and the update uses the preconditioned basis vectors, so the
//! minimised residual is the true residual of the original system. Givens
//! rotations reduce the Hessenberg matrix to triangular form as the cycle
//! progresses; the rotations are written for complex scalars (the cosine is
//! real, the sine carries the phase) and reduce to the usual form for reals.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4
//! - https://en.wikipedia.org/wiki/Generalized_minimal_residual_method

use crate::core::budget::{WorkBudget, value_bytes};
use crate::core::traits::{MatVec, Scalar};
use crate::core::wrappers::{axpy, dot, norm, residual};
use crate::error::EqError;
use crate::preconditioner::Preconditioner;
use crate::solver::{LinearSolver, pc_work, precondition};
use crate::utils::convergence::{Convergence, SolveStats};

/// Relative size of hᵢ₊₁,ᵢ below which the Krylov space is treated as invariant.
const HAPPY_BREAKDOWN: f64 = 1e-14;

/// GMRES solver struct with restart option.
pub struct GmresSolver {
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    /// Convergence criteria (tolerance and max iterations)
    pub conv: Convergence,
    /// Log progress every this many iterations (0 = never).
    pub print_interval: usize,
}

impl GmresSolver {
    /// Create a new GMRES solver with restart, tolerance, and max iterations.
    pub fn new(restart: usize, tol: f64, max_iters: usize) -> Self {
        Self {
            restart: restart.max(1),
            conv: Convergence { tol, max_iters },
            print_interval: 0,
        }
    }

    pub fn with_print_interval(mut self, every: usize) -> Self {
        self.print_interval = every;
        self
    }

    /// Bytes of the Krylov basis V, the preconditioned basis Z and the
    /// Hessenberg matrix for an `n`-dimensional system.
    fn basis_bytes<T>(&self, n: usize) -> u64 {
        let m = self.restart;
        value_bytes::<T>((2 * m + 1) * n + (m + 1) * m)
    }

    fn cycles<M: MatVec<T>, T: Scalar>(
        &self,
        a: &M,
        pc: Option<&dyn Preconditioner<T>>,
        b: &[T],
        x: &mut [T],
        threshold: f64,
        budget: &mut WorkBudget,
    ) -> Result<SolveStats, EqError> {
        let n = b.len();
        let m = self.restart;
        let mut r = vec![T::zero(); n];
        let mut w = vec![T::zero(); n];
        let mut iterations = 0;

        loop {
            // true residual at the start of every restart
            budget.charge(a.work_per_product() + n as u64)?;
            let beta = residual(a, x, b, &mut r);
            let (stop, stats) = self.conv.check(beta, threshold, iterations);
            if stop {
                return Ok(stats);
            }

            let mut v_basis: Vec<Vec<T>> = Vec::with_capacity(m + 1);
            let mut z_basis: Vec<Vec<T>> = Vec::with_capacity(m);
            let inv_beta = T::from_real(1.0 / beta);
            v_basis.push(r.iter().map(|&ri| ri * inv_beta).collect());

            let mut h = vec![vec![T::zero(); m]; m + 1];
            let mut g = vec![T::zero(); m + 1];
            g[0] = T::from_real(beta);
            let mut cs = vec![0.0; m];
            let mut sn = vec![T::zero(); m];
            let mut k = 0;

            for j in 0..m {
                if iterations >= self.conv.max_iters {
                    break;
                }
                iterations += 1;
                let orthogonalize = (4 * (j + 1) + 4) as u64 * n as u64;
                budget.charge(a.work_per_product() + pc_work(pc) + orthogonalize)?;

                // w = A M⁻¹ v_j
                let mut z = vec![T::zero(); n];
                precondition(pc, &v_basis[j], &mut z)?;
                a.matvec(&z, &mut w);
                z_basis.push(z);

                // Modified Gram-Schmidt, twice for stability
                for _ in 0..2 {
                    for i in 0..=j {
                        let hij = dot(&v_basis[i], &w);
                        h[i][j] += hij;
                        axpy(-hij, &v_basis[i], &mut w);
                    }
                }
                let h_next = norm(&w);
                h[j + 1][j] = T::from_real(h_next);

                apply_givens(&mut h, &mut g, &mut cs, &mut sn, j);
                k = j + 1;

                let res = g[j + 1].abs();
                if self.print_interval > 0 && iterations % self.print_interval == 0 {
                    log::info!("GMRES iteration {iterations}: residual estimate {res:e}");
                }
                if res <= threshold || h_next <= HAPPY_BREAKDOWN * beta {
                    break;
                }
                let inv = T::from_real(1.0 / h_next);
                v_basis.push(w.iter().map(|&wi| wi * inv).collect());
            }

            // Solve the triangular least-squares system H y = g and update x
            let y = back_substitution(&h, &g, k);
            for (yj, zj) in y.iter().zip(&z_basis) {
                axpy(*yj, zj, x);
            }
        }
    }
}

/// Apply previous rotations to column j of H, then compute and apply the
/// rotation annihilating H[j+1][j], updating g.
fn apply_givens<T: Scalar>(h: &mut [Vec<T>], g: &mut [T], cs: &mut [f64], sn: &mut [T], j: usize) {
    for i in 0..j {
        let c = T::from_real(cs[i]);
        let temp = c * h[i][j] + sn[i] * h[i + 1][j];
        h[i + 1][j] = -(sn[i].conj() * h[i][j]) + c * h[i + 1][j];
        h[i][j] = temp;
    }
    let a = h[j][j];
    let b = h[j + 1][j];
    let a_abs = a.abs();
    let r = (a.norm_sqr() + b.norm_sqr()).sqrt();
    if r == 0.0 {
        cs[j] = 1.0;
        sn[j] = T::zero();
    } else if a_abs == 0.0 {
        cs[j] = 0.0;
        sn[j] = b.conj() * T::from_real(1.0 / b.abs());
    } else {
        cs[j] = a_abs / r;
        sn[j] = a * T::from_real(1.0 / a_abs) * b.conj() * T::from_real(1.0 / r);
    }
    let c = T::from_real(cs[j]);
    h[j][j] = c * a + sn[j] * b;
    h[j + 1][j] = T::zero();
    // Update g
    let gj = g[j];
    g[j + 1] = -(sn[j].conj() * gj);
    g[j] = c * gj;
}

/// Solve upper-triangular system Hy = g for y, with zero-pivot protection.
fn back_substitution<T: Scalar>(h: &[Vec<T>], g: &[T], k: usize) -> Vec<T> {
    let mut y = vec![T::zero(); k];
    for i in (0..k).rev() {
        let mut sum = g[i];
        for j in (i + 1)..k {
            sum -= h[i][j] * y[j];
        }
        y[i] = if h[i][i].abs() > 0.0 { sum / h[i][i] } else { T::zero() };
    }
    y
}

impl<M, T> LinearSolver<M, T> for GmresSolver
where
    M: MatVec<T>,
    T: Scalar,
{
    /// Solve the linear system Ax = b using restarted GMRES.
    ///
    /// # Arguments
    /// * `a` - Matrix implementing `MatVec`
    /// * `pc` - Optional right preconditioner
    /// * `b` - Right-hand side vector
    /// * `x` - On input: initial guess; on output: solution vector
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
        let bytes = self.basis_bytes::<T>(n);
        budget.reserve(bytes)?;
        let result = self.cycles(a, pc, b, x, threshold, budget);
        budget.release(bytes);
        self.conv.finish(result?, b_norm)
    }
}
