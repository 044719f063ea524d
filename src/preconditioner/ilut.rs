//! ILUT preconditioner
//!
//! Incomplete LU with threshold dropping and fill-in control.
//!
//! # Overview
//!
//! ILUT produces lower (L) and upper (U) triangular factors by dropping small
//! entries and limiting the number of nonzeros kept per row. The drop
//! tolerance is relative to the 2-norm of the original row; the fill parameter
//! caps the entries kept in the L part and in the U part of every row.
//! Built without dropping, the same factorization is the complete LU used by
//! [`PC::Lu`](crate::context::pc_context::PC::Lu).
//!
//! # Usage
//!
//! - Create an `Ilut` preconditioner with the desired fill and drop tolerance.
//! - Call `setup` with the system matrix to compute the factors.
//! - Use `apply` to solve M⁻¹r ≈ A⁻¹r using the computed factors.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, Section 10.4.

use crate::core::budget::{WorkBudget, entry_bytes};
use crate::core::traits::Scalar;
use crate::error::{EqError, Resource};
use crate::matrix::factors::{FactorRule, LuFactors, factorize};
use crate::matrix::SparseMatrix;
use crate::preconditioner::Preconditioner;

/// ILUT preconditioner struct.
#[derive(Debug, Clone)]
pub struct Ilut<T> {
    rule: FactorRule,
    factors: Option<LuFactors<T>>,
}

impl<T: Scalar> Ilut<T> {
    /// Incomplete factorization keeping at most `fill` entries per L and U row.
    pub fn new(fill: usize, droptol: f64) -> Self {
        Self::with_rule(FactorRule::ilut(fill, droptol, 0.0))
    }

    /// Complete factorization (no dropping).
    pub fn complete(pivot_threshold: f64) -> Self {
        Self::with_rule(FactorRule::complete(pivot_threshold))
    }

    pub fn with_rule(rule: FactorRule) -> Self {
        Self {
            rule,
            factors: None,
        }
    }

    pub fn rule(&self) -> &FactorRule {
        &self.rule
    }

    pub fn factors(&self) -> Option<&LuFactors<T>> {
        self.factors.as_ref()
    }

    /// Largest per-row fill actually produced by the last `setup`.
    pub fn fill_used(&self) -> usize {
        self.factors.as_ref().map_or(0, LuFactors::max_row_fill)
    }

    /// Checks that the minimum storage for the requested fill can be
    /// reserved, without keeping the reservation.
    fn check_space(&self, n: usize, budget: &mut WorkBudget) -> Result<(), EqError> {
        let Some(fill) = self.rule.fill else {
            return Ok(());
        };
        let bytes = entry_bytes::<T>(n.saturating_mul(2 * fill + 1));
        match budget.reserve(bytes) {
            Ok(()) => {
                budget.release(bytes);
                Ok(())
            }
            Err(EqError::ResourceLimit {
                resource: Resource::Bytes,
                used,
                limit,
            }) => Err(EqError::Allocation(format!(
                "fill-in {fill} needs {used} bytes, limit is {limit}"
            ))),
            Err(e) => Err(e),
        }
    }
}

impl<T: Scalar> Preconditioner<T> for Ilut<T> {
    /// Any previous factors are dropped; the caller releases their
    /// reservation (`memory_bytes`) beforehand.
    fn setup(&mut self, a: &SparseMatrix<T>, budget: &mut WorkBudget) -> Result<(), EqError> {
        self.factors = None;
        self.check_space(a.dim(), budget)?;
        let factors = factorize(a, &self.rule, budget)?;
        log::debug!(
            "ILUT setup: n = {}, nnz(LU) = {}, max row fill = {}",
            factors.dim(),
            factors.nnz(),
            factors.max_row_fill()
        );
        self.factors = Some(factors);
        Ok(())
    }

    fn apply(&self, r: &[T], z: &mut [T]) -> Result<(), EqError> {
        let factors = self.factors.as_ref().ok_or(EqError::NotCompiled)?;
        EqError::dims(factors.dim(), r.len())?;
        EqError::dims(factors.dim(), z.len())?;
        z.copy_from_slice(r);
        factors.solve_in_place(z);
        Ok(())
    }

    fn work_per_apply(&self) -> u64 {
        self.factors.as_ref().map_or(0, LuFactors::work_per_solve)
    }

    fn memory_bytes(&self) -> u64 {
        self.factors.as_ref().map_or(0, LuFactors::memory_bytes)
    }
}
