//! Preconditioners for linear solvers.
//!
//! This module defines the Preconditioner trait and its implementations:
//! Jacobi and the threshold incomplete LU factorization (which also serves
//! as a complete LU when dropping is disabled).

use crate::core::budget::WorkBudget;
use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::matrix::SparseMatrix;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner<T: Scalar> {
    /// Build M from A, charging factorization work and storage to `budget`.
    fn setup(&mut self, a: &SparseMatrix<T>, budget: &mut WorkBudget) -> Result<(), EqError>;

    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &[T], z: &mut [T]) -> Result<(), EqError>;

    /// Work units of one application.
    fn work_per_apply(&self) -> u64;

    /// Bytes held in the budget by the built preconditioner.
    fn memory_bytes(&self) -> u64 {
        0
    }
}

pub mod ilut;
pub mod jacobi;

pub use ilut::Ilut;
pub use jacobi::Jacobi;

/// Unified preconditioner enum for all supported types.
pub use crate::context::pc_context::PC;
