//! Krylov & direct solver interfaces.

use crate::core::budget::WorkBudget;
use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::preconditioner::Preconditioner;
use crate::utils::convergence::SolveStats;

/// Common interface for any direct or iterative solver.
pub trait LinearSolver<M, T: Scalar> {
    /// Solve A·x = b, writing result into `x` (which holds the initial guess
    /// on entry). Work and storage are charged to `budget`.
    ///
    /// Iterative solvers return `NotConverged` when the iteration limit is
    /// hit, leaving the last iterate in `x`.
    fn solve(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<T>>,
        b: &[T],
        x: &mut [T],
        budget: &mut WorkBudget,
    ) -> Result<SolveStats, EqError>;
}

/// z = M⁻¹ r, or a copy of r without preconditioner.
pub(crate) fn precondition<T: Scalar>(
    pc: Option<&dyn Preconditioner<T>>,
    r: &[T],
    z: &mut [T],
) -> Result<(), EqError> {
    match pc {
        Some(pc) => pc.apply(r, z),
        None => {
            z.copy_from_slice(r);
            Ok(())
        }
    }
}

pub(crate) fn pc_work<T: Scalar>(pc: Option<&dyn Preconditioner<T>>) -> u64 {
    pc.map_or(0, |p| p.work_per_apply())
}

pub mod backend;
pub use backend::{
    BackendCapabilities, BackendError, BackendRequest, FaerDenseBackend, SolverBackend,
};

pub mod bicgstab;
pub use bicgstab::BiCgStabSolver;

pub mod direct_lu;
pub use direct_lu::SparseLu;

pub mod gmres;
pub use gmres::GmresSolver;

pub mod refine;
pub use refine::RefinementSolver;
