//! Context module: strategy selection for the iterative path.
//!
//! - [`ksp_context`]: `KspContext`, which picks the Krylov method, builds the
//!   preconditioner and runs the ILUT fill-in/tolerance search.
//! - [`pc_context`]: the `PC` enum naming the available preconditioners.
//!
//! # References
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

pub mod ksp_context;
pub use ksp_context::{KspContext, KspReport};
pub mod pc_context;
