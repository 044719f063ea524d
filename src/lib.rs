//! eqsys: assembly and solution of sparse linear equation systems.
//!
//! An [`EquationSystem`] collects the main system, boundary contributions,
//! forwarding and substitution transforms, scalings and pre-elimination
//! flags. Solving assembles them into one sparse system, eliminates the
//! flagged equations, reorders the rest for a small bandwidth and hands the
//! leading block to a direct LU, a preconditioned Krylov method or an
//! external backend, all under caller-supplied work and memory limits.

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod io;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod system;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use core::*;
pub use error::*;
pub use io::*;
pub use matrix::*;
pub use preconditioner::*;
pub use solver::*;
pub use system::*;
pub use utils::*;
