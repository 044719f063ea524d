//! Core traits, vector kernels and resource accounting.

pub mod budget;
pub mod traits;
pub mod wrappers;

pub use budget::WorkBudget;
pub use traits::{Indexing, MatVec, NumericKind, Scalar};
