//! Matrix module: sparse storage, assembly, orderings and factorizations.

pub mod builder;
pub mod elimination;
pub mod factors;
pub mod ordering;
pub mod permutation;
pub mod sparse;

pub use builder::MatrixBuilder;
pub use elimination::{EliminationFactors, EliminationStep};
pub use factors::{FactorRule, LuFactors, SparseRow};
pub use permutation::Permutation;
pub use sparse::SparseMatrix;
