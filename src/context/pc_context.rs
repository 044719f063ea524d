//! Preconditioner context and configuration for Krylov solvers.
//!
//! The `PC` enum names every preconditioner the iterative path can build,
//! with its parameters, and turns itself into a boxed [`Preconditioner`].
//!
//! # Example
//!
//! ```rust
//! use eqsys::context::pc_context::PC;
//! let pc = PC::Ilut { fill: 10, droptol: 1e-3 };
//! let built = pc.build::<f64>(1e-14);
//! assert!(built.is_some());
//! ```

use crate::config::options::PreconditionerKind;
use crate::core::traits::Scalar;
use crate::matrix::factors::FactorRule;
use crate::preconditioner::{Ilut, Jacobi, Preconditioner};

/// Unified preconditioner enum for all supported types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PC {
    /// Unpreconditioned iteration.
    None,
    /// Jacobi (diagonal scaling) preconditioner.
    Jacobi,
    /// Incomplete LU factorization with threshold-based dropping (ILUT).
    ///
    /// - `fill`: Maximum number of entries kept in the L and in the U part of a row.
    /// - `droptol`: Drop tolerance relative to the row norm.
    Ilut { fill: usize, droptol: f64 },
    /// Complete LU factorization used as a preconditioner.
    Lu,
}

impl PC {
    /// The preconditioner for `kind`; ILUT starts from the given fill and tolerance.
    pub fn from_kind(kind: PreconditionerKind, fill: usize, droptol: f64) -> Self {
        match kind {
            PreconditionerKind::None => PC::None,
            PreconditionerKind::Jacobi => PC::Jacobi,
            PreconditionerKind::Ilut => PC::Ilut { fill, droptol },
            PreconditionerKind::Lu => PC::Lu,
        }
    }

    /// Builds the (not yet set up) preconditioner object. `None` for `PC::None`.
    pub fn build<T: Scalar>(&self, pivot_threshold: f64) -> Option<Box<dyn Preconditioner<T>>> {
        match *self {
            PC::None => None,
            PC::Jacobi => Some(Box::new(Jacobi::new())),
            PC::Ilut { fill, droptol } => Some(Box::new(Ilut::with_rule(FactorRule::ilut(
                fill,
                droptol,
                pivot_threshold,
            )))),
            PC::Lu => Some(Box::new(Ilut::complete(pivot_threshold))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::WorkBudget;
    use crate::matrix::SparseMatrix;

    #[test]
    fn builds_each_kind() {
        let a =
            SparseMatrix::from_triplets(2, vec![(0, 0, 2.0), (0, 1, 1.0), (1, 1, 4.0)]).unwrap();
        let mut budget = WorkBudget::unlimited();
        assert!(PC::None.build::<f64>(0.0).is_none());
        for pc in [PC::Jacobi, PC::Ilut { fill: 2, droptol: 1e-3 }, PC::Lu] {
            let mut p = pc.build::<f64>(0.0).unwrap();
            p.setup(&a, &mut budget).unwrap();
            let mut z = vec![0.0; 2];
            p.apply(&[2.0, 4.0], &mut z).unwrap();
            assert!(z.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn maps_configured_kind() {
        assert_eq!(
            PC::from_kind(PreconditionerKind::Ilut, 7, 1e-3),
            PC::Ilut { fill: 7, droptol: 1e-3 }
        );
        assert_eq!(PC::from_kind(PreconditionerKind::Lu, 7, 1e-3), PC::Lu);
    }
}
