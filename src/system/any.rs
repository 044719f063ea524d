//! An equation system whose numeric kind is picked at runtime.

use std::path::Path;

use num_complex::Complex64;

use crate::config::options::SolverParameters;
use crate::core::traits::NumericKind;
use crate::error::EqError;
use crate::system::equation_system::EquationSystem;

/// Real- or complex-valued equation system.
///
/// The lifecycle operations dispatch to the inner system; entry access goes
/// through the typed views [`real`](Self::real) and [`complex`](Self::complex).
#[derive(Debug)]
pub enum LinearSystem {
    Real(EquationSystem<f64>),
    Complex(EquationSystem<Complex64>),
}

macro_rules! dispatch {
    ($self:expr, $sys:ident => $body:expr) => {
        match $self {
            LinearSystem::Real($sys) => $body,
            LinearSystem::Complex($sys) => $body,
        }
    };
}

impl LinearSystem {
    pub fn new(kind: NumericKind) -> Self {
        match kind {
            NumericKind::Real => LinearSystem::Real(EquationSystem::new()),
            NumericKind::Complex => LinearSystem::Complex(EquationSystem::new()),
        }
    }

    pub fn kind(&self) -> NumericKind {
        match self {
            LinearSystem::Real(_) => NumericKind::Real,
            LinearSystem::Complex(_) => NumericKind::Complex,
        }
    }

    /// The real-valued view.
    pub fn real(&mut self) -> Result<&mut EquationSystem<f64>, EqError> {
        match self {
            LinearSystem::Real(sys) => Ok(sys),
            LinearSystem::Complex(sys) => Err(mismatch(sys, NumericKind::Real)),
        }
    }

    /// The complex-valued view.
    pub fn complex(&mut self) -> Result<&mut EquationSystem<Complex64>, EqError> {
        match self {
            LinearSystem::Complex(sys) => Ok(sys),
            LinearSystem::Real(sys) => Err(mismatch(sys, NumericKind::Complex)),
        }
    }

    pub fn allocate(&mut self, parms: &SolverParameters) -> Result<(), EqError> {
        dispatch!(self, sys => sys.allocate(parms))
    }

    pub fn allocate_newton(&mut self, parms: &SolverParameters) -> Result<(), EqError> {
        dispatch!(self, sys => sys.allocate_newton(parms))
    }

    pub fn clear_newton(&mut self, parms: &SolverParameters) -> Result<(), EqError> {
        dispatch!(self, sys => sys.clear_newton(parms))
    }

    pub fn free_newton(&mut self) -> Result<(), EqError> {
        dispatch!(self, sys => sys.free_newton())
    }

    pub fn free(&mut self) {
        dispatch!(self, sys => sys.free())
    }

    pub fn solve(&mut self, parms: &mut SolverParameters) -> Result<(), EqError> {
        dispatch!(self, sys => sys.solve(parms))
    }

    pub fn load(&mut self, path: &Path, parms: &mut SolverParameters) -> Result<(), EqError> {
        dispatch!(self, sys => sys.load(path, parms))
    }

    pub fn is_valid(&self) -> Result<(), EqError> {
        dispatch!(self, sys => sys.is_valid())
    }

    pub fn dim(&self) -> usize {
        dispatch!(self, sys => sys.dim())
    }
}

fn mismatch<T: crate::core::traits::Scalar>(
    sys: &mut EquationSystem<T>,
    requested: NumericKind,
) -> EqError {
    let e = EqError::KindMismatch {
        actual: T::KIND,
        requested,
    };
    let _ = sys.record::<()>(Err(e.clone()));
    e
}
