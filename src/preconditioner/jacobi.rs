// Jacobi preconditioner implementation

use crate::core::budget::{WorkBudget, value_bytes};
use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::matrix::SparseMatrix;
use crate::preconditioner::Preconditioner;

/// Jacobi preconditioner: M⁻¹ = D⁻¹
#[derive(Debug, Clone, Default)]
pub struct Jacobi<T> {
    pub(crate) inv_diag: Vec<T>,
}

impl<T: Scalar> Jacobi<T> {
    /// new with empty state; user must call `setup`.
    pub fn new() -> Self {
        Self {
            inv_diag: Vec::new(),
        }
    }
}

impl<T: Scalar> Preconditioner<T> for Jacobi<T> {
    fn setup(&mut self, a: &SparseMatrix<T>, budget: &mut WorkBudget) -> Result<(), EqError> {
        budget.charge(a.dim() as u64)?;
        budget.reserve(value_bytes::<T>(a.dim()))?;
        let mut inv_diag = Vec::with_capacity(a.dim());
        for (i, &d) in a.diagonal().iter().enumerate() {
            if d == T::zero() {
                budget.release(value_bytes::<T>(a.dim()));
                return Err(EqError::ZeroPivot { row: i });
            }
            inv_diag.push(d.inv());
        }
        self.inv_diag = inv_diag;
        Ok(())
    }

    fn apply(&self, x: &[T], y: &mut [T]) -> Result<(), EqError> {
        EqError::dims(self.inv_diag.len(), x.len())?;
        EqError::dims(self.inv_diag.len(), y.len())?;
        for ((yi, xi), di) in y.iter_mut().zip(x).zip(&self.inv_diag) {
            *yi = *di * *xi;
        }
        Ok(())
    }

    fn work_per_apply(&self) -> u64 {
        self.inv_diag.len() as u64
    }

    fn memory_bytes(&self) -> u64 {
        value_bytes::<T>(self.inv_diag.len())
    }
}
