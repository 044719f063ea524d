//! External solver backends.
//!
//! A backend receives a compiled matrix as a CSR triple (diagonal merged into
//! the rows), one right-hand side and a small capability descriptor, and
//! returns the solution or a failure in one of a few distinguishable
//! categories. The engine does not depend on how the backend solves.

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};
use thiserror::Error;

use crate::core::traits::{NumericKind, Scalar};
use crate::error::{BackendPhase, EqError};

/// What the caller asks of a backend besides the system itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub complex: bool,
    /// 0 = silent; higher values allow the backend more chatter.
    pub verbosity: u8,
    pub threads: usize,
    /// Byte ceiling the backend must respect, if any.
    pub byte_limit: Option<u64>,
}

impl BackendCapabilities {
    pub fn for_kind(kind: NumericKind) -> Self {
        Self {
            complex: kind == NumericKind::Complex,
            verbosity: 0,
            threads: default_threads(),
            byte_limit: None,
        }
    }
}

#[cfg(feature = "rayon")]
fn default_threads() -> usize {
    num_cpus::get()
}

#[cfg(not(feature = "rayon"))]
fn default_threads() -> usize {
    1
}

/// A compiled system handed to a backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a, T> {
    pub n: usize,
    pub row_ptr: &'a [usize],
    pub col_idx: &'a [usize],
    pub values: &'a [T],
    pub rhs: &'a [T],
    pub capabilities: BackendCapabilities,
}

impl<T> BackendRequest<'_, T> {
    /// Structural consistency of the CSR triple.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.row_ptr.len() != self.n + 1 || self.rhs.len() != self.n {
            return Err(BackendError::Setup(format!(
                "dimension {} does not match row pointers ({}) or rhs ({})",
                self.n,
                self.row_ptr.len(),
                self.rhs.len()
            )));
        }
        if self.col_idx.len() != self.values.len() || self.row_ptr[self.n] != self.values.len() {
            return Err(BackendError::Setup(String::from("inconsistent CSR arrays")));
        }
        if let Some(&c) = self.col_idx.iter().find(|&&c| c >= self.n) {
            return Err(BackendError::Setup(format!("column {c} out of range")));
        }
        Ok(())
    }
}

/// Failure categories a backend reports.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("setup failure: {0}")]
    Setup(String),
    #[error("numeric failure: {0}")]
    Numeric(String),
    #[error("substitution failure: {0}")]
    Substitution(String),
    #[error("resource failure: {0}")]
    Resource(String),
}

impl From<BackendError> for EqError {
    fn from(e: BackendError) -> Self {
        let (phase, message) = match e {
            BackendError::Setup(m) => (BackendPhase::Setup, m),
            BackendError::Numeric(m) => (BackendPhase::Numeric, m),
            BackendError::Substitution(m) => (BackendPhase::Substitution, m),
            BackendError::Resource(m) => (BackendPhase::Resource, m),
        };
        EqError::Backend { phase, message }
    }
}

/// Request/response contract of an external solver.
pub trait SolverBackend<T: Scalar> {
    fn name(&self) -> &str;

    fn solve(&mut self, request: &BackendRequest<'_, T>) -> Result<Vec<T>, BackendError>;
}

/// Dense LU backend built on faer's full-pivoting factorization.
///
/// Real systems only; intended for small systems and as a reference solver.
#[derive(Debug, Default, Clone)]
pub struct FaerDenseBackend;

impl FaerDenseBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SolverBackend<f64> for FaerDenseBackend {
    fn name(&self) -> &str {
        "faer-dense-lu"
    }

    fn solve(&mut self, request: &BackendRequest<'_, f64>) -> Result<Vec<f64>, BackendError> {
        request.validate()?;
        if request.capabilities.complex {
            return Err(BackendError::Setup(String::from("complex systems are not supported")));
        }
        let n = request.n;
        let bytes = (n as u64)
            .saturating_mul(n as u64)
            .saturating_mul(std::mem::size_of::<f64>() as u64);
        if let Some(limit) = request.capabilities.byte_limit {
            if bytes > limit {
                return Err(BackendError::Resource(format!(
                    "dense factorization needs {bytes} bytes, limit is {limit}"
                )));
            }
        }

        let mut dense = vec![0.0; n * n];
        for i in 0..n {
            for k in request.row_ptr[i]..request.row_ptr[i + 1] {
                dense[i * n + request.col_idx[k]] += request.values[k];
            }
        }
        let a = Mat::from_fn(n, n, |i, j| dense[i * n + j]);
        let factor = FullPivLu::new(a.as_ref());

        let mut x = request.rhs.to_vec();
        let x_mat = MatMut::from_column_major_slice_mut(&mut x, n, 1);
        factor.solve_in_place_with_conj(Conj::No, x_mat);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::Numeric(String::from("matrix is singular")));
        }
        if request.capabilities.verbosity > 0 {
            log::info!("{}: solved dense system of dimension {n}", self.name());
        }
        Ok(x)
    }
}
