use std::fmt;
use thiserror::Error;

use crate::core::traits::NumericKind;

// Unified error type for eqsys

/// Resource whose budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Abstract floating-point work units ("bogoflops").
    Work,
    /// Bytes reserved for matrices, factors and Krylov bases.
    Bytes,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Work => write!(f, "work units"),
            Resource::Bytes => write!(f, "bytes"),
        }
    }
}

/// Phase of an external backend call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPhase {
    Setup,
    Numeric,
    Substitution,
    Resource,
}

impl fmt::Display for BackendPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendPhase::Setup => "setup",
            BackendPhase::Numeric => "numeric",
            BackendPhase::Substitution => "substitution",
            BackendPhase::Resource => "resource",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EqError {
    #[error("allocation failed: {0}")]
    Allocation(String),
    #[error("bad access: {0}")]
    BadAccess(&'static str),
    #[error("numeric kind mismatch: system is {actual}, requested {requested}")]
    KindMismatch {
        actual: NumericKind,
        requested: NumericKind,
    },
    #[error("{what} index {index} out of range [0, {bound})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        bound: usize,
    },
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid permutation: {0}")]
    InvalidPermutation(String),
    #[error("zero pivot at row {row}")]
    ZeroPivot { row: usize },
    #[error("not converged after {iterations} iterations (relative residual {residual:e})")]
    NotConverged { iterations: usize, residual: f64 },
    #[error("resource limit exceeded: {resource} used {used}, limit {limit}")]
    ResourceLimit {
        resource: Resource,
        used: u64,
        limit: u64,
    },
    #[error("index range exceeded: dimension {dimension} squared overflows the index type")]
    IndexRange { dimension: usize },
    #[error("matrix has not been compiled")]
    NotCompiled,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("i/o error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("format error in {path} (line {line}): {message}")]
    Format {
        path: String,
        line: usize,
        message: String,
    },
    #[error("type mismatch in {path}: file holds {found} data, expected {expected}")]
    FileTypeMismatch {
        path: String,
        found: NumericKind,
        expected: NumericKind,
    },
    #[error("backend {phase} failure: {message}")]
    Backend { phase: BackendPhase, message: String },
    #[error("invalid option {name}: {message}")]
    InvalidOption { name: String, message: String },
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl EqError {
    /// True for budget failures, which callers retry with larger limits
    /// rather than different numerics.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, EqError::ResourceLimit { .. } | EqError::Allocation(_))
    }

    pub fn is_not_converged(&self) -> bool {
        matches!(self, EqError::NotConverged { .. })
    }

    pub(crate) fn out_of_range(what: &'static str, index: usize, bound: usize) -> Self {
        EqError::IndexOutOfRange { what, index, bound }
    }

    pub(crate) fn dims(expected: usize, got: usize) -> Result<(), Self> {
        if expected == got {
            Ok(())
        } else {
            Err(EqError::DimensionMismatch { expected, got })
        }
    }
}
