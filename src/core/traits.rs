//! Core linear-algebra traits for eqsys.
//!
//! The whole engine is generic over [`Scalar`], which abstracts the two
//! numeric kinds an equation system can hold: `f64` and `Complex64`.

use num_complex::Complex64;
use num_traits::{NumAssign, One, Zero};
use std::fmt::{self, Debug};
use std::ops::Neg;

/// Numeric kind of an equation system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Real,
    Complex,
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericKind::Real => write!(f, "real"),
            NumericKind::Complex => write!(f, "complex"),
        }
    }
}

/// Scalar types the engine can assemble and solve over.
///
/// Norms and tolerances are always measured in `f64`.
pub trait Scalar:
    NumAssign + Copy + Send + Sync + Debug + PartialEq + Zero + One + Neg<Output = Self> + 'static
{
    /// Numeric kind tag of this scalar.
    const KIND: NumericKind;

    /// Complex conjugate (identity for reals).
    fn conj(self) -> Self;

    /// Squared magnitude |z|².
    fn norm_sqr(self) -> f64;

    /// Magnitude |z|.
    #[inline]
    fn abs(self) -> f64 {
        self.norm_sqr().sqrt()
    }

    /// Real part.
    fn re(self) -> f64;

    /// Imaginary part (zero for reals).
    fn im(self) -> f64;

    /// Embed a real value.
    fn from_real(r: f64) -> Self;

    /// Build from real and imaginary parts; reals drop the imaginary part.
    fn from_parts(re: f64, im: f64) -> Self;

    /// Principal square root.
    fn sqrt(self) -> Self;

    /// Multiplicative inverse 1/z.
    #[inline]
    fn inv(self) -> Self {
        Self::one() / self
    }

    /// True when every component is finite.
    #[inline]
    fn is_finite(self) -> bool {
        self.re().is_finite() && self.im().is_finite()
    }
}

impl Scalar for f64 {
    const KIND: NumericKind = NumericKind::Real;

    #[inline]
    fn conj(self) -> Self {
        self
    }

    #[inline]
    fn norm_sqr(self) -> f64 {
        self * self
    }

    #[inline]
    fn abs(self) -> f64 {
        f64::abs(self)
    }

    #[inline]
    fn re(self) -> f64 {
        self
    }

    #[inline]
    fn im(self) -> f64 {
        0.0
    }

    #[inline]
    fn from_real(r: f64) -> Self {
        r
    }

    #[inline]
    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}

impl Scalar for Complex64 {
    const KIND: NumericKind = NumericKind::Complex;

    #[inline]
    fn conj(self) -> Self {
        Complex64::conj(&self)
    }

    #[inline]
    fn norm_sqr(self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    #[inline]
    fn abs(self) -> f64 {
        self.re.hypot(self.im)
    }

    #[inline]
    fn re(self) -> f64 {
        self.re
    }

    #[inline]
    fn im(self) -> f64 {
        self.im
    }

    #[inline]
    fn from_real(r: f64) -> Self {
        Complex64::new(r, 0.0)
    }

    #[inline]
    fn from_parts(re: f64, im: f64) -> Self {
        Complex64::new(re, im)
    }

    #[inline]
    fn sqrt(self) -> Self {
        Complex64::sqrt(self)
    }

    #[inline]
    fn inv(self) -> Self {
        let d = self.norm_sqr();
        Complex64::new(self.re / d, -self.im / d)
    }
}

/// Matrix–vector product: y ← A x.
pub trait MatVec<T> {
    /// Compute y = A · x.
    fn matvec(&self, x: &[T], y: &mut [T]);

    /// Number of stored entries, used to price one product in work units.
    fn work_per_product(&self) -> u64;
}

/// Uniform indexing into vectors and matrices.
pub trait Indexing {
    /// Number of rows (or length for a vector).
    fn nrows(&self) -> usize;
}

impl<T> Indexing for Vec<T> {
    fn nrows(&self) -> usize {
        self.len()
    }
}
