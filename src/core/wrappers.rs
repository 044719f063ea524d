//! Vector kernels shared by the solvers.
//!
//! Dot products and norms switch to rayon parallel iterators when the
//! `rayon` feature is enabled and the vectors are long enough to benefit.
//! The inner product is conjugate-linear in its first argument, so the same
//! kernels serve real and complex systems.

use crate::core::traits::{MatVec, Scalar};

/// Vectors shorter than this are always reduced sequentially.
#[cfg(feature = "rayon")]
const PAR_THRESHOLD: usize = 4096;

/// Computes ⟨x, y⟩ = Σ conj(xᵢ) yᵢ.
pub fn dot<T: Scalar>(x: &[T], y: &[T]) -> T {
    assert_eq!(x.len(), y.len(), "Vectors must have the same length");
    #[cfg(feature = "rayon")]
    {
        if x.len() >= PAR_THRESHOLD {
            use rayon::prelude::*;
            return x
                .par_iter()
                .zip(y.par_iter())
                .map(|(xi, yi)| xi.conj() * *yi)
                .reduce(T::zero, |acc, v| acc + v);
        }
    }
    x.iter()
        .zip(y.iter())
        .fold(T::zero(), |acc, (xi, yi)| acc + xi.conj() * *yi)
}

/// Computes the Euclidean norm ‖x‖₂.
pub fn norm<T: Scalar>(x: &[T]) -> f64 {
    #[cfg(feature = "rayon")]
    {
        if x.len() >= PAR_THRESHOLD {
            use rayon::prelude::*;
            return x.par_iter().map(|xi| xi.norm_sqr()).sum::<f64>().sqrt();
        }
    }
    x.iter().map(|xi| xi.norm_sqr()).sum::<f64>().sqrt()
}

/// Maximum norm ‖x‖∞.
pub fn norm_inf<T: Scalar>(x: &[T]) -> f64 {
    x.iter().fold(0.0, |acc: f64, xi| acc.max(xi.abs()))
}

/// y ← y + a·x
pub fn axpy<T: Scalar>(a: T, x: &[T], y: &mut [T]) {
    assert_eq!(x.len(), y.len(), "Vectors must have the same length");
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * *xi;
    }
}

/// r ← b − A·x, returning ‖r‖₂.
pub fn residual<T: Scalar, M: MatVec<T> + ?Sized>(a: &M, x: &[T], b: &[T], r: &mut [T]) -> f64 {
    a.matvec(x, r);
    for (ri, bi) in r.iter_mut().zip(b) {
        *ri = *bi - *ri;
    }
    norm(r)
}
