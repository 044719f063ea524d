//! Row/column permutations.

use crate::error::EqError;

/// A bijection on `[0, n)`. Position `k` of the permuted system holds the
/// original index `perm[k]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    perm: Vec<usize>,
    inv: Vec<usize>,
}

impl Permutation {
    pub fn identity(n: usize) -> Self {
        let perm: Vec<usize> = (0..n).collect();
        Self {
            inv: perm.clone(),
            perm,
        }
    }

    /// Validates that `perm` is a bijection.
    pub fn from_vec(perm: Vec<usize>) -> Result<Self, EqError> {
        let n = perm.len();
        let mut inv = vec![usize::MAX; n];
        for (k, &old) in perm.iter().enumerate() {
            if old >= n {
                return Err(EqError::InvalidPermutation(format!(
                    "entry {old} at position {k} is not below {n}"
                )));
            }
            if inv[old] != usize::MAX {
                return Err(EqError::InvalidPermutation(format!(
                    "index {old} appears at positions {} and {k}",
                    inv[old]
                )));
            }
            inv[old] = k;
        }
        Ok(Self { perm, inv })
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.perm.iter().enumerate().all(|(k, &p)| k == p)
    }

    /// Original index stored at permuted position `k`.
    #[inline]
    pub fn old_index(&self, k: usize) -> usize {
        self.perm[k]
    }

    /// Permuted position of original index `i`.
    #[inline]
    pub fn new_index(&self, i: usize) -> usize {
        self.inv[i]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.perm
    }

    /// y = P·x, i.e. `y[k] = x[perm[k]]`.
    pub fn apply<T: Copy>(&self, x: &[T]) -> Result<Vec<T>, EqError> {
        EqError::dims(self.len(), x.len())?;
        Ok(self.perm.iter().map(|&old| x[old]).collect())
    }

    /// y = Pᵗ·x, the inverse of [`apply`](Self::apply).
    pub fn apply_inverse<T: Copy>(&self, x: &[T]) -> Result<Vec<T>, EqError> {
        EqError::dims(self.len(), x.len())?;
        Ok(self.inv.iter().map(|&k| x[k]).collect())
    }

    /// The permutation that first applies `self`, then `then` on the result.
    pub fn then(&self, then: &Permutation) -> Result<Permutation, EqError> {
        EqError::dims(self.len(), then.len())?;
        let perm = then.perm.iter().map(|&k| self.perm[k]).collect();
        Permutation::from_vec(perm)
    }

    pub fn inverse(&self) -> Permutation {
        Permutation {
            perm: self.inv.clone(),
            inv: self.perm.clone(),
        }
    }
}
