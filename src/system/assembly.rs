//! Assembly algebra: combining the components of an equation system into
//! the scaled, transformed system handed to pre-elimination.
//!
//! With every optional component in use the assembled system is
//!
//! ```text
//! A = Sr·(Tb·As + Ab)·Tv·Sc      b = Sr·(Tb·bs + bb)
//! ```
//!
//! and the solution of the original unknowns is `x = Tv·Sc·u` for the
//! solution `u` of `A·u = b`. Compiled transforms and the ordering are kept
//! in a [`TransformCache`] that survives nonlinear steps as far as the
//! Newton reuse level allows.

use crate::config::options::{NewtonReuse, SolverParameters, Usage};
use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::matrix::{Permutation, SparseMatrix};
use crate::system::equation_system::EquationSystem;

/// Compiled transforms, valid for the usage flags they were built with.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledTransforms<T> {
    key: (Usage, bool, bool),
    pub(crate) tb: Option<SparseMatrix<T>>,
    /// Tv itself, inverted already when the stored one is the inverse.
    pub(crate) tv: Option<SparseMatrix<T>>,
    pub(crate) sr: Option<Vec<T>>,
    pub(crate) sc: Option<Vec<T>>,
}

/// Elimination ordering of the assembled system plus the bandwidth-reducing
/// ordering of its leading block.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Ordering {
    /// `(elimination, bandwidth_reduction)` the ordering was computed with.
    pub(crate) key: (bool, bool),
    pub(crate) elimination: Permutation,
    pub(crate) leading: usize,
    pub(crate) inner: Option<Permutation>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TransformCache<T> {
    pub(crate) transforms: Option<CompiledTransforms<T>>,
    pub(crate) ordering: Option<Ordering>,
    /// Assembled (and, when it succeeded, pre-eliminated) system of the last solve.
    pub(crate) assembled: Option<SparseMatrix<T>>,
}

impl<T> Default for TransformCache<T> {
    fn default() -> Self {
        Self {
            transforms: None,
            ordering: None,
            assembled: None,
        }
    }
}

fn cache_key(parms: &SolverParameters) -> (Usage, bool, bool) {
    (parms.usage, parms.inverse_tv, parms.inverse_scaling)
}

pub(crate) fn ordering_key(parms: &SolverParameters) -> (bool, bool) {
    (parms.elimination, parms.bandwidth_reduction)
}

impl<T: Scalar> TransformCache<T> {
    /// Drops what the reuse level does not keep.
    pub(crate) fn retain(&mut self, level: NewtonReuse) {
        if level < NewtonReuse::KeepCompiled {
            self.transforms = None;
        }
        if level < NewtonReuse::KeepOrdering {
            self.ordering = None;
        }
        self.assembled = None;
    }

    pub(crate) fn invalidate_transforms(&mut self) {
        self.transforms = None;
    }

    pub(crate) fn invalidate_ordering(&mut self) {
        self.ordering = None;
    }

    /// The compiled transforms for `parms`, building them when the cache is
    /// empty or was built for other usage flags.
    pub(crate) fn transforms(
        &mut self,
        sys: &EquationSystem<T>,
        parms: &SolverParameters,
    ) -> Result<&CompiledTransforms<T>, EqError> {
        let stale = self
            .transforms
            .as_ref()
            .is_none_or(|t| t.key != cache_key(parms));
        if stale {
            let (sr, sc) = effective_scaling(sys, parms)?;
            self.transforms = Some(CompiledTransforms {
                key: cache_key(parms),
                tb: effective_tb(sys, parms),
                tv: effective_tv(sys, parms)?,
                sr,
                sc,
            });
        }
        self.transforms
            .as_ref()
            .ok_or(EqError::NotCompiled)
    }

    /// The cached ordering when it still fits a system of dimension `n`
    /// and was computed with the ordering options of `parms`.
    pub(crate) fn ordering_for(&self, n: usize, parms: &SolverParameters) -> Option<&Ordering> {
        self.ordering
            .as_ref()
            .filter(|o| o.elimination.len() == n && o.key == ordering_key(parms))
    }
}

pub(crate) fn effective_tb<T: Scalar>(
    sys: &EquationSystem<T>,
    parms: &SolverParameters,
) -> Option<SparseMatrix<T>> {
    parms.usage.contains(Usage::TB).then(|| sys.tb.compile())
}

pub(crate) fn effective_tv<T: Scalar>(
    sys: &EquationSystem<T>,
    parms: &SolverParameters,
) -> Result<Option<SparseMatrix<T>>, EqError> {
    if !parms.usage.contains(Usage::TV) {
        return Ok(None);
    }
    let tv = sys.tv.compile();
    if parms.inverse_tv {
        tv.invert().map(Some)
    } else {
        Ok(Some(tv))
    }
}

fn effective_vector<T: Scalar>(v: &[T], invert: bool) -> Result<Vec<T>, EqError> {
    if !invert {
        return Ok(v.to_vec());
    }
    v.iter()
        .enumerate()
        .map(|(i, &s)| {
            if s == T::zero() {
                Err(EqError::ZeroPivot { row: i })
            } else {
                Ok(s.inv())
            }
        })
        .collect()
}

pub(crate) fn effective_scaling<T: Scalar>(
    sys: &EquationSystem<T>,
    parms: &SolverParameters,
) -> Result<(Option<Vec<T>>, Option<Vec<T>>), EqError> {
    let sr = if parms.usage.contains(Usage::SR) {
        Some(effective_vector(&sys.sr, parms.inverse_scaling)?)
    } else {
        None
    };
    let sc = if parms.usage.contains(Usage::SC) {
        Some(effective_vector(&sys.sc, parms.inverse_scaling)?)
    } else {
        None
    };
    Ok((sr, sc))
}

/// The combined system `Tb·As + Ab` with right-hand sides `Tb·bs + bb`.
pub(crate) fn combine<T: Scalar>(
    sys: &EquationSystem<T>,
    tb: Option<&SparseMatrix<T>>,
) -> Result<(SparseMatrix<T>, Vec<Vec<T>>), EqError> {
    let a_s = sys.a_s.compile();
    let a_b = sys.a_b.compile();
    let forwarded = match tb {
        Some(tb) => tb.matrix_product(&a_s)?,
        None => a_s,
    };
    let matrix = SparseMatrix::linear_combination(T::one(), &forwarded, T::one(), &a_b)?;

    let mut rhs = Vec::with_capacity(sys.rhs_count);
    for (bs, bb) in sys.bs.iter().zip(&sys.bb) {
        let mut b = match tb {
            Some(tb) => tb.mul_vec(bs)?,
            None => bs.clone(),
        };
        for (bi, &bbi) in b.iter_mut().zip(bb) {
            *bi += bbi;
        }
        rhs.push(b);
    }
    Ok((matrix, rhs))
}

/// Inverse row maxima, folded into the row scaling by `auto_scaling`.
fn equilibration<T: Scalar>(a: &SparseMatrix<T>) -> Vec<T> {
    (0..a.dim())
        .map(|i| {
            let m = a.row_max_abs(i);
            if m > 0.0 { T::from_real(1.0 / m) } else { T::one() }
        })
        .collect()
}

/// Assembles `Sr·(Tb·As + Ab)·Tv·Sc` and `Sr·(Tb·bs + bb)`.
pub(crate) fn assemble<T: Scalar>(
    sys: &EquationSystem<T>,
    transforms: &CompiledTransforms<T>,
    parms: &SolverParameters,
) -> Result<(SparseMatrix<T>, Vec<Vec<T>>), EqError> {
    let (combined, mut rhs) = combine(sys, transforms.tb.as_ref())?;
    let mut a = match &transforms.tv {
        Some(tv) => combined.matrix_product(tv)?,
        None => combined,
    };
    if let Some(sc) = &transforms.sc {
        a.scale_columns(sc)?;
    }
    let mut row_scale = transforms.sr.clone();
    if let Some(sr) = &row_scale {
        a.scale_rows(sr)?;
    }
    if parms.auto_scaling {
        let d = equilibration(&a);
        a.scale_rows(&d)?;
        row_scale = Some(match row_scale {
            Some(sr) => sr.iter().zip(&d).map(|(&s, &di)| s * di).collect(),
            None => d,
        });
    }
    if let Some(s) = &row_scale {
        for b in &mut rhs {
            for (bi, &si) in b.iter_mut().zip(s) {
                *bi *= si;
            }
        }
    }
    log::debug!(
        "assembled system: n = {}, nnz = {}, bandwidth = {}",
        a.dim(),
        a.nnz(),
        a.bandwidth()
    );
    Ok((a, rhs))
}

/// Maps the solution `u` of the assembled system back to the original
/// unknowns: `x = Tv·Sc·u`.
pub(crate) fn recover<T: Scalar>(
    transforms: &CompiledTransforms<T>,
    mut u: Vec<T>,
) -> Result<Vec<T>, EqError> {
    if let Some(sc) = &transforms.sc {
        EqError::dims(u.len(), sc.len())?;
        for (ui, &si) in u.iter_mut().zip(sc) {
            *ui *= si;
        }
    }
    match &transforms.tv {
        Some(tv) => tv.mul_vec(&u),
        None => Ok(u),
    }
}
