//! The equation system model.
//!
//! An [`EquationSystem`] aggregates the algebraic components a caller fills
//! in before solving: the main system `As·x = bs` (one or more right-hand
//! sides), the additive boundary system `Ab`, `bb`, the forwarding transform
//! `Tb`, the variable substitution `Tv`, the row and column scalings `Sr`,
//! `Sc`, and the pre-elimination flags. Unused components keep their neutral
//! values (identity or zero), so the assembled system degenerates to
//! `As·x = bs`.
//!
//! Every operation returns a `Result` and records its failure on the
//! instance, where [`EquationSystem::is_valid`] reports it. A bad-access
//! failure (use before `allocate` or after `free`) sticks until the next
//! successful `allocate`.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::options::{NewtonReuse, SolverParameters, Usage};
use crate::core::traits::{NumericKind, Scalar};
use crate::error::EqError;
use crate::io::{Auxiliary, SystemFile};
use crate::matrix::{MatrixBuilder, SparseMatrix};
use crate::solver::backend::SolverBackend;
use crate::system::assembly::{self, TransformCache};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Created,
    Allocated,
    NewtonAllocated,
    Solved,
    Freed,
}

/// Matrix components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixPart {
    /// Main (interior) matrix
    As,
    /// Additive boundary-condition matrix
    Ab,
    /// Forwarding transform of the main contributions
    Tb,
    /// Variable substitution
    Tv,
}

/// Vector components; right-hand sides and solutions carry their column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorPart {
    Bs(usize),
    Bb(usize),
    X(usize),
    Sr,
    Sc,
}

pub struct EquationSystem<T: Scalar> {
    pub(crate) state: SystemState,
    pub(crate) n: usize,
    pub(crate) rhs_count: usize,
    pub(crate) a_s: MatrixBuilder<T>,
    pub(crate) a_b: MatrixBuilder<T>,
    pub(crate) tb: MatrixBuilder<T>,
    pub(crate) tv: MatrixBuilder<T>,
    pub(crate) bs: Vec<Vec<T>>,
    pub(crate) bb: Vec<Vec<T>>,
    pub(crate) x: Vec<Vec<T>>,
    pub(crate) sr: Vec<T>,
    pub(crate) sc: Vec<T>,
    pub(crate) elimination: Vec<bool>,
    pub(crate) priority: Vec<i32>,
    pub(crate) metadata: BTreeMap<String, String>,
    pub(crate) cache: TransformCache<T>,
    pub(crate) backend: Option<Box<dyn SolverBackend<T>>>,
    last_error: Option<EqError>,
    bad_access: Option<&'static str>,
}

impl<T: Scalar> Default for EquationSystem<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> std::fmt::Debug for EquationSystem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquationSystem")
            .field("kind", &T::KIND)
            .field("state", &self.state)
            .field("n", &self.n)
            .field("rhs_count", &self.rhs_count)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<T: Scalar> EquationSystem<T> {
    /// An empty system in the `Created` state.
    pub fn new() -> Self {
        Self {
            state: SystemState::Created,
            n: 0,
            rhs_count: 0,
            a_s: MatrixBuilder::new(0),
            a_b: MatrixBuilder::new(0),
            tb: MatrixBuilder::new(0),
            tv: MatrixBuilder::new(0),
            bs: Vec::new(),
            bb: Vec::new(),
            x: Vec::new(),
            sr: Vec::new(),
            sc: Vec::new(),
            elimination: Vec::new(),
            priority: Vec::new(),
            metadata: BTreeMap::new(),
            cache: TransformCache::default(),
            backend: None,
            last_error: None,
            bad_access: None,
        }
    }

    pub fn kind(&self) -> NumericKind {
        T::KIND
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn rhs_count(&self) -> usize {
        self.rhs_count
    }

    /// `Ok` unless an operation failed since the last reset; the failure
    /// otherwise. Bad-access failures take precedence.
    pub fn is_valid(&self) -> Result<(), EqError> {
        if let Some(what) = self.bad_access {
            return Err(EqError::BadAccess(what));
        }
        match &self.last_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn record<R>(&mut self, result: Result<R, EqError>) -> Result<R, EqError> {
        if let Err(e) = &result {
            if let EqError::BadAccess(what) = e {
                self.bad_access = Some(*what);
            }
            self.last_error = Some(e.clone());
        }
        result
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub(crate) fn usable(&self, what: &'static str) -> Result<(), EqError> {
        match self.state {
            SystemState::Allocated | SystemState::NewtonAllocated | SystemState::Solved => Ok(()),
            SystemState::Created | SystemState::Freed => Err(EqError::BadAccess(what)),
        }
    }

    /// Allocates every component for `parms.dimension` equations and
    /// `parms.rhs_count` right-hand sides and resets the error state.
    pub fn allocate(&mut self, parms: &SolverParameters) -> Result<(), EqError> {
        if parms.rhs_count == 0 {
            let e = EqError::Allocation(String::from("at least one right-hand side is required"));
            return self.record(Err(e));
        }
        let n = parms.dimension;
        let k = parms.rhs_count;
        self.n = n;
        self.rhs_count = k;
        self.a_s = MatrixBuilder::new(n);
        self.a_b = MatrixBuilder::new(n);
        self.tb = MatrixBuilder::from_matrix(&SparseMatrix::identity(n));
        self.tv = MatrixBuilder::from_matrix(&SparseMatrix::identity(n));
        self.bs = vec![vec![T::zero(); n]; k];
        self.bb = vec![vec![T::zero(); n]; k];
        self.x = vec![vec![T::zero(); n]; k];
        self.sr = vec![T::one(); n];
        self.sc = vec![T::one(); n];
        self.elimination = vec![false; n];
        self.priority = vec![0; n];
        self.metadata.clear();
        self.cache = TransformCache::default();
        self.state = SystemState::Allocated;
        self.last_error = None;
        self.bad_access = None;
        log::debug!("allocated {} system: n = {n}, rhs = {k}", T::KIND);
        Ok(())
    }

    /// Prepares the next nonlinear step. What survives from the previous
    /// step is governed by `parms.newton_reuse`; see [`clear_newton`](Self::clear_newton).
    pub fn allocate_newton(&mut self, parms: &SolverParameters) -> Result<(), EqError> {
        let r = self.usable("allocate_newton before allocate");
        self.record(r)?;
        self.clear_newton(parms)?;
        self.state = SystemState::NewtonAllocated;
        Ok(())
    }

    /// Resets the per-step components according to the reuse level:
    /// `Fresh` drops the sparsity patterns of `As` and `Ab`, higher levels
    /// keep them with zeroed values; below `KeepCompiled` the compiled
    /// transforms are discarded, below `KeepOrdering` the ordering is.
    /// Right-hand sides are always zeroed.
    pub fn clear_newton(&mut self, parms: &SolverParameters) -> Result<(), EqError> {
        let r = self.usable("clear_newton before allocate");
        self.record(r)?;
        let level = parms.newton_reuse;
        if level == NewtonReuse::Fresh {
            self.a_s.clear();
            self.a_b.clear();
        } else {
            self.a_s.zero_values();
            self.a_b.zero_values();
        }
        for b in self.bs.iter_mut().chain(self.bb.iter_mut()) {
            b.fill(T::zero());
        }
        self.cache.retain(level);
        Ok(())
    }

    /// Releases the per-step components, keeping the permanent ones.
    pub fn free_newton(&mut self) -> Result<(), EqError> {
        let r = self.usable("free_newton before allocate");
        self.record(r)?;
        self.a_s.clear();
        self.a_b.clear();
        for b in self.bs.iter_mut().chain(self.bb.iter_mut()) {
            b.fill(T::zero());
        }
        self.cache.retain(NewtonReuse::Fresh);
        self.state = SystemState::Allocated;
        Ok(())
    }

    /// Releases everything and resets the error state; valid in any state.
    pub fn free(&mut self) {
        let backend = self.backend.take();
        *self = Self::new();
        self.backend = backend;
        self.state = SystemState::Freed;
    }

    /// Registers the external backend used when `use_backend` is set.
    pub fn set_backend(&mut self, backend: Box<dyn SolverBackend<T>>) {
        self.backend = Some(backend);
    }

    fn matrix_mut(&mut self, part: MatrixPart) -> &mut MatrixBuilder<T> {
        match part {
            MatrixPart::As => &mut self.a_s,
            MatrixPart::Ab => &mut self.a_b,
            MatrixPart::Tb => &mut self.tb,
            MatrixPart::Tv => &mut self.tv,
        }
    }

    fn matrix(&self, part: MatrixPart) -> &MatrixBuilder<T> {
        match part {
            MatrixPart::As => &self.a_s,
            MatrixPart::Ab => &self.a_b,
            MatrixPart::Tb => &self.tb,
            MatrixPart::Tv => &self.tv,
        }
    }

    fn touch(&mut self, part: MatrixPart) {
        if matches!(part, MatrixPart::Tb | MatrixPart::Tv) {
            self.cache.invalidate_transforms();
        }
    }

    /// Creates or overwrites a matrix entry.
    pub fn set(
        &mut self,
        part: MatrixPart,
        row: usize,
        col: usize,
        value: T,
    ) -> Result<(), EqError> {
        let r = self
            .usable("matrix access before allocate")
            .and_then(|()| self.matrix_mut(part).set(row, col, value));
        self.record(r)?;
        self.touch(part);
        Ok(())
    }

    /// Accumulates into a matrix entry.
    pub fn add(
        &mut self,
        part: MatrixPart,
        row: usize,
        col: usize,
        value: T,
    ) -> Result<(), EqError> {
        let r = self
            .usable("matrix access before allocate")
            .and_then(|()| self.matrix_mut(part).add(row, col, value));
        self.record(r)?;
        self.touch(part);
        Ok(())
    }

    /// Reads a matrix entry; absent entries are zero.
    pub fn entry(&mut self, part: MatrixPart, row: usize, col: usize) -> Result<T, EqError> {
        let r = self
            .usable("matrix access before allocate")
            .and_then(|()| self.matrix(part).get(row, col));
        self.record(r)
    }

    fn vector_slot(&mut self, part: VectorPart, index: usize) -> Result<&mut T, EqError> {
        self.usable("vector access before allocate")?;
        let (n, k) = (self.n, self.rhs_count);
        let v = match part {
            VectorPart::Bs(j) | VectorPart::Bb(j) | VectorPart::X(j) if j >= k => {
                return Err(EqError::out_of_range("right-hand side", j, k));
            }
            VectorPart::Bs(j) => &mut self.bs[j],
            VectorPart::Bb(j) => &mut self.bb[j],
            VectorPart::X(j) => &mut self.x[j],
            VectorPart::Sr => &mut self.sr,
            VectorPart::Sc => &mut self.sc,
        };
        v.get_mut(index).ok_or(EqError::out_of_range("vector", index, n))
    }

    pub fn set_vector(&mut self, part: VectorPart, index: usize, value: T) -> Result<(), EqError> {
        let r = self.vector_slot(part, index).map(|slot| *slot = value);
        self.record(r)?;
        if matches!(part, VectorPart::Sr | VectorPart::Sc) {
            self.cache.invalidate_transforms();
        }
        Ok(())
    }

    pub fn add_vector(&mut self, part: VectorPart, index: usize, value: T) -> Result<(), EqError> {
        let r = self.vector_slot(part, index).map(|slot| *slot += value);
        self.record(r)?;
        if matches!(part, VectorPart::Sr | VectorPart::Sc) {
            self.cache.invalidate_transforms();
        }
        Ok(())
    }

    pub fn vector_entry(&mut self, part: VectorPart, index: usize) -> Result<T, EqError> {
        let r = self.vector_slot(part, index).map(|slot| *slot);
        self.record(r)
    }

    /// Replaces a whole vector component.
    pub fn set_vector_values(&mut self, part: VectorPart, values: &[T]) -> Result<(), EqError> {
        let r = EqError::dims(self.n, values.len());
        self.record(r)?;
        for (i, &v) in values.iter().enumerate() {
            self.set_vector(part, i, v)?;
        }
        Ok(())
    }

    /// Solution column `k`.
    pub fn solution(&self, k: usize) -> Result<&[T], EqError> {
        self.usable("solution before allocate")?;
        self.x
            .get(k)
            .map(Vec::as_slice)
            .ok_or(EqError::out_of_range("right-hand side", k, self.rhs_count))
    }

    /// Marks `row` for pre-elimination; higher priorities are eliminated later.
    pub fn set_elimination(
        &mut self,
        row: usize,
        flag: bool,
        priority: i32,
    ) -> Result<(), EqError> {
        let r = self.usable("elimination flags before allocate").and_then(|()| {
            if row >= self.n {
                Err(EqError::out_of_range("row", row, self.n))
            } else {
                Ok(())
            }
        });
        self.record(r)?;
        self.elimination[row] = flag;
        self.priority[row] = priority;
        self.cache.invalidate_ordering();
        Ok(())
    }

    pub fn elimination_flags(&self) -> &[bool] {
        &self.elimination
    }

    /// Quantity/grid metadata written to the auxiliary file section.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<(), EqError> {
        let r = self.usable("metadata before allocate").and_then(|()| {
            if key.contains(['=', '\n']) || value.contains('\n') || key.trim().is_empty() {
                Err(EqError::InvalidOption {
                    name: key.to_string(),
                    message: String::from(
                        "metadata keys and values must be single-line and keys free of '='",
                    ),
                })
            } else {
                Ok(())
            }
        });
        self.record(r)?;
        self.metadata.insert(key.trim().to_string(), value.trim().to_string());
        Ok(())
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// The assembled system kept from the last solve for inspection:
    /// after pre-elimination when that succeeded, `None` when it was lost.
    pub fn assembled(&self) -> Option<&SparseMatrix<T>> {
        self.cache.assembled.as_ref()
    }

    /// Reads a system file into a freshly allocated system. `parms` takes the
    /// file's dimension and right-hand-side count; auxiliary `Tv`, `Sr`, `Sc`
    /// sections switch the corresponding usage flags on (as non-inverted
    /// values) and `Tb` is switched off, since the file holds `Tb·As + Ab`.
    pub fn load(&mut self, path: &Path, parms: &mut SolverParameters) -> Result<(), EqError> {
        let file = crate::io::read_system::<T>(path);
        let file = self.record(file)?;
        parms.dimension = file.matrix.dim();
        parms.rhs_count = file.rhs.len().max(1);
        self.allocate(parms)?;
        self.a_s = MatrixBuilder::from_matrix(&file.matrix);
        for (dst, src) in self.bs.iter_mut().zip(file.rhs) {
            *dst = src;
        }
        parms.usage.remove(Usage::TB | Usage::TV | Usage::SR | Usage::SC);
        if let Some(aux) = file.auxiliary {
            for (row, priority) in aux.elimination {
                self.elimination[row] = true;
                self.priority[row] = priority;
            }
            self.metadata = aux.metadata;
            if let Some(tv) = aux.tv {
                self.tv = MatrixBuilder::from_matrix(&tv);
                parms.usage.insert(Usage::TV);
                parms.inverse_tv = false;
            }
            if let Some(sr) = aux.sr {
                self.sr = sr;
                parms.usage.insert(Usage::SR);
                parms.inverse_scaling = false;
            }
            if let Some(sc) = aux.sc {
                self.sc = sc;
                parms.usage.insert(Usage::SC);
                parms.inverse_scaling = false;
            }
        }
        self.state = SystemState::NewtonAllocated;
        Ok(())
    }

    /// Builds the file contents of the combined system `Tb·As + Ab`,
    /// `Tb·bs + bb`, with auxiliary sections when requested.
    pub(crate) fn system_file(
        &self,
        parms: &SolverParameters,
        auxiliary: bool,
    ) -> Result<SystemFile<T>, EqError> {
        let tb = assembly::effective_tb(self, parms);
        let (matrix, rhs) = assembly::combine(self, tb.as_ref())?;
        let auxiliary = if auxiliary {
            let tv = assembly::effective_tv(self, parms)?;
            let (sr, sc) = assembly::effective_scaling(self, parms)?;
            Some(Auxiliary {
                elimination: (0..self.n)
                    .filter(|&i| self.elimination[i])
                    .map(|i| (i, self.priority[i]))
                    .collect(),
                metadata: self.metadata.clone(),
                tv,
                sr,
                sc,
            })
        } else {
            None
        };
        Ok(SystemFile { matrix, rhs, auxiliary })
    }

    /// Writes the combined system to `path`.
    pub fn write(
        &mut self,
        path: &Path,
        parms: &SolverParameters,
        auxiliary: bool,
    ) -> Result<(), EqError> {
        let r = self
            .usable("write before allocate")
            .and_then(|()| self.system_file(parms, auxiliary))
            .and_then(|file| crate::io::write_system(path, &file));
        self.record(r)
    }
}
