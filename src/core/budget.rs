//! Cooperative resource budget.
//!
//! Work is measured in abstract, machine-independent units (roughly one
//! multiply-add per unit) and memory in bytes reserved for matrices,
//! factorizations and Krylov bases. Both counters are checked only at
//! checkpoints: the start of a preconditioning attempt, the start of a solver
//! iteration or restart, and before factor storage grows.

use crate::error::{EqError, Resource};

/// Cumulative work-unit and byte counters with optional limits.
#[derive(Debug, Clone, Default)]
pub struct WorkBudget {
    work_used: u64,
    work_limit: Option<u64>,
    bytes_used: u64,
    bytes_peak: u64,
    byte_limit: Option<u64>,
}

impl WorkBudget {
    pub fn new(work_limit: Option<u64>, byte_limit: Option<u64>) -> Self {
        Self {
            work_limit,
            byte_limit,
            ..Self::default()
        }
    }

    /// A budget without limits.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Charges `units` of work; fails once the cumulative total exceeds the limit.
    pub fn charge(&mut self, units: u64) -> Result<(), EqError> {
        self.work_used = self.work_used.saturating_add(units);
        match self.work_limit {
            Some(limit) if self.work_used > limit => Err(EqError::ResourceLimit {
                resource: Resource::Work,
                used: self.work_used,
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Reserves `bytes`; on failure nothing is reserved.
    pub fn reserve(&mut self, bytes: u64) -> Result<(), EqError> {
        let wanted = self.bytes_used.saturating_add(bytes);
        if let Some(limit) = self.byte_limit {
            if wanted > limit {
                return Err(EqError::ResourceLimit {
                    resource: Resource::Bytes,
                    used: wanted,
                    limit,
                });
            }
        }
        self.bytes_used = wanted;
        self.bytes_peak = self.bytes_peak.max(wanted);
        Ok(())
    }

    /// Returns previously reserved bytes.
    pub fn release(&mut self, bytes: u64) {
        self.bytes_used = self.bytes_used.saturating_sub(bytes);
    }

    pub fn work_used(&self) -> u64 {
        self.work_used
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub fn bytes_peak(&self) -> u64 {
        self.bytes_peak
    }

    pub fn byte_limit(&self) -> Option<u64> {
        self.byte_limit
    }

    pub fn work_limit(&self) -> Option<u64> {
        self.work_limit
    }
}

/// Bytes occupied by `count` entries of `T` plus a column index each.
pub(crate) fn entry_bytes<T>(count: usize) -> u64 {
    (count as u64).saturating_mul((std::mem::size_of::<T>() + std::mem::size_of::<usize>()) as u64)
}

/// Bytes occupied by `count` dense values of `T`.
pub(crate) fn value_bytes<T>(count: usize) -> u64 {
    (count as u64).saturating_mul(std::mem::size_of::<T>() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_limit_is_deterministic() {
        let mut b = WorkBudget::new(Some(10), None);
        assert!(b.charge(6).is_ok());
        let err = b.charge(6).unwrap_err();
        assert_eq!(
            err,
            EqError::ResourceLimit {
                resource: Resource::Work,
                used: 12,
                limit: 10
            }
        );
    }

    #[test]
    fn failed_reservation_reserves_nothing() {
        let mut b = WorkBudget::new(None, Some(100));
        b.reserve(80).unwrap();
        assert!(b.reserve(30).is_err());
        assert_eq!(b.bytes_used(), 80);
        b.release(50);
        b.reserve(30).unwrap();
        assert_eq!(b.bytes_peak(), 80);
    }
}
