//! Allocation accounting for decoded objects
//!
//! Every load copies target data into decoder-owned storage. The sizes it
//! asks for come from target memory, so they are booked against a
//! [`MemoryBudget`] first and rejected when absurd. A [`Reservation`] gives
//! its bytes back when dropped, so a failed or discarded load leaks nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::Limits;
use crate::error::{DecodeError, DecodeResult};

/// Whether an allocation may exceed the budget's soft limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocPolicy {
    /// Always book the allocation (interactive use)
    #[default]
    Blocking,
    /// Fail instead of going over the limit (signal-context or batch use)
    NoBlocking,
}

/// Tracks bytes held by loaded objects
#[derive(Debug)]
pub struct MemoryBudget {
    /// Bytes currently booked
    allocated: AtomicUsize,
    /// Soft limit on booked bytes
    limit: usize,
    /// Hard limit on a single allocation
    max_allocation: usize,
}

impl MemoryBudget {
    /// Create a budget with the given soft limit and per-allocation cap
    pub fn new(limit: usize, max_allocation: usize) -> Arc<Self> {
        Arc::new(Self {
            allocated: AtomicUsize::new(0),
            limit,
            max_allocation,
        })
    }

    /// Create a budget from layout limits
    pub fn from_limits(limits: &Limits) -> Arc<Self> {
        Self::new(limits.budget_bytes, limits.max_allocation_bytes)
    }

    /// Create a budget with very large limits (for tests)
    pub fn unlimited() -> Arc<Self> {
        Self::new(usize::MAX / 2, usize::MAX / 2)
    }

    /// Book `size` bytes
    pub fn allocate(self: &Arc<Self>, size: usize, policy: AllocPolicy) -> DecodeResult<Reservation> {
        if size > self.max_allocation {
            tracing::warn!(size, max = self.max_allocation, "refusing oversized allocation");
            return Err(DecodeError::AllocationFailure { size });
        }

        if policy == AllocPolicy::NoBlocking {
            let current = self.allocated.load(Ordering::Relaxed);
            if current.saturating_add(size) > self.limit {
                return Err(DecodeError::AllocationFailure { size });
            }
        }

        self.allocated.fetch_add(size, Ordering::Relaxed);
        Ok(Reservation {
            budget: Arc::clone(self),
            size,
        })
    }

    /// Book `len` elements of `T` and return an empty vector with room for them
    pub(crate) fn allocate_vec<T>(
        self: &Arc<Self>,
        len: usize,
        policy: AllocPolicy,
    ) -> DecodeResult<(Vec<T>, Reservation)> {
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(DecodeError::AllocationFailure { size: usize::MAX })?;
        let reservation = self.allocate(size, policy)?;
        let mut vec = Vec::new();
        vec.try_reserve_exact(len)
            .map_err(|_| DecodeError::AllocationFailure { size })?;
        Ok((vec, reservation))
    }

    fn free(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::Relaxed);
    }

    /// Bytes currently booked
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Soft limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Largest single allocation allowed
    pub fn max_allocation(&self) -> usize {
        self.max_allocation
    }
}

/// Bytes booked against a [`MemoryBudget`], returned on drop
#[derive(Debug)]
pub struct Reservation {
    budget: Arc<MemoryBudget>,
    size: usize,
}

impl Reservation {
    /// Number of bytes held
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.budget.free(self.size);
    }
}
