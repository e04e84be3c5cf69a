// src/engine/slots.rs

//! Slot ledger: a fixed capacity handed out to running jobs.

use tracing::trace;

use crate::errors::{JobdagError, Result};

/// Tracks how many of a fixed number of slots are in use.
///
/// Owned by the dispatch loop; every acquire/release happens inside its
/// launch/reap steps, so no interior locking is needed.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    capacity: u32,
    in_use: u32,
}

impl SlotAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            in_use: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn in_use(&self) -> u32 {
        self.in_use
    }

    pub fn available(&self) -> u32 {
        self.capacity - self.in_use
    }

    /// Reserve `cost` slots if they are all free.
    ///
    /// Nothing is reserved when this returns `Ok(false)`.
    pub fn try_acquire(&mut self, cost: u32) -> Result<bool> {
        if cost == 0 {
            return Err(JobdagError::InvalidCost(cost));
        }
        if cost > self.available() {
            trace!(cost, in_use = self.in_use, capacity = self.capacity, "slots unavailable");
            return Ok(false);
        }
        self.in_use += cost;
        trace!(cost, in_use = self.in_use, "slots acquired");
        Ok(true)
    }

    /// Return `cost` slots to the pool.
    ///
    /// Releasing more than is reserved means the caller's bookkeeping is
    /// broken, and is reported as a fatal error.
    pub fn release(&mut self, cost: u32) -> Result<()> {
        if cost > self.in_use {
            return Err(JobdagError::SlotOverRelease {
                released: cost,
                in_use: self.in_use,
            });
        }
        self.in_use -= cost;
        trace!(cost, in_use = self.in_use, "slots released");
        Ok(())
    }
}
