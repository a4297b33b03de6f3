//! Session identifier allocation.

use std::collections::BTreeSet;

use thiserror::Error;

/// Default lowest session id handed out by a server.
pub const DEFAULT_MIN_SESSION_ID: u16 = 1;
/// Default highest session id handed out by a server.
pub const DEFAULT_MAX_SESSION_ID: u16 = 0xFFFF;

/// Every identifier in the range is currently allocated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("No free session id in range [{min}, {max}]")]
pub struct AllocationError {
    /// Lower bound of the exhausted range (inclusive).
    pub min: u16,
    /// Upper bound of the exhausted range (inclusive).
    pub max: u16,
}

/// Bounded pool of unique identifiers in `[min, max]`.
///
/// `allocate` always returns the smallest free identifier, so ids released
/// by disconnected sessions are reused before fresh ones.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    /// Lowest id (inclusive).
    min: u16,
    /// Highest id (inclusive).
    max: u16,
    /// Ids currently held by live sessions.
    allocated: BTreeSet<u16>,
}

impl IdAllocator {
    /// Create an allocator over the inclusive range `[min, max]`.
    pub fn new(min: u16, max: u16) -> Self {
        assert!(min <= max, "invalid id range [{min}, {max}]");
        Self {
            min,
            max,
            allocated: BTreeSet::new(),
        }
    }

    /// Allocate the smallest free id.
    pub fn allocate(&mut self) -> Result<u16, AllocationError> {
        // The set is ordered, so the first gap in it is the smallest free id.
        let mut candidate = self.min;
        for &used in &self.allocated {
            if used != candidate {
                break;
            }
            if candidate == self.max {
                return Err(AllocationError {
                    min: self.min,
                    max: self.max,
                });
            }
            candidate += 1;
        }

        self.allocated.insert(candidate);
        Ok(candidate)
    }

    /// Return `id` to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not currently allocated. That only happens when
    /// session bookkeeping frees the same id twice.
    pub fn free(&mut self, id: u16) {
        assert!(
            self.allocated.remove(&id),
            "session id {id} freed while not allocated"
        );
    }

    /// Whether `id` is currently allocated.
    pub fn is_allocated(&self, id: u16) -> bool {
        self.allocated.contains(&id)
    }

    /// Number of ids currently allocated.
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    /// Number of ids still free.
    pub fn available_count(&self) -> usize {
        self.capacity() - self.allocated.len()
    }

    /// Total number of ids in the range.
    pub fn capacity(&self) -> usize {
        usize::from(self.max - self.min) + 1
    }

    /// Inclusive bounds of the pool.
    pub fn range(&self) -> (u16, u16) {
        (self.min, self.max)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SESSION_ID, DEFAULT_MAX_SESSION_ID)
    }
}
