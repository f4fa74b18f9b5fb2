//! Memory accounting for a runtime instance
//!
//! Every piece of object storage (object cells, overflow slots, element
//! buffers, layout nodes, type records) is booked here before it is
//! allocated, so a refused booking leaves the requesting object untouched.

use crate::error::{ObjectError, ObjectResult};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Manages the memory limit and byte accounting for a runtime
pub struct MemoryManager {
    /// Total bytes currently booked
    allocated: AtomicUsize,
    /// Maximum bytes allowed
    limit: usize,
    /// Number of bookings since last GC
    allocation_count: AtomicUsize,
    /// Bytes still booked after the last GC
    last_live_size: AtomicUsize,
}

impl MemoryManager {
    /// Create a new memory manager with the specified limit
    pub fn new(limit: usize) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            limit,
            allocation_count: AtomicUsize::new(0),
            last_live_size: AtomicUsize::new(0),
        }
    }

    /// Create a memory manager with a very large limit (for tests)
    pub fn unlimited() -> Self {
        Self::new(usize::MAX / 2)
    }

    /// Try to book `size` bytes. Returns `Err(ObjectError::OutOfMemory)` if the
    /// limit would be exceeded.
    pub fn alloc(&self, size: usize) -> ObjectResult<()> {
        let current = self.allocated.load(Ordering::Relaxed);
        if current.saturating_add(size) > self.limit {
            tracing::warn!(
                target: "otter::objects",
                requested = size,
                allocated = current,
                limit = self.limit,
                "allocation refused"
            );
            return Err(ObjectError::OutOfMemory);
        }
        self.allocated.fetch_add(size, Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record release of `size` bytes
    pub fn free(&self, size: usize) {
        let _ = self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(size))
            });
    }

    /// Get current booked bytes
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Get memory limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Get the number of bookings since last GC
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    /// Get the live size recorded after the last GC
    pub fn last_live_size(&self) -> usize {
        self.last_live_size.load(Ordering::Relaxed)
    }

    /// Called after a GC cycle completes
    pub fn on_gc_complete(&self) {
        self.allocation_count.store(0, Ordering::Relaxed);
        self.last_live_size
            .store(self.allocated(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("allocated", &self.allocated())
            .field("limit", &self.limit)
            .finish()
    }
}
