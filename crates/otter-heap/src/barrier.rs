//! Write barrier bookkeeping for incremental and generational collection
//!
//! Two structures back the barrier contract:
//! - [`WriteBarrierBuffer`]: cells grayed by the pre-write (deletion) barrier
//!   while an incremental mark is in progress, drained into the mark worklist.
//! - [`RememberedSet`]: precise old-to-young edges recorded by the post-write
//!   barrier, used as extra roots by a minor collection.

use crate::cell::CellId;
use rustc_hash::FxHashSet;
use std::cell::RefCell;

/// A traced field inside a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// Named-property slot
    Slot(u32),
    /// Dense element
    Element(u32),
    /// Layout pointer
    Layout,
    /// Type record pointer
    Type,
    /// Prototype pointer
    Proto,
    /// Every pointer field of the cell
    Whole,
}

/// Contiguous storage region of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Named-property slots (fixed + overflow)
    Slots,
    /// Element buffer
    Elements,
}

/// A remembered old-to-young edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// A single field of `owner`
    Field {
        /// Old cell holding the pointer
        owner: CellId,
        /// The field that was written
        field: FieldRef,
    },
    /// A run of slots or elements of `owner`, registered after a bulk move
    Range {
        /// Old cell holding the pointers
        owner: CellId,
        /// Which storage region
        region: Region,
        /// First index of the range
        start: u32,
        /// Number of entries
        count: u32,
    },
}

impl Edge {
    /// Cell the edge lives in
    pub fn owner(&self) -> CellId {
        match *self {
            Edge::Field { owner, .. } | Edge::Range { owner, .. } => owner,
        }
    }
}

/// Write barrier buffer for batching barrier operations
///
/// Instead of scanning each grayed cell at barrier time, we buffer
/// them and push them onto the mark worklist at the next mark step.
pub struct WriteBarrierBuffer {
    /// Buffered cells that need to be scanned
    entries: RefCell<Vec<CellId>>,
    /// Buffer size at which `push` reports the buffer as full
    max_size: usize,
}

impl WriteBarrierBuffer {
    /// Create a new buffer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new buffer with specific capacity
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            entries: RefCell::new(Vec::with_capacity(max_size)),
            max_size,
        }
    }

    /// Add an entry to the buffer
    ///
    /// Returns true if buffer is full and should be drained
    pub fn push(&self, cell: CellId) -> bool {
        let mut entries = self.entries.borrow_mut();
        entries.push(cell);
        entries.len() >= self.max_size
    }

    /// Take all entries from the buffer
    pub fn drain(&self) -> Vec<CellId> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

impl Default for WriteBarrierBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembered set for tracking cross-generation references
///
/// Records old-to-young edges so a minor collection can find young cells
/// without scanning the old generation.
pub struct RememberedSet {
    entries: RefCell<FxHashSet<Edge>>,
}

impl RememberedSet {
    /// Create a new remembered set
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(FxHashSet::default()),
        }
    }

    /// Record an edge. Returns true if it was not already present.
    pub fn add(&self, edge: Edge) -> bool {
        self.entries.borrow_mut().insert(edge)
    }

    /// Check if contains edge
    pub fn contains(&self, edge: &Edge) -> bool {
        self.entries.borrow().contains(edge)
    }

    /// Whether any edge is owned by `owner`
    pub fn contains_owner(&self, owner: CellId) -> bool {
        self.entries.borrow().iter().any(|e| e.owner() == owner)
    }

    /// Snapshot of all edges
    pub fn edges(&self) -> Vec<Edge> {
        self.entries.borrow().iter().copied().collect()
    }

    /// Clear the set
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for RememberedSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that no incremental mark is in progress.
///
/// Only obtainable from [`Heap::not_marking`](crate::heap::Heap::not_marking);
/// barrier-elided bulk copies take one by value so the caller has to have
/// checked. The token is stamped with the heap's mark epoch, and
/// [`Heap::verify_not_marking`](crate::heap::Heap::verify_not_marking) rejects
/// it once a new mark has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotMarking {
    epoch: u64,
}

impl NotMarking {
    pub(crate) fn new(epoch: u64) -> Self {
        Self { epoch }
    }

    pub(crate) fn epoch(self) -> u64 {
        self.epoch
    }
}
