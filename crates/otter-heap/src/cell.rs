//! GC cell identity and header layout

use std::sync::atomic::{AtomicU8, Ordering};

/// Which arena a cell lives in.
///
/// The collector never interprets payloads itself; the kind only lets a
/// [`HeapGraph`](crate::trace::HeapGraph) route a cell to the right space.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellKind {
    /// An object instance
    Object = 0,
    /// A layout tree node
    Layout = 1,
    /// A type record
    TypeRecord = 2,
}

/// Handle to a GC-managed cell.
///
/// Handles are plain indices into a [`Space`](crate::space::Space). The
/// generation is bumped every time an index is reused, so a handle kept
/// past the death of its cell never aliases a newer cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    kind: CellKind,
    index: u32,
    generation: u32,
}

impl CellId {
    /// Create a handle from its parts
    pub const fn new(kind: CellKind, index: u32, generation: u32) -> Self {
        Self {
            kind,
            index,
            generation,
        }
    }

    /// Arena the cell lives in
    #[inline]
    pub const fn kind(self) -> CellKind {
        self.kind
    }

    /// Slot index inside the arena
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Reuse generation of the slot
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

/// Generational age of a cell
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Age {
    /// Allocated since the last minor collection
    Young = 0,
    /// Survived at least one collection
    Old = 1,
}

/// GC cell header
///
/// Atomics keep the header readable from the collector side without
/// handing out `&mut` access to the payload it sits next to.
#[repr(C)]
pub struct GcHeader {
    /// Mark bits for tri-color marking
    mark: AtomicU8,
    /// Young/old bit
    age: AtomicU8,
    /// Arena tag
    kind: CellKind,
}

impl GcHeader {
    /// Create a new header
    pub const fn new(kind: CellKind, color: MarkColor) -> Self {
        Self {
            mark: AtomicU8::new(color as u8),
            age: AtomicU8::new(Age::Young as u8),
            kind,
        }
    }

    /// Get mark color
    pub fn mark(&self) -> MarkColor {
        match self.mark.load(Ordering::Acquire) {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            _ => MarkColor::Black,
        }
    }

    /// Set mark color
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.store(color as u8, Ordering::Release);
    }

    /// Get generational age
    pub fn age(&self) -> Age {
        match self.age.load(Ordering::Acquire) {
            0 => Age::Young,
            _ => Age::Old,
        }
    }

    /// Tenure the cell
    pub fn promote(&self) {
        self.age.store(Age::Old as u8, Ordering::Release);
    }

    /// Whether the cell is in the young generation
    #[inline]
    pub fn is_young(&self) -> bool {
        self.age() == Age::Young
    }

    /// Get the arena tag
    pub fn kind(&self) -> CellKind {
        self.kind
    }
}

impl std::fmt::Debug for GcHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcHeader")
            .field("kind", &self.kind)
            .field("mark", &self.mark())
            .field("age", &self.age())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_marking() {
        let header = GcHeader::new(CellKind::Object, MarkColor::White);
        assert_eq!(header.mark(), MarkColor::White);

        header.set_mark(MarkColor::Gray);
        assert_eq!(header.mark(), MarkColor::Gray);

        header.set_mark(MarkColor::Black);
        assert_eq!(header.mark(), MarkColor::Black);
    }

    #[test]
    fn test_header_promotion() {
        let header = GcHeader::new(CellKind::Layout, MarkColor::White);
        assert!(header.is_young());
        header.promote();
        assert_eq!(header.age(), Age::Old);
        assert_eq!(header.kind(), CellKind::Layout);
    }

    #[test]
    fn test_cell_id_generation_distinguishes_reuse() {
        let a = CellId::new(CellKind::Object, 3, 0);
        let b = CellId::new(CellKind::Object, 3, 1);
        assert_ne!(a, b);
        assert_eq!(a.index(), b.index());
    }
}
