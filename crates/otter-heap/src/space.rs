//! Typed cell arenas
//!
//! A `Space<T>` is a slab of `(GcHeader, T)` entries addressed by
//! [`CellId`]. Freed indices go on a free list and come back with a bumped
//! generation.

use crate::cell::{CellId, CellKind, GcHeader, MarkColor};

struct Entry<T> {
    generation: u32,
    header: GcHeader,
    value: Option<T>,
}

/// Slab arena for one cell kind
pub struct Space<T> {
    kind: CellKind,
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Space<T> {
    /// Create an empty space for `kind` cells
    pub fn new(kind: CellKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Cell kind stored in this space
    pub fn kind(&self) -> CellKind {
        self.kind
    }

    /// Insert a payload with an initial mark color.
    ///
    /// Cells allocated while the collector is marking must be passed
    /// `MarkColor::Black` so the current cycle never sweeps them.
    pub fn insert(&mut self, value: T, color: MarkColor) -> CellId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.header = GcHeader::new(self.kind, color);
            entry.value = Some(value);
            return CellId::new(self.kind, index, entry.generation);
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            header: GcHeader::new(self.kind, color),
            value: Some(value),
        });
        CellId::new(self.kind, index, 0)
    }

    fn entry(&self, id: CellId) -> Option<&Entry<T>> {
        if id.kind() != self.kind {
            return None;
        }
        let entry = self.entries.get(id.index() as usize)?;
        if entry.generation != id.generation() || entry.value.is_none() {
            return None;
        }
        Some(entry)
    }

    /// Whether `id` names a live cell of this space
    pub fn contains(&self, id: CellId) -> bool {
        self.entry(id).is_some()
    }

    /// Borrow a payload
    pub fn get(&self, id: CellId) -> Option<&T> {
        self.entry(id).and_then(|e| e.value.as_ref())
    }

    /// Mutably borrow a payload
    pub fn get_mut(&mut self, id: CellId) -> Option<&mut T> {
        if id.kind() != self.kind {
            return None;
        }
        let entry = self.entries.get_mut(id.index() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.value.as_mut()
    }

    /// Borrow a cell header
    pub fn header(&self, id: CellId) -> Option<&GcHeader> {
        self.entry(id).map(|e| &e.header)
    }

    /// Remove a cell, returning its payload
    pub fn remove(&mut self, id: CellId) -> Option<T> {
        if id.kind() != self.kind {
            return None;
        }
        let entry = self.entries.get_mut(id.index() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        let value = entry.value.take()?;
        self.free.push(id.index());
        self.live -= 1;
        Some(value)
    }

    /// Number of live cells
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the space holds no live cells
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate over live cells
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &GcHeader, &T)> + '_ {
        let kind = self.kind;
        self.entries.iter().enumerate().filter_map(move |(i, e)| {
            e.value
                .as_ref()
                .map(|v| (CellId::new(kind, i as u32, e.generation), &e.header, v))
        })
    }
}

impl<T> std::ops::Index<CellId> for Space<T> {
    type Output = T;

    /// Panics on a stale or foreign handle
    fn index(&self, id: CellId) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("stale cell handle {id:?}"),
        }
    }
}

impl<T> std::ops::IndexMut<CellId> for Space<T> {
    fn index_mut(&mut self, id: CellId) -> &mut T {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("stale cell handle {id:?}"),
        }
    }
}

impl<T> std::fmt::Debug for Space<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("kind", &self.kind)
            .field("live", &self.live)
            .field("capacity", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut space = Space::new(CellKind::Object);
        let a = space.insert(1u32, MarkColor::White);
        let b = space.insert(2u32, MarkColor::Black);

        assert_eq!(space.get(a), Some(&1));
        assert_eq!(space.header(b).map(|h| h.mark()), Some(MarkColor::Black));
        assert_eq!(space.len(), 2);

        assert_eq!(space.remove(a), Some(1));
        assert!(!space.contains(a));
        assert_eq!(space.len(), 1);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut space = Space::new(CellKind::Layout);
        let a = space.insert("first", MarkColor::White);
        space.remove(a);
        let b = space.insert("second", MarkColor::White);

        assert_eq!(a.index(), b.index());
        assert!(space.get(a).is_none());
        assert_eq!(space.get(b), Some(&"second"));
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let mut space = Space::new(CellKind::Object);
        let a = space.insert(7u8, MarkColor::White);
        let foreign = CellId::new(CellKind::TypeRecord, a.index(), a.generation());
        assert!(space.get(foreign).is_none());
    }

    #[test]
    #[should_panic(expected = "stale cell handle")]
    fn test_index_panics_on_stale_handle() {
        let mut space = Space::new(CellKind::Object);
        let a = space.insert(1, MarkColor::White);
        space.remove(a);
        let _value: i32 = space[a];
    }

    #[test]
    fn test_iter_skips_removed() {
        let mut space = Space::new(CellKind::Object);
        let a = space.insert(1, MarkColor::White);
        let _b = space.insert(2, MarkColor::White);
        space.remove(a);
        let values: Vec<_> = space.iter().map(|(_, _, v)| *v).collect();
        assert_eq!(values, vec![2]);
    }
}
