//! Barrier plumbing between object mutations and the heap
//!
//! Every pointer-field write in this crate goes through these helpers: the
//! pre-write step before an old referent is overwritten or destroyed, the
//! post-write step after a new referent is stored.

use crate::object::ObjectId;
use crate::runtime::Runtime;
use crate::value::Value;
use otter_heap::{CellId, FieldRef, HeapGraph, Region};

impl Runtime {
    /// Pre-write step for a cell about to lose a reference
    #[inline]
    pub(crate) fn pre_barrier_cell(&self, cell: CellId) {
        if !self.heap.is_marking() {
            return;
        }
        if let Some(header) = self.spaces.header(cell) {
            self.heap.pre_write_barrier(cell, header);
        }
    }

    /// Pre-write step for a value about to be overwritten
    #[inline]
    pub(crate) fn pre_barrier_value(&self, value: &Value) {
        if let Value::Object(id) = value {
            self.pre_barrier_cell(id.0);
        }
    }

    /// Pre-write step for every value in `values`
    pub(crate) fn pre_barrier_values(&self, values: &[Value]) {
        if !self.heap.is_marking() {
            return;
        }
        for value in values {
            self.pre_barrier_value(value);
        }
    }

    /// Post-write step after `owner.field` was set to `new`
    #[inline]
    pub(crate) fn post_barrier_cell(&self, owner: CellId, field: FieldRef, new: CellId) {
        let (Some(owner_header), Some(new_header)) =
            (self.spaces.header(owner), self.spaces.header(new))
        else {
            return;
        };
        self.heap.post_write_barrier(owner, owner_header, field, new_header);
    }

    /// Post-write step after an object field was set to `value`
    #[inline]
    pub(crate) fn post_barrier_value(&self, owner: ObjectId, field: FieldRef, value: &Value) {
        if let Value::Object(id) = value {
            self.post_barrier_cell(owner.0, field, id.0);
        }
    }

    /// Remembered-set registration for a bulk-written element range
    pub(crate) fn post_barrier_element_range(&self, owner: ObjectId, start: u32, count: u32) {
        if let Some(header) = self.spaces.header(owner.0) {
            self.heap
                .post_write_range(owner.0, header, Region::Elements, start, count);
        }
    }

    /// Pre-write step over everything `cell` references.
    ///
    /// Used before a dictionary node is regenerated: the replacement cell is
    /// allocated black during a mark and will not be scanned again.
    pub(crate) fn barrier_cell_contents(&self, cell: CellId) {
        if !self.heap.is_marking() {
            return;
        }
        self.spaces.trace(cell, &mut |child| self.pre_barrier_cell(child));
    }
}
