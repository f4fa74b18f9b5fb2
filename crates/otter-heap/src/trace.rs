//! Tracing interface between the collector and the object model

use crate::barrier::Edge;
use crate::cell::{CellId, GcHeader};

/// The mutator-side view of the heap the collector walks.
///
/// The collector owns marking state only; every question about what a cell
/// points to is answered by the graph.
pub trait HeapGraph {
    /// Header of a live cell, `None` once the cell has been freed
    fn header(&self, cell: CellId) -> Option<&GcHeader>;

    /// Report every cell directly referenced by `cell`
    fn trace(&self, cell: CellId, tracer: &mut dyn FnMut(CellId));

    /// Report the referents of a single remembered edge
    fn trace_edge(&self, edge: &Edge, tracer: &mut dyn FnMut(CellId));

    /// Visit every live cell
    fn for_each_cell(&self, visit: &mut dyn FnMut(CellId, &GcHeader));
}
