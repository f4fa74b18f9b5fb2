//! Collector integration
//!
//! [`Spaces`] exposes the three cell arenas to the heap as one
//! [`HeapGraph`]. The runtime's GC entry points drive the heap with its root
//! set and then sweep: dead objects hand their private storage to the
//! finalizer, dead layout nodes and type records are dropped on the mutator
//! together with their weak intern entries.

use crate::finalize::FinalizeJob;
use crate::layout::{LayoutId, LayoutTable};
use crate::object::ObjectCell;
use crate::runtime::Runtime;
use crate::types::{TypeRecordId, TypeTable};
use crate::value::Value;
use otter_heap::{
    CellId, CellKind, Edge, FieldRef, FinalizeTask, GcHeader, HeapGraph, HeapStats, Region, Space,
};

/// Cell arenas of one runtime
pub(crate) struct Spaces {
    pub(crate) objects: Space<ObjectCell>,
    pub(crate) layouts: LayoutTable,
    pub(crate) types: TypeTable,
}

impl Spaces {
    /// Header of any live cell
    pub(crate) fn header(&self, cell: CellId) -> Option<&GcHeader> {
        match cell.kind() {
            CellKind::Object => self.objects.header(cell),
            CellKind::Layout => self.layouts.header(cell),
            CellKind::TypeRecord => self.types.header(cell),
        }
    }

    fn trace_object_field(object: &ObjectCell, field: FieldRef, tracer: &mut dyn FnMut(CellId)) {
        match field {
            FieldRef::Slot(i) => {
                if i < object.storage_span() {
                    trace_value(object.slot(i), tracer);
                }
            }
            FieldRef::Element(i) => {
                if let Some(v) = object.elements.values().get(i as usize) {
                    trace_value(v, tracer);
                }
            }
            FieldRef::Layout => tracer(object.layout.0),
            FieldRef::Type => tracer(object.ty.0),
            FieldRef::Proto | FieldRef::Whole => object.trace(tracer),
        }
    }
}

fn trace_value(value: &Value, tracer: &mut dyn FnMut(CellId)) {
    if let Value::Object(id) = value {
        tracer(id.0);
    }
}

impl HeapGraph for Spaces {
    fn header(&self, cell: CellId) -> Option<&GcHeader> {
        Spaces::header(self, cell)
    }

    fn trace(&self, cell: CellId, tracer: &mut dyn FnMut(CellId)) {
        match cell.kind() {
            CellKind::Object => {
                if let Some(object) = self.objects.get(cell) {
                    object.trace(tracer);
                }
            }
            CellKind::Layout => {
                if let Some(node) = self.layouts.get(LayoutId(cell)) {
                    node.trace(tracer);
                }
            }
            CellKind::TypeRecord => {
                if let Some(record) = self.types.get(TypeRecordId(cell)) {
                    record.trace(tracer);
                }
            }
        }
    }

    fn trace_edge(&self, edge: &Edge, tracer: &mut dyn FnMut(CellId)) {
        let owner = edge.owner();
        let Some(object) = self.objects.get(owner) else {
            // Layouts and type records are only ever remembered whole.
            self.trace(owner, tracer);
            return;
        };
        match edge {
            Edge::Field { field, .. } => Self::trace_object_field(object, *field, tracer),
            Edge::Range {
                region,
                start,
                count,
                ..
            } => {
                for i in *start..start.saturating_add(*count) {
                    let field = match region {
                        Region::Slots => FieldRef::Slot(i),
                        Region::Elements => FieldRef::Element(i),
                    };
                    Self::trace_object_field(object, field, tracer);
                }
            }
        }
    }

    fn for_each_cell(&self, visit: &mut dyn FnMut(CellId, &GcHeader)) {
        for (cell, header, _) in self.objects.iter() {
            visit(cell, header);
        }
        for (cell, header, _) in self.layouts.space().iter() {
            visit(cell, header);
        }
        for (cell, header, _) in self.types.space().iter() {
            visit(cell, header);
        }
    }
}

impl Runtime {
    fn root_cells(&self) -> Vec<CellId> {
        self.roots.keys().map(|id| id.0).collect()
    }

    /// Run a full collection. Finishes an incremental cycle if one is
    /// running. Returns the number of cells freed.
    pub fn collect_garbage(&mut self) -> usize {
        if self.heap.is_marking() {
            return self.finish_incremental_gc();
        }
        self.new_object_cache.purge();
        let roots = self.root_cells();
        let dead = self.heap.collect(&self.spaces, &roots);
        self.sweep(dead)
    }

    /// Collect the young generation. Falls back to finishing the current
    /// cycle while an incremental mark is running.
    pub fn minor_gc(&mut self) -> usize {
        if self.heap.is_marking() {
            return self.finish_incremental_gc();
        }
        debug_assert!(
            self.remembered_set_covers_old_to_young(),
            "old-to-young pointer missing from the remembered set"
        );
        self.new_object_cache.purge();
        let roots = self.root_cells();
        let dead = self.heap.collect_young(&self.spaces, &roots);
        self.sweep(dead)
    }

    /// Begin an incremental mark. No-op if one is already running.
    pub fn start_incremental_gc(&mut self) {
        if self.heap.is_marking() {
            return;
        }
        self.new_object_cache.purge();
        let roots = self.root_cells();
        self.heap.start_incremental(&self.spaces, &roots);
    }

    /// Run one budgeted mark step. Returns true when marking has nothing
    /// left to do.
    pub fn incremental_gc_step(&mut self) -> bool {
        let budget = self.config.heap.mark_budget;
        self.heap.mark_step(&self.spaces, budget)
    }

    /// Finish the running incremental cycle and sweep. Returns the number
    /// of cells freed.
    pub fn finish_incremental_gc(&mut self) -> usize {
        if !self.heap.is_marking() {
            return 0;
        }
        let dead = self.heap.finish_incremental(&self.spaces);
        self.sweep(dead)
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Block until queued background finalization is done
    pub fn flush_finalization(&self) {
        self.heap.flush_finalization();
    }

    fn sweep(&mut self, dead: Vec<CellId>) -> usize {
        let mut background: Vec<Box<dyn FinalizeTask>> = Vec::new();
        let mut dead_layouts = Vec::new();
        let mut dead_types = Vec::new();
        let mut objects = 0;

        // Objects first: their class lives in the layout, which may be dying
        // in the same cycle.
        for cell in dead {
            match cell.kind() {
                CellKind::Object => {
                    let Some(object) = self.spaces.objects.remove(cell) else {
                        continue;
                    };
                    self.memory.free(object.booked_bytes());
                    objects += 1;

                    let Some(node) = self.spaces.layouts.get(object.layout) else {
                        continue;
                    };
                    let class_id = node.base().class;
                    self.classes.instance_finalized(class_id);
                    let class = self.classes.get(class_id);
                    let job = FinalizeJob::new(class.ops.finalize, object.into_storage());
                    if class.can_finalize_in_background() {
                        background.push(Box::new(job));
                    } else {
                        Box::new(job).finalize();
                    }
                }
                CellKind::Layout => dead_layouts.push(cell),
                CellKind::TypeRecord => dead_types.push(cell),
            }
        }

        let layouts = self.spaces.layouts.sweep(&dead_layouts, &self.memory);
        let types = self.spaces.types.sweep(&dead_types, &self.memory);
        let queued = background.len();
        self.heap.finalize_in_background(background);
        self.new_object_cache.purge();
        self.memory.on_gc_complete();

        tracing::debug!(
            target: "otter::objects",
            objects,
            layouts,
            types,
            queued,
            live = self.spaces.objects.len(),
            "sweep complete"
        );
        objects + layouts + types
    }

    /// Every young referent held by an old object's slot or element is
    /// covered by a remembered edge
    fn remembered_set_covers_old_to_young(&self) -> bool {
        let edges = self.heap.remembered_set().edges();
        let covered = |owner: CellId, field: FieldRef| {
            edges.iter().any(|edge| match edge {
                Edge::Field { owner: o, field: f } => {
                    *o == owner && (*f == field || *f == FieldRef::Whole)
                }
                Edge::Range {
                    owner: o,
                    region,
                    start,
                    count,
                } => {
                    *o == owner
                        && match (region, field) {
                            (Region::Slots, FieldRef::Slot(i))
                            | (Region::Elements, FieldRef::Element(i)) => {
                                (*start..start + count).contains(&i)
                            }
                            _ => false,
                        }
                }
            })
        };
        let young = |v: &Value| {
            v.as_object()
                .and_then(|id| self.spaces.objects.header(id.0))
                .is_some_and(|h| h.is_young())
        };

        self.spaces
            .objects
            .iter()
            .filter(|(_, header, _)| !header.is_young())
            .all(|(owner, _, object)| {
                let slots_ok = (0..object.storage_span())
                    .all(|i| !young(object.slot(i)) || covered(owner, FieldRef::Slot(i)));
                let elements_ok = object
                    .elements
                    .values()
                    .iter()
                    .enumerate()
                    .all(|(i, v)| !young(v) || covered(owner, FieldRef::Element(i as u32)));
                slots_ok && elements_ok
            })
    }
}
