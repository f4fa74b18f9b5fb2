//! Barrier correctness tests
//!
//! These tests drive the collector with a small slot-based graph and verify
//! that the pre- and post-write barriers keep incremental and minor
//! collections sound.

use otter_heap::{
    CellId, CellKind, Edge, FieldRef, GcHeader, Heap, HeapConfig, HeapGraph, MarkColor, Region,
    Space,
};

/// Test cell: a fixed array of pointer slots
struct Node {
    slots: Vec<Option<CellId>>,
}

struct Graph {
    space: Space<Node>,
}

impl Graph {
    fn new() -> Self {
        Self {
            space: Space::new(CellKind::Object),
        }
    }

    fn alloc(&mut self, heap: &Heap, slots: usize) -> CellId {
        self.space.insert(
            Node {
                slots: vec![None; slots],
            },
            heap.allocation_color(),
        )
    }

    /// Barriered store of `value` into `owner.slots[index]`
    fn store(&mut self, heap: &Heap, owner: CellId, index: usize, value: Option<CellId>) {
        if let Some(old) = self.space.get(owner).and_then(|n| n.slots[index])
            && let Some(old_header) = self.space.header(old)
        {
            heap.pre_write_barrier(old, old_header);
        }
        self.space.get_mut(owner).unwrap().slots[index] = value;
        if let Some(new) = value {
            let owner_header = self.space.header(owner).unwrap();
            let new_header = self.space.header(new).unwrap();
            heap.post_write_barrier(owner, owner_header, FieldRef::Slot(index as u32), new_header);
        }
    }

    /// Unbarriered store, for tests that check what happens without one
    fn raw_store(&mut self, owner: CellId, index: usize, value: Option<CellId>) {
        self.space.get_mut(owner).unwrap().slots[index] = value;
    }

    fn sweep(&mut self, dead: &[CellId]) {
        for &cell in dead {
            self.space.remove(cell);
        }
    }
}

impl HeapGraph for Graph {
    fn header(&self, cell: CellId) -> Option<&GcHeader> {
        self.space.header(cell)
    }

    fn trace(&self, cell: CellId, tracer: &mut dyn FnMut(CellId)) {
        if let Some(node) = self.space.get(cell) {
            node.slots.iter().flatten().copied().for_each(tracer);
        }
    }

    fn trace_edge(&self, edge: &Edge, tracer: &mut dyn FnMut(CellId)) {
        let Some(node) = self.space.get(edge.owner()) else {
            return;
        };
        match *edge {
            Edge::Field {
                field: FieldRef::Slot(i),
                ..
            } => {
                if let Some(Some(child)) = node.slots.get(i as usize) {
                    tracer(*child);
                }
            }
            Edge::Range {
                region: Region::Slots,
                start,
                count,
                ..
            } => {
                let end = (start + count) as usize;
                for child in node.slots[start as usize..end.min(node.slots.len())]
                    .iter()
                    .flatten()
                {
                    tracer(*child);
                }
            }
            _ => node.slots.iter().flatten().copied().for_each(tracer),
        }
    }

    fn for_each_cell(&self, visit: &mut dyn FnMut(CellId, &GcHeader)) {
        for (id, header, _) in self.space.iter() {
            visit(id, header);
        }
    }
}

fn heap() -> Heap {
    Heap::with_config(
        HeapConfig::default()
            .with_mark_budget(1)
            .with_background_finalization(false),
    )
}

#[test]
fn test_satb_overwrite_during_marking_keeps_old_value() {
    let heap = heap();
    let mut graph = Graph::new();

    let root = graph.alloc(&heap, 1);
    let holder = graph.alloc(&heap, 1);
    let target = graph.alloc(&heap, 0);
    graph.store(&heap, root, 0, Some(holder));
    graph.store(&heap, holder, 0, Some(target));

    heap.start_incremental(&graph, &[root]);
    // Scan only the root; holder is gray, target still white.
    assert!(!heap.mark_step(&graph, 1));

    // Move target into the already-black root and drop it from holder.
    graph.store(&heap, root, 0, Some(target));
    graph.store(&heap, holder, 0, None);
    assert_eq!(graph.header(target).unwrap().mark(), MarkColor::Gray);

    let dead = heap.finish_incremental(&graph);
    assert!(!dead.contains(&target), "pre-barrier must keep target alive");
    // holder was already gray and floats until the next cycle
    assert!(!dead.contains(&holder));
    graph.sweep(&dead);
    assert!(graph.header(target).is_some());
    assert!(heap.stats().pre_barrier_hits >= 1);
}

#[test]
fn test_unbarriered_overwrite_during_marking_loses_value() {
    let heap = heap();
    let mut graph = Graph::new();

    let root = graph.alloc(&heap, 1);
    let holder = graph.alloc(&heap, 1);
    let target = graph.alloc(&heap, 0);
    graph.raw_store(root, 0, Some(holder));
    graph.raw_store(holder, 0, Some(target));

    heap.start_incremental(&graph, &[root]);
    assert!(!heap.mark_step(&graph, 1));

    graph.raw_store(root, 0, Some(target));
    graph.raw_store(holder, 0, None);

    let dead = heap.finish_incremental(&graph);
    assert!(dead.contains(&target));
}

#[test]
fn test_allocation_during_mark_survives() {
    let heap = heap();
    let mut graph = Graph::new();
    let root = graph.alloc(&heap, 1);

    heap.start_incremental(&graph, &[root]);
    let fresh = graph.alloc(&heap, 0);
    let dead = heap.finish_incremental(&graph);
    assert!(!dead.contains(&fresh));
}

#[test]
fn test_minor_gc_follows_remembered_slot() {
    let heap = heap();
    let mut graph = Graph::new();

    let old = graph.alloc(&heap, 2);
    let dead = heap.collect(&graph, &[old]);
    assert!(dead.is_empty());
    assert!(!graph.header(old).unwrap().is_young());

    let young = graph.alloc(&heap, 0);
    graph.store(&heap, old, 1, Some(young));
    assert!(heap.remembered_set().contains(&Edge::Field {
        owner: old,
        field: FieldRef::Slot(1),
    }));

    // Only the remembered edge reaches the young cell.
    let dead = heap.collect_young(&graph, &[]);
    assert!(dead.is_empty());
    assert!(!graph.header(young).unwrap().is_young());
    assert!(heap.remembered_set().is_empty());
}

#[test]
fn test_minor_gc_without_edge_frees_young() {
    let heap = heap();
    let mut graph = Graph::new();

    let old = graph.alloc(&heap, 1);
    heap.collect(&graph, &[old]);

    let young = graph.alloc(&heap, 0);
    graph.raw_store(old, 0, Some(young));

    let dead = heap.collect_young(&graph, &[]);
    assert_eq!(dead, vec![young]);
}

#[test]
fn test_range_registration_after_bulk_copy() {
    let heap = heap();
    let mut graph = Graph::new();

    let old = graph.alloc(&heap, 4);
    heap.collect(&graph, &[old]);

    let a = graph.alloc(&heap, 0);
    let b = graph.alloc(&heap, 0);
    assert!(heap.not_marking().is_some());
    graph.raw_store(old, 2, Some(a));
    graph.raw_store(old, 3, Some(b));
    let owner_header = graph.header(old).unwrap();
    heap.post_write_range(old, owner_header, Region::Slots, 2, 2);

    let dead = heap.collect_young(&graph, &[]);
    assert!(dead.is_empty());
}

#[test]
fn test_young_owner_records_nothing() {
    let heap = heap();
    let mut graph = Graph::new();

    let owner = graph.alloc(&heap, 1);
    let child = graph.alloc(&heap, 0);
    graph.store(&heap, owner, 0, Some(child));
    assert!(heap.remembered_set().is_empty());

    let dead = heap.collect_young(&graph, &[owner]);
    assert!(dead.is_empty());
}

#[test]
fn test_unreachable_cycle_collected() {
    let heap = heap();
    let mut graph = Graph::new();

    let a = graph.alloc(&heap, 1);
    let b = graph.alloc(&heap, 1);
    graph.store(&heap, a, 0, Some(b));
    graph.store(&heap, b, 0, Some(a));

    let mut dead = heap.collect(&graph, &[]);
    dead.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(dead, expected);
}
