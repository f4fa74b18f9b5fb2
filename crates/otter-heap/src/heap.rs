//! Heap state: barriers, collection phases and the collector driver
//!
//! The `Heap` does not own any payloads. Spaces live with the object model,
//! which exposes them through [`HeapGraph`]; the heap keeps the marking
//! state, the barrier buffer, the remembered set and the background
//! finalizer.

use crate::barrier::{Edge, FieldRef, NotMarking, Region, RememberedSet, WriteBarrierBuffer};
use crate::cell::{CellId, GcHeader, MarkColor};
use crate::finalization::{BackgroundFinalizer, FinalizeTask};
use crate::trace::HeapGraph;
use rustc_hash::FxHashSet;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Heap configuration
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Gray cells processed per incremental step (default: 256)
    pub mark_budget: usize,
    /// Barrier buffer size that triggers an early drain (default: 1024)
    pub barrier_buffer_capacity: usize,
    /// Run eligible finalizers on a background thread (default: true)
    pub background_finalization: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            mark_budget: 256,
            barrier_buffer_capacity: 1024,
            background_finalization: true,
        }
    }
}

impl HeapConfig {
    /// Set the incremental mark budget
    pub fn with_mark_budget(mut self, budget: usize) -> Self {
        self.mark_budget = budget.max(1);
        self
    }

    /// Set the barrier buffer capacity
    pub fn with_barrier_buffer_capacity(mut self, capacity: usize) -> Self {
        self.barrier_buffer_capacity = capacity.max(1);
        self
    }

    /// Enable or disable background finalization
    pub fn with_background_finalization(mut self, enabled: bool) -> Self {
        self.background_finalization = enabled;
        self
    }
}

/// GC phase for incremental collection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    /// No GC in progress
    Idle = 0,
    /// Incremental marking in progress; pre-write barriers are active
    Marking = 1,
}

/// Collector statistics
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStats {
    /// Number of major collections (full or incremental)
    pub collections: u64,
    /// Number of minor collections
    pub minor_collections: u64,
    /// Cells marked live in the last collection
    pub last_marked: usize,
    /// Cells found dead in the last collection
    pub last_swept: usize,
    /// Old values grayed by the pre-write barrier
    pub pre_barrier_hits: u64,
    /// Edges added to the remembered set
    pub remembered_edges: u64,
    /// Time spent in the last collection
    pub last_pause: Duration,
}

/// Collector-side heap state for one runtime
pub struct Heap {
    config: HeapConfig,
    phase: Cell<GcPhase>,
    worklist: RefCell<VecDeque<CellId>>,
    barrier_buffer: WriteBarrierBuffer,
    remembered_set: RememberedSet,
    stats: Cell<HeapStats>,
    mark_start: Cell<Option<Instant>>,
    epoch: Cell<u64>,
    finalizer: Option<BackgroundFinalizer>,
}

impl Heap {
    /// Create a heap with default config
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Create a heap with custom config
    pub fn with_config(config: HeapConfig) -> Self {
        let finalizer = config
            .background_finalization
            .then(BackgroundFinalizer::spawn);
        Self {
            barrier_buffer: WriteBarrierBuffer::with_capacity(config.barrier_buffer_capacity),
            remembered_set: RememberedSet::new(),
            phase: Cell::new(GcPhase::Idle),
            worklist: RefCell::new(VecDeque::new()),
            stats: Cell::new(HeapStats::default()),
            mark_start: Cell::new(None),
            epoch: Cell::new(0),
            finalizer,
            config,
        }
    }

    /// Get config
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Current collector phase
    pub fn phase(&self) -> GcPhase {
        self.phase.get()
    }

    /// Returns true if incremental marking is in progress.
    #[inline]
    pub fn is_marking(&self) -> bool {
        self.phase.get() == GcPhase::Marking
    }

    /// Proof token for barrier-elided bulk operations, `None` while marking
    pub fn not_marking(&self) -> Option<NotMarking> {
        (!self.is_marking()).then(|| NotMarking::new(self.epoch.get()))
    }

    /// Whether `token` still proves that no mark is running
    pub fn verify_not_marking(&self, token: NotMarking) -> bool {
        !self.is_marking() && token.epoch() == self.epoch.get()
    }

    /// Color newly allocated cells must start with.
    ///
    /// Black while marking, so cells born during a cycle survive it.
    #[inline]
    pub fn allocation_color(&self) -> MarkColor {
        if self.is_marking() {
            MarkColor::Black
        } else {
            MarkColor::White
        }
    }

    /// Remembered set
    pub fn remembered_set(&self) -> &RememberedSet {
        &self.remembered_set
    }

    /// Write barrier buffer
    pub fn barrier_buffer(&self) -> &WriteBarrierBuffer {
        &self.barrier_buffer
    }

    /// Get statistics
    pub fn stats(&self) -> HeapStats {
        self.stats.get()
    }

    fn update_stats(&self, f: impl FnOnce(&mut HeapStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    // ---------------------------------------------------------------
    // Barriers
    // ---------------------------------------------------------------

    /// Pre-write (deletion) barrier.
    ///
    /// Must run before a pointer field holding `old` is overwritten or
    /// destroyed. While marking, a white `old` is grayed and queued so the
    /// snapshot taken at the start of the cycle stays intact.
    #[inline]
    pub fn pre_write_barrier(&self, old: CellId, old_header: &GcHeader) {
        if !self.is_marking() {
            return;
        }
        if old_header.mark() == MarkColor::White {
            old_header.set_mark(MarkColor::Gray);
            if self.barrier_buffer.push(old) {
                self.drain_barrier_buffer();
            }
            self.update_stats(|s| s.pre_barrier_hits += 1);
        }
    }

    /// Post-write (generational) barrier.
    ///
    /// Must run after `owner.field` has been set to a pointer whose header is
    /// `new_header`. Records the edge when an old owner now points at a young
    /// cell. Returns true if an edge was recorded.
    #[inline]
    pub fn post_write_barrier(
        &self,
        owner: CellId,
        owner_header: &GcHeader,
        field: FieldRef,
        new_header: &GcHeader,
    ) -> bool {
        if owner_header.is_young() || !new_header.is_young() {
            return false;
        }
        let added = self.remembered_set.add(Edge::Field { owner, field });
        if added {
            self.update_stats(|s| s.remembered_edges += 1);
        }
        added
    }

    /// Post-hoc remembered-set registration for a bulk-written range.
    ///
    /// A raw copy does not run the per-field post barrier, so the whole
    /// destination range of an old owner is registered instead.
    pub fn post_write_range(
        &self,
        owner: CellId,
        owner_header: &GcHeader,
        region: Region,
        start: u32,
        count: u32,
    ) {
        if count == 0 || owner_header.is_young() {
            return;
        }
        if self.remembered_set.add(Edge::Range {
            owner,
            region,
            start,
            count,
        }) {
            self.update_stats(|s| s.remembered_edges += 1);
        }
    }

    fn drain_barrier_buffer(&self) {
        let entries = self.barrier_buffer.drain();
        self.worklist.borrow_mut().extend(entries);
    }

    // ---------------------------------------------------------------
    // Major collection
    // ---------------------------------------------------------------

    /// Run a full, non-incremental collection.
    ///
    /// Returns the cells found dead; the caller frees them.
    pub fn collect(&self, graph: &dyn HeapGraph, roots: &[CellId]) -> Vec<CellId> {
        self.start_incremental(graph, roots);
        self.finish_incremental(graph)
    }

    /// Start an incremental GC cycle.
    ///
    /// Resets marks, seeds the worklist from roots and transitions to
    /// `GcPhase::Marking`. Subsequent calls to [`mark_step`](Self::mark_step)
    /// process the worklist in budgeted chunks.
    pub fn start_incremental(&self, graph: &dyn HeapGraph, roots: &[CellId]) {
        debug_assert!(!self.is_marking(), "incremental mark already running");

        graph.for_each_cell(&mut |_, header| header.set_mark(MarkColor::White));
        self.barrier_buffer.drain();

        let mut worklist = self.worklist.borrow_mut();
        worklist.clear();
        for &root in roots {
            if let Some(header) = graph.header(root)
                && header.mark() == MarkColor::White
            {
                header.set_mark(MarkColor::Gray);
                worklist.push_back(root);
            }
        }
        drop(worklist);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            roots = roots.len(),
            "incremental mark starting"
        );

        self.update_stats(|s| s.last_marked = 0);
        self.mark_start.set(Some(Instant::now()));
        self.epoch.set(self.epoch.get() + 1);
        self.phase.set(GcPhase::Marking);
    }

    /// Process up to `budget` gray cells from the mark worklist.
    ///
    /// Returns `true` when marking is complete (worklist and barrier buffer
    /// both empty).
    pub fn mark_step(&self, graph: &dyn HeapGraph, budget: usize) -> bool {
        if !self.is_marking() {
            return true;
        }

        self.drain_barrier_buffer();

        let mut processed = 0;
        while processed < budget {
            let cell = match self.worklist.borrow_mut().pop_front() {
                Some(c) => c,
                None => break,
            };
            let Some(header) = graph.header(cell) else {
                continue;
            };
            if header.mark() == MarkColor::Black {
                continue;
            }

            let mut worklist = self.worklist.borrow_mut();
            graph.trace(cell, &mut |child| {
                if let Some(child_header) = graph.header(child)
                    && child_header.mark() == MarkColor::White
                {
                    child_header.set_mark(MarkColor::Gray);
                    worklist.push_back(child);
                }
            });
            drop(worklist);

            header.set_mark(MarkColor::Black);
            processed += 1;
        }

        self.update_stats(|s| s.last_marked += processed);
        self.worklist.borrow().is_empty() && self.barrier_buffer.is_empty()
    }

    /// Complete the incremental GC cycle.
    ///
    /// Finishes marking, returns every white cell and tenures survivors.
    pub fn finish_incremental(&self, graph: &dyn HeapGraph) -> Vec<CellId> {
        if !self.is_marking() {
            return Vec::new();
        }
        while !self.mark_step(graph, usize::MAX) {}

        let mut dead = Vec::new();
        graph.for_each_cell(&mut |cell, header| {
            if header.mark() == MarkColor::White {
                dead.push(cell);
            } else {
                header.promote();
            }
        });

        // Every survivor is old now; no old-to-young edge can remain.
        self.remembered_set.clear();

        let elapsed = self
            .mark_start
            .take()
            .map(|start| start.elapsed())
            .unwrap_or_default();
        self.update_stats(|s| {
            s.collections += 1;
            s.last_swept = dead.len();
            s.last_pause = elapsed;
        });
        self.phase.set(GcPhase::Idle);

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "otter::gc",
            dead = dead.len(),
            pause_us = elapsed.as_micros() as u64,
            "GC cycle complete"
        );

        dead
    }

    // ---------------------------------------------------------------
    // Minor collection
    // ---------------------------------------------------------------

    /// Collect the young generation only.
    ///
    /// Roots are scanned regardless of age; old cells are otherwise treated
    /// as live and never entered, so any young cell reachable only through an
    /// old cell must be covered by a remembered edge. Survivors are promoted.
    pub fn collect_young(&self, graph: &dyn HeapGraph, roots: &[CellId]) -> Vec<CellId> {
        debug_assert!(
            !self.is_marking(),
            "minor collection during incremental mark"
        );
        let start = Instant::now();

        let mut live: FxHashSet<CellId> = FxHashSet::default();
        let mut worklist: Vec<CellId> = Vec::new();

        let visit = |child: CellId, live: &mut FxHashSet<CellId>, worklist: &mut Vec<CellId>| {
            if let Some(h) = graph.header(child)
                && h.is_young()
                && live.insert(child)
            {
                worklist.push(child);
            }
        };

        for &root in roots {
            if graph.header(root).is_some_and(|h| h.is_young()) {
                visit(root, &mut live, &mut worklist);
            } else {
                graph.trace(root, &mut |child| visit(child, &mut live, &mut worklist));
            }
        }
        for edge in self.remembered_set.edges() {
            if graph.header(edge.owner()).is_none() {
                continue;
            }
            graph.trace_edge(&edge, &mut |child| visit(child, &mut live, &mut worklist));
        }
        while let Some(cell) = worklist.pop() {
            graph.trace(cell, &mut |child| visit(child, &mut live, &mut worklist));
        }

        let mut dead = Vec::new();
        graph.for_each_cell(&mut |cell, header| {
            if !header.is_young() {
                return;
            }
            if live.contains(&cell) {
                header.promote();
            } else {
                dead.push(cell);
            }
        });
        self.remembered_set.clear();

        let elapsed = start.elapsed();
        self.update_stats(|s| {
            s.minor_collections += 1;
            s.last_marked = live.len();
            s.last_swept = dead.len();
            s.last_pause = elapsed;
        });

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            promoted = live.len(),
            dead = dead.len(),
            "minor GC complete"
        );

        dead
    }

    // ---------------------------------------------------------------
    // Finalization
    // ---------------------------------------------------------------

    /// Hand a batch of dead-object storage to the background finalizer.
    ///
    /// Runs the tasks inline when background finalization is disabled.
    pub fn finalize_in_background(&self, batch: Vec<Box<dyn FinalizeTask>>) {
        if batch.is_empty() {
            return;
        }
        match &self.finalizer {
            Some(finalizer) => finalizer.submit(batch),
            None => batch.into_iter().for_each(|task| task.finalize()),
        }
    }

    /// Block until every queued background finalization has run
    pub fn flush_finalization(&self) {
        if let Some(finalizer) = &self.finalizer {
            finalizer.flush();
        }
    }

    /// Number of tasks finalized off the mutator thread so far
    pub fn background_finalized(&self) -> usize {
        self.finalizer.as_ref().map_or(0, |f| f.finalized())
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("phase", &self.phase.get())
            .field("worklist", &self.worklist.borrow().len())
            .field("remembered", &self.remembered_set.len())
            .finish()
    }
}
