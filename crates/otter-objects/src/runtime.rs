//! Per-instance runtime state
//!
//! Everything that would otherwise be process-global (class live counts,
//! interning tables, the collector, the finalizer thread) hangs off one
//! [`Runtime`]. Independent runtimes share nothing.

use crate::cache::NewObjectCache;
use crate::class::{AllocKind, ClassId, ClassRegistry, ObjectClass};
use crate::config::RuntimeConfig;
use crate::error::ObjectResult;
use crate::gc::Spaces;
use crate::layout::{BaseLayout, LayoutId, LayoutTable, ObjectFlags};
use crate::memory::MemoryManager;
use crate::object::{ObjectCell, ObjectId};
use crate::types::{TypeRecordId, TypeTable};
use otter_heap::{CellKind, FieldRef, Heap, Space};
use rustc_hash::FxHashMap;

/// One isolated object-model instance
pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    pub(crate) heap: Heap,
    pub(crate) memory: MemoryManager,
    pub(crate) spaces: Spaces,
    pub(crate) classes: ClassRegistry,
    pub(crate) new_object_cache: NewObjectCache,
    /// Root set with per-object pin counts
    pub(crate) roots: FxHashMap<ObjectId, u32>,
}

impl Runtime {
    /// Create a runtime
    pub fn new(config: RuntimeConfig) -> Self {
        let spaces = Spaces {
            objects: Space::new(CellKind::Object),
            layouts: LayoutTable::new(config.linear_search_limit),
            types: TypeTable::new(),
        };
        Self {
            heap: Heap::with_config(config.heap.clone()),
            memory: MemoryManager::new(config.memory_limit),
            spaces,
            classes: ClassRegistry::new(),
            new_object_cache: NewObjectCache::default(),
            roots: FxHashMap::default(),
            config,
        }
    }

    /// Configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Collector state
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Memory accounting
    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Class table
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Layout arena
    pub fn layouts(&self) -> &LayoutTable {
        &self.spaces.layouts
    }

    /// Type-record arena
    pub fn types(&self) -> &TypeTable {
        &self.spaces.types
    }

    /// New-object template cache
    pub fn new_object_cache(&self) -> &NewObjectCache {
        &self.new_object_cache
    }

    /// Register an embedder class
    pub fn register_class(&mut self, class: &'static ObjectClass) -> ClassId {
        self.classes.register(class)
    }

    /// Current layout node; compiled code compares this identity to
    /// validate a cached slot
    #[inline]
    pub fn layout_of(&self, obj: ObjectId) -> LayoutId {
        self.spaces.objects[obj.0].layout
    }

    /// Class id
    pub fn class_of(&self, obj: ObjectId) -> ClassId {
        self.spaces.layouts.node(self.layout_of(obj)).base().class
    }

    /// Class descriptor
    pub fn object_class(&self, obj: ObjectId) -> &'static ObjectClass {
        self.classes.get(self.class_of(obj))
    }

    /// Whether `obj` still refers to a live object
    pub fn is_alive(&self, obj: ObjectId) -> bool {
        self.spaces.objects.contains(obj.0)
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.spaces.objects.len()
    }

    // ---------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------

    /// Allocate an object of `class` with the class's default size
    pub fn new_object(&mut self, class: ClassId, proto: Option<ObjectId>) -> ObjectResult<ObjectId> {
        let kind = self.classes.get(class).alloc_kind();
        self.new_object_with_kind(class, proto, kind)
    }

    /// Allocate a plain object with no prototype
    pub fn new_plain_object(&mut self) -> ObjectResult<ObjectId> {
        self.new_object(ClassId::PLAIN, None)
    }

    /// Allocate an object with an explicit size class
    pub fn new_object_with_kind(
        &mut self,
        class: ClassId,
        proto: Option<ObjectId>,
        kind: AllocKind,
    ) -> ObjectResult<ObjectId> {
        let reserved = self.classes.get(class).reserved_slots;

        let (layout, ty) = match self.new_object_cache.lookup(class, proto, kind) {
            Some((layout, ty)) => {
                self.pre_barrier_cell(layout.0);
                self.pre_barrier_cell(ty.0);
                (layout, ty)
            }
            None => {
                let layout = self.spaces.layouts.empty_layout(
                    BaseLayout::new(class),
                    kind.fixed_slots(),
                    reserved,
                    &self.heap,
                    &self.memory,
                )?;
                let ty = self
                    .spaces
                    .types
                    .lineage(class, proto, &self.heap, &self.memory)?;
                self.new_object_cache.insert(class, proto, kind, layout, ty);
                (layout, ty)
            }
        };

        if let Some(p) = proto {
            self.set_object_flags(p, ObjectFlags::DELEGATE)?;
        }
        self.allocate_object(layout, ty, kind)
    }

    /// Allocate an object with a known layout and type record.
    ///
    /// Every field of the new cell is written here, each pointer through its
    /// post-write barrier.
    pub(crate) fn allocate_object(
        &mut self,
        layout: LayoutId,
        ty: TypeRecordId,
        kind: AllocKind,
    ) -> ObjectResult<ObjectId> {
        debug_assert_eq!(
            self.spaces.layouts.node(layout).num_fixed_slots(),
            kind.fixed_slots(),
            "layout and allocation kind disagree on inline slots"
        );
        let cell = ObjectCell::new(layout, ty, kind);
        let bytes = cell.booked_bytes();
        self.memory.alloc(bytes)?;
        let obj = ObjectId(self.spaces.objects.insert(cell, self.heap.allocation_color()));

        let span = self.spaces.layouts.node(layout).slot_span();
        if let Err(err) = self.ensure_overflow(obj, span) {
            self.spaces.objects.remove(obj.0);
            self.memory.free(bytes);
            return Err(err);
        }
        self.resize_slots(obj, span);
        self.post_barrier_cell(obj.0, FieldRef::Layout, layout.0);
        self.post_barrier_cell(obj.0, FieldRef::Type, ty.0);

        let class = self.spaces.layouts.node(layout).base().class;
        self.classes.instance_created(class);
        Ok(obj)
    }

    /// Create a rooted global object with a singleton type record
    pub fn new_global(&mut self) -> ObjectResult<ObjectId> {
        let global = self.new_object(ClassId::GLOBAL, None)?;
        self.add_root(global);
        self.set_object_flags(global, ObjectFlags::VAROBJ)?;
        self.set_singleton_type(global)?;
        tracing::debug!(target: "otter::objects", ?global, "global object created");
        Ok(global)
    }

    // ---------------------------------------------------------------
    // Roots
    // ---------------------------------------------------------------

    /// Pin an object; pins nest
    pub fn add_root(&mut self, obj: ObjectId) {
        *self.roots.entry(obj).or_insert(0) += 1;
    }

    /// Release one pin
    pub fn remove_root(&mut self, obj: ObjectId) {
        if let Some(count) = self.roots.get_mut(&obj) {
            *count -= 1;
            if *count == 0 {
                self.roots.remove(&obj);
            }
        }
    }

    /// Whether the object is pinned
    pub fn is_rooted(&self, obj: ObjectId) -> bool {
        self.roots.contains_key(&obj)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.heap.flush_finalization();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("objects", &self.spaces.objects.len())
            .field("layouts", &self.spaces.layouts)
            .field("types", &self.spaces.types.len())
            .field("roots", &self.roots.len())
            .field("heap", &self.heap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtimes_are_isolated() {
        let mut a = Runtime::new(RuntimeConfig::default());
        let b = Runtime::new(RuntimeConfig::default());
        a.new_plain_object().unwrap();
        assert_eq!(a.classes().live_count(ClassId::PLAIN), 1);
        assert_eq!(b.classes().live_count(ClassId::PLAIN), 0);
        assert_eq!(b.object_count(), 0);
    }

    #[test]
    fn test_objects_of_same_class_share_root_layout() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let a = rt.new_plain_object().unwrap();
        let b = rt.new_plain_object().unwrap();
        assert_eq!(rt.layout_of(a), rt.layout_of(b));
        assert_eq!(rt.get_type(a), rt.get_type(b));
    }

    #[test]
    fn test_proto_becomes_delegate() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let proto = rt.new_plain_object().unwrap();
        let obj = rt.new_object(ClassId::PLAIN, Some(proto)).unwrap();
        assert!(rt.object_flags(proto).contains(ObjectFlags::DELEGATE));
        assert_eq!(rt.get_proto(obj), Some(proto));
    }

    #[test]
    fn test_global_is_rooted_singleton() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let global = rt.new_global().unwrap();
        assert!(rt.is_rooted(global));
        assert!(rt.has_singleton_type(global));
        assert_eq!(rt.num_fixed_slots(global), 16);
        assert_eq!(rt.enclosing_scope(global), None);
    }

    #[test]
    fn test_roots_nest() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let obj = rt.new_plain_object().unwrap();
        rt.add_root(obj);
        rt.add_root(obj);
        rt.remove_root(obj);
        assert!(rt.is_rooted(obj));
        rt.remove_root(obj);
        assert!(!rt.is_rooted(obj));
    }
}
