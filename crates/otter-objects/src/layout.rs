//! Layout tree (hidden classes)
//!
//! A layout node records one property addition on top of its previous node.
//! Nodes are interned: adding the same key with the same attributes under the
//! same base metadata to the same node always yields the same child, so
//! objects that add the same properties in the same order share node tails
//! and an inline cache can validate a whole property list with one
//! comparison.
//!
//! Objects whose property set churns move to *dictionary mode*: a private
//! node owning an insertion-ordered table. Dictionary nodes are never shared
//! or interned, and an object never leaves dictionary mode.
//!
//! Nodes are GC cells. The transition and root tables are weak; entries
//! pointing at dead nodes are removed when the nodes are swept.

use crate::class::ClassId;
use crate::error::ObjectResult;
use crate::memory::MemoryManager;
use crate::object::ObjectId;
use crate::property::{PropertyAttributes, PropertyKey};
use indexmap::IndexMap;
use otter_heap::{CellId, CellKind, GcHeader, Heap, Space};
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::cell::OnceCell;

/// Handle to a layout node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutId(pub(crate) CellId);

impl LayoutId {
    /// Underlying cell
    pub fn cell(self) -> CellId {
        self.0
    }
}

bitflags::bitflags! {
    /// Object-level flags kept in the base record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u16 {
        /// Object is some other object's prototype
        const DELEGATE = 1 << 0;
        /// Engine-internal object
        const SYSTEM = 1 << 1;
        /// No new properties may be added
        const NOT_EXTENSIBLE = 1 << 2;
        /// Has indexed properties outside the dense elements
        const INDEXED = 1 << 3;
        /// Variables object (holds declared bindings)
        const VAROBJ = 1 << 4;
        /// Has watchpoints
        const WATCHED = 1 << 5;
        /// Singleton whose properties were iterated
        const ITERATED_SINGLETON = 1 << 6;
        /// Prototype identity must not be cached
        const UNCACHEABLE_PROTO = 1 << 7;
    }
}

/// Object-level metadata shared by every node with the same values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseLayout {
    /// Object class
    pub class: ClassId,
    /// Object flags
    pub flags: ObjectFlags,
    /// Enclosing-scope parent
    pub parent: Option<ObjectId>,
}

impl BaseLayout {
    /// Base with no flags and no parent
    pub fn new(class: ClassId) -> Self {
        Self {
            class,
            flags: ObjectFlags::empty(),
            parent: None,
        }
    }
}

/// Per-property layout information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyEntry {
    /// Slot index, `None` for accessors
    pub slot: Option<u32>,
    /// Attribute flags
    pub attrs: PropertyAttributes,
    /// Getter (accessors only)
    pub getter: Option<ObjectId>,
    /// Setter (accessors only)
    pub setter: Option<ObjectId>,
}

impl PropertyEntry {
    /// Data property stored in `slot`
    pub fn data(slot: u32, attrs: PropertyAttributes) -> Self {
        Self {
            slot: Some(slot),
            attrs: attrs - PropertyAttributes::ACCESSOR,
            getter: None,
            setter: None,
        }
    }

    /// Whether this is an accessor
    pub fn is_accessor(&self) -> bool {
        self.attrs.is_accessor()
    }

    fn trace(&self, tracer: &mut dyn FnMut(CellId)) {
        if let Some(getter) = self.getter {
            tracer(getter.0);
        }
        if let Some(setter) = self.setter {
            tracer(setter.0);
        }
    }
}

/// Attributes and accessor pair for a property about to be added or changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    /// Attribute flags
    pub attrs: PropertyAttributes,
    /// Getter (accessors only)
    pub getter: Option<ObjectId>,
    /// Setter (accessors only)
    pub setter: Option<ObjectId>,
}

impl PropertySpec {
    /// Data property
    pub fn data(attrs: PropertyAttributes) -> Self {
        Self {
            attrs: attrs - PropertyAttributes::ACCESSOR,
            getter: None,
            setter: None,
        }
    }

    /// Accessor property
    pub fn accessor(
        attrs: PropertyAttributes,
        getter: Option<ObjectId>,
        setter: Option<ObjectId>,
    ) -> Self {
        Self {
            attrs: (attrs | PropertyAttributes::ACCESSOR) - PropertyAttributes::WRITABLE,
            getter,
            setter,
        }
    }

    fn entry(self, slot: Option<u32>) -> PropertyEntry {
        PropertyEntry {
            slot: if self.attrs.has_slot() { slot } else { None },
            attrs: self.attrs,
            getter: self.getter,
            setter: self.setter,
        }
    }
}

/// Private property table of a dictionary-mode object
#[derive(Debug, Clone, Default)]
struct DictionaryTable {
    entries: IndexMap<PropertyKey, PropertyEntry, FxBuildHasher>,
    /// Slots released by removals, reused before the span grows
    free_slots: Vec<u32>,
}

/// A node in the layout tree
#[derive(Debug)]
pub struct LayoutNode {
    base: BaseLayout,
    num_fixed: u32,
    previous: Option<LayoutId>,
    property: Option<(PropertyKey, PropertyEntry)>,
    slot_span: u32,
    entry_count: u32,
    /// Lazily built key lookup for long shared chains
    table: OnceCell<FxHashMap<PropertyKey, PropertyEntry>>,
    dictionary: Option<Box<DictionaryTable>>,
}

impl LayoutNode {
    /// Base metadata
    pub fn base(&self) -> &BaseLayout {
        &self.base
    }

    /// Number of slots the layout uses
    pub fn slot_span(&self) -> u32 {
        self.slot_span
    }

    /// Inline slot count of objects using this layout
    pub fn num_fixed_slots(&self) -> u32 {
        self.num_fixed
    }

    /// Number of properties
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Previous node in the chain
    pub fn previous(&self) -> Option<LayoutId> {
        self.previous
    }

    /// Property added by this node
    pub fn property(&self) -> Option<(&PropertyKey, &PropertyEntry)> {
        self.property.as_ref().map(|(k, e)| (k, e))
    }

    /// Whether this is a private dictionary-mode node
    pub fn in_dictionary_mode(&self) -> bool {
        self.dictionary.is_some()
    }

    fn booked_bytes(&self) -> usize {
        let entries = self.dictionary.as_ref().map_or(0, |d| d.entries.len());
        std::mem::size_of::<LayoutNode>() + entries * DICTIONARY_ENTRY_BYTES
    }

    /// Report referenced cells
    pub(crate) fn trace(&self, tracer: &mut dyn FnMut(CellId)) {
        if let Some(previous) = self.previous {
            tracer(previous.0);
        }
        if let Some(parent) = self.base.parent {
            tracer(parent.0);
        }
        if let Some((_, entry)) = &self.property {
            entry.trace(tracer);
        }
        if let Some(dict) = &self.dictionary {
            for entry in dict.entries.values() {
                entry.trace(tracer);
            }
        }
    }
}

const DICTIONARY_ENTRY_BYTES: usize =
    std::mem::size_of::<PropertyKey>() + std::mem::size_of::<PropertyEntry>();

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransitionKey {
    previous: LayoutId,
    key: PropertyKey,
    entry: PropertyEntry,
    base: BaseLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RootKey {
    base: BaseLayout,
    num_fixed: u32,
    reserved: u32,
}

/// Why an object is being moved to dictionary mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryReason {
    /// A property other than the last one was removed
    RemoveNonLast,
    /// The last property was removed but base metadata differs from its
    /// previous node
    BaseMismatch,
    /// Attributes of a property other than the last one changed
    ChangeNonLast,
    /// Property count passed the dictionary threshold
    TooManyProperties,
    /// Requested by the embedder
    Explicit,
}

/// Arena and intern tables for layout nodes
pub struct LayoutTable {
    nodes: Space<LayoutNode>,
    transitions: FxHashMap<TransitionKey, LayoutId>,
    roots: FxHashMap<RootKey, LayoutId>,
    linear_search_limit: u32,
}

impl LayoutTable {
    /// Create an empty table
    pub fn new(linear_search_limit: u32) -> Self {
        Self {
            nodes: Space::new(CellKind::Layout),
            transitions: FxHashMap::default(),
            roots: FxHashMap::default(),
            linear_search_limit,
        }
    }

    /// Borrow a node
    pub fn node(&self, id: LayoutId) -> &LayoutNode {
        &self.nodes[id.0]
    }

    /// Borrow a node if it is still alive
    pub fn get(&self, id: LayoutId) -> Option<&LayoutNode> {
        self.nodes.get(id.0)
    }

    /// Header of a node
    pub fn header(&self, cell: CellId) -> Option<&GcHeader> {
        self.nodes.header(cell)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes are alive
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of interned transitions
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    pub(crate) fn space(&self) -> &Space<LayoutNode> {
        &self.nodes
    }

    fn alloc(
        &mut self,
        node: LayoutNode,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<LayoutId> {
        memory.alloc(node.booked_bytes())?;
        Ok(LayoutId(self.nodes.insert(node, heap.allocation_color())))
    }

    /// Interned nodes handed out of a weak table must survive an in-progress
    /// mark.
    fn read_barrier(&self, heap: &Heap, id: LayoutId) {
        if let Some(header) = self.nodes.header(id.0) {
            heap.pre_write_barrier(id.0, header);
        }
    }

    /// Empty layout for `base` and `num_fixed` inline slots, with `reserved`
    /// leading slots
    pub fn empty_layout(
        &mut self,
        base: BaseLayout,
        num_fixed: u32,
        reserved: u32,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<LayoutId> {
        let key = RootKey {
            base,
            num_fixed,
            reserved,
        };
        if let Some(&id) = self.roots.get(&key) {
            self.read_barrier(heap, id);
            return Ok(id);
        }
        let node = LayoutNode {
            base,
            num_fixed,
            previous: None,
            property: None,
            slot_span: reserved,
            entry_count: 0,
            table: OnceCell::new(),
            dictionary: None,
        };
        let id = self.alloc(node, heap, memory)?;
        self.roots.insert(key, id);
        Ok(id)
    }

    /// Shared child of `from` adding `key`, created and interned if absent.
    ///
    /// `from` must not be a dictionary node.
    pub fn add_property(
        &mut self,
        from: LayoutId,
        key: PropertyKey,
        spec: PropertySpec,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<LayoutId> {
        let base = self.node(from).base;
        self.add_property_with_base(from, key, spec, base, heap, memory)
    }

    fn add_property_with_base(
        &mut self,
        from: LayoutId,
        key: PropertyKey,
        spec: PropertySpec,
        base: BaseLayout,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<LayoutId> {
        let parent = self.node(from);
        debug_assert!(!parent.in_dictionary_mode());

        let entry = spec.entry(Some(parent.slot_span));
        let transition = TransitionKey {
            previous: from,
            key,
            entry,
            base,
        };
        if let Some(&id) = self.transitions.get(&transition) {
            self.read_barrier(heap, id);
            return Ok(id);
        }

        let node = LayoutNode {
            base,
            num_fixed: parent.num_fixed,
            previous: Some(from),
            property: Some((transition.key.clone(), entry)),
            slot_span: parent.slot_span + u32::from(entry.slot.is_some()),
            entry_count: parent.entry_count + 1,
            table: OnceCell::new(),
            dictionary: None,
        };
        let id = self.alloc(node, heap, memory)?;
        self.transitions.insert(transition, id);
        Ok(id)
    }

    /// Look up an own property
    pub fn lookup(&self, id: LayoutId, key: &PropertyKey) -> Option<PropertyEntry> {
        let node = self.node(id);
        if let Some(dict) = &node.dictionary {
            return dict.entries.get(key).copied();
        }
        if node.entry_count > self.linear_search_limit {
            let table = node.table.get_or_init(|| self.build_table(id));
            return table.get(key).copied();
        }
        self.chain(id)
            .find(|n| matches!(&n.property, Some((k, _)) if k == key))
            .and_then(|n| n.property.as_ref().map(|(_, e)| *e))
    }

    fn build_table(&self, id: LayoutId) -> FxHashMap<PropertyKey, PropertyEntry> {
        let mut table = FxHashMap::default();
        for node in self.chain(id) {
            if let Some((key, entry)) = &node.property {
                table.entry(key.clone()).or_insert(*entry);
            }
        }
        table
    }

    /// Nodes from `id` back to the root
    fn chain(&self, id: LayoutId) -> impl Iterator<Item = &LayoutNode> + '_ {
        let mut next = Some(id);
        std::iter::from_fn(move || {
            let node = self.node(next?);
            next = node.previous;
            Some(node)
        })
    }

    /// Properties in insertion order
    pub fn properties(&self, id: LayoutId) -> Vec<(PropertyKey, PropertyEntry)> {
        let node = self.node(id);
        if let Some(dict) = &node.dictionary {
            return dict
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), *e))
                .collect();
        }
        let mut props: Vec<_> = self
            .chain(id)
            .filter_map(|n| n.property.clone())
            .collect();
        props.reverse();
        props
    }

    /// Key of the most recently added property of a shared node
    pub fn last_property(&self, id: LayoutId) -> Option<&PropertyKey> {
        self.node(id).property.as_ref().map(|(k, _)| k)
    }

    /// Whether removing the last property can return to the previous node:
    /// the previous node must carry the same base metadata.
    pub fn can_remove_last_property(&self, id: LayoutId) -> bool {
        let node = self.node(id);
        match node.previous {
            Some(previous) if node.dictionary.is_none() => self.node(previous).base == node.base,
            _ => false,
        }
    }

    /// The previous node, if the last property can be removed without a
    /// representation change
    pub fn remove_last_property(&self, id: LayoutId) -> Option<LayoutId> {
        self.can_remove_last_property(id)
            .then(|| self.node(id).previous)
            .flatten()
    }

    /// Replace the last property's attributes on a shared node.
    ///
    /// The slot is kept unless the property switches between data and
    /// accessor.
    pub fn change_last_property(
        &mut self,
        id: LayoutId,
        spec: PropertySpec,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<LayoutId> {
        let node = self.node(id);
        let (Some(previous), Some((key, _))) = (node.previous, node.property.clone()) else {
            return Ok(id);
        };
        let base = node.base;
        self.add_property_with_base(previous, key, spec, base, heap, memory)
    }

    /// Equivalent layout under a different base record.
    ///
    /// For shared nodes only the last node is replaced, so the previous node
    /// keeps the old base; a dictionary node is updated in place.
    pub fn with_base(
        &mut self,
        id: LayoutId,
        base: BaseLayout,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<LayoutId> {
        let node = self.node(id);
        if node.base == base {
            return Ok(id);
        }
        if node.dictionary.is_some() {
            return Ok(self.regenerate(id, heap, |node| node.base = base));
        }
        match (node.previous, node.property.clone()) {
            (Some(previous), Some((key, entry))) => {
                let spec = PropertySpec {
                    attrs: entry.attrs,
                    getter: entry.getter,
                    setter: entry.setter,
                };
                self.add_property_with_base(previous, key, spec, base, heap, memory)
            }
            _ => {
                let (num_fixed, reserved) = (node.num_fixed, node.slot_span);
                self.empty_layout(base, num_fixed, reserved, heap, memory)
            }
        }
    }

    /// Private dictionary copy of `id`'s property list
    pub fn to_dictionary(
        &mut self,
        id: LayoutId,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<LayoutId> {
        let node = self.node(id);
        debug_assert!(!node.in_dictionary_mode());

        let mut entries = IndexMap::with_capacity_and_hasher(
            node.entry_count as usize,
            FxBuildHasher,
        );
        for (key, entry) in self.properties(id) {
            entries.insert(key, entry);
        }
        let node = self.node(id);
        let dict = LayoutNode {
            base: node.base,
            num_fixed: node.num_fixed,
            previous: None,
            property: None,
            slot_span: node.slot_span,
            entry_count: node.entry_count,
            table: OnceCell::new(),
            dictionary: Some(Box::new(DictionaryTable {
                entries,
                free_slots: Vec::new(),
            })),
        };
        self.alloc(dict, heap, memory)
    }

    /// Move a dictionary node's contents into a fresh cell so layout
    /// identity checks miss.
    ///
    /// The caller must have run the pre-write barrier over the old node's
    /// contents if a mark is in progress.
    fn regenerate(
        &mut self,
        id: LayoutId,
        heap: &Heap,
        mutate: impl FnOnce(&mut LayoutNode),
    ) -> LayoutId {
        let mut node = match self.nodes.remove(id.0) {
            Some(node) => node,
            None => panic!("stale layout handle {id:?}"),
        };
        mutate(&mut node);
        LayoutId(self.nodes.insert(node, heap.allocation_color()))
    }

    /// Dictionary node `id` with its base replaced. Never allocates.
    pub(crate) fn rebase_dictionary(
        &mut self,
        id: LayoutId,
        base: BaseLayout,
        heap: &Heap,
    ) -> LayoutId {
        self.regenerate(id, heap, |node| node.base = base)
    }

    /// Slot a dictionary add would use, without mutating
    pub fn dictionary_next_slot(&self, id: LayoutId) -> u32 {
        let node = self.node(id);
        node.dictionary
            .as_ref()
            .and_then(|d| d.free_slots.last().copied())
            .unwrap_or(node.slot_span)
    }

    /// Add a property to a dictionary node
    pub fn dictionary_add(
        &mut self,
        id: LayoutId,
        key: PropertyKey,
        spec: PropertySpec,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<(LayoutId, PropertyEntry)> {
        if let Some(existing) = self
            .node(id)
            .dictionary
            .as_ref()
            .and_then(|d| d.entries.get(&key))
        {
            return Ok((id, *existing));
        }
        memory.alloc(DICTIONARY_ENTRY_BYTES)?;
        let mut added = spec.entry(None);
        let id = self.regenerate(id, heap, |node| {
            let span = node.slot_span;
            let Some(dict) = node.dictionary.as_mut() else {
                return;
            };
            if spec.attrs.has_slot() {
                let slot = dict.free_slots.pop().unwrap_or(span);
                added.slot = Some(slot);
                node.slot_span = node.slot_span.max(slot + 1);
            }
            dict.entries.insert(key, added);
            node.entry_count = dict.entries.len() as u32;
        });
        Ok((id, added))
    }

    /// Remove a property from a dictionary node, returning the freed slot
    pub fn dictionary_remove(
        &mut self,
        id: LayoutId,
        key: &PropertyKey,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> (LayoutId, Option<PropertyEntry>) {
        let mut removed = None;
        let id = self.regenerate(id, heap, |node| {
            let Some(dict) = node.dictionary.as_mut() else {
                return;
            };
            removed = dict.entries.shift_remove(key);
            if let Some(slot) = removed.and_then(|e| e.slot) {
                dict.free_slots.push(slot);
            }
            node.entry_count = dict.entries.len() as u32;
        });
        if removed.is_some() {
            memory.free(DICTIONARY_ENTRY_BYTES);
        }
        (id, removed)
    }

    /// Change a dictionary property's attributes.
    ///
    /// Returns the new node, the old entry and the new entry.
    pub fn dictionary_change(
        &mut self,
        id: LayoutId,
        key: &PropertyKey,
        spec: PropertySpec,
        heap: &Heap,
    ) -> (LayoutId, Option<(PropertyEntry, PropertyEntry)>) {
        let mut changed = None;
        let id = self.regenerate(id, heap, |node| {
            let span = node.slot_span;
            let Some(dict) = node.dictionary.as_mut() else {
                return;
            };
            let Some(entry) = dict.entries.get_mut(key) else {
                return;
            };
            let old = *entry;
            let slot = match (old.slot, spec.attrs.has_slot()) {
                (Some(slot), true) => Some(slot),
                (Some(slot), false) => {
                    dict.free_slots.push(slot);
                    None
                }
                (None, true) => Some(dict.free_slots.pop().unwrap_or(span)),
                (None, false) => None,
            };
            *entry = spec.entry(slot);
            if let Some(slot) = slot {
                node.slot_span = node.slot_span.max(slot + 1);
            }
            changed = Some((old, *entry));
        });
        (id, changed)
    }

    /// Remove nodes found dead by the collector and drop weak entries to them
    pub(crate) fn sweep(&mut self, dead: &[CellId], memory: &MemoryManager) -> usize {
        let mut freed = 0;
        for &cell in dead {
            if let Some(node) = self.nodes.remove(cell) {
                memory.free(node.booked_bytes());
                freed += 1;
            }
        }
        if freed > 0 {
            let nodes = &self.nodes;
            self.transitions
                .retain(|k, v| nodes.contains(k.previous.0) && nodes.contains(v.0));
            self.roots.retain(|_, v| nodes.contains(v.0));
        }
        freed
    }
}

impl std::fmt::Debug for LayoutTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutTable")
            .field("nodes", &self.nodes.len())
            .field("transitions", &self.transitions.len())
            .field("roots", &self.roots.len())
            .finish()
    }
}
