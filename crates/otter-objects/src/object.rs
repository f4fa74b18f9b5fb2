//! Object cells and property-set mutation
//!
//! An object owns its inline (fixed) slots, an optional overflow slot array
//! and its element buffer. It points at a shared layout node and a type
//! record; every change of its property set swaps the layout pointer, either
//! to another interned node or to a private dictionary node.

use crate::class::AllocKind;
use crate::elements::ElementBuffer;
use crate::error::{ObjectError, ObjectResult};
use crate::layout::{BaseLayout, DictionaryReason, LayoutId, ObjectFlags, PropertyEntry, PropertySpec};
use crate::property::{PropertyAttributes, PropertyKey};
use crate::runtime::Runtime;
use crate::types::{TypeFlags, TypeRecordId};
use crate::value::Value;
use otter_heap::{CellId, FieldRef};
use std::any::Any;

/// Handle to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) CellId);

impl ObjectId {
    /// Underlying cell
    pub fn cell(self) -> CellId {
        self.0
    }
}

/// Private payload of classes declaring `HAS_PRIVATE`
pub type PrivateData = Box<dyn Any + Send>;

/// Storage owned exclusively by one object.
///
/// This is what survives an object's death long enough to be finalized; it
/// holds no layout or type record, so it is safe to release off the mutator
/// thread.
#[derive(Default)]
pub struct ObjectStorage {
    /// Overflow slot values
    pub overflow: Vec<Value>,
    /// Dense element values
    pub elements: Vec<Value>,
    /// Private payload
    pub private: Option<PrivateData>,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("overflow", &self.overflow.len())
            .field("elements", &self.elements.len())
            .field("private", &self.private.is_some())
            .finish()
    }
}

/// An object instance
pub struct ObjectCell {
    pub(crate) layout: LayoutId,
    pub(crate) ty: TypeRecordId,
    pub(crate) alloc_kind: AllocKind,
    /// Inline slots, sized by the allocation kind
    pub(crate) fixed: Box<[Value]>,
    /// Overflow slots; `len() == slot_span - fixed.len()` when the span
    /// exceeds the inline slots, empty and unallocated otherwise
    pub(crate) overflow: Vec<Value>,
    /// Booked overflow capacity
    pub(crate) overflow_capacity: u32,
    pub(crate) elements: ElementBuffer,
    pub(crate) private: Option<PrivateData>,
}

impl ObjectCell {
    pub(crate) fn new(layout: LayoutId, ty: TypeRecordId, alloc_kind: AllocKind) -> Self {
        Self {
            layout,
            ty,
            alloc_kind,
            fixed: vec![Value::Undefined; alloc_kind.fixed_slots() as usize].into_boxed_slice(),
            overflow: Vec::new(),
            overflow_capacity: 0,
            elements: ElementBuffer::new(),
            private: None,
        }
    }

    /// Inline slot count
    #[inline]
    pub fn num_fixed_slots(&self) -> u32 {
        self.fixed.len() as u32
    }

    /// Slot value by index
    #[inline]
    pub(crate) fn slot(&self, index: u32) -> &Value {
        let fixed = self.num_fixed_slots();
        if index < fixed {
            &self.fixed[index as usize]
        } else {
            &self.overflow[(index - fixed) as usize]
        }
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, index: u32) -> &mut Value {
        let fixed = self.num_fixed_slots();
        if index < fixed {
            &mut self.fixed[index as usize]
        } else {
            &mut self.overflow[(index - fixed) as usize]
        }
    }

    /// Number of slots in use
    pub(crate) fn storage_span(&self) -> u32 {
        self.num_fixed_slots() + self.overflow.len() as u32
    }

    /// Bytes booked for this object
    pub(crate) fn booked_bytes(&self) -> usize {
        let value = std::mem::size_of::<Value>();
        std::mem::size_of::<ObjectCell>()
            + self.fixed.len() * value
            + self.overflow_capacity as usize * value
            + self.elements.capacity() as usize * value
    }

    /// Take the exclusively owned storage out of a dead object
    pub(crate) fn into_storage(self) -> ObjectStorage {
        ObjectStorage {
            overflow: self.overflow,
            elements: self.elements.into_values(),
            private: self.private,
        }
    }

    pub(crate) fn trace(&self, tracer: &mut dyn FnMut(CellId)) {
        tracer(self.layout.0);
        tracer(self.ty.0);
        for value in self.fixed.iter().chain(self.overflow.iter()) {
            if let Value::Object(id) = value {
                tracer(id.0);
            }
        }
        self.elements.trace(tracer);
    }
}

impl std::fmt::Debug for ObjectCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCell")
            .field("layout", &self.layout)
            .field("type", &self.ty)
            .field("alloc_kind", &self.alloc_kind)
            .field("span", &self.storage_span())
            .field("elements", &self.elements)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Property-set mutation
// ---------------------------------------------------------------------------

impl Runtime {
    /// Look up an own property in the object's layout
    pub fn lookup_own(&self, obj: ObjectId, key: &PropertyKey) -> Option<PropertyEntry> {
        self.spaces.layouts.lookup(self.layout_of(obj), key)
    }

    /// Own property keys in insertion order (named properties only)
    pub fn own_property_keys(&self, obj: ObjectId) -> Vec<PropertyKey> {
        self.spaces
            .layouts
            .properties(self.layout_of(obj))
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    /// Whether the object uses a private dictionary layout
    pub fn in_dictionary_mode(&self, obj: ObjectId) -> bool {
        self.spaces.layouts.node(self.layout_of(obj)).in_dictionary_mode()
    }

    /// Object-level flags
    pub fn object_flags(&self, obj: ObjectId) -> ObjectFlags {
        self.spaces.layouts.node(self.layout_of(obj)).base().flags
    }

    /// Whether new properties may be added
    pub fn is_extensible(&self, obj: ObjectId) -> bool {
        !self.object_flags(obj).contains(ObjectFlags::NOT_EXTENSIBLE)
    }

    /// Add a new own property, returning its layout entry.
    ///
    /// The key must not already be present. Storage is reserved before the
    /// layout changes, so an allocation failure leaves the object as it was.
    pub fn add_property(
        &mut self,
        obj: ObjectId,
        key: PropertyKey,
        spec: PropertySpec,
    ) -> ObjectResult<PropertyEntry> {
        debug_assert!(self.lookup_own(obj, &key).is_none(), "duplicate property {key}");
        let layout = self.layout_of(obj);
        let node = self.spaces.layouts.node(layout);

        if !node.in_dictionary_mode() && node.entry_count() >= self.config.dictionary_threshold {
            self.convert_to_dictionary(obj, DictionaryReason::TooManyProperties)?;
            return self.add_property(obj, key, spec);
        }

        if node.in_dictionary_mode() {
            let layout = self.layout_of(obj);
            if spec.attrs.has_slot() {
                let slot = self.spaces.layouts.dictionary_next_slot(layout);
                let span = self.spaces.layouts.node(layout).slot_span().max(slot + 1);
                self.ensure_overflow(obj, span)?;
            }
            self.barrier_cell_contents(layout.0);
            let (new_layout, entry) = match self.spaces.layouts.dictionary_add(
                layout,
                key,
                spec,
                &self.heap,
                &self.memory,
            ) {
                Ok(added) => added,
                Err(err) => {
                    self.release_unused_overflow(obj);
                    return Err(err);
                }
            };
            self.set_layout(obj, new_layout);
            return Ok(entry);
        }

        let span = node.slot_span() + u32::from(spec.attrs.has_slot());
        self.ensure_overflow(obj, span)?;
        let new_layout =
            match self
                .spaces
                .layouts
                .add_property(layout, key.clone(), spec, &self.heap, &self.memory)
            {
                Ok(id) => id,
                Err(err) => {
                    self.release_unused_overflow(obj);
                    return Err(err);
                }
            };
        self.set_layout(obj, new_layout);
        self.spaces
            .layouts
            .lookup(new_layout, &key)
            .ok_or_else(|| ObjectError::internal("added property not found"))
    }

    /// Remove an own named property. Returns false if it was absent.
    ///
    /// Removing the most recently added property returns to the previous
    /// shared node when the base metadata matches; every other removal goes
    /// through dictionary mode.
    pub fn remove_property(&mut self, obj: ObjectId, key: &PropertyKey) -> ObjectResult<bool> {
        let layout = self.layout_of(obj);
        if self.spaces.layouts.lookup(layout, key).is_none() {
            return Ok(false);
        }

        let node = self.spaces.layouts.node(layout);
        if !node.in_dictionary_mode() {
            let is_last = self.spaces.layouts.last_property(layout) == Some(key);
            if is_last {
                if let Some(previous) = self.spaces.layouts.remove_last_property(layout) {
                    self.set_layout(obj, previous);
                    return Ok(true);
                }
                self.convert_to_dictionary(obj, DictionaryReason::BaseMismatch)?;
            } else {
                self.convert_to_dictionary(obj, DictionaryReason::RemoveNonLast)?;
            }
        }

        let layout = self.layout_of(obj);
        self.barrier_cell_contents(layout.0);
        let (new_layout, removed) =
            self.spaces
                .layouts
                .dictionary_remove(layout, key, &self.heap, &self.memory);
        self.set_layout(obj, new_layout);
        if let Some(slot) = removed.and_then(|e| e.slot) {
            self.set_slot(obj, slot, Value::Undefined);
        }
        Ok(removed.is_some())
    }

    /// Change the attributes (and accessor pair) of an existing property.
    ///
    /// The slot is preserved unless the property switches between data and
    /// accessor; a fresh data slot starts out `undefined`.
    pub fn change_property(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
        spec: PropertySpec,
    ) -> ObjectResult<PropertyEntry> {
        let layout = self.layout_of(obj);
        let Some(current) = self.spaces.layouts.lookup(layout, key) else {
            return Err(ObjectError::internal(format!("no property {key} to change")));
        };
        if current.attrs == spec.attrs
            && current.getter == spec.getter
            && current.setter == spec.setter
        {
            return Ok(current);
        }

        let node = self.spaces.layouts.node(layout);
        if !node.in_dictionary_mode() {
            if self.spaces.layouts.last_property(layout) == Some(key) {
                let span = node.previous().map_or(0, |p| self.spaces.layouts.node(p).slot_span())
                    + u32::from(spec.attrs.has_slot());
                self.ensure_overflow(obj, span)?;
                let new_layout = match self.spaces.layouts.change_last_property(
                    layout,
                    spec,
                    &self.heap,
                    &self.memory,
                ) {
                    Ok(id) => id,
                    Err(err) => {
                        self.release_unused_overflow(obj);
                        return Err(err);
                    }
                };
                self.set_layout(obj, new_layout);
                return self
                    .spaces
                    .layouts
                    .lookup(new_layout, key)
                    .ok_or_else(|| ObjectError::internal("changed property not found"));
            }
            self.convert_to_dictionary(obj, DictionaryReason::ChangeNonLast)?;
        }

        let layout = self.layout_of(obj);
        if current.slot.is_none() && spec.attrs.has_slot() {
            let slot = self.spaces.layouts.dictionary_next_slot(layout);
            let span = self.spaces.layouts.node(layout).slot_span().max(slot + 1);
            self.ensure_overflow(obj, span)?;
        }
        self.barrier_cell_contents(layout.0);
        let (new_layout, changed) = self
            .spaces
            .layouts
            .dictionary_change(layout, key, spec, &self.heap);
        self.set_layout(obj, new_layout);
        let Some((old, new)) = changed else {
            return Err(ObjectError::internal(format!("no property {key} to change")));
        };
        if let (Some(slot), None) = (old.slot, new.slot) {
            self.set_slot(obj, slot, Value::Undefined);
        }
        Ok(new)
    }

    /// Move the object to a private dictionary layout. No-op if it already
    /// has one.
    pub fn convert_to_dictionary(
        &mut self,
        obj: ObjectId,
        reason: DictionaryReason,
    ) -> ObjectResult<()> {
        let layout = self.layout_of(obj);
        if self.spaces.layouts.node(layout).in_dictionary_mode() {
            return Ok(());
        }
        let dict = self
            .spaces
            .layouts
            .to_dictionary(layout, &self.heap, &self.memory)?;
        self.set_layout(obj, dict);
        tracing::debug!(
            target: "otter::objects",
            ?obj,
            ?reason,
            properties = self.spaces.layouts.node(dict).entry_count(),
            "converted to dictionary mode"
        );
        Ok(())
    }

    /// Replace the object's base record
    fn set_base(&mut self, obj: ObjectId, base: BaseLayout) -> ObjectResult<()> {
        let layout = self.layout_of(obj);
        if *self.spaces.layouts.node(layout).base() == base {
            return Ok(());
        }
        if self.spaces.layouts.node(layout).in_dictionary_mode() {
            self.barrier_cell_contents(layout.0);
        }
        let new_layout = self
            .spaces
            .layouts
            .with_base(layout, base, &self.heap, &self.memory)?;
        self.set_layout(obj, new_layout);
        Ok(())
    }

    /// Set object-level flags
    pub fn set_object_flags(&mut self, obj: ObjectId, flags: ObjectFlags) -> ObjectResult<()> {
        let base = *self.spaces.layouts.node(self.layout_of(obj)).base();
        if base.flags.contains(flags) {
            return Ok(());
        }
        self.set_base(
            obj,
            BaseLayout {
                flags: base.flags | flags,
                ..base
            },
        )
    }

    /// Undo a base change after a later step of the same mutation failed.
    ///
    /// `previous` is the layout the object had before the change. A shared
    /// layout is simply reinstated; a dictionary is regenerated with `base`.
    pub(crate) fn restore_base(&mut self, obj: ObjectId, previous: LayoutId, base: BaseLayout) {
        let layout = self.layout_of(obj);
        if layout == previous {
            return;
        }
        if self.spaces.layouts.node(layout).in_dictionary_mode()
            && self.spaces.layouts.get(previous).is_none()
        {
            self.barrier_cell_contents(layout.0);
            let restored = self.spaces.layouts.rebase_dictionary(layout, base, &self.heap);
            self.set_layout(obj, restored);
        } else {
            self.set_layout(obj, previous);
        }
    }

    /// Enclosing-scope parent
    pub fn parent(&self, obj: ObjectId) -> Option<ObjectId> {
        self.spaces.layouts.node(self.layout_of(obj)).base().parent
    }

    /// Set the enclosing-scope parent
    pub fn set_parent(&mut self, obj: ObjectId, parent: Option<ObjectId>) -> ObjectResult<()> {
        let base = *self.spaces.layouts.node(self.layout_of(obj)).base();
        self.set_base(obj, BaseLayout { parent, ..base })
    }

    /// Enclosing scope; global objects have none
    pub fn enclosing_scope(&self, obj: ObjectId) -> Option<ObjectId> {
        if self.object_class(obj).kind == crate::class::ObjectKind::Global {
            return None;
        }
        self.parent(obj)
    }

    /// Forbid adding properties
    pub fn prevent_extensions(&mut self, obj: ObjectId) -> ObjectResult<()> {
        self.set_object_flags(obj, ObjectFlags::NOT_EXTENSIBLE)
    }

    /// Make every own property non-configurable and prevent extensions
    pub fn seal(&mut self, obj: ObjectId) -> ObjectResult<()> {
        self.seal_or_freeze(obj, false)
    }

    /// Make every own property non-configurable and read-only and prevent
    /// extensions
    pub fn freeze(&mut self, obj: ObjectId) -> ObjectResult<()> {
        self.seal_or_freeze(obj, true)
    }

    fn seal_or_freeze(&mut self, obj: ObjectId, freeze: bool) -> ObjectResult<()> {
        self.sparsify_dense_elements(obj)?;
        self.prevent_extensions(obj)?;
        let layout = self.layout_of(obj);
        for (key, entry) in self.spaces.layouts.properties(layout) {
            let mut attrs = entry.attrs - PropertyAttributes::CONFIGURABLE;
            if freeze && !entry.is_accessor() {
                attrs -= PropertyAttributes::WRITABLE;
            }
            if attrs != entry.attrs {
                self.mark_property_configured(obj, &key)?;
                self.change_property(
                    obj,
                    &key,
                    PropertySpec {
                        attrs,
                        getter: entry.getter,
                        setter: entry.setter,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Whether the object is sealed
    pub fn is_sealed(&self, obj: ObjectId) -> bool {
        self.test_integrity(obj, false)
    }

    /// Whether the object is frozen
    pub fn is_frozen(&self, obj: ObjectId) -> bool {
        self.test_integrity(obj, true)
    }

    fn test_integrity(&self, obj: ObjectId, frozen: bool) -> bool {
        if self.is_extensible(obj) {
            return false;
        }
        if self.spaces.objects[obj.0]
            .elements
            .values()
            .iter()
            .any(|v| !v.is_hole())
        {
            return false;
        }
        self.spaces
            .layouts
            .properties(self.layout_of(obj))
            .iter()
            .all(|(_, e)| {
                !e.attrs.contains(PropertyAttributes::CONFIGURABLE)
                    && (!frozen
                        || e.is_accessor()
                        || !e.attrs.contains(PropertyAttributes::WRITABLE))
            })
    }

    /// Move every dense element into named storage
    pub(crate) fn sparsify_dense_elements(&mut self, obj: ObjectId) -> ObjectResult<()> {
        let values: Vec<(u32, Value)> = self.spaces.objects[obj.0]
            .elements
            .values()
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_hole())
            .map(|(i, v)| (i as u32, v.clone()))
            .collect();
        if values.is_empty() {
            return Ok(());
        }
        for (index, value) in values {
            let entry = self.add_property(
                obj,
                PropertyKey::Index(index),
                PropertySpec::data(PropertyAttributes::data()),
            )?;
            if let Some(slot) = entry.slot {
                self.init_slot(obj, slot, value);
            }
        }
        self.set_initialized_length(obj, 0);
        self.mark_type_flags(obj, TypeFlags::NON_DENSE_ARRAY | TypeFlags::NON_PACKED_ARRAY);
        self.set_object_flags(obj, ObjectFlags::INDEXED)
    }

    /// Create an object sharing `template`'s layout and type record, with
    /// every slot `undefined`.
    ///
    /// Used for literals whose shape was computed ahead of time; the template
    /// must not be in dictionary mode.
    pub fn copy_initializer_object(&mut self, template: ObjectId) -> ObjectResult<ObjectId> {
        let layout = self.layout_of(template);
        if self.spaces.layouts.node(layout).in_dictionary_mode() {
            return Err(ObjectError::internal(
                "initializer template must have a shared layout",
            ));
        }
        let cell = &self.spaces.objects[template.0];
        let (ty, kind) = (cell.ty, cell.alloc_kind);
        let obj = self.allocate_object(layout, ty, kind)?;
        Ok(obj)
    }

    /// Barriered write of an object's layout pointer, resizing slot storage
    /// to the new span.
    ///
    /// Growth must already be reserved with [`Runtime::ensure_overflow`].
    pub(crate) fn set_layout(&mut self, obj: ObjectId, layout: LayoutId) {
        let old = self.layout_of(obj);
        let span = self.spaces.layouts.node(layout).slot_span();
        self.resize_slots(obj, span);
        if old != layout {
            self.pre_barrier_cell(old.0);
            self.spaces.objects[obj.0].layout = layout;
            self.post_barrier_cell(obj.0, FieldRef::Layout, layout.0);
        }
        debug_assert_eq!(
            self.spaces.objects[obj.0].storage_span(),
            span.max(self.num_fixed_slots(obj)),
            "slot span mismatch"
        );
    }
}
