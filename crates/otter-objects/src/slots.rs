//! Slot storage: inline fixed slots plus the overflow array
//!
//! Slot `i` lives in the inline region when `i < num_fixed_slots`, otherwise
//! at `i - num_fixed_slots` in the overflow array. The overflow array exists
//! exactly while the layout's span exceeds the inline slots.

use crate::class::ClassFlags;
use crate::error::{ObjectError, ObjectResult};
use crate::object::{ObjectId, PrivateData};
use crate::runtime::Runtime;
use crate::value::Value;
use otter_heap::FieldRef;
use std::any::Any;

/// Smallest overflow allocation, in slots
pub const MIN_OVERFLOW_CAPACITY: u32 = 8;

const VALUE_BYTES: usize = std::mem::size_of::<Value>();

impl Runtime {
    /// Slots in use according to the object's layout
    pub fn slot_span(&self, obj: ObjectId) -> u32 {
        self.spaces.layouts.node(self.layout_of(obj)).slot_span()
    }

    /// Inline slot count, fixed at allocation
    pub fn num_fixed_slots(&self, obj: ObjectId) -> u32 {
        self.spaces.objects[obj.0].num_fixed_slots()
    }

    /// Slots held in the overflow array
    pub fn num_dynamic_slots(&self, obj: ObjectId) -> u32 {
        self.spaces.objects[obj.0].overflow.len() as u32
    }

    /// Allocated overflow capacity (zero when no overflow array exists)
    pub fn dynamic_slot_capacity(&self, obj: ObjectId) -> u32 {
        self.spaces.objects[obj.0].overflow_capacity
    }

    /// Read a slot
    pub fn get_slot(&self, obj: ObjectId, slot: u32) -> Value {
        debug_assert!(slot < self.slot_span(obj), "slot {slot} out of span");
        self.spaces.objects[obj.0].slot(slot).clone()
    }

    /// Overwrite an initialized slot
    pub fn set_slot(&mut self, obj: ObjectId, slot: u32, value: Value) {
        debug_assert!(slot < self.slot_span(obj), "slot {slot} out of span");
        self.pre_barrier_value(self.spaces.objects[obj.0].slot(slot));
        self.post_barrier_value(obj, FieldRef::Slot(slot), &value);
        *self.spaces.objects[obj.0].slot_mut(slot) = value;
    }

    /// Write a slot whose previous contents are logically uninitialized
    pub fn init_slot(&mut self, obj: ObjectId, slot: u32, value: Value) {
        debug_assert!(slot < self.slot_span(obj), "slot {slot} out of span");
        *self.spaces.objects[obj.0].slot_mut(slot) = value;
        let cell = &self.spaces.objects[obj.0];
        self.post_barrier_value(obj, FieldRef::Slot(slot), cell.slot(slot));
    }

    /// Make sure the overflow array can hold a span of `span` slots.
    ///
    /// Only reserves; the span itself changes with the layout. On failure
    /// nothing about the object changes.
    pub fn ensure_overflow(&mut self, obj: ObjectId, span: u32) -> ObjectResult<()> {
        let cell = &self.spaces.objects[obj.0];
        let needed = span.saturating_sub(cell.num_fixed_slots());
        if needed <= cell.overflow_capacity {
            return Ok(());
        }
        let old_capacity = cell.overflow_capacity;
        let capacity = needed.next_power_of_two().max(MIN_OVERFLOW_CAPACITY);
        let bytes = (capacity - old_capacity) as usize * VALUE_BYTES;
        self.memory.alloc(bytes)?;

        let cell = &mut self.spaces.objects[obj.0];
        let additional = capacity as usize - cell.overflow.len();
        if let Err(err) = cell.overflow.try_reserve_exact(additional) {
            self.memory.free(bytes);
            return Err(err.into());
        }
        cell.overflow_capacity = capacity;
        Ok(())
    }

    /// Drop an overflow reservation that no slot ended up using
    pub(crate) fn release_unused_overflow(&mut self, obj: ObjectId) {
        let cell = &mut self.spaces.objects[obj.0];
        if cell.overflow.is_empty() && cell.overflow_capacity > 0 {
            let bytes = cell.overflow_capacity as usize * VALUE_BYTES;
            cell.overflow = Vec::new();
            cell.overflow_capacity = 0;
            self.memory.free(bytes);
        }
    }

    /// Destroy the values in `[start, end)`, leaving `undefined` behind.
    ///
    /// Old referents get the pre-write barrier first.
    pub fn prepare_slot_range_for_overwrite(&mut self, obj: ObjectId, start: u32, end: u32) {
        let span = self.spaces.objects[obj.0].storage_span();
        for slot in start..end.min(span) {
            let value = self.spaces.objects[obj.0].slot(slot);
            if value.is_undefined() {
                continue;
            }
            self.pre_barrier_value(value);
            *self.spaces.objects[obj.0].slot_mut(slot) = Value::Undefined;
        }
    }

    /// Resize slot storage to `span`. Growth must already be reserved.
    pub(crate) fn resize_slots(&mut self, obj: ObjectId, span: u32) {
        let fixed = self.num_fixed_slots(obj);
        let current = self.spaces.objects[obj.0].storage_span();
        if span < current {
            self.prepare_slot_range_for_overwrite(obj, span, current);
        }

        let target = span.saturating_sub(fixed) as usize;
        let cell = &mut self.spaces.objects[obj.0];
        if target < cell.overflow.len() {
            cell.overflow.truncate(target);
        } else if target > cell.overflow.len() {
            debug_assert!(
                target <= cell.overflow_capacity as usize,
                "overflow growth was not reserved"
            );
            cell.overflow.resize(target, Value::Undefined);
        }
        if target == 0 {
            self.release_unused_overflow(obj);
        }
    }

    // ---------------------------------------------------------------
    // Reserved slots and private data
    // ---------------------------------------------------------------

    /// Read a class-reserved slot
    pub fn reserved_slot(&self, obj: ObjectId, index: u32) -> Value {
        debug_assert!(index < self.object_class(obj).reserved_slots);
        self.get_slot(obj, index)
    }

    /// Overwrite a class-reserved slot
    pub fn set_reserved_slot(&mut self, obj: ObjectId, index: u32, value: Value) {
        debug_assert!(index < self.object_class(obj).reserved_slots);
        self.set_slot(obj, index, value);
    }

    /// Initialize a class-reserved slot of a freshly allocated object
    pub fn init_reserved_slot(&mut self, obj: ObjectId, index: u32, value: Value) {
        debug_assert!(index < self.object_class(obj).reserved_slots);
        self.init_slot(obj, index, value);
    }

    /// Attach the private payload
    pub fn set_private(&mut self, obj: ObjectId, data: PrivateData) -> ObjectResult<()> {
        let class = self.object_class(obj);
        if !class.flags.contains(ClassFlags::HAS_PRIVATE) {
            return Err(ObjectError::internal(format!(
                "class {} has no private data",
                class.name
            )));
        }
        self.spaces.objects[obj.0].private = Some(data);
        Ok(())
    }

    /// Borrow the private payload as `T`
    pub fn private<T: Any>(&self, obj: ObjectId) -> Option<&T> {
        self.spaces.objects[obj.0]
            .private
            .as_ref()
            .and_then(|p| p.downcast_ref())
    }

    /// Mutably borrow the private payload as `T`
    pub fn private_mut<T: Any>(&mut self, obj: ObjectId) -> Option<&mut T> {
        self.spaces.objects[obj.0]
            .private
            .as_mut()
            .and_then(|p| p.downcast_mut())
    }
}
