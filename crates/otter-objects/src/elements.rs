//! Element buffers: dense storage for integer-indexed properties
//!
//! The header tracks `capacity`, `initialized_length` and the array-style
//! logical `length`. Entries below the initialized length are real values
//! or explicit holes; everything above reads as `undefined` and is never
//! materialized.
//!
//! Growing the initialized length into fresh space leaves holes the caller
//! is expected to fill. Those are counted rather than flagged; a lineage is
//! marked non-packed only once a hole can be observed: a hole store, a
//! destroyed range, a regrow over destroyed entries, or a length update
//! while fresh holes are still unfilled.

use crate::error::ObjectResult;
use crate::object::ObjectId;
use crate::property::PropertyKey;
use crate::runtime::Runtime;
use crate::types::TypeFlags;
use crate::value::Value;
use otter_heap::{CellId, FieldRef, NotMarking};

const VALUE_BYTES: usize = std::mem::size_of::<Value>();

/// Element storage owned by one object
#[derive(Debug, Default)]
pub struct ElementBuffer {
    /// Initialized entries; `values.len()` is the initialized length
    values: Vec<Value>,
    /// Booked capacity
    capacity: u32,
    /// Logical length
    length: u32,
    /// Highest initialized length reached so far
    high_water: u32,
    /// Holes from fresh growth not yet overwritten
    unfilled: u32,
}

impl ElementBuffer {
    /// Empty buffer with no storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocated capacity
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of initialized entries
    #[inline]
    pub fn initialized_length(&self) -> u32 {
        self.values.len() as u32
    }

    /// Logical length
    #[inline]
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Initialized entries, holes included
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Holes left by growth that no store has filled yet
    #[inline]
    pub fn unfilled(&self) -> u32 {
        self.unfilled
    }

    pub(crate) fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub(crate) fn trace(&self, tracer: &mut dyn FnMut(CellId)) {
        for value in &self.values {
            if let Value::Object(id) = value {
                tracer(id.0);
            }
        }
    }
}

impl Runtime {
    /// Element capacity
    pub fn element_capacity(&self, obj: ObjectId) -> u32 {
        self.spaces.objects[obj.0].elements.capacity()
    }

    /// Initialized element count
    pub fn initialized_length(&self, obj: ObjectId) -> u32 {
        self.spaces.objects[obj.0].elements.initialized_length()
    }

    /// Logical element length
    pub fn elements_length(&self, obj: ObjectId) -> u32 {
        self.spaces.objects[obj.0].elements.length()
    }

    /// Grow the element buffer to hold at least `n` entries.
    ///
    /// Initialized entries keep their values. On failure the buffer is
    /// unchanged.
    pub fn ensure_elements(&mut self, obj: ObjectId, n: u32) -> ObjectResult<()> {
        let elements = &self.spaces.objects[obj.0].elements;
        let old_capacity = elements.capacity;
        if n <= old_capacity {
            return Ok(());
        }
        let capacity = n
            .max(self.config.min_element_capacity)
            .max(old_capacity.saturating_mul(2));
        let bytes = (capacity - old_capacity) as usize * VALUE_BYTES;
        self.memory.alloc(bytes)?;

        let elements = &mut self.spaces.objects[obj.0].elements;
        let additional = capacity as usize - elements.values.len();
        if let Err(err) = elements.values.try_reserve_exact(additional) {
            self.memory.free(bytes);
            return Err(err.into());
        }
        elements.capacity = capacity;
        Ok(())
    }

    /// Set the initialized length.
    ///
    /// Shrinking destroys the dropped entries. Growing fills with holes;
    /// growth over previously destroyed entries marks the lineage
    /// non-packed at once, fresh growth only counts the holes.
    pub fn set_initialized_length(&mut self, obj: ObjectId, n: u32) {
        let elements = &self.spaces.objects[obj.0].elements;
        debug_assert!(n <= elements.capacity, "initialized length past capacity");
        let old = elements.initialized_length();
        if n < old {
            let dropped = &elements.values[n as usize..];
            let holes = dropped.iter().filter(|v| v.is_hole()).count() as u32;
            self.pre_barrier_values(dropped);
            let elements = &mut self.spaces.objects[obj.0].elements;
            elements.values.truncate(n as usize);
            elements.unfilled = elements.unfilled.saturating_sub(holes);
        } else if n > old {
            let elements = &mut self.spaces.objects[obj.0].elements;
            let regrown = n.min(elements.high_water).saturating_sub(old);
            let fresh = n - old.max(elements.high_water).min(n);
            elements.values.resize(n as usize, Value::Hole);
            elements.unfilled += fresh;
            elements.high_water = elements.high_water.max(n);
            if regrown > 0 {
                self.mark_type_flags(obj, TypeFlags::NON_PACKED_ARRAY);
            }
        }
    }

    /// Mark the lineage non-packed if growth left holes nobody filled
    pub(crate) fn flush_unfilled_elements(&mut self, obj: ObjectId) {
        let elements = &mut self.spaces.objects[obj.0].elements;
        if elements.unfilled > 0 {
            elements.unfilled = 0;
            self.mark_type_flags(obj, TypeFlags::NON_PACKED_ARRAY);
        }
    }

    /// Read an element; holes and indices past the initialized length read
    /// as `undefined`
    pub fn get_element(&self, obj: ObjectId, index: u32) -> Value {
        self.spaces.objects[obj.0]
            .elements
            .values
            .get(index as usize)
            .cloned()
            .map_or(Value::Undefined, Value::unhole)
    }

    /// Whether `index` holds a non-hole dense element
    pub fn has_dense_element(&self, obj: ObjectId, index: u32) -> bool {
        self.spaces.objects[obj.0]
            .elements
            .values
            .get(index as usize)
            .is_some_and(|v| !v.is_hole())
    }

    /// Overwrite an initialized element
    pub fn set_element(&mut self, obj: ObjectId, index: u32, value: Value) {
        debug_assert!(
            index < self.initialized_length(obj),
            "element {index} past initialized length"
        );
        self.pre_barrier_value(&self.spaces.objects[obj.0].elements.values[index as usize]);
        self.store_element(obj, index, value);
    }

    /// Write an element whose previous contents are logically uninitialized
    pub fn init_element(&mut self, obj: ObjectId, index: u32, value: Value) {
        debug_assert!(
            index < self.initialized_length(obj),
            "element {index} past initialized length"
        );
        self.store_element(obj, index, value);
    }

    /// Initialize the element just past the initialized length. Capacity
    /// must already be reserved.
    pub(crate) fn append_element(&mut self, obj: ObjectId, value: Value) {
        let elements = &self.spaces.objects[obj.0].elements;
        let index = elements.initialized_length();
        debug_assert!(index < elements.capacity, "append past element capacity");
        let elements = &mut self.spaces.objects[obj.0].elements;
        elements.values.push(Value::Undefined);
        elements.high_water = elements.high_water.max(index + 1);
        self.store_element(obj, index, value);
    }

    fn store_element(&mut self, obj: ObjectId, index: u32, value: Value) {
        if value.is_hole() {
            self.mark_type_flags(obj, TypeFlags::NON_PACKED_ARRAY);
        }
        self.post_barrier_value(obj, FieldRef::Element(index), &value);
        let elements = &mut self.spaces.objects[obj.0].elements;
        let slot = &mut elements.values[index as usize];
        if slot.is_hole() && elements.unfilled > 0 {
            elements.unfilled -= 1;
        }
        *slot = value;
    }

    /// Set the logical length.
    ///
    /// Never touches storage. Unfilled holes from growth become observable
    /// here. Lengths past `i32::MAX` mark the lineage possibly sparse and
    /// record a double-typed `length`.
    pub fn set_elements_length(&mut self, obj: ObjectId, length: u32) -> ObjectResult<()> {
        self.flush_unfilled_elements(obj);
        if length > i32::MAX as u32 {
            self.mark_type_flags(obj, TypeFlags::NON_PACKED_ARRAY | TypeFlags::NON_DENSE_ARRAY);
            self.add_property_type(
                obj,
                &PropertyKey::string("length"),
                &Value::Double(length as f64),
            )?;
        }
        self.spaces.objects[obj.0].elements.length = length;
        Ok(())
    }

    /// Overwrite `[start, start + values.len())` from a slice
    pub fn copy_elements(&mut self, obj: ObjectId, start: u32, values: &[Value]) {
        for (i, value) in values.iter().enumerate() {
            self.set_element(obj, start + i as u32, value.clone());
        }
    }

    /// Initialize `[start, start + values.len())` from a slice
    pub fn init_elements(&mut self, obj: ObjectId, start: u32, values: &[Value]) {
        for (i, value) in values.iter().enumerate() {
            self.init_element(obj, start + i as u32, value.clone());
        }
    }

    /// Destroy `[start, end)`, leaving holes behind
    pub fn prepare_element_range_for_overwrite(&mut self, obj: ObjectId, start: u32, end: u32) {
        let end = end.min(self.initialized_length(obj));
        if start >= end {
            return;
        }
        let range = start as usize..end as usize;
        self.pre_barrier_values(&self.spaces.objects[obj.0].elements.values[range.clone()]);
        self.spaces.objects[obj.0].elements.values[range].fill(Value::Hole);
        self.mark_type_flags(obj, TypeFlags::NON_PACKED_ARRAY);
    }

    /// Move `count` elements from `src` to `dst` within the initialized
    /// region.
    ///
    /// While a mark is running every entry is written through the barriers.
    /// Otherwise the run is copied in bulk and the destination range is
    /// registered with the remembered set.
    pub fn move_elements(&mut self, obj: ObjectId, dst: u32, src: u32, count: u32) {
        debug_assert!(
            dst.max(src) as u64 + count as u64 <= self.initialized_length(obj) as u64,
            "element move past initialized length"
        );
        if count == 0 || dst == src {
            return;
        }
        match self.heap.not_marking() {
            Some(token) => self.move_elements_unbarriered(token, obj, dst, src, count),
            None => {
                let moved: Vec<Value> = self.spaces.objects[obj.0].elements.values
                    [src as usize..(src + count) as usize]
                    .to_vec();
                self.copy_elements(obj, dst, &moved);
            }
        }
    }

    /// Bulk element move skipping the per-entry barriers.
    ///
    /// `token` proves no incremental mark is running. The destination range
    /// is registered with the remembered set afterwards.
    pub fn move_elements_unbarriered(
        &mut self,
        token: NotMarking,
        obj: ObjectId,
        dst: u32,
        src: u32,
        count: u32,
    ) {
        debug_assert!(
            self.heap.verify_not_marking(token),
            "unbarriered move during an incremental mark"
        );
        debug_assert!(
            dst.max(src) as u64 + count as u64 <= self.initialized_length(obj) as u64,
            "element move past initialized length"
        );
        let elements = &mut self.spaces.objects[obj.0].elements;
        let moved: Vec<Value> = elements.values[src as usize..(src + count) as usize].to_vec();
        let target = &mut elements.values[dst as usize..(dst + count) as usize];
        let filled = target.iter().filter(|v| v.is_hole()).count() as u32;
        target.clone_from_slice(&moved);
        elements.unfilled = elements.unfilled.saturating_sub(filled);
        if moved.iter().any(Value::is_hole) {
            self.mark_type_flags(obj, TypeFlags::NON_PACKED_ARRAY);
        }
        self.post_barrier_element_range(obj, dst, count);
    }
}
