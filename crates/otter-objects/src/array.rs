//! Array class
//!
//! Arrays keep their logical `length` in the element header. The overrides
//! here expose it as the `length` property and implement truncation; every
//! other key goes to the native operations.

use crate::class::{ClassFlags, ClassId, ObjectClass, ObjectKind, ObjectOps};
use crate::error::{ObjectError, ObjectResult};
use crate::native::{
    native_define_property, native_delete_property, native_get_property, native_set_property,
};
use crate::object::ObjectId;
use crate::property::{PropertyDescriptor, PropertyKey};
use crate::runtime::Runtime;
use crate::value::Value;

/// Array instances
pub static ARRAY_CLASS: ObjectClass = ObjectClass {
    name: "Array",
    kind: ObjectKind::Array,
    fixed_slots: 0,
    reserved_slots: 0,
    flags: ClassFlags::empty(),
    ops: ObjectOps {
        get_property: Some(array_get_property),
        set_property: Some(array_set_property),
        define_property: Some(array_define_property),
        delete_property: Some(array_delete_property),
        ..ObjectOps::NONE
    },
};

fn is_length(key: &PropertyKey) -> bool {
    key.is_str("length")
}

fn to_array_length(value: &Value) -> ObjectResult<u32> {
    let n = value
        .as_number()
        .ok_or_else(|| ObjectError::range_error("invalid array length"))?;
    if n.fract() != 0.0 || n < 0.0 || n > u32::MAX as f64 {
        return Err(ObjectError::range_error("invalid array length"));
    }
    Ok(n as u32)
}

fn array_get_property(rt: &mut Runtime, obj: ObjectId, key: &PropertyKey) -> ObjectResult<Value> {
    if is_length(key) {
        return Ok(Value::number(rt.array_length(obj) as f64));
    }
    native_get_property(rt, obj, key)
}

fn array_set_property(
    rt: &mut Runtime,
    obj: ObjectId,
    key: &PropertyKey,
    value: Value,
    strict: bool,
) -> ObjectResult<bool> {
    if is_length(key) {
        let length = to_array_length(&value)?;
        rt.set_array_length(obj, length)?;
        return Ok(true);
    }
    native_set_property(rt, obj, key, value, strict)
}

fn array_define_property(
    rt: &mut Runtime,
    obj: ObjectId,
    key: &PropertyKey,
    desc: PropertyDescriptor,
) -> ObjectResult<bool> {
    if is_length(key) {
        let PropertyDescriptor::Data { value, .. } = desc else {
            return Ok(false);
        };
        let length = to_array_length(&value)?;
        rt.set_array_length(obj, length)?;
        return Ok(true);
    }
    native_define_property(rt, obj, key, desc)
}

fn array_delete_property(
    rt: &mut Runtime,
    obj: ObjectId,
    key: &PropertyKey,
    strict: bool,
) -> ObjectResult<bool> {
    if is_length(key) {
        if strict {
            return Err(ObjectError::type_error(
                "cannot delete non-configurable property 'length'",
            ));
        }
        return Ok(false);
    }
    native_delete_property(rt, obj, key, strict)
}

impl Runtime {
    /// Allocate an empty array with room for `capacity` dense elements
    pub fn new_array(&mut self, capacity: u32) -> ObjectResult<ObjectId> {
        let array = self.new_object(ClassId::ARRAY, None)?;
        if capacity > 0 {
            self.ensure_elements(array, capacity)?;
        }
        Ok(array)
    }

    /// Allocate an array holding `values`
    pub fn new_array_from(&mut self, values: &[Value]) -> ObjectResult<ObjectId> {
        let array = self.new_array(values.len() as u32)?;
        for value in values {
            self.add_element_type(array, value)?;
        }
        for value in values {
            self.append_element(array, value.clone());
        }
        self.set_elements_length(array, values.len() as u32)?;
        Ok(array)
    }

    /// Logical array length
    pub fn array_length(&self, array: ObjectId) -> u32 {
        self.elements_length(array)
    }

    /// Set the array length.
    ///
    /// Shrinking destroys dense elements and removes sparse index
    /// properties at or above the new length.
    pub fn set_array_length(&mut self, array: ObjectId, length: u32) -> ObjectResult<()> {
        if length < self.initialized_length(array) {
            self.set_initialized_length(array, length);
        }
        if length < self.array_length(array) {
            let doomed: Vec<PropertyKey> = self
                .own_property_keys(array)
                .into_iter()
                .filter(|k| k.as_index().is_some_and(|i| i >= length))
                .collect();
            for key in doomed {
                self.mark_property_configured(array, &key)?;
                self.remove_property(array, &key)?;
            }
        }
        self.set_elements_length(array, length)
    }

    /// Append to the end of an array, returning the new length
    pub fn array_push(&mut self, array: ObjectId, value: Value) -> ObjectResult<u32> {
        let length = self.array_length(array);
        let key = PropertyKey::Index(length);
        self.set_property(array, &key, value, true)?;
        Ok(self.array_length(array))
    }
}
