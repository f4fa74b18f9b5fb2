//! Generic operation dispatch
//!
//! Each entry point consults the object's class [`ObjectOps`] first and
//! falls back to the native implementation. Obligations that hold for every
//! storage strategy run here, ahead of the override: a delete always widens
//! the key's recorded types with `undefined` and marks it configured.
//!
//! [`ObjectOps`]: crate::class::ObjectOps

use crate::class::{ObjectKind, PreferredType};
use crate::error::{ObjectError, ObjectResult};
use crate::layout::ObjectFlags;
use crate::native::{
    OwnProperty, native_convert_to_primitive, native_define_property, native_delete_property,
    native_enumerate, native_get_property, native_set_property, native_type_of,
};
use crate::object::ObjectId;
use crate::property::{PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::runtime::Runtime;
use crate::types::TypeFlags;
use crate::value::Value;

impl Runtime {
    /// `obj[key]`
    pub fn get_property(&mut self, obj: ObjectId, key: &PropertyKey) -> ObjectResult<Value> {
        match self.object_class(obj).ops.get_property {
            Some(op) => op(self, obj, key),
            None => native_get_property(self, obj, key),
        }
    }

    /// `obj[key] = value`. Returns false if a sloppy-mode write was
    /// rejected.
    pub fn set_property(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
        value: Value,
        strict: bool,
    ) -> ObjectResult<bool> {
        match self.object_class(obj).ops.set_property {
            Some(op) => op(self, obj, key, value, strict),
            None => native_set_property(self, obj, key, value, strict),
        }
    }

    /// Define or redefine an own property
    pub fn define_property(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
        desc: PropertyDescriptor,
    ) -> ObjectResult<bool> {
        match self.object_class(obj).ops.define_property {
            Some(op) => op(self, obj, key, desc),
            None => native_define_property(self, obj, key, desc),
        }
    }

    /// `delete obj[key]`
    pub fn delete_property(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
        strict: bool,
    ) -> ObjectResult<bool> {
        self.add_property_type(obj, key, &Value::Undefined)?;
        self.mark_property_configured(obj, key)?;
        match self.object_class(obj).ops.delete_property {
            Some(op) => op(self, obj, key, strict),
            None => native_delete_property(self, obj, key, strict),
        }
    }

    /// Own enumerable keys, in enumeration order
    pub fn enumerate(&mut self, obj: ObjectId) -> ObjectResult<Vec<PropertyKey>> {
        if self.has_singleton_type(obj) {
            self.set_object_flags(obj, ObjectFlags::ITERATED_SINGLETON)?;
        } else {
            self.mark_type_flags(obj, TypeFlags::ITERATED);
        }
        match self.object_class(obj).ops.enumerate {
            Some(op) => op(self, obj),
            None => native_enumerate(self, obj),
        }
    }

    /// Convert to a primitive value
    pub fn convert_to_primitive(
        &mut self,
        obj: ObjectId,
        hint: PreferredType,
    ) -> ObjectResult<Value> {
        match self.object_class(obj).ops.convert_to_primitive {
            Some(op) => op(self, obj, hint),
            None => native_convert_to_primitive(self, obj, hint),
        }
    }

    /// `typeof obj`
    pub fn type_of(&self, obj: ObjectId) -> &'static str {
        match self.object_class(obj).ops.type_of {
            Some(op) => op(self, obj),
            None => native_type_of(self, obj),
        }
    }

    /// `typeof value`
    pub fn type_of_value(&self, value: &Value) -> &'static str {
        match value {
            Value::Object(obj) => self.type_of(*obj),
            other => other.primitive_type_of(),
        }
    }

    /// Whether the object's class can be invoked
    pub fn is_callable(&self, obj: ObjectId) -> bool {
        self.object_class(obj).ops.call.is_some()
    }

    /// Invoke `callee` with `this` and `args`
    pub fn call(&mut self, callee: ObjectId, this: Value, args: &[Value]) -> ObjectResult<Value> {
        match self.object_class(callee).ops.call {
            Some(op) => op(self, callee, this, args),
            None => Err(ObjectError::type_error(format!(
                "{} is not a function",
                self.object_class(callee).name
            ))),
        }
    }

    /// `key in obj`
    pub fn has_property(&self, obj: ObjectId, key: &PropertyKey) -> bool {
        let mut cursor = Some(obj);
        while let Some(current) = cursor {
            if self.has_own_property(current, key) {
                return true;
            }
            cursor = self.get_proto(current);
        }
        false
    }

    /// Whether `key` is an own property
    pub fn has_own_property(&self, obj: ObjectId, key: &PropertyKey) -> bool {
        self.is_array_length(obj, key) || self.own_property(obj, key).is_some()
    }

    /// Own property descriptor
    pub fn get_own_property_descriptor(
        &self,
        obj: ObjectId,
        key: &PropertyKey,
    ) -> Option<PropertyDescriptor> {
        if self.is_array_length(obj, key) {
            return Some(PropertyDescriptor::data_with_attrs(
                Value::number(self.elements_length(obj) as f64),
                PropertyAttributes::WRITABLE,
            ));
        }
        match self.own_property(obj, key)? {
            OwnProperty::Data(value, attributes) => {
                Some(PropertyDescriptor::Data { value, attributes })
            }
            OwnProperty::Accessor(entry) => Some(PropertyDescriptor::Accessor {
                get: entry.getter,
                set: entry.setter,
                attributes: entry.attrs,
            }),
        }
    }

    fn is_array_length(&self, obj: ObjectId, key: &PropertyKey) -> bool {
        self.object_class(obj).kind == ObjectKind::Array && key.is_str("length")
    }
}
