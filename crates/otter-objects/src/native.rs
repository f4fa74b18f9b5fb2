//! Native property operations for ordinary objects
//!
//! These are the fallbacks the generic dispatch runs when a class has no
//! override, and the building blocks overrides call for everything they do
//! not handle specially. Integer keys prefer the dense element buffer; keys
//! that would leave too large a gap go to named storage instead and mark the
//! lineage non-dense.

use crate::class::PreferredType;
use crate::error::{ObjectError, ObjectResult};
use crate::layout::{ObjectFlags, PropertyEntry, PropertySpec};
use crate::object::ObjectId;
use crate::property::{PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::runtime::Runtime;
use crate::types::TypeFlags;
use crate::value::Value;

/// Largest run of holes a dense write may open past the initialized length
pub const MAX_DENSE_GAP: u32 = 16;

/// An own property as found on one object
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OwnProperty {
    /// Dense element or slot-backed data property
    Data(Value, PropertyAttributes),
    /// Accessor pair
    Accessor(PropertyEntry),
}

impl Runtime {
    /// Look up an own property in elements and named storage
    pub(crate) fn own_property(&self, obj: ObjectId, key: &PropertyKey) -> Option<OwnProperty> {
        if let Some(index) = key.as_index()
            && self.has_dense_element(obj, index)
        {
            return Some(OwnProperty::Data(
                self.get_element(obj, index),
                PropertyAttributes::data(),
            ));
        }
        let entry = self.lookup_own(obj, key)?;
        match entry.slot {
            Some(slot) => Some(OwnProperty::Data(self.get_slot(obj, slot), entry.attrs)),
            None => Some(OwnProperty::Accessor(entry)),
        }
    }

    /// Add a data property that does not exist yet, choosing dense or named
    /// storage
    pub(crate) fn add_data_property(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
        value: Value,
        attrs: PropertyAttributes,
    ) -> ObjectResult<()> {
        if let Some(index) = key.as_index()
            && attrs == PropertyAttributes::data()
        {
            let init = self.initialized_length(obj);
            if index < init {
                self.add_element_type(obj, &value)?;
                self.set_element(obj, index, value);
                return self.extend_elements_length(obj, index);
            }
            if index - init <= MAX_DENSE_GAP {
                self.ensure_elements(obj, index + 1)?;
                self.add_element_type(obj, &value)?;
                if index > init {
                    self.set_initialized_length(obj, index);
                    self.flush_unfilled_elements(obj);
                }
                self.append_element(obj, value);
                return self.extend_elements_length(obj, index);
            }
        }
        let indexed = key.as_index().is_some();
        let previous = self.layout_of(obj);
        let base = *self.spaces.layouts.node(previous).base();
        if indexed {
            self.set_object_flags(obj, ObjectFlags::INDEXED)?;
        }
        let added = self
            .add_property_type(obj, key, &value)
            .and_then(|()| self.add_property(obj, key.clone(), PropertySpec::data(attrs)));
        let entry = match added {
            Ok(entry) => entry,
            Err(err) => {
                self.restore_base(obj, previous, base);
                return Err(err);
            }
        };
        if indexed {
            self.mark_type_flags(obj, TypeFlags::NON_DENSE_ARRAY);
        }
        if let Some(slot) = entry.slot {
            self.init_slot(obj, slot, value);
        }
        match key.as_index() {
            Some(index) => self.extend_elements_length(obj, index),
            None => Ok(()),
        }
    }

    fn extend_elements_length(&mut self, obj: ObjectId, index: u32) -> ObjectResult<()> {
        if index >= self.elements_length(obj) {
            self.set_elements_length(obj, index.saturating_add(1))?;
        }
        Ok(())
    }
}

fn reject(strict: bool, message: impl Into<String>) -> ObjectResult<bool> {
    if strict {
        Err(ObjectError::type_error(message))
    } else {
        Ok(false)
    }
}

/// Ordinary `[[Get]]`: own property, then the prototype chain.
///
/// Getters run with the original object as `this`. A prototype whose class
/// overrides property reads takes over the rest of the lookup.
pub fn native_get_property(
    rt: &mut Runtime,
    obj: ObjectId,
    key: &PropertyKey,
) -> ObjectResult<Value> {
    let mut holder = obj;
    loop {
        match rt.own_property(holder, key) {
            Some(OwnProperty::Data(value, _)) => return Ok(value),
            Some(OwnProperty::Accessor(entry)) => {
                return match entry.getter {
                    Some(getter) => rt.call(getter, Value::Object(obj), &[]),
                    None => Ok(Value::Undefined),
                };
            }
            None => {}
        }
        let Some(proto) = rt.get_proto(holder) else {
            return Ok(Value::Undefined);
        };
        if rt.object_class(proto).ops.get_property.is_some() {
            return rt.get_property(proto, key);
        }
        holder = proto;
    }
}

/// Ordinary `[[Set]]`.
///
/// Returns false for a rejected write in sloppy mode; in strict mode the
/// rejection is a `TypeError`.
pub fn native_set_property(
    rt: &mut Runtime,
    obj: ObjectId,
    key: &PropertyKey,
    value: Value,
    strict: bool,
) -> ObjectResult<bool> {
    match rt.own_property(obj, key) {
        Some(OwnProperty::Data(_, attrs)) => {
            if !attrs.contains(PropertyAttributes::WRITABLE) {
                return reject(strict, format!("cannot assign to read-only property '{key}'"));
            }
            if let Some(index) = key.as_index()
                && rt.has_dense_element(obj, index)
            {
                rt.add_element_type(obj, &value)?;
                rt.set_element(obj, index, value);
                return Ok(true);
            }
            let Some(slot) = rt.lookup_own(obj, key).and_then(|e| e.slot) else {
                return Err(ObjectError::internal("data property without a slot"));
            };
            rt.add_property_type(obj, key, &value)?;
            rt.set_slot(obj, slot, value);
            return Ok(true);
        }
        Some(OwnProperty::Accessor(entry)) => return call_setter(rt, obj, key, entry, value, strict),
        None => {}
    }

    let mut cursor = rt.get_proto(obj);
    while let Some(proto) = cursor {
        match rt.own_property(proto, key) {
            Some(OwnProperty::Accessor(entry)) => {
                return call_setter(rt, obj, key, entry, value, strict);
            }
            Some(OwnProperty::Data(_, attrs)) => {
                if !attrs.contains(PropertyAttributes::WRITABLE) {
                    return reject(strict, format!("cannot assign to read-only property '{key}'"));
                }
                break;
            }
            None => cursor = rt.get_proto(proto),
        }
    }

    if !rt.is_extensible(obj) {
        return reject(strict, format!("cannot add property '{key}', object is not extensible"));
    }
    rt.add_data_property(obj, key, value, PropertyAttributes::data())?;
    Ok(true)
}

fn call_setter(
    rt: &mut Runtime,
    receiver: ObjectId,
    key: &PropertyKey,
    entry: PropertyEntry,
    value: Value,
    strict: bool,
) -> ObjectResult<bool> {
    match entry.setter {
        Some(setter) => {
            rt.call(setter, Value::Object(receiver), &[value])?;
            Ok(true)
        }
        None => reject(strict, format!("property '{key}' has only a getter")),
    }
}

/// Ordinary `[[DefineOwnProperty]]`.
///
/// Non-configurable properties may only lose `WRITABLE` or, while still
/// writable, change value; anything else returns false.
pub fn native_define_property(
    rt: &mut Runtime,
    obj: ObjectId,
    key: &PropertyKey,
    desc: PropertyDescriptor,
) -> ObjectResult<bool> {
    let attrs = desc.attributes();

    // Anything but a plain data element moves the dense elements out first.
    if let Some(index) = key.as_index()
        && rt.has_dense_element(obj, index)
    {
        if attrs == PropertyAttributes::data()
            && let PropertyDescriptor::Data { value, .. } = desc
        {
            rt.add_element_type(obj, &value)?;
            rt.set_element(obj, index, value);
            return Ok(true);
        }
        rt.sparsify_dense_elements(obj)?;
    }

    let Some(current) = rt.lookup_own(obj, key) else {
        if !rt.is_extensible(obj) {
            return Ok(false);
        }
        match desc {
            PropertyDescriptor::Data { value, .. } => rt.add_data_property(obj, key, value, attrs)?,
            PropertyDescriptor::Accessor { get, set, .. } => {
                rt.add_property(obj, key.clone(), PropertySpec::accessor(attrs, get, set))?;
            }
        }
        return Ok(true);
    };

    let (getter, setter) = match &desc {
        PropertyDescriptor::Accessor { get, set, .. } => (*get, *set),
        PropertyDescriptor::Data { .. } => (None, None),
    };
    if !current.attrs.contains(PropertyAttributes::CONFIGURABLE) {
        let only_drops_writable = (current.attrs - PropertyAttributes::WRITABLE)
            == (attrs - PropertyAttributes::WRITABLE)
            && (current.attrs.contains(PropertyAttributes::WRITABLE)
                || !attrs.contains(PropertyAttributes::WRITABLE));
        if !only_drops_writable || current.getter != getter || current.setter != setter {
            return Ok(false);
        }
        if let (Some(slot), PropertyDescriptor::Data { value, .. }) = (current.slot, &desc)
            && !current.attrs.contains(PropertyAttributes::WRITABLE)
            && !rt.get_slot(obj, slot).same_value(value)
        {
            return Ok(false);
        }
    }

    let spec = match desc {
        PropertyDescriptor::Data { .. } => PropertySpec::data(attrs),
        PropertyDescriptor::Accessor { .. } => PropertySpec::accessor(attrs, getter, setter),
    };
    let entry = if current.attrs != spec.attrs
        || current.getter != spec.getter
        || current.setter != spec.setter
    {
        rt.mark_property_configured(obj, key)?;
        rt.change_property(obj, key, spec)?
    } else {
        current
    };
    if let (Some(slot), PropertyDescriptor::Data { value, .. }) = (entry.slot, desc) {
        rt.add_property_type(obj, key, &value)?;
        if !rt.get_slot(obj, slot).same_value(&value) {
            rt.set_slot(obj, slot, value);
        }
    }
    Ok(true)
}

/// Ordinary `[[Delete]]`
pub fn native_delete_property(
    rt: &mut Runtime,
    obj: ObjectId,
    key: &PropertyKey,
    strict: bool,
) -> ObjectResult<bool> {
    if let Some(index) = key.as_index()
        && rt.has_dense_element(obj, index)
    {
        rt.set_element(obj, index, Value::Hole);
        return Ok(true);
    }
    let Some(entry) = rt.lookup_own(obj, key) else {
        return Ok(true);
    };
    if !entry.attrs.contains(PropertyAttributes::CONFIGURABLE) {
        return reject(strict, format!("cannot delete non-configurable property '{key}'"));
    }
    rt.remove_property(obj, key)?;
    Ok(true)
}

/// Own enumerable string and index keys: indices ascending, then strings in
/// insertion order
pub fn native_enumerate(rt: &Runtime, obj: ObjectId) -> ObjectResult<Vec<PropertyKey>> {
    let mut indices: Vec<u32> = (0..rt.initialized_length(obj))
        .filter(|&i| rt.has_dense_element(obj, i))
        .collect();
    let mut strings = Vec::new();
    for (key, entry) in rt.layouts().properties(rt.layout_of(obj)) {
        if !entry.attrs.contains(PropertyAttributes::ENUMERABLE) {
            continue;
        }
        match key {
            PropertyKey::Index(i) => indices.push(i),
            PropertyKey::String(_) => strings.push(key),
            PropertyKey::Symbol(_) => {}
        }
    }
    indices.sort_unstable();
    indices.dedup();
    let mut keys: Vec<PropertyKey> = indices.into_iter().map(PropertyKey::Index).collect();
    keys.extend(strings);
    Ok(keys)
}

/// Ordinary `ToPrimitive`: try `valueOf` and `toString` in hint order
pub fn native_convert_to_primitive(
    rt: &mut Runtime,
    obj: ObjectId,
    hint: PreferredType,
) -> ObjectResult<Value> {
    let order = match hint {
        PreferredType::String => ["toString", "valueOf"],
        PreferredType::Default | PreferredType::Number => ["valueOf", "toString"],
    };
    for name in order {
        let method = rt.get_property(obj, &PropertyKey::string(name))?;
        let Some(method) = method.as_object().filter(|&m| rt.is_callable(m)) else {
            continue;
        };
        let result = rt.call(method, Value::Object(obj), &[])?;
        if !result.is_object() {
            return Ok(result);
        }
    }
    Err(ObjectError::type_error("cannot convert object to primitive value"))
}

/// Ordinary `typeof`
pub fn native_type_of(rt: &Runtime, obj: ObjectId) -> &'static str {
    if rt.is_callable(obj) { "function" } else { "object" }
}
