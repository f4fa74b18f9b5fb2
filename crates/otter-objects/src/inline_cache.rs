//! Monomorphic inline caches for named property access
//!
//! A cache remembers one `(layout, slot)` pair for the access site that owns
//! it. Layout identity is the whole guard: shared layout nodes are immutable
//! and dictionary-mode objects are never cached, so an object whose current
//! layout equals the cached one holds the property in the cached slot.
//!
//! An [`InlineCache`] belongs to a single access site and must always be used
//! with the same key.

use crate::error::ObjectResult;
use crate::layout::LayoutId;
use crate::object::ObjectId;
use crate::property::{PropertyAttributes, PropertyKey};
use crate::runtime::Runtime;
use crate::value::Value;

/// Per-site cache state
#[derive(Debug, Clone, Default)]
pub struct InlineCache {
    entry: Option<(LayoutId, u32)>,
    hits: u64,
    misses: u64,
}

impl InlineCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached `(layout, slot)` pair
    pub fn entry(&self) -> Option<(LayoutId, u32)> {
        self.entry
    }

    /// Accesses served from the cache
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Accesses that went through generic dispatch
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Drop the cached entry
    pub fn reset(&mut self) {
        self.entry = None;
    }

    #[inline]
    fn probe(&mut self, layout: LayoutId) -> Option<u32> {
        match self.entry {
            Some((cached, slot)) if cached == layout => {
                self.hits += 1;
                Some(slot)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }
}

impl Runtime {
    /// `obj[key]` through an inline cache
    pub fn get_property_cached(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
        ic: &mut InlineCache,
    ) -> ObjectResult<Value> {
        if let Some(slot) = ic.probe(self.layout_of(obj)) {
            return Ok(self.get_slot(obj, slot));
        }
        let value = self.get_property(obj, key)?;
        if self.object_class(obj).ops.get_property.is_none() {
            self.fill_cache(obj, key, PropertyAttributes::empty(), ic);
        }
        Ok(value)
    }

    /// `obj[key] = value` through an inline cache
    pub fn set_property_cached(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
        value: Value,
        strict: bool,
        ic: &mut InlineCache,
    ) -> ObjectResult<bool> {
        if let Some(slot) = ic.probe(self.layout_of(obj)) {
            self.add_property_type(obj, key, &value)?;
            self.set_slot(obj, slot, value);
            return Ok(true);
        }
        let done = self.set_property(obj, key, value, strict)?;
        if done && self.object_class(obj).ops.set_property.is_none() {
            self.fill_cache(obj, key, PropertyAttributes::WRITABLE, ic);
        }
        Ok(done)
    }

    /// Cache an own slot-backed property of a shared layout carrying
    /// `required` attributes
    fn fill_cache(
        &self,
        obj: ObjectId,
        key: &PropertyKey,
        required: PropertyAttributes,
        ic: &mut InlineCache,
    ) {
        if self.in_dictionary_mode(obj) {
            return;
        }
        if let Some(entry) = self.lookup_own(obj, key)
            && let Some(slot) = entry.slot
            && entry.attrs.contains(required)
        {
            ic.entry = Some((self.layout_of(obj), slot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InlineCache;
    use crate::config::RuntimeConfig;
    use crate::property::PropertyDescriptor;
    use crate::runtime::Runtime;
    use crate::value::Value;

    #[test]
    fn test_same_layout_hits() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let a = rt.new_plain_object().unwrap();
        let b = rt.new_plain_object().unwrap();
        rt.set_property(a, &"x".into(), Value::Int32(1), true).unwrap();
        rt.set_property(b, &"x".into(), Value::Int32(2), true).unwrap();

        let mut ic = InlineCache::new();
        let key = "x".into();
        assert_eq!(rt.get_property_cached(a, &key, &mut ic).unwrap(), Value::Int32(1));
        assert_eq!(rt.get_property_cached(b, &key, &mut ic).unwrap(), Value::Int32(2));
        assert_eq!(ic.misses(), 1);
        assert_eq!(ic.hits(), 1);
    }

    #[test]
    fn test_layout_change_misses() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let obj = rt.new_plain_object().unwrap();
        rt.set_property(obj, &"x".into(), Value::Int32(1), true).unwrap();
        let mut ic = InlineCache::new();
        let key = "x".into();
        rt.get_property_cached(obj, &key, &mut ic).unwrap();

        rt.set_property(obj, &"y".into(), Value::Int32(2), true).unwrap();
        assert_eq!(rt.get_property_cached(obj, &key, &mut ic).unwrap(), Value::Int32(1));
        assert_eq!(ic.misses(), 2);
    }

    #[test]
    fn test_read_only_property_not_cached_for_writes() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let obj = rt.new_plain_object().unwrap();
        rt.set_property(obj, &"x".into(), Value::Int32(1), true).unwrap();
        let mut ic = InlineCache::new();
        let key = "x".into();
        rt.set_property_cached(obj, &key, Value::Int32(2), true, &mut ic)
            .unwrap();
        assert!(ic.entry().is_some());

        rt.freeze(obj).unwrap();
        assert!(
            rt.set_property_cached(obj, &key, Value::Int32(3), true, &mut ic)
                .is_err()
        );
        assert_eq!(rt.get_property(obj, &key).unwrap(), Value::Int32(2));
    }

    #[test]
    fn test_dictionary_objects_are_not_cached() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let obj = rt.new_plain_object().unwrap();
        rt.define_property(obj, &"x".into(), PropertyDescriptor::data(Value::Int32(1)))
            .unwrap();
        rt.set_property(obj, &"y".into(), Value::Int32(2), true).unwrap();
        rt.delete_property(obj, &"x".into(), true).unwrap();
        assert!(rt.in_dictionary_mode(obj));

        let mut ic = InlineCache::new();
        rt.get_property_cached(obj, &"y".into(), &mut ic).unwrap();
        assert!(ic.entry().is_none());
    }
}
