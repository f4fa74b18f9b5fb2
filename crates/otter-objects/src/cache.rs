//! New-object cache
//!
//! Remembers the empty layout and lineage record picked for each
//! `(class, proto, alloc kind)` so repeated allocations skip both intern
//! lookups. Entries are not traced; the cache is purged whenever a
//! collection starts or sweeps.

use crate::class::{AllocKind, ClassId};
use crate::layout::LayoutId;
use crate::object::ObjectId;
use crate::types::TypeRecordId;
use rustc_hash::FxHashMap;

type CacheKey = (ClassId, Option<ObjectId>, AllocKind);

/// Template cache for fresh objects
#[derive(Debug, Default)]
pub struct NewObjectCache {
    entries: FxHashMap<CacheKey, (LayoutId, TypeRecordId)>,
    hits: u64,
    misses: u64,
}

impl NewObjectCache {
    /// Cached template for the key
    pub fn lookup(
        &mut self,
        class: ClassId,
        proto: Option<ObjectId>,
        kind: AllocKind,
    ) -> Option<(LayoutId, TypeRecordId)> {
        let found = self.entries.get(&(class, proto, kind)).copied();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    /// Remember a template
    pub fn insert(
        &mut self,
        class: ClassId,
        proto: Option<ObjectId>,
        kind: AllocKind,
        layout: LayoutId,
        ty: TypeRecordId,
    ) {
        self.entries.insert((class, proto, kind), (layout, ty));
    }

    /// Drop every entry
    pub fn purge(&mut self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookup hits so far
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookup misses so far
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use crate::class::ClassId;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;

    #[test]
    fn test_repeat_allocation_hits_cache() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let a = rt.new_object(ClassId::PLAIN, None).unwrap();
        let b = rt.new_object(ClassId::PLAIN, None).unwrap();
        assert_eq!(rt.new_object_cache().misses(), 1);
        assert_eq!(rt.new_object_cache().hits(), 1);
        assert_eq!(rt.layout_of(a), rt.layout_of(b));
    }

    #[test]
    fn test_gc_purges_cache() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let obj = rt.new_plain_object().unwrap();
        rt.add_root(obj);
        assert_eq!(rt.new_object_cache().len(), 1);
        rt.collect_garbage();
        assert!(rt.new_object_cache().is_empty());
    }
}
