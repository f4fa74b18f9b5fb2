//! Type records: per-lineage type feedback
//!
//! Objects sharing a class and prototype share one [`TypeRecord`] (their
//! lineage). The record accumulates, per property key, the set of value
//! kinds ever stored there, plus coarse flags such as "has been a non-dense
//! array". Type sets only ever widen.
//!
//! A singleton object owns a private record instead; it never goes back to a
//! shared one.

use crate::class::ClassId;
use crate::error::{ObjectError, ObjectResult};
use crate::memory::MemoryManager;
use crate::object::ObjectId;
use crate::property::PropertyKey;
use crate::runtime::Runtime;
use crate::value::Value;
use otter_heap::{CellId, CellKind, FieldRef, GcHeader, Heap, Space};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Handle to a type record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRecordId(pub(crate) CellId);

impl TypeRecordId {
    /// Underlying cell
    pub fn cell(self) -> CellId {
        self.0
    }
}

bitflags::bitflags! {
    /// Coarse lineage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        /// Some object of the lineage had indexed properties outside its
        /// dense elements, or a length too large for dense storage
        const NON_DENSE_ARRAY = 1 << 0;
        /// Some object of the lineage had holes in its dense elements
        const NON_PACKED_ARRAY = 1 << 1;
        /// Objects need special equality handling
        const SPECIAL_EQUALITY = 1 << 2;
        /// Objects have been iterated
        const ITERATED = 1 << 3;
        /// Property types are not tracked; assume anything
        const UNKNOWN_PROPERTIES = 1 << 4;
        /// Record is private to one object
        const SINGLETON = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Primitive members of a type set
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrimitiveTypes: u8 {
        /// `undefined`
        const UNDEFINED = 1 << 0;
        /// `null`
        const NULL = 1 << 1;
        /// Booleans
        const BOOLEAN = 1 << 2;
        /// 32-bit integers
        const INT32 = 1 << 3;
        /// Doubles
        const DOUBLE = 1 << 4;
        /// Strings
        const STRING = 1 << 5;
        /// Any object; specific object types are no longer listed
        const ANY_OBJECT = 1 << 6;
    }
}

/// Kind of a stored value, as recorded in a type set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// A primitive kind
    Primitive(PrimitiveTypes),
    /// An object of the given lineage
    Object(TypeRecordId),
}

/// Specific object types tracked before a set widens to `ANY_OBJECT`
pub const MAX_OBJECT_TYPES: usize = 8;

/// Monotonic set of observed value kinds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSet {
    primitives: PrimitiveTypes,
    objects: SmallVec<[TypeRecordId; MAX_OBJECT_TYPES]>,
}

impl TypeSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a kind. Returns true if the set changed.
    pub fn add(&mut self, ty: ValueType) -> bool {
        match ty {
            ValueType::Primitive(p) => {
                let before = self.primitives;
                self.primitives |= p;
                if p.contains(PrimitiveTypes::ANY_OBJECT) {
                    self.objects.clear();
                }
                before != self.primitives
            }
            ValueType::Object(_) if self.primitives.contains(PrimitiveTypes::ANY_OBJECT) => false,
            ValueType::Object(id) => {
                if self.objects.contains(&id) {
                    return false;
                }
                if self.objects.len() == MAX_OBJECT_TYPES {
                    self.objects.clear();
                    self.primitives |= PrimitiveTypes::ANY_OBJECT;
                } else {
                    self.objects.push(id);
                }
                true
            }
        }
    }

    /// Whether the set includes `ty`
    pub fn contains(&self, ty: ValueType) -> bool {
        match ty {
            ValueType::Primitive(p) => self.primitives.contains(p),
            ValueType::Object(id) => {
                self.primitives.contains(PrimitiveTypes::ANY_OBJECT) || self.objects.contains(&id)
            }
        }
    }

    /// Whether every kind in `other` is also in `self`
    pub fn is_superset_of(&self, other: &TypeSet) -> bool {
        if !self.primitives.contains(other.primitives) {
            return false;
        }
        self.primitives.contains(PrimitiveTypes::ANY_OBJECT)
            || other.objects.iter().all(|id| self.objects.contains(id))
    }

    /// Primitive kinds
    pub fn primitives(&self) -> PrimitiveTypes {
        self.primitives
    }

    /// Specific object lineages
    pub fn object_types(&self) -> &[TypeRecordId] {
        &self.objects
    }

    /// Whether nothing has been observed
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty() && self.objects.is_empty()
    }
}

/// Key under which a record tracks types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// A named property
    Property(PropertyKey),
    /// Every dense element
    Elements,
}

/// Type information for one key
#[derive(Debug, Clone, Default)]
pub struct TypeProperty {
    /// Observed value kinds
    pub types: TypeSet,
    /// Property has been deleted or reconfigured on some object
    pub configured: bool,
}

/// Aggregate type feedback for a lineage
#[derive(Debug)]
pub struct TypeRecord {
    class: ClassId,
    proto: Option<ObjectId>,
    flags: TypeFlags,
    properties: FxHashMap<TypeKey, TypeProperty>,
    singleton: Option<ObjectId>,
}

impl TypeRecord {
    /// Class of objects in the lineage
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Prototype of objects in the lineage
    pub fn proto(&self) -> Option<ObjectId> {
        self.proto
    }

    /// Lineage flags
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// Owning object of a singleton record
    pub fn singleton(&self) -> Option<ObjectId> {
        self.singleton
    }

    /// Type info for a key
    pub fn property(&self, key: &TypeKey) -> Option<&TypeProperty> {
        self.properties.get(key)
    }

    pub(crate) fn trace(&self, tracer: &mut dyn FnMut(CellId)) {
        if let Some(proto) = self.proto {
            tracer(proto.0);
        }
        if let Some(owner) = self.singleton {
            tracer(owner.0);
        }
        for prop in self.properties.values() {
            for ty in prop.types.object_types() {
                tracer(ty.0);
            }
        }
    }

    fn booked_bytes(&self) -> usize {
        std::mem::size_of::<TypeRecord>() + self.properties.len() * PROPERTY_BYTES
    }
}

const PROPERTY_BYTES: usize =
    std::mem::size_of::<TypeKey>() + std::mem::size_of::<TypeProperty>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LineageKey {
    class: ClassId,
    proto: Option<ObjectId>,
}

/// Arena and lineage table for type records
pub struct TypeTable {
    records: Space<TypeRecord>,
    /// Weak map from lineage to its shared record
    lineages: FxHashMap<LineageKey, TypeRecordId>,
}

impl TypeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            records: Space::new(CellKind::TypeRecord),
            lineages: FxHashMap::default(),
        }
    }

    /// Borrow a record
    pub fn record(&self, id: TypeRecordId) -> &TypeRecord {
        &self.records[id.0]
    }

    /// Borrow a record if it is still alive
    pub fn get(&self, id: TypeRecordId) -> Option<&TypeRecord> {
        self.records.get(id.0)
    }

    /// Header of a record
    pub fn header(&self, cell: CellId) -> Option<&GcHeader> {
        self.records.header(cell)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are alive
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn space(&self) -> &Space<TypeRecord> {
        &self.records
    }

    pub(crate) fn record_mut(&mut self, id: TypeRecordId) -> &mut TypeRecord {
        &mut self.records[id.0]
    }

    /// Shared record for `(class, proto)`, created on first use
    pub fn lineage(
        &mut self,
        class: ClassId,
        proto: Option<ObjectId>,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<TypeRecordId> {
        let key = LineageKey { class, proto };
        if let Some(&id) = self.lineages.get(&key) {
            if let Some(header) = self.records.header(id.0) {
                heap.pre_write_barrier(id.0, header);
            }
            return Ok(id);
        }
        let id = self.alloc(
            TypeRecord {
                class,
                proto,
                flags: TypeFlags::empty(),
                properties: FxHashMap::default(),
                singleton: None,
            },
            heap,
            memory,
        )?;
        self.lineages.insert(key, id);
        tracing::trace!(target: "otter::objects", ?class, ?proto, "new lineage");
        Ok(id)
    }

    /// Whether `id` is the shared record for `(class, proto)`
    pub fn is_lineage_record(&self, id: TypeRecordId, class: ClassId, proto: Option<ObjectId>) -> bool {
        self.lineages.get(&LineageKey { class, proto }) == Some(&id)
    }

    fn alloc(
        &mut self,
        record: TypeRecord,
        heap: &Heap,
        memory: &MemoryManager,
    ) -> ObjectResult<TypeRecordId> {
        memory.alloc(record.booked_bytes())?;
        Ok(TypeRecordId(self.records.insert(record, heap.allocation_color())))
    }

    pub(crate) fn sweep(&mut self, dead: &[CellId], memory: &MemoryManager) -> usize {
        let mut freed = 0;
        for &cell in dead {
            if let Some(record) = self.records.remove(cell) {
                memory.free(record.booked_bytes());
                freed += 1;
            }
        }
        if freed > 0 {
            let records = &self.records;
            self.lineages.retain(|_, v| records.contains(v.0));
        }
        freed
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeTable")
            .field("records", &self.records.len())
            .field("lineages", &self.lineages.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Runtime operations
// ---------------------------------------------------------------------------

impl Runtime {
    /// Type record of an object
    pub fn get_type(&self, obj: ObjectId) -> TypeRecordId {
        self.spaces.objects[obj.0].ty
    }

    /// Flags of the object's type record, for compiled guards
    pub fn type_flags_of(&self, obj: ObjectId) -> TypeFlags {
        self.spaces.types.record(self.get_type(obj)).flags
    }

    /// Recorded types for `key` in the object's lineage
    pub fn property_types(&self, obj: ObjectId, key: &PropertyKey) -> Option<TypeSet> {
        self.spaces
            .types
            .record(self.get_type(obj))
            .property(&TypeKey::Property(key.clone()))
            .map(|p| p.types.clone())
    }

    /// Recorded element types in the object's lineage
    pub fn element_types(&self, obj: ObjectId) -> Option<TypeSet> {
        self.spaces
            .types
            .record(self.get_type(obj))
            .property(&TypeKey::Elements)
            .map(|p| p.types.clone())
    }

    /// Whether `key` has been deleted or reconfigured in the object's lineage
    pub fn is_property_configured(&self, obj: ObjectId, key: &PropertyKey) -> bool {
        self.spaces
            .types
            .record(self.get_type(obj))
            .property(&TypeKey::Property(key.clone()))
            .is_some_and(|p| p.configured)
    }

    /// Kind of `value` for type sets
    pub fn value_type(&self, value: &Value) -> Option<ValueType> {
        let primitive = match value {
            Value::Hole => return None,
            Value::Undefined => PrimitiveTypes::UNDEFINED,
            Value::Null => PrimitiveTypes::NULL,
            Value::Boolean(_) => PrimitiveTypes::BOOLEAN,
            Value::Int32(_) => PrimitiveTypes::INT32,
            Value::Double(_) => PrimitiveTypes::DOUBLE,
            Value::String(_) => PrimitiveTypes::STRING,
            Value::Object(id) => return Some(ValueType::Object(self.get_type(*id))),
        };
        Some(ValueType::Primitive(primitive))
    }

    /// Widen the recorded types of `key` in the object's lineage to include
    /// `value`'s kind
    pub fn add_property_type(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
        value: &Value,
    ) -> ObjectResult<()> {
        let Some(ty) = self.value_type(value) else {
            return Ok(());
        };
        self.add_type(obj, TypeKey::Property(key.clone()), ty)
    }

    /// Widen the recorded element types of the object's lineage
    pub fn add_element_type(&mut self, obj: ObjectId, value: &Value) -> ObjectResult<()> {
        let Some(ty) = self.value_type(value) else {
            return Ok(());
        };
        self.add_type(obj, TypeKey::Elements, ty)
    }

    fn add_type(&mut self, obj: ObjectId, key: TypeKey, ty: ValueType) -> ObjectResult<()> {
        let record_id = self.get_type(obj);
        let record = self.spaces.types.record(record_id);
        if record.flags.contains(TypeFlags::UNKNOWN_PROPERTIES) {
            return Ok(());
        }
        if record.properties.get(&key).is_some_and(|p| p.types.contains(ty)) {
            return Ok(());
        }
        if !record.properties.contains_key(&key) {
            self.memory.alloc(PROPERTY_BYTES)?;
        }
        let record = self.spaces.types.record_mut(record_id);
        record.properties.entry(key).or_default().types.add(ty);
        if let ValueType::Object(referent) = ty {
            self.post_barrier_cell(record_id.0, FieldRef::Whole, referent.0);
        }
        Ok(())
    }

    /// Record that `key` has been deleted or had its attributes changed
    pub fn mark_property_configured(
        &mut self,
        obj: ObjectId,
        key: &PropertyKey,
    ) -> ObjectResult<()> {
        let record_id = self.get_type(obj);
        let tkey = TypeKey::Property(key.clone());
        if !self.spaces.types.record(record_id).properties.contains_key(&tkey) {
            self.memory.alloc(PROPERTY_BYTES)?;
        }
        self.spaces
            .types
            .record_mut(record_id)
            .properties
            .entry(tkey)
            .or_default()
            .configured = true;
        Ok(())
    }

    /// OR `flags` into the object's type record
    pub fn mark_type_flags(&mut self, obj: ObjectId, flags: TypeFlags) {
        let record_id = self.get_type(obj);
        let record = self.spaces.types.record_mut(record_id);
        if !record.flags.contains(flags) {
            record.flags |= flags;
            tracing::trace!(target: "otter::objects", ?flags, "type flags widened");
        }
    }

    /// Whether the object owns a singleton record
    pub fn has_singleton_type(&self, obj: ObjectId) -> bool {
        self.spaces
            .types
            .record(self.get_type(obj))
            .flags
            .contains(TypeFlags::SINGLETON)
    }

    /// Give the object a private type record.
    ///
    /// The object must currently use the shared record of its own lineage
    /// (class and prototype); anything else is an embedder bug and is
    /// reported as an internal error. Idempotent for singletons.
    pub fn set_singleton_type(&mut self, obj: ObjectId) -> ObjectResult<()> {
        if self.has_singleton_type(obj) {
            return Ok(());
        }
        let current = self.get_type(obj);
        let record = self.spaces.types.record(current);
        let (class, proto) = (record.class, record.proto);
        if class != self.class_of(obj) || !self.spaces.types.is_lineage_record(current, class, proto)
        {
            return Err(ObjectError::internal(
                "singleton promotion requires the object's own lineage type",
            ));
        }

        let singleton = TypeRecord {
            class,
            proto,
            flags: record.flags | TypeFlags::SINGLETON,
            properties: record.properties.clone(),
            singleton: Some(obj),
        };
        let id = self
            .spaces
            .types
            .alloc(singleton, &self.heap, &self.memory)?;
        self.write_type(obj, id);
        tracing::debug!(target: "otter::objects", ?obj, "singleton type created");
        Ok(())
    }

    /// Prototype of an object
    pub fn get_proto(&self, obj: ObjectId) -> Option<ObjectId> {
        self.spaces.types.record(self.get_type(obj)).proto
    }

    /// Change an object's prototype.
    ///
    /// Singleton records are updated in place; other objects move to the
    /// lineage of the new prototype.
    pub fn set_proto(&mut self, obj: ObjectId, proto: Option<ObjectId>) -> ObjectResult<()> {
        if self.get_proto(obj) == proto {
            return Ok(());
        }
        if !self.is_extensible(obj) {
            return Err(ObjectError::type_error("object is not extensible"));
        }
        let mut cursor = proto;
        while let Some(p) = cursor {
            if p == obj {
                return Err(ObjectError::type_error("cyclic __proto__ value"));
            }
            cursor = self.get_proto(p);
        }
        if let Some(p) = proto {
            self.set_object_flags(p, crate::layout::ObjectFlags::DELEGATE)?;
        }

        let record_id = self.get_type(obj);
        if self.has_singleton_type(obj) {
            let old = self.spaces.types.record(record_id).proto;
            if let Some(old) = old {
                self.pre_barrier_cell(old.0);
            }
            self.spaces.types.record_mut(record_id).proto = proto;
            if let Some(p) = proto {
                self.post_barrier_cell(record_id.0, FieldRef::Proto, p.0);
            }
            return Ok(());
        }

        let class = self.class_of(obj);
        let lineage = self
            .spaces
            .types
            .lineage(class, proto, &self.heap, &self.memory)?;
        self.write_type(obj, lineage);
        Ok(())
    }

    /// Move a non-singleton object to the prototype-less lineage of its class
    pub fn clear_type(&mut self, obj: ObjectId) -> ObjectResult<()> {
        if self.has_singleton_type(obj) {
            return Err(ObjectError::internal("cannot clear a singleton type"));
        }
        let class = self.class_of(obj);
        let empty = self
            .spaces
            .types
            .lineage(class, None, &self.heap, &self.memory)?;
        self.write_type(obj, empty);
        Ok(())
    }

    /// Replace a non-singleton object's type record
    pub fn set_type(&mut self, obj: ObjectId, ty: TypeRecordId) -> ObjectResult<()> {
        if self.has_singleton_type(obj) {
            return Err(ObjectError::internal("cannot replace a singleton type"));
        }
        if self.spaces.types.record(ty).flags.contains(TypeFlags::SINGLETON) {
            return Err(ObjectError::internal("cannot share a singleton type"));
        }
        debug_assert!(
            {
                let mut cursor = self.spaces.types.record(ty).proto;
                let mut acyclic = true;
                while let Some(p) = cursor {
                    if p == obj {
                        acyclic = false;
                        break;
                    }
                    cursor = self.get_proto(p);
                }
                acyclic
            },
            "set_type would create a prototype cycle"
        );
        self.write_type(obj, ty);
        Ok(())
    }

    /// Barriered write of an object's type pointer
    pub(crate) fn write_type(&mut self, obj: ObjectId, ty: TypeRecordId) {
        let old = self.spaces.objects[obj.0].ty;
        if old == ty {
            return;
        }
        self.pre_barrier_cell(old.0);
        self.spaces.objects[obj.0].ty = ty;
        self.post_barrier_cell(obj.0, FieldRef::Type, ty.0);
    }
}
