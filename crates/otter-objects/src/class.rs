//! Class descriptors, operation tables and allocation kinds
//!
//! Every object kind registers an [`ObjectClass`]: its allocation size,
//! reserved slots, flags and the [`ObjectOps`] overrides consulted by the
//! generic dispatch before the native path runs.

use crate::error::ObjectResult;
use crate::object::{ObjectId, ObjectStorage};
use crate::property::{PropertyDescriptor, PropertyKey};
use crate::runtime::Runtime;
use crate::value::Value;

/// Get hook: `(runtime, object, key) -> value`
pub type GetPropertyOp = fn(&mut Runtime, ObjectId, &PropertyKey) -> ObjectResult<Value>;
/// Set hook: `(runtime, object, key, value, strict) -> succeeded`
pub type SetPropertyOp =
    fn(&mut Runtime, ObjectId, &PropertyKey, Value, bool) -> ObjectResult<bool>;
/// Define hook: `(runtime, object, key, descriptor) -> succeeded`
pub type DefinePropertyOp =
    fn(&mut Runtime, ObjectId, &PropertyKey, PropertyDescriptor) -> ObjectResult<bool>;
/// Delete hook: `(runtime, object, key, strict) -> succeeded`
pub type DeletePropertyOp = fn(&mut Runtime, ObjectId, &PropertyKey, bool) -> ObjectResult<bool>;
/// Enumerate hook: own enumerable keys in order
pub type EnumerateOp = fn(&Runtime, ObjectId) -> ObjectResult<Vec<PropertyKey>>;
/// Primitive conversion hook
pub type ConvertToPrimitiveOp = fn(&mut Runtime, ObjectId, PreferredType) -> ObjectResult<Value>;
/// `typeof` hook
pub type TypeOfOp = fn(&Runtime, ObjectId) -> &'static str;
/// Call hook: `(runtime, callee, this, args) -> result`
pub type CallOp = fn(&mut Runtime, ObjectId, Value, &[Value]) -> ObjectResult<Value>;
/// Finalizer, run on the object's private storage once it is dead
pub type FinalizeOp = fn(&mut ObjectStorage);

/// Hint for primitive conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    /// No preference
    Default,
    /// Prefer a number
    Number,
    /// Prefer a string
    String,
}

/// Operation overrides for a class. `None` falls through to the native path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectOps {
    /// Property read
    pub get_property: Option<GetPropertyOp>,
    /// Property write
    pub set_property: Option<SetPropertyOp>,
    /// Property definition
    pub define_property: Option<DefinePropertyOp>,
    /// Property deletion
    pub delete_property: Option<DeletePropertyOp>,
    /// Own-key enumeration
    pub enumerate: Option<EnumerateOp>,
    /// Conversion to a primitive
    pub convert_to_primitive: Option<ConvertToPrimitiveOp>,
    /// `typeof` result
    pub type_of: Option<TypeOfOp>,
    /// Invocation
    pub call: Option<CallOp>,
    /// Finalization
    pub finalize: Option<FinalizeOp>,
}

impl ObjectOps {
    /// Table with no overrides
    pub const NONE: Self = Self {
        get_property: None,
        set_property: None,
        define_property: None,
        delete_property: None,
        enumerate: None,
        convert_to_primitive: None,
        type_of: None,
        call: None,
        finalize: None,
    };
}

bitflags::bitflags! {
    /// Flags describing class capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassFlags: u32 {
        /// Finalizer is safe to run off the mutator thread
        const BACKGROUND_FINALIZE = 1 << 0;
        /// Instances carry a private payload
        const HAS_PRIVATE = 1 << 1;
        /// Instances need special equality handling
        const SPECIAL_EQUALITY = 1 << 2;
    }
}

/// Broad object kind, for code that switches on exotic variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Ordinary object
    Ordinary,
    /// Array with a dense element store and a `length` property
    Array,
    /// Callable object
    Function,
    /// Global object
    Global,
    /// Embedder-defined exotic object
    Host,
}

/// Per-kind descriptor
#[derive(Debug)]
pub struct ObjectClass {
    /// Class name
    pub name: &'static str,
    /// Object kind
    pub kind: ObjectKind,
    /// Default fixed-slot count
    pub fixed_slots: u32,
    /// Slots reserved ahead of named properties
    pub reserved_slots: u32,
    /// Capability flags
    pub flags: ClassFlags,
    /// Operation overrides
    pub ops: ObjectOps,
}

impl ObjectClass {
    /// Default allocation kind for instances
    pub fn alloc_kind(&self) -> AllocKind {
        AllocKind::for_slots(self.fixed_slots.max(self.reserved_slots))
    }

    /// Whether dead instances may be finalized on the background thread
    pub fn can_finalize_in_background(&self) -> bool {
        self.ops.finalize.is_none() || self.flags.contains(ClassFlags::BACKGROUND_FINALIZE)
    }
}

/// Plain `{}` objects
pub static PLAIN_CLASS: ObjectClass = ObjectClass {
    name: "Object",
    kind: ObjectKind::Ordinary,
    fixed_slots: 4,
    reserved_slots: 0,
    flags: ClassFlags::empty(),
    ops: ObjectOps::NONE,
};

/// Global objects
pub static GLOBAL_CLASS: ObjectClass = ObjectClass {
    name: "global",
    kind: ObjectKind::Global,
    fixed_slots: 16,
    reserved_slots: 0,
    flags: ClassFlags::empty(),
    ops: ObjectOps::NONE,
};

/// Object size class
///
/// The kind fixes the number of inline slots for the object's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AllocKind {
    /// No inline slots
    Object0,
    /// 2 inline slots
    Object2,
    /// 4 inline slots
    Object4,
    /// 8 inline slots
    Object8,
    /// 12 inline slots
    Object12,
    /// 16 inline slots
    Object16,
}

impl AllocKind {
    /// Largest inline slot count
    pub const MAX_FIXED_SLOTS: u32 = 16;

    /// Smallest kind holding `slots` inline slots (capped at 16)
    pub fn for_slots(slots: u32) -> Self {
        match slots {
            0 => Self::Object0,
            1..=2 => Self::Object2,
            3..=4 => Self::Object4,
            5..=8 => Self::Object8,
            9..=12 => Self::Object12,
            _ => Self::Object16,
        }
    }

    /// Inline slot count
    pub const fn fixed_slots(self) -> u32 {
        match self {
            Self::Object0 => 0,
            Self::Object2 => 2,
            Self::Object4 => 4,
            Self::Object8 => 8,
            Self::Object12 => 12,
            Self::Object16 => 16,
        }
    }
}

/// Kind for an object literal expected to hold `num_properties` properties
pub fn guess_object_kind(num_properties: u32) -> AllocKind {
    if num_properties == 0 {
        AllocKind::Object4
    } else {
        AllocKind::for_slots(num_properties)
    }
}

/// Handle to a registered class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    /// Plain objects
    pub const PLAIN: Self = Self(0);
    /// Arrays
    pub const ARRAY: Self = Self(1);
    /// Functions
    pub const FUNCTION: Self = Self(2);
    /// Global objects
    pub const GLOBAL: Self = Self(3);

    /// Raw index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Runtime-scoped class table with live-instance counts
pub struct ClassRegistry {
    classes: Vec<&'static ObjectClass>,
    live: Vec<usize>,
}

impl ClassRegistry {
    /// Registry holding the built-in classes
    pub fn new() -> Self {
        let mut registry = Self {
            classes: Vec::new(),
            live: Vec::new(),
        };
        registry.register(&PLAIN_CLASS);
        registry.register(&crate::array::ARRAY_CLASS);
        registry.register(&crate::function::FUNCTION_CLASS);
        registry.register(&GLOBAL_CLASS);
        registry
    }

    /// Register a class, returning its id. Registering twice returns the
    /// existing id.
    pub fn register(&mut self, class: &'static ObjectClass) -> ClassId {
        if let Some(index) = self.classes.iter().position(|c| std::ptr::eq(*c, class)) {
            return ClassId(index as u32);
        }
        self.classes.push(class);
        self.live.push(0);
        ClassId((self.classes.len() - 1) as u32)
    }

    /// Look up a descriptor
    pub fn get(&self, id: ClassId) -> &'static ObjectClass {
        self.classes[id.index()]
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no classes are registered
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Live instances of a class
    pub fn live_count(&self, id: ClassId) -> usize {
        self.live[id.index()]
    }

    pub(crate) fn instance_created(&mut self, id: ClassId) {
        self.live[id.index()] += 1;
    }

    pub(crate) fn instance_finalized(&mut self, id: ClassId) {
        let count = &mut self.live[id.index()];
        *count = count.saturating_sub(1);
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.classes.iter().map(|c| c.name))
            .finish()
    }
}
