//! # Otter Objects
//!
//! Object representation core of the Otter engine.
//!
//! ## Design
//!
//! - **Layouts**: property sets are nodes in a shared transition tree; an
//!   object that outgrows sharing moves to a private dictionary node
//! - **Storage**: inline fixed slots, an overflow slot array and a dense
//!   element buffer, every pointer write going through the GC barriers
//! - **Type records**: per-(class, prototype) lineage with monotonically
//!   widening property type sets, or a singleton record per object
//! - **Dispatch**: classes override property operations through an
//!   [`ObjectOps`] table; everything else runs the native path
//! - **Runtime**: one [`Runtime`] owns the heap, interning tables, class
//!   registry and caches; independent runtimes share nothing

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod array;
mod barrier;
pub mod cache;
pub mod class;
pub mod config;
pub mod dispatch;
pub mod elements;
pub mod error;
mod finalize;
pub mod function;
mod gc;
pub mod inline_cache;
pub mod layout;
pub mod memory;
pub mod native;
pub mod object;
pub mod property;
pub mod runtime;
pub mod slots;
pub mod types;
pub mod value;

pub use cache::NewObjectCache;
pub use class::{
    AllocKind, ClassFlags, ClassId, ClassRegistry, ObjectClass, ObjectKind, ObjectOps,
    PreferredType, guess_object_kind,
};
pub use config::RuntimeConfig;
pub use elements::ElementBuffer;
pub use error::{ObjectError, ObjectResult};
pub use function::{NativeFn, NativeFunction};
pub use inline_cache::InlineCache;
pub use layout::{
    BaseLayout, DictionaryReason, LayoutId, LayoutNode, LayoutTable, ObjectFlags, PropertyEntry,
    PropertySpec,
};
pub use memory::MemoryManager;
pub use native::{
    native_convert_to_primitive, native_define_property, native_delete_property,
    native_enumerate, native_get_property, native_set_property, native_type_of,
};
pub use object::{ObjectId, ObjectStorage, PrivateData};
pub use property::{PropertyAttributes, PropertyDescriptor, PropertyKey};
pub use runtime::Runtime;
pub use types::{PrimitiveTypes, TypeFlags, TypeRecordId, TypeSet, ValueType};
pub use value::Value;

pub use otter_heap::{GcPhase, HeapConfig, HeapStats};
