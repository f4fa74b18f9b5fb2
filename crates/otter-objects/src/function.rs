//! Native function objects
//!
//! The object model only needs enough of functions to call accessors and
//! `valueOf`/`toString` during primitive conversion. A native function keeps
//! its Rust entry point in the private payload.

use crate::class::{ClassFlags, ClassId, ObjectClass, ObjectKind, ObjectOps};
use crate::error::{ObjectError, ObjectResult};
use crate::object::ObjectId;
use crate::property::{PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::runtime::Runtime;
use crate::value::Value;

/// Native entry point: `(runtime, this, args) -> result`
pub type NativeFn = fn(&mut Runtime, Value, &[Value]) -> ObjectResult<Value>;

/// Private payload of a native function object
#[derive(Debug, Clone, Copy)]
pub struct NativeFunction {
    /// Entry point
    pub func: NativeFn,
}

/// Callable objects
pub static FUNCTION_CLASS: ObjectClass = ObjectClass {
    name: "Function",
    kind: ObjectKind::Function,
    fixed_slots: 2,
    reserved_slots: 0,
    flags: ClassFlags::HAS_PRIVATE,
    ops: ObjectOps {
        call: Some(function_call),
        ..ObjectOps::NONE
    },
};

fn function_call(
    rt: &mut Runtime,
    callee: ObjectId,
    this: Value,
    args: &[Value],
) -> ObjectResult<Value> {
    let Some(native) = rt.private::<NativeFunction>(callee).copied() else {
        return Err(ObjectError::internal("function object without an entry point"));
    };
    (native.func)(rt, this, args)
}

impl Runtime {
    /// Create a native function object with a non-enumerable `name`
    pub fn new_native_function(&mut self, name: &str, func: NativeFn) -> ObjectResult<ObjectId> {
        let function = self.new_object(ClassId::FUNCTION, None)?;
        self.set_private(function, Box::new(NativeFunction { func }))?;
        self.define_property(
            function,
            &PropertyKey::string("name"),
            PropertyDescriptor::data_with_attrs(
                Value::string(name),
                PropertyAttributes::CONFIGURABLE,
            ),
        )?;
        Ok(function)
    }
}
