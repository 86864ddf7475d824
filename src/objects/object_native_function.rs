use crate::objects::object::{Object, ObjectType};
use crate::value::Value;

/// Host function contract: the VM hands over the argument slice and pushes
/// whatever comes back. Natives run synchronously on the interpreter thread.
pub type NativeFn = fn(args: &[Value]) -> Value;

#[repr(C)]
pub struct ObjectNativeFunction {
    pub object: Object,
    pub name: String,
    pub function: NativeFn,
}

impl ObjectNativeFunction {
    pub fn new(name: &str, function: NativeFn) -> ObjectNativeFunction {
        ObjectNativeFunction {
            object: Object::new(ObjectType::ObjNativeFunction),
            name: name.to_string(),
            function,
        }
    }
}
