use crate::chunk::Chunk;
use crate::objects::object::{Object, ObjectType};

/// Compiled function: arity, captured-variable count, owned chunk, and the
/// declared name (empty for the top-level script).
#[repr(C)]
pub struct ObjectFunction {
    pub object: Object,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: String,
}

impl ObjectFunction {
    pub fn new(arity: u8, name: String) -> ObjectFunction {
        ObjectFunction {
            object: Object::new(ObjectType::ObjFunction),
            arity,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}
