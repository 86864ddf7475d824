use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_native_function::ObjectNativeFunction;
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    ObjString,
    ObjFunction,
    ObjClosure,
    ObjUpvalue,
    ObjNativeFunction,
    ObjClass,
    ObjInstance,
    ObjBoundMethod,
}

/// Inline header carried by every heap object: the type tag, the GC mark
/// bit, and the intrusive link threading all live objects for the sweep.
#[repr(C)]
pub struct Object {
    pub obj_type: ObjectType,
    pub is_marked: bool,
    pub next: *mut Object,
}

impl Object {
    pub fn new(obj_type: ObjectType) -> Object {
        Object {
            obj_type,
            is_marked: false,
            next: std::ptr::null_mut(),
        }
    }

    // Downcasts below rely on every object kind being #[repr(C)] with the
    // header as its first field.

    pub unsafe fn as_string(&self) -> &ObjectString {
        debug_assert!(self.obj_type == ObjectType::ObjString);
        &*(self as *const Object as *const ObjectString)
    }

    pub unsafe fn as_function(&self) -> &ObjectFunction {
        debug_assert!(self.obj_type == ObjectType::ObjFunction);
        &*(self as *const Object as *const ObjectFunction)
    }

    pub unsafe fn as_closure(&self) -> &ObjectClosure {
        debug_assert!(self.obj_type == ObjectType::ObjClosure);
        &*(self as *const Object as *const ObjectClosure)
    }

    pub unsafe fn as_upvalue(&self) -> &ObjectUpvalue {
        debug_assert!(self.obj_type == ObjectType::ObjUpvalue);
        &*(self as *const Object as *const ObjectUpvalue)
    }

    pub unsafe fn as_class(&self) -> &ObjectClass {
        debug_assert!(self.obj_type == ObjectType::ObjClass);
        &*(self as *const Object as *const ObjectClass)
    }

    pub unsafe fn as_instance(&self) -> &ObjectInstance {
        debug_assert!(self.obj_type == ObjectType::ObjInstance);
        &*(self as *const Object as *const ObjectInstance)
    }

    pub unsafe fn as_bound_method(&self) -> &ObjectBoundMethod {
        debug_assert!(self.obj_type == ObjectType::ObjBoundMethod);
        &*(self as *const Object as *const ObjectBoundMethod)
    }

    /// Shallow struct size plus owned heap payload, for allocation
    /// accounting. Collections owned by an object are charged by capacity.
    pub unsafe fn deep_size(&self) -> usize {
        match self.obj_type {
            ObjectType::ObjString => {
                std::mem::size_of::<ObjectString>() + self.as_string().content.capacity()
            }
            ObjectType::ObjFunction => {
                let function = self.as_function();
                std::mem::size_of::<ObjectFunction>()
                    + function.chunk.byte_size()
                    + function.name.capacity()
            }
            ObjectType::ObjClosure => {
                let closure = self.as_closure();
                std::mem::size_of::<ObjectClosure>()
                    + closure.upvalues.capacity() * std::mem::size_of::<*mut ObjectUpvalue>()
            }
            ObjectType::ObjUpvalue => std::mem::size_of::<ObjectUpvalue>(),
            ObjectType::ObjNativeFunction => {
                let native = &*(self as *const Object as *const ObjectNativeFunction);
                std::mem::size_of::<ObjectNativeFunction>() + native.name.capacity()
            }
            ObjectType::ObjClass => {
                let class = self.as_class();
                std::mem::size_of::<ObjectClass>()
                    + class.name.capacity()
                    + class.methods.byte_size()
                    + class.fields.byte_size()
            }
            ObjectType::ObjInstance => {
                std::mem::size_of::<ObjectInstance>() + self.as_instance().fields.byte_size()
            }
            ObjectType::ObjBoundMethod => std::mem::size_of::<ObjectBoundMethod>(),
        }
    }
}

#[cfg(feature = "debug_trace_object")]
mod debug_feature {
    use super::Object;

    impl Drop for Object {
        fn drop(&mut self) {
            eprintln!("[obj-trace] drop {:?} at {:p}", self.obj_type, self);
        }
    }
}
