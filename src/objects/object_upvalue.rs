use crate::objects::object::{Object, ObjectType};
use crate::value::{make_null_value, Value};

/// Captured variable. While open, `location` points at the live stack slot;
/// closing copies the slot into `closed` and repoints `location` at it, so
/// reads and writes go through `location` in both states.
#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub location: *mut Value,
    pub closed: Value,
}

impl ObjectUpvalue {
    pub fn new(location: *mut Value) -> ObjectUpvalue {
        ObjectUpvalue {
            object: Object::new(ObjectType::ObjUpvalue),
            location,
            closed: make_null_value(),
        }
    }

    pub fn is_open(&self) -> bool {
        !std::ptr::eq(self.location, &self.closed)
    }

    pub unsafe fn close(&mut self) {
        self.closed = *self.location;
        self.location = &mut self.closed;
    }
}
