use crate::gc::gc_trace;
use crate::objects::object::{Object, ObjectType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_native_function::{NativeFn, ObjectNativeFunction};
use crate::objects::object_string::{fnv1a, ObjectString};
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::table::Table;
use crate::value::{make_null_value, Value};

/// Owner of the managed heap: every allocation is linked into the intrusive
/// all-objects list through the header's `next` field, which is also the
/// sweep domain. Tracks a running deep-size total for the GC trigger.
pub struct ObjectManager {
    head: *mut Object,
    bytes_allocated: usize,
}

impl ObjectManager {
    pub fn new() -> ObjectManager {
        ObjectManager {
            head: std::ptr::null_mut(),
            bytes_allocated: 0,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    fn adopt(&mut self, object: *mut Object) {
        unsafe {
            (*object).next = self.head;
            self.head = object;
            let size = (*object).deep_size();
            self.bytes_allocated += size;
            gc_trace!(
                "allocate {:?} at {:p}, {} bytes",
                (*object).obj_type,
                object,
                size
            );
        }
    }

    /// Interning probe, then allocate on a miss. The returned pointer is the
    /// canonical object for this content.
    pub fn copy_string(&mut self, intern_strings: &mut Table, content: &str) -> *mut ObjectString {
        let hash = fnv1a(content.as_bytes());
        if let Some(existing) = intern_strings.find_string(content, hash) {
            return existing;
        }
        let string = Box::into_raw(Box::new(ObjectString::new(content)));
        self.adopt(string as *mut Object);
        intern_strings.insert(string, make_null_value());
        string
    }

    /// Like `copy_string` but consumes an already-built buffer; on an
    /// interning hit the incoming buffer is released.
    pub fn take_string(&mut self, intern_strings: &mut Table, content: String) -> *mut ObjectString {
        let hash = fnv1a(content.as_bytes());
        if let Some(existing) = intern_strings.find_string(&content, hash) {
            return existing;
        }
        let string = Box::into_raw(Box::new(ObjectString::from_owned(content)));
        self.adopt(string as *mut Object);
        intern_strings.insert(string, make_null_value());
        string
    }

    /// Takes over a function the compiler finished building.
    pub fn alloc_function(&mut self, function: ObjectFunction) -> *mut ObjectFunction {
        let function = Box::into_raw(Box::new(function));
        self.adopt(function as *mut Object);
        function
    }

    pub fn alloc_closure(&mut self, function: *mut ObjectFunction) -> *mut ObjectClosure {
        let closure = Box::into_raw(Box::new(ObjectClosure::new(function)));
        self.adopt(closure as *mut Object);
        closure
    }

    pub fn alloc_upvalue(&mut self, location: *mut Value) -> *mut ObjectUpvalue {
        let upvalue = Box::into_raw(Box::new(ObjectUpvalue::new(location)));
        self.adopt(upvalue as *mut Object);
        upvalue
    }

    pub fn alloc_native_function(
        &mut self,
        name: &str,
        function: NativeFn,
    ) -> *mut ObjectNativeFunction {
        let native = Box::into_raw(Box::new(ObjectNativeFunction::new(name, function)));
        self.adopt(native as *mut Object);
        native
    }

    pub fn alloc_class(&mut self, name: &str) -> *mut ObjectClass {
        let class = Box::into_raw(Box::new(ObjectClass::new(name)));
        self.adopt(class as *mut Object);
        class
    }

    pub fn alloc_instance(&mut self, class: *mut ObjectClass) -> *mut ObjectInstance {
        let instance = Box::into_raw(Box::new(ObjectInstance::new(class)));
        self.adopt(instance as *mut Object);
        instance
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjectClosure,
    ) -> *mut ObjectBoundMethod {
        let bound = Box::into_raw(Box::new(ObjectBoundMethod::new(receiver, method)));
        self.adopt(bound as *mut Object);
        bound
    }

    pub fn iter(&self) -> HeapIter {
        HeapIter { next: self.head }
    }

    /// Frees every unmarked object, unlinking it from the all-objects list,
    /// and clears the mark of survivors. Returns the bytes released.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut previous: *mut Object = std::ptr::null_mut();
        let mut object = self.head;
        unsafe {
            while !object.is_null() {
                if (*object).is_marked {
                    (*object).is_marked = false;
                    previous = object;
                    object = (*object).next;
                } else {
                    let unreached = object;
                    object = (*object).next;
                    if previous.is_null() {
                        self.head = object;
                    } else {
                        (*previous).next = object;
                    }
                    freed += (*unreached).deep_size();
                    gc_trace!("free {:?} at {:p}", (*unreached).obj_type, unreached);
                    free_object(unreached);
                }
            }
        }
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
        freed
    }

    fn free_all(&mut self) {
        let mut object = self.head;
        unsafe {
            while !object.is_null() {
                let next = (*object).next;
                free_object(object);
                object = next;
            }
        }
        self.head = std::ptr::null_mut();
        self.bytes_allocated = 0;
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        self.free_all();
    }
}

/// Reconstructs the concrete box so the payload (strings, chunks, tables)
/// drops with the right layout.
unsafe fn free_object(object: *mut Object) {
    match (*object).obj_type {
        ObjectType::ObjString => drop(Box::from_raw(object as *mut ObjectString)),
        ObjectType::ObjFunction => drop(Box::from_raw(object as *mut ObjectFunction)),
        ObjectType::ObjClosure => drop(Box::from_raw(object as *mut ObjectClosure)),
        ObjectType::ObjUpvalue => drop(Box::from_raw(object as *mut ObjectUpvalue)),
        ObjectType::ObjNativeFunction => drop(Box::from_raw(object as *mut ObjectNativeFunction)),
        ObjectType::ObjClass => drop(Box::from_raw(object as *mut ObjectClass)),
        ObjectType::ObjInstance => drop(Box::from_raw(object as *mut ObjectInstance)),
        ObjectType::ObjBoundMethod => drop(Box::from_raw(object as *mut ObjectBoundMethod)),
    }
}

pub struct HeapIter {
    next: *mut Object,
}

impl Iterator for HeapIter {
    type Item = *mut Object;

    fn next(&mut self) -> Option<*mut Object> {
        if self.next.is_null() {
            return None;
        }
        let current = self.next;
        self.next = unsafe { (*current).next };
        Some(current)
    }
}
