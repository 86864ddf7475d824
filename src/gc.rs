use crate::call_frame::CallFrame;
use crate::objects::object::{Object, ObjectType};
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::table::{Set, Table};
use crate::value::{as_object, is_object, Value};

// Lightweight tracing macro (only active with the gc_debug feature)
#[cfg(feature = "gc_debug")]
macro_rules! gc_trace { ($($arg:tt)*) => { eprintln!("[gc-trace] {}", format_args!($($arg)*)); } }
#[cfg(not(feature = "gc_debug"))]
macro_rules! gc_trace { ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }}; }
pub(crate) use gc_trace;

/// Aggregated GC statistics (does not include currently-live total bytes;
/// the object manager tracks that).
#[derive(Default, Debug, Clone)]
pub struct GCStats {
    pub cycles: u64,
    pub total_freed_bytes: usize,
    pub last_freed_bytes: usize,
    pub last_before_bytes: usize,
    pub last_after_bytes: usize,
    pub last_next_trigger_bytes: usize,
}

impl GCStats {
    fn record(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.cycles += 1;
        self.total_freed_bytes += freed;
        self.last_freed_bytes = freed;
        self.last_before_bytes = before;
        self.last_after_bytes = after;
        self.last_next_trigger_bytes = next_trigger;
    }
}

/// Precise mark-and-sweep tracer. Marking sets the header bit and pushes the
/// object on the gray worklist exactly once; tracing drains the worklist and
/// darkens each object's direct references.
pub struct GarbageCollector {
    gray_stack: Vec<*mut Object>,
    stats: GCStats,
}

impl GarbageCollector {
    pub fn new() -> GarbageCollector {
        GarbageCollector {
            gray_stack: vec![],
            stats: GCStats::default(),
        }
    }

    pub fn mark_object(&mut self, object: *mut Object) {
        if object.is_null() {
            return;
        }
        unsafe {
            if (*object).is_marked {
                return;
            }
            (*object).is_marked = true;
        }
        gc_trace!("mark {:p}", object);
        self.gray_stack.push(object);
    }

    pub fn mark_value(&mut self, value: &Value) {
        if is_object(value) {
            self.mark_object(as_object(value));
        }
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key as *mut Object);
            self.mark_value(&value);
        }
    }

    pub fn mark_set(&mut self, set: &Set) {
        for key in set.iter() {
            self.mark_object(key as *mut Object);
        }
    }

    /// Roots: every occupied stack slot, every frame's closure, every entry
    /// in the globals table, and every open upvalue. The interning table is
    /// deliberately absent — it holds strings weakly.
    pub fn mark_roots(
        &mut self,
        stack: &[Value],
        globals: &Table,
        frames: &[CallFrame],
        open_upvalues: &[*mut ObjectUpvalue],
    ) {
        for value in stack {
            self.mark_value(value);
        }
        for frame in frames {
            self.mark_object(frame.closure as *mut Object);
        }
        self.mark_table(globals);
        for &upvalue in open_upvalues {
            self.mark_object(upvalue as *mut Object);
        }
    }

    /// Drains the gray worklist until every reachable object is black.
    pub fn trace_references(&mut self) {
        while let Some(object) = self.gray_stack.pop() {
            gc_trace!("blacken {:p}", object);
            unsafe {
                self.blacken_object(object);
            }
        }
    }

    unsafe fn blacken_object(&mut self, object: *mut Object) {
        match (*object).obj_type {
            ObjectType::ObjString | ObjectType::ObjNativeFunction => {}
            ObjectType::ObjFunction => {
                let function = (*object).as_function();
                for constant in function.chunk.iter_constants() {
                    self.mark_value(constant);
                }
            }
            ObjectType::ObjClosure => {
                let closure = (*object).as_closure();
                self.mark_object(closure.function as *mut Object);
                for &upvalue in &closure.upvalues {
                    self.mark_object(upvalue as *mut Object);
                }
            }
            ObjectType::ObjUpvalue => {
                let upvalue = (*object).as_upvalue();
                self.mark_value(&upvalue.closed);
            }
            ObjectType::ObjClass => {
                let class = (*object).as_class();
                self.mark_table(&class.methods);
                self.mark_set(&class.fields);
            }
            ObjectType::ObjInstance => {
                let instance = (*object).as_instance();
                self.mark_object(instance.class as *mut Object);
                self.mark_table(&instance.fields);
            }
            ObjectType::ObjBoundMethod => {
                let bound = (*object).as_bound_method();
                self.mark_value(&bound.receiver);
                self.mark_object(bound.method as *mut Object);
            }
        }
    }

    /// Record a completed GC cycle (invoked by the VM, which knows bytes
    /// before/after and the new threshold).
    pub fn record_cycle(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.stats.record(before, freed, after, next_trigger);
        gc_trace!(
            "cycle summary cycles={} freed={} before={} after={} next_trigger={}",
            self.stats.cycles,
            freed,
            before,
            after,
            next_trigger
        );
    }

    pub fn stats(&self) -> &GCStats {
        &self.stats
    }
}
