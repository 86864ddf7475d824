use std::io::{self, Write};

use crate::call_frame::CallFrame;
use crate::chunk::OpCode;
use crate::compiler::Parser;
use crate::gc::{gc_trace, GarbageCollector};
use crate::memory::{GC_HEAP_GROWTH_FACTOR, INITIAL_GC_THRESHOLD};
use crate::objects::object::{Object, ObjectType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_native_function::{NativeFn, ObjectNativeFunction};
use crate::objects::object_string::ObjectString;
use crate::objects::object_upvalue::ObjectUpvalue;
use crate::std_mod::time::clock_native;
use crate::table::Table;
use crate::value::{
    as_bool, as_class, as_closure, as_function, as_instance, as_number, as_object, as_string,
    format_value, is_bool, is_instance, is_number, is_object, is_string, make_bool_value,
    make_function_value, make_number_value, make_object_value, Value,
};

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

macro_rules! vm_push {
    ($vm:expr, $value:expr) => {
        if !$vm.push($value) {
            $vm.runtime_error("Stack overflow.");
            return InterpretResult::InterpretRuntimeErr;
        }
    };
}

pub struct VM {
    frames: Vec<CallFrame>,
    stack: Box<[Value]>,
    stack_top_pos: usize,
    globals: Table,
    intern_strings: Table,
    object_manager: ObjectManager,
    gc: GarbageCollector,
    open_upvalues: Vec<*mut ObjectUpvalue>,
    next_gc: usize,
    output: Box<dyn Write>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InterpretResult {
    InterpretOk,
    InterpretCompileErr,
    InterpretRuntimeErr,
}

impl VM {
    pub fn new() -> Box<VM> {
        VM::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(output: Box<dyn Write>) -> Box<VM> {
        let mut vm = Box::new(VM {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: vec![Value::new(); STACK_MAX].into_boxed_slice(),
            stack_top_pos: 0,
            globals: Table::new(),
            intern_strings: Table::new(),
            object_manager: ObjectManager::new(),
            gc: GarbageCollector::new(),
            open_upvalues: vec![],
            next_gc: INITIAL_GC_THRESHOLD,
            output,
        });
        vm.define_native("clock", clock_native);
        vm
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = {
            let mut parser = Parser::new(&mut self.object_manager, &mut self.intern_strings);
            match parser.compile(source) {
                Some(function) => function,
                None => return InterpretResult::InterpretCompileErr,
            }
        };

        // The script function is wrapped in a closure and called like any
        // other zero-argument function.
        self.push(make_function_value(function));
        let closure = self.object_manager.alloc_closure(function);
        self.pop();
        self.push(make_object_value(closure as *mut Object));
        if !self.call(closure, 0) {
            return InterpretResult::InterpretRuntimeErr;
        }

        self.run()
    }

    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_string = self
            .object_manager
            .copy_string(&mut self.intern_strings, name);
        let native = self.object_manager.alloc_native_function(name, function);
        self.globals
            .insert(name_string, make_object_value(native as *mut Object));
    }

    fn reset_stack(&mut self) {
        self.stack_top_pos = 0;
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn push(&mut self, value: Value) -> bool {
        if self.stack_top_pos < STACK_MAX {
            self.stack[self.stack_top_pos] = value;
            self.stack_top_pos += 1;
            true
        } else {
            false
        }
    }

    fn pop(&mut self) -> Value {
        debug_assert!(self.stack_top_pos > 0, "stack underflow");
        self.stack_top_pos -= 1;
        self.stack[self.stack_top_pos]
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack_top_pos - 1 - distance]
    }

    /// Formats the message and walks the frame stack top-down, then resets
    /// the value stack; the caller aborts interpretation.
    fn runtime_error(&mut self, message: &str) {
        eprintln!("{}", message);

        for frame in self.frames.iter().rev() {
            let function = unsafe { frame.function() };
            let line = function.chunk.get_line(frame.ip.saturating_sub(1));
            if function.name.is_empty() {
                eprintln!("[line {}] in script", line);
            } else {
                eprintln!("[line {}] in {}()", line, function.name);
            }
        }

        self.reset_stack();
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active call frame");
        let byte = unsafe { (&(*(*frame.closure).function).chunk.code)[frame.ip] };
        frame.ip += 1;
        byte
    }

    fn read_word(&mut self) -> u16 {
        let low = self.read_byte() as u16;
        let high = self.read_byte() as u16;
        low | (high << 8)
    }

    /// Constant-style operand: marker byte, then 1 or 3 little-endian index
    /// bytes. Shared by every index-carrying instruction.
    fn read_index(&mut self) -> usize {
        if self.read_byte() == OpCode::Const.to_byte() {
            self.read_byte() as usize
        } else {
            let b0 = self.read_byte() as usize;
            let b1 = self.read_byte() as usize;
            let b2 = self.read_byte() as usize;
            b0 | (b1 << 8) | (b2 << 16)
        }
    }

    fn constant_at(&self, index: usize) -> Value {
        let frame = self.frames.last().expect("no active call frame");
        unsafe { *(*(*frame.closure).function).chunk.get_constant(index) }
    }

    fn read_string(&mut self) -> *mut ObjectString {
        let index = self.read_index();
        as_string(&self.constant_at(index))
    }

    fn current_base(&self) -> usize {
        self.frames.last().expect("no active call frame").stack_base
    }

    fn run(&mut self) -> InterpretResult {
        loop {
            debug_feature::trace_instruction(self);

            if self.should_collect() {
                self.collect_garbage();
            }

            let instruction = match OpCode::from_byte(self.read_byte()) {
                Some(instruction) => instruction,
                None => {
                    self.runtime_error("Unknown opcode.");
                    return InterpretResult::InterpretRuntimeErr;
                }
            };

            match instruction {
                OpCode::Const => {
                    let index = self.read_byte() as usize;
                    let constant = self.constant_at(index);
                    vm_push!(self, constant);
                }
                OpCode::ConstLong => {
                    let b0 = self.read_byte() as usize;
                    let b1 = self.read_byte() as usize;
                    let b2 = self.read_byte() as usize;
                    let constant = self.constant_at(b0 | (b1 << 8) | (b2 << 16));
                    vm_push!(self, constant);
                }
                OpCode::Null => {
                    vm_push!(self, Value::new());
                }
                OpCode::True => {
                    vm_push!(self, make_bool_value(true));
                }
                OpCode::False => {
                    vm_push!(self, make_bool_value(false));
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_index();
                    let value = self.stack[self.current_base() + slot];
                    vm_push!(self, value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_index();
                    let base = self.current_base();
                    let value = self.peek(0);
                    self.stack[base + slot] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(name) {
                        Some(value) => vm_push!(self, value),
                        None => {
                            let message = format!("Undefined variable '{}'.", unsafe {
                                &(*name).content
                            });
                            self.runtime_error(&message);
                            return InterpretResult::InterpretRuntimeErr;
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    self.globals.insert(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    if self.globals.insert(name, value) {
                        self.globals.remove(name);
                        let message =
                            format!("Undefined variable '{}'.", unsafe { &(*name).content });
                        self.runtime_error(&message);
                        return InterpretResult::InterpretRuntimeErr;
                    }
                }
                OpCode::GetUpvalue => {
                    let index = self.read_index();
                    let frame = self.frames.last().expect("no active call frame");
                    let upvalue = unsafe { (&(*frame.closure).upvalues)[index] };
                    let value = unsafe { *(*upvalue).location };
                    vm_push!(self, value);
                }
                OpCode::SetUpvalue => {
                    let index = self.read_index();
                    let frame = self.frames.last().expect("no active call frame");
                    let upvalue = unsafe { (&(*frame.closure).upvalues)[index] };
                    unsafe {
                        *(*upvalue).location = self.peek(0);
                    }
                }
                OpCode::GetProperty => {
                    if !is_instance(&self.peek(0)) {
                        self.runtime_error("Properties are defined for instances only.");
                        return InterpretResult::InterpretRuntimeErr;
                    }

                    let name = self.read_string();
                    let instance = as_instance(&self.peek(0));
                    if let Some(value) = unsafe { (*instance).fields.get(name) } {
                        self.pop();
                        self.push(value);
                    } else if let Some(method) = unsafe { (*(*instance).class).methods.get(name) } {
                        // Field miss falls back to the class method table and
                        // binds the receiver.
                        let receiver = self.peek(0);
                        let bound = self
                            .object_manager
                            .alloc_bound_method(receiver, as_closure(&method));
                        self.pop();
                        self.push(make_object_value(bound as *mut Object));
                    } else {
                        let message =
                            format!("Undefined property '{}'.", unsafe { &(*name).content });
                        self.runtime_error(&message);
                        return InterpretResult::InterpretRuntimeErr;
                    }
                }
                OpCode::SetProperty => {
                    if !is_instance(&self.peek(1)) {
                        self.runtime_error("Properties are defined for instances only.");
                        return InterpretResult::InterpretRuntimeErr;
                    }

                    let name = self.read_string();
                    let instance = as_instance(&self.peek(1));
                    if !unsafe { (*(*instance).class).fields.contains(name) } {
                        let message =
                            format!("Undefined property '{}'.", unsafe { &(*name).content });
                        self.runtime_error(&message);
                        return InterpretResult::InterpretRuntimeErr;
                    }

                    let value = self.peek(0);
                    unsafe {
                        (*instance).fields.insert(name, value);
                    }
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::DefineProperty => {
                    let name = self.read_string();
                    let class = as_class(&self.peek(0));
                    if unsafe { (*class).fields.contains(name) } {
                        let message =
                            format!("Field {} is already defined.", unsafe { &(*name).content });
                        self.runtime_error(&message);
                        return InterpretResult::InterpretRuntimeErr;
                    }
                    unsafe {
                        (*class).fields.insert(name);
                    }
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class_name = unsafe { (*name).content.clone() };
                    let class = self.object_manager.alloc_class(&class_name);
                    vm_push!(self, make_object_value(class as *mut Object));
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek(0);
                    let class = as_class(&self.peek(1));
                    unsafe {
                        (*class).methods.insert(name, method);
                    }
                    self.pop();
                }
                OpCode::Closure => {
                    let index = self.read_index();
                    let constant = self.constant_at(index);
                    let function = as_function(&constant);
                    let closure = self.object_manager.alloc_closure(function);
                    vm_push!(self, make_object_value(closure as *mut Object));

                    let upvalue_count = unsafe { (*function).upvalue_count };
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_index();
                        let upvalue = if is_local {
                            let slot = self.current_base() + index;
                            self.capture_upvalue(slot)
                        } else {
                            let frame = self.frames.last().expect("no active call frame");
                            unsafe { (&(*frame.closure).upvalues)[index] }
                        };
                        unsafe {
                            (*closure).upvalues.push(upvalue);
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack_top_pos - 1);
                    self.pop();
                }
                OpCode::Call => {
                    let argument_count = self.read_byte() as usize;
                    let callee = self.peek(argument_count);
                    if !self.call_value(callee, argument_count) {
                        return InterpretResult::InterpretRuntimeErr;
                    }
                }
                OpCode::Ret => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no active call frame");
                    self.close_upvalues(frame.stack_base);
                    if self.frames.is_empty() {
                        self.pop();
                        return InterpretResult::InterpretOk;
                    }
                    self.stack_top_pos = frame.stack_base;
                    self.push(result);
                }
                OpCode::Jmp => {
                    let target = self.read_word() as usize;
                    self.frames.last_mut().expect("no active call frame").ip = target;
                }
                OpCode::JmpIfFalse => {
                    let target = self.read_word() as usize;
                    let condition = self.peek(0);
                    if !self.check_bool(&condition) {
                        return InterpretResult::InterpretRuntimeErr;
                    }
                    if !as_bool(&condition) {
                        self.frames.last_mut().expect("no active call frame").ip = target;
                    }
                }
                OpCode::Not => {
                    let operand = self.peek(0);
                    if !self.check_bool(&operand) {
                        return InterpretResult::InterpretRuntimeErr;
                    }
                    let operand = self.pop();
                    self.push(make_bool_value(!as_bool(&operand)));
                }
                OpCode::Neg => {
                    if !is_number(&self.peek(0)) {
                        self.runtime_error("Operand must be a number.");
                        return InterpretResult::InterpretRuntimeErr;
                    }
                    let operand = self.pop();
                    self.push(make_number_value(-as_number(&operand)));
                }
                OpCode::Eq => {
                    let right = self.pop();
                    let left = self.pop();
                    self.push(make_bool_value(left == right));
                }
                OpCode::Gt | OpCode::Lt | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    if !self.binary_number_op(instruction) {
                        return InterpretResult::InterpretRuntimeErr;
                    }
                }
                OpCode::Add => {
                    if is_string(&self.peek(0)) && is_string(&self.peek(1)) {
                        self.concat();
                    } else if is_number(&self.peek(0)) && is_number(&self.peek(1)) {
                        let right = as_number(&self.pop());
                        let left = as_number(&self.pop());
                        self.push(make_number_value(left + right));
                    } else {
                        self.runtime_error("Operands must be two numbers or two strings.");
                        return InterpretResult::InterpretRuntimeErr;
                    }
                }
                OpCode::Print => {
                    let value = self.pop();
                    writeln!(self.output, "{}", format_value(&value))
                        .expect("Failed to write output");
                }
            }
        }
    }

    fn binary_number_op(&mut self, op_code: OpCode) -> bool {
        if !is_number(&self.peek(0)) || !is_number(&self.peek(1)) {
            self.runtime_error("Operands must be numbers.");
            return false;
        }

        let right = as_number(&self.pop());
        let left = as_number(&self.pop());
        match op_code {
            OpCode::Gt => self.push(make_bool_value(left > right)),
            OpCode::Lt => self.push(make_bool_value(left < right)),
            OpCode::Sub => self.push(make_number_value(left - right)),
            OpCode::Mul => self.push(make_number_value(left * right)),
            OpCode::Div => self.push(make_number_value(left / right)),
            _ => unreachable!("Unexpected binary operator: {}", op_code),
        };
        true
    }

    fn check_bool(&mut self, value: &Value) -> bool {
        if !is_bool(value) {
            self.runtime_error("Operand must be a boolean.");
            return false;
        }
        true
    }

    /// String concatenation goes through `take_string`, so the result is
    /// interned and a duplicate buffer is released. Operands stay on the
    /// stack until the result exists.
    fn concat(&mut self) {
        let right = as_string(&self.peek(0));
        let left = as_string(&self.peek(1));
        let combined = unsafe {
            let mut combined =
                String::with_capacity((&(*left).content).len() + (&(*right).content).len());
            combined.push_str(&(*left).content);
            combined.push_str(&(*right).content);
            combined
        };
        let result = self
            .object_manager
            .take_string(&mut self.intern_strings, combined);
        self.pop();
        self.pop();
        self.push(make_object_value(result as *mut Object));
    }

    fn call_value(&mut self, callee: Value, argument_count: usize) -> bool {
        if is_object(&callee) {
            match unsafe { (*as_object(&callee)).obj_type } {
                ObjectType::ObjClosure => {
                    return self.call(as_closure(&callee), argument_count);
                }
                ObjectType::ObjClass => {
                    // The callee slot becomes the new empty instance; the
                    // class is its own constructor site.
                    if argument_count != 0 {
                        let message = format!("Expected 0 arguments but got {}.", argument_count);
                        self.runtime_error(&message);
                        return false;
                    }
                    let class = as_class(&callee);
                    let instance = self.object_manager.alloc_instance(class);
                    self.stack[self.stack_top_pos - 1] =
                        make_object_value(instance as *mut Object);
                    return true;
                }
                ObjectType::ObjBoundMethod => {
                    let bound = as_object(&callee) as *mut ObjectBoundMethod;
                    let (receiver, method) = unsafe { ((*bound).receiver, (*bound).method) };
                    self.stack[self.stack_top_pos - argument_count - 1] = receiver;
                    return self.call(method, argument_count);
                }
                ObjectType::ObjNativeFunction => {
                    let native = as_object(&callee) as *mut ObjectNativeFunction;
                    let args_start = self.stack_top_pos - argument_count;
                    let result = unsafe {
                        ((*native).function)(&self.stack[args_start..self.stack_top_pos])
                    };
                    self.stack_top_pos -= argument_count + 1;
                    self.push(result);
                    return true;
                }
                _ => {}
            }
        }

        self.runtime_error("Can only call functions and classes.");
        false
    }

    fn call(&mut self, closure: *mut ObjectClosure, argument_count: usize) -> bool {
        let arity = unsafe { (*(*closure).function).arity } as usize;
        if argument_count != arity {
            let message = format!("Expected {} arguments but got {}.", arity, argument_count);
            self.runtime_error(&message);
            return false;
        }

        if self.frames.len() == FRAMES_MAX {
            self.runtime_error("Stack overflow.");
            return false;
        }

        self.frames.push(CallFrame::new(
            closure,
            self.stack_top_pos - argument_count - 1,
        ));
        true
    }

    /// Finds or creates the open upvalue for a stack slot. The open list is
    /// kept in strictly descending address order and never holds two
    /// entries for the same slot.
    fn capture_upvalue(&mut self, slot: usize) -> *mut ObjectUpvalue {
        let location = unsafe { self.stack.as_mut_ptr().add(slot) };

        let mut insert_at = self.open_upvalues.len();
        for (index, &upvalue) in self.open_upvalues.iter().enumerate() {
            let open_location = unsafe { (*upvalue).location };
            if open_location == location {
                return upvalue;
            }
            if open_location < location {
                insert_at = index;
                break;
            }
        }

        let created = self.object_manager.alloc_upvalue(location);
        self.open_upvalues.insert(insert_at, created);
        created
    }

    /// Migrates every open upvalue at or above the given stack slot into its
    /// own heap storage and delists it.
    fn close_upvalues(&mut self, from_slot: usize) {
        let limit = unsafe { self.stack.as_mut_ptr().add(from_slot) };
        while let Some(&upvalue) = self.open_upvalues.first() {
            unsafe {
                if (*upvalue).location < limit {
                    break;
                }
                (*upvalue).close();
            }
            self.open_upvalues.remove(0);
        }
    }

    fn should_collect(&self) -> bool {
        if cfg!(feature = "gc_stress") {
            return true;
        }
        self.object_manager.bytes_allocated() > self.next_gc
    }

    /// Full collection cycle: mark roots, trace, evict dead interned
    /// strings, sweep, and rescale the trigger threshold.
    fn collect_garbage(&mut self) {
        let before = self.object_manager.bytes_allocated();
        gc_trace!("collection begin, {} bytes live", before);

        self.gc.mark_roots(
            &self.stack[0..self.stack_top_pos],
            &self.globals,
            &self.frames,
            &self.open_upvalues,
        );
        self.gc.trace_references();
        self.intern_strings.remove_white();
        let freed = self.object_manager.sweep();

        let after = self.object_manager.bytes_allocated();
        self.next_gc = after * GC_HEAP_GROWTH_FACTOR;
        self.gc.record_cycle(before, freed, after, self.next_gc);
    }
}

#[cfg(feature = "debug_trace_execution")]
mod debug_feature {
    use super::*;
    use crate::debug;
    use crate::value::print_value;

    pub fn trace_instruction(vm: &VM) {
        print!("{: >10}", "");
        for slot in &vm.stack[0..vm.stack_top_pos] {
            print!(" [ ");
            print_value(slot);
            print!(" ]");
        }
        println!();
        if let Some(frame) = vm.frames.last() {
            let function = unsafe { frame.function() };
            debug::disassemble_instruction(&function.chunk, frame.ip);
        }
    }
}

#[cfg(not(feature = "debug_trace_execution"))]
mod debug_feature {
    use super::*;

    pub fn trace_instruction(_vm: &VM) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capturing_vm() -> (Box<VM>, Rc<RefCell<Vec<u8>>>) {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        let vm = VM::with_output(Box::new(SharedOutput(buffer.clone())));
        (vm, buffer)
    }

    fn run_source(source: &str) -> (InterpretResult, String) {
        let (mut vm, buffer) = capturing_vm();
        let result = vm.interpret(source);
        let output = String::from_utf8(buffer.borrow().clone()).expect("utf-8 output");
        (result, output)
    }

    #[test]
    fn test_arithmetic_precedence() {
        let (result, output) = run_source("print 1 + 2 * 3;");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "7\n");
    }

    #[test]
    fn test_grouping_and_unary() {
        let (result, output) = run_source("print -(1 + 2) * 3;");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "-9\n");
    }

    #[test]
    fn test_interned_strings_compare_equal() {
        let (result, output) = run_source("let a = \"foo\"; let b = \"foo\"; print a == b;");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "true\n");
    }

    #[test]
    fn test_string_concatenation_is_interned() {
        let (result, output) = run_source(
            "let a = \"foo\" + \"bar\";
             let b = \"foobar\";
             print a;
             print a == b;",
        );
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "foobar\ntrue\n");
    }

    #[test]
    fn test_closure_captures_and_closes_upvalue() {
        let (result, output) = run_source(
            "fn mk() {
                 let x = 1;
                 fn get() { return x; }
                 return get;
             }
             let g = mk();
             print g();",
        );
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "1\n");
    }

    #[test]
    fn test_sibling_closures_share_one_upvalue() {
        let (result, output) = run_source(
            "fn mk() {
                 let x = 0;
                 fn set(v) { x = v; }
                 fn get() { return x; }
                 set(41);
                 x = x + 1;
                 return get;
             }
             print mk()();",
        );
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "42\n");
    }

    #[test]
    fn test_while_loop() {
        let (result, output) = run_source("let i = 0; while i < 3 { print i; i = i + 1; }");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn test_for_loop_with_step() {
        let (result, output) =
            run_source("for (let i = 0; i < 3; i = i + 1) { print i; }");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn test_if_else_branches() {
        let (result, output) = run_source(
            "if false { print 1; } else { print 2; }
             if true { print 3; }
             if false { print 4; } else if true { print 5; }",
        );
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "2\n3\n5\n");
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        let (result, output) = run_source(
            "print true && false;
             print false || true;
             let touched = false;
             fn side() { touched = true; return true; }
             print false && side();
             print touched;",
        );
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "false\ntrue\nfalse\nfalse\n");
    }

    #[test]
    fn test_nested_calls() {
        let (result, output) = run_source("fn f(a) { return a + 1; } print f(f(f(0)));");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "3\n");
    }

    #[test]
    fn test_function_without_return_yields_null() {
        let (result, output) = run_source("fn f() { } print f();");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "null\n");
    }

    #[test]
    fn test_class_fields_and_methods() {
        let (result, output) = run_source(
            "class P {
                 let name;
                 fn greet() { print self.name; }
             }
             let p = P();
             p.name = \"ok\";
             p.greet();",
        );
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "ok\n");
    }

    #[test]
    fn test_method_mutating_receiver_through_self() {
        let (result, output) = run_source(
            "class Counter {
                 let n;
                 fn bump() { self.n = self.n + 1; }
                 fn get() { return self.n; }
             }
             let c = Counter();
             c.n = 0;
             c.bump();
             c.bump();
             print c.get();",
        );
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "2\n");
    }

    #[test]
    fn test_undeclared_field_assignment_fails() {
        let (result, output) = run_source(
            "class P { let name; }
             let p = P();
             p.other = 1;",
        );
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
        assert_eq!(output, "");
    }

    #[test]
    fn test_undefined_property_read_fails() {
        let (result, _) = run_source(
            "class P { let name; }
             let p = P();
             print p.name;",
        );
        // Declared but never assigned fields are absent from the instance.
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
    }

    #[test]
    fn test_duplicate_field_definition_fails() {
        let (result, _) = run_source("class P { let name; let name; }");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
    }

    #[test]
    fn test_class_call_with_arguments_fails() {
        let (result, _) = run_source("class P { } let p = P(1);");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
    }

    #[test]
    fn test_strict_truthiness() {
        let (result, _) = run_source("if 1 { print 1; }");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
        let (result, _) = run_source("print !1;");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
        let (result, _) = run_source("if null { print 1; }");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
    }

    #[test]
    fn test_type_errors_abort() {
        for source in [
            "print 1 + \"a\";",
            "print \"a\" - \"b\";",
            "print 1 < \"a\";",
            "print -true;",
            "print null();",
            "let a = 1; a();",
        ] {
            let (result, _) = run_source(source);
            assert_eq!(
                result,
                InterpretResult::InterpretRuntimeErr,
                "expected runtime error for {:?}",
                source
            );
        }
    }

    #[test]
    fn test_mixed_type_equality_is_false() {
        let (result, output) = run_source("print 1 == true; print null == null;");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "false\ntrue\n");
    }

    #[test]
    fn test_undefined_variable() {
        let (result, _) = run_source("print missing;");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
        let (result, _) = run_source("missing = 1;");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
    }

    #[test]
    fn test_arity_mismatch() {
        let (result, _) = run_source("fn f(a, b) { return a; } f(1);");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
    }

    #[test]
    fn test_frame_overflow_reports_stack_overflow() {
        let (result, _) = run_source("fn f() { f(); } f();");
        assert_eq!(result, InterpretResult::InterpretRuntimeErr);
    }

    #[test]
    fn test_compile_error_status() {
        let (result, output) = run_source("let = 1;");
        assert_eq!(result, InterpretResult::InterpretCompileErr);
        assert_eq!(output, "");
    }

    #[test]
    fn test_globals_persist_across_interpretations() {
        let (mut vm, buffer) = capturing_vm();
        assert_eq!(vm.interpret("let a = 40;"), InterpretResult::InterpretOk);
        assert_eq!(vm.interpret("a = a + 2;"), InterpretResult::InterpretOk);
        assert_eq!(vm.interpret("print a;"), InterpretResult::InterpretOk);
        let output = String::from_utf8(buffer.borrow().clone()).expect("utf-8 output");
        assert_eq!(output, "42\n");
    }

    #[test]
    fn test_stack_is_neutral_after_interpretation() {
        let (mut vm, _buffer) = capturing_vm();
        assert_eq!(
            vm.interpret("1 + 2; \"a\" + \"b\"; let x = 3; x == 3;"),
            InterpretResult::InterpretOk
        );
        assert_eq!(vm.stack_top_pos, 0);
        assert!(vm.frames.is_empty());
        assert!(vm.open_upvalues.is_empty());
    }

    #[test]
    fn test_collection_preserves_reachable_state() {
        let (mut vm, buffer) = capturing_vm();
        assert_eq!(
            vm.interpret("let s = \"a\" + \"b\"; let t = \"garbage\" + \"heap\";"),
            InterpretResult::InterpretOk
        );
        let before = vm.object_manager.bytes_allocated();
        assert!(before > 0);
        vm.collect_garbage();
        assert_eq!(vm.gc.stats().cycles, 1);
        assert_eq!(vm.interpret("print s; print t;"), InterpretResult::InterpretOk);
        let output = String::from_utf8(buffer.borrow().clone()).expect("utf-8 output");
        assert_eq!(output, "ab\ngarbageheap\n");
    }

    #[test]
    fn test_collection_frees_unreachable_objects() {
        let (mut vm, _buffer) = capturing_vm();
        assert_eq!(
            vm.interpret(
                "fn churn() {
                     let i = 0;
                     while i < 50 {
                         let dropped = \"chunk\" + \"chunk\";
                         i = i + 1;
                     }
                 }
                 churn();"
            ),
            InterpretResult::InterpretOk
        );
        let before_count = vm.object_manager.iter().count();
        vm.collect_garbage();
        let after_count = vm.object_manager.iter().count();
        assert!(after_count <= before_count);
        // The VM still runs fine after a full cycle.
        assert_eq!(vm.interpret("print 1 + 1;"), InterpretResult::InterpretOk);
    }

    #[test]
    fn test_open_upvalue_order_is_descending() {
        let (mut vm, buffer) = capturing_vm();
        // Two captured locals in one frame create two simultaneously-open
        // upvalues; the later (higher) slot must sort first.
        assert_eq!(
            vm.interpret(
                "fn mk() {
                     let low = 1;
                     let high = 2;
                     fn both() { return low + high; }
                     print both();
                     return both;
                 }
                 let b = mk();
                 print b();"
            ),
            InterpretResult::InterpretOk
        );
        let output = String::from_utf8(buffer.borrow().clone()).expect("utf-8 output");
        assert_eq!(output, "3\n3\n");
    }

    #[test]
    fn test_native_clock_returns_number() {
        let (result, output) = run_source("print clock() >= 0;");
        assert_eq!(result, InterpretResult::InterpretOk);
        assert_eq!(output, "true\n");
    }

    #[test]
    fn test_determinism() {
        let source = "let i = 0;
                      let acc = \"\";
                      while i < 5 {
                          acc = acc + \"x\";
                          i = i + 1;
                      }
                      print acc;
                      print i * 2;";
        let (first_result, first_output) = run_source(source);
        let (second_result, second_output) = run_source(source);
        assert_eq!(first_result, InterpretResult::InterpretOk);
        assert_eq!(second_result, InterpretResult::InterpretOk);
        assert_eq!(first_output, second_output);
        assert_eq!(first_output, "xxxxx\n10\n");
    }
}
