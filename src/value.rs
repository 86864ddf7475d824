use crate::objects::object::{Object, ObjectType};
use crate::objects::object_bound_method::ObjectBoundMethod;
use crate::objects::object_class::ObjectClass;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;
use crate::objects::object_instance::ObjectInstance;
use crate::objects::object_manager::ObjectManager;
use crate::objects::object_native_function::ObjectNativeFunction;
use crate::objects::object_string::ObjectString;
use crate::table::Table;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    ValueNull,
    ValueBool,
    ValueNumber,
    ValueObject,
}

#[derive(Clone, Copy)]
pub union ValueUnion {
    pub boolean: bool,
    pub number: f64,
    pub object: *mut Object,
}

/// Copy-cheap tagged value. Equality is structural for primitives and by
/// identity for objects; interning makes identity equality correct for
/// strings too.
#[derive(Clone, Copy)]
pub struct Value {
    pub value_type: ValueType,
    pub value_as: ValueUnion,
}

impl Value {
    pub fn new() -> Value {
        make_null_value()
    }
}

impl Default for Value {
    fn default() -> Value {
        make_null_value()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        values_equal(self, other)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_value(self))
    }
}

pub fn make_null_value() -> Value {
    Value {
        value_type: ValueType::ValueNull,
        value_as: ValueUnion { number: 0.0 },
    }
}

pub fn make_bool_value(boolean: bool) -> Value {
    Value {
        value_type: ValueType::ValueBool,
        value_as: ValueUnion { boolean },
    }
}

pub fn make_number_value(number: f64) -> Value {
    Value {
        value_type: ValueType::ValueNumber,
        value_as: ValueUnion { number },
    }
}

pub fn make_object_value(object: *mut Object) -> Value {
    Value {
        value_type: ValueType::ValueObject,
        value_as: ValueUnion { object },
    }
}

pub fn make_function_value(function: *mut ObjectFunction) -> Value {
    make_object_value(function as *mut Object)
}

/// Interning-aware string constructor; the returned value always refers to
/// the canonical string object for the given content.
pub fn make_string_value(
    object_manager: &mut ObjectManager,
    intern_strings: &mut Table,
    content: &str,
) -> Value {
    let string = object_manager.copy_string(intern_strings, content);
    make_object_value(string as *mut Object)
}

pub fn is_null(value: &Value) -> bool {
    value.value_type == ValueType::ValueNull
}

pub fn is_bool(value: &Value) -> bool {
    value.value_type == ValueType::ValueBool
}

pub fn is_number(value: &Value) -> bool {
    value.value_type == ValueType::ValueNumber
}

pub fn is_object(value: &Value) -> bool {
    value.value_type == ValueType::ValueObject
}

fn is_object_type(value: &Value, obj_type: ObjectType) -> bool {
    is_object(value) && unsafe { (*as_object(value)).obj_type == obj_type }
}

pub fn is_string(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjString)
}

pub fn is_function(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjFunction)
}

pub fn is_closure(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjClosure)
}

pub fn is_class(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjClass)
}

pub fn is_instance(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjInstance)
}

pub fn as_bool(value: &Value) -> bool {
    unsafe { value.value_as.boolean }
}

pub fn as_number(value: &Value) -> f64 {
    unsafe { value.value_as.number }
}

pub fn as_object(value: &Value) -> *mut Object {
    unsafe { value.value_as.object }
}

pub fn as_string(value: &Value) -> *mut ObjectString {
    as_object(value) as *mut ObjectString
}

pub fn as_function(value: &Value) -> *mut ObjectFunction {
    as_object(value) as *mut ObjectFunction
}

pub fn as_closure(value: &Value) -> *mut ObjectClosure {
    as_object(value) as *mut ObjectClosure
}

pub fn as_class(value: &Value) -> *mut ObjectClass {
    as_object(value) as *mut ObjectClass
}

pub fn as_instance(value: &Value) -> *mut ObjectInstance {
    as_object(value) as *mut ObjectInstance
}

pub fn values_equal(left: &Value, right: &Value) -> bool {
    if left.value_type != right.value_type {
        return false;
    }
    match left.value_type {
        ValueType::ValueNull => true,
        ValueType::ValueBool => as_bool(left) == as_bool(right),
        ValueType::ValueNumber => as_number(left) == as_number(right),
        ValueType::ValueObject => as_object(left) == as_object(right),
    }
}

pub fn format_function(function: &ObjectFunction) -> String {
    if function.name.is_empty() {
        "<script>".to_string()
    } else {
        format!("<fn {}>", function.name)
    }
}

pub fn format_value(value: &Value) -> String {
    match value.value_type {
        ValueType::ValueNull => "null".to_string(),
        ValueType::ValueBool => as_bool(value).to_string(),
        ValueType::ValueNumber => format!("{}", as_number(value)),
        ValueType::ValueObject => format_object(value),
    }
}

fn format_object(value: &Value) -> String {
    let object = as_object(value);
    unsafe {
        match (*object).obj_type {
            ObjectType::ObjString => (*(object as *mut ObjectString)).content.clone(),
            ObjectType::ObjFunction => format_function(&*(object as *mut ObjectFunction)),
            ObjectType::ObjClosure => {
                let closure = &*(object as *mut ObjectClosure);
                format_function(&*closure.function)
            }
            ObjectType::ObjUpvalue => "upvalue".to_string(),
            ObjectType::ObjNativeFunction => {
                let native = &*(object as *mut ObjectNativeFunction);
                format!("<native fn {}>", native.name)
            }
            ObjectType::ObjClass => (*(object as *mut ObjectClass)).name.clone(),
            ObjectType::ObjInstance => {
                let instance = &*(object as *mut ObjectInstance);
                format!("{} instance", (*instance.class).name)
            }
            ObjectType::ObjBoundMethod => {
                let bound = &*(object as *mut ObjectBoundMethod);
                format_function(&*(*bound.method).function)
            }
        }
    }
}

pub fn print_value(value: &Value) {
    print!("{}", format_value(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    #[test]
    fn test_primitive_equality() {
        assert!(values_equal(&make_null_value(), &make_null_value()));
        assert!(values_equal(&make_bool_value(true), &make_bool_value(true)));
        assert!(!values_equal(&make_bool_value(true), &make_bool_value(false)));
        assert!(values_equal(&make_number_value(1.5), &make_number_value(1.5)));
        assert!(!values_equal(&make_number_value(1.5), &make_number_value(2.5)));
        // Values of different types never compare equal.
        assert!(!values_equal(&make_bool_value(false), &make_null_value()));
        assert!(!values_equal(&make_number_value(0.0), &make_null_value()));
    }

    #[test]
    fn test_string_identity_equality() {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();
        let a = make_string_value(&mut object_manager, &mut intern_strings, "same");
        let b = make_string_value(&mut object_manager, &mut intern_strings, "same");
        let c = make_string_value(&mut object_manager, &mut intern_strings, "other");
        assert!(values_equal(&a, &b));
        assert!(!values_equal(&a, &c));
    }

    #[test]
    fn test_format_numbers() {
        assert_eq!(format_value(&make_number_value(7.0)), "7");
        assert_eq!(format_value(&make_number_value(0.5)), "0.5");
        assert_eq!(format_value(&make_number_value(-3.0)), "-3");
    }

    #[test]
    fn test_format_string_and_null() {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();
        let value = make_string_value(&mut object_manager, &mut intern_strings, "hello");
        assert_eq!(format_value(&value), "hello");
        assert_eq!(format_value(&make_null_value()), "null");
        assert_eq!(format_value(&make_bool_value(false)), "false");
    }
}
