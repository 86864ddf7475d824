use crate::objects::object::{Object, ObjectType};
use crate::table::{Set, Table};

/// Class object: name, method table (name to closure), and the schema of
/// permitted field names. Instances may only read or write fields the
/// schema declares.
#[repr(C)]
pub struct ObjectClass {
    pub object: Object,
    pub name: String,
    pub methods: Table,
    pub fields: Set,
}

impl ObjectClass {
    pub fn new(name: &str) -> ObjectClass {
        ObjectClass {
            object: Object::new(ObjectType::ObjClass),
            name: name.to_string(),
            methods: Table::new(),
            fields: Set::new(),
        }
    }
}
