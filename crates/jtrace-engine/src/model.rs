//! Captured program state.
//!
//! A snapshot is a flat arena: the heap maps identities to values and every
//! link between objects is a [`Value::Reference`] into that map, so cyclic
//! object graphs need no special representation.

use std::collections::BTreeMap;

/// Identity of a heap object within one snapshot (the debuggee's object id).
pub type HeapId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Boolean(bool),
    Byte(i8),
    /// A UTF-16 code unit.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Primitive(Primitive),
    String(String),
    /// Non-owning pointer into the snapshot's heap.
    Reference(HeapId),
    Object {
        type_name: String,
        fields: Vec<Field>,
    },
    /// An array or an ordered collection. `type_name` is the array's declared
    /// type (`int[]`) or the collection's runtime class.
    List {
        type_name: String,
        elements: Vec<Value>,
    },
    /// An unordered collection.
    Collection(Vec<Value>),
    /// Key/value pairs in entry-set iteration order.
    Map(Vec<(Value, Value)>),
    /// Reconstructed source of a closure's single abstract method.
    Lambda(String),
}

impl Value {
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }
}

/// A named slot: a local variable, a static, or an instance field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    /// Declared (static) type, which may differ from the runtime type of the
    /// referenced object.
    pub type_name: String,
    pub is_final: bool,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThisObject {
    pub type_name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub method_name: String,
    /// `-1` when the frame has no line information.
    pub line: i32,
    pub variables: Vec<Field>,
    /// Absent for static and native frames.
    pub this: Option<ThisObject>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSnapshot {
    /// Oldest call first.
    pub stack: Vec<StackFrame>,
    pub statics: Vec<Field>,
    pub heap: BTreeMap<HeapId, Value>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionSnapshot {
    /// The executing frame.
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.stack.last()
    }
}
