//! Heap object model: every cell the collector tracks, all behind one
//! header conceptually — in this arena-based implementation, the header's
//! `marked` bit and the "all objects" list are the arena slot itself
//! (index = identity, `Vec` order = the intrusive list), so there is no
//! separate `next` pointer to maintain.

use crate::chunk::Chunk;
use crate::value::Value;
use std::fmt;

/// A reference to a heap object: an index into the owning `Heap`'s arena.
/// Two handles are equal iff they name the same slot, which is exactly
/// pointer-identity comparison in the spec's terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjHandle(pub u32);

impl fmt::Display for ObjHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<obj #{}>", self.0)
    }
}

/// Either end of an up-value: open while the frame that owns the slot is
/// still on the VM's call stack, closed once it has returned.
#[derive(Clone, Debug)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

#[derive(Clone, Debug)]
pub struct ObjString {
    pub bytes: Box<str>,
    pub hash: u32,
}

impl ObjString {
    pub fn as_str(&self) -> &str {
        &self.bytes
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Clone, Debug)]
pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    /// `None` for the implicit top-level script function.
    pub name: Option<ObjHandle>,
}

impl ObjFunction {
    pub fn new(name: Option<ObjHandle>) -> Self {
        Self {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

#[derive(Clone)]
pub struct ObjNative {
    pub name: ObjHandle,
    pub arity: Option<u8>,
    pub function: NativeFn,
}

impl fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjNative").field("name", &self.name).finish()
    }
}

#[derive(Clone, Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
}

/// `(is_local, index)` pair recorded by the compiler for each up-value a
/// closure captures; resolved into live `ObjUpvalue`s at `OP_CLOSURE` time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u8,
}

#[derive(Clone, Debug)]
pub struct ObjClosure {
    pub function: ObjHandle,
    pub upvalues: Vec<ObjHandle>,
}

#[derive(Clone, Debug)]
pub struct ObjClass {
    pub name: ObjHandle,
    pub methods: crate::table::Table,
}

impl ObjClass {
    pub fn new(name: ObjHandle) -> Self {
        Self {
            name,
            methods: crate::table::Table::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ObjInstance {
    pub class: ObjHandle,
    pub fields: crate::table::Table,
}

impl ObjInstance {
    pub fn new(class: ObjHandle) -> Self {
        Self {
            class,
            fields: crate::table::Table::new(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjHandle,
}

#[derive(Debug)]
pub enum Object {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Upvalue(ObjUpvalue),
    Closure(ObjClosure),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Object {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::String(_) => "string",
            Object::Function(_) => "function",
            Object::Native(_) => "native function",
            Object::Upvalue(_) => "upvalue",
            Object::Closure(_) => "closure",
            Object::Class(_) => "class",
            Object::Instance(_) => "instance",
            Object::BoundMethod(_) => "bound method",
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match self {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut ObjFunction> {
        match self {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match self {
            Object::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ObjClass> {
        match self {
            Object::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class_mut(&mut self) -> Option<&mut ObjClass> {
        match self {
            Object::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ObjInstance> {
        match self {
            Object::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut ObjInstance> {
        match self {
            Object::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&ObjBoundMethod> {
        match self {
            Object::BoundMethod(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&ObjUpvalue> {
        match self {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self) -> Option<&mut ObjUpvalue> {
        match self {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&ObjNative> {
        match self {
            Object::Native(n) => Some(n),
            _ => None,
        }
    }
}
