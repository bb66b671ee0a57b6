use std::{fmt, mem};

use crate::{Chunk, Table, Value};

/// A handle to an object living in the [`Heap`](crate::Heap). Handles are plain indices
/// so they can be copied around freely, the heap is the only owner of the objects.
///
/// Two handles are equal when they point to the same object. Since strings are
/// interned, this is also content equality for strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// The position of the object in the heap's arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Every kind of object that can be allocated on the heap.
#[derive(Debug)]
pub enum Object {
    /// An interned string
    String(ObjString),
    /// A compiled function
    Function(ObjFunction),
    /// A function with its captured variables
    Closure(ObjClosure),
    /// A captured variable
    Upvalue(ObjUpvalue),
    /// A class with its methods
    Class(ObjClass),
    /// An instance of a class
    Instance(ObjInstance),
    /// A method bound to its receiver
    BoundMethod(ObjBoundMethod),
    /// A function implemented by the host
    Native(ObjNative),
}

impl Object {
    /// A short name of the object's kind, used when logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Closure(_) => "closure",
            Self::Upvalue(_) => "upvalue",
            Self::Class(_) => "class",
            Self::Instance(_) => "instance",
            Self::BoundMethod(_) => "bound method",
            Self::Native(_) => "native",
        }
    }

    /// Push every object directly referenced by this one.
    pub fn references(&self, refs: &mut Vec<ObjRef>) {
        match self {
            Self::String(_) => {}
            Self::Native(native) => refs.push(native.name),
            Self::Function(fun) => {
                refs.extend(fun.name);
                refs.extend(fun.chunk.constants().iter().filter_map(Value::as_obj));
            }
            Self::Closure(closure) => {
                refs.push(closure.fun);
                refs.extend_from_slice(&closure.upvalues);
            }
            Self::Upvalue(upvalue) => {
                if let ObjUpvalue::Closed(Value::Obj(o)) = upvalue {
                    refs.push(*o);
                }
            }
            Self::Class(class) => {
                refs.push(class.name);
                table_references(&class.methods, refs);
            }
            Self::Instance(instance) => {
                refs.push(instance.class);
                table_references(&instance.fields, refs);
            }
            Self::BoundMethod(bound) => {
                refs.extend(bound.receiver.as_obj());
                refs.push(bound.method);
            }
        }
    }

    /// An estimate of the number of bytes owned by this object, used to decide
    /// when to collect garbage.
    pub fn size(&self) -> usize {
        let owned = match self {
            Self::String(s) => s.chars.len(),
            Self::Function(fun) => fun.chunk.size(),
            Self::Closure(closure) => closure.upvalues.capacity() * mem::size_of::<ObjRef>(),
            Self::Class(class) => class.methods.size(),
            Self::Instance(instance) => instance.fields.size(),
            Self::Upvalue(_) | Self::BoundMethod(_) | Self::Native(_) => 0,
        };
        mem::size_of::<Self>() + owned
    }
}

fn table_references(table: &Table, refs: &mut Vec<ObjRef>) {
    for (key, value) in table.iter() {
        refs.push(key.string);
        refs.extend(value.as_obj());
    }
}

macro_rules! impl_from_obj {
    ($($variant:ident($typ:ty)),* $(,)?) => {
        $(
            impl From<$typ> for Object {
                fn from(obj: $typ) -> Self {
                    Self::$variant(obj)
                }
            }
        )*
    };
}

impl_from_obj!(
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    Native(ObjNative),
);

/// An immutable string with its hash computed once at creation.
#[derive(Debug)]
pub struct ObjString {
    /// The characters of the string
    pub chars: Box<str>,
    /// The cached hash of `chars`
    pub hash: u32,
}

/// A function object that holds the bytecode of the function along with other metadata
#[derive(Debug, Default)]
pub struct ObjFunction {
    /// The name of the function, `None` for the top-level script
    pub name: Option<ObjRef>,
    /// Number of parameters the function has
    pub arity: u8,
    /// Number of variables captured by the function
    pub upvalue_count: usize,
    /// The bytecode chunk of this function
    pub chunk: Chunk,
}

impl ObjFunction {
    /// An empty function with no parameters.
    pub fn new(name: Option<ObjRef>) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

/// A function together with the variables it closes over.
#[derive(Debug)]
pub struct ObjClosure {
    /// The base function of this closure
    pub fun: ObjRef,
    /// Upvalues for indirect access to closed-over variables
    pub upvalues: Vec<ObjRef>,
}

impl ObjClosure {
    /// Wrap `fun` with its captured upvalues.
    pub fn new(fun: ObjRef, upvalues: Vec<ObjRef>) -> Self {
        Self { fun, upvalues }
    }
}

/// A variable captured by a closure. It stays open while the variable lives on the
/// stack and is closed once the variable goes out of scope.
#[derive(Debug, Clone, Copy)]
pub enum ObjUpvalue {
    /// Stack slot of the captured variable
    Open(usize),
    /// The value moved off the stack
    Closed(Value),
}

/// A class and its method table.
#[derive(Debug)]
pub struct ObjClass {
    /// Class name
    pub name: ObjRef,
    /// Methods of the class, including the ones copied from its superclass
    pub methods: Table,
}

impl ObjClass {
    /// Create a new class with the given name
    pub fn new(name: ObjRef) -> Self {
        Self {
            name,
            methods: Table::default(),
        }
    }
}

/// An instance with its own fields.
#[derive(Debug)]
pub struct ObjInstance {
    /// The class type of this instance
    pub class: ObjRef,
    /// The fields that this instance stores
    pub fields: Table,
}

impl ObjInstance {
    /// Create a new instance of the given class.
    pub fn new(class: ObjRef) -> Self {
        Self {
            class,
            fields: Table::default(),
        }
    }
}

/// A method closure paired with the instance it was accessed from.
#[derive(Debug)]
pub struct ObjBoundMethod {
    /// The instance that becomes `this`
    pub receiver: Value,
    /// The closure of the method
    pub method: ObjRef,
}

/// Signature of functions implemented by the host.
pub type NativeFn = fn(&[Value]) -> Value;

/// A native function
#[derive(Debug)]
pub struct ObjNative {
    /// Function's name
    pub name: ObjRef,
    /// Number of parameters
    pub arity: u8,
    /// Native function reference
    pub call: NativeFn,
}
