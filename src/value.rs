use std::{fmt, ops};

use crate::{Heap, ObjRef, Object, RuntimeError};

/// A Lox value. Objects are stored on the heap and referenced by handle.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    /// The absence of a value
    Nil,
    /// A boolean value in Lox
    Bool(bool),
    /// A number value in Lox
    Number(f64),
    /// A heap allocated object
    Obj(ObjRef),
}

impl Default for Value {
    fn default() -> Self {
        Self::Nil
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(v1), Self::Bool(v2)) => v1 == v2,
            (Self::Number(v1), Self::Number(v2)) => v1 == v2,
            // Strings are interned so comparing handles also compares their content.
            (Self::Obj(o1), Self::Obj(o2)) => o1 == o2,
            _ => false,
        }
    }
}

impl Value {
    /// Return true if this is a Lox nil value
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Return true if the value is `nil` or `false`. Otherwise, return false.
    pub fn is_falsey(&self) -> bool {
        match self {
            Self::Bool(b) => !b,
            Self::Nil => true,
            _ => false,
        }
    }

    /// Get the object handle held by this value
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Self::Obj(o) => Some(*o),
            _ => None,
        }
    }

    /// Compare two numbers with `<`.
    pub fn lt(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        match (self, rhs) {
            (Value::Number(n1), Value::Number(n2)) => Ok(Value::Bool(n1 < n2)),
            _ => Err(RuntimeError::ExpectedNumbers),
        }
    }

    /// Compare two numbers with `>`.
    pub fn gt(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        match (self, rhs) {
            (Value::Number(n1), Value::Number(n2)) => Ok(Value::Bool(n1 > n2)),
            _ => Err(RuntimeError::ExpectedNumbers),
        }
    }

    /// Format the value, looking up the content of objects in the heap.
    pub fn display(self, heap: &Heap) -> ValueDisplay<'_> {
        ValueDisplay { value: self, heap }
    }
}

/// Addition of numbers only, concatenation needs the heap and is done by the VM.
impl ops::Add for Value {
    type Output = Result<Value, RuntimeError>;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Value::Number(n1), Value::Number(n2)) => Ok(Value::Number(n1 + n2)),
            _ => Err(RuntimeError::InvalidAddOperands),
        }
    }
}

impl ops::Sub for Value {
    type Output = Result<Value, RuntimeError>;

    fn sub(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Value::Number(n1), Value::Number(n2)) => Ok(Value::Number(n1 - n2)),
            _ => Err(RuntimeError::ExpectedNumbers),
        }
    }
}

impl ops::Mul for Value {
    type Output = Result<Value, RuntimeError>;

    fn mul(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Value::Number(n1), Value::Number(n2)) => Ok(Value::Number(n1 * n2)),
            _ => Err(RuntimeError::ExpectedNumbers),
        }
    }
}

impl ops::Div for Value {
    type Output = Result<Value, RuntimeError>;

    fn div(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Value::Number(n1), Value::Number(n2)) => Ok(Value::Number(n1 / n2)),
            _ => Err(RuntimeError::ExpectedNumbers),
        }
    }
}

impl ops::Not for Value {
    type Output = Value;

    fn not(self) -> Self::Output {
        Value::Bool(self.is_falsey())
    }
}

impl ops::Neg for Value {
    type Output = Result<Value, RuntimeError>;

    fn neg(self) -> Self::Output {
        match self {
            Value::Number(n) => Ok(Value::Number(-n)),
            _ => Err(RuntimeError::ExpectedNumber),
        }
    }
}

/// Helper returned by [`Value::display`].
#[derive(Debug)]
pub struct ValueDisplay<'h> {
    value: Value,
    heap: &'h Heap,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => {
                if n.trunc().eq(&n) && n.is_finite() {
                    write!(f, "{n:.0?}")
                } else {
                    write!(f, "{n:?}")
                }
            }
            Value::Obj(o) => fmt_object(self.heap, o, f),
        }
    }
}

fn fmt_object(heap: &Heap, o: ObjRef, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match heap.get(o) {
        Object::String(s) => write!(f, "{}", s.chars),
        Object::Function(fun) => match fun.name {
            None => write!(f, "<script>"),
            Some(name) => write!(f, "<fn {}>", heap.str(name)),
        },
        Object::Closure(closure) => fmt_object(heap, closure.fun, f),
        Object::Upvalue(_) => write!(f, "upvalue"),
        Object::Class(class) => write!(f, "{}", heap.str(class.name)),
        Object::Instance(instance) => {
            write!(f, "{} instance", heap.str(heap.class(instance.class).name))
        }
        Object::BoundMethod(bound) => fmt_object(heap, bound.method, f),
        Object::Native(_) => write!(f, "<native fn>"),
    }
}
