use std::fmt;

use crate::HeapId;

/// A runtime value: what lives in operand stacks, variable slots, and
/// object members.
///
/// Booleans are `Integer` 0/1. References do not own their heap entry;
/// entries are freed only by an explicit delete.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    Void,
    Integer(i64),
    Float(f64),
    StringRef(HeapId),
    /// A class instance or an array.
    ObjectRef(HeapId),
}

impl Value {
    pub const TRUE: Value = Value::Integer(1);
    pub const FALSE: Value = Value::Integer(0);

    pub fn from_bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::StringRef(_) => "string",
            Value::ObjectRef(_) => "object",
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn heap_id(&self) -> Option<HeapId> {
        match *self {
            Value::StringRef(id) | Value::ObjectRef(id) => Some(id),
            _ => None,
        }
    }

    /// Whether the value may sit in a reference-typed slot.
    pub fn is_reference_like(&self) -> bool {
        matches!(self, Value::Void | Value::StringRef(_) | Value::ObjectRef(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::StringRef(id) => write!(f, "string@{id}"),
            Value::ObjectRef(id) => write!(f, "object@{id}"),
        }
    }
}
