use super::error::{RuntimeError, RuntimeResult};
use std::fmt;

/// Identity of one memory object: a stack slot, a frame slot, heap memory
/// or caller-provided frame storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pointer {
    Null,
    Object { object: ObjectId, offset: u32 },
}

impl Pointer {
    pub fn to(object: ObjectId) -> Self {
        Pointer::Object { object, offset: 0 }
    }

    pub fn is_null(self) -> bool {
        matches!(self, Pointer::Null)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RtValue {
    Int(i64),
    Ptr(Pointer),
    Token,
    Unit,
}

impl RtValue {
    pub fn as_int(self) -> RuntimeResult<i64> {
        match self {
            RtValue::Int(value) => Ok(value),
            other => Err(RuntimeError::TypeMismatch {
                message: format!("expected an integer, found {}", other.type_name()),
            }),
        }
    }

    pub fn as_ptr(self) -> RuntimeResult<Pointer> {
        match self {
            RtValue::Ptr(ptr) => Ok(ptr),
            other => Err(RuntimeError::TypeMismatch {
                message: format!("expected a pointer, found {}", other.type_name()),
            }),
        }
    }

    pub fn truthy(self) -> RuntimeResult<bool> {
        match self {
            RtValue::Int(value) => Ok(value != 0),
            RtValue::Ptr(ptr) => Ok(!ptr.is_null()),
            other => Err(RuntimeError::TypeMismatch {
                message: format!("{} used as a condition", other.type_name()),
            }),
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            RtValue::Int(_) => "int",
            RtValue::Ptr(_) => "ptr",
            RtValue::Token => "token",
            RtValue::Unit => "unit",
        }
    }
}

impl fmt::Display for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtValue::Int(value) => write!(f, "{value}"),
            RtValue::Ptr(Pointer::Null) => write!(f, "null"),
            RtValue::Ptr(Pointer::Object { object, offset }) => {
                write!(f, "ptr #{}+{}", object.0, offset)
            }
            RtValue::Token => write!(f, "token"),
            RtValue::Unit => write!(f, "()"),
        }
    }
}
