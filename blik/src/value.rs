//! Runtime values.
//!
//! Every expression occupies exactly one stack slot. The compiler knows the
//! static type of every slot, so the VM mostly trusts the IR; the enum tag
//! is what makes that trust checkable instead of undefined behavior.

use crate::program::StrId;
use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StrId),
    Type(TypeId),
}

impl Value {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f64> {
        match self {
            Value::Float(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_str(self) -> Option<StrId> {
        match self {
            Value::Str(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_type(self) -> Option<TypeId> {
        match self {
            Value::Type(id) => Some(id),
            _ => None,
        }
    }
}
