//! The compiler's value types and their backend mapping.

pub mod descriptor;
pub mod layout;

use std::fmt;

use cranelift_codegen::ir;
use cranelift_codegen::ir::types;

/// Kinds of values the code generator tracks. Every array and class reference
/// collapses into [`Type::Object`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Int,
    Long,
    Float,
    Double,
    Object,
    Void,
}

impl Type {
    /// Number of JVM stack and local slots a value of this type occupies.
    pub fn width(self) -> u16 {
        match self {
            Type::Void => 0,
            Type::Long | Type::Double => 2,
            Type::Int | Type::Float | Type::Object => 1,
        }
    }

    /// The backend type for this kind, `None` for void.
    pub fn backend_type(self, pointer_type: ir::Type) -> Option<ir::Type> {
        match self {
            Type::Int => Some(types::I32),
            Type::Long => Some(types::I64),
            Type::Float => Some(types::F32),
            Type::Double => Some(types::F64),
            Type::Object => Some(pointer_type),
            Type::Void => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::Int => "int",
            Type::Long => "long",
            Type::Float => "float",
            Type::Double => "double",
            Type::Object => "object",
            Type::Void => "void",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A backend SSA value tagged with its [`Type`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Value {
    pub value: ir::Value,
    pub ty: Type,
}

impl Value {
    pub fn new(value: ir::Value, ty: Type) -> Self {
        Value { value, ty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(Type::Void.width(), 0);
        assert_eq!(Type::Int.width(), 1);
        assert_eq!(Type::Object.width(), 1);
        assert_eq!(Type::Long.width(), 2);
        assert_eq!(Type::Double.width(), 2);
    }

    #[test]
    fn test_backend_types() {
        assert_eq!(Type::Int.backend_type(types::I64), Some(types::I32));
        assert_eq!(Type::Float.backend_type(types::I64), Some(types::F32));
        assert_eq!(Type::Object.backend_type(types::I32), Some(types::I32));
        assert_eq!(Type::Void.backend_type(types::I64), None);
    }
}
