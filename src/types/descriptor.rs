//! Field and method descriptor parsing.

use crate::error::{CompileError, CompileResult};

use super::Type;

/// A parsed method descriptor. `params` excludes the implicit receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<Type>,
    pub return_type: Type,
}

impl MethodDescriptor {
    /// Parameters as passed at the machine level, with the receiver first for
    /// instance methods.
    pub fn instance_params(&self, is_static: bool) -> Vec<Type> {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        if !is_static {
            params.push(Type::Object);
        }
        params.extend_from_slice(&self.params);
        params
    }
}

/// Parse a single type starting at byte `pos`. Returns the type and the
/// position after it.
pub fn parse_type_at(desc: &str, pos: usize) -> CompileResult<(Type, usize)> {
    let bytes = desc.as_bytes();
    let Some(&c) = bytes.get(pos) else {
        return Err(CompileError::BadDescriptor(format!(
            "descriptor {desc:?} ends unexpectedly"
        )));
    };
    match c {
        b'Z' | b'B' | b'C' | b'S' | b'I' => Ok((Type::Int, pos + 1)),
        b'J' => Ok((Type::Long, pos + 1)),
        b'F' => Ok((Type::Float, pos + 1)),
        b'D' => Ok((Type::Double, pos + 1)),
        b'V' => Ok((Type::Void, pos + 1)),
        b'L' => {
            let semi = desc[pos + 1..].find(';').ok_or_else(|| {
                CompileError::BadDescriptor(format!("unterminated class name in {desc:?}"))
            })?;
            Ok((Type::Object, pos + 1 + semi + 1))
        }
        b'[' => {
            let (inner, next) = parse_type_at(desc, pos + 1)?;
            if inner == Type::Void {
                return Err(CompileError::BadDescriptor(format!("array of void in {desc:?}")));
            }
            Ok((Type::Object, next))
        }
        other => Err(CompileError::BadDescriptor(format!(
            "unknown descriptor char '{}'",
            other as char
        ))),
    }
}

/// Parse a complete field descriptor such as `I` or `Ljava/lang/String;`.
pub fn parse_field_descriptor(desc: &str) -> CompileResult<Type> {
    let (ty, next) = parse_type_at(desc, 0)?;
    if ty == Type::Void || next != desc.len() {
        return Err(CompileError::BadDescriptor(format!("invalid field descriptor {desc:?}")));
    }
    Ok(ty)
}

/// Parse a method descriptor, e.g. `(IJ)V`.
pub fn parse_method_descriptor(desc: &str) -> CompileResult<MethodDescriptor> {
    if !desc.starts_with('(') {
        return Err(CompileError::BadDescriptor(format!(
            "method descriptor {desc:?} does not start with '('"
        )));
    }
    let close = desc
        .find(')')
        .ok_or_else(|| CompileError::BadDescriptor(format!("missing ')' in {desc:?}")))?;
    let mut params = Vec::new();
    let mut pos = 1;
    while pos < close {
        let (ty, next) = parse_type_at(desc, pos)?;
        if ty == Type::Void {
            return Err(CompileError::BadDescriptor(format!("void parameter in {desc:?}")));
        }
        params.push(ty);
        pos = next;
    }
    let (return_type, end) = parse_type_at(desc, close + 1)?;
    if end != desc.len() {
        return Err(CompileError::BadDescriptor(format!(
            "trailing characters in {desc:?}"
        )));
    }
    Ok(MethodDescriptor { params, return_type })
}

/// Convert an internal class name (`java/lang/String`) to dotted form.
pub fn internal_to_source_name(name: &str) -> String {
    name.replace('/', ".")
}
