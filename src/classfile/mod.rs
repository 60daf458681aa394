//! Reader for [Java class files](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html).

mod code;
mod constant_info;
mod member_info;

use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};
use bitflags::bitflags;

use crate::error::{CompileError, CompileResult};

pub use code::{CodeAttribute, CodeIterator, ExceptionEntry, Instruction, WideInstruction};
pub use constant_info::*;
pub use member_info::{AttributeInfo, FieldAccessFlags, FieldInfo, MethodAccessFlags, MethodInfo};

const CODE_ATTRIBUTE: &str = "Code";

#[binrw]
#[brw(big, magic = b"\xca\xfe\xba\xbe")]
#[derive(Clone, Debug, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub const_pool_size: u16,
    #[br(parse_with = read_const_pool, args(const_pool_size))]
    #[bw(write_with = write_const_pool)]
    pub const_pool: ConstPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces_count: u16,
    #[br(count = interfaces_count as usize)]
    pub interfaces: Vec<u16>,
    pub fields_count: u16,
    #[br(count = fields_count as usize)]
    pub fields: Vec<FieldInfo>,
    pub methods_count: u16,
    #[br(count = methods_count as usize)]
    pub methods: Vec<MethodInfo>,
    pub attributes_count: u16,
    #[br(count = attributes_count as usize)]
    pub attributes: Vec<AttributeInfo>,
}

#[binrw]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ClassAccessFlags(u16);

bitflags! {
    impl ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

impl ClassFile {
    pub fn from_bytes(bytes: &[u8]) -> binrw::BinResult<Self> {
        ClassFile::read(&mut Cursor::new(bytes))
    }

    pub fn to_bytes(&self) -> binrw::BinResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.write(&mut out)?;
        Ok(out.into_inner())
    }

    /// Dotted name of this class.
    pub fn class_name(&self) -> CompileResult<String> {
        self.const_pool.class_name(self.this_class).ok_or_else(|| {
            CompileError::bad_bytecode(format!(
                "this_class index {} is not a class constant",
                self.this_class
            ))
        })
    }

    /// Dotted name of the superclass, `None` for a root class.
    pub fn super_class_name(&self) -> CompileResult<Option<String>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.const_pool
            .class_name(self.super_class)
            .map(Some)
            .ok_or_else(|| {
                CompileError::bad_bytecode(format!(
                    "super_class index {} is not a class constant",
                    self.super_class
                ))
            })
    }

    pub fn utf8(&self, index: u16) -> CompileResult<String> {
        self.const_pool
            .utf8(index)
            .map(|s| s.into_owned())
            .ok_or_else(|| {
                CompileError::bad_bytecode(format!("constant {index} is not a utf8 entry"))
            })
    }

    /// Parse the `Code` attribute of a method, if it has one.
    pub fn method_code(&self, method: &MethodInfo) -> CompileResult<Option<CodeAttribute>> {
        for attr in &method.attributes {
            if self.const_pool.utf8(attr.attribute_name_index).as_deref() == Some(CODE_ATTRIBUTE) {
                let code = CodeAttribute::read(&mut Cursor::new(&attr.info))?;
                return Ok(Some(code));
            }
        }
        Ok(None)
    }
}
