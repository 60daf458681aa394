use std::borrow::Cow;

use binrw::{binrw, BinRead, BinResult, BinWrite};

use crate::error::{CompileError, CompileResult};
use crate::types::descriptor::internal_to_source_name;

/// One constant pool entry, keyed by its one-byte tag.
#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantInfo {
    #[brw(magic = 1u8)]
    Utf8(Utf8Constant),
    #[brw(magic = 3u8)]
    Integer(IntegerConstant),
    #[brw(magic = 4u8)]
    Float(FloatConstant),
    #[brw(magic = 5u8)]
    Long(LongConstant),
    #[brw(magic = 6u8)]
    Double(DoubleConstant),
    #[brw(magic = 7u8)]
    Class(ClassConstant),
    #[brw(magic = 8u8)]
    String(StringConstant),
    #[brw(magic = 9u8)]
    FieldRef(MemberRefConstant),
    #[brw(magic = 10u8)]
    MethodRef(MemberRefConstant),
    #[brw(magic = 11u8)]
    InterfaceMethodRef(MemberRefConstant),
    #[brw(magic = 12u8)]
    NameAndType(NameAndTypeConstant),
    #[brw(magic = 15u8)]
    MethodHandle(MethodHandleConstant),
    #[brw(magic = 16u8)]
    MethodType(MethodTypeConstant),
    #[brw(magic = 17u8)]
    Dynamic(DynamicConstant),
    #[brw(magic = 18u8)]
    InvokeDynamic(DynamicConstant),
    #[brw(magic = 19u8)]
    Module(NamedConstant),
    #[brw(magic = 20u8)]
    Package(NamedConstant),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstTag {
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    Class,
    String,
    FieldRef,
    MethodRef,
    InterfaceMethodRef,
    NameAndType,
    MethodHandle,
    MethodType,
    Dynamic,
    InvokeDynamic,
    Module,
    Package,
}

impl ConstantInfo {
    pub fn tag(&self) -> ConstTag {
        match self {
            ConstantInfo::Utf8(_) => ConstTag::Utf8,
            ConstantInfo::Integer(_) => ConstTag::Integer,
            ConstantInfo::Float(_) => ConstTag::Float,
            ConstantInfo::Long(_) => ConstTag::Long,
            ConstantInfo::Double(_) => ConstTag::Double,
            ConstantInfo::Class(_) => ConstTag::Class,
            ConstantInfo::String(_) => ConstTag::String,
            ConstantInfo::FieldRef(_) => ConstTag::FieldRef,
            ConstantInfo::MethodRef(_) => ConstTag::MethodRef,
            ConstantInfo::InterfaceMethodRef(_) => ConstTag::InterfaceMethodRef,
            ConstantInfo::NameAndType(_) => ConstTag::NameAndType,
            ConstantInfo::MethodHandle(_) => ConstTag::MethodHandle,
            ConstantInfo::MethodType(_) => ConstTag::MethodType,
            ConstantInfo::Dynamic(_) => ConstTag::Dynamic,
            ConstantInfo::InvokeDynamic(_) => ConstTag::InvokeDynamic,
            ConstantInfo::Module(_) => ConstTag::Module,
            ConstantInfo::Package(_) => ConstTag::Package,
        }
    }

    /// Long and double entries occupy two constant pool slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantInfo::Long(_) | ConstantInfo::Double(_))
    }
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct Utf8Constant {
    pub length: u16,
    #[br(count = length as usize)]
    pub bytes: Vec<u8>,
}

impl Utf8Constant {
    /// Encode `text` the way class files store strings: NUL as `C0 80` and
    /// characters outside the BMP as two three-byte surrogates.
    pub fn new(text: &str) -> Self {
        let mut bytes = Vec::with_capacity(text.len());
        for unit in text.encode_utf16() {
            match unit {
                0x0001..=0x007f => bytes.push(unit as u8),
                0x0000 | 0x0080..=0x07ff => {
                    bytes.push(0xc0 | (unit >> 6) as u8);
                    bytes.push(0x80 | (unit & 0x3f) as u8);
                }
                _ => {
                    bytes.push(0xe0 | (unit >> 12) as u8);
                    bytes.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                    bytes.push(0x80 | (unit & 0x3f) as u8);
                }
            }
        }
        Utf8Constant {
            length: bytes.len() as u16,
            bytes,
        }
    }

    /// Decode the modified UTF-8 contents.
    pub fn text(&self) -> Result<Cow<'_, str>, String> {
        if self.bytes.iter().all(|&b| (0x01..0x80).contains(&b)) {
            // plain ASCII reads the same in both encodings
            return std::str::from_utf8(&self.bytes)
                .map(Cow::Borrowed)
                .map_err(|e| e.to_string());
        }
        decode_modified_utf8(&self.bytes).map(Cow::Owned)
    }
}

fn decode_modified_utf8(bytes: &[u8]) -> Result<String, String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let continuation = |at: usize| match bytes.get(at) {
            Some(&b) if b & 0xc0 == 0x80 => Ok(u16::from(b & 0x3f)),
            _ => Err(format!("truncated sequence at byte {i}")),
        };
        let lead = bytes[i];
        let (unit, width) = match lead {
            0x01..=0x7f => (u16::from(lead), 1),
            0xc0..=0xdf => (u16::from(lead & 0x1f) << 6 | continuation(i + 1)?, 2),
            0xe0..=0xef => (
                u16::from(lead & 0x0f) << 12 | continuation(i + 1)? << 6 | continuation(i + 2)?,
                3,
            ),
            _ => return Err(format!("invalid byte {lead:#04x} at {i}")),
        };
        units.push(unit);
        i += width;
    }
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| format!("unpaired surrogate {:#06x}", e.unpaired_surrogate()))
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct IntegerConstant {
    pub value: i32,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct FloatConstant {
    pub value: f32,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct LongConstant {
    pub value: i64,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct DoubleConstant {
    pub value: f64,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct ClassConstant {
    pub name_index: u16,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct StringConstant {
    pub string_index: u16,
}

/// Shared shape of field, method and interface method references.
#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct MemberRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct NameAndTypeConstant {
    pub name_index: u16,
    pub descriptor_index: u16,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct MethodHandleConstant {
    pub reference_kind: u8,
    pub reference_index: u16,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct MethodTypeConstant {
    pub descriptor_index: u16,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct NamedConstant {
    pub name_index: u16,
}

/// A resolved field or method reference. The class name is in dotted form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
}

/// The constant pool, indexed from 1 like the class file format.
///
/// Slot 0 and the slot following each long or double entry are empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstPool {
    slots: Vec<Option<ConstantInfo>>,
}

impl ConstPool {
    pub fn new() -> Self {
        ConstPool { slots: vec![None] }
    }

    /// Append an entry and return its index.
    pub fn push(&mut self, entry: ConstantInfo) -> u16 {
        if self.slots.is_empty() {
            self.slots.push(None);
        }
        let index = self.slots.len() as u16;
        let wide = entry.is_wide();
        self.slots.push(Some(entry));
        if wide {
            self.slots.push(None);
        }
        index
    }

    /// The `constant_pool_count` value stored in the class file.
    pub fn count(&self) -> u16 {
        self.slots.len().max(1) as u16
    }

    pub fn get(&self, index: u16) -> Option<&ConstantInfo> {
        self.slots.get(index as usize)?.as_ref()
    }

    /// Tag of the entry at `index`, or `None` for an absent or unusable slot.
    pub fn tag(&self, index: u16) -> Option<ConstTag> {
        self.get(index).map(ConstantInfo::tag)
    }

    /// Text of a `CONSTANT_Utf8` entry. Entries that do not decode read as
    /// absent; [`ConstPool::check_text`] reports them.
    pub fn utf8(&self, index: u16) -> Option<Cow<'_, str>> {
        match self.get(index)? {
            ConstantInfo::Utf8(utf8) => utf8.text().ok(),
            _ => None,
        }
    }

    /// Fail on the first `CONSTANT_Utf8` entry that is not valid modified UTF-8.
    pub fn check_text(&self) -> CompileResult<()> {
        for (index, entry) in self.slots.iter().enumerate() {
            if let Some(ConstantInfo::Utf8(utf8)) = entry {
                utf8.text().map_err(|cause| {
                    CompileError::bad_bytecode(format!(
                        "constant {index} is not valid modified UTF-8: {cause}"
                    ))
                })?;
            }
        }
        Ok(())
    }

    pub fn integer(&self, index: u16) -> Option<i32> {
        match self.get(index)? {
            ConstantInfo::Integer(c) => Some(c.value),
            _ => None,
        }
    }

    pub fn float(&self, index: u16) -> Option<f32> {
        match self.get(index)? {
            ConstantInfo::Float(c) => Some(c.value),
            _ => None,
        }
    }

    pub fn long(&self, index: u16) -> Option<i64> {
        match self.get(index)? {
            ConstantInfo::Long(c) => Some(c.value),
            _ => None,
        }
    }

    pub fn double(&self, index: u16) -> Option<f64> {
        match self.get(index)? {
            ConstantInfo::Double(c) => Some(c.value),
            _ => None,
        }
    }

    /// Contents of a `CONSTANT_String` entry.
    pub fn string(&self, index: u16) -> Option<Cow<'_, str>> {
        match self.get(index)? {
            ConstantInfo::String(c) => self.utf8(c.string_index),
            _ => None,
        }
    }

    /// Dotted class name of a `CONSTANT_Class` entry.
    pub fn class_name(&self, index: u16) -> Option<String> {
        match self.get(index)? {
            ConstantInfo::Class(c) => Some(internal_to_source_name(&self.utf8(c.name_index)?)),
            _ => None,
        }
    }

    pub fn name_and_type(&self, index: u16) -> Option<(Cow<'_, str>, Cow<'_, str>)> {
        match self.get(index)? {
            ConstantInfo::NameAndType(nt) => {
                Some((self.utf8(nt.name_index)?, self.utf8(nt.descriptor_index)?))
            }
            _ => None,
        }
    }

    pub fn field_ref(&self, index: u16) -> Option<MemberRef> {
        match self.get(index)? {
            ConstantInfo::FieldRef(r) => self.member_ref(r),
            _ => None,
        }
    }

    /// Resolves both class and interface method references.
    pub fn method_ref(&self, index: u16) -> Option<MemberRef> {
        match self.get(index)? {
            ConstantInfo::MethodRef(r) | ConstantInfo::InterfaceMethodRef(r) => self.member_ref(r),
            _ => None,
        }
    }

    fn member_ref(&self, r: &MemberRefConstant) -> Option<MemberRef> {
        let class_name = self.class_name(r.class_index)?;
        let (name, descriptor) = self.name_and_type(r.name_and_type_index)?;
        Some(MemberRef {
            class_name,
            name: name.into_owned(),
            descriptor: descriptor.into_owned(),
        })
    }
}

#[binrw::parser(reader, endian)]
pub(crate) fn read_const_pool(count: u16) -> BinResult<ConstPool> {
    let mut slots = Vec::with_capacity(count as usize);
    slots.push(None);
    while slots.len() < count as usize {
        let entry = ConstantInfo::read_options(reader, endian, ())?;
        let wide = entry.is_wide();
        slots.push(Some(entry));
        if wide {
            slots.push(None);
        }
    }
    Ok(ConstPool { slots })
}

#[binrw::writer(writer, endian)]
pub(crate) fn write_const_pool(pool: &ConstPool) -> BinResult<()> {
    for entry in pool.slots.iter().flatten() {
        entry.write_options(writer, endian, ())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool() -> ConstPool {
        let mut pool = ConstPool::new();
        let class_name = pool.push(ConstantInfo::Utf8(Utf8Constant::new("pkg/Point")));
        let class = pool.push(ConstantInfo::Class(ClassConstant { name_index: class_name }));
        let name = pool.push(ConstantInfo::Utf8(Utf8Constant::new("x")));
        let desc = pool.push(ConstantInfo::Utf8(Utf8Constant::new("I")));
        let nat = pool.push(ConstantInfo::NameAndType(NameAndTypeConstant {
            name_index: name,
            descriptor_index: desc,
        }));
        pool.push(ConstantInfo::FieldRef(MemberRefConstant {
            class_index: class,
            name_and_type_index: nat,
        }));
        pool
    }

    #[test]
    fn test_resolve_field_ref() {
        let pool = sample_pool();
        let field = pool.field_ref(6).unwrap();
        assert_eq!(field.class_name, "pkg.Point");
        assert_eq!(field.name, "x");
        assert_eq!(field.descriptor, "I");
        assert!(pool.method_ref(6).is_none(), "a field ref is not a method ref");
    }

    #[test]
    fn test_wide_entries_take_two_slots() {
        let mut pool = ConstPool::new();
        let long = pool.push(ConstantInfo::Long(LongConstant { value: 7 }));
        let int = pool.push(ConstantInfo::Integer(IntegerConstant { value: 3 }));
        assert_eq!(long, 1);
        assert_eq!(int, 3);
        assert_eq!(pool.count(), 4);
        assert_eq!(pool.long(1), Some(7));
        assert_eq!(pool.tag(2), None);
        assert_eq!(pool.integer(3), Some(3));
    }

    #[test]
    fn test_modified_utf8_text() {
        let nul = Utf8Constant { length: 4, bytes: vec![0x61, 0xc0, 0x80, 0x62] };
        assert_eq!(nul.text().unwrap(), "a\0b");

        // U+1F600 as a surrogate pair of three-byte sequences
        let emoji = Utf8Constant {
            length: 6,
            bytes: vec![0xed, 0xa0, 0xbd, 0xed, 0xb8, 0x80],
        };
        assert_eq!(emoji.text().unwrap(), "\u{1F600}");
        assert_eq!(Utf8Constant::new("\u{1F600}"), emoji);
        assert_eq!(Utf8Constant::new("a\0b"), nul);
        assert_eq!(Utf8Constant::new("caf\u{e9}").text().unwrap(), "caf\u{e9}");
    }

    #[test]
    fn test_malformed_modified_utf8() {
        let raw_nul = Utf8Constant { length: 1, bytes: vec![0x00] };
        assert!(raw_nul.text().is_err());
        let four_byte = Utf8Constant { length: 4, bytes: "\u{1F600}".as_bytes().to_vec() };
        assert!(four_byte.text().is_err());
        let truncated = Utf8Constant { length: 2, bytes: vec![0x61, 0xc3] };
        assert!(truncated.text().is_err());
        let lone = Utf8Constant { length: 3, bytes: vec![0xed, 0xa0, 0xbd] };
        assert!(lone.text().unwrap_err().contains("unpaired surrogate"));

        let mut pool = sample_pool();
        assert!(pool.check_text().is_ok());
        let bad = pool.push(ConstantInfo::Utf8(truncated));
        assert_eq!(pool.utf8(bad), None);
        let err = pool.check_text().unwrap_err();
        assert!(err.to_string().contains(&format!("constant {bad} is not valid modified UTF-8")), "{err}");
    }

    #[test]
    fn test_missing_and_wrong_tag() {
        let pool = sample_pool();
        assert_eq!(pool.tag(0), None);
        assert_eq!(pool.tag(100), None);
        assert_eq!(pool.tag(1), Some(ConstTag::Utf8));
        assert_eq!(pool.integer(1), None);
        assert_eq!(pool.class_name(2).as_deref(), Some("pkg.Point"));
    }
}
