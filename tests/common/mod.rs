//! Shared helpers: an in-memory class file assembler and compiler setup.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;

use binrw::BinWrite;
use classfile_aot::classfile::{
    AttributeInfo, ClassAccessFlags, ClassConstant, CodeAttribute, ConstPool, ConstantInfo,
    DoubleConstant, FieldAccessFlags, FieldInfo, FloatConstant, IntegerConstant, LongConstant,
    MemberRefConstant, MethodAccessFlags, MethodInfo, NameAndTypeConstant, StringConstant,
    Utf8Constant,
};
use classfile_aot::{ClassFile, CompileOptions, Compiler, ManglingScheme, MemoryClassPath};

/// JVM opcodes used by the tests.
pub mod op {
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_M1: u8 = 0x02;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const ICONST_2: u8 = 0x05;
    pub const ICONST_3: u8 = 0x06;
    pub const LCONST_1: u8 = 0x0a;
    pub const FCONST_1: u8 = 0x0c;
    pub const DCONST_1: u8 = 0x0f;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const ILOAD_0: u8 = 0x1a;
    pub const ILOAD_1: u8 = 0x1b;
    pub const ILOAD_2: u8 = 0x1c;
    pub const LLOAD_0: u8 = 0x1e;
    pub const LLOAD_2: u8 = 0x20;
    pub const FLOAD_0: u8 = 0x22;
    pub const FLOAD_1: u8 = 0x23;
    pub const DLOAD_0: u8 = 0x26;
    pub const DLOAD_2: u8 = 0x28;
    pub const ALOAD_0: u8 = 0x2a;
    pub const ALOAD_1: u8 = 0x2b;
    pub const IALOAD: u8 = 0x2e;
    pub const ISTORE: u8 = 0x36;
    pub const ISTORE_1: u8 = 0x3c;
    pub const ISTORE_2: u8 = 0x3d;
    pub const ASTORE_1: u8 = 0x4c;
    pub const POP: u8 = 0x57;
    pub const POP2: u8 = 0x58;
    pub const DUP: u8 = 0x59;
    pub const SWAP: u8 = 0x5f;
    pub const IADD: u8 = 0x60;
    pub const LADD: u8 = 0x61;
    pub const ISUB: u8 = 0x64;
    pub const IMUL: u8 = 0x68;
    pub const IDIV: u8 = 0x6c;
    pub const LDIV: u8 = 0x6d;
    pub const IREM: u8 = 0x70;
    pub const FREM: u8 = 0x72;
    pub const DREM: u8 = 0x73;
    pub const INEG: u8 = 0x74;
    pub const ISHL: u8 = 0x78;
    pub const LSHL: u8 = 0x79;
    pub const IUSHR: u8 = 0x7c;
    pub const IXOR: u8 = 0x82;
    pub const IINC: u8 = 0x84;
    pub const I2L: u8 = 0x85;
    pub const I2D: u8 = 0x87;
    pub const L2I: u8 = 0x88;
    pub const F2I: u8 = 0x8b;
    pub const D2I: u8 = 0x8e;
    pub const I2B: u8 = 0x91;
    pub const I2C: u8 = 0x92;
    pub const LCMP: u8 = 0x94;
    pub const FCMPL: u8 = 0x95;
    pub const DCMPG: u8 = 0x98;
    pub const IFEQ: u8 = 0x99;
    pub const IFNE: u8 = 0x9a;
    pub const IFLE: u8 = 0x9e;
    pub const IF_ICMPGE: u8 = 0xa2;
    pub const GOTO: u8 = 0xa7;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const IRETURN: u8 = 0xac;
    pub const LRETURN: u8 = 0xad;
    pub const FRETURN: u8 = 0xae;
    pub const DRETURN: u8 = 0xaf;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const NEW: u8 = 0xbb;
    pub const ATHROW: u8 = 0xbf;
    pub const CHECKCAST: u8 = 0xc0;
    pub const WIDE: u8 = 0xc4;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
    pub const GOTO_W: u8 = 0xc8;
}

/// Split a `u16` operand into its big-endian bytes.
pub fn u16_operand(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Assembles a class file in memory. Constant pool entries are deduplicated.
pub struct ClassBuilder {
    name: String,
    access_flags: ClassAccessFlags,
    pool: ConstPool,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
    this_class: u16,
    super_class: u16,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
}

impl ClassBuilder {
    /// A public class. `super_name` is `None` for a root class.
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut builder = ClassBuilder {
            name: name.to_string(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            pool: ConstPool::new(),
            utf8: HashMap::new(),
            classes: HashMap::new(),
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
        };
        builder.this_class = builder.class_ref(name);
        if let Some(super_name) = super_name {
            builder.super_class = builder.class_ref(super_name);
        }
        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_final(&mut self) -> &mut Self {
        self.access_flags |= ClassAccessFlags::FINAL;
        self
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        if let Some(&index) = self.utf8.get(text) {
            return index;
        }
        let index = self.pool.push(ConstantInfo::Utf8(Utf8Constant::new(text)));
        self.utf8.insert(text.to_string(), index);
        index
    }

    /// A `CONSTANT_Utf8` entry holding `bytes` verbatim.
    pub fn raw_utf8(&mut self, bytes: &[u8]) -> u16 {
        self.pool.push(ConstantInfo::Utf8(Utf8Constant {
            length: bytes.len() as u16,
            bytes: bytes.to_vec(),
        }))
    }

    /// A class constant for the dotted `name`.
    pub fn class_ref(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.classes.get(name) {
            return index;
        }
        let name_index = self.utf8(&name.replace('.', "/"));
        let index = self.pool.push(ConstantInfo::Class(ClassConstant { name_index }));
        self.classes.insert(name.to_string(), index);
        index
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let string_index = self.utf8(text);
        self.pool.push(ConstantInfo::String(StringConstant { string_index }))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.pool.push(ConstantInfo::Integer(IntegerConstant { value }))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.pool.push(ConstantInfo::Float(FloatConstant { value }))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.pool.push(ConstantInfo::Long(LongConstant { value }))
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.pool.push(ConstantInfo::Double(DoubleConstant { value }))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.pool.push(ConstantInfo::NameAndType(NameAndTypeConstant {
            name_index,
            descriptor_index,
        }))
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_ref(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.pool.push(ConstantInfo::FieldRef(MemberRefConstant {
            class_index,
            name_and_type_index,
        }))
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_ref(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.pool.push(ConstantInfo::MethodRef(MemberRefConstant {
            class_index,
            name_and_type_index,
        }))
    }

    pub fn field(&mut self, access_flags: FieldAccessFlags, name: &str, descriptor: &str) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(FieldInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes_count: 0,
            attributes: Vec::new(),
        });
        self
    }

    /// A method with the given bytecode, or without a `Code` attribute when
    /// `code` is `None`.
    pub fn method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        code: Option<Vec<u8>>,
    ) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut attributes = Vec::new();
        if let Some(code) = code {
            let mut bytes = Cursor::new(Vec::new());
            CodeAttribute::new(16, 16, code)
                .write(&mut bytes)
                .expect("failed to write code attribute");
            attributes.push(AttributeInfo::new(self.utf8("Code"), bytes.into_inner()));
        }
        self.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes_count: attributes.len() as u16,
            attributes,
        });
        self
    }

    /// Shorthand for a public instance method with a body.
    pub fn instance_method(&mut self, name: &str, descriptor: &str, code: Vec<u8>) -> &mut Self {
        self.method(MethodAccessFlags::PUBLIC, name, descriptor, Some(code))
    }

    /// Shorthand for a public static method with a body.
    pub fn static_method(&mut self, name: &str, descriptor: &str, code: Vec<u8>) -> &mut Self {
        self.method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name,
            descriptor,
            Some(code),
        )
    }

    pub fn build(&self) -> ClassFile {
        ClassFile {
            minor_version: 0,
            major_version: 52,
            const_pool_size: self.pool.count(),
            const_pool: self.pool.clone(),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces_count: 0,
            interfaces: Vec::new(),
            fields_count: self.fields.len() as u16,
            fields: self.fields.clone(),
            methods_count: self.methods.len() as u16,
            methods: self.methods.clone(),
            attributes_count: 0,
            attributes: Vec::new(),
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.build().to_bytes().expect("failed to write class file")
    }
}

/// A class path holding the given classes.
pub fn class_path(classes: &[&ClassBuilder]) -> MemoryClassPath {
    let mut path = MemoryClassPath::new();
    for class in classes {
        path.insert(class.name(), class.bytes());
    }
    path
}

/// Options used by most tests: readable symbols and captured IR.
pub fn test_options() -> CompileOptions {
    CompileOptions {
        mangling: ManglingScheme::Simple,
        capture_ir: true,
        ..CompileOptions::default()
    }
}

pub fn compiler_for(classes: &[&ClassBuilder]) -> Compiler {
    compiler_with(test_options(), classes)
}

pub fn compiler_with(options: CompileOptions, classes: &[&ClassBuilder]) -> Compiler {
    Compiler::new(options, Box::new(class_path(classes))).expect("failed to create compiler")
}

/// Captured IR of `class#name descriptor`, under the simple mangling scheme.
pub fn method_ir<'a>(compiler: &'a Compiler, class: &str, name: &str, descriptor: &str) -> &'a str {
    let symbol = format!("{class}#{name}{descriptor}");
    compiler
        .function_ir(&symbol)
        .unwrap_or_else(|| panic!("no IR captured for {symbol}"))
}

/// Number of lines of `ir` that contain `needle`.
pub fn count_lines(ir: &str, needle: &str) -> usize {
    ir.lines().filter(|line| line.contains(needle)).count()
}
