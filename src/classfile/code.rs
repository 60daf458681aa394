use std::io::Cursor;

use binrw::{binread, binrw, BinRead, BinResult, Endian};

use crate::error::{CompileError, CompileResult};

use super::member_info::AttributeInfo;

/// Last opcode defined by the JVM instruction set (`jsr_w`).
const LAST_OPCODE: u8 = 0xc9;

#[binrw]
#[brw(big)]
#[derive(Clone, Debug, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_length: u32,
    #[br(count = code_length as usize)]
    pub code: Vec<u8>,
    pub exception_table_length: u16,
    #[br(count = exception_table_length as usize)]
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes_count: u16,
    #[br(count = attributes_count as usize)]
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    /// A code attribute without exception handlers or nested attributes.
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        CodeAttribute {
            max_stack,
            max_locals,
            code_length: code.len() as u32,
            code,
            exception_table_length: 0,
            exception_table: Vec::new(),
            attributes_count: 0,
            attributes: Vec::new(),
        }
    }
}

#[binrw]
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[binrw::parser(reader)]
fn skip_switch_padding(address: u32) -> BinResult<()> {
    let padding = ((4 - (address + 1) % 4) % 4) as usize;
    let mut buf = [0u8; 3];
    reader.read_exact(&mut buf[..padding])?;
    Ok(())
}

/// One decoded JVM instruction. `address` is the instruction's offset in the code
/// array, needed for switch padding.
#[binread]
#[br(big, import(address: u32), return_unexpected_error)]
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    // ====================================================================
    // Constants
    // ====================================================================
    #[br(magic = 0x00u8)]
    Nop,
    #[br(magic = 0x01u8)]
    Aconstnull,
    #[br(magic = 0x02u8)]
    Iconstm1,
    #[br(magic = 0x03u8)]
    Iconst0,
    #[br(magic = 0x04u8)]
    Iconst1,
    #[br(magic = 0x05u8)]
    Iconst2,
    #[br(magic = 0x06u8)]
    Iconst3,
    #[br(magic = 0x07u8)]
    Iconst4,
    #[br(magic = 0x08u8)]
    Iconst5,
    #[br(magic = 0x09u8)]
    Lconst0,
    #[br(magic = 0x0au8)]
    Lconst1,
    #[br(magic = 0x0bu8)]
    Fconst0,
    #[br(magic = 0x0cu8)]
    Fconst1,
    #[br(magic = 0x0du8)]
    Fconst2,
    #[br(magic = 0x0eu8)]
    Dconst0,
    #[br(magic = 0x0fu8)]
    Dconst1,
    #[br(magic = 0x10u8)]
    Bipush(i8),
    #[br(magic = 0x11u8)]
    Sipush(i16),
    #[br(magic = 0x12u8)]
    Ldc(u8),
    #[br(magic = 0x13u8)]
    LdcW(u16),
    #[br(magic = 0x14u8)]
    Ldc2W(u16),

    // ====================================================================
    // Loads
    // ====================================================================
    #[br(magic = 0x15u8)]
    Iload(u8),
    #[br(magic = 0x16u8)]
    Lload(u8),
    #[br(magic = 0x17u8)]
    Fload(u8),
    #[br(magic = 0x18u8)]
    Dload(u8),
    #[br(magic = 0x19u8)]
    Aload(u8),
    #[br(magic = 0x1au8)]
    Iload0,
    #[br(magic = 0x1bu8)]
    Iload1,
    #[br(magic = 0x1cu8)]
    Iload2,
    #[br(magic = 0x1du8)]
    Iload3,
    #[br(magic = 0x1eu8)]
    Lload0,
    #[br(magic = 0x1fu8)]
    Lload1,
    #[br(magic = 0x20u8)]
    Lload2,
    #[br(magic = 0x21u8)]
    Lload3,
    #[br(magic = 0x22u8)]
    Fload0,
    #[br(magic = 0x23u8)]
    Fload1,
    #[br(magic = 0x24u8)]
    Fload2,
    #[br(magic = 0x25u8)]
    Fload3,
    #[br(magic = 0x26u8)]
    Dload0,
    #[br(magic = 0x27u8)]
    Dload1,
    #[br(magic = 0x28u8)]
    Dload2,
    #[br(magic = 0x29u8)]
    Dload3,
    #[br(magic = 0x2au8)]
    Aload0,
    #[br(magic = 0x2bu8)]
    Aload1,
    #[br(magic = 0x2cu8)]
    Aload2,
    #[br(magic = 0x2du8)]
    Aload3,
    #[br(magic = 0x2eu8)]
    Iaload,
    #[br(magic = 0x2fu8)]
    Laload,
    #[br(magic = 0x30u8)]
    Faload,
    #[br(magic = 0x31u8)]
    Daload,
    #[br(magic = 0x32u8)]
    Aaload,
    #[br(magic = 0x33u8)]
    Baload,
    #[br(magic = 0x34u8)]
    Caload,
    #[br(magic = 0x35u8)]
    Saload,

    // ====================================================================
    // Stores
    // ====================================================================
    #[br(magic = 0x36u8)]
    Istore(u8),
    #[br(magic = 0x37u8)]
    Lstore(u8),
    #[br(magic = 0x38u8)]
    Fstore(u8),
    #[br(magic = 0x39u8)]
    Dstore(u8),
    #[br(magic = 0x3au8)]
    Astore(u8),
    #[br(magic = 0x3bu8)]
    Istore0,
    #[br(magic = 0x3cu8)]
    Istore1,
    #[br(magic = 0x3du8)]
    Istore2,
    #[br(magic = 0x3eu8)]
    Istore3,
    #[br(magic = 0x3fu8)]
    Lstore0,
    #[br(magic = 0x40u8)]
    Lstore1,
    #[br(magic = 0x41u8)]
    Lstore2,
    #[br(magic = 0x42u8)]
    Lstore3,
    #[br(magic = 0x43u8)]
    Fstore0,
    #[br(magic = 0x44u8)]
    Fstore1,
    #[br(magic = 0x45u8)]
    Fstore2,
    #[br(magic = 0x46u8)]
    Fstore3,
    #[br(magic = 0x47u8)]
    Dstore0,
    #[br(magic = 0x48u8)]
    Dstore1,
    #[br(magic = 0x49u8)]
    Dstore2,
    #[br(magic = 0x4au8)]
    Dstore3,
    #[br(magic = 0x4bu8)]
    Astore0,
    #[br(magic = 0x4cu8)]
    Astore1,
    #[br(magic = 0x4du8)]
    Astore2,
    #[br(magic = 0x4eu8)]
    Astore3,
    #[br(magic = 0x4fu8)]
    Iastore,
    #[br(magic = 0x50u8)]
    Lastore,
    #[br(magic = 0x51u8)]
    Fastore,
    #[br(magic = 0x52u8)]
    Dastore,
    #[br(magic = 0x53u8)]
    Aastore,
    #[br(magic = 0x54u8)]
    Bastore,
    #[br(magic = 0x55u8)]
    Castore,
    #[br(magic = 0x56u8)]
    Sastore,

    // ====================================================================
    // Stack
    // ====================================================================
    #[br(magic = 0x57u8)]
    Pop,
    #[br(magic = 0x58u8)]
    Pop2,
    #[br(magic = 0x59u8)]
    Dup,
    #[br(magic = 0x5au8)]
    Dupx1,
    #[br(magic = 0x5bu8)]
    Dupx2,
    #[br(magic = 0x5cu8)]
    Dup2,
    #[br(magic = 0x5du8)]
    Dup2x1,
    #[br(magic = 0x5eu8)]
    Dup2x2,
    #[br(magic = 0x5fu8)]
    Swap,

    // ====================================================================
    // Math
    // ====================================================================
    #[br(magic = 0x60u8)]
    Iadd,
    #[br(magic = 0x61u8)]
    Ladd,
    #[br(magic = 0x62u8)]
    Fadd,
    #[br(magic = 0x63u8)]
    Dadd,
    #[br(magic = 0x64u8)]
    Isub,
    #[br(magic = 0x65u8)]
    Lsub,
    #[br(magic = 0x66u8)]
    Fsub,
    #[br(magic = 0x67u8)]
    Dsub,
    #[br(magic = 0x68u8)]
    Imul,
    #[br(magic = 0x69u8)]
    Lmul,
    #[br(magic = 0x6au8)]
    Fmul,
    #[br(magic = 0x6bu8)]
    Dmul,
    #[br(magic = 0x6cu8)]
    Idiv,
    #[br(magic = 0x6du8)]
    Ldiv,
    #[br(magic = 0x6eu8)]
    Fdiv,
    #[br(magic = 0x6fu8)]
    Ddiv,
    #[br(magic = 0x70u8)]
    Irem,
    #[br(magic = 0x71u8)]
    Lrem,
    #[br(magic = 0x72u8)]
    Frem,
    #[br(magic = 0x73u8)]
    Drem,
    #[br(magic = 0x74u8)]
    Ineg,
    #[br(magic = 0x75u8)]
    Lneg,
    #[br(magic = 0x76u8)]
    Fneg,
    #[br(magic = 0x77u8)]
    Dneg,
    #[br(magic = 0x78u8)]
    Ishl,
    #[br(magic = 0x79u8)]
    Lshl,
    #[br(magic = 0x7au8)]
    Ishr,
    #[br(magic = 0x7bu8)]
    Lshr,
    #[br(magic = 0x7cu8)]
    Iushr,
    #[br(magic = 0x7du8)]
    Lushr,
    #[br(magic = 0x7eu8)]
    Iand,
    #[br(magic = 0x7fu8)]
    Land,
    #[br(magic = 0x80u8)]
    Ior,
    #[br(magic = 0x81u8)]
    Lor,
    #[br(magic = 0x82u8)]
    Ixor,
    #[br(magic = 0x83u8)]
    Lxor,
    #[br(magic = 0x84u8)]
    Iinc { index: u8, value: i8 },

    // ====================================================================
    // Conversions
    // ====================================================================
    #[br(magic = 0x85u8)]
    I2l,
    #[br(magic = 0x86u8)]
    I2f,
    #[br(magic = 0x87u8)]
    I2d,
    #[br(magic = 0x88u8)]
    L2i,
    #[br(magic = 0x89u8)]
    L2f,
    #[br(magic = 0x8au8)]
    L2d,
    #[br(magic = 0x8bu8)]
    F2i,
    #[br(magic = 0x8cu8)]
    F2l,
    #[br(magic = 0x8du8)]
    F2d,
    #[br(magic = 0x8eu8)]
    D2i,
    #[br(magic = 0x8fu8)]
    D2l,
    #[br(magic = 0x90u8)]
    D2f,
    #[br(magic = 0x91u8)]
    I2b,
    #[br(magic = 0x92u8)]
    I2c,
    #[br(magic = 0x93u8)]
    I2s,

    // ====================================================================
    // Comparisons
    // ====================================================================
    #[br(magic = 0x94u8)]
    Lcmp,
    #[br(magic = 0x95u8)]
    Fcmpl,
    #[br(magic = 0x96u8)]
    Fcmpg,
    #[br(magic = 0x97u8)]
    Dcmpl,
    #[br(magic = 0x98u8)]
    Dcmpg,
    #[br(magic = 0x99u8)]
    Ifeq(i16),
    #[br(magic = 0x9au8)]
    Ifne(i16),
    #[br(magic = 0x9bu8)]
    Iflt(i16),
    #[br(magic = 0x9cu8)]
    Ifge(i16),
    #[br(magic = 0x9du8)]
    Ifgt(i16),
    #[br(magic = 0x9eu8)]
    Ifle(i16),
    #[br(magic = 0x9fu8)]
    IfIcmpeq(i16),
    #[br(magic = 0xa0u8)]
    IfIcmpne(i16),
    #[br(magic = 0xa1u8)]
    IfIcmplt(i16),
    #[br(magic = 0xa2u8)]
    IfIcmpge(i16),
    #[br(magic = 0xa3u8)]
    IfIcmpgt(i16),
    #[br(magic = 0xa4u8)]
    IfIcmple(i16),
    #[br(magic = 0xa5u8)]
    IfAcmpeq(i16),
    #[br(magic = 0xa6u8)]
    IfAcmpne(i16),

    // ====================================================================
    // Control
    // ====================================================================
    #[br(magic = 0xa7u8)]
    Goto(i16),
    #[br(magic = 0xa8u8)]
    Jsr(i16),
    #[br(magic = 0xa9u8)]
    Ret(u8),
    #[br(magic = 0xaau8)]
    Tableswitch {
        #[br(temp, parse_with = skip_switch_padding, args(address))]
        padding: (),
        default: i32,
        low: i32,
        high: i32,
        #[br(count = (high as i64 - low as i64 + 1).max(0) as usize)]
        offsets: Vec<i32>,
    },
    #[br(magic = 0xabu8)]
    Lookupswitch {
        #[br(temp, parse_with = skip_switch_padding, args(address))]
        padding: (),
        default: i32,
        npairs: u32,
        #[br(count = npairs as usize)]
        pairs: Vec<(i32, i32)>,
    },
    #[br(magic = 0xacu8)]
    Ireturn,
    #[br(magic = 0xadu8)]
    Lreturn,
    #[br(magic = 0xaeu8)]
    Freturn,
    #[br(magic = 0xafu8)]
    Dreturn,
    #[br(magic = 0xb0u8)]
    Areturn,
    #[br(magic = 0xb1u8)]
    Return,

    // ====================================================================
    // References
    // ====================================================================
    #[br(magic = 0xb2u8)]
    Getstatic(u16),
    #[br(magic = 0xb3u8)]
    Putstatic(u16),
    #[br(magic = 0xb4u8)]
    Getfield(u16),
    #[br(magic = 0xb5u8)]
    Putfield(u16),
    #[br(magic = 0xb6u8)]
    Invokevirtual(u16),
    #[br(magic = 0xb7u8)]
    Invokespecial(u16),
    #[br(magic = 0xb8u8)]
    Invokestatic(u16),
    #[br(magic = 0xb9u8)]
    Invokeinterface { index: u16, count: u8, filler: u8 },
    #[br(magic = 0xbau8)]
    Invokedynamic { index: u16, filler: u16 },
    #[br(magic = 0xbbu8)]
    New(u16),
    #[br(magic = 0xbcu8)]
    Newarray(u8),
    #[br(magic = 0xbdu8)]
    Anewarray(u16),
    #[br(magic = 0xbeu8)]
    Arraylength,
    #[br(magic = 0xbfu8)]
    Athrow,
    #[br(magic = 0xc0u8)]
    Checkcast(u16),
    #[br(magic = 0xc1u8)]
    Instanceof(u16),
    #[br(magic = 0xc2u8)]
    Monitorenter,
    #[br(magic = 0xc3u8)]
    Monitorexit,

    // ====================================================================
    // Extended
    // ====================================================================
    #[br(magic = 0xc4u8)]
    Wide(WideInstruction),
    #[br(magic = 0xc5u8)]
    Multianewarray { index: u16, dimensions: u8 },
    #[br(magic = 0xc6u8)]
    Ifnull(i16),
    #[br(magic = 0xc7u8)]
    Ifnonnull(i16),
    #[br(magic = 0xc8u8)]
    GotoW(i32),
    #[br(magic = 0xc9u8)]
    JsrW(i32),
}

/// The instruction following a `wide` prefix.
#[binread]
#[br(big, return_unexpected_error)]
#[derive(Clone, Debug, PartialEq)]
pub enum WideInstruction {
    #[br(magic = 0x15u8)]
    Iload(u16),
    #[br(magic = 0x16u8)]
    Lload(u16),
    #[br(magic = 0x17u8)]
    Fload(u16),
    #[br(magic = 0x18u8)]
    Dload(u16),
    #[br(magic = 0x19u8)]
    Aload(u16),
    #[br(magic = 0x36u8)]
    Istore(u16),
    #[br(magic = 0x37u8)]
    Lstore(u16),
    #[br(magic = 0x38u8)]
    Fstore(u16),
    #[br(magic = 0x39u8)]
    Dstore(u16),
    #[br(magic = 0x3au8)]
    Astore(u16),
    #[br(magic = 0x84u8)]
    Iinc { index: u16, value: i16 },
    #[br(magic = 0xa9u8)]
    Ret(u16),
}

impl Instruction {
    /// Relative target of a conditional or unconditional branch.
    ///
    /// Covers the `ifeq`..`goto` range plus `ifnull`, `ifnonnull` and `goto_w`.
    /// Subroutine jumps and switches are not branches in this sense.
    pub fn branch_offset(&self) -> Option<i32> {
        match self {
            Instruction::Ifeq(off)
            | Instruction::Ifne(off)
            | Instruction::Iflt(off)
            | Instruction::Ifge(off)
            | Instruction::Ifgt(off)
            | Instruction::Ifle(off)
            | Instruction::IfIcmpeq(off)
            | Instruction::IfIcmpne(off)
            | Instruction::IfIcmplt(off)
            | Instruction::IfIcmpge(off)
            | Instruction::IfIcmpgt(off)
            | Instruction::IfIcmple(off)
            | Instruction::IfAcmpeq(off)
            | Instruction::IfAcmpne(off)
            | Instruction::Goto(off)
            | Instruction::Ifnull(off)
            | Instruction::Ifnonnull(off) => Some(*off as i32),
            Instruction::GotoW(off) => Some(*off),
            _ => None,
        }
    }
}

/// Random-access cursor over one method's code array.
///
/// The whole array is decoded up front, so a cursor always stands on an
/// instruction boundary.
#[derive(Clone, Debug)]
pub struct CodeIterator {
    code: Vec<u8>,
    instructions: Vec<(u32, Instruction)>,
    cursor: usize,
}

impl CodeIterator {
    pub fn new(code: &[u8]) -> CompileResult<Self> {
        let mut reader = Cursor::new(code);
        let mut instructions = Vec::new();
        while (reader.position() as usize) < code.len() {
            let address = reader.position() as u32;
            let instruction = Instruction::read_options(&mut reader, Endian::Big, (address,))
                .map_err(|e| decode_error(code, address, e))?;
            instructions.push((address, instruction));
        }
        Ok(CodeIterator {
            code: code.to_vec(),
            instructions,
            cursor: 0,
        })
    }

    pub fn code_length(&self) -> u32 {
        self.code.len() as u32
    }

    /// Offset of the instruction the cursor stands on, or the code length at the end.
    pub fn offset(&self) -> u32 {
        self.instructions
            .get(self.cursor)
            .map_or(self.code_length(), |(address, _)| *address)
    }

    pub fn has_next(&self) -> bool {
        self.cursor < self.instructions.len()
    }

    /// The instruction the cursor stands on, without advancing.
    pub fn look_ahead(&self) -> Option<&Instruction> {
        self.instructions.get(self.cursor).map(|(_, instruction)| instruction)
    }

    /// Place the cursor on the instruction starting at `offset`.
    pub fn move_to(&mut self, offset: u32) -> CompileResult<()> {
        if offset == self.code_length() {
            self.cursor = self.instructions.len();
            return Ok(());
        }
        self.cursor = self
            .instructions
            .binary_search_by_key(&offset, |(address, _)| *address)
            .map_err(|_| {
                CompileError::bad_bytecode(format!("offset {offset} is not an instruction boundary"))
            })?;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn read_u8(&self, offset: u32) -> Option<u8> {
        self.code.get(offset as usize).copied()
    }

    pub fn read_i8(&self, offset: u32) -> Option<i8> {
        self.read_u8(offset).map(|b| b as i8)
    }

    /// Big-endian, as all multi-byte operands are.
    pub fn read_u16(&self, offset: u32) -> Option<u16> {
        let start = offset as usize;
        let bytes = self.code.get(start..start.checked_add(2)?)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i16(&self, offset: u32) -> Option<i16> {
        self.read_u16(offset).map(|v| v as i16)
    }
}

impl Iterator for CodeIterator {
    type Item = (u32, Instruction);

    /// Advance past the current instruction, returning it with its offset.
    fn next(&mut self) -> Option<Self::Item> {
        let item = self.instructions.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(item)
    }
}

fn decode_error(code: &[u8], address: u32, err: binrw::Error) -> CompileError {
    match code.get(address as usize) {
        Some(&opcode) if opcode > LAST_OPCODE => {
            CompileError::bad_bytecode(format!("unknown opcode {opcode:#04x} at offset {address}"))
        }
        _ => CompileError::bad_bytecode(format!(
            "malformed instruction at offset {address}: {err}"
        )),
    }
}
