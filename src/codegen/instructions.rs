//! Per-opcode translation.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{self, types, AbiParam, InstBuilder};
use cranelift_module::Linkage;

use crate::class::method::Dispatch;
use crate::classfile::{ConstTag, Instruction, MemberRef, WideInstruction};
use crate::error::{CompileError, CompileResult};
use crate::types::{Type, Value};

use super::MethodCodegen;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Invoke {
    Static,
    Special,
    Virtual,
}

fn unsupported(instruction: &Instruction, address: u32) -> CompileError {
    CompileError::bad_bytecode(format!("unsupported instruction {instruction:?} at offset {address}"))
}

fn branch_target(address: u32, offset: i32) -> CompileResult<u32> {
    u32::try_from(i64::from(address) + i64::from(offset)).map_err(|_| {
        CompileError::bad_bytecode(format!("branch at offset {address} jumps before the start of the code"))
    })
}

impl MethodCodegen<'_, '_> {
    /// Emit `instruction`, found at `address`. `next` is the offset of the
    /// instruction after it.
    pub(super) fn emit_instruction(&mut self, address: u32, next: u32, instruction: Instruction) -> CompileResult<()> {
        use Instruction as I;
        match instruction {
            // ====================================================================
            // Constants
            // ====================================================================
            I::Nop => {}
            I::Aconstnull => {
                let null = self.builder.ins().iconst(self.ctx.pointer_type(), 0);
                self.push(Value::new(null, Type::Object));
            }
            I::Iconstm1 => self.push_int(-1),
            I::Iconst0 => self.push_int(0),
            I::Iconst1 => self.push_int(1),
            I::Iconst2 => self.push_int(2),
            I::Iconst3 => self.push_int(3),
            I::Iconst4 => self.push_int(4),
            I::Iconst5 => self.push_int(5),
            I::Lconst0 => self.push_long(0),
            I::Lconst1 => self.push_long(1),
            I::Fconst0 => self.push_float(0.0),
            I::Fconst1 => self.push_float(1.0),
            I::Fconst2 => self.push_float(2.0),
            I::Dconst0 => self.push_double(0.0),
            I::Dconst1 => self.push_double(1.0),
            I::Bipush(value) => self.push_int(i32::from(value)),
            I::Sipush(value) => self.push_int(i32::from(value)),
            I::Ldc(index) => self.emit_ldc(u16::from(index))?,
            I::LdcW(index) | I::Ldc2W(index) => self.emit_ldc(index)?,

            // ====================================================================
            // Loads and stores
            // ====================================================================
            I::Iload(index) => self.load_local(u16::from(index), Type::Int)?,
            I::Lload(index) => self.load_local(u16::from(index), Type::Long)?,
            I::Fload(index) => self.load_local(u16::from(index), Type::Float)?,
            I::Dload(index) => self.load_local(u16::from(index), Type::Double)?,
            I::Aload(index) => self.load_local(u16::from(index), Type::Object)?,
            I::Iload0 => self.load_local(0, Type::Int)?,
            I::Iload1 => self.load_local(1, Type::Int)?,
            I::Iload2 => self.load_local(2, Type::Int)?,
            I::Iload3 => self.load_local(3, Type::Int)?,
            I::Lload0 => self.load_local(0, Type::Long)?,
            I::Lload1 => self.load_local(1, Type::Long)?,
            I::Lload2 => self.load_local(2, Type::Long)?,
            I::Lload3 => self.load_local(3, Type::Long)?,
            I::Fload0 => self.load_local(0, Type::Float)?,
            I::Fload1 => self.load_local(1, Type::Float)?,
            I::Fload2 => self.load_local(2, Type::Float)?,
            I::Fload3 => self.load_local(3, Type::Float)?,
            I::Dload0 => self.load_local(0, Type::Double)?,
            I::Dload1 => self.load_local(1, Type::Double)?,
            I::Dload2 => self.load_local(2, Type::Double)?,
            I::Dload3 => self.load_local(3, Type::Double)?,
            I::Aload0 => self.load_local(0, Type::Object)?,
            I::Aload1 => self.load_local(1, Type::Object)?,
            I::Aload2 => self.load_local(2, Type::Object)?,
            I::Aload3 => self.load_local(3, Type::Object)?,
            I::Istore(index) => self.store_local(u16::from(index), Type::Int)?,
            I::Lstore(index) => self.store_local(u16::from(index), Type::Long)?,
            I::Fstore(index) => self.store_local(u16::from(index), Type::Float)?,
            I::Dstore(index) => self.store_local(u16::from(index), Type::Double)?,
            I::Astore(index) => self.store_local(u16::from(index), Type::Object)?,
            I::Istore0 => self.store_local(0, Type::Int)?,
            I::Istore1 => self.store_local(1, Type::Int)?,
            I::Istore2 => self.store_local(2, Type::Int)?,
            I::Istore3 => self.store_local(3, Type::Int)?,
            I::Lstore0 => self.store_local(0, Type::Long)?,
            I::Lstore1 => self.store_local(1, Type::Long)?,
            I::Lstore2 => self.store_local(2, Type::Long)?,
            I::Lstore3 => self.store_local(3, Type::Long)?,
            I::Fstore0 => self.store_local(0, Type::Float)?,
            I::Fstore1 => self.store_local(1, Type::Float)?,
            I::Fstore2 => self.store_local(2, Type::Float)?,
            I::Fstore3 => self.store_local(3, Type::Float)?,
            I::Dstore0 => self.store_local(0, Type::Double)?,
            I::Dstore1 => self.store_local(1, Type::Double)?,
            I::Dstore2 => self.store_local(2, Type::Double)?,
            I::Dstore3 => self.store_local(3, Type::Double)?,
            I::Astore0 => self.store_local(0, Type::Object)?,
            I::Astore1 => self.store_local(1, Type::Object)?,
            I::Astore2 => self.store_local(2, Type::Object)?,
            I::Astore3 => self.store_local(3, Type::Object)?,
            I::Wide(ref wide) => self.emit_wide(wide, address)?,

            // ====================================================================
            // Stack
            // ====================================================================
            I::Pop => {
                self.pop_single("pop")?;
            }
            I::Pop2 => {
                let top = self.env.stack.pop()?;
                if top.ty.width() == 1 {
                    self.pop_single("pop2")?;
                }
            }
            I::Dup => {
                let top = self.env.stack.peek()?;
                if top.ty.width() != 1 {
                    return Err(CompileError::bad_bytecode("can only dup values with width of 1"));
                }
                self.push(top);
            }
            I::Swap => {
                let top = self.pop_single("swap")?;
                let below = self.pop_single("swap")?;
                self.push(top);
                self.push(below);
            }

            // ====================================================================
            // Math
            // ====================================================================
            I::Iadd => self.binary(Type::Int, BinaryOp::Add)?,
            I::Ladd => self.binary(Type::Long, BinaryOp::Add)?,
            I::Fadd => self.binary(Type::Float, BinaryOp::Add)?,
            I::Dadd => self.binary(Type::Double, BinaryOp::Add)?,
            I::Isub => self.binary(Type::Int, BinaryOp::Sub)?,
            I::Lsub => self.binary(Type::Long, BinaryOp::Sub)?,
            I::Fsub => self.binary(Type::Float, BinaryOp::Sub)?,
            I::Dsub => self.binary(Type::Double, BinaryOp::Sub)?,
            I::Imul => self.binary(Type::Int, BinaryOp::Mul)?,
            I::Lmul => self.binary(Type::Long, BinaryOp::Mul)?,
            I::Fmul => self.binary(Type::Float, BinaryOp::Mul)?,
            I::Dmul => self.binary(Type::Double, BinaryOp::Mul)?,
            I::Idiv => self.binary(Type::Int, BinaryOp::Div)?,
            I::Ldiv => self.binary(Type::Long, BinaryOp::Div)?,
            I::Fdiv => self.binary(Type::Float, BinaryOp::Div)?,
            I::Ddiv => self.binary(Type::Double, BinaryOp::Div)?,
            I::Irem => self.binary(Type::Int, BinaryOp::Rem)?,
            I::Lrem => self.binary(Type::Long, BinaryOp::Rem)?,
            I::Frem => self.binary(Type::Float, BinaryOp::Rem)?,
            I::Drem => self.binary(Type::Double, BinaryOp::Rem)?,
            I::Ineg => self.negate(Type::Int)?,
            I::Lneg => self.negate(Type::Long)?,
            I::Fneg => self.negate(Type::Float)?,
            I::Dneg => self.negate(Type::Double)?,
            I::Ishl => self.binary(Type::Int, BinaryOp::Shl)?,
            I::Lshl => self.binary(Type::Long, BinaryOp::Shl)?,
            I::Ishr => self.binary(Type::Int, BinaryOp::Shr)?,
            I::Lshr => self.binary(Type::Long, BinaryOp::Shr)?,
            I::Iushr => self.binary(Type::Int, BinaryOp::Ushr)?,
            I::Lushr => self.binary(Type::Long, BinaryOp::Ushr)?,
            I::Iand => self.binary(Type::Int, BinaryOp::And)?,
            I::Land => self.binary(Type::Long, BinaryOp::And)?,
            I::Ior => self.binary(Type::Int, BinaryOp::Or)?,
            I::Lor => self.binary(Type::Long, BinaryOp::Or)?,
            I::Ixor => self.binary(Type::Int, BinaryOp::Xor)?,
            I::Lxor => self.binary(Type::Long, BinaryOp::Xor)?,
            I::Iinc { index, value } => self.emit_iinc(u16::from(index), i64::from(value))?,

            // ====================================================================
            // Conversions
            // ====================================================================
            I::I2l => self.convert(Type::Int, Type::Long)?,
            I::I2f => self.convert(Type::Int, Type::Float)?,
            I::I2d => self.convert(Type::Int, Type::Double)?,
            I::L2i => self.convert(Type::Long, Type::Int)?,
            I::L2f => self.convert(Type::Long, Type::Float)?,
            I::L2d => self.convert(Type::Long, Type::Double)?,
            I::F2i => self.convert(Type::Float, Type::Int)?,
            I::F2l => self.convert(Type::Float, Type::Long)?,
            I::F2d => self.convert(Type::Float, Type::Double)?,
            I::D2i => self.convert(Type::Double, Type::Int)?,
            I::D2l => self.convert(Type::Double, Type::Long)?,
            I::D2f => self.convert(Type::Double, Type::Float)?,
            I::I2b => self.narrow(types::I8, true)?,
            I::I2c => self.narrow(types::I16, false)?,
            I::I2s => self.narrow(types::I16, true)?,

            // ====================================================================
            // Comparisons
            // ====================================================================
            I::Lcmp => self.compare_long()?,
            I::Fcmpl => self.compare_float(Type::Float, -1)?,
            I::Fcmpg => self.compare_float(Type::Float, 1)?,
            I::Dcmpl => self.compare_float(Type::Double, -1)?,
            I::Dcmpg => self.compare_float(Type::Double, 1)?,
            I::Ifeq(offset) => self.branch_zero(IntCC::Equal, address, next, offset)?,
            I::Ifne(offset) => self.branch_zero(IntCC::NotEqual, address, next, offset)?,
            I::Iflt(offset) => self.branch_zero(IntCC::SignedLessThan, address, next, offset)?,
            I::Ifge(offset) => self.branch_zero(IntCC::SignedGreaterThanOrEqual, address, next, offset)?,
            I::Ifgt(offset) => self.branch_zero(IntCC::SignedGreaterThan, address, next, offset)?,
            I::Ifle(offset) => self.branch_zero(IntCC::SignedLessThanOrEqual, address, next, offset)?,
            I::IfIcmpeq(offset) => self.branch_compare(Type::Int, IntCC::Equal, address, next, offset)?,
            I::IfIcmpne(offset) => self.branch_compare(Type::Int, IntCC::NotEqual, address, next, offset)?,
            I::IfIcmplt(offset) => {
                self.branch_compare(Type::Int, IntCC::SignedLessThan, address, next, offset)?
            }
            I::IfIcmpge(offset) => {
                self.branch_compare(Type::Int, IntCC::SignedGreaterThanOrEqual, address, next, offset)?
            }
            I::IfIcmpgt(offset) => {
                self.branch_compare(Type::Int, IntCC::SignedGreaterThan, address, next, offset)?
            }
            I::IfIcmple(offset) => {
                self.branch_compare(Type::Int, IntCC::SignedLessThanOrEqual, address, next, offset)?
            }
            I::IfAcmpeq(offset) => self.branch_compare(Type::Object, IntCC::Equal, address, next, offset)?,
            I::IfAcmpne(offset) => {
                self.branch_compare(Type::Object, IntCC::NotEqual, address, next, offset)?
            }
            I::Ifnull(offset) => self.branch_null(IntCC::Equal, address, next, offset)?,
            I::Ifnonnull(offset) => self.branch_null(IntCC::NotEqual, address, next, offset)?,

            // ====================================================================
            // Control
            // ====================================================================
            I::Goto(offset) => self.emit_jump(branch_target(address, i32::from(offset))?)?,
            I::GotoW(offset) => self.emit_jump(branch_target(address, offset)?)?,
            I::Ireturn => self.emit_return(Type::Int)?,
            I::Lreturn => self.emit_return(Type::Long)?,
            I::Freturn => self.emit_return(Type::Float)?,
            I::Dreturn => self.emit_return(Type::Double)?,
            I::Areturn => self.emit_return(Type::Object)?,
            I::Return => self.emit_return(Type::Void)?,

            // ====================================================================
            // References
            // ====================================================================
            I::Getstatic(index) => self.emit_get_field(index, true)?,
            I::Putstatic(index) => self.emit_put_field(index, true)?,
            I::Getfield(index) => self.emit_get_field(index, false)?,
            I::Putfield(index) => self.emit_put_field(index, false)?,
            I::Invokevirtual(index) => self.emit_invoke(index, Invoke::Virtual)?,
            I::Invokespecial(index) => self.emit_invoke(index, Invoke::Special)?,
            I::Invokestatic(index) => self.emit_invoke(index, Invoke::Static)?,
            I::New(index) => self.emit_new(index)?,
            I::Checkcast(index) => {
                self.class_name(index)?;
                let top = self.env.stack.peek()?;
                if top.ty != Type::Object {
                    return Err(CompileError::bad_bytecode(format!("checkcast on a {} value", top.ty)));
                }
            }

            _ => return Err(unsupported(&instruction, address)),
        }
        Ok(())
    }

    fn emit_wide(&mut self, wide: &WideInstruction, address: u32) -> CompileResult<()> {
        use WideInstruction as W;
        match *wide {
            W::Iload(index) => self.load_local(index, Type::Int),
            W::Lload(index) => self.load_local(index, Type::Long),
            W::Fload(index) => self.load_local(index, Type::Float),
            W::Dload(index) => self.load_local(index, Type::Double),
            W::Aload(index) => self.load_local(index, Type::Object),
            W::Istore(index) => self.store_local(index, Type::Int),
            W::Lstore(index) => self.store_local(index, Type::Long),
            W::Fstore(index) => self.store_local(index, Type::Float),
            W::Dstore(index) => self.store_local(index, Type::Double),
            W::Astore(index) => self.store_local(index, Type::Object),
            W::Iinc { index, value } => self.emit_iinc(index, i64::from(value)),
            W::Ret(_) => Err(unsupported(&Instruction::Wide(wide.clone()), address)),
        }
    }

    // ------------------------------------------------------------------
    // Constants
    // ------------------------------------------------------------------

    fn push_int(&mut self, value: i32) {
        let v = self.builder.ins().iconst(types::I32, i64::from(value));
        self.push(Value::new(v, Type::Int));
    }

    fn push_long(&mut self, value: i64) {
        let v = self.builder.ins().iconst(types::I64, value);
        self.push(Value::new(v, Type::Long));
    }

    fn push_float(&mut self, value: f32) {
        let v = self.builder.ins().f32const(value);
        self.push(Value::new(v, Type::Float));
    }

    fn push_double(&mut self, value: f64) {
        let v = self.builder.ins().f64const(value);
        self.push(Value::new(v, Type::Double));
    }

    fn emit_ldc(&mut self, index: u16) -> CompileResult<()> {
        let invalid = || CompileError::bad_bytecode(format!("ldc references invalid const pool entry {index}"));
        let class_file = self.class_file;
        let const_pool = &class_file.const_pool;
        match const_pool.tag(index) {
            Some(ConstTag::Integer) => self.push_int(const_pool.integer(index).ok_or_else(invalid)?),
            Some(ConstTag::Float) => self.push_float(const_pool.float(index).ok_or_else(invalid)?),
            Some(ConstTag::Long) => self.push_long(const_pool.long(index).ok_or_else(invalid)?),
            Some(ConstTag::Double) => self.push_double(const_pool.double(index).ok_or_else(invalid)?),
            Some(ConstTag::String) => {
                let text = const_pool.string(index).ok_or_else(invalid)?;
                let (runtime, unit) = self.ctx.runtime_in_unit(self.unit);
                let value = runtime.get_string_constant(self.unit, unit, &mut self.builder, &text)?;
                self.push(value);
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Locals and stack
    // ------------------------------------------------------------------

    fn load_local(&mut self, index: u16, ty: Type) -> CompileResult<()> {
        let local = self.env.locals.get(&mut self.builder, index, ty)?;
        let value = local.load(&mut self.builder);
        self.push(value);
        Ok(())
    }

    fn store_local(&mut self, index: u16, ty: Type) -> CompileResult<()> {
        let value = self.env.stack.pop()?;
        if value.ty != ty {
            return Err(CompileError::bad_bytecode(format!(
                "cannot store {} into {ty} local {index}",
                value.ty
            )));
        }
        let local = self.env.locals.get(&mut self.builder, index, ty)?;
        local.store(&mut self.builder, value)
    }

    fn emit_iinc(&mut self, index: u16, delta: i64) -> CompileResult<()> {
        let local = self.env.locals.get(&mut self.builder, index, Type::Int)?;
        let current = local.load(&mut self.builder);
        let updated = self.builder.ins().iadd_imm(current.value, delta);
        local.store(&mut self.builder, Value::new(updated, Type::Int))
    }

    fn pop_single(&mut self, opcode: &str) -> CompileResult<Value> {
        let value = self.env.stack.pop()?;
        if value.ty.width() != 1 {
            return Err(CompileError::bad_bytecode(format!(
                "{opcode} cannot split a {} value",
                value.ty
            )));
        }
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------

    fn binary(&mut self, ty: Type, op: BinaryOp) -> CompileResult<()> {
        let rhs = self.pop(if op.is_shift() { Type::Int } else { ty })?.value;
        let lhs = self.pop(ty)?.value;
        let is_float = matches!(ty, Type::Float | Type::Double);
        if is_float && op == BinaryOp::Rem {
            let result = self.call_fmod(ty, lhs, rhs)?;
            self.push(Value::new(result, ty));
            return Ok(());
        }
        let result = match (is_float, op) {
            (false, BinaryOp::Div | BinaryOp::Rem) => self.signed_division(op, lhs, rhs),
            (true, BinaryOp::Add) => self.builder.ins().fadd(lhs, rhs),
            (true, BinaryOp::Sub) => self.builder.ins().fsub(lhs, rhs),
            (true, BinaryOp::Mul) => self.builder.ins().fmul(lhs, rhs),
            (true, BinaryOp::Div) => self.builder.ins().fdiv(lhs, rhs),
            (false, BinaryOp::Add) => self.builder.ins().iadd(lhs, rhs),
            (false, BinaryOp::Sub) => self.builder.ins().isub(lhs, rhs),
            (false, BinaryOp::Mul) => self.builder.ins().imul(lhs, rhs),
            (false, BinaryOp::Shl) => self.builder.ins().ishl(lhs, rhs),
            (false, BinaryOp::Shr) => self.builder.ins().sshr(lhs, rhs),
            (false, BinaryOp::Ushr) => self.builder.ins().ushr(lhs, rhs),
            (false, BinaryOp::And) => self.builder.ins().band(lhs, rhs),
            (false, BinaryOp::Or) => self.builder.ins().bor(lhs, rhs),
            (false, BinaryOp::Xor) => self.builder.ins().bxor(lhs, rhs),
            (true, _) => {
                return Err(CompileError::bad_bytecode(format!("{op:?} is not defined for {ty}")));
            }
        };
        self.push(Value::new(result, ty));
        Ok(())
    }

    /// `sdiv`/`srem` trap on `MIN / -1`, where the JVM wraps to `MIN` with
    /// remainder 0. A divisor of -1 is replaced by 1 and the quotient negated
    /// instead. Division by zero still traps.
    fn signed_division(&mut self, op: BinaryOp, lhs: ir::Value, rhs: ir::Value) -> ir::Value {
        let ty = self.builder.func.dfg.value_type(rhs);
        let minus_one = self.builder.ins().icmp_imm(IntCC::Equal, rhs, -1);
        let one = self.builder.ins().iconst(ty, 1);
        let divisor = self.builder.ins().select(minus_one, one, rhs);
        if op == BinaryOp::Rem {
            // x % 1 is already 0
            return self.builder.ins().srem(lhs, divisor);
        }
        let quotient = self.builder.ins().sdiv(lhs, divisor);
        let negated = self.builder.ins().ineg(lhs);
        self.builder.ins().select(minus_one, negated, quotient)
    }

    /// Floating point remainder through the C library.
    fn call_fmod(&mut self, ty: Type, lhs: ir::Value, rhs: ir::Value) -> CompileResult<ir::Value> {
        let (name, backend_type) = match ty {
            Type::Float => ("fmodf", types::F32),
            _ => ("fmod", types::F64),
        };
        let unit = self.ctx.unit_mut(self.unit);
        let mut sig = unit.make_signature();
        sig.params.push(AbiParam::new(backend_type));
        sig.params.push(AbiParam::new(backend_type));
        sig.returns.push(AbiParam::new(backend_type));
        let id = unit.declare_function(name, Linkage::Import, &sig)?;
        let callee = unit.func_ref(id, &mut self.builder);
        let call = self.builder.ins().call(callee, &[lhs, rhs]);
        Ok(self.builder.inst_results(call)[0])
    }

    fn negate(&mut self, ty: Type) -> CompileResult<()> {
        let value = self.pop(ty)?.value;
        let result = match ty {
            Type::Float | Type::Double => self.builder.ins().fneg(value),
            _ => self.builder.ins().ineg(value),
        };
        self.push(Value::new(result, ty));
        Ok(())
    }

    fn convert(&mut self, from: Type, to: Type) -> CompileResult<()> {
        let value = self.pop(from)?.value;
        let ins = self.builder.ins();
        let result = match (from, to) {
            (Type::Int, Type::Long) => ins.sextend(types::I64, value),
            (Type::Long, Type::Int) => ins.ireduce(types::I32, value),
            (Type::Int | Type::Long, Type::Float) => ins.fcvt_from_sint(types::F32, value),
            (Type::Int | Type::Long, Type::Double) => ins.fcvt_from_sint(types::F64, value),
            (Type::Float | Type::Double, Type::Int) => ins.fcvt_to_sint_sat(types::I32, value),
            (Type::Float | Type::Double, Type::Long) => ins.fcvt_to_sint_sat(types::I64, value),
            (Type::Float, Type::Double) => ins.fpromote(types::F64, value),
            (Type::Double, Type::Float) => ins.fdemote(types::F32, value),
            _ => {
                return Err(CompileError::bad_bytecode(format!("cannot convert {from} to {to}")));
            }
        };
        self.push(Value::new(result, to));
        Ok(())
    }

    /// `i2b`, `i2c` and `i2s`: truncate and widen back to int.
    fn narrow(&mut self, narrow_type: ir::Type, signed: bool) -> CompileResult<()> {
        let value = self.pop(Type::Int)?.value;
        let truncated = self.builder.ins().ireduce(narrow_type, value);
        let result = if signed {
            self.builder.ins().sextend(types::I32, truncated)
        } else {
            self.builder.ins().uextend(types::I32, truncated)
        };
        self.push(Value::new(result, Type::Int));
        Ok(())
    }

    fn int_constant(&mut self, value: i64) -> ir::Value {
        self.builder.ins().iconst(types::I32, value)
    }

    fn compare_long(&mut self) -> CompileResult<()> {
        let rhs = self.pop(Type::Long)?.value;
        let lhs = self.pop(Type::Long)?.value;
        let greater = self.builder.ins().icmp(IntCC::SignedGreaterThan, lhs, rhs);
        let less = self.builder.ins().icmp(IntCC::SignedLessThan, lhs, rhs);
        let one = self.int_constant(1);
        let minus_one = self.int_constant(-1);
        let zero = self.int_constant(0);
        let not_greater = self.builder.ins().select(less, minus_one, zero);
        let result = self.builder.ins().select(greater, one, not_greater);
        self.push(Value::new(result, Type::Int));
        Ok(())
    }

    /// `fcmpl`/`dcmpl` (`nan_result == -1`) and `fcmpg`/`dcmpg` (`nan_result == 1`).
    fn compare_float(&mut self, ty: Type, nan_result: i64) -> CompileResult<()> {
        let rhs = self.pop(ty)?.value;
        let lhs = self.pop(ty)?.value;
        let equal = self.builder.ins().fcmp(FloatCC::Equal, lhs, rhs);
        let zero = self.int_constant(0);
        // Unordered operands fall through both comparisons.
        let not_equal = self.int_constant(nan_result);
        let (condition, certain) = if nan_result < 0 {
            (self.builder.ins().fcmp(FloatCC::GreaterThan, lhs, rhs), self.int_constant(1))
        } else {
            (self.builder.ins().fcmp(FloatCC::LessThan, lhs, rhs), self.int_constant(-1))
        };
        let fallback = self.builder.ins().select(equal, zero, not_equal);
        let result = self.builder.ins().select(condition, certain, fallback);
        self.push(Value::new(result, Type::Int));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    fn branch_zero(&mut self, cc: IntCC, address: u32, next: u32, offset: i16) -> CompileResult<()> {
        let value = self.pop(Type::Int)?.value;
        let condition = self.builder.ins().icmp_imm(cc, value, 0);
        self.emit_branch(condition, address, next, offset)
    }

    fn branch_compare(&mut self, ty: Type, cc: IntCC, address: u32, next: u32, offset: i16) -> CompileResult<()> {
        let rhs = self.pop(ty)?.value;
        let lhs = self.pop(ty)?.value;
        let condition = self.builder.ins().icmp(cc, lhs, rhs);
        self.emit_branch(condition, address, next, offset)
    }

    fn branch_null(&mut self, cc: IntCC, address: u32, next: u32, offset: i16) -> CompileResult<()> {
        let value = self.pop(Type::Object)?.value;
        let condition = self.builder.ins().icmp_imm(cc, value, 0);
        self.emit_branch(condition, address, next, offset)
    }

    /// Branch to `address + offset` when `condition` holds, to `next` otherwise.
    fn emit_branch(&mut self, condition: ir::Value, address: u32, next: u32, offset: i16) -> CompileResult<()> {
        let target = branch_target(address, i32::from(offset))?;
        self.env.spill_for_edge(&mut self.builder, &[target, next])?;
        let taken = self.env.cfg.backend_block(target)?;
        let fall_through = self.env.cfg.backend_block(next)?;
        self.builder.ins().brif(condition, taken, &[], fall_through, &[]);
        self.env.set_terminated();
        Ok(())
    }

    fn emit_return(&mut self, ty: Type) -> CompileResult<()> {
        let expected = self.descriptor.return_type;
        if expected != ty {
            return Err(CompileError::bad_bytecode(format!(
                "cannot return {ty} from a method returning {expected}"
            )));
        }
        if ty == Type::Void {
            self.builder.ins().return_(&[]);
        } else {
            let value = self.pop(ty)?.value;
            self.builder.ins().return_(&[value]);
        }
        self.env.set_terminated();
        Ok(())
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    fn class_name(&self, index: u16) -> CompileResult<String> {
        self.class_file
            .const_pool
            .class_name(index)
            .ok_or_else(|| CompileError::bad_bytecode(format!("constant {index} is not a class reference")))
    }

    fn field_ref(&mut self, index: u16) -> CompileResult<MemberRef> {
        let member = self
            .class_file
            .const_pool
            .field_ref(index)
            .ok_or_else(|| CompileError::bad_bytecode(format!("constant {index} is not a field reference")))?;
        self.ctx.note_class_reference(&member.class_name);
        Ok(member)
    }

    fn method_ref(&mut self, index: u16) -> CompileResult<MemberRef> {
        let member = self
            .class_file
            .const_pool
            .method_ref(index)
            .ok_or_else(|| CompileError::bad_bytecode(format!("constant {index} is not a method reference")))?;
        self.ctx.note_class_reference(&member.class_name);
        Ok(member)
    }

    /// View a receiver typed as `from` as an instance of `to`.
    fn cast_receiver(&mut self, receiver: Value, from: &str, to: &str) -> CompileResult<Value> {
        if from == to {
            return Ok(receiver);
        }
        self.pool.emit_unchecked_class_cast(&mut self.builder, receiver, from, to)
    }

    fn emit_get_field(&mut self, index: u16, is_static: bool) -> CompileResult<()> {
        let member = self.field_ref(index)?;
        let id = self
            .pool
            .resolve_field(self.ctx, &member.class_name, &member.name, &member.descriptor, is_static)?;
        let receiver = if is_static {
            None
        } else {
            let receiver = self.pop(Type::Object)?;
            let owner = self.ctx.field(id).class_name().to_string();
            Some(self.cast_receiver(receiver, &member.class_name, &owner)?)
        };
        let (field, unit) = self.ctx.field_in_unit(id, self.unit);
        let value = field.emit_load(self.unit, unit, &mut self.builder, receiver)?;
        self.push(value);
        Ok(())
    }

    fn emit_put_field(&mut self, index: u16, is_static: bool) -> CompileResult<()> {
        let member = self.field_ref(index)?;
        let id = self
            .pool
            .resolve_field(self.ctx, &member.class_name, &member.name, &member.descriptor, is_static)?;
        let value = self.env.stack.pop()?;
        let receiver = if is_static {
            None
        } else {
            let receiver = self.pop(Type::Object)?;
            let owner = self.ctx.field(id).class_name().to_string();
            Some(self.cast_receiver(receiver, &member.class_name, &owner)?)
        };
        let (field, unit) = self.ctx.field_in_unit(id, self.unit);
        field.emit_store(self.unit, unit, &mut self.builder, receiver, value)
    }

    fn emit_invoke(&mut self, index: u16, kind: Invoke) -> CompileResult<()> {
        let member = self.method_ref(index)?;
        let is_static = kind == Invoke::Static;
        let id = self
            .pool
            .resolve_method(self.ctx, &member.class_name, &member.name, &member.descriptor, is_static)?;
        let method = self.ctx.method(id);
        let params = method.parsed_descriptor().params.clone();
        let owner = method.class_name().to_string();

        let mut args = Vec::with_capacity(params.len() + 1);
        for &ty in params.iter().rev() {
            args.push(self.pop(ty)?.value);
        }
        if !is_static {
            let receiver = self.pop(Type::Object)?;
            args.push(self.cast_receiver(receiver, &member.class_name, &owner)?.value);
        }
        args.reverse();

        let dispatch = match kind {
            Invoke::Virtual => Dispatch::Virtual,
            Invoke::Static | Invoke::Special => Dispatch::Direct,
        };
        let (method, unit) = self.ctx.method_in_unit(id, self.unit);
        if let Some(result) = method.emit_call(self.unit, unit, &mut self.builder, &args, dispatch)? {
            self.push(result);
        }
        Ok(())
    }

    fn emit_new(&mut self, index: u16) -> CompileResult<()> {
        let class_name = self.class_name(index)?;
        self.ctx.note_class_reference(&class_name);
        let id = self.ctx.get_instantiator(&class_name);
        let (instantiator, unit) = self.ctx.instantiator_in_unit(id, self.unit);
        let object = instantiator.emit_call(self.unit, unit, &mut self.builder)?;
        self.push(object);
        Ok(())
    }
}
