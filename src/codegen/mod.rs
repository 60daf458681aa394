//! Translation of one method's bytecode into backend IR.

mod environment;
mod instructions;
mod locals;

use cranelift_codegen::ir::{Function, InstBuilder, UserFuncName};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::Linkage;

use crate::cfg::ControlFlowGraph;
use crate::class::ClassPool;
use crate::classfile::{ClassFile, CodeIterator};
use crate::context::{Context, MethodId, UnitId};
use crate::error::{CompileError, CompileResult};
use crate::types::descriptor::MethodDescriptor;
use crate::types::{Type, Value};

pub use environment::{Environment, Stack};
pub use locals::{LocalVariables, TypedLocal, VirtualLocal};

/// Everything needed while emitting one method body.
pub(crate) struct MethodCodegen<'a, 'f> {
    ctx: &'a mut Context,
    pool: &'a ClassPool,
    unit: UnitId,
    class_file: &'a ClassFile,
    descriptor: MethodDescriptor,
    env: Environment,
    builder: FunctionBuilder<'f>,
}

/// Compile the body of `method_id` into `unit_id`.
pub(crate) fn emit_method(
    ctx: &mut Context,
    pool: &ClassPool,
    method_id: MethodId,
    unit_id: UnitId,
) -> CompileResult<()> {
    let method = ctx.method(method_id);
    let (Some(owner), Some(code)) = (method.owner(), method.code().cloned()) else {
        return Err(CompileError::bad_bytecode(format!(
            "method {}.{}{} has no bytecode",
            method.class_name(),
            method.name(),
            method.descriptor()
        )));
    };
    let class_file = pool.class(owner).class_file().clone();
    let descriptor = method.parsed_descriptor().clone();
    let is_static = method.is_static();
    let symbol = method.symbol().to_string();
    log::debug!("emitting {}.{}{}", method.class_name(), method.name(), method.descriptor());

    let (method, unit) = ctx.method_in_unit(method_id, unit_id);
    let (func_id, signature) = method.declare_direct(unit_id, unit, Linkage::Export)?;
    let pointer_type = unit.pointer_type();

    let mut code_iter = CodeIterator::new(&code.code)?;
    let cfg = ControlFlowGraph::build(&mut code_iter)?;

    let mut func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), signature);
    let mut builder_context = FunctionBuilderContext::new();
    {
        let builder = FunctionBuilder::new(&mut func, &mut builder_context);
        let mut codegen = MethodCodegen {
            ctx: &mut *ctx,
            pool,
            unit: unit_id,
            class_file: &class_file,
            descriptor,
            env: Environment::new(cfg, pointer_type),
            builder,
        };
        codegen.emit_body(&mut code_iter, is_static)?;
        codegen.builder.finalize();
    }
    ctx.unit_mut(unit_id).define_function(func_id, &symbol, func)
}

impl MethodCodegen<'_, '_> {
    fn emit_body(&mut self, code: &mut CodeIterator, is_static: bool) -> CompileResult<()> {
        // A dedicated entry block copies the arguments into their locals so
        // that the first bytecode block may be a branch target.
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        for start in self.env.cfg.starts() {
            let block = self.builder.create_block();
            self.env.cfg.bind(start, block)?;
        }

        self.builder.switch_to_block(entry);
        let args = self.builder.block_params(entry).to_vec();
        let params = self.descriptor.instance_params(is_static);
        let mut slot = 0u16;
        for (ty, arg) in params.into_iter().zip(args) {
            let local = self.env.locals.get(&mut self.builder, slot, ty)?;
            local.store(&mut self.builder, Value::new(arg, ty))?;
            slot += ty.width();
        }
        let first = self.env.cfg.backend_block(0)?;
        self.builder.ins().jump(first, &[]);

        let blocks: Vec<(u32, u32)> = self.env.cfg.blocks().map(|b| (b.start, b.end)).collect();
        for (start, end) in blocks {
            self.env.enter_block(&mut self.builder, start)?;
            log::trace!("block [{start}, {end})");
            code.move_to(start)?;
            while code.has_next() && code.offset() < end {
                let Some((address, instruction)) = code.next() else {
                    break;
                };
                if self.env.is_terminated() {
                    log::trace!("skipping unreachable {instruction:?} at {address}");
                    continue;
                }
                log::trace!("{address}: {instruction:?}");
                self.emit_instruction(address, code.offset(), instruction)?;
            }
            if !self.env.is_terminated() {
                if end >= self.env.cfg.code_length() {
                    return Err(CompileError::bad_bytecode(format!(
                        "control falls off the end of the code at offset {end}"
                    )));
                }
                self.emit_jump(end)?;
            }
        }

        self.builder.seal_all_blocks();
        Ok(())
    }

    /// Unconditional jump to the block at `target`, carrying the stack along.
    fn emit_jump(&mut self, target: u32) -> CompileResult<()> {
        self.env.spill_for_edge(&mut self.builder, &[target])?;
        let block = self.env.cfg.backend_block(target)?;
        self.builder.ins().jump(block, &[]);
        self.env.set_terminated();
        Ok(())
    }

    fn push(&mut self, value: Value) {
        self.env.stack.push(value);
    }

    fn pop(&mut self, ty: Type) -> CompileResult<Value> {
        self.env.stack.pop_typed(ty)
    }
}
