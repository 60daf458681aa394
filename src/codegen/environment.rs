use std::collections::HashMap;

use cranelift_codegen::ir;
use cranelift_frontend::FunctionBuilder;

use crate::cfg::ControlFlowGraph;
use crate::error::{CompileError, CompileResult};
use crate::types::{Type, Value};

use super::locals::LocalVariables;

/// The operand stack of the method being compiled.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    values: Vec<Value>,
}

impl Stack {
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn pop(&mut self) -> CompileResult<Value> {
        self.values
            .pop()
            .ok_or_else(|| CompileError::bad_bytecode("operand stack underflow"))
    }

    /// Pop a value that must be of type `ty`.
    pub fn pop_typed(&mut self, ty: Type) -> CompileResult<Value> {
        let value = self.pop()?;
        if value.ty != ty {
            return Err(CompileError::bad_bytecode(format!(
                "expected {ty} on the operand stack, found {}",
                value.ty
            )));
        }
        Ok(value)
    }

    pub fn peek(&self) -> CompileResult<Value> {
        self.values
            .last()
            .copied()
            .ok_or_else(|| CompileError::bad_bytecode("operand stack underflow"))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Types from the bottom of the stack up.
    pub fn shape(&self) -> Vec<Type> {
        self.values.iter().map(|v| v.ty).collect()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Per-method code generation state.
#[derive(Debug)]
pub struct Environment {
    pub stack: Stack,
    pub cfg: ControlFlowGraph,
    pub locals: LocalVariables,
    current: Option<u32>,
    terminated: bool,
    entry_shapes: HashMap<u32, Vec<Type>>,
}

impl Environment {
    pub fn new(cfg: ControlFlowGraph, pointer_type: ir::Type) -> Self {
        Environment {
            stack: Stack::default(),
            cfg,
            locals: LocalVariables::new(pointer_type),
            current: None,
            terminated: false,
            entry_shapes: HashMap::new(),
        }
    }

    /// Start offset of the block being emitted.
    pub fn current_block(&self) -> Option<u32> {
        self.current
    }

    /// Whether the block being emitted already ended in a terminator.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn set_terminated(&mut self) {
        self.terminated = true;
    }

    /// Switch to the block at `start` and rebuild the operand stack it is
    /// entered with.
    pub fn enter_block(&mut self, builder: &mut FunctionBuilder, start: u32) -> CompileResult<()> {
        let block = self.cfg.backend_block(start)?;
        builder.switch_to_block(block);
        self.current = Some(start);
        self.terminated = false;
        self.stack.clear();
        let shape = self.entry_shapes.entry(start).or_default().clone();
        for (depth, ty) in shape.into_iter().enumerate() {
            let variable = self.locals.stack_slot(builder, depth, ty)?;
            self.stack.push(Value::new(builder.use_var(variable), ty));
        }
        Ok(())
    }

    /// Hand the live operand stack to the blocks at `targets`.
    pub fn spill_for_edge(&mut self, builder: &mut FunctionBuilder, targets: &[u32]) -> CompileResult<()> {
        let shape = self.stack.shape();
        for &target in targets {
            match self.entry_shapes.get(&target) {
                Some(existing) if *existing != shape => {
                    return Err(CompileError::bad_bytecode(format!(
                        "inconsistent operand stack entering block at offset {target}: {existing:?} vs {shape:?}"
                    )));
                }
                Some(_) => {}
                None => {
                    self.entry_shapes.insert(target, shape.clone());
                }
            }
        }
        for (depth, value) in self.stack.values().to_vec().into_iter().enumerate() {
            let variable = self.locals.stack_slot(builder, depth, value.ty)?;
            builder.def_var(variable, value.value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_codegen::ir::Value as IrValue;
    use cranelift_codegen::entity::EntityRef;

    #[test]
    fn test_stack_underflow_is_bad_bytecode() {
        let mut stack = Stack::default();
        assert!(matches!(stack.pop(), Err(CompileError::BadBytecode(_))));
        assert!(stack.peek().is_err());
    }

    #[test]
    fn test_pop_typed_checks_kind() {
        let mut stack = Stack::default();
        stack.push(Value::new(IrValue::new(0), Type::Int));
        stack.push(Value::new(IrValue::new(1), Type::Long));
        assert_eq!(stack.shape(), vec![Type::Int, Type::Long]);
        assert!(stack.pop_typed(Type::Int).is_err());
        assert_eq!(stack.pop_typed(Type::Int).unwrap().value, IrValue::new(0));
        assert!(stack.is_empty());
    }
}
