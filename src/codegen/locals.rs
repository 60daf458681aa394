use std::collections::{BTreeMap, HashMap};

use cranelift_codegen::entity::EntityRef;
use cranelift_codegen::ir;
use cranelift_frontend::{FunctionBuilder, Variable};

use crate::error::{CompileError, CompileResult};
use crate::types::{Type, Value};

/// Storage for one JVM local slot at one type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TypedLocal {
    variable: Variable,
    ty: Type,
}

impl TypedLocal {
    pub fn variable(&self) -> Variable {
        self.variable
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn load(&self, builder: &mut FunctionBuilder) -> Value {
        Value::new(builder.use_var(self.variable), self.ty)
    }

    pub fn store(&self, builder: &mut FunctionBuilder, value: Value) -> CompileResult<()> {
        if value.ty != self.ty {
            return Err(CompileError::bad_bytecode(format!(
                "cannot store {} into {} local",
                value.ty, self.ty
            )));
        }
        builder.def_var(self.variable, value.value);
        Ok(())
    }
}

/// Every typed storage location behind one JVM slot index.
#[derive(Clone, Debug, Default)]
pub struct VirtualLocal {
    typed: BTreeMap<Type, TypedLocal>,
}

impl VirtualLocal {
    pub fn get(&self, ty: Type) -> Option<TypedLocal> {
        self.typed.get(&ty).copied()
    }

    pub fn types(&self) -> impl Iterator<Item = Type> + '_ {
        self.typed.keys().copied()
    }
}

/// The local variable bank of one method, plus the variables that carry
/// operand stack entries across block boundaries.
#[derive(Debug)]
pub struct LocalVariables {
    pointer_type: ir::Type,
    slots: HashMap<u16, VirtualLocal>,
    stack: HashMap<(usize, Type), Variable>,
    next_variable: usize,
}

impl LocalVariables {
    pub fn new(pointer_type: ir::Type) -> Self {
        LocalVariables {
            pointer_type,
            slots: HashMap::new(),
            stack: HashMap::new(),
            next_variable: 0,
        }
    }

    fn declare(&mut self, builder: &mut FunctionBuilder, ty: Type) -> CompileResult<Variable> {
        let backend_type = ty
            .backend_type(self.pointer_type)
            .ok_or_else(|| CompileError::bad_bytecode("cannot declare a void variable"))?;
        let variable = Variable::new(self.next_variable);
        self.next_variable += 1;
        builder.declare_var(variable, backend_type);
        Ok(variable)
    }

    /// The storage for slot `index` at type `ty`, created on first use.
    pub fn get(&mut self, builder: &mut FunctionBuilder, index: u16, ty: Type) -> CompileResult<TypedLocal> {
        if let Some(local) = self.slots.get(&index).and_then(|slot| slot.get(ty)) {
            return Ok(local);
        }
        let variable = self.declare(builder, ty)?;
        let local = TypedLocal { variable, ty };
        self.slots.entry(index).or_default().typed.insert(ty, local);
        log::trace!("local {index} gets {ty} storage");
        Ok(local)
    }

    pub fn slot(&self, index: u16) -> Option<&VirtualLocal> {
        self.slots.get(&index)
    }

    /// The variable holding operand stack entry `depth` of type `ty` at block edges.
    pub fn stack_slot(&mut self, builder: &mut FunctionBuilder, depth: usize, ty: Type) -> CompileResult<Variable> {
        if let Some(&variable) = self.stack.get(&(depth, ty)) {
            return Ok(variable);
        }
        let variable = self.declare(builder, ty)?;
        self.stack.insert((depth, ty), variable);
        Ok(variable)
    }
}
