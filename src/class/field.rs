use std::collections::HashMap;

use cranelift_codegen::ir::{self, AbiParam, InstBuilder, MemFlags, Signature};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};

use crate::context::{CompilationUnit, UnitId};
use crate::error::{CompileError, CompileResult};
use crate::mangle::NameMangler;
use crate::types::layout::{ElementType, StructElementLayout};
use crate::types::{Type, Value};

use super::ClassId;

#[derive(Debug)]
enum FieldKind {
    /// A global in the owner's unit.
    Static {
        symbol: String,
        globals: HashMap<UnitId, DataId>,
    },
    /// An element of the owner's struct, reached through accessor functions.
    Instance {
        getter_symbol: String,
        setter_symbol: String,
        layout: StructElementLayout,
        getters: HashMap<UnitId, FuncId>,
        setters: HashMap<UnitId, FuncId>,
    },
}

/// The canonical declaration of one field.
#[derive(Debug)]
pub struct FieldDeclaration {
    class_name: String,
    name: String,
    descriptor: String,
    ty: Type,
    owner: Option<ClassId>,
    kind: FieldKind,
}

impl FieldDeclaration {
    pub(crate) fn new(
        mangler: &dyn NameMangler,
        class_name: &str,
        name: &str,
        descriptor: &str,
        ty: Type,
        is_static: bool,
        pointer_bytes: u32,
    ) -> Self {
        let kind = if is_static {
            FieldKind::Static {
                symbol: mangler.mangle_static_field_name(class_name, name, descriptor),
                globals: HashMap::new(),
            }
        } else {
            let element =
                ElementType::of(ty, pointer_bytes).unwrap_or(ElementType::pointer(pointer_bytes));
            FieldKind::Instance {
                getter_symbol: mangler.mangle_instance_field_getter(class_name, name, descriptor),
                setter_symbol: mangler.mangle_instance_field_setter(class_name, name, descriptor),
                layout: StructElementLayout::new(element),
                getters: HashMap::new(),
                setters: HashMap::new(),
            }
        };
        FieldDeclaration {
            class_name: class_name.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            ty,
            owner: None,
            kind,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn owner(&self) -> Option<ClassId> {
        self.owner
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, FieldKind::Static { .. })
    }

    /// Position inside the owner's struct; `None` for static fields.
    pub fn layout(&self) -> Option<&StructElementLayout> {
        match &self.kind {
            FieldKind::Instance { layout, .. } => Some(layout),
            FieldKind::Static { .. } => None,
        }
    }

    pub(crate) fn set_owner(&mut self, owner: ClassId) {
        self.owner = Some(owner);
    }

    pub(crate) fn set_layout(&mut self, resolved: StructElementLayout) {
        if let FieldKind::Instance { layout, .. } = &mut self.kind {
            *layout = resolved;
        }
    }

    fn byte_offset(&self) -> CompileResult<i32> {
        self.layout()
            .and_then(StructElementLayout::byte_offset)
            .map(|offset| offset as i32)
            .ok_or_else(|| {
                CompileError::bad_bytecode(format!(
                    "field {}.{} has no resolved layout",
                    self.class_name, self.name
                ))
            })
    }

    fn backend_type(&self, unit: &CompilationUnit) -> CompileResult<ir::Type> {
        self.ty.backend_type(unit.pointer_type()).ok_or_else(|| {
            CompileError::bad_bytecode(format!("field {}.{} has type void", self.class_name, self.name))
        })
    }

    fn global(&mut self, unit_id: UnitId, unit: &mut CompilationUnit, linkage: Linkage) -> CompileResult<DataId> {
        let FieldKind::Static { symbol, globals } = &mut self.kind else {
            return Err(CompileError::bad_bytecode(format!(
                "field {}.{} is not static",
                self.class_name, self.name
            )));
        };
        if let (Some(&id), Linkage::Import) = (globals.get(&unit_id), linkage) {
            return Ok(id);
        }
        let id = unit.declare_data(symbol, linkage, true)?;
        globals.insert(unit_id, id);
        Ok(id)
    }

    fn accessor(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        linkage: Linkage,
        setter: bool,
    ) -> CompileResult<(FuncId, Signature, String)> {
        let value_type = self.backend_type(unit)?;
        let FieldKind::Instance { getter_symbol, setter_symbol, getters, setters, .. } = &mut self.kind
        else {
            return Err(CompileError::bad_bytecode(format!(
                "field {}.{} is static",
                self.class_name, self.name
            )));
        };
        let (symbol, cache) = if setter {
            (setter_symbol, setters)
        } else {
            (getter_symbol, getters)
        };
        let mut sig = unit.make_signature();
        sig.params.push(AbiParam::new(unit.pointer_type()));
        if setter {
            sig.params.push(AbiParam::new(value_type));
        } else {
            sig.returns.push(AbiParam::new(value_type));
        }
        let id = match (cache.get(&unit_id), linkage) {
            (Some(&id), Linkage::Import) => id,
            _ => {
                let id = unit.declare_function(symbol, linkage, &sig)?;
                cache.insert(unit_id, id);
                id
            }
        };
        Ok((id, sig, symbol.clone()))
    }

    /// Emit the storage of a static field, or the accessors of an instance field,
    /// into the owner's unit.
    pub(crate) fn emit_definition(&mut self, unit_id: UnitId, unit: &mut CompilationUnit) -> CompileResult<()> {
        let value_type = self.backend_type(unit)?;
        if self.is_static() {
            let id = self.global(unit_id, unit, Linkage::Export)?;
            let mut data = DataDescription::new();
            data.define_zeroinit(value_type.bytes() as usize);
            data.set_align(value_type.bytes() as u64);
            unit.module_mut().define_data(id, &data)?;
            return Ok(());
        }

        let offset = self.byte_offset()?;
        let flags = MemFlags::new().with_aligned();

        let (getter, signature, symbol) = self.accessor(unit_id, unit, Linkage::Export, false)?;
        unit.build_function(getter, &symbol, signature, |builder, _, entry| {
            let this = builder.block_params(entry)[0];
            let value = builder.ins().load(value_type, flags, this, offset);
            builder.ins().return_(&[value]);
            Ok(())
        })?;

        let (setter, signature, symbol) = self.accessor(unit_id, unit, Linkage::Export, true)?;
        unit.build_function(setter, &symbol, signature, |builder, _, entry| {
            let params = builder.block_params(entry).to_vec();
            builder.ins().store(flags, params[1], params[0], offset);
            builder.ins().return_(&[]);
            Ok(())
        })?;
        Ok(())
    }

    /// Load the field's value. `object_ref` is the receiver for instance fields.
    pub(crate) fn emit_load(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        builder: &mut FunctionBuilder,
        object_ref: Option<Value>,
    ) -> CompileResult<Value> {
        let value_type = self.backend_type(unit)?;
        let value = match object_ref {
            None => {
                let global = self.global(unit_id, unit, Linkage::Import)?;
                let address = unit.data_address(global, builder);
                builder.ins().load(value_type, MemFlags::trusted(), address, 0)
            }
            Some(object) => {
                let (getter, _, _) = self.accessor(unit_id, unit, Linkage::Import, false)?;
                let callee = unit.func_ref(getter, builder);
                let call = builder.ins().call(callee, &[object.value]);
                builder.inst_results(call)[0]
            }
        };
        Ok(Value::new(value, self.ty))
    }

    /// Store `value` into the field. `object_ref` is the receiver for instance fields.
    pub(crate) fn emit_store(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        builder: &mut FunctionBuilder,
        object_ref: Option<Value>,
        value: Value,
    ) -> CompileResult<()> {
        if value.ty != self.ty {
            return Err(CompileError::bad_bytecode(format!(
                "cannot store {} into field {}.{} of type {}",
                value.ty, self.class_name, self.name, self.ty
            )));
        }
        match object_ref {
            None => {
                let global = self.global(unit_id, unit, Linkage::Import)?;
                let address = unit.data_address(global, builder);
                builder.ins().store(MemFlags::trusted(), value.value, address, 0);
            }
            Some(object) => {
                let (setter, _, _) = self.accessor(unit_id, unit, Linkage::Import, true)?;
                let callee = unit.func_ref(setter, builder);
                builder.ins().call(callee, &[object.value, value.value]);
            }
        }
        Ok(())
    }
}
