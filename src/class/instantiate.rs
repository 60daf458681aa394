use std::collections::HashMap;

use cranelift_codegen::ir::{AbiParam, InstBuilder, MemFlags, Signature};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::{DataId, FuncId, Linkage, Module};

use crate::context::{CompilationUnit, UnitId};
use crate::error::CompileResult;
use crate::mangle::NameMangler;
use crate::types::layout::StructLayout;
use crate::types::{Type, Value};

const ALLOCATOR: &str = "malloc";

/// The allocation routine behind `new` for one class.
#[derive(Debug)]
pub struct ClassInstantiator {
    class_name: String,
    symbol: String,
    functions: HashMap<UnitId, FuncId>,
}

impl ClassInstantiator {
    pub(crate) fn new(mangler: &dyn NameMangler, class_name: &str) -> Self {
        ClassInstantiator {
            class_name: class_name.to_string(),
            symbol: mangler.mangle_instantiator_name(class_name),
            functions: HashMap::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn signature(unit: &CompilationUnit) -> Signature {
        let mut sig = unit.make_signature();
        sig.returns.push(AbiParam::new(unit.pointer_type()));
        sig
    }

    fn declare(&mut self, unit_id: UnitId, unit: &mut CompilationUnit, linkage: Linkage) -> CompileResult<FuncId> {
        if let (Some(&id), Linkage::Import) = (self.functions.get(&unit_id), linkage) {
            return Ok(id);
        }
        let id = unit.declare_function(&self.symbol, linkage, &Self::signature(unit))?;
        self.functions.insert(unit_id, id);
        Ok(id)
    }

    /// Define the routine: allocate `layout.size` bytes, zero them, install the
    /// vtable pointer and return the new instance.
    pub(crate) fn emit_definition(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        layout: &StructLayout,
        vtable: DataId,
        vtable_slot_offset: u32,
    ) -> CompileResult<()> {
        let id = self.declare(unit_id, unit, Linkage::Export)?;
        let pointer_type = unit.pointer_type();

        let mut malloc_sig = unit.make_signature();
        malloc_sig.params.push(AbiParam::new(pointer_type));
        malloc_sig.returns.push(AbiParam::new(pointer_type));
        let malloc = unit.declare_function(ALLOCATOR, Linkage::Import, &malloc_sig)?;

        let config = unit.module_mut().target_config();
        let size = u64::from(layout.size.max(1));
        let align = layout.align.min(u32::from(u8::MAX)) as u8;
        let signature = Self::signature(unit);
        unit.build_function(id, &self.symbol, signature, |builder, unit, _| {
            let malloc = unit.func_ref(malloc, builder);
            let size_value = builder.ins().iconst(pointer_type, size as i64);
            let call = builder.ins().call(malloc, &[size_value]);
            let object = builder.inst_results(call)[0];
            builder.emit_small_memset(config, object, 0, size, align, MemFlags::trusted());
            let vtable = unit.data_address(vtable, builder);
            builder
                .ins()
                .store(MemFlags::trusted(), vtable, object, vtable_slot_offset as i32);
            builder.ins().return_(&[object]);
            Ok(())
        })?;
        log::debug!(
            "emitted instantiator {} ({} bytes, align {})",
            self.symbol,
            layout.size,
            layout.align
        );
        Ok(())
    }

    /// Call the routine and return the new reference.
    pub(crate) fn emit_call(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        builder: &mut FunctionBuilder,
    ) -> CompileResult<Value> {
        let id = self.declare(unit_id, unit, Linkage::Import)?;
        let callee = unit.func_ref(id, builder);
        let call = builder.ins().call(callee, &[]);
        Ok(Value::new(builder.inst_results(call)[0], Type::Object))
    }
}
