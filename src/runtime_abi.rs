//! Calls into the runtime support library.

use std::collections::HashMap;

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::{DataDescription, FuncId, Linkage, Module};

use crate::context::{CompilationUnit, UnitId};
use crate::error::CompileResult;
use crate::mangle::RUNTIME_PREFIX;
use crate::types::{Type, Value};

/// Runtime entry point `ptr string_pool_get(i32 length, ptr utf8_bytes)`.
pub fn string_pool_get_symbol() -> String {
    format!("{RUNTIME_PREFIX}string_pool_get")
}

/// Per-unit caches of runtime imports and generated literal getters.
#[derive(Debug, Default)]
pub struct RuntimeAbi {
    string_pool_get: HashMap<UnitId, FuncId>,
    string_getters: HashMap<(UnitId, String), FuncId>,
}

impl RuntimeAbi {
    fn string_pool_get(&mut self, unit_id: UnitId, unit: &mut CompilationUnit) -> CompileResult<FuncId> {
        if let Some(&id) = self.string_pool_get.get(&unit_id) {
            return Ok(id);
        }
        let pointer_type = unit.pointer_type();
        let mut sig = unit.make_signature();
        sig.params.push(AbiParam::new(types::I32));
        sig.params.push(AbiParam::new(pointer_type));
        sig.returns.push(AbiParam::new(pointer_type));
        let id = unit.declare_function(&string_pool_get_symbol(), Linkage::Import, &sig)?;
        self.string_pool_get.insert(unit_id, id);
        Ok(id)
    }

    /// The getter for `text` in this unit, generated on first use.
    ///
    /// The getter keeps the interned reference in a private cache slot, so the
    /// runtime is asked once per literal per unit.
    fn string_getter(&mut self, unit_id: UnitId, unit: &mut CompilationUnit, text: &str) -> CompileResult<FuncId> {
        if let Some(&id) = self.string_getters.get(&(unit_id, text.to_string())) {
            return Ok(id);
        }
        let pool_get = self.string_pool_get(unit_id, unit)?;
        let pointer_type = unit.pointer_type();
        let bytes = text.as_bytes().to_vec();
        let length = bytes.len() as i64;

        let contents = unit.module_mut().declare_anonymous_data(false, false)?;
        let mut data = DataDescription::new();
        data.define(bytes.into_boxed_slice());
        unit.module_mut().define_data(contents, &data)?;

        let cache = unit.module_mut().declare_anonymous_data(true, false)?;
        let mut data = DataDescription::new();
        data.define_zeroinit(pointer_type.bytes() as usize);
        data.set_align(u64::from(pointer_type.bytes()));
        unit.module_mut().define_data(cache, &data)?;

        let mut sig = unit.make_signature();
        sig.returns.push(AbiParam::new(pointer_type));
        let getter = unit.module_mut().declare_anonymous_function(&sig)?;
        let symbol = format!("string literal {text:?}");
        unit.build_function(getter, &symbol, sig, |builder, unit, _| {
            let miss = builder.create_block();
            let done = builder.create_block();
            builder.append_block_param(done, pointer_type);

            let slot = unit.data_address(cache, builder);
            let cached = builder.ins().load(pointer_type, MemFlags::trusted(), slot, 0);
            builder.ins().brif(cached, done, &[cached], miss, &[]);

            builder.switch_to_block(miss);
            let pool_get = unit.func_ref(pool_get, builder);
            let length = builder.ins().iconst(types::I32, length);
            let bytes = unit.data_address(contents, builder);
            let call = builder.ins().call(pool_get, &[length, bytes]);
            let interned = builder.inst_results(call)[0];
            builder.ins().store(MemFlags::trusted(), interned, slot, 0);
            builder.ins().jump(done, &[interned]);

            builder.switch_to_block(done);
            let result = builder.block_params(done)[0];
            builder.ins().return_(&[result]);
            Ok(())
        })?;
        self.string_getters.insert((unit_id, text.to_string()), getter);
        log::trace!("generated string literal getter for {text:?} in unit {}", unit.name());
        Ok(getter)
    }

    /// A reference to the interned string `text`.
    pub(crate) fn get_string_constant(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        builder: &mut FunctionBuilder,
        text: &str,
    ) -> CompileResult<Value> {
        let getter = self.string_getter(unit_id, unit, text)?;
        let callee = unit.func_ref(getter, builder);
        let call = builder.ins().call(callee, &[]);
        Ok(Value::new(builder.inst_results(call)[0], Type::Object))
    }
}
