use std::collections::BTreeMap;

use cranelift_codegen::ir::{self, Block, Function, InstBuilder, Signature, UserFuncName};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::print_errors::pretty_verifier_error;
use cranelift_codegen::CodegenError;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{default_libcall_names, DataId, FuncId, Linkage, Module, ModuleError};
use cranelift_object::{ObjectBuilder, ObjectModule};

use crate::error::{CompileError, CompileResult};

use super::UnitId;

/// One backend module. Depending on configuration a unit holds a single class
/// or the whole program.
pub struct CompilationUnit {
    id: UnitId,
    name: String,
    module: ObjectModule,
    captured_ir: Option<BTreeMap<String, String>>,
}

/// A finished unit as relocatable object file bytes.
#[derive(Clone, Debug)]
pub struct ObjectFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl CompilationUnit {
    pub(crate) fn new(
        id: UnitId,
        name: &str,
        isa: OwnedTargetIsa,
        capture_ir: bool,
    ) -> CompileResult<Self> {
        let builder = ObjectBuilder::new(isa, name, default_libcall_names())?;
        log::debug!("created compilation unit {name}");
        Ok(CompilationUnit {
            id,
            name: name.to_string(),
            module: ObjectModule::new(builder),
            captured_ir: capture_ir.then(BTreeMap::new),
        })
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_mut(&mut self) -> &mut ObjectModule {
        &mut self.module
    }

    pub fn pointer_type(&self) -> ir::Type {
        self.module.target_config().pointer_type()
    }

    pub fn pointer_bytes(&self) -> u32 {
        self.pointer_type().bytes()
    }

    /// An empty signature with the target's default calling convention.
    pub fn make_signature(&self) -> Signature {
        self.module.make_signature()
    }

    pub(crate) fn declare_function(
        &mut self,
        name: &str,
        linkage: Linkage,
        signature: &Signature,
    ) -> CompileResult<FuncId> {
        Ok(self.module.declare_function(name, linkage, signature)?)
    }

    pub(crate) fn declare_data(&mut self, name: &str, linkage: Linkage, writable: bool) -> CompileResult<DataId> {
        Ok(self.module.declare_data(name, linkage, writable, false)?)
    }

    /// Reference to a declared function from inside the function being built.
    pub(crate) fn func_ref(&mut self, id: FuncId, builder: &mut FunctionBuilder) -> ir::FuncRef {
        self.module.declare_func_in_func(id, builder.func)
    }

    /// Address of a declared data object from inside the function being built.
    pub(crate) fn data_address(&mut self, id: DataId, builder: &mut FunctionBuilder) -> ir::Value {
        let global = self.module.declare_data_in_func(id, builder.func);
        builder.ins().symbol_value(self.pointer_type(), global)
    }

    /// Build and define a function with a single entry block. `body` starts with
    /// the builder positioned in the entry block, whose parameters are the
    /// function's parameters, and must terminate every block it creates.
    pub(crate) fn build_function<F>(
        &mut self,
        id: FuncId,
        symbol: &str,
        signature: Signature,
        body: F,
    ) -> CompileResult<()>
    where
        F: FnOnce(&mut FunctionBuilder, &mut CompilationUnit, Block) -> CompileResult<()>,
    {
        let mut func = Function::with_name_signature(UserFuncName::user(0, id.as_u32()), signature);
        let mut builder_context = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut func, &mut builder_context);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            body(&mut builder, self, entry)?;
            builder.seal_all_blocks();
            builder.finalize();
        }
        self.define_function(id, symbol, func)
    }

    /// Compile `func` into this unit under the previously declared `id`.
    pub(crate) fn define_function(&mut self, id: FuncId, symbol: &str, func: Function) -> CompileResult<()> {
        if let Some(captured) = &mut self.captured_ir {
            captured.insert(symbol.to_string(), func.display().to_string());
        }
        let mut ctx = cranelift_codegen::Context::for_function(func);
        self.module.define_function(id, &mut ctx).map_err(|err| match err {
            ModuleError::Compilation(CodegenError::Verifier(errors)) => CompileError::Verifier(
                format!("{symbol}: {}", pretty_verifier_error(&ctx.func, None, errors)),
            ),
            other => other.into(),
        })
    }

    /// Textual IR of a function defined in this unit, when IR capture is enabled.
    pub fn function_ir(&self, symbol: &str) -> Option<&str> {
        self.captured_ir.as_ref()?.get(symbol).map(String::as_str)
    }

    /// Whether `symbol` has been declared in this unit, imported or defined.
    pub fn declares(&self, symbol: &str) -> bool {
        self.module.get_name(symbol).is_some()
    }

    /// Symbols of every captured function.
    pub fn captured_symbols(&self) -> impl Iterator<Item = &str> {
        self.captured_ir
            .iter()
            .flat_map(|captured| captured.keys().map(String::as_str))
    }

    pub fn finish(self) -> CompileResult<ObjectFile> {
        let product = self.module.finish();
        let bytes = product
            .emit()
            .map_err(|e| CompileError::Emit(format!("{}: {e}", self.name)))?;
        Ok(ObjectFile {
            name: self.name,
            bytes,
        })
    }
}
