use std::collections::HashMap;
use std::rc::Rc;

use cranelift_codegen::ir::{self, AbiParam, InstBuilder, MemFlags, Signature};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::{FuncId, Linkage};

use crate::classfile::{CodeAttribute, MethodAccessFlags};
use crate::context::{CompilationUnit, UnitId};
use crate::error::{CompileError, CompileResult};
use crate::mangle::NameMangler;
use crate::types::descriptor::MethodDescriptor;
use crate::types::{Type, Value};

use super::ClassId;

const CONSTRUCTOR_NAME: &str = "<init>";

/// How a call site reaches its target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Call the method's own symbol.
    Direct,
    /// Go through the virtual thunk when the method can be overridden.
    Virtual,
}

/// What is known about a method once its owning class has been loaded.
#[derive(Clone, Debug)]
struct Resolution {
    owner: ClassId,
    access_flags: MethodAccessFlags,
    owner_is_final: bool,
    code: Option<Rc<CodeAttribute>>,
}

/// The canonical declaration of one method.
///
/// A declaration may be created by a call site before the class that owns it
/// has been loaded; it is then a forward reference whose owner and bytecode
/// are filled in later.
#[derive(Debug)]
pub struct MethodDeclaration {
    class_name: String,
    name: String,
    descriptor: String,
    parsed: MethodDescriptor,
    is_static: bool,
    symbol: String,
    virtual_symbol: String,
    resolution: Option<Resolution>,
    vtable_index: Option<usize>,
    direct: HashMap<UnitId, FuncId>,
    thunks: HashMap<UnitId, FuncId>,
}

impl MethodDeclaration {
    pub(crate) fn new(
        mangler: &dyn NameMangler,
        class_name: &str,
        name: &str,
        descriptor: &str,
        parsed: MethodDescriptor,
        is_static: bool,
    ) -> Self {
        MethodDeclaration {
            class_name: class_name.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            parsed,
            is_static,
            symbol: mangler.mangle_method_name(class_name, name, descriptor),
            virtual_symbol: mangler.mangle_virtual_dispatch_name(class_name, name, descriptor),
            resolution: None,
            vtable_index: None,
            direct: HashMap::new(),
            thunks: HashMap::new(),
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

    pub fn parsed_descriptor(&self) -> &MethodDescriptor {
        &self.parsed
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn virtual_symbol(&self) -> &str {
        &self.virtual_symbol
    }

    pub fn owner(&self) -> Option<ClassId> {
        self.resolution.as_ref().map(|r| r.owner)
    }

    pub fn code(&self) -> Option<&Rc<CodeAttribute>> {
        self.resolution.as_ref()?.code.as_ref()
    }

    pub fn access_flags(&self) -> Option<MethodAccessFlags> {
        self.resolution.as_ref().map(|r| r.access_flags)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    fn has_flag(&self, flag: MethodAccessFlags) -> bool {
        self.access_flags().is_some_and(|flags| flags.contains(flag))
    }

    pub fn is_private(&self) -> bool {
        self.has_flag(MethodAccessFlags::PRIVATE)
    }

    pub fn is_native(&self) -> bool {
        self.has_flag(MethodAccessFlags::NATIVE)
    }

    pub fn is_abstract(&self) -> bool {
        self.has_flag(MethodAccessFlags::ABSTRACT)
    }

    /// Whether this method has a body that will be compiled.
    pub fn has_body(&self) -> bool {
        !self.is_native() && !self.is_abstract() && self.code().is_some()
    }

    /// Slot in the owner's vtable, `None` for non-virtual methods.
    pub fn vtable_index(&self) -> Option<usize> {
        self.vtable_index
    }

    pub fn is_virtual(&self) -> bool {
        self.vtable_index.is_some()
    }

    /// Whether a subclass may replace this method. Unresolved methods are
    /// assumed to be overridable.
    pub fn can_be_overridden(&self) -> bool {
        if self.is_static || self.is_constructor() || self.is_private() {
            return false;
        }
        match &self.resolution {
            None => true,
            Some(resolution) => {
                !resolution.access_flags.contains(MethodAccessFlags::FINAL) && !resolution.owner_is_final
            }
        }
    }

    /// Whether this method takes a vtable slot, given that the superclass
    /// vtable does (or does not) already hold an entry for its signature.
    pub fn needs_vtable_slot(&self, overrides_inherited: bool) -> bool {
        !self.is_static
            && !self.is_constructor()
            && !self.is_private()
            && (self.can_be_overridden() || overrides_inherited)
    }

    pub(crate) fn set_resolved(
        &mut self,
        owner: ClassId,
        access_flags: MethodAccessFlags,
        owner_is_final: bool,
        code: Option<Rc<CodeAttribute>>,
    ) {
        self.resolution = Some(Resolution {
            owner,
            access_flags,
            owner_is_final,
            code,
        });
    }

    pub(crate) fn set_vtable_index(&mut self, index: usize) {
        self.vtable_index = Some(index);
    }

    /// The machine-level signature: receiver first for instance methods.
    pub fn signature(&self, unit: &CompilationUnit) -> CompileResult<Signature> {
        let pointer_type = unit.pointer_type();
        let mut sig = unit.make_signature();
        for param in self.parsed.instance_params(self.is_static) {
            let ty = param.backend_type(pointer_type).ok_or_else(|| {
                CompileError::bad_bytecode(format!("void parameter in {}{}", self.name, self.descriptor))
            })?;
            sig.params.push(AbiParam::new(ty));
        }
        if let Some(ty) = self.parsed.return_type.backend_type(pointer_type) {
            sig.returns.push(AbiParam::new(ty));
        }
        Ok(sig)
    }

    /// Declare the method's own symbol in `unit`.
    pub(crate) fn declare_direct(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        linkage: Linkage,
    ) -> CompileResult<(FuncId, Signature)> {
        let sig = self.signature(unit)?;
        if let (Some(&id), Linkage::Import) = (self.direct.get(&unit_id), linkage) {
            return Ok((id, sig));
        }
        let id = unit.declare_function(&self.symbol, linkage, &sig)?;
        self.direct.insert(unit_id, id);
        Ok((id, sig))
    }

    /// Declare the method's virtual thunk in `unit`.
    pub(crate) fn declare_thunk(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        linkage: Linkage,
    ) -> CompileResult<(FuncId, Signature)> {
        if self.is_static {
            return Err(CompileError::bad_bytecode(format!(
                "static method {}.{}{} has no virtual thunk",
                self.class_name, self.name, self.descriptor
            )));
        }
        let sig = self.signature(unit)?;
        if let (Some(&id), Linkage::Import) = (self.thunks.get(&unit_id), linkage) {
            return Ok((id, sig));
        }
        let id = unit.declare_function(&self.virtual_symbol, linkage, &sig)?;
        self.thunks.insert(unit_id, id);
        Ok((id, sig))
    }

    /// Define the virtual thunk: load the vtable from the receiver, fetch the
    /// entry at this method's index and call through it.
    pub(crate) fn emit_thunk_definition(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        vtable_slot_offset: u32,
    ) -> CompileResult<()> {
        let index = self.vtable_index.ok_or_else(|| {
            CompileError::bad_bytecode(format!(
                "could not find virtual method {}.{}{}",
                self.class_name, self.name, self.descriptor
            ))
        })?;
        let (thunk, sig) = self.declare_thunk(unit_id, unit, Linkage::Export)?;
        let pointer_type = unit.pointer_type();
        let entry_offset = (index as u32 * pointer_type.bytes()) as i32;
        let call_sig = sig.clone();
        unit.build_function(thunk, &self.virtual_symbol, sig, |builder, _, entry| {
            let args = builder.block_params(entry).to_vec();
            let vtable = builder.ins().load(
                pointer_type,
                MemFlags::new().with_aligned(),
                args[0],
                vtable_slot_offset as i32,
            );
            let target = builder
                .ins()
                .load(pointer_type, MemFlags::trusted().with_readonly(), vtable, entry_offset);
            let sig_ref = builder.import_signature(call_sig);
            let call = builder.ins().call_indirect(sig_ref, target, &args);
            let results = builder.inst_results(call).to_vec();
            builder.ins().return_(&results);
            Ok(())
        })?;
        log::trace!("emitted thunk {} at vtable index {index}", self.virtual_symbol);
        Ok(())
    }

    /// Emit a call to this method with `args` already in machine order.
    pub(crate) fn emit_call(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        builder: &mut FunctionBuilder,
        args: &[ir::Value],
        dispatch: Dispatch,
    ) -> CompileResult<Option<Value>> {
        let through_thunk = dispatch == Dispatch::Virtual && self.can_be_overridden();
        let (callee, _) = if through_thunk {
            self.declare_thunk(unit_id, unit, Linkage::Import)?
        } else {
            self.declare_direct(unit_id, unit, Linkage::Import)?
        };
        let callee = unit.func_ref(callee, builder);
        let call = builder.ins().call(callee, args);
        Ok(match self.parsed.return_type {
            Type::Void => None,
            ty => Some(Value::new(builder.inst_results(call)[0], ty)),
        })
    }
}
