//! The declaration registry shared by every class and method of one compilation.

mod unit;

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use cranelift_codegen::ir;
use cranelift_codegen::isa::{self, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use target_lexicon::Triple;

use crate::class::field::FieldDeclaration;
use crate::class::instantiate::ClassInstantiator;
use crate::class::method::MethodDeclaration;
use crate::compiler::CompileOptions;
use crate::error::{CompileError, CompileResult};
use crate::mangle::NameMangler;
use crate::runtime_abi::RuntimeAbi;
use crate::types::descriptor::{parse_field_descriptor, parse_method_descriptor};

pub use unit::{CompilationUnit, ObjectFile};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstantiatorId(pub(crate) usize);

/// Interning key for fields and methods.
pub fn declaration_key(class_name: &str, name: &str, descriptor: &str) -> String {
    format!("{class_name} {name} {descriptor}")
}

/// Owns every declaration, compilation unit and the target description.
///
/// Declarations are created once per key and referred to by id afterwards, so
/// two lookups of the same member always yield the same declaration.
pub struct Context {
    options: CompileOptions,
    isa: OwnedTargetIsa,
    mangler: Box<dyn NameMangler>,

    pub(crate) fields: Vec<FieldDeclaration>,
    field_keys: HashMap<String, FieldId>,
    pub(crate) methods: Vec<MethodDeclaration>,
    method_keys: HashMap<String, MethodId>,
    pub(crate) instantiators: Vec<ClassInstantiator>,
    instantiator_keys: HashMap<String, InstantiatorId>,
    pub(crate) runtime: RuntimeAbi,

    pub(crate) units: Vec<CompilationUnit>,
    global_unit: Option<UnitId>,

    referenced_classes: HashSet<String>,
    pending_classes: Vec<String>,
}

impl Context {
    pub fn new(options: CompileOptions) -> CompileResult<Self> {
        let isa = build_isa(&options)?;
        let mangler = options.mangling.mangler();
        Ok(Context {
            options,
            isa,
            mangler,
            fields: Vec::new(),
            field_keys: HashMap::new(),
            methods: Vec::new(),
            method_keys: HashMap::new(),
            instantiators: Vec::new(),
            instantiator_keys: HashMap::new(),
            runtime: RuntimeAbi::default(),
            units: Vec::new(),
            global_unit: None,
            referenced_classes: HashSet::new(),
            pending_classes: Vec::new(),
        })
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn mangler(&self) -> &dyn NameMangler {
        self.mangler.as_ref()
    }

    pub fn pointer_type(&self) -> ir::Type {
        self.isa.pointer_type()
    }

    pub fn pointer_bytes(&self) -> u32 {
        self.pointer_type().bytes()
    }

    // ------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------

    /// The unit a class's definitions go into: the shared unit in single-unit
    /// mode, otherwise a fresh one named after the class.
    pub fn create_unit_for_class(&mut self, class_name: &str) -> CompileResult<UnitId> {
        if self.options.single_unit {
            if let Some(id) = self.global_unit {
                return Ok(id);
            }
            let id = self.create_unit("global_unit")?;
            self.global_unit = Some(id);
            return Ok(id);
        }
        self.create_unit(class_name)
    }

    fn create_unit(&mut self, name: &str) -> CompileResult<UnitId> {
        let id = UnitId(self.units.len());
        let unit = CompilationUnit::new(id, name, self.isa.clone(), self.options.capture_ir)?;
        self.units.push(unit);
        Ok(id)
    }

    pub fn unit(&self, id: UnitId) -> &CompilationUnit {
        &self.units[id.0]
    }

    pub fn unit_mut(&mut self, id: UnitId) -> &mut CompilationUnit {
        &mut self.units[id.0]
    }

    pub fn units(&self) -> &[CompilationUnit] {
        &self.units
    }

    pub(crate) fn into_units(self) -> Vec<CompilationUnit> {
        self.units
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    pub fn lookup_field(&self, class_name: &str, name: &str, descriptor: &str) -> Option<FieldId> {
        self.field_keys
            .get(&declaration_key(class_name, name, descriptor))
            .copied()
    }

    /// The canonical field for this key, created on first request.
    pub fn get_field(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> CompileResult<FieldId> {
        if let Some(id) = self.lookup_field(class_name, name, descriptor) {
            if self.fields[id.0].is_static() != is_static {
                return Err(staticness_mismatch("field", class_name, name, descriptor, is_static));
            }
            return Ok(id);
        }
        let ty = parse_field_descriptor(descriptor)?;
        let id = FieldId(self.fields.len());
        let field = FieldDeclaration::new(
            self.mangler.as_ref(),
            class_name,
            name,
            descriptor,
            ty,
            is_static,
            self.pointer_bytes(),
        );
        self.fields.push(field);
        self.field_keys
            .insert(declaration_key(class_name, name, descriptor), id);
        Ok(id)
    }

    pub fn lookup_method(&self, class_name: &str, name: &str, descriptor: &str) -> Option<MethodId> {
        self.method_keys
            .get(&declaration_key(class_name, name, descriptor))
            .copied()
    }

    /// The canonical method for this key, created on first request.
    pub fn get_method(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> CompileResult<MethodId> {
        if let Some(id) = self.lookup_method(class_name, name, descriptor) {
            if self.methods[id.0].is_static() != is_static {
                return Err(staticness_mismatch("method", class_name, name, descriptor, is_static));
            }
            return Ok(id);
        }
        let parsed = parse_method_descriptor(descriptor)?;
        let id = MethodId(self.methods.len());
        let method = MethodDeclaration::new(
            self.mangler.as_ref(),
            class_name,
            name,
            descriptor,
            parsed,
            is_static,
        );
        self.methods.push(method);
        self.method_keys
            .insert(declaration_key(class_name, name, descriptor), id);
        Ok(id)
    }

    pub fn get_instantiator(&mut self, class_name: &str) -> InstantiatorId {
        if let Some(&id) = self.instantiator_keys.get(class_name) {
            return id;
        }
        let id = InstantiatorId(self.instantiators.len());
        self.instantiators
            .push(ClassInstantiator::new(self.mangler.as_ref(), class_name));
        self.instantiator_keys.insert(class_name.to_string(), id);
        id
    }

    pub fn field(&self, id: FieldId) -> &FieldDeclaration {
        &self.fields[id.0]
    }

    pub fn method(&self, id: MethodId) -> &MethodDeclaration {
        &self.methods[id.0]
    }

    pub fn instantiator(&self, id: InstantiatorId) -> &ClassInstantiator {
        &self.instantiators[id.0]
    }

    pub(crate) fn method_mut(&mut self, id: MethodId) -> &mut MethodDeclaration {
        &mut self.methods[id.0]
    }

    pub(crate) fn field_in_unit(
        &mut self,
        id: FieldId,
        unit: UnitId,
    ) -> (&mut FieldDeclaration, &mut CompilationUnit) {
        (&mut self.fields[id.0], &mut self.units[unit.0])
    }

    pub(crate) fn method_in_unit(
        &mut self,
        id: MethodId,
        unit: UnitId,
    ) -> (&mut MethodDeclaration, &mut CompilationUnit) {
        (&mut self.methods[id.0], &mut self.units[unit.0])
    }

    pub(crate) fn methods_in_unit(
        &mut self,
        unit: UnitId,
    ) -> (&mut [MethodDeclaration], &mut CompilationUnit) {
        (self.methods.as_mut_slice(), &mut self.units[unit.0])
    }

    pub(crate) fn instantiator_in_unit(
        &mut self,
        id: InstantiatorId,
        unit: UnitId,
    ) -> (&mut ClassInstantiator, &mut CompilationUnit) {
        (&mut self.instantiators[id.0], &mut self.units[unit.0])
    }

    pub(crate) fn runtime_in_unit(&mut self, unit: UnitId) -> (&mut RuntimeAbi, &mut CompilationUnit) {
        (&mut self.runtime, &mut self.units[unit.0])
    }

    // ------------------------------------------------------------------
    // Referenced classes
    // ------------------------------------------------------------------

    /// Record that emitted code refers to `class_name`.
    pub fn note_class_reference(&mut self, class_name: &str) {
        if self.referenced_classes.insert(class_name.to_string()) {
            self.pending_classes.push(class_name.to_string());
        }
    }

    /// Classes referenced since the last call, in first-reference order.
    pub fn take_pending_classes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_classes)
    }
}

fn staticness_mismatch(
    kind: &str,
    class_name: &str,
    name: &str,
    descriptor: &str,
    requested_static: bool,
) -> CompileError {
    let (requested, existing) = if requested_static {
        ("static", "instance")
    } else {
        ("instance", "static")
    };
    CompileError::bad_bytecode(format!(
        "{kind} {class_name}.{name}{descriptor} used as {requested} but declared as {existing}"
    ))
}

fn build_isa(options: &CompileOptions) -> CompileResult<OwnedTargetIsa> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", options.opt_level.as_str())
        .map_err(|e| CompileError::Target(e.to_string()))?;
    flag_builder
        .set("is_pic", "true")
        .map_err(|e| CompileError::Target(e.to_string()))?;

    let triple = match &options.target {
        Some(target) => Triple::from_str(target)
            .map_err(|e| CompileError::Target(format!("invalid target triple {target}: {e}")))?,
        None => Triple::host(),
    };
    let isa_builder = isa::lookup(triple).map_err(|e| CompileError::Target(e.to_string()))?;
    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| CompileError::Target(e.to_string()))
}
