//! The class model: struct layout, vtables and pointer casts.

pub mod field;
pub mod instantiate;
pub mod method;
pub mod vtable;

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use cranelift_codegen::ir::InstBuilder;
use cranelift_frontend::FunctionBuilder;

use crate::classfile::{ClassAccessFlags, ClassFile, ConstantInfo, FieldAccessFlags, MethodAccessFlags};
use crate::classpath::ClassPath;
use crate::codegen;
use crate::context::{Context, FieldId, InstantiatorId, MethodId, UnitId};
use crate::error::{CompileError, CompileResult};
use crate::types::layout::{ElementType, StructElementLayout, StructLayout, StructType};
use crate::types::Value;

use self::vtable::VTable;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClassState {
    /// Registered, superclass and members being resolved.
    LayingOut,
    /// Struct, members and vtable known; nothing emitted yet.
    LaidOut,
    /// Definitions being emitted.
    Defining,
    Defined,
}

/// One loaded class.
#[derive(Debug)]
pub struct ClassInfo {
    name: String,
    class_file: Rc<ClassFile>,
    state: ClassState,
    struct_type: StructType,
    super_class: Option<ClassId>,
    super_layout: Option<StructElementLayout>,
    vtable: Option<VTable>,
    fields: Vec<FieldId>,
    methods: Vec<MethodId>,
    unit: Option<UnitId>,
    instantiator: Option<InstantiatorId>,
}

impl ClassInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_file(&self) -> &Rc<ClassFile> {
        &self.class_file
    }

    pub fn state(&self) -> ClassState {
        self.state
    }

    pub fn struct_type(&self) -> &StructType {
        &self.struct_type
    }

    pub fn layout(&self) -> CompileResult<&StructLayout> {
        self.struct_type.layout().ok_or_else(|| not_laid_out(&self.name))
    }

    pub fn super_class(&self) -> Option<ClassId> {
        self.super_class
    }

    /// Where the superclass struct sits inside this class's struct.
    pub fn super_layout(&self) -> Option<&StructElementLayout> {
        self.super_layout.as_ref()
    }

    pub fn vtable(&self) -> CompileResult<&VTable> {
        self.vtable.as_ref().ok_or_else(|| not_laid_out(&self.name))
    }

    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    pub fn unit(&self) -> Option<UnitId> {
        self.unit
    }

    pub fn instantiator(&self) -> Option<InstantiatorId> {
        self.instantiator
    }

    pub fn is_final(&self) -> bool {
        self.class_file.access_flags.contains(ClassAccessFlags::FINAL)
    }
}

fn not_laid_out(name: &str) -> CompileError {
    CompileError::bad_bytecode(format!("class {name} has not been laid out"))
}

/// Loads classes from a class path and turns them into definitions.
///
/// A class is registered before its superclass is requested, so a cyclic
/// hierarchy is detected instead of recursing forever.
pub struct ClassPool {
    path: Box<dyn ClassPath>,
    classes: Vec<ClassInfo>,
    by_name: HashMap<String, ClassId>,
    parsed: HashMap<String, Option<Rc<ClassFile>>>,
}

impl ClassPool {
    pub fn new(path: Box<dyn ClassPath>) -> Self {
        ClassPool {
            path,
            classes: Vec::new(),
            by_name: HashMap::new(),
            parsed: HashMap::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0]
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassInfo> {
        self.lookup(name).map(|id| self.class(id))
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }

    fn load(&mut self, name: &str) -> CompileResult<Option<Rc<ClassFile>>> {
        if let Some(cached) = self.parsed.get(name) {
            return Ok(cached.clone());
        }
        let class_file = match self.path.find(name)? {
            None => None,
            Some(bytes) => {
                let class_file = ClassFile::from_bytes(&bytes)?;
                class_file.const_pool.check_text()?;
                let declared = class_file.class_name()?;
                if declared != name {
                    return Err(CompileError::bad_bytecode(format!(
                        "class file for {name} declares class {declared}"
                    )));
                }
                log::debug!("loaded class {name} ({} bytes)", bytes.len());
                Some(Rc::new(class_file))
            }
        };
        self.parsed.insert(name.to_string(), class_file.clone());
        Ok(class_file)
    }

    /// Whether `name` and its whole superclass chain can be loaded.
    pub fn is_available(&mut self, name: &str) -> CompileResult<bool> {
        let mut visited = HashSet::new();
        let mut current = name.to_string();
        loop {
            if self.by_name.contains_key(&current) || !visited.insert(current.clone()) {
                return Ok(true);
            }
            let Some(class_file) = self.load(&current)? else {
                return Ok(false);
            };
            match class_file.super_class_name()? {
                Some(super_name) => current = super_name,
                None => return Ok(true),
            }
        }
    }

    /// Load, lay out and emit `name` together with its superclass chain.
    pub fn get(&mut self, ctx: &mut Context, name: &str) -> CompileResult<ClassId> {
        let id = self
            .layout(ctx, name)?
            .ok_or_else(|| CompileError::ClassNotFound(name.to_string()))?;
        self.emit_definition(ctx, id)?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------

    /// Resolve the struct, members and vtable of `name` without emitting
    /// anything. `None` when the class path does not have the class.
    pub fn layout(&mut self, ctx: &mut Context, name: &str) -> CompileResult<Option<ClassId>> {
        if let Some(id) = self.lookup(name) {
            if self.classes[id.0].state == ClassState::LayingOut {
                return Err(CompileError::bad_bytecode(format!(
                    "cyclic inheritance involving {name}"
                )));
            }
            return Ok(Some(id));
        }
        let Some(class_file) = self.load(name)? else {
            return Ok(None);
        };

        let id = ClassId(self.classes.len());
        self.classes.push(ClassInfo {
            name: name.to_string(),
            class_file: class_file.clone(),
            state: ClassState::LayingOut,
            struct_type: StructType::new(ctx.mangler().mangle_class_name(name)),
            super_class: None,
            super_layout: None,
            vtable: None,
            fields: Vec::new(),
            methods: Vec::new(),
            unit: None,
            instantiator: None,
        });
        self.by_name.insert(name.to_string(), id);

        let super_class = match class_file.super_class_name()? {
            None => None,
            Some(super_name) => match self.layout(ctx, &super_name)? {
                Some(super_id) => Some(super_id),
                None => {
                    return Err(CompileError::bad_bytecode(format!(
                        "could not find {name}'s super class {super_name}"
                    )))
                }
            },
        };

        // element 0 is the vtable pointer for a root class, the whole
        // superclass struct otherwise
        let pointer_bytes = ctx.pointer_bytes();
        let (mut vtable, first_element) = match super_class {
            None => (
                VTable::for_root_class(ctx.mangler(), name),
                ElementType::pointer(pointer_bytes),
            ),
            Some(super_id) => {
                let parent = &self.classes[super_id.0];
                (
                    VTable::for_subclass(ctx.mangler(), parent.vtable()?, name),
                    parent.layout()?.element_type(),
                )
            }
        };
        let mut elements = vec![StructElementLayout::new(first_element)];

        let mut fields = Vec::new();
        let mut instance_fields = Vec::new();
        for info in &class_file.fields {
            let field_name = class_file.utf8(info.name_index)?;
            let descriptor = class_file.utf8(info.descriptor_index)?;
            let is_static = info.access_flags.contains(FieldAccessFlags::STATIC);
            let field_id = ctx.get_field(name, &field_name, &descriptor, is_static)?;
            let field = &mut ctx.fields[field_id.0];
            field.set_owner(id);
            if let Some(layout) = field.layout() {
                instance_fields.push(field_id);
                elements.push(layout.clone());
            }
            fields.push(field_id);
        }

        let class = &mut self.classes[id.0];
        let layout = class.struct_type.set_body(&mut elements)?.clone();
        for (field_id, element) in instance_fields.iter().zip(&elements[1..]) {
            ctx.fields[field_id.0].set_layout(element.clone());
        }
        match super_class {
            None => vtable.set_slot_offset(elements[0].byte_offset().unwrap_or(0)),
            Some(_) => class.super_layout = Some(elements[0].clone()),
        }

        let owner_is_final = class_file.access_flags.contains(ClassAccessFlags::FINAL);
        let mut methods = Vec::new();
        for info in &class_file.methods {
            let method_name = class_file.utf8(info.name_index)?;
            let descriptor = class_file.utf8(info.descriptor_index)?;
            let is_static = info.access_flags.contains(MethodAccessFlags::STATIC);
            let method_id = ctx.get_method(name, &method_name, &descriptor, is_static)?;
            let code = class_file.method_code(info)?.map(Rc::new);
            let method = ctx.method_mut(method_id);
            method.set_resolved(id, info.access_flags, owner_is_final, code);
            if method.needs_vtable_slot(vtable.has_method(&method_name, &descriptor)) {
                let (index, previous) = vtable.add_method(&method_name, &descriptor, method_id);
                method.set_vtable_index(index);
                if previous.is_some() {
                    log::debug!("{name}.{method_name}{descriptor} overrides vtable entry {index}");
                }
            }
            methods.push(method_id);
        }

        let class = &mut self.classes[id.0];
        class.super_class = super_class;
        class.vtable = Some(vtable);
        class.fields = fields;
        class.methods = methods;
        class.state = ClassState::LaidOut;
        log::debug!(
            "laid out class {name}: {} bytes, {} fields, {} methods",
            layout.size,
            class.fields.len(),
            class.methods.len()
        );
        Ok(Some(id))
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    /// Emit the vtable, field storage and accessors, thunks, method bodies and
    /// instantiator of a laid out class, after those of its superclass.
    pub fn emit_definition(&mut self, ctx: &mut Context, id: ClassId) -> CompileResult<()> {
        match self.classes[id.0].state {
            ClassState::LaidOut => {}
            ClassState::Defining | ClassState::Defined => return Ok(()),
            ClassState::LayingOut => return Err(not_laid_out(&self.classes[id.0].name)),
        }
        self.classes[id.0].state = ClassState::Defining;
        if let Some(super_id) = self.classes[id.0].super_class {
            self.emit_definition(ctx, super_id)?;
        }

        // member references resolve against every class we can lay out
        let class_file = self.classes[id.0].class_file.clone();
        for entry in 1..class_file.const_pool.count() {
            if !matches!(class_file.const_pool.get(entry), Some(ConstantInfo::Class(_))) {
                continue;
            }
            let Some(referenced) = class_file.const_pool.class_name(entry) else {
                continue;
            };
            if self.is_available(&referenced)? {
                self.layout(ctx, &referenced)?;
            } else {
                log::debug!("referenced class {referenced} is not on the class path");
            }
        }

        let name = self.classes[id.0].name.clone();
        let unit_id = ctx.create_unit_for_class(&name)?;
        self.classes[id.0].unit = Some(unit_id);

        let class = &mut self.classes[id.0];
        let Some(vtable) = class.vtable.as_mut() else {
            return Err(not_laid_out(&name));
        };
        let (methods, unit) = ctx.methods_in_unit(unit_id);
        let vtable_data = vtable.emit_definition(unit_id, unit, methods)?;
        let vtable_slot_offset = vtable.slot_offset()?;

        for &field_id in &self.classes[id.0].fields {
            let (field, unit) = ctx.field_in_unit(field_id, unit_id);
            field.emit_definition(unit_id, unit)?;
        }

        let own_methods = self.classes[id.0].methods.clone();
        for &method_id in &own_methods {
            let (method, unit) = ctx.method_in_unit(method_id, unit_id);
            if method.is_virtual() {
                method.emit_thunk_definition(unit_id, unit, vtable_slot_offset)?;
            }
        }

        for &method_id in &own_methods {
            let method = ctx.method(method_id);
            if method.is_native() {
                log::warn!("skipping native method {}.{}{}", name, method.name(), method.descriptor());
                continue;
            }
            if !method.has_body() {
                continue;
            }
            codegen::emit_method(ctx, self, method_id, unit_id)?;
        }

        let layout = self.classes[id.0].layout()?.clone();
        let instantiator = ctx.get_instantiator(&name);
        let (routine, unit) = ctx.instantiator_in_unit(instantiator, unit_id);
        routine.emit_definition(unit_id, unit, &layout, vtable_data, vtable_slot_offset)?;

        let class = &mut self.classes[id.0];
        class.instantiator = Some(instantiator);
        class.state = ClassState::Defined;
        log::debug!("defined class {name} in unit {}", ctx.unit(unit_id).name());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Member resolution
    // ------------------------------------------------------------------

    fn ancestors(&self, class_name: &str) -> impl Iterator<Item = &ClassInfo> {
        let mut next = self.lookup(class_name);
        std::iter::from_fn(move || {
            let class = self.class(next?);
            next = class.super_class;
            Some(class)
        })
    }

    /// The method a reference to `class_name` denotes: the declaration of the
    /// nearest loaded class in the superclass chain, or a forward reference
    /// keyed on `class_name`.
    pub fn resolve_method(
        &self,
        ctx: &mut Context,
        class_name: &str,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> CompileResult<MethodId> {
        let owner = self.ancestors(class_name).find(|class| {
            class.methods.iter().any(|&id| {
                let method = ctx.method(id);
                method.name() == name && method.descriptor() == descriptor
            })
        });
        let owner_name = owner.map_or(class_name, |class| class.name.as_str());
        ctx.get_method(owner_name, name, descriptor, is_static)
    }

    /// Field counterpart of [`ClassPool::resolve_method`].
    pub fn resolve_field(
        &self,
        ctx: &mut Context,
        class_name: &str,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> CompileResult<FieldId> {
        let owner = self.ancestors(class_name).find(|class| {
            class.fields.iter().any(|&id| {
                let field = ctx.field(id);
                field.name() == name && field.descriptor() == descriptor
            })
        });
        let owner_name = owner.map_or(class_name, |class| class.name.as_str());
        ctx.get_field(owner_name, name, descriptor, is_static)
    }

    // ------------------------------------------------------------------
    // Casts
    // ------------------------------------------------------------------

    pub fn is_subclass_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.upcast_offset(class, ancestor).is_some()
    }

    fn upcast_offset(&self, from: ClassId, to: ClassId) -> Option<i64> {
        let mut offset = 0i64;
        let mut current = from;
        loop {
            if current == to {
                return Some(offset);
            }
            let class = self.class(current);
            let super_id = class.super_class?;
            offset += class
                .super_layout
                .as_ref()
                .and_then(StructElementLayout::byte_offset)
                .map_or(0, i64::from);
            current = super_id;
        }
    }

    /// Byte adjustment turning a `from` pointer into a `to` pointer: positive
    /// for an upcast, its negation for the matching downcast, `None` for
    /// classes on different chains.
    pub fn cast_offset(&self, from: ClassId, to: ClassId) -> Option<i64> {
        self.upcast_offset(from, to)
            .or_else(|| self.upcast_offset(to, from).map(|offset| -offset))
    }

    /// Reinterpret `value` from class `from` to class `to` without a runtime
    /// type check. Unknown classes are treated as the same layout.
    pub fn emit_unchecked_class_cast(
        &self,
        builder: &mut FunctionBuilder,
        value: Value,
        from: &str,
        to: &str,
    ) -> CompileResult<Value> {
        let (Some(from_id), Some(to_id)) = (self.lookup(from), self.lookup(to)) else {
            return Ok(value);
        };
        let offset = self.cast_offset(from_id, to_id).ok_or_else(|| {
            CompileError::bad_bytecode(format!("cannot cast {from} to unrelated class {to}"))
        })?;
        Ok(emit_pointer_adjust(builder, value, offset))
    }
}

/// Add `offset` to a reference, keeping null as null.
pub(crate) fn emit_pointer_adjust(builder: &mut FunctionBuilder, value: Value, offset: i64) -> Value {
    if offset == 0 {
        return value;
    }
    let pointer_type = builder.func.dfg.value_type(value.value);
    let non_null = builder.create_block();
    let after = builder.create_block();
    builder.append_block_param(after, pointer_type);

    builder.ins().brif(value.value, non_null, &[], after, &[value.value]);

    builder.switch_to_block(non_null);
    builder.seal_block(non_null);
    let adjusted = builder.ins().iadd_imm(value.value, offset);
    builder.ins().jump(after, &[adjusted]);

    builder.switch_to_block(after);
    builder.seal_block(after);
    Value::new(builder.block_params(after)[0], value.ty)
}
