use std::collections::HashMap;

use cranelift_module::{DataDescription, DataId, Linkage, Module};

use crate::context::{CompilationUnit, MethodId, UnitId};
use crate::error::{CompileError, CompileResult};
use crate::mangle::NameMangler;

use super::method::MethodDeclaration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VTableEntry {
    pub name: String,
    pub descriptor: String,
    pub method: MethodId,
}

/// One class's dispatch table.
///
/// A subclass table starts as a copy of its parent's, so every inherited entry
/// keeps its index. Overrides replace the target in place and new methods are
/// appended.
#[derive(Clone, Debug)]
pub struct VTable {
    class_name: String,
    base_class: String,
    symbol: String,
    entries: Vec<VTableEntry>,
    indices: HashMap<String, usize>,
    slot_offset: Option<u32>,
    data: Option<(UnitId, DataId)>,
}

fn entry_key(name: &str, descriptor: &str) -> String {
    format!("{name}{descriptor}")
}

impl VTable {
    pub fn for_root_class(mangler: &dyn NameMangler, class_name: &str) -> Self {
        VTable {
            class_name: class_name.to_string(),
            base_class: class_name.to_string(),
            symbol: mangler.mangle_vtable_name(class_name, class_name),
            entries: Vec::new(),
            indices: HashMap::new(),
            slot_offset: None,
            data: None,
        }
    }

    pub fn for_subclass(mangler: &dyn NameMangler, parent: &VTable, class_name: &str) -> Self {
        VTable {
            class_name: class_name.to_string(),
            base_class: parent.base_class.clone(),
            symbol: mangler.mangle_vtable_name(class_name, &parent.base_class),
            entries: parent.entries.clone(),
            indices: parent.indices.clone(),
            slot_offset: parent.slot_offset,
            data: None,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The root class whose struct holds the vtable pointer.
    pub fn base_class(&self) -> &str {
        &self.base_class
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn entries(&self) -> &[VTableEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `method` under its signature. Returns the method it replaces,
    /// if any, together with the entry index.
    pub fn add_method(
        &mut self,
        name: &str,
        descriptor: &str,
        method: MethodId,
    ) -> (usize, Option<MethodId>) {
        let key = entry_key(name, descriptor);
        if let Some(&index) = self.indices.get(&key) {
            let previous = std::mem::replace(&mut self.entries[index].method, method);
            return (index, Some(previous));
        }
        let index = self.entries.len();
        self.entries.push(VTableEntry {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            method,
        });
        self.indices.insert(key, index);
        (index, None)
    }

    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.indices.contains_key(&entry_key(name, descriptor))
    }

    pub fn lookup(&self, name: &str, descriptor: &str) -> Option<&VTableEntry> {
        let index = *self.indices.get(&entry_key(name, descriptor))?;
        self.entries.get(index)
    }

    pub fn index_of(&self, name: &str, descriptor: &str) -> CompileResult<usize> {
        self.indices
            .get(&entry_key(name, descriptor))
            .copied()
            .ok_or_else(|| {
                CompileError::bad_bytecode(format!(
                    "could not find virtual method {}.{name}{descriptor}",
                    self.class_name
                ))
            })
    }

    /// Byte offset of the vtable pointer inside an instance.
    pub fn slot_offset(&self) -> CompileResult<u32> {
        self.slot_offset.ok_or_else(|| {
            CompileError::bad_bytecode(format!("vtable of {} has no layout", self.class_name))
        })
    }

    pub(crate) fn set_slot_offset(&mut self, offset: u32) {
        self.slot_offset = Some(offset);
    }

    /// The table's data object, once it has been emitted.
    pub fn data(&self) -> Option<(UnitId, DataId)> {
        self.data
    }

    /// Emit the table as a local data object of function pointers. Slots of
    /// methods without a body stay null.
    pub(crate) fn emit_definition(
        &mut self,
        unit_id: UnitId,
        unit: &mut CompilationUnit,
        methods: &mut [MethodDeclaration],
    ) -> CompileResult<DataId> {
        let pointer_bytes = unit.pointer_bytes();
        let id = unit.declare_data(&self.symbol, Linkage::Local, false)?;

        let mut data = DataDescription::new();
        data.define_zeroinit(self.entries.len().max(1) * pointer_bytes as usize);
        data.set_align(u64::from(pointer_bytes));
        for (index, entry) in self.entries.iter().enumerate() {
            let method = &mut methods[entry.method.0];
            if !method.has_body() {
                continue;
            }
            let (func_id, _) = method.declare_direct(unit_id, unit, Linkage::Import)?;
            let func_ref = unit.module_mut().declare_func_in_data(func_id, &mut data);
            data.write_function_addr(index as u32 * pointer_bytes, func_ref);
        }
        unit.module_mut().define_data(id, &data)?;
        self.data = Some((unit_id, id));
        log::debug!("emitted {} with {} entries", self.symbol, self.entries.len());
        Ok(id)
    }
}
