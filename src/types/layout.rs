//! Struct layout for class instances.
//!
//! Cranelift has no aggregate types, so the compiler computes the natural
//! alignment layout itself and addresses elements by byte offset.

use crate::error::{CompileError, CompileResult};

use super::Type;

/// Size and alignment of one struct element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElementType {
    pub size: u32,
    pub align: u32,
}

impl ElementType {
    pub fn pointer(pointer_bytes: u32) -> Self {
        ElementType {
            size: pointer_bytes,
            align: pointer_bytes,
        }
    }

    /// Element type for a value of `ty`, `None` for void.
    pub fn of(ty: Type, pointer_bytes: u32) -> Option<Self> {
        let size = match ty {
            Type::Int | Type::Float => 4,
            Type::Long | Type::Double => 8,
            Type::Object => pointer_bytes,
            Type::Void => return None,
        };
        Some(ElementType { size, align: size })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructLayout {
    pub size: u32,
    pub align: u32,
    pub offsets: Vec<u32>,
}

impl StructLayout {
    pub fn compute(elements: &[ElementType]) -> Self {
        let mut offset = 0u32;
        let mut align = 1u32;
        let mut offsets = Vec::with_capacity(elements.len());
        for element in elements {
            offset = align_to(offset, element.align);
            offsets.push(offset);
            offset += element.size;
            align = align.max(element.align);
        }
        StructLayout {
            size: align_to(offset, align),
            align,
            offsets,
        }
    }

    /// This struct embedded as an element of another struct.
    pub fn element_type(&self) -> ElementType {
        ElementType {
            size: self.size,
            align: self.align,
        }
    }
}

fn align_to(offset: u32, align: u32) -> u32 {
    let align = align.max(1);
    offset.div_ceil(align) * align
}

/// A named struct whose body is set exactly once.
#[derive(Clone, Debug)]
pub struct StructType {
    name: String,
    layout: Option<StructLayout>,
}

impl StructType {
    pub fn new(name: impl Into<String>) -> Self {
        StructType {
            name: name.into(),
            layout: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Option<&StructLayout> {
        self.layout.as_ref()
    }

    /// Close the struct body and resolve every element's position.
    pub fn set_body(&mut self, elements: &mut [StructElementLayout]) -> CompileResult<&StructLayout> {
        if self.layout.is_some() {
            return Err(CompileError::bad_bytecode(format!(
                "struct {} already has a body",
                self.name
            )));
        }
        let types: Vec<ElementType> = elements.iter().map(|e| e.element_type).collect();
        let layout = StructLayout::compute(&types);
        for (index, element) in elements.iter_mut().enumerate() {
            element.index = Some(index);
            element.byte_offset = Some(layout.offsets[index]);
        }
        Ok(&*self.layout.insert(layout))
    }
}

/// Position of one element inside its owning struct.
///
/// The byte offset is only known after the owning struct's body is closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructElementLayout {
    element_type: ElementType,
    index: Option<usize>,
    byte_offset: Option<u32>,
}

impl StructElementLayout {
    pub fn new(element_type: ElementType) -> Self {
        StructElementLayout {
            element_type,
            index: None,
            byte_offset: None,
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn byte_offset(&self) -> Option<u32> {
        self.byte_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_alignment() {
        let layout = StructLayout::compute(&[
            ElementType::pointer(8),
            ElementType::of(Type::Int, 8).unwrap(),
            ElementType::of(Type::Long, 8).unwrap(),
            ElementType::of(Type::Float, 8).unwrap(),
        ]);
        assert_eq!(layout.offsets, vec![0, 8, 16, 24]);
        assert_eq!(layout.size, 32);
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn test_empty_struct() {
        let layout = StructLayout::compute(&[]);
        assert_eq!(layout.size, 0);
        assert_eq!(layout.align, 1);
    }

    #[test]
    fn test_set_body_resolves_offsets_once() {
        let mut ty = StructType::new("Point");
        let mut elements = vec![
            StructElementLayout::new(ElementType::pointer(8)),
            StructElementLayout::new(ElementType::of(Type::Int, 8).unwrap()),
            StructElementLayout::new(ElementType::of(Type::Int, 8).unwrap()),
        ];
        assert_eq!(elements[1].byte_offset(), None);
        let size = ty.set_body(&mut elements).unwrap().size;
        assert_eq!(size, 16);
        assert_eq!(elements[1].index(), Some(1));
        assert_eq!(elements[1].byte_offset(), Some(8));
        assert_eq!(elements[2].byte_offset(), Some(12));
        assert!(ty.set_body(&mut elements).is_err());
    }
}
