//! Symbol naming for everything the compiler emits.
//!
//! Each category of symbol carries its own prefix so that two categories can
//! never produce the same name.

use std::fmt::{self, Write};

/// Maps classes and members to linkable symbol names.
pub trait NameMangler: fmt::Debug {
    fn mangle_class_name(&self, class_name: &str) -> String;
    fn mangle_method_name(&self, class_name: &str, name: &str, descriptor: &str) -> String;
    fn mangle_virtual_dispatch_name(&self, class_name: &str, name: &str, descriptor: &str) -> String;
    fn mangle_vtable_name(&self, subclass: &str, base_class: &str) -> String;
    fn mangle_static_field_name(&self, class_name: &str, name: &str, descriptor: &str) -> String;
    fn mangle_instance_field_getter(&self, class_name: &str, name: &str, descriptor: &str) -> String;
    fn mangle_instance_field_setter(&self, class_name: &str, name: &str, descriptor: &str) -> String;
    fn mangle_instantiator_name(&self, class_name: &str) -> String;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ManglingScheme {
    /// Readable names, useful when inspecting IR.
    Simple,
    /// Names compatible with the JNI native method naming rules.
    #[default]
    Jni,
}

impl ManglingScheme {
    pub fn mangler(self) -> Box<dyn NameMangler> {
        match self {
            ManglingScheme::Simple => Box::new(SimpleMangler),
            ManglingScheme::Jni => Box::new(JniMangler),
        }
    }
}

/// `pkg.Cls#name(I)V` style names.
#[derive(Copy, Clone, Debug, Default)]
pub struct SimpleMangler;

impl SimpleMangler {
    fn member(class_name: &str, name: &str, descriptor: &str) -> String {
        format!("{class_name}#{name}{descriptor}")
    }
}

impl NameMangler for SimpleMangler {
    fn mangle_class_name(&self, class_name: &str) -> String {
        class_name.to_string()
    }

    fn mangle_method_name(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        Self::member(class_name, name, descriptor)
    }

    fn mangle_virtual_dispatch_name(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        format!("virtual@@{}", Self::member(class_name, name, descriptor))
    }

    fn mangle_vtable_name(&self, subclass: &str, base_class: &str) -> String {
        format!("vtable@@{subclass}@{base_class}")
    }

    fn mangle_static_field_name(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        Self::member(class_name, name, descriptor)
    }

    fn mangle_instance_field_getter(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        format!("get@@{}", Self::member(class_name, name, descriptor))
    }

    fn mangle_instance_field_setter(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        format!("set@@{}", Self::member(class_name, name, descriptor))
    }

    fn mangle_instantiator_name(&self, class_name: &str) -> String {
        format!("new@@{class_name}")
    }
}

/// Names built with the JNI escape table: `Java_pkg_Cls_name__I__V`.
///
/// Categories that JNI does not define use an `Aot_` prefix.
#[derive(Copy, Clone, Debug, Default)]
pub struct JniMangler;

/// Prefix of runtime support symbols.
pub const RUNTIME_PREFIX: &str = "Aot_rt_";

impl JniMangler {
    /// Apply the JNI escape table to `input`.
    pub fn escape(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for ch in input.chars() {
            match ch {
                'a'..='z' | 'A'..='Z' | '0'..='9' => out.push(ch),
                '/' => out.push('_'),
                '_' => out.push_str("_1"),
                ';' => out.push_str("_2"),
                '[' => out.push_str("_3"),
                _ => {
                    let mut units = [0u16; 2];
                    for unit in ch.encode_utf16(&mut units) {
                        let _ = write!(out, "_0{unit:04x}");
                    }
                }
            }
        }
        out
    }

    fn class(class_name: &str) -> String {
        Self::escape(&class_name.replace('.', "/"))
    }

    /// Escaped parameters of a method descriptor, then `__` and the escaped
    /// return type. Covariant bridge methods differ only in the latter.
    fn signature(descriptor: &str) -> String {
        match (descriptor.find('('), descriptor.rfind(')')) {
            (Some(open), Some(close)) if open < close => format!(
                "{}__{}",
                Self::escape(&descriptor[open + 1..close]),
                Self::escape(&descriptor[close + 1..])
            ),
            _ => Self::escape(descriptor),
        }
    }

    fn member(class_name: &str, name: &str, escaped_descriptor: &str) -> String {
        format!(
            "{}_{}__{}",
            Self::class(class_name),
            Self::escape(name),
            escaped_descriptor
        )
    }
}

impl NameMangler for JniMangler {
    fn mangle_class_name(&self, class_name: &str) -> String {
        Self::class(class_name)
    }

    fn mangle_method_name(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        format!("Java_{}", Self::member(class_name, name, &Self::signature(descriptor)))
    }

    fn mangle_virtual_dispatch_name(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        format!("Aot_v_{}", Self::member(class_name, name, &Self::signature(descriptor)))
    }

    fn mangle_vtable_name(&self, subclass: &str, base_class: &str) -> String {
        format!("Aot_vt_{}__{}", Self::class(subclass), Self::class(base_class))
    }

    fn mangle_static_field_name(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        format!("Aot_sf_{}", Self::member(class_name, name, &Self::escape(descriptor)))
    }

    fn mangle_instance_field_getter(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        format!("Aot_ifg_{}", Self::member(class_name, name, &Self::escape(descriptor)))
    }

    fn mangle_instance_field_setter(&self, class_name: &str, name: &str, descriptor: &str) -> String {
        format!("Aot_ifs_{}", Self::member(class_name, name, &Self::escape(descriptor)))
    }

    fn mangle_instantiator_name(&self, class_name: &str) -> String {
        format!("Aot_new_{}", Self::class(class_name))
    }
}
