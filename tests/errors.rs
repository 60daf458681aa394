mod common;

use classfile_aot::CompileError;
use common::op::*;
use common::{compiler_for, u16_operand, ClassBuilder};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compile_error(classes: &[&ClassBuilder], root: &str) -> CompileError {
    let mut compiler = compiler_for(classes);
    match compiler.compile_class(root) {
        Ok(_) => panic!("compiling {root} should fail"),
        Err(err) => err,
    }
}

fn bad_bytecode(classes: &[&ClassBuilder], root: &str) -> String {
    match compile_error(classes, root) {
        CompileError::BadBytecode(msg) => msg,
        other => panic!("expected BadBytecode, got {other:?}"),
    }
}

fn bad_method(descriptor: &str, code: Vec<u8>) -> String {
    let mut class = ClassBuilder::new("Bad", None);
    class.static_method("m", descriptor, code);
    bad_bytecode(&[&class], "Bad")
}

// ===========================================================================
// Class resolution
// ===========================================================================

#[test]
fn test_missing_root_class() {
    let err = compile_error(&[], "nowhere.Missing");
    assert!(matches!(err, CompileError::ClassNotFound(name) if name == "nowhere.Missing"));
}

#[test]
fn test_missing_super_class() {
    let orphan = ClassBuilder::new("Orphan", Some("lost.Parent"));
    let msg = bad_bytecode(&[&orphan], "Orphan");
    assert_eq!(msg, "could not find Orphan's super class lost.Parent");
}

#[test]
fn test_cyclic_inheritance() {
    let a = ClassBuilder::new("A", Some("B"));
    let b = ClassBuilder::new("B", Some("A"));
    let msg = bad_bytecode(&[&a, &b], "A");
    assert!(msg.contains("cyclic inheritance"), "{msg}");
}

#[test]
fn test_static_and_instance_use_conflict() {
    let mut class = ClassBuilder::new("Mixed", None);
    let target = class.method_ref("Mixed", "inst", "()I");
    let [hi, lo] = u16_operand(target);
    class
        .instance_method("inst", "()I", vec![ICONST_1, IRETURN])
        .static_method("call", "()I", vec![INVOKESTATIC, hi, lo, IRETURN]);
    let msg = bad_bytecode(&[&class], "Mixed");
    assert!(msg.contains("used as static but declared as instance"), "{msg}");
}

#[test]
fn test_malformed_utf8_constant() {
    let mut class = ClassBuilder::new("Garbled", None);
    let index = class.raw_utf8(&[0x61, 0xff, 0x62]);
    class.static_method("m", "()V", vec![RETURN]);
    let msg = bad_bytecode(&[&class], "Garbled");
    assert_eq!(
        msg,
        format!("constant {index} is not valid modified UTF-8: invalid byte 0xff at 1")
    );
}

// ===========================================================================
// Method bodies
// ===========================================================================

#[test]
fn test_dup_of_wide_value() {
    let msg = bad_method("()J", vec![LCONST_1, DUP, POP2, LRETURN]);
    assert_eq!(msg, "can only dup values with width of 1");
}

#[test]
fn test_ldc_of_wrong_constant_kind() {
    let mut class = ClassBuilder::new("Bad", None);
    let class_constant = class.class_ref("Bad");
    class.static_method("m", "()I", vec![LDC, class_constant as u8, IRETURN]);
    let msg = bad_bytecode(&[&class], "Bad");
    assert_eq!(msg, format!("ldc references invalid const pool entry {class_constant}"));
}

#[test]
fn test_ldc_of_missing_constant() {
    let msg = bad_method("()I", vec![LDC, 0xfe, IRETURN]);
    assert_eq!(msg, "ldc references invalid const pool entry 254");
}

#[test]
fn test_unsupported_opcodes() {
    let msg = bad_method("(Ljava/lang/Object;)I", vec![ALOAD_0, ICONST_0, IALOAD, IRETURN]);
    assert!(msg.starts_with("unsupported instruction Iaload"), "{msg}");
    assert!(msg.ends_with("at offset 2"), "{msg}");

    let msg = bad_method("(Ljava/lang/Object;)V", vec![ALOAD_0, ATHROW]);
    assert!(msg.starts_with("unsupported instruction Athrow"), "{msg}");

    let msg = bad_method(
        "(I)I",
        vec![
            ILOAD_0, TABLESWITCH, 0x00, 0x00, // padding to offset 4
            0x00, 0x00, 0x00, 0x13, // default
            0x00, 0x00, 0x00, 0x00, // low
            0x00, 0x00, 0x00, 0x00, // high
            0x00, 0x00, 0x00, 0x13, // offset for 0
            ICONST_0, IRETURN,
        ],
    );
    assert!(msg.starts_with("unsupported instruction Tableswitch"), "{msg}");
}

#[test]
fn test_return_type_mismatch() {
    let msg = bad_method("()I", vec![RETURN]);
    assert_eq!(msg, "cannot return void from a method returning int");
}

#[test]
fn test_store_type_mismatch() {
    let msg = bad_method("()V", vec![LCONST_1, ISTORE_1, RETURN]);
    assert!(msg.contains("cannot store long into int local 1"), "{msg}");
}

#[test]
fn test_stack_underflow() {
    let msg = bad_method("()I", vec![IADD, IRETURN]);
    assert_eq!(msg, "operand stack underflow");
}

#[test]
fn test_control_falls_off_the_end() {
    let msg = bad_method("()V", vec![ICONST_0, POP]);
    assert!(msg.contains("control falls off the end"), "{msg}");
}

#[test]
fn test_branch_to_the_middle_of_an_instruction() {
    // the branch target 2 lands inside the ifeq itself
    let msg = bad_method("(I)I", vec![ILOAD_0, IFEQ, 0x00, 0x01, ICONST_0, IRETURN]);
    assert!(msg.contains("offset 2"), "{msg}");
}

#[test]
fn test_inconsistent_stack_at_join() {
    // one path reaches offset 6 with [int], the other with [int, int]
    let code = vec![ICONST_1, ILOAD_0, IFEQ, 0x00, 0x04, ICONST_2, IRETURN];
    let msg = bad_method("(I)I", code);
    assert!(msg.contains("inconsistent operand stack"), "{msg}");
}

#[test]
fn test_bad_descriptor() {
    let mut class = ClassBuilder::new("Bad", None);
    class.static_method("m", "(Q)V", vec![RETURN]);
    let err = compile_error(&[&class], "Bad");
    assert!(matches!(err, CompileError::BadDescriptor(_)), "{err:?}");
}
