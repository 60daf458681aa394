mod common;

use classfile_aot::cfg::ControlFlowGraph;
use classfile_aot::classfile::CodeIterator;
use common::op::*;
use common::{compiler_for, count_lines, method_ir, ClassBuilder};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn block_ranges(code: &[u8]) -> Vec<(u32, u32)> {
    let mut iter = CodeIterator::new(code).unwrap();
    let cfg = ControlFlowGraph::build(&mut iter).unwrap();
    cfg.blocks().map(|b| (b.start, b.end)).collect()
}

/// Whether some instruction of `ir` is `opcode` (with any type suffix, as in
/// `icmp_imm.i32`) applied with condition code `cond`.
fn has_compare(ir: &str, opcode: &str, cond: &str) -> bool {
    ir.lines().any(|line| {
        let mut words = line.split_whitespace().skip_while(|w| *w != "=").skip(1);
        let op = words.next().unwrap_or_default();
        op.split('.').next() == Some(opcode) && words.next() == Some(cond)
    })
}

fn block_headers(ir: &str) -> usize {
    ir.lines().filter(|line| line.starts_with("block")).count()
}

/// Compile a single root class `T` holding one static method and return its IR.
fn static_method_ir(name: &str, descriptor: &str, code: Vec<u8>) -> String {
    let mut class = ClassBuilder::new("T", None);
    class.static_method(name, descriptor, code);
    let mut compiler = compiler_for(&[&class]);
    compiler.compile_class("T").unwrap();
    method_ir(&compiler, "T", name, descriptor).to_string()
}

// ===========================================================================
// End-to-end scenarios
// ===========================================================================

#[test]
fn test_constant_addition() {
    let code = vec![ICONST_1, ICONST_2, IADD, IRETURN];
    assert_eq!(block_ranges(&code), vec![(0, 4)]);

    let mut class = ClassBuilder::new("Calc", None);
    class.instance_method("m", "()I", code);
    let mut compiler = compiler_for(&[&class]);
    compiler.compile_class("Calc").unwrap();

    let ir = method_ir(&compiler, "Calc", "m", "()I");
    assert!(ir.contains("iconst.i32 1"), "{ir}");
    assert!(ir.contains("iconst.i32 2"), "{ir}");
    assert_eq!(count_lines(ir, "iadd"), 1, "{ir}");
    assert_eq!(count_lines(ir, " return"), 1, "{ir}");
    // the argument copy-in block plus the single bytecode block
    assert_eq!(block_headers(ir), 2, "{ir}");
}

#[test]
fn test_branch_on_parameter() {
    let code = vec![ILOAD_0, IFEQ, 0x00, 0x05, ICONST_1, IRETURN, ICONST_0, IRETURN];
    assert_eq!(block_ranges(&code), vec![(0, 4), (4, 6), (6, 8)]);

    let ir = static_method_ir("f", "(I)I", code);
    assert!(has_compare(&ir, "icmp_imm", "eq"), "{ir}");
    assert_eq!(count_lines(&ir, "brif"), 1, "{ir}");
    assert_eq!(count_lines(&ir, " return"), 2, "{ir}");
    assert_eq!(block_headers(&ir), 4, "{ir}");
}

#[test]
fn test_operand_stack_carried_across_blocks() {
    // x != 0 ? 1 : 2
    let code = vec![ILOAD_0, IFEQ, 0x00, 0x07, ICONST_1, GOTO, 0x00, 0x04, ICONST_2, IRETURN];
    assert_eq!(block_ranges(&code), vec![(0, 4), (4, 8), (8, 9), (9, 10)]);

    let ir = static_method_ir("pick", "(I)I", code);
    assert_eq!(count_lines(&ir, " return"), 1, "{ir}");
    // the join block receives the pushed value as a parameter
    let joins = ir
        .lines()
        .filter(|line| line.starts_with("block") && line.contains(": i32"))
        .count();
    assert!(joins >= 2, "{ir}");
}

#[test]
fn test_backward_branch_loop() {
    // while (x > 0) x--; return x;
    let code = vec![
        ILOAD_0, IFLE, 0x00, 0x0b, // 0, 1
        IINC, 0x00, 0xff, // 4
        GOTO_W, 0xff, 0xff, 0xff, 0xf9, // 7
        ILOAD_0, IRETURN, // 12, 13
    ];
    assert_eq!(block_ranges(&code), vec![(0, 4), (4, 12), (12, 14)]);

    let ir = static_method_ir("countdown", "(I)I", code);
    assert!(ir.contains("iadd_imm"), "{ir}");
    assert!(has_compare(&ir, "icmp_imm", "sle"), "{ir}");
}

// ===========================================================================
// Locals and stack
// ===========================================================================

#[test]
fn test_two_slot_parameters() {
    let ir = static_method_ir("add", "(JJ)J", vec![LLOAD_0, LLOAD_2, LADD, LRETURN]);
    assert!(ir.contains("(i64, i64) -> i64"), "{ir}");
    assert_eq!(count_lines(&ir, "iadd"), 1, "{ir}");
}

#[test]
fn test_slot_reused_with_another_type() {
    let code = vec![ICONST_1, ISTORE_1, ACONST_NULL, ASTORE_1, ILOAD_1, IRETURN];
    let ir = static_method_ir("reuse", "()I", code);
    assert_eq!(count_lines(&ir, " return"), 1, "{ir}");
}

#[test]
fn test_wide_forms() {
    let code = vec![
        WIDE, IINC, 0x00, 0x00, 0x01, 0x2c, // x += 300
        WIDE, ILOAD, 0x00, 0x00, // load x
        IRETURN,
    ];
    let ir = static_method_ir("inc", "(I)I", code);
    assert!(ir.contains("iadd_imm"), "{ir}");
    assert!(ir.contains("300"), "{ir}");
}

#[test]
fn test_stack_shuffles() {
    let code = vec![ICONST_1, ICONST_2, SWAP, POP, DUP, IADD, LLOAD_0, POP2, IRETURN];
    let ir = static_method_ir("shuffle", "(J)I", code);
    assert_eq!(count_lines(&ir, "iadd"), 1, "{ir}");
}

#[test]
fn test_unreachable_tail_is_skipped() {
    let ir = static_method_ir("tail", "()I", vec![ICONST_1, IRETURN, ICONST_2, IRETURN]);
    assert_eq!(count_lines(&ir, " return"), 1, "{ir}");
    assert!(!ir.contains("iconst.i32 2"), "{ir}");
}

// ===========================================================================
// Arithmetic, conversions, comparisons
// ===========================================================================

#[test]
fn test_integer_arithmetic() {
    let code = vec![
        ILOAD_0, ILOAD_1, IDIV, //
        ILOAD_0, ILOAD_1, IREM, //
        IADD, ICONST_3, ISHL, //
        ILOAD_1, IUSHR, ILOAD_0, IXOR, INEG, IRETURN,
    ];
    let ir = static_method_ir("ops", "(II)I", code);
    for op in ["sdiv", "srem", "ishl", "ushr", "bxor", "ineg"] {
        assert!(ir.contains(op), "missing {op}:\n{ir}");
    }
}

#[test]
fn test_division_by_minus_one_does_not_trap() {
    for (name, descriptor, code) in [
        ("idiv", "(II)I", vec![ILOAD_0, ILOAD_1, IDIV, IRETURN]),
        ("ldiv", "(JJ)J", vec![LLOAD_0, LLOAD_2, LDIV, LRETURN]),
    ] {
        let ir = static_method_ir(name, descriptor, code);
        // the divisor -1 is swapped for 1 and the quotient replaced by the negation
        assert!(
            ir.lines().any(|line| line.contains("icmp_imm") && line.ends_with(", -1")),
            "{ir}"
        );
        assert_eq!(count_lines(&ir, "select"), 2, "{ir}");
        assert_eq!(count_lines(&ir, "sdiv"), 1, "{ir}");
        assert_eq!(count_lines(&ir, "ineg"), 1, "{ir}");
        assert_eq!(block_headers(&ir), 2, "{ir}");
    }

    let ir = static_method_ir("irem", "(II)I", vec![ILOAD_0, ILOAD_1, IREM, IRETURN]);
    assert_eq!(count_lines(&ir, "select"), 1, "{ir}");
    assert_eq!(count_lines(&ir, "srem"), 1, "{ir}");
    assert!(!ir.contains("ineg"), "{ir}");
}

#[test]
fn test_float_remainder_uses_libm() {
    let mut class = ClassBuilder::new("T", None);
    class
        .static_method("fr", "(FF)F", vec![FLOAD_0, FLOAD_1, FREM, FRETURN])
        .static_method("dr", "(DD)D", vec![DLOAD_0, DLOAD_2, DREM, DRETURN]);
    let mut compiler = compiler_for(&[&class]);
    compiler.compile_class("T").unwrap();

    let unit = &compiler.context().units()[0];
    assert!(unit.declares("fmodf"));
    assert!(unit.declares("fmod"));
}

#[test]
fn test_conversions() {
    let code = vec![DLOAD_0, D2I, I2B, I2L, L2I, I2C, IRETURN];
    let ir = static_method_ir("conv", "(D)I", code);
    for op in ["fcvt_to_sint_sat.i32", "ireduce.i8", "sextend.i32", "sextend.i64", "ireduce.i32", "uextend.i32"] {
        assert!(ir.contains(op), "missing {op}:\n{ir}");
    }
}

#[test]
fn test_long_and_float_compare() {
    let ir = static_method_ir("lc", "(JJ)I", vec![LLOAD_0, LLOAD_2, LCMP, IRETURN]);
    assert!(has_compare(&ir, "icmp", "sgt"), "{ir}");
    assert!(has_compare(&ir, "icmp", "slt"), "{ir}");
    assert_eq!(count_lines(&ir, "select"), 2, "{ir}");

    let ir = static_method_ir("fc", "(FF)I", vec![FLOAD_0, FLOAD_1, FCMPL, IRETURN]);
    assert!(has_compare(&ir, "fcmp", "gt"), "{ir}");
    assert!(has_compare(&ir, "fcmp", "eq"), "{ir}");

    let ir = static_method_ir("dc", "(DD)I", vec![DLOAD_0, DLOAD_2, DCMPG, IRETURN]);
    assert!(has_compare(&ir, "fcmp", "lt"), "{ir}");
}

#[test]
fn test_null_branches() {
    let code = vec![ALOAD_0, IFNONNULL, 0x00, 0x05, ICONST_1, IRETURN, ICONST_0, IRETURN];
    let ir = static_method_ir("isNull", "(Ljava/lang/Object;)I", code);
    assert!(has_compare(&ir, "icmp_imm", "ne"), "{ir}");

    let code = vec![ALOAD_0, IFNULL, 0x00, 0x05, ICONST_1, IRETURN, ICONST_0, IRETURN];
    let ir = static_method_ir("isSet", "(Ljava/lang/Object;)I", code);
    assert!(has_compare(&ir, "icmp_imm", "eq"), "{ir}");
}

#[test]
fn test_wide_constants() {
    let mut class = ClassBuilder::new("T", None);
    let big = class.integer(1234);
    let long = class.long(1 << 40);
    let double = class.double(2.5);
    let float = class.float(0.5);
    class
        .static_method("i", "()I", vec![LDC, big as u8, IRETURN])
        .static_method("j", "()J", vec![LDC2_W, 0x00, long as u8, LRETURN])
        .static_method("d", "()D", vec![LDC2_W, 0x00, double as u8, DRETURN])
        .static_method("f", "()F", vec![LDC_W, 0x00, float as u8, FRETURN])
        .static_method("s", "()I", vec![SIPUSH, 0x12, 0x34, BIPUSH, 0xff, IADD, IRETURN]);
    let mut compiler = compiler_for(&[&class]);
    compiler.compile_class("T").unwrap();

    assert!(method_ir(&compiler, "T", "i", "()I").contains("iconst.i32 1234"));
    assert!(method_ir(&compiler, "T", "j", "()J").contains("iconst.i64"));
    assert!(method_ir(&compiler, "T", "d", "()D").contains("f64const"));
    assert!(method_ir(&compiler, "T", "f", "()F").contains("f32const"));
    assert!(method_ir(&compiler, "T", "s", "()I").contains("4660"));
}
