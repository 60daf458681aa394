mod common;

use std::fs;

use classfile_aot::{ClassState, CompileOptions, Compiler, DirectoryClassPath};
use common::op::*;
use common::{compiler_for, compiler_with, method_ir, test_options, u16_operand, ClassBuilder};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `Main.run()` calls the static `Helper.help()` and reads `Gone.x`, a class
/// that is not on the class path.
fn program() -> (ClassBuilder, ClassBuilder) {
    let mut helper = ClassBuilder::new("app.Helper", None);
    helper.static_method("help", "()I", vec![BIPUSH, 42, IRETURN]);

    let mut main = ClassBuilder::new("app.Main", None);
    let help = main.method_ref("app.Helper", "help", "()I");
    let gone = main.field_ref("app.Gone", "x", "I");
    let [h_hi, h_lo] = u16_operand(help);
    let [g_hi, g_lo] = u16_operand(gone);
    main.static_method(
        "run",
        "()I",
        vec![INVOKESTATIC, h_hi, h_lo, GETSTATIC, g_hi, g_lo, IADD, IRETURN],
    );
    (main, helper)
}

// ===========================================================================
// Object output
// ===========================================================================

#[test]
fn test_single_unit_produces_one_object() {
    let (main, helper) = program();
    let mut compiler = compiler_for(&[&main, &helper]);
    compiler.compile(&["app.Main", "app.Helper"]).unwrap();

    let objects = compiler.finish().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].name, "global_unit");
    assert!(!objects[0].bytes.is_empty());
}

#[test]
fn test_unit_per_class() {
    let base = ClassBuilder::new("Base", None);
    let mut sub = ClassBuilder::new("Sub", Some("Base"));
    sub.instance_method("m", "()V", vec![RETURN]);
    let options = CompileOptions {
        single_unit: false,
        ..test_options()
    };
    let mut compiler = compiler_with(options, &[&base, &sub]);
    compiler.compile_class("Sub").unwrap();

    let names: Vec<String> = compiler.finish().unwrap().into_iter().map(|o| o.name).collect();
    assert_eq!(names, vec!["Base".to_string(), "Sub".to_string()]);
}

#[test]
fn test_write_objects() {
    let (main, helper) = program();
    let options = CompileOptions {
        single_unit: false,
        ..test_options()
    };
    let mut compiler = compiler_with(options, &[&main, &helper]);
    compiler.compile(&["app.Main", "app.Helper"]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = compiler.write_objects(dir.path().join("out")).unwrap();
    assert_eq!(written.len(), 2);
    for path in &written {
        assert!(fs::metadata(path).unwrap().len() > 0, "{}", path.display());
    }
    assert!(dir.path().join("out/app.Main.o").exists());
}

#[test]
fn test_optimized_build() {
    let (main, helper) = program();
    let options = CompileOptions {
        opt_level: classfile_aot::OptLevel::Speed,
        mangling: classfile_aot::ManglingScheme::Jni,
        ..CompileOptions::default()
    };
    let mut compiler = compiler_with(options, &[&main, &helper]);
    compiler.compile(&["app.Main", "app.Helper"]).unwrap();
    assert!(compiler.function_ir("Java_app_Main_run____I").is_none());
    assert!(compiler.context().units()[0].declares("Java_app_Main_run____I"));
    assert!(compiler.context().units()[0].declares("Java_app_Helper_help____I"));
}

#[test]
fn test_invalid_target_triple() {
    let options = CompileOptions {
        target: Some("not-a-real-target".to_string()),
        ..CompileOptions::default()
    };
    let result = Compiler::new(options, Box::new(classfile_aot::MemoryClassPath::new()));
    assert!(matches!(result, Err(classfile_aot::CompileError::Target(_))));
}

// ===========================================================================
// Referenced classes
// ===========================================================================

#[test]
fn test_referenced_classes_are_only_laid_out_by_default() {
    let (main, helper) = program();
    let mut compiler = compiler_for(&[&main, &helper]);
    compiler.compile(&["app.Main"]).unwrap();

    let pool = compiler.pool();
    assert_eq!(pool.class_by_name("app.Main").unwrap().state(), ClassState::Defined);
    assert_eq!(pool.class_by_name("app.Helper").unwrap().state(), ClassState::LaidOut);
    assert!(pool.class_by_name("app.Gone").is_none());
    assert!(compiler.function_ir("app.Helper#help()I").is_none());
}

#[test]
fn test_follow_references() {
    let (main, helper) = program();
    let options = CompileOptions {
        follow_references: true,
        ..test_options()
    };
    let mut compiler = compiler_with(options, &[&main, &helper]);
    compiler.compile(&["app.Main"]).unwrap();

    assert_eq!(
        compiler.pool().class_by_name("app.Helper").unwrap().state(),
        ClassState::Defined
    );
    assert!(compiler.function_ir("app.Helper#help()I").is_some());
    // the missing class is skipped and its field stays an import
    assert!(compiler.context().units()[0].declares("app.Gone#xI"));
}

#[test]
fn test_directory_class_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut class = ClassBuilder::new("pkg.Dir", None);
    class.static_method("one", "()I", vec![ICONST_1, IRETURN]);
    fs::create_dir_all(dir.path().join("pkg")).unwrap();
    fs::write(dir.path().join("pkg/Dir.class"), class.bytes()).unwrap();

    let mut compiler =
        Compiler::new(test_options(), Box::new(DirectoryClassPath::new(dir.path()))).unwrap();
    compiler.compile_class("pkg.Dir").unwrap();
    assert!(compiler.function_ir("pkg.Dir#one()I").is_some());
}

// ===========================================================================
// String literals
// ===========================================================================

#[test]
fn test_string_literal_getters_are_shared() {
    let mut class = ClassBuilder::new("Strings", None);
    let hello = class.string("hello");
    let world = class.string("world");
    let ldc_hello = vec![LDC, hello as u8, ARETURN];
    class
        .static_method("a", "()Ljava/lang/Object;", ldc_hello.clone())
        .static_method("b", "()Ljava/lang/Object;", ldc_hello)
        .static_method("c", "()Ljava/lang/Object;", vec![LDC, world as u8, ARETURN]);
    let mut compiler = compiler_for(&[&class]);
    compiler.compile_class("Strings").unwrap();

    let unit = &compiler.context().units()[0];
    let getters: Vec<&str> = unit
        .captured_symbols()
        .filter(|symbol| symbol.starts_with("string literal"))
        .collect();
    assert_eq!(getters, vec!["string literal \"hello\"", "string literal \"world\""]);
    assert!(unit.declares("Aot_rt_string_pool_get"));

    let getter = compiler.function_ir("string literal \"hello\"").unwrap();
    assert!(getter.contains("brif"), "{getter}");
    assert!(getter.contains("iconst.i32 5"), "{getter}");
    assert!(method_ir(&compiler, "Strings", "a", "()Ljava/lang/Object;").contains("call"));
}

#[test]
fn test_string_literal_with_nul_and_supplementary_characters() {
    let mut class = ClassBuilder::new("Encoded", None);
    let text = class.string("a\0b\u{1F600}");
    class.static_method("s", "()Ljava/lang/Object;", vec![LDC, text as u8, ARETURN]);
    let mut compiler = compiler_for(&[&class]);
    compiler.compile_class("Encoded").unwrap();

    // the runtime receives standard UTF-8: 3 bytes for "a\0b" and 4 for the emoji
    let getter = compiler.function_ir("string literal \"a\\0b\u{1F600}\"").unwrap();
    assert!(getter.contains("iconst.i32 7"), "{getter}");
}
