//! Ahead-of-time compiler from [Java class files](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html)
//! to native object code.
//!
//! Classes are read from a [`ClassPath`], laid out as structs with a vtable
//! pointer, and translated method by method into Cranelift IR. Each
//! compilation unit becomes one relocatable object file.
//!
//! ```no_run
//! use classfile_aot::{CompileOptions, Compiler, DirectoryClassPath};
//!
//! let options = CompileOptions {
//!     follow_references: true,
//!     ..CompileOptions::default()
//! };
//! let mut compiler = Compiler::new(options, Box::new(DirectoryClassPath::new("./classes")))?;
//! compiler.compile(&["com.example.Main"])?;
//! for object in compiler.finish()? {
//!     println!("{}: {} bytes", object.name, object.bytes.len());
//! }
//! # Ok::<(), classfile_aot::CompileError>(())
//! ```

pub mod cfg;
pub mod class;
pub mod classfile;
pub mod classpath;
pub mod codegen;
pub mod compiler;
pub mod context;
pub mod error;
pub mod mangle;
pub mod runtime_abi;
pub mod types;

pub use class::{ClassId, ClassInfo, ClassPool, ClassState};
pub use classfile::ClassFile;
#[cfg(feature = "jar")]
pub use classpath::JarClassPath;
pub use classpath::{ClassPath, ClassPathError, CompositeClassPath, DirectoryClassPath, MemoryClassPath};
pub use compiler::{CompileOptions, Compiler, OptLevel};
pub use context::{CompilationUnit, Context, ObjectFile};
pub use error::{CompileError, CompileResult};
pub use mangle::{JniMangler, ManglingScheme, NameMangler, SimpleMangler};
pub use types::{Type, Value};
