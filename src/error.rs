use thiserror::Error;

use crate::classpath::ClassPathError;

/// Errors raised while compiling class files.
///
/// Every problem with the input itself is reported as [`CompileError::BadBytecode`]
/// (or [`CompileError::BadDescriptor`] for descriptor strings). The remaining variants
/// wrap failures of the collaborators: class path I/O, the class file reader and the
/// code generation backend.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("bad bytecode: {0}")]
    BadBytecode(String),

    #[error("bad descriptor: {0}")]
    BadDescriptor(String),

    #[error("class not found: {0}")]
    ClassNotFound(String),

    #[error("class path error: {0}")]
    ClassPath(#[from] ClassPathError),

    #[error("class file parse error: {0}")]
    ClassParse(#[from] binrw::Error),

    #[error("backend error: {0}")]
    Module(#[from] cranelift_module::ModuleError),

    #[error("generated IR failed verification:\n{0}")]
    Verifier(String),

    #[error("target configuration error: {0}")]
    Target(String),

    #[error("object emission error: {0}")]
    Emit(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompileError {
    pub(crate) fn bad_bytecode(cause: impl Into<String>) -> Self {
        CompileError::BadBytecode(cause.into())
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
