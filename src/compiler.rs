//! The compilation driver.

use std::fs;
use std::path::{Path, PathBuf};

use crate::class::{ClassId, ClassPool};
use crate::classpath::ClassPath;
use crate::context::{Context, ObjectFile};
use crate::error::CompileResult;
use crate::mangle::ManglingScheme;

/// Backend optimisation level.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OptLevel {
    #[default]
    None,
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// The value of Cranelift's `opt_level` setting.
    pub fn as_str(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Put every class into one shared unit instead of one unit per class.
    pub single_unit: bool,
    pub mangling: ManglingScheme,
    /// Target triple, the host when `None`.
    pub target: Option<String>,
    pub opt_level: OptLevel,
    /// Keep the textual IR of every defined function.
    pub capture_ir: bool,
    /// Also compile the classes referenced from emitted code.
    pub follow_references: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            single_unit: true,
            mangling: ManglingScheme::default(),
            target: None,
            opt_level: OptLevel::default(),
            capture_ir: false,
            follow_references: false,
        }
    }
}

/// Compiles classes from a class path into object files.
///
/// ```no_run
/// use classfile_aot::{CompileOptions, Compiler, DirectoryClassPath};
///
/// let mut compiler = Compiler::new(
///     CompileOptions::default(),
///     Box::new(DirectoryClassPath::new("./classes")),
/// )?;
/// compiler.compile(&["com.example.Main"])?;
/// compiler.write_objects("./out")?;
/// # Ok::<(), classfile_aot::CompileError>(())
/// ```
pub struct Compiler {
    ctx: Context,
    pool: ClassPool,
}

impl Compiler {
    pub fn new(options: CompileOptions, class_path: Box<dyn ClassPath>) -> CompileResult<Self> {
        Ok(Compiler {
            ctx: Context::new(options)?,
            pool: ClassPool::new(class_path),
        })
    }

    /// Compile `name` and its superclass chain.
    pub fn compile_class(&mut self, name: &str) -> CompileResult<ClassId> {
        log::debug!("compiling class {name}");
        self.pool.get(&mut self.ctx, name)
    }

    /// Compile every root, then the classes they reference when
    /// [`CompileOptions::follow_references`] is set.
    pub fn compile<S: AsRef<str>>(&mut self, roots: &[S]) -> CompileResult<()> {
        for root in roots {
            self.compile_class(root.as_ref())?;
        }
        if !self.ctx.options().follow_references {
            return Ok(());
        }
        loop {
            let pending = self.ctx.take_pending_classes();
            if pending.is_empty() {
                return Ok(());
            }
            for name in pending {
                if !self.pool.is_available(&name)? {
                    log::warn!("skipping referenced class {name}: not found on the class path");
                    continue;
                }
                self.compile_class(&name)?;
            }
        }
    }

    /// The captured IR of `symbol`, searched across all units.
    pub fn function_ir(&self, symbol: &str) -> Option<&str> {
        self.ctx
            .units()
            .iter()
            .find_map(|unit| unit.function_ir(symbol))
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn pool(&self) -> &ClassPool {
        &self.pool
    }

    /// Finish every unit into object file bytes.
    pub fn finish(self) -> CompileResult<Vec<ObjectFile>> {
        self.ctx
            .into_units()
            .into_iter()
            .map(|unit| unit.finish())
            .collect()
    }

    /// Finish every unit and write `<dir>/<unit name>.o`. Returns the written paths.
    pub fn write_objects(self, dir: impl AsRef<Path>) -> CompileResult<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for object in self.finish()? {
            let path = dir.join(format!("{}.o", object_file_stem(&object.name)));
            fs::write(&path, &object.bytes)?;
            log::debug!("wrote {} ({} bytes)", path.display(), object.bytes.len());
            written.push(path);
        }
        Ok(written)
    }
}

/// Unit names are class names; keep them usable as file names.
fn object_file_stem(unit_name: &str) -> String {
    unit_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
        .collect()
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("options", self.ctx.options())
            .field("units", &self.ctx.units().len())
            .finish()
    }
}
