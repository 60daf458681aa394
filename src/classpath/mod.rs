//! Locating class file bytes by class name.

#[cfg(feature = "jar")]
mod jar;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(feature = "jar")]
pub use jar::JarClassPath;

#[derive(Debug, Error)]
pub enum ClassPathError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[cfg(feature = "jar")]
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type ClassPathResult<T> = Result<T, ClassPathError>;

/// A source of class files. Names are dotted (`java.lang.Object`).
pub trait ClassPath {
    /// The class file bytes for `class_name`, or `None` when this source does not have it.
    fn find(&self, class_name: &str) -> ClassPathResult<Option<Vec<u8>>>;
}

/// Relative path of a class file inside a directory tree or archive.
pub fn class_file_path(class_name: &str) -> String {
    format!("{}.class", class_name.replace('.', "/"))
}

/// Classes stored as `<root>/a/b/C.class`.
#[derive(Clone, Debug)]
pub struct DirectoryClassPath {
    root: PathBuf,
}

impl DirectoryClassPath {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryClassPath { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ClassPath for DirectoryClassPath {
    fn find(&self, class_name: &str) -> ClassPathResult<Option<Vec<u8>>> {
        let path = self.root.join(class_file_path(class_name));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ClassPathError::Io { path, source }),
        }
    }
}

/// Searches several class paths in order; the first hit wins.
#[derive(Default)]
pub struct CompositeClassPath {
    paths: Vec<Box<dyn ClassPath>>,
}

impl CompositeClassPath {
    pub fn new() -> Self {
        CompositeClassPath { paths: Vec::new() }
    }

    pub fn push(&mut self, path: impl ClassPath + 'static) {
        self.paths.push(Box::new(path));
    }

    pub fn with(mut self, path: impl ClassPath + 'static) -> Self {
        self.push(path);
        self
    }
}

impl ClassPath for CompositeClassPath {
    fn find(&self, class_name: &str) -> ClassPathResult<Option<Vec<u8>>> {
        for path in &self.paths {
            if let Some(bytes) = path.find(class_name)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}

/// Class files held in memory, keyed by dotted class name.
#[derive(Clone, Debug, Default)]
pub struct MemoryClassPath {
    classes: BTreeMap<String, Vec<u8>>,
}

impl MemoryClassPath {
    pub fn new() -> Self {
        MemoryClassPath::default()
    }

    pub fn insert(&mut self, class_name: impl Into<String>, bytes: Vec<u8>) {
        self.classes.insert(class_name.into(), bytes);
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassPath for MemoryClassPath {
    fn find(&self, class_name: &str) -> ClassPathResult<Option<Vec<u8>>> {
        Ok(self.classes.get(class_name).cloned())
    }
}
