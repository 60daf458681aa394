use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use super::{class_file_path, ClassPath, ClassPathError, ClassPathResult};

/// Class files inside a JAR (ZIP) archive.
///
/// Entries are read into memory when the archive is opened, so lookups never
/// touch the archive again.
#[derive(Clone, Debug)]
pub struct JarClassPath {
    entries: BTreeMap<String, Vec<u8>>,
}

impl JarClassPath {
    pub fn read<R: Read + Seek>(reader: R) -> ClassPathResult<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut entries = BTreeMap::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() || !file.name().ends_with(".class") {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data).map_err(|source| ClassPathError::Io {
                path: name.clone().into(),
                source,
            })?;
            entries.insert(name, data);
        }

        Ok(JarClassPath { entries })
    }

    pub fn from_bytes(bytes: &[u8]) -> ClassPathResult<Self> {
        Self::read(Cursor::new(bytes))
    }

    pub fn open(path: impl AsRef<Path>) -> ClassPathResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| ClassPathError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read(std::io::BufReader::new(file))
    }

    /// Entry paths of every class file in the archive.
    pub fn class_entries(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl ClassPath for JarClassPath {
    fn find(&self, class_name: &str) -> ClassPathResult<Option<Vec<u8>>> {
        Ok(self.entries.get(&class_file_path(class_name)).cloned())
    }
}
