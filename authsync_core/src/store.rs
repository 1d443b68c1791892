use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::codec;
use crate::error::KeyTreeResult;
use crate::tree::KeyTree;

/// An authorized-keys store file, read and rewritten as a whole.
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the store; a missing file is an empty tree.
    pub fn load(&self) -> KeyTreeResult<KeyTree> {
        Ok(self.load_existing()?.unwrap_or_default())
    }

    /// Reads the store, or returns `None` if the file does not exist.
    pub fn load_existing(&self) -> KeyTreeResult<Option<KeyTree>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => codec::parse(&text).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically replaces the file with the serialized `tree`.
    pub fn write(&self, tree: &KeyTree) -> KeyTreeResult<()> {
        let parent_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent_dir)?;
        let mut temp_file = NamedTempFile::new_in(parent_dir)?;
        temp_file.write_all(codec::serialize(tree).as_bytes())?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&self.path).map_err(io::Error::from)?;
        debug!(path = ?self.path, entries = tree.len(), "wrote key store");
        Ok(())
    }

    /// Deletes the file. Removing a store that does not exist is not an error.
    pub fn clear(&self) -> KeyTreeResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
