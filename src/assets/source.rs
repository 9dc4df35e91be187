//! Storage backends for asset bytes

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::assets::{AssetError, AssetPath};

/// Raw byte storage behind the asset cache. Implementations cover the native
/// filesystem, in-memory stores for tests, or packed archives.
pub trait AssetSource: Send + Sync {
    fn load(&self, path: &AssetPath) -> Result<Vec<u8>, AssetError>;

    fn store(&self, path: &AssetPath, bytes: &[u8]) -> Result<(), AssetError> {
        let _ = (path, bytes);
        Err(AssetError::ReadOnly)
    }

    fn remove(&self, path: &AssetPath) -> Result<(), AssetError> {
        let _ = path;
        Err(AssetError::ReadOnly)
    }
}

/// Native filesystem source rooted at a directory.
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &AssetPath) -> PathBuf {
        // AssetPath normalization already rejected traversal segments.
        self.root.join(path.path())
    }
}

impl AssetSource for FileSource {
    fn load(&self, path: &AssetPath) -> Result<Vec<u8>, AssetError> {
        let file = self.resolve(path);
        std::fs::read(&file).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AssetError::NotFound(path.to_string())
            } else {
                AssetError::Io(err)
            }
        })
    }

    fn store(&self, path: &AssetPath, bytes: &[u8]) -> Result<(), AssetError> {
        let file = self.resolve(path);
        if let Some(dir) = file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&file, bytes)?;
        Ok(())
    }

    fn remove(&self, path: &AssetPath) -> Result<(), AssetError> {
        match std::fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AssetError::Io(err)),
        }
    }
}

/// In-memory source for tests and embedded assets.
#[derive(Default)]
pub struct MemorySource {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.entries.lock().insert(path.to_owned(), bytes.into());
    }
}

impl AssetSource for MemorySource {
    fn load(&self, path: &AssetPath) -> Result<Vec<u8>, AssetError> {
        self.entries
            .lock()
            .get(&path.to_string())
            .cloned()
            .ok_or_else(|| AssetError::NotFound(path.to_string()))
    }

    fn store(&self, path: &AssetPath, bytes: &[u8]) -> Result<(), AssetError> {
        self.entries.lock().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, path: &AssetPath) -> Result<(), AssetError> {
        self.entries.lock().remove(&path.to_string());
        Ok(())
    }
}
