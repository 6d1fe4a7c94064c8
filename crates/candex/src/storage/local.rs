//! Filesystem-backed object store rooted at a directory.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::gateway::GatewayError;

use super::{ObjectStore, StoredObject};

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl ObjectStore for LocalObjectStore {
    fn list(&self, prefix: &str) -> Result<Vec<StoredObject>, GatewayError> {
        let base = self.resolve(prefix);
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| GatewayError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            objects.push(StoredObject { name, path });
        }

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, GatewayError> {
        std::fs::read(self.resolve(path))
            .map_err(|e| GatewayError::Backend(format!("read '{}': {}", path, e)))
    }

    fn stat(&self, path: &str) -> Result<u64, GatewayError> {
        std::fs::metadata(self.resolve(path))
            .map(|m| m.len())
            .map_err(|e| GatewayError::Backend(format!("stat '{}': {}", path, e)))
    }
}

/// Helper for the tests and examples: writes `content` under the store
/// root, creating parent directories.
pub fn write_object(root: &Path, rel: &str, content: &[u8]) -> std::io::Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}
