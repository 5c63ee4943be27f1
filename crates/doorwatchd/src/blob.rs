use std::path::PathBuf;

use doorwatch_analytics::{BlobError, ModelBlobStore};

/// Model blob store backed by a single file on disk.
///
/// Writes go through a sibling temp file and a rename so a crash never
/// leaves a half-written model behind.
pub struct FileBlobStore {
    path: PathBuf,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ModelBlobStore for FileBlobStore {
    fn save(&self, blob: &[u8]) -> Result<(), BlobError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<u8>, BlobError> {
        match std::fs::read(&self.path) {
            Ok(blob) => Ok(blob),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound),
            Err(err) => Err(BlobError::Io(err)),
        }
    }
}
