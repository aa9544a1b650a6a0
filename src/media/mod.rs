use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Byte-storage collaborator contract: store a payload under an opaque key,
/// delete by key. The core never interprets keys beyond passing them around.
pub trait MediaStorage: Send + Sync {
    fn put(&self, bytes: &[u8]) -> Result<String>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Public URL for an attached payload.
pub fn media_url(storage_key: &str) -> String {
    format!("/media/files/{}", storage_key)
}

/// Best-effort physical deletion of a batch of payloads, run only after the
/// database transaction that removed their rows has committed. A failure
/// here is logged and reported but never unwinds the committed state; an
/// orphaned file is recoverable by a sweep, a half-deleted tweet is not.
pub fn delete_files(storage: &dyn MediaStorage, keys: &[String]) {
    for key in keys {
        if let Err(e) = storage.delete(key) {
            log::error!("Failed to delete media payload '{}': {}", key, e);
        }
    }
}

/// Filesystem-backed storage: one file per key under a base directory.
pub struct FsMediaStorage {
    root: PathBuf,
}

impl FsMediaStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| {
            Error::BadRequest(format!(
                "Failed to create media directory '{}': {}",
                root.display(),
                e
            ))
        })?;
        log::info!("Media storage initialized at {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl MediaStorage for FsMediaStorage {
    fn put(&self, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::BadRequest("Empty media payload".to_string()));
        }
        let key = Uuid::new_v4().to_string();
        let path = self.path_for(&key);
        fs::write(&path, bytes)
            .map_err(|e| Error::BadRequest(format!("Failed to write media payload: {}", e)))?;
        log::debug!("Stored {} bytes under key {}", bytes.len(), key);
        Ok(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        fs::remove_file(&path)
            .map_err(|e| Error::BadRequest(format!("Failed to delete '{}': {}", key, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_url_shape() {
        assert_eq!(media_url("abc123"), "/media/files/abc123");
    }

    #[test]
    fn test_put_and_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsMediaStorage::new(dir.path().to_path_buf()).unwrap();

        let key = storage.put(b"payload").unwrap();
        assert!(dir.path().join(&key).exists());

        storage.delete(&key).unwrap();
        assert!(!dir.path().join(&key).exists());
    }

    #[test]
    fn test_delete_files_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsMediaStorage::new(dir.path().to_path_buf()).unwrap();
        let key = storage.put(b"payload").unwrap();

        // One missing key must not stop the rest of the batch.
        delete_files(&storage, &["missing".to_string(), key.clone()]);
        assert!(!dir.path().join(&key).exists());
    }
}
