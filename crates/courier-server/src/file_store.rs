use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(&canonical_base)
        .or_else(|_| target.strip_prefix(base))
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// Where a reassembled upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Generated name under the upload directory. Never the client's name.
    pub storage_name: String,
    pub mime_type: String,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FileStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::FileStorage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "File store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub async fn save(&self, original_name: &str, data: &[u8]) -> Result<StoredFile, ServerError> {
        if data.len() > self.max_size {
            return Err(ServerError::FileTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let storage_name = match sanitized_extension(original_name) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.safe_path(&storage_name)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::FileStorage(format!("Failed to write {}: {}", storage_name, e))
        })?;

        let mime_type = detect_mime(data);
        debug!(name = %storage_name, size = data.len(), mime = %mime_type, "Stored upload");

        Ok(StoredFile {
            storage_name,
            mime_type,
            size: data.len(),
        })
    }

    pub async fn read(&self, storage_name: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(storage_name)?;

        if !path.exists() {
            return Err(ServerError::NotFound(format!("file {storage_name}")));
        }

        fs::read(&path).await.map_err(|e| {
            ServerError::FileStorage(format!("Failed to read {}: {}", storage_name, e))
        })
    }

    fn safe_path(&self, name: &str) -> Result<PathBuf, ServerError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ServerError::BadRequest("Invalid file name".to_string()));
        }
        ensure_within(&self.base_path, &self.base_path.join(name))
    }
}

/// Lower-cased alphanumeric extension of `name`, at most 16 characters.
fn sanitized_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

/// MIME type from the leading bytes, with a text/binary fallback.
pub fn detect_mime(data: &[u8]) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    if std::str::from_utf8(data).is_ok() {
        "text/plain; charset=utf-8".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[tokio::test]
    async fn test_save_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("uploads"), 1024).await.unwrap();

        let stored = store.save("report.TXT", b"hello").await.unwrap();
        assert!(stored.storage_name.ends_with(".txt"));
        assert_ne!(stored.storage_name, "report.TXT");
        assert_eq!(stored.mime_type, "text/plain; charset=utf-8");
        assert_eq!(stored.size, 5);

        let data = store.read(&stored.storage_name).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_client_name_never_reaches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        let stored = store.save("../../etc/passwd", b"x").await.unwrap();
        assert!(!stored.storage_name.contains(".."));
        assert!(dir.path().join(&stored.storage_name).exists());
    }

    #[tokio::test]
    async fn test_read_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf(), 1024).await.unwrap();

        assert!(matches!(
            store.read("../secret").await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            store.read("missing.bin").await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf(), 4).await.unwrap();
        assert!(matches!(
            store.save("a.bin", b"12345").await,
            Err(ServerError::FileTooLarge { size: 5, max: 4 })
        ));
    }

    #[test]
    fn test_detect_mime() {
        assert_eq!(detect_mime(PNG_HEADER), "image/png");
        assert_eq!(detect_mime(b"plain words"), "text/plain; charset=utf-8");
        assert_eq!(detect_mime(&[0xc3, 0x28, 0xa0, 0xa1]), "application/octet-stream");
    }

    #[test]
    fn test_sanitized_extension() {
        assert_eq!(sanitized_extension("a.tar.GZ").as_deref(), Some("gz"));
        assert_eq!(sanitized_extension("noext"), None);
        assert_eq!(sanitized_extension("x.p$h%p").as_deref(), Some("php"));
    }
}
