//! Payment Proof Store
//!
//! Local filesystem storage for uploaded payment proofs (bank transfer
//! receipts and the like). Callers get back an opaque handle that is
//! stored on the journal record; the file itself is only ever reachable
//! through the admin review surface.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Proof too large: {0} bytes")]
    TooLarge(usize),

    #[error("Invalid proof handle")]
    InvalidHandle,
}

const MAX_PROOF_BYTES: usize = 10 * 1024 * 1024;
const ALLOWED_EXTENSIONS: [&str; 5] = ["pdf", "png", "jpg", "jpeg", "webp"];

pub struct ProofStore {
    data_dir: PathBuf,
}

impl ProofStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub async fn init(&self) -> Result<(), ProofError> {
        fs::create_dir_all(&self.data_dir).await?;
        info!(dir = %self.data_dir.display(), "proof store ready");
        Ok(())
    }

    /// Store an uploaded proof and return its opaque handle
    pub async fn store(&self, original_name: &str, bytes: &[u8]) -> Result<String, ProofError> {
        if bytes.len() > MAX_PROOF_BYTES {
            return Err(ProofError::TooLarge(bytes.len()));
        }
        let ext = extension_of(original_name)
            .ok_or_else(|| ProofError::UnsupportedType(original_name.to_string()))?;

        let handle = format!("{}.{}", Ulid::new(), ext);
        fs::write(self.data_dir.join(&handle), bytes).await?;
        Ok(handle)
    }

    /// Load a stored proof by handle
    pub async fn load(&self, handle: &str) -> Result<Vec<u8>, ProofError> {
        // Handles are generated internally; anything with a path
        // separator is not one of ours
        if handle.contains('/') || handle.contains('\\') || handle.contains("..") {
            return Err(ProofError::InvalidHandle);
        }
        Ok(fs::read(self.data_dir.join(handle)).await?)
    }

    pub async fn remove(&self, handle: &str) -> Result<(), ProofError> {
        if handle.contains('/') || handle.contains('\\') || handle.contains("..") {
            return Err(ProofError::InvalidHandle);
        }
        match fs::remove_file(self.data_dir.join(handle)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> ProofStore {
        let dir = std::env::temp_dir().join(format!("proof_store_test_{}", Ulid::new()));
        ProofStore::new(dir)
    }

    #[tokio::test]
    async fn test_store_and_load_roundtrip() {
        let store = temp_store();
        store.init().await.unwrap();

        let handle = store.store("receipt.pdf", b"pdf bytes").await.unwrap();
        assert!(handle.ends_with(".pdf"));

        let loaded = store.load(&handle).await.unwrap();
        assert_eq!(loaded, b"pdf bytes");

        store.remove(&handle).await.unwrap();
        assert!(store.load(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_unsupported_type() {
        let store = temp_store();
        store.init().await.unwrap();
        assert!(matches!(
            store.store("malware.exe", b"nope").await,
            Err(ProofError::UnsupportedType(_))
        ));
        assert!(matches!(
            store.store("noextension", b"nope").await,
            Err(ProofError::UnsupportedType(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_handles() {
        let store = temp_store();
        store.init().await.unwrap();
        assert!(matches!(
            store.load("../../etc/passwd").await,
            Err(ProofError::InvalidHandle)
        ));
        assert!(matches!(
            store.remove("a/b.pdf").await,
            Err(ProofError::InvalidHandle)
        ));
    }

    #[tokio::test]
    async fn test_rejects_oversized_upload() {
        let store = temp_store();
        store.init().await.unwrap();
        let huge = vec![0u8; MAX_PROOF_BYTES + 1];
        assert!(matches!(
            store.store("big.png", &huge).await,
            Err(ProofError::TooLarge(_))
        ));
    }
}
