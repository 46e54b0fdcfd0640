use crate::errors::{AppError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::info;

pub const KYC_BUCKET: &str = "kyc-documents";
pub const MAX_DOCUMENT_BYTES: usize = 5 * 1024 * 1024;

/// Object storage for identity documents. Returns the public URL of the stored object.
#[axum::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String>;
}

pub fn extension_for(content_type: &str) -> Result<&'static str> {
    match content_type {
        "image/png" => Ok("png"),
        "image/jpeg" => Ok("jpg"),
        "image/webp" => Ok("webp"),
        _ => Err(AppError::ValidationError(
            "Formato de arquivo inválido. Use PNG, JPEG ou WEBP.".to_string(),
        )),
    }
}

pub fn check_document(bytes: &[u8], content_type: &str) -> Result<()> {
    extension_for(content_type)?;
    if bytes.is_empty() {
        return Err(AppError::ValidationError("Arquivo vazio.".to_string()));
    }
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(AppError::ValidationError(
            "Arquivo muito grande. Tamanho máximo: 5MB.".to_string(),
        ));
    }
    Ok(())
}

/// Keeps object keys inside the bucket: relative, no `..`, no empty segments.
fn safe_relative(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    let valid = !path.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
        return Err(AppError::ValidationError(format!("Caminho de arquivo inválido: {}", path)));
    }
    Ok(candidate.to_path_buf())
}

/// Filesystem-backed bucket under `root/kyc-documents`.
pub struct LocalDocumentStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[axum::async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        check_document(bytes, content_type)?;
        let relative = safe_relative(path)?;
        let target = self.root.join(KYC_BUCKET).join(&relative);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;

        info!(action = "document_stored", path = %path, bytes = bytes.len());
        Ok(format!("{}/{}/{}", self.public_base_url, KYC_BUCKET, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    #[tokio::test]
    async fn test_put_writes_under_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path(), "http://localhost:8080/files/");

        let url = store.put("documentos/u1_frente.png", PNG, "image/png").await.unwrap();
        assert_eq!(url, "http://localhost:8080/files/kyc-documents/documentos/u1_frente.png");

        let written = std::fs::read(dir.path().join(KYC_BUCKET).join("documentos/u1_frente.png")).unwrap();
        assert_eq!(written, PNG);
    }

    #[tokio::test]
    async fn test_rejects_type_size_and_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path(), "http://x");

        assert!(store.put("a.gif", PNG, "image/gif").await.is_err());
        let big = vec![0u8; MAX_DOCUMENT_BYTES + 1];
        assert!(store.put("a.png", &big, "image/png").await.is_err());
        assert!(store.put("../escape.png", PNG, "image/png").await.is_err());
        assert!(store.put("/etc/x.png", PNG, "image/png").await.is_err());
    }

    #[test]
    fn test_exactly_five_megabytes_is_accepted() {
        let bytes = vec![1u8; MAX_DOCUMENT_BYTES];
        assert!(check_document(&bytes, "image/jpeg").is_ok());
    }
}
