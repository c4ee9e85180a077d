//! Filesystem-backed blob store
//!
//! Objects live under `<root>/<key>`. Upload handles point at an external
//! upload endpoint and carry an expiry plus a keyed SHA-256 signature that
//! the endpoint checks with [`FsBlobStore::verify_upload`].

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::fs;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::constants::buckets;

use super::{BlobStore, StorageError, UploadHandle};

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
    secret: String,
    expiry: Duration,
}

impl FsBlobStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            base_url: config.upload_base_url.trim_end_matches('/').to_string(),
            secret: config.signing_secret.clone(),
            expiry: Duration::seconds(config.upload_expiry_secs),
        }
    }

    /// Check an upload request against the signature issued for it.
    pub fn verify_upload(&self, key: &str, expires: i64, signature: &str) -> bool {
        if Utc::now().timestamp() > expires {
            return false;
        }
        let expected = self.sign(key, expires);
        bool::from(expected.as_bytes().ct_eq(signature.as_bytes()))
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b":");
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && !key.contains(['\\', '\0'])
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !well_formed {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn bucket_for(file_name: &str) -> &'static str {
    let is_text = Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));
    if is_text {
        buckets::INPUTS
    } else {
        buckets::SOURCES
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn generate_upload_handle(&self, file_name: &str) -> Result<UploadHandle, StorageError> {
        if file_name.is_empty() || file_name == "." || file_name == ".." || file_name.contains(['/', '\\', '\0']) {
            return Err(StorageError::InvalidKey(file_name.to_string()));
        }

        let object_key = format!("{}/{}/{}", bucket_for(file_name), Uuid::new_v4(), file_name);
        let expires_at = Utc::now() + self.expiry;
        let expires = expires_at.timestamp();
        let signature = self.sign(&object_key, expires);

        tracing::debug!(object_key = %object_key, expires = expires, "Issued upload handle");

        Ok(UploadHandle {
            upload_url: format!(
                "{}/upload/{}?expires={}&signature={}",
                self.base_url, object_key, expires, signature
            ),
            object_key,
            expires_at,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }
}
