//! Blob storage for exported documents, plus signed time-limited links.
//!
//! `LocalBlobStore` keeps objects under a directory and serves them back
//! through `/exports/{key}`. A link carries its expiry and an HMAC-SHA256
//! over `key \n expires`, so the server needs no per-link state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const CONTENT_TYPE_SUFFIX: &str = ".content-type";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob key '{0}'")]
    InvalidKey(String),

    #[error("blob '{0}' does not exist")]
    Missing(String),

    #[error("blob I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link signing failed: {0}")]
    Signing(String),
}

/// Why a presented link was refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link has expired")]
    Expired,

    #[error("link signature does not match")]
    BadSignature,
}

/// An issued link and the instant it stops working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError>;

    /// Link granting read access to `key` for `ttl_secs` seconds from now.
    /// `expires_at` is exactly the expiry the link is checked against.
    /// Fails if `key` was never stored.
    async fn issue_timed_access_link(&self, key: &str, ttl_secs: u64) -> Result<TimedLink, BlobError>;
}

pub struct LocalBlobStore {
    root: PathBuf,
    public_url: String,
    secret: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str, secret: impl Into<String>) -> Result<Self, BlobError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_url: public_url.trim_end_matches('/').to_string(),
            secret: secret.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Object bytes and their content type.
    pub async fn read(&self, key: &str) -> Result<(Vec<u8>, String), BlobError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::Missing(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let content_type = tokio::fs::read_to_string(sidecar(&path))
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        Ok((bytes, content_type))
    }

    fn mac(&self, key: &str, expires: i64) -> Result<HmacSha256, BlobError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| BlobError::Signing(e.to_string()))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Signed URL for `key` that stops verifying at `expires` (unix seconds).
    pub fn sign_link(&self, key: &str, expires: i64) -> Result<String, BlobError> {
        validate_key(key)?;
        let signature = hex::encode(self.mac(key, expires)?.finalize().into_bytes());
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!(
            "{}/exports/{}?expires={}&signature={}",
            self.public_url, encoded_key, expires, signature
        ))
    }

    /// Signature first, then expiry: a forged link always reports `BadSignature`.
    pub fn verify_link(&self, key: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> Result<(), LinkError> {
        let presented = hex::decode(signature).map_err(|_| LinkError::BadSignature)?;
        let mac = self.mac(key, expires).map_err(|_| LinkError::BadSignature)?;
        mac.verify_slice(&presented).map_err(|_| LinkError::BadSignature)?;
        if now.timestamp() >= expires {
            return Err(LinkError::Expired);
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // temp file + rename so a reader never sees a partial object
        let tmp = path.with_file_name(format!(".{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::write(sidecar(&path), content_type).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        log::info!("[BLOBS] Stored {} ({} bytes, {})", key, bytes.len(), content_type);
        Ok(())
    }

    async fn issue_timed_access_link(&self, key: &str, ttl_secs: u64) -> Result<TimedLink, BlobError> {
        if !self.exists(key).await? {
            return Err(BlobError::Missing(key.to_string()));
        }
        let out_of_range = || BlobError::Signing(format!("link lifetime of {}s is out of range", ttl_secs));
        let expires = i64::try_from(ttl_secs)
            .ok()
            .and_then(|ttl| Utc::now().timestamp().checked_add(ttl))
            .ok_or_else(out_of_range)?;
        let expires_at = DateTime::from_timestamp(expires, 0).ok_or_else(out_of_range)?;
        Ok(TimedLink {
            url: self.sign_link(key, expires)?,
            expires_at,
        })
    }
}

fn sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(CONTENT_TYPE_SUFFIX);
    PathBuf::from(name)
}

/// Keys are relative slash-separated paths that cannot leave the root.
fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.ends_with(CONTENT_TYPE_SUFFIX)
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == ".." || segment.starts_with('.'));
    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}
