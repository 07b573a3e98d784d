//! Local filesystem blob store.
//!
//! Blobs live under a root directory at their key (`{folder}/{file}/{name}`).
//! Retrieval URLs are `file://` URLs carrying an expiry and an
//! HMAC-SHA256 signature over the key and the expiry.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use tokio::fs;
use tracing::debug;

use dataroom_core::domain::StoreError;
use dataroom_core::ports::IBlobStore;

use crate::StoreAdapterError;

type HmacSha256 = Hmac<Sha256>;

/// Characters left as-is in the key part of a signed URL
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Blob store over a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    /// Root directory for all stored blobs.
    root: PathBuf,
    /// HMAC key for URL signatures; empty when unset.
    secret: String,
}

impl FsBlobStore {
    /// Creates a blob store rooted at `root`, creating the directory.
    pub async fn new(root: &Path, signing_secret: Option<String>) -> Result<Self, StoreAdapterError> {
        fs::create_dir_all(root).await.map_err(|e| {
            StoreAdapterError::BlobRoot(format!("Failed to create blob root {}: {}", root.display(), e))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            secret: signing_secret.unwrap_or_default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `key` inside the root, rejecting keys that would escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.trim().is_empty() || escapes {
            return Err(StoreError::Storage(format!("Invalid blob key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Storage(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }
        Ok(())
    }

    fn mac(&self, key: &str, expires: i64) -> Result<HmacSha256, StoreError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| StoreError::Storage(format!("Invalid signing key: {e}")))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn signature(&self, key: &str, expires: i64) -> Result<String, StoreError> {
        Ok(hex::encode(self.mac(key, expires)?.finalize().into_bytes()))
    }

    /// Checks a URL produced by [`IBlobStore::signed_url`] and returns the
    /// blob key it grants access to.
    ///
    /// Fails with `PermissionDenied` for a tampered or expired URL.
    pub fn verify_signed_url(&self, url: &str) -> Result<String, StoreError> {
        let invalid = || StoreError::PermissionDenied("Invalid signed URL".to_string());

        let prefix = format!("file://{}/", self.root.display());
        let rest = url.strip_prefix(&prefix).ok_or_else(invalid)?;
        let (encoded_key, query) = rest.split_once('?').ok_or_else(invalid)?;
        let key = percent_decode_str(encoded_key)
            .decode_utf8()
            .map_err(|_| invalid())?
            .into_owned();

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = Some(v),
                _ => {}
            }
        }
        let (expires, signature) = expires.zip(signature).ok_or_else(invalid)?;
        let signature = hex::decode(signature).map_err(|_| invalid())?;

        self.mac(&key, expires)?
            .verify_slice(&signature)
            .map_err(|_| invalid())?;
        if Utc::now().timestamp() > expires {
            return Err(StoreError::PermissionDenied("Signed URL expired".to_string()));
        }
        Ok(key)
    }
}

fn io_error(action: &str, key: &str, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(format!("Blob not found: {key}"))
    } else {
        StoreError::Storage(format!("Failed to {action} {key}: {e}"))
    }
}

#[async_trait]
impl IBlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        Self::ensure_parent(&path).await?;
        fs::write(&path, data).await.map_err(|e| io_error("write", key, e))?;
        debug!(key, bytes = data.len(), "Wrote blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key)?;
        fs::read(&path).await.map_err(|e| io_error("read", key, e))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        Self::ensure_parent(&to_path).await?;
        fs::copy(&from_path, &to_path)
            .await
            .map_err(|e| io_error("copy", from, e))?;
        debug!(from, to, "Copied blob");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted blob");
                Ok(())
            }
            // Already gone: deleting is idempotent.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Storage(format!("Failed to delete {key}: {e}"))),
        }
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        let path = self.resolve(key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(format!("Blob not found: {key}")));
        }
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        Ok(format!(
            "file://{}/{}?expires={}&signature={}",
            self.root.display(),
            utf8_percent_encode(key, KEY_ENCODE_SET),
            expires,
            self.signature(key, expires)?
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dir: &tempfile::TempDir) -> FsBlobStore {
        FsBlobStore::new(dir.path(), Some("s3cret".to_string())).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;

        blobs.put("f1/x1/report.pdf", b"hello").await.unwrap();
        assert_eq!(blobs.get("f1/x1/report.pdf").await.unwrap(), b"hello");

        blobs.delete("f1/x1/report.pdf").await.unwrap();
        assert!(matches!(
            blobs.get("f1/x1/report.pdf").await,
            Err(StoreError::NotFound(_))
        ));
        // Second delete is a no-op.
        blobs.delete("f1/x1/report.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;

        blobs.put("a/b/old.txt", b"content").await.unwrap();
        blobs.copy("a/b/old.txt", "a/b/new.txt").await.unwrap();
        assert_eq!(blobs.get("a/b/new.txt").await.unwrap(), b"content");
        assert_eq!(blobs.get("a/b/old.txt").await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;
        assert!(blobs.copy("nope/x", "a/y").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;
        assert!(matches!(
            blobs.put("../outside.txt", b"x").await,
            Err(StoreError::Storage(_))
        ));
        assert!(blobs.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_signed_url_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;
        blobs.put("f/x/Q3 deck (final).pdf", b"deck").await.unwrap();

        let url = blobs
            .signed_url("f/x/Q3 deck (final).pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.contains("signature="));
        assert_eq!(blobs.verify_signed_url(&url).unwrap(), "f/x/Q3 deck (final).pdf");
    }

    #[tokio::test]
    async fn test_tampered_or_foreign_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;
        blobs.put("f/x/a.txt", b"a").await.unwrap();
        blobs.put("f/x/b.txt", b"b").await.unwrap();

        let url = blobs.signed_url("f/x/a.txt", Duration::from_secs(60)).await.unwrap();
        let tampered = url.replace("a.txt", "b.txt");
        assert!(blobs.verify_signed_url(&tampered).is_err());

        let other = FsBlobStore::new(dir.path(), Some("different".to_string())).await.unwrap();
        assert!(other.verify_signed_url(&url).is_err());
    }

    #[tokio::test]
    async fn test_expired_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;
        blobs.put("f/x/a.txt", b"a").await.unwrap();

        let expires = Utc::now().timestamp() - 10;
        let url = format!(
            "file://{}/f/x/a.txt?expires={}&signature={}",
            dir.path().display(),
            expires,
            blobs.signature("f/x/a.txt", expires).unwrap()
        );
        assert!(matches!(
            blobs.verify_signed_url(&url),
            Err(StoreError::PermissionDenied(msg)) if msg.contains("expired")
        ));
    }

    #[tokio::test]
    async fn test_signed_url_for_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;
        assert!(matches!(
            blobs.signed_url("f/x/missing", Duration::from_secs(1)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_extended_expiry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;
        blobs.put("f/x/a.txt", b"a").await.unwrap();

        let url = blobs.signed_url("f/x/a.txt", Duration::from_secs(60)).await.unwrap();
        let (head, tail) = url.split_once("expires=").unwrap();
        let (_, signature) = tail.split_once('&').unwrap();
        let extended = format!("{head}expires={}&{signature}", Utc::now().timestamp() + 86_400);
        assert!(matches!(
            blobs.verify_signed_url(&extended),
            Err(StoreError::PermissionDenied(msg)) if msg.contains("Invalid")
        ));
    }

    #[tokio::test]
    async fn test_key_is_percent_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = store(&dir).await;
        blobs.put("f/x/a b (1).pdf", b"a").await.unwrap();

        let url = blobs.signed_url("f/x/a b (1).pdf", Duration::from_secs(60)).await.unwrap();
        assert!(url.contains("/f/x/a%20b%20%281%29.pdf?"));
        assert!(blobs.verify_signed_url(&url.replace("signature=", "signature=zz")).is_err());
    }
}
