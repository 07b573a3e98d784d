//! Blob store port (driven/secondary port)
//!
//! Physical file bytes live behind this interface under opaque keys. The
//! remote store decides the keys; the blob store only stores, copies,
//! deletes and hands out time-limited retrieval URLs.

use std::time::Duration;

use crate::domain::errors::StoreError;

/// Port trait for opaque byte storage
///
/// All failures are reported as [`StoreError::Storage`] (or
/// [`StoreError::NotFound`] for a missing key).
#[async_trait::async_trait]
pub trait IBlobStore: Send + Sync {
    /// Stores `data` under `key`, replacing any existing blob
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Reads the blob stored under `key`
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Copies the blob at `from` to `to`
    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError>;

    /// Removes the blob at `key`
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Returns a URL granting read access to `key` for `ttl`
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StoreError>;
}
