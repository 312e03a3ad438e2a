// src/storage/mod.rs

pub mod local;
pub mod s3;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

pub use local::LocalStore;
pub use s3::S3Store;

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// The handful of object-storage calls the job needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Verify the credentials can reach `bucket`. Fails with `Access` when they cannot.
    async fn authenticate(&self, bucket: &str) -> Result<()>;

    /// All objects under `prefix`, in key order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Upload a local file to `bucket/key`.
    async fn put_file(&self, local: &Path, bucket: &str, key: &str) -> Result<()>;
}
