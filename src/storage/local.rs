// src/storage/local.rs

use async_trait::async_trait;
use glob::glob;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::{ObjectInfo, ObjectStore};
use crate::error::{PipelineError, Result};

/// A directory tree standing in for object storage: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_dir(bucket);
        for part in key.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }
}

fn key_of(bucket_dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(bucket_dir).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn authenticate(&self, bucket: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket);
        match fs::metadata(&dir).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(PipelineError::NotFound(format!(
                "{} is not a directory",
                dir.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(PipelineError::Access(format!("{}: {}", dir.display(), e)))
            }
            Err(e) => Err(PipelineError::NotFound(format!("{}: {}", dir.display(), e))),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let bucket_dir = self.bucket_dir(bucket);
        let pattern = format!("{}/**/*", glob::Pattern::escape(&bucket_dir.to_string_lossy()));

        let mut out = Vec::new();
        let entries = glob(&pattern).map_err(|e| PipelineError::Network(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| PipelineError::Network(e.to_string()))?;
            if !path.is_file() {
                continue;
            }
            let Some(key) = key_of(&bucket_dir, &path) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            out.push(ObjectInfo { key, size });
        }

        out.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(bucket, prefix, count = out.len(), "listed local objects");
        Ok(out)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key);
        fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                PipelineError::Access(format!("{}: {}", path.display(), e))
            }
            _ => PipelineError::Network(format!("{}: {}", path.display(), e)),
        })
    }

    async fn put_file(&self, local: &Path, bucket: &str, key: &str) -> Result<()> {
        let dest = self.object_path(bucket, key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Network(format!("{}: {}", parent.display(), e)))?;
        }
        fs::copy(local, &dest).await.map_err(|e| {
            PipelineError::Network(format!(
                "copying {} -> {}: {}",
                local.display(),
                dest.display(),
                e
            ))
        })?;
        info!("uploaded to {}", dest.display());
        Ok(())
    }
}
