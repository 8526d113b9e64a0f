use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::async_trait;
use bytes::Bytes;

/// Where uploaded analysis images live. The production impl is a directory
/// on disk served back as static content under `/uploads`.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    async fn save(&self, name: &str, body: Bytes) -> anyhow::Result<()>;
    async fn delete(&self, name: &str) -> anyhow::Result<()>;
}

/// Maps a stored file name to the URL recorded on a history row.
pub fn public_url(name: &str) -> String {
    format!("/uploads/{}", name)
}

/// Inverse of [`public_url`]; `None` if the url does not point at uploads.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    url.strip_prefix("/uploads/")
}

#[derive(Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub async fn new(root: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("create upload dir {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

#[async_trait]
impl ImageStorage for DiskStorage {
    async fn save(&self, name: &str, body: Bytes) -> anyhow::Result<()> {
        let path = self.root.join(name);
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write upload {}", path.display()))?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        let path = self.root.join(name);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("remove upload {}", path.display()))?;
        Ok(())
    }
}
