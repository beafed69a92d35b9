use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use rand::RngCore;
use thiserror::Error;
use time::macros::format_description;

use crate::core::config::Settings;
use crate::core::time::now_utc;

#[derive(Debug, Error)]
pub(crate) enum StorageError {
    #[error("invalid storage path: {0}")]
    InvalidPath(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves relative references from a grading record into bytes.
#[async_trait]
pub(crate) trait FileStore: Send + Sync {
    async fn read(&self, relative_path: &str) -> Result<Vec<u8>, StorageError>;
}

#[derive(Debug, Clone)]
pub(crate) struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let root = settings.storage().upload_path.clone();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self::new(root))
    }

    /// Writes `bytes` under `<root>/<subfolder>/` with a generated name and
    /// returns the path relative to the root.
    pub(crate) async fn save(
        &self,
        subfolder: &str,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let folder = sanitize_relative(subfolder)?;
        let extension = Path::new(original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".to_string());

        let filename = format!("{}.{extension}", generated_stem());
        let relative = folder.join(&filename);
        let absolute = self.root.join(&relative);

        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&absolute, bytes).await?;

        Ok(relative.to_string_lossy().replace('\\', "/"))
    }
}

#[async_trait]
impl FileStore for LocalFileStorage {
    async fn read(&self, relative_path: &str) -> Result<Vec<u8>, StorageError> {
        let relative = sanitize_relative(relative_path)?;
        let absolute = self.root.join(relative);

        match tokio::fs::read(&absolute).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(relative_path.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

fn sanitize_relative(value: &str) -> Result<PathBuf, StorageError> {
    let trimmed = value.trim().trim_start_matches("./");
    if trimmed.is_empty() {
        return Err(StorageError::InvalidPath(value.to_string()));
    }

    let path = Path::new(trimmed);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidPath(value.to_string()));
            }
        }
    }

    Ok(clean)
}

fn generated_stem() -> String {
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);
    let stamp = now_utc()
        .format(format_description!("[year][month][day][hour][minute][second]"))
        .unwrap_or_default();
    format!("{}-{stamp}", hex::encode(random))
}
