// Local filesystem storage provider

use super::{
    validate_artifact_path, ArtifactReader, ArtifactStat, ArtifactWriter, StorageError,
    StorageProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Options for the `local` provider type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub base_path: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./backups"),
        }
    }
}

pub struct LocalStorageProvider {
    base_path: PathBuf,
}

impl LocalStorageProvider {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn from_config(config: LocalConfig) -> Self {
        Self::new(config.base_path)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_artifact_path(path)?;
        Ok(self.base_path.join(path))
    }

    async fn ensure_parent(&self, full_path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn not_found_or_io(path: &str, err: std::io::Error) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    fn kind(&self) -> &str {
        "local"
    }

    async fn ensure_ready(&self) -> Result<(), StorageError> {
        if !fs::try_exists(&self.base_path).await? {
            debug!(path = %self.base_path.display(), "Creating local backup directory");
            fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let full_path = self.resolve(path)?;
        self.ensure_parent(&full_path).await?;

        // Write to a sibling temp file so readers never observe a partial artifact
        let mut tmp_name = full_path.clone().into_os_string();
        tmp_name.push(".partial");
        let tmp_path = PathBuf::from(tmp_name);
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &full_path).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.resolve(path)?;
        fs::read(&full_path)
            .await
            .map_err(|e| Self::not_found_or_io(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full_path = self.resolve(path)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        if !fs::try_exists(&self.base_path).await? {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let entry_path = entry.path();
                if file_type.is_dir() {
                    pending.push(entry_path);
                    continue;
                }
                if entry_path.extension().and_then(|e| e.to_str()) == Some("partial") {
                    continue;
                }
                if let Ok(relative) = entry_path.strip_prefix(&self.base_path) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    paths.push(key);
                }
            }
        }

        paths.sort();
        Ok(paths)
    }

    async fn stat(&self, path: &str) -> Result<ArtifactStat, StorageError> {
        let full_path = self.resolve(path)?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| Self::not_found_or_io(path, e))?;

        Ok(ArtifactStat {
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn remove_file(&self, path: &str) -> Result<(), StorageError> {
        let full_path = self.resolve(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn create_read_stream(&self, path: &str) -> Result<ArtifactReader, StorageError> {
        let full_path = self.resolve(path)?;
        let file = fs::File::open(&full_path)
            .await
            .map_err(|e| Self::not_found_or_io(path, e))?;
        Ok(Box::new(file))
    }

    async fn create_write_stream(&self, path: &str) -> Result<ArtifactWriter, StorageError> {
        let full_path = self.resolve(path)?;
        self.ensure_parent(&full_path).await?;
        let file = fs::File::create(&full_path).await?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_local_provider_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path().join("store"));
        provider.ensure_ready().await.unwrap();
        provider.ensure_ready().await.unwrap();

        provider.write_file("b1_config.json", b"{}").await.unwrap();
        provider.write_file("nightly/b1_postgres.sql", b"SELECT 1;").await.unwrap();

        assert!(provider.exists("b1_config.json").await.unwrap());
        assert_eq!(provider.read_file("nightly/b1_postgres.sql").await.unwrap(), b"SELECT 1;");
        assert_eq!(provider.stat("b1_config.json").await.unwrap().size, 2);
        assert_eq!(
            provider.list().await.unwrap(),
            vec!["b1_config.json".to_string(), "nightly/b1_postgres.sql".to_string()]
        );

        provider.remove_file("b1_config.json").await.unwrap();
        provider.remove_file("b1_config.json").await.unwrap();
        assert!(!provider.exists("b1_config.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_provider_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path());
        let err = provider.write_file("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_local_provider_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path());
        let err = provider.read_file("nope.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_local_provider_streams() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalStorageProvider::new(dir.path());
        assert!(provider.supports_streaming());

        let mut writer = provider.create_write_stream("big.bin").await.unwrap();
        writer.write_all(b"streamed bytes").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = provider.create_read_stream("big.bin").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"streamed bytes");
    }
}
