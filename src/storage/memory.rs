use super::{validate_artifact_path, ArtifactStat, StorageError, StorageProvider};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory artifact storage. Does not stream.
#[derive(Clone, Default)]
pub struct MemoryStorageProvider {
    artifacts: Arc<DashMap<String, (Bytes, DateTime<Utc>)>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn ensure_ready(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        validate_artifact_path(path)?;
        self.artifacts
            .insert(path.to_string(), (Bytes::copy_from_slice(data), Utc::now()));
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.artifacts
            .get(path)
            .map(|entry| entry.value().0.to_vec())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.artifacts.contains_key(path))
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut paths: Vec<String> = self.artifacts.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        Ok(paths)
    }

    async fn stat(&self, path: &str) -> Result<ArtifactStat, StorageError> {
        self.artifacts
            .get(path)
            .map(|entry| ArtifactStat {
                size: entry.value().0.len() as u64,
                modified: Some(entry.value().1),
            })
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn remove_file(&self, path: &str) -> Result<(), StorageError> {
        self.artifacts.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_provider_does_not_stream() {
        let provider = MemoryStorageProvider::new();
        assert!(!provider.supports_streaming());
        let err = provider.create_write_stream("x").await.err().unwrap();
        assert!(matches!(err, StorageError::StreamingUnsupported(kind) if kind == "memory"));
    }

    #[tokio::test]
    async fn test_memory_provider_crud() {
        let provider = MemoryStorageProvider::new();
        provider.write_file("b_config.json", b"{}").await.unwrap();
        assert_eq!(provider.len(), 1);
        assert_eq!(provider.stat("b_config.json").await.unwrap().size, 2);
        provider.remove_file("b_config.json").await.unwrap();
        assert!(provider.is_empty());
        assert!(matches!(
            provider.read_file("b_config.json").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
