//! Pluggable storage providers for backup artifacts.
//!
//! A provider is a flat, byte-addressable artifact store keyed by relative
//! `/`-separated paths. Providers that can stream expose
//! [`StorageProvider::create_read_stream`] / [`StorageProvider::create_write_stream`];
//! the rest report `supports_streaming() == false` so callers can skip
//! streaming work (bundle compression) instead of failing.

pub mod factory;
pub mod local;
pub mod memory;
pub mod registry;
#[cfg(feature = "s3")]
pub mod s3;

pub use factory::{ProviderConstructor, ProviderFactoryRegistry, StorageProviderConfig};
pub use local::{LocalConfig, LocalStorageProvider};
pub use memory::MemoryStorageProvider;
pub use registry::StorageProviderRegistry;
#[cfg(feature = "s3")]
pub use s3::{GcsConfig, S3Config, S3StorageProvider};

use crate::error::{BackupError, ErrorCode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Errors raised by storage providers
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("Streaming is not supported by the {0} provider")]
    StreamingUnsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for BackupError {
    fn from(err: StorageError) -> Self {
        let code = match err {
            StorageError::StreamingUnsupported(_) => ErrorCode::StorageStreamingUnsupported,
            _ => ErrorCode::StorageIo,
        };
        BackupError::new(code, "Storage provider operation failed").with_cause(err)
    }
}

/// Size and modification time of a stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactStat {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Streaming reader over an artifact
pub type ArtifactReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming writer into an artifact. Callers must `shutdown()` it to commit.
pub type ArtifactWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider type name (`local`, `memory`, `s3`, `gcs`, ...)
    fn kind(&self) -> &str;

    /// Prepare the backend. Idempotent.
    async fn ensure_ready(&self) -> Result<(), StorageError>;

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Every stored artifact path, sorted.
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    async fn stat(&self, path: &str) -> Result<ArtifactStat, StorageError>;

    /// Remove an artifact. Succeeds when the artifact is already gone.
    async fn remove_file(&self, path: &str) -> Result<(), StorageError>;

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn create_read_stream(&self, _path: &str) -> Result<ArtifactReader, StorageError> {
        Err(StorageError::StreamingUnsupported(self.kind().to_string()))
    }

    async fn create_write_stream(&self, _path: &str) -> Result<ArtifactWriter, StorageError> {
        Err(StorageError::StreamingUnsupported(self.kind().to_string()))
    }
}

/// Reject absolute paths, traversal and empty segments.
pub fn validate_artifact_path(path: &str) -> Result<(), StorageError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Place an artifact name under an optional destination prefix.
pub fn artifact_path(destination: Option<&str>, name: &str) -> String {
    match destination.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty()) {
        Some(dir) => format!("{}/{}", dir, name),
        None => name.to_string(),
    }
}

/// Final path segment of an artifact path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_artifact_path() {
        assert!(validate_artifact_path("backup-1_config.json").is_ok());
        assert!(validate_artifact_path("nightly/backup-1_config.json").is_ok());
        assert!(validate_artifact_path("").is_err());
        assert!(validate_artifact_path("/etc/passwd").is_err());
        assert!(validate_artifact_path("../outside").is_err());
        assert!(validate_artifact_path("a//b").is_err());
        assert!(validate_artifact_path("a\\b").is_err());
    }

    #[test]
    fn test_artifact_path_with_destination() {
        assert_eq!(artifact_path(None, "x_config.json"), "x_config.json");
        assert_eq!(artifact_path(Some("/nightly/"), "x_config.json"), "nightly/x_config.json");
        assert_eq!(artifact_path(Some(""), "x_config.json"), "x_config.json");
        assert_eq!(file_name("nightly/x_config.json"), "x_config.json");
    }

    #[test]
    fn test_streaming_error_maps_to_distinct_code() {
        let err: BackupError = StorageError::StreamingUnsupported("memory".into()).into();
        assert_eq!(err.code(), ErrorCode::StorageStreamingUnsupported);
        let err: BackupError = StorageError::NotFound("x".into()).into();
        assert_eq!(err.code(), ErrorCode::StorageIo);
    }
}
