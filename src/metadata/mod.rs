//! Durable table of backup records.

mod file;
mod memory;
pub mod postgres;

pub use file::FileMetadataStore;
pub use memory::InMemoryMetadataStore;
pub use postgres::{PostgresConfig, PostgresMetadataStore};

use crate::backup::types::{BackupFilter, BackupRecord};
use crate::error::{BackupError, ErrorCode};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<MetadataStoreError> for BackupError {
    fn from(err: MetadataStoreError) -> Self {
        BackupError::new(ErrorCode::MetadataStore, "Metadata store operation failed").with_cause(err)
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the record with the same backup id.
    async fn upsert(&self, record: &BackupRecord) -> Result<(), MetadataStoreError>;

    async fn get(&self, backup_id: &str) -> Result<Option<BackupRecord>, MetadataStoreError>;

    /// Matching records, newest first.
    async fn list(&self, filter: Option<&BackupFilter>) -> Result<Vec<BackupRecord>, MetadataStoreError>;

    /// Remove records; unknown ids are ignored. Returns how many were removed.
    async fn delete(&self, backup_ids: &[String]) -> Result<usize, MetadataStoreError>;
}

/// Shared filtering/sorting for stores that cannot push the filter down.
pub(crate) fn apply_filter(mut records: Vec<BackupRecord>, filter: Option<&BackupFilter>) -> Vec<BackupRecord> {
    if let Some(filter) = filter {
        records.retain(|record| filter.matches(record));
    }
    crate::backup::types::sort_newest_first(&mut records);
    if let Some(limit) = filter.and_then(|f| f.limit) {
        records.truncate(limit);
    }
    records
}
