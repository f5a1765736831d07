// File-backed metadata store - one JSON document per backup record

use super::{apply_filter, MetadataStore, MetadataStoreError};
use crate::backup::types::{BackupFilter, BackupRecord};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::warn;

pub struct FileMetadataStore {
    directory: PathBuf,
}

impl FileMetadataStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn record_path(&self, backup_id: &str) -> PathBuf {
        self.directory.join(format!("{}.metadata.json", backup_id))
    }

    async fn ensure_directory_exists(&self) -> Result<(), MetadataStoreError> {
        if !fs::try_exists(&self.directory).await? {
            fs::create_dir_all(&self.directory).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn upsert(&self, record: &BackupRecord) -> Result<(), MetadataStoreError> {
        self.ensure_directory_exists().await?;

        let path = self.record_path(record.id());
        let tmp_path = self.directory.join(format!("{}.metadata.tmp", record.id()));
        let json = serde_json::to_vec_pretty(record)?;

        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, backup_id: &str) -> Result<Option<BackupRecord>, MetadataStoreError> {
        match fs::read(self.record_path(backup_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, filter: Option<&BackupFilter>) -> Result<Vec<BackupRecord>, MetadataStoreError> {
        if !fs::try_exists(&self.directory).await? {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.directory).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(".metadata.json"))
                .unwrap_or(false);
            if !is_record {
                continue;
            }

            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<BackupRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable backup record"),
            }
        }

        Ok(apply_filter(records, filter))
    }

    async fn delete(&self, backup_ids: &[String]) -> Result<usize, MetadataStoreError> {
        let mut removed = 0;
        for backup_id in backup_ids {
            match fs::remove_file(self.record_path(backup_id)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::types::{BackupMetadata, BackupType, Component};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_file_store_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMetadataStore::new(dir.path().join("meta"));
        assert!(store.list(None).await.unwrap().is_empty());

        let mut metadata = BackupMetadata::begin("backup-1", BackupType::Full);
        metadata.components.insert(Component::Config, true);
        let record = BackupRecord {
            metadata,
            storage_provider_id: "local".into(),
            destination: Some("nightly".into()),
            labels: HashMap::from([("env".to_string(), "prod".to_string())]),
            error: None,
        };
        store.upsert(&record).await.unwrap();

        let reopened = FileMetadataStore::new(dir.path().join("meta"));
        assert_eq!(reopened.get("backup-1").await.unwrap(), Some(record));
        assert_eq!(reopened.list(None).await.unwrap().len(), 1);
        assert_eq!(reopened.delete(&["backup-1".to_string()]).await.unwrap(), 1);
        assert!(reopened.get("backup-1").await.unwrap().is_none());
    }
}
