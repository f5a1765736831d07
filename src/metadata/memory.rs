use super::{apply_filter, MetadataStore, MetadataStoreError};
use crate::backup::types::{BackupFilter, BackupRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory metadata store
#[derive(Clone, Default)]
pub struct InMemoryMetadataStore {
    records: Arc<DashMap<String, BackupRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn upsert(&self, record: &BackupRecord) -> Result<(), MetadataStoreError> {
        self.records.insert(record.id().to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, backup_id: &str) -> Result<Option<BackupRecord>, MetadataStoreError> {
        Ok(self.records.get(backup_id).map(|entry| entry.value().clone()))
    }

    async fn list(&self, filter: Option<&BackupFilter>) -> Result<Vec<BackupRecord>, MetadataStoreError> {
        let records = self.records.iter().map(|entry| entry.value().clone()).collect();
        Ok(apply_filter(records, filter))
    }

    async fn delete(&self, backup_ids: &[String]) -> Result<usize, MetadataStoreError> {
        Ok(backup_ids
            .iter()
            .filter(|id| self.records.remove(id.as_str()).is_some())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::types::{BackupMetadata, BackupStatus, BackupType};
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn record(id: &str, age_hours: i64) -> BackupRecord {
        let mut metadata = BackupMetadata::begin(id, BackupType::Full);
        metadata.timestamp = Utc::now() - Duration::hours(age_hours);
        metadata.finalize(BackupStatus::Completed);
        BackupRecord {
            metadata,
            storage_provider_id: "local".into(),
            destination: None,
            labels: HashMap::new(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_upsert_replaces() {
        let store = InMemoryMetadataStore::new();
        store.upsert(&record("old", 10)).await.unwrap();
        store.upsert(&record("new", 1)).await.unwrap();
        store.upsert(&record("mid", 5)).await.unwrap();
        store.upsert(&record("mid", 5)).await.unwrap();

        let ids: Vec<String> = store
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.metadata.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let removed = store.delete(&["old".to_string(), "ghost".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_filter_by_label_and_limit() {
        let store = InMemoryMetadataStore::new();
        let mut labelled = record("a", 1);
        labelled.labels.insert("env".into(), "prod".into());
        store.upsert(&labelled).await.unwrap();
        store.upsert(&record("b", 2)).await.unwrap();

        let mut filter = BackupFilter::default();
        filter.labels.insert("env".into(), "prod".into());
        let found = store.list(Some(&filter)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.id, "a");

        let limited = store
            .list(Some(&BackupFilter { limit: Some(1), ..BackupFilter::default() }))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
