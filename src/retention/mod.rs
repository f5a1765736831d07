//! Retention policy enforcement.
//!
//! Three rules run in a fixed order, each over the records the previous rules
//! left unmarked: age, then count, then total size. Records are always walked
//! newest-first.

use crate::backup::artifacts::belongs_to;
use crate::backup::types::{sort_newest_first, BackupRecord};
use crate::error::{BackupError, ErrorCode, Result, Stage};
use crate::metadata::MetadataStore;
use crate::metrics::BackupMetrics;
use crate::storage::{StorageProvider, StorageProviderRegistry};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicyConfig {
    pub max_age_days: Option<u32>,
    pub max_entries: Option<usize>,
    pub max_total_size_bytes: Option<u64>,
    pub delete_artifacts: bool,
    /// Period of the background task started by [`RetentionEnforcer::spawn_periodic`]
    pub cleanup_interval_secs: u64,
}

impl RetentionPolicyConfig {
    pub fn new() -> Self {
        Self {
            max_age_days: None,
            max_entries: None,
            max_total_size_bytes: None,
            delete_artifacts: true,
            cleanup_interval_secs: 3600,
        }
    }

    pub fn max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = Some(days);
        self
    }

    pub fn max_entries(mut self, count: usize) -> Self {
        self.max_entries = Some(count);
        self
    }

    pub fn max_total_size_bytes(mut self, bytes: u64) -> Self {
        self.max_total_size_bytes = Some(bytes);
        self
    }

    pub fn delete_artifacts(mut self, enabled: bool) -> Self {
        self.delete_artifacts = enabled;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = interval.as_secs().max(1);
        self
    }

    /// No rule configured; enforcement is a no-op.
    pub fn is_unbounded(&self) -> bool {
        self.max_age_days.is_none() && self.max_entries.is_none() && self.max_total_size_bytes.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == Some(0) {
            return Err(BackupError::new(
                ErrorCode::ConfigurationInvalid,
                "retention.max_entries must be at least 1",
            )
            .with_stage(Stage::Config));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(BackupError::new(
                ErrorCode::ConfigurationInvalid,
                "retention.cleanup_interval_secs must be positive",
            )
            .with_stage(Stage::Config));
        }
        Ok(())
    }
}

impl Default for RetentionPolicyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The rule that marked a record for deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionRule {
    Age,
    Count,
    Size,
}

impl RetentionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionRule::Age => "age",
            RetentionRule::Count => "count",
            RetentionRule::Size => "size",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionDeletion {
    pub backup_id: String,
    pub rule: RetentionRule,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionReport {
    pub evaluated: usize,
    pub retained: usize,
    pub deleted: Vec<RetentionDeletion>,
    pub artifacts_removed: usize,
    /// Artifact removals that failed; metadata was still deleted
    pub artifact_failures: Vec<String>,
}

/// Mark records for deletion. `records` may be in any order; the result is
/// newest-first.
pub fn select_for_deletion(
    policy: &RetentionPolicyConfig,
    records: &[BackupRecord],
    now: DateTime<Utc>,
) -> Vec<RetentionDeletion> {
    let mut ordered = records.to_vec();
    sort_newest_first(&mut ordered);
    let mut marks: Vec<Option<RetentionRule>> = vec![None; ordered.len()];

    if let Some(days) = policy.max_age_days {
        let cutoff = now - ChronoDuration::days(i64::from(days));
        for (mark, record) in marks.iter_mut().zip(&ordered) {
            if record.metadata.timestamp < cutoff {
                *mark = Some(RetentionRule::Age);
            }
        }
    }

    if let Some(max_entries) = policy.max_entries {
        let mut kept = 0;
        for mark in marks.iter_mut().filter(|m| m.is_none()) {
            if kept < max_entries {
                kept += 1;
            } else {
                *mark = Some(RetentionRule::Count);
            }
        }
    }

    if let Some(budget) = policy.max_total_size_bytes {
        let mut total: u64 = 0;
        let mut over_budget = false;
        for (mark, record) in marks.iter_mut().zip(&ordered) {
            if mark.is_some() {
                continue;
            }
            if !over_budget && total.saturating_add(record.metadata.size) > budget {
                over_budget = true;
            }
            if over_budget {
                *mark = Some(RetentionRule::Size);
            } else {
                total += record.metadata.size;
            }
        }
    }

    ordered
        .iter()
        .zip(marks)
        .filter_map(|(record, mark)| {
            mark.map(|rule| RetentionDeletion {
                backup_id: record.metadata.id.clone(),
                rule,
            })
        })
        .collect()
}

/// Remove every path in `listing` that belongs to `record`. Returns the
/// number removed and one entry per failed removal.
pub(crate) async fn remove_listed_artifacts(
    provider: &dyn StorageProvider,
    listing: &[String],
    record: &BackupRecord,
) -> (usize, Vec<String>) {
    let backup_id = record.id();
    let mut removed = 0;
    let mut failures = Vec::new();

    for path in listing
        .iter()
        .filter(|p| belongs_to(p, record.destination.as_deref(), backup_id))
    {
        match provider.remove_file(path).await {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(backup_id = %backup_id, path = %path, error = %e, "Failed to remove artifact");
                failures.push(format!("{}: {}", path, e));
            }
        }
    }

    (removed, failures)
}

pub struct RetentionEnforcer {
    policy: RetentionPolicyConfig,
    metadata: Arc<dyn MetadataStore>,
    providers: Arc<StorageProviderRegistry>,
}

impl RetentionEnforcer {
    pub fn new(
        policy: RetentionPolicyConfig,
        metadata: Arc<dyn MetadataStore>,
        providers: Arc<StorageProviderRegistry>,
    ) -> Self {
        Self {
            policy,
            metadata,
            providers,
        }
    }

    pub fn policy(&self) -> &RetentionPolicyConfig {
        &self.policy
    }

    pub async fn enforce_retention_policy(&self) -> Result<RetentionReport> {
        let records = self
            .metadata
            .list(None)
            .await
            .map_err(|e| BackupError::from(e).with_stage(Stage::Retention))?;

        let deletions = select_for_deletion(&self.policy, &records, Utc::now());
        let mut report = RetentionReport {
            evaluated: records.len(),
            retained: records.len() - deletions.len(),
            ..RetentionReport::default()
        };

        if deletions.is_empty() {
            debug!(evaluated = records.len(), "Retention found nothing to delete");
            return Ok(report);
        }

        if self.policy.delete_artifacts {
            let by_id: HashMap<&str, &BackupRecord> = records.iter().map(|r| (r.id(), r)).collect();
            let mut listings: HashMap<String, Vec<String>> = HashMap::new();

            for deletion in &deletions {
                if let Some(record) = by_id.get(deletion.backup_id.as_str()) {
                    self.remove_artifacts(record, &mut listings, &mut report).await;
                }
            }
        }

        let ids: Vec<String> = deletions.iter().map(|d| d.backup_id.clone()).collect();
        self.metadata
            .delete(&ids)
            .await
            .map_err(|e| BackupError::from(e).with_stage(Stage::Retention))?;

        for deletion in &deletions {
            BackupMetrics::record_retention_deletion(deletion.rule.as_str());
            info!(backup_id = %deletion.backup_id, rule = deletion.rule.as_str(), "Backup removed by retention policy");
        }

        report.deleted = deletions;
        Ok(report)
    }

    async fn remove_artifacts(
        &self,
        record: &BackupRecord,
        listings: &mut HashMap<String, Vec<String>>,
        report: &mut RetentionReport,
    ) {
        let backup_id = record.id();
        let provider = match self.providers.get(&record.storage_provider_id) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(backup_id = %backup_id, provider_id = %record.storage_provider_id, error = %e, "Cannot remove artifacts");
                report.artifact_failures.push(format!("{}: {}", backup_id, e));
                return;
            }
        };

        if !listings.contains_key(&record.storage_provider_id) {
            match provider.list().await {
                Ok(paths) => {
                    listings.insert(record.storage_provider_id.clone(), paths);
                }
                Err(e) => {
                    warn!(backup_id = %backup_id, provider_id = %record.storage_provider_id, error = %e, "Failed to list artifacts");
                    report.artifact_failures.push(format!("{}: {}", backup_id, e));
                    return;
                }
            }
        }

        if let Some(listing) = listings.get(&record.storage_provider_id) {
            let (removed, failures) = remove_listed_artifacts(provider.as_ref(), listing, record).await;
            report.artifacts_removed += removed;
            report.artifact_failures.extend(failures);
        }
    }

    /// Run enforcement every `cleanup_interval_secs` until the handle is aborted.
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.policy.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match self.enforce_retention_policy().await {
                    Ok(report) if !report.deleted.is_empty() => {
                        info!(deleted = report.deleted.len(), retained = report.retained, "Periodic retention run complete");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Periodic retention run failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::types::{BackupMetadata, BackupStatus, BackupType};
    use crate::metadata::InMemoryMetadataStore;
    use crate::storage::{MemoryStorageProvider, StorageProvider};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn record(id: &str, age: ChronoDuration, size: u64) -> BackupRecord {
        let mut metadata = BackupMetadata::begin(id, BackupType::Full);
        metadata.timestamp = Utc::now() - age;
        metadata.size = size;
        metadata.finalize(BackupStatus::Completed);
        BackupRecord {
            metadata,
            storage_provider_id: "mem".into(),
            destination: None,
            labels: HashMap::new(),
            error: None,
        }
    }

    fn ids(deletions: &[RetentionDeletion]) -> Vec<&str> {
        deletions.iter().map(|d| d.backup_id.as_str()).collect()
    }

    #[test]
    fn test_rules_compose_over_remaining_records() {
        let records = vec![
            record("b1", ChronoDuration::days(1), 10),
            record("b2", ChronoDuration::days(2), 50),
            record("b3", ChronoDuration::days(3), 10),
            record("b4", ChronoDuration::days(40), 10),
            record("b5", ChronoDuration::days(4), 10),
        ];
        let policy = RetentionPolicyConfig::new()
            .max_age_days(30)
            .max_entries(3)
            .max_total_size_bytes(65);

        let deletions = select_for_deletion(&policy, &records, Utc::now());
        assert_eq!(
            deletions,
            vec![
                RetentionDeletion { backup_id: "b3".into(), rule: RetentionRule::Size },
                RetentionDeletion { backup_id: "b5".into(), rule: RetentionRule::Count },
                RetentionDeletion { backup_id: "b4".into(), rule: RetentionRule::Age },
            ]
        );
    }

    #[test]
    fn test_size_rule_marks_everything_colder_than_the_overflow() {
        let records = vec![
            record("b1", ChronoDuration::hours(1), 40),
            record("b2", ChronoDuration::hours(2), 40),
            record("b3", ChronoDuration::hours(3), 1),
        ];
        let policy = RetentionPolicyConfig::new().max_total_size_bytes(60);
        let deletions = select_for_deletion(&policy, &records, Utc::now());
        assert_eq!(ids(&deletions), vec!["b2", "b3"]);
    }

    #[test]
    fn test_unbounded_policy_deletes_nothing() {
        let records = vec![record("b1", ChronoDuration::days(400), 1 << 40)];
        let policy = RetentionPolicyConfig::new();
        assert!(policy.is_unbounded());
        assert!(select_for_deletion(&policy, &records, Utc::now()).is_empty());
    }

    #[test]
    fn test_zero_max_entries_is_rejected() {
        let err = RetentionPolicyConfig::new().max_entries(0).validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationInvalid);
    }

    #[tokio::test]
    async fn test_enforcer_removes_artifacts_then_metadata() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let provider = Arc::new(MemoryStorageProvider::new());
        let providers = Arc::new(StorageProviderRegistry::new());
        providers.register("mem", provider.clone());

        store.upsert(&record("old", ChronoDuration::days(40), 3)).await.unwrap();
        store.upsert(&record("new", ChronoDuration::days(1), 3)).await.unwrap();
        provider.write_file("old_config.json", b"{}").await.unwrap();
        provider.write_file("old_postgres.sql", b"x").await.unwrap();
        provider.write_file("new_config.json", b"{}").await.unwrap();

        let enforcer = RetentionEnforcer::new(
            RetentionPolicyConfig::new().max_age_days(30),
            store.clone(),
            providers,
        );
        let report = enforcer.enforce_retention_policy().await.unwrap();

        assert_eq!(ids(&report.deleted), vec!["old"]);
        assert_eq!(report.artifacts_removed, 2);
        assert_eq!(report.retained, 1);
        assert_eq!(provider.list().await.unwrap(), vec!["new_config.json".to_string()]);
        assert!(store.get("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_provider_does_not_block_metadata_cleanup() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut orphan = record("orphan", ChronoDuration::days(90), 1);
        orphan.storage_provider_id = "gone".into();
        store.upsert(&orphan).await.unwrap();

        let enforcer = RetentionEnforcer::new(
            RetentionPolicyConfig::new().max_age_days(30),
            store.clone(),
            Arc::new(StorageProviderRegistry::new()),
        );
        let report = enforcer.enforce_retention_policy().await.unwrap();

        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.artifact_failures.len(), 1);
        assert!(store.is_empty());
    }

    proptest! {
        #[test]
        fn prop_kept_records_respect_every_rule(
            entries in prop::collection::vec((0i64..100, 0u64..1_000), 0..30),
            max_age in proptest::option::of(1u32..60),
            max_entries in proptest::option::of(1usize..10),
            budget in proptest::option::of(0u64..5_000),
        ) {
            let now = Utc::now();
            let records: Vec<BackupRecord> = entries
                .iter()
                .enumerate()
                .map(|(i, (days, size))| {
                    let mut r = record(&format!("b{}", i), ChronoDuration::zero(), *size);
                    r.metadata.timestamp = now - ChronoDuration::days(*days) - ChronoDuration::seconds(i as i64);
                    r
                })
                .collect();

            let mut policy = RetentionPolicyConfig::new();
            policy.max_age_days = max_age;
            policy.max_entries = max_entries;
            policy.max_total_size_bytes = budget;

            let deleted: Vec<String> = select_for_deletion(&policy, &records, now)
                .into_iter()
                .map(|d| d.backup_id)
                .collect();
            let kept: Vec<&BackupRecord> = records
                .iter()
                .filter(|r| !deleted.contains(&r.metadata.id))
                .collect();

            if let Some(limit) = max_entries {
                prop_assert!(kept.len() <= limit);
            }
            if let Some(days) = max_age {
                let cutoff = now - ChronoDuration::days(i64::from(days));
                prop_assert!(kept.iter().all(|r| r.metadata.timestamp >= cutoff));
            }
            if let Some(budget) = budget {
                prop_assert!(kept.iter().map(|r| r.metadata.size).sum::<u64>() <= budget);
            }
        }
    }
}
