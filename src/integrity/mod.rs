//! Integrity verification of stored backups.
//!
//! The verifier recomputes the checksum over the same artifact set the backup
//! orchestrator hashed (see [`crate::backup::artifacts`]) and cross-checks
//! artifact presence against the recorded component flags.

use crate::backup::artifacts::{
    belongs_to, bundle_name, compute_checksum, inspect_component, validate_backup_id, ArtifactError,
};
use crate::backup::types::{BackupRecord, BackupStatus};
use crate::codec::{MetadataMap, TaggedValue};
use crate::error::{BackupError, Result, Stage};
use crate::metadata::MetadataStore;
use crate::metrics::BackupMetrics;
use crate::storage::{artifact_path, StorageProvider, StorageProviderRegistry};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a verification run.
///
/// `is_valid` means the checksum matches and every expected artifact is
/// present. `passed` additionally requires that no unexpected artifact carries
/// the backup's prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub backup_id: String,
    pub passed: bool,
    pub is_valid: bool,
    pub details: Vec<String>,
    pub metadata: MetadataMap,
    pub expected_checksum: String,
    pub actual_checksum: String,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn checksum_matches(&self) -> bool {
        self.expected_checksum == self.actual_checksum
    }
}

pub struct IntegrityVerifier {
    metadata: Arc<dyn MetadataStore>,
    providers: Arc<StorageProviderRegistry>,
}

impl IntegrityVerifier {
    pub fn new(metadata: Arc<dyn MetadataStore>, providers: Arc<StorageProviderRegistry>) -> Self {
        Self { metadata, providers }
    }

    /// Verify a backup where its record says it lives.
    pub async fn verify_backup_integrity(&self, backup_id: &str) -> Result<IntegrityReport> {
        validate_backup_id(backup_id).map_err(|e| e.with_stage(Stage::Verify))?;

        let record = self
            .metadata
            .get(backup_id)
            .await
            .map_err(|e| BackupError::from(e).with_stage(Stage::Verify))?
            .ok_or_else(|| BackupError::not_found(backup_id).with_stage(Stage::Verify))?;

        let provider = self
            .providers
            .get(&record.storage_provider_id)
            .map_err(|e| e.with_stage(Stage::Verify))?;

        let report = verify_artifacts(&record, provider.as_ref(), record.destination.as_deref()).await?;
        info!(
            backup_id = %backup_id,
            passed = report.passed,
            is_valid = report.is_valid,
            "Integrity verification complete"
        );
        Ok(report)
    }
}

/// Verify `record` against the artifacts found at `destination` on `provider`.
pub async fn verify_artifacts(
    record: &BackupRecord,
    provider: &dyn StorageProvider,
    destination: Option<&str>,
) -> Result<IntegrityReport> {
    let backup_id = record.id();
    let mut details = Vec::new();
    let mut expected: Vec<String> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    let mut unreadable_manifest = false;

    if record.metadata.status != BackupStatus::Completed {
        details.push(format!("Backup status is {}", record.metadata.status.as_str()));
    }

    for component in record.metadata.included_components() {
        match inspect_component(provider, destination, backup_id, component).await {
            Ok(artifacts) => {
                for path in &artifacts.missing {
                    details.push(format!("Missing artifact {} ({})", path, component));
                }
                expected.extend(artifacts.paths);
                missing.extend(artifacts.missing);
            }
            Err(ArtifactError::InvalidManifest { path, source }) => {
                warn!(backup_id = %backup_id, path = %path, error = %source, "Unreadable manifest");
                details.push(format!("Unreadable manifest {}: {}", path, source));
                unreadable_manifest = true;
                expected.push(path);
            }
            Err(ArtifactError::Storage(e)) => {
                return Err(BackupError::from(e).with_component(component).with_stage(Stage::Verify));
            }
        }
    }

    let present: Vec<&String> = expected.iter().filter(|p| !missing.contains(p)).collect();
    let contents = try_join_all(present.iter().map(|path| provider.read_file(path)))
        .await
        .map_err(|e| BackupError::from(e).with_stage(Stage::Verify))?;

    let actual_checksum = compute_checksum(
        present
            .iter()
            .zip(&contents)
            .map(|(path, data)| (path.as_str(), data.as_slice())),
    );
    let checksum_match = actual_checksum == record.metadata.checksum;
    if !checksum_match {
        details.push(format!(
            "Checksum mismatch: expected {}, actual {}",
            record.metadata.checksum, actual_checksum
        ));
    }

    let known: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    let bundle = artifact_path(destination, &bundle_name(backup_id));
    let unexpected: Vec<String> = provider
        .list()
        .await
        .map_err(|e| BackupError::from(e).with_stage(Stage::Verify))?
        .into_iter()
        .filter(|p| belongs_to(p, destination, backup_id))
        .filter(|p| *p != bundle && !known.contains(p.as_str()))
        .collect();
    for path in &unexpected {
        details.push(format!("Unexpected artifact {}", path));
    }

    let is_valid = checksum_match
        && missing.is_empty()
        && !unreadable_manifest
        && record.metadata.status == BackupStatus::Completed;
    let passed = is_valid && unexpected.is_empty();
    let checked_at = Utc::now();

    let mut metadata = MetadataMap::new();
    metadata.insert("artifactCount".into(), TaggedValue::plain(present.len()));
    metadata.insert("bytesVerified".into(), TaggedValue::plain(contents.iter().map(Vec::len).sum::<usize>()));
    metadata.insert("checksumMatch".into(), TaggedValue::plain(checksum_match));
    metadata.insert("storageProviderId".into(), TaggedValue::plain(record.storage_provider_id.clone()));
    metadata.insert("checkedAt".into(), TaggedValue::from(checked_at));

    BackupMetrics::record_integrity_check(passed);

    Ok(IntegrityReport {
        backup_id: backup_id.to_string(),
        passed,
        is_valid,
        details,
        metadata,
        expected_checksum: record.metadata.checksum.clone(),
        actual_checksum,
        missing,
        unexpected,
        checked_at,
    })
}
