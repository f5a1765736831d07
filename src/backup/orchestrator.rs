// Backup Orchestrator - exports every requested component, writes artifacts,
// computes size/checksum and persists the record

use super::artifacts::{bundle_name, compute_checksum, generate_backup_id, write_snapshot};
use super::compression::write_bundle;
use super::types::{BackupMetadata, BackupOptions, BackupRecord, BackupStatus, Component};
use crate::backends::BackendSet;
use crate::error::{BackupError, ErrorCode, Result, Stage};
use crate::metadata::MetadataStore;
use crate::metrics::BackupMetrics;
use crate::retention::RetentionEnforcer;
use crate::storage::{artifact_path, StorageProvider, StorageProviderRegistry};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct BackupOrchestrator {
    providers: Arc<StorageProviderRegistry>,
    backends: BackendSet,
    metadata: Arc<dyn MetadataStore>,
    retention: Option<Arc<RetentionEnforcer>>,
    compression_level: u32,
}

impl BackupOrchestrator {
    pub fn new(
        providers: Arc<StorageProviderRegistry>,
        backends: BackendSet,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            providers,
            backends,
            metadata,
            retention: None,
            compression_level: 6,
        }
    }

    pub fn with_retention(mut self, retention: Arc<RetentionEnforcer>) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Run one backup.
    ///
    /// Data component failures are recorded as `false` in the component map
    /// and the backup still completes. A config failure is fatal: the record
    /// is persisted as failed and the error is returned.
    pub async fn create_backup(&self, options: BackupOptions) -> Result<BackupMetadata> {
        let started = Instant::now();
        let (provider_id, provider) = self
            .providers
            .resolve(options.storage_provider_id.as_deref())
            .map_err(|e| e.with_stage(Stage::Backup))?;
        provider
            .ensure_ready()
            .await
            .map_err(|e| BackupError::from(e).with_stage(Stage::Backup))?;

        let backup_id = generate_backup_id();
        let destination = options.destination.clone();
        let mut record = BackupRecord {
            metadata: BackupMetadata::begin(&backup_id, options.backup_type),
            storage_provider_id: provider_id.clone(),
            destination: destination.clone(),
            labels: options.labels.clone(),
            error: None,
        };

        info!(
            backup_id = %backup_id,
            backup_type = options.backup_type.as_str(),
            provider_id = %provider_id,
            destination = ?destination,
            "Starting backup"
        );

        let requested = options.requested_components();
        let mut written: Vec<(String, Bytes)> = Vec::new();

        for component in requested.iter().copied().filter(Component::is_data) {
            match self
                .backup_component(&backup_id, component, provider.as_ref(), destination.as_deref())
                .await
            {
                Ok(artifacts) => {
                    record.metadata.components.insert(component, true);
                    written.extend(artifacts);
                }
                Err(e) => {
                    BackupMetrics::record_export_failure(component.as_str());
                    warn!(backup_id = %backup_id, component = %component, error = %e, "Component backup failed; continuing without it");
                }
            }
        }

        if requested.contains(&Component::Config) {
            match self
                .backup_component(&backup_id, Component::Config, provider.as_ref(), destination.as_deref())
                .await
            {
                Ok(artifacts) => {
                    record.metadata.components.insert(Component::Config, true);
                    written.extend(artifacts);
                }
                Err(e) => {
                    let err = e.with_stage(Stage::Backup);
                    self.fail(record, provider.as_ref(), &written, &err, started).await;
                    return Err(err);
                }
            }
        }

        if options.compression {
            self.compress(&backup_id, provider.as_ref(), destination.as_deref(), &written)
                .await;
        }

        record.metadata.size = written.iter().map(|(_, data)| data.len() as u64).sum();
        record.metadata.checksum = compute_checksum(
            written
                .iter()
                .map(|(path, data)| (path.as_str(), &data[..])),
        );
        record.metadata.finalize(BackupStatus::Completed);

        self.metadata
            .upsert(&record)
            .await
            .map_err(|e| BackupError::from(e).with_stage(Stage::Backup))?;

        BackupMetrics::record_backup(
            record.metadata.backup_type.as_str(),
            BackupStatus::Completed.as_str(),
            started.elapsed().as_secs_f64(),
        );
        info!(
            backup_id = %backup_id,
            size = record.metadata.size,
            checksum = %record.metadata.checksum,
            components = ?record.metadata.included_components(),
            "Backup completed"
        );

        if let Some(retention) = &self.retention {
            if let Err(e) = retention.enforce_retention_policy().await {
                error!(backup_id = %backup_id, error = %e, "Retention enforcement after backup failed");
            }
        }

        Ok(record.metadata)
    }

    /// Probe, export and persist one component.
    async fn backup_component(
        &self,
        backup_id: &str,
        component: Component,
        provider: &dyn StorageProvider,
        destination: Option<&str>,
    ) -> Result<Vec<(String, Bytes)>> {
        let Some(backend) = self.backends.get(component) else {
            return Err(component_error(component, ErrorCode::DependencyUnavailable, "backend is not registered"));
        };

        if !self.backends.is_ready(component).await {
            return Err(component_error(component, ErrorCode::DependencyUnavailable, "backend is not ready"));
        }

        debug!(backup_id = %backup_id, component = %component, "Exporting component snapshot");
        let snapshot = backend.export_snapshot().await.map_err(|e| {
            component_error(component, ErrorCode::BackupComponentFailed(component), "export failed").with_cause(e)
        })?;

        write_snapshot(provider, destination, backup_id, component, snapshot)
            .await
            .map_err(|e| {
                component_error(component, ErrorCode::BackupComponentFailed(component), "artifact write failed")
                    .with_cause(e)
            })
    }

    async fn compress(
        &self,
        backup_id: &str,
        provider: &dyn StorageProvider,
        destination: Option<&str>,
        written: &[(String, Bytes)],
    ) {
        if !provider.supports_streaming() {
            info!(backup_id = %backup_id, provider = provider.kind(), "Provider cannot stream; skipping compression");
            return;
        }

        let bundle = artifact_path(destination, &bundle_name(backup_id));
        let mut paths: Vec<String> = written.iter().map(|(path, _)| path.clone()).collect();
        paths.sort();

        match write_bundle(provider, &bundle, &paths, self.compression_level).await {
            Ok(size) => info!(backup_id = %backup_id, bundle = %bundle, size, "Wrote compressed bundle"),
            Err(e) => {
                warn!(backup_id = %backup_id, error = %e, "Compression failed; keeping uncompressed artifacts");
                if let Err(cleanup) = provider.remove_file(&bundle).await {
                    warn!(backup_id = %backup_id, error = %cleanup, "Failed to remove partial bundle");
                }
            }
        }
    }

    /// Persist the record as failed and drop the artifacts written so far.
    async fn fail(
        &self,
        mut record: BackupRecord,
        provider: &dyn StorageProvider,
        written: &[(String, Bytes)],
        err: &BackupError,
        started: Instant,
    ) {
        let backup_id = record.id().to_string();
        error!(backup_id = %backup_id, code = %err.code(), error = %err, "Backup failed");

        for (path, _) in written {
            if let Err(e) = provider.remove_file(path).await {
                warn!(backup_id = %backup_id, path = %path, error = %e, "Failed to remove artifact of failed backup");
            }
        }

        record.metadata.finalize(BackupStatus::Failed);
        record.error = Some(err.to_string());
        if let Err(e) = self.metadata.upsert(&record).await {
            error!(backup_id = %backup_id, error = %e, "Failed to persist failed backup record");
        }

        BackupMetrics::record_backup(
            record.metadata.backup_type.as_str(),
            BackupStatus::Failed.as_str(),
            started.elapsed().as_secs_f64(),
        );
    }
}

fn component_error(component: Component, code: ErrorCode, what: &str) -> BackupError {
    BackupError::new(code, format!("{} {}", component, what)).with_component(component)
}
