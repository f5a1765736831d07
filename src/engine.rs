//! Engine facade.
//!
//! [`BackupEngine`] wires the provider registry, metadata store, token store
//! and the backup / restore / integrity / retention services behind one
//! handle. Build it from an [`EngineConfig`] or from already constructed
//! parts.

use crate::backends::BackendSet;
use crate::backup::{validate_backup_id, BackupFilter, BackupMetadata, BackupOptions, BackupOrchestrator, BackupRecord};
use crate::config::{EngineConfig, MetadataStoreConfig, TokenStoreConfig};
use crate::error::{BackupError, ErrorCode, Result, Stage};
use crate::integrity::{IntegrityReport, IntegrityVerifier};
use crate::metadata::{FileMetadataStore, InMemoryMetadataStore, MetadataStore, PostgresMetadataStore};
use crate::restore::{
    InMemoryTokenStore, RedisTokenStore, RestoreAuditLog, RestoreOptions, RestoreOrchestrator, RestorePreviewToken,
    RestoreResult, RestoreTokenStore,
};
use crate::retention::{remove_listed_artifacts, RetentionEnforcer, RetentionReport};
use crate::storage::{ProviderFactoryRegistry, StorageProviderRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct BackupEngine {
    providers: Arc<StorageProviderRegistry>,
    metadata: Arc<dyn MetadataStore>,
    backups: BackupOrchestrator,
    restores: RestoreOrchestrator,
    verifier: IntegrityVerifier,
    retention: Arc<RetentionEnforcer>,
}

impl BackupEngine {
    /// Build an engine with the provider types compiled into this build.
    pub async fn from_config(config: &EngineConfig, backends: BackendSet) -> Result<Self> {
        Self::from_config_with_factories(config, backends, &ProviderFactoryRegistry::with_builtin()).await
    }

    /// Build an engine, resolving provider types through `factories`.
    pub async fn from_config_with_factories(
        config: &EngineConfig,
        backends: BackendSet,
        factories: &ProviderFactoryRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let providers = StorageProviderRegistry::from_configs(
            factories,
            &config.storage.providers,
            config.storage.default_provider.as_deref(),
        )
        .await?;

        let metadata: Arc<dyn MetadataStore> = match &config.metadata {
            MetadataStoreConfig::Memory => Arc::new(InMemoryMetadataStore::new()),
            MetadataStoreConfig::File { directory } => Arc::new(FileMetadataStore::new(directory.clone())),
            MetadataStoreConfig::Postgres(pg) => {
                let store = PostgresMetadataStore::new(pg.clone())
                    .await
                    .map_err(|e| BackupError::from(e).with_stage(Stage::Config))?;
                store
                    .initialize_schema()
                    .await
                    .map_err(|e| BackupError::from(e).with_stage(Stage::Config))?;
                Arc::new(store)
            }
        };

        let tokens: Arc<dyn RestoreTokenStore> = match &config.tokens {
            TokenStoreConfig::Memory => Arc::new(InMemoryTokenStore::new()),
            TokenStoreConfig::Redis(redis) => Arc::new(
                RedisTokenStore::new(redis.clone())
                    .await
                    .map_err(|e| BackupError::from(e).with_stage(Stage::Config))?,
            ),
        };

        info!(
            providers = ?providers.ids(),
            require_approval = config.restore.require_approval,
            "Backup engine configured"
        );

        Ok(Self::from_parts(config, Arc::new(providers), metadata, tokens, backends))
    }

    /// Assemble an engine from already constructed stores.
    pub fn from_parts(
        config: &EngineConfig,
        providers: Arc<StorageProviderRegistry>,
        metadata: Arc<dyn MetadataStore>,
        tokens: Arc<dyn RestoreTokenStore>,
        backends: BackendSet,
    ) -> Self {
        let retention = Arc::new(RetentionEnforcer::new(
            config.retention.clone(),
            metadata.clone(),
            providers.clone(),
        ));

        let backups = BackupOrchestrator::new(providers.clone(), backends.clone(), metadata.clone())
            .with_retention(retention.clone())
            .with_compression_level(config.compression_level);
        let restores = RestoreOrchestrator::new(
            metadata.clone(),
            providers.clone(),
            backends,
            tokens,
            config.restore.clone(),
        );
        let verifier = IntegrityVerifier::new(metadata.clone(), providers.clone());

        Self {
            providers,
            metadata,
            backups,
            restores,
            verifier,
            retention,
        }
    }

    pub fn providers(&self) -> &Arc<StorageProviderRegistry> {
        &self.providers
    }

    pub fn audit_log(&self) -> &RestoreAuditLog {
        self.restores.audit_log()
    }

    pub async fn create_backup(&self, options: BackupOptions) -> Result<BackupMetadata> {
        self.backups.create_backup(options).await
    }

    pub async fn restore_backup(&self, backup_id: &str, options: RestoreOptions) -> Result<RestoreResult> {
        self.restores.restore_backup(backup_id, options).await
    }

    pub async fn approve_restore(
        &self,
        token: &str,
        approved_by: &str,
        reason: Option<&str>,
    ) -> Result<RestorePreviewToken> {
        self.restores.approve_restore(token, approved_by, reason).await
    }

    pub async fn verify_backup_integrity(&self, backup_id: &str) -> Result<IntegrityReport> {
        self.verifier.verify_backup_integrity(backup_id).await
    }

    pub async fn enforce_retention_policy(&self) -> Result<RetentionReport> {
        self.retention.enforce_retention_policy().await
    }

    /// Start the periodic retention task. Abort the handle to stop it.
    pub fn spawn_retention_task(&self) -> JoinHandle<()> {
        self.retention.clone().spawn_periodic()
    }

    /// Backup records, newest first.
    pub async fn list_backups(&self, filter: Option<&BackupFilter>) -> Result<Vec<BackupRecord>> {
        self.metadata.list(filter).await.map_err(BackupError::from)
    }

    pub async fn get_backup(&self, backup_id: &str) -> Result<BackupRecord> {
        validate_backup_id(backup_id)?;
        self.metadata
            .get(backup_id)
            .await?
            .ok_or_else(|| BackupError::not_found(backup_id))
    }

    /// Remove a backup's artifacts, then its record.
    ///
    /// The record is kept when any artifact cannot be removed so the delete
    /// can be retried. Returns the number of artifacts removed.
    pub async fn delete_backup(&self, backup_id: &str) -> Result<usize> {
        let record = self.get_backup(backup_id).await?;
        let provider = self.providers.get(&record.storage_provider_id)?;
        let listing = provider.list().await?;

        let (removed, failures) = remove_listed_artifacts(provider.as_ref(), &listing, &record).await;
        if !failures.is_empty() {
            warn!(backup_id = %backup_id, failed = failures.len(), "Keeping backup record; artifact removal failed");
            return Err(BackupError::new(
                ErrorCode::StorageIo,
                format!("Failed to remove {} artifact(s): {}", failures.len(), failures.join("; ")),
            ));
        }

        self.metadata.delete(&[record.metadata.id.clone()]).await?;
        info!(backup_id = %backup_id, artifacts_removed = removed, "Backup deleted");
        Ok(removed)
    }
}
