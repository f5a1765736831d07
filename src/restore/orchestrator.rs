// Restore Orchestrator - two-phase restore: preview -> token -> approval -> apply

use super::audit::{RestoreAuditEventType, RestoreAuditLog};
use super::token::{RestorePreviewToken, RestoreTokenStore, TokenLookup, TokenMetadata};
use super::validation::{can_proceed, validate_components, ComponentValidation, ValidationStatus};
use crate::backends::{BackendSet, ComponentSnapshot};
use crate::backup::artifacts::{inspect_component, load_snapshot, validate_backup_id, ArtifactError};
use crate::backup::types::{BackupRecord, BackupStatus, Component};
use crate::codec::{MetadataMap, TaggedValue};
use crate::error::{BackupError, ErrorCode, Result, Stage};
use crate::integrity::{verify_artifacts, IntegrityReport};
use crate::metadata::MetadataStore;
use crate::metrics::BackupMetrics;
use crate::storage::{StorageProvider, StorageProviderRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const DEFAULT_ACTOR: &str = "system";
const MAX_TOKEN_TTL_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorePolicyConfig {
    pub require_approval: bool,
    pub token_ttl_secs: u64,
}

impl RestorePolicyConfig {
    pub fn new() -> Self {
        Self {
            require_approval: true,
            token_ttl_secs: 900,
        }
    }

    pub fn with_require_approval(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    pub fn with_token_ttl_secs(mut self, secs: u64) -> Self {
        self.token_ttl_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(BackupError::new(
                ErrorCode::ConfigurationInvalid,
                format!("restore.token_ttl_secs must not exceed {}", MAX_TOKEN_TTL_SECS),
            )
            .with_stage(Stage::Config));
        }
        Ok(())
    }

    fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs.min(MAX_TOKEN_TTL_SECS) as i64)
    }
}

impl Default for RestorePolicyConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub dry_run: bool,
    pub restore_token: Option<String>,
    pub validate_integrity: bool,
    pub destination: Option<String>,
    pub storage_provider_id: Option<String>,
    pub requested_by: Option<String>,
}

impl RestoreOptions {
    /// Preview request
    pub fn preview() -> Self {
        Self::default()
    }

    /// Apply request for a previously issued token
    pub fn apply(token: impl Into<String>) -> Self {
        Self {
            restore_token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn validate_integrity(mut self, validate: bool) -> Self {
        self.validate_integrity = validate;
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn storage_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.storage_provider_id = Some(provider_id.into());
        self
    }

    pub fn requested_by(mut self, actor: impl Into<String>) -> Self {
        self.requested_by = Some(actor.into());
        self
    }

    /// No token, or an explicit dry run, means preview. A blank token still
    /// selects apply and is rejected there.
    pub fn mode(&self) -> RestoreMode {
        if self.dry_run || self.restore_token.is_none() {
            RestoreMode::Preview
        } else {
            RestoreMode::Apply
        }
    }

    fn actor(&self) -> &str {
        self.requested_by.as_deref().unwrap_or(DEFAULT_ACTOR)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    Preview,
    Apply,
}

impl RestoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreMode::Preview => "preview",
            RestoreMode::Apply => "apply",
        }
    }

    fn stage(&self) -> Stage {
        match self {
            RestoreMode::Preview => Stage::Preview,
            RestoreMode::Apply => Stage::Apply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    TokenIssued,
    ApprovalPending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub backup_id: String,
    pub mode: RestoreMode,
    pub state: RestoreState,
    /// Preview: `can_proceed`. Apply: every component was restored.
    pub success: bool,
    pub can_proceed: bool,
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub requires_approval: bool,
    pub validations: Vec<ComponentValidation>,
    pub integrity: Option<IntegrityReport>,
    pub restored_components: Vec<Component>,
    pub metadata: MetadataMap,
}

pub struct RestoreOrchestrator {
    metadata: Arc<dyn MetadataStore>,
    providers: Arc<StorageProviderRegistry>,
    backends: BackendSet,
    tokens: Arc<dyn RestoreTokenStore>,
    policy: RestorePolicyConfig,
    audit: RestoreAuditLog,
}

impl RestoreOrchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        providers: Arc<StorageProviderRegistry>,
        backends: BackendSet,
        tokens: Arc<dyn RestoreTokenStore>,
        policy: RestorePolicyConfig,
    ) -> Self {
        Self {
            metadata,
            providers,
            backends,
            tokens,
            policy,
            audit: RestoreAuditLog::new(),
        }
    }

    pub fn with_audit_log(mut self, audit: RestoreAuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit_log(&self) -> &RestoreAuditLog {
        &self.audit
    }

    pub fn policy(&self) -> &RestorePolicyConfig {
        &self.policy
    }

    pub async fn restore_backup(&self, backup_id: &str, options: RestoreOptions) -> Result<RestoreResult> {
        let mode = options.mode();
        let started = Instant::now();
        validate_backup_id(backup_id).map_err(|e| e.with_stage(mode.stage()))?;

        let outcome = match mode {
            RestoreMode::Preview => self.preview(backup_id, &options).await,
            RestoreMode::Apply => self.apply(backup_id, &options).await,
        };

        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(_) => BackupMetrics::record_restore(mode.as_str(), "ok", elapsed),
            Err(e) => {
                BackupMetrics::record_restore(mode.as_str(), e.code().as_str(), elapsed);
                error!(backup_id = %backup_id, mode = mode.as_str(), code = %e.code(), error = %e, "Restore request failed");
                if mode == RestoreMode::Apply {
                    let event = if e.code() == ErrorCode::RestoreFailed {
                        RestoreAuditEventType::ApplyFailed
                    } else {
                        RestoreAuditEventType::ApplyRejected
                    };
                    let mut details = HashMap::from([("code".to_string(), e.code().as_str().to_string())]);
                    if let Some(component) = e.component() {
                        details.insert("component".to_string(), component.to_string());
                    }
                    self.audit.record(event, options.actor(), backup_id, details).await;
                }
            }
        }

        outcome
    }

    /// Record approval on an issued, unexpired token. Does not re-run validation.
    pub async fn approve_restore(
        &self,
        token: &str,
        approved_by: &str,
        reason: Option<&str>,
    ) -> Result<RestorePreviewToken> {
        let lookup = self
            .tokens
            .approve(token, approved_by, reason)
            .await
            .map_err(|e| BackupError::from(e).with_stage(Stage::Approval))?;

        match lookup {
            TokenLookup::Found(approved) => {
                BackupMetrics::record_token_operation("approve", true);
                let mut details = HashMap::new();
                if let Some(reason) = reason {
                    details.insert("reason".to_string(), reason.to_string());
                }
                self.audit
                    .record(RestoreAuditEventType::Approved, approved_by, &approved.backup_id, details)
                    .await;
                Ok(approved)
            }
            TokenLookup::Expired(expired) => {
                BackupMetrics::record_token_operation("approve", false);
                warn!(backup_id = %expired.backup_id, "Approval attempted on expired restore token");
                Err(token_expired(&expired).with_stage(Stage::Approval))
            }
            TokenLookup::Missing => {
                BackupMetrics::record_token_operation("approve", false);
                Err(token_invalid("Restore token is unknown or already used").with_stage(Stage::Approval))
            }
        }
    }

    async fn load_record(&self, backup_id: &str, stage: Stage) -> Result<BackupRecord> {
        self.metadata
            .get(backup_id)
            .await
            .map_err(|e| BackupError::from(e).with_stage(stage))?
            .ok_or_else(|| BackupError::not_found(backup_id).with_stage(stage))
    }

    async fn preview(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreResult> {
        let record = self.load_record(backup_id, Stage::Preview).await?;

        let provider_id = options
            .storage_provider_id
            .clone()
            .unwrap_or_else(|| record.storage_provider_id.clone());
        let destination = options.destination.clone().or_else(|| record.destination.clone());
        let provider = self
            .providers
            .get(&provider_id)
            .map_err(|e| e.with_stage(Stage::Preview))?;

        info!(backup_id = %backup_id, provider_id = %provider_id, "Starting restore preview");

        let validations = match validate_components(&record, provider.as_ref(), destination.as_deref()).await {
            Ok(validations) => validations,
            Err(e) => {
                warn!(backup_id = %backup_id, error = %e, "Storage unreachable during restore preview");
                unreachable_validations(&record, &e.to_string())
            }
        };

        let mut extra = MetadataMap::new();
        let integrity = if options.validate_integrity {
            match verify_artifacts(&record, provider.as_ref(), destination.as_deref()).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(backup_id = %backup_id, error = %e, "Integrity check could not run during preview");
                    extra.insert("integrityError".into(), TaggedValue::plain(e.to_string()));
                    None
                }
            }
        } else {
            None
        };

        let integrity_passed = if options.validate_integrity {
            Some(integrity.as_ref().map(|r| r.is_valid).unwrap_or(false))
        } else {
            None
        };
        let proceed = can_proceed(&validations, integrity_passed);
        extra.insert("backupStatus".into(), TaggedValue::plain(record.metadata.status.as_str()));
        extra.insert("backupTimestamp".into(), TaggedValue::from(record.metadata.timestamp));

        let token = RestorePreviewToken::issue(
            backup_id,
            options.actor(),
            self.policy.token_ttl(),
            self.policy.require_approval,
            TokenMetadata {
                can_proceed: proceed,
                storage_provider_id: provider_id,
                destination,
                validations: validations.clone(),
                integrity: integrity.clone(),
                extra: extra.clone(),
            },
        );
        self.tokens
            .save(&token)
            .await
            .map_err(|e| BackupError::from(e).with_stage(Stage::Preview))?;
        BackupMetrics::record_token_operation("issue", true);

        self.audit
            .record(
                RestoreAuditEventType::PreviewIssued,
                options.actor(),
                backup_id,
                HashMap::from([("canProceed".to_string(), proceed.to_string())]),
            )
            .await;

        if !proceed {
            warn!(backup_id = %backup_id, "Restore preview is blocked; approval required to override");
        }

        Ok(RestoreResult {
            backup_id: backup_id.to_string(),
            mode: RestoreMode::Preview,
            state: if token.requires_approval {
                RestoreState::ApprovalPending
            } else {
                RestoreState::TokenIssued
            },
            success: proceed,
            can_proceed: proceed,
            token: Some(token.token),
            expires_at: Some(token.expires_at),
            requires_approval: token.requires_approval,
            validations,
            integrity,
            restored_components: Vec::new(),
            metadata: extra,
        })
    }

    async fn apply(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreResult> {
        let token_value = options
            .restore_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                BackupError::new(ErrorCode::RestoreTokenRequired, "Apply requires a restore token")
                    .with_stage(Stage::Apply)
            })?;

        let token = match self.lookup_token(token_value).await? {
            TokenLookup::Found(token) => token,
            TokenLookup::Expired(expired) => return Err(token_expired(&expired)),
            TokenLookup::Missing => return Err(token_invalid("Restore token is unknown or already used")),
        };

        if token.backup_id != backup_id {
            return Err(token_invalid(format!(
                "Restore token was issued for backup {}",
                token.backup_id
            )));
        }

        let record = self.load_record(backup_id, Stage::Apply).await?;

        // Approval cannot override an unfinished or failed backup
        if record.metadata.status != BackupStatus::Completed {
            return Err(BackupError::new(
                ErrorCode::RestoreValidationFailed,
                format!("Backup {} has status {}", backup_id, record.metadata.status.as_str()),
            )
            .with_stage(Stage::Apply));
        }

        if !token.metadata.can_proceed && !token.is_approved() {
            return Err(BackupError::new(
                ErrorCode::RestoreValidationFailed,
                "Restore preview was blocked and no approval overrides it",
            )
            .with_stage(Stage::Apply));
        }

        if token.requires_approval && !token.is_approved() {
            return Err(BackupError::new(
                ErrorCode::RestoreApprovalRequired,
                "Restore requires approval before apply",
            )
            .with_stage(Stage::Apply));
        }

        let provider = self
            .providers
            .get(&token.metadata.storage_provider_id)
            .map_err(|e| e.with_stage(Stage::Apply))?;
        let destination = token.metadata.destination.as_deref();

        let integrity = if options.validate_integrity {
            let report = verify_artifacts(&record, provider.as_ref(), destination)
                .await
                .map_err(|e| {
                    BackupError::new(ErrorCode::RestoreIntegrityFailed, "Integrity check could not run")
                        .with_stage(Stage::Apply)
                        .with_cause(e)
                })?;
            if !report.is_valid {
                return Err(BackupError::new(
                    ErrorCode::RestoreIntegrityFailed,
                    format!("Integrity check failed: {}", report.details.join("; ")),
                )
                .with_stage(Stage::Apply));
            }
            Some(report)
        } else {
            None
        };

        let components = record.metadata.included_components();
        for component in &components {
            if !self.backends.is_ready(*component).await {
                return Err(BackupError::new(
                    ErrorCode::DependencyUnavailable,
                    format!("{} backend is not ready", component),
                )
                .with_component(*component)
                .with_stage(Stage::Apply));
            }
        }

        let snapshots = self
            .load_snapshots(&record, provider.as_ref(), destination, &components)
            .await?;

        // Consume the token; only one concurrent apply gets past this point.
        let token = match self.take_token(token_value).await? {
            TokenLookup::Found(token) => token,
            TokenLookup::Expired(expired) => return Err(token_expired(&expired)),
            TokenLookup::Missing => return Err(token_invalid("Restore token was consumed concurrently")),
        };

        info!(backup_id = %backup_id, components = components.len(), "Applying restore");
        let mut restored = Vec::with_capacity(snapshots.len());
        for (component, snapshot) in snapshots {
            let Some(backend) = self.backends.get(component) else {
                self.reinstate_token(token).await;
                return Err(BackupError::new(
                    ErrorCode::DependencyUnavailable,
                    format!("{} backend is not registered", component),
                )
                .with_component(component)
                .with_stage(Stage::Apply));
            };

            debug!(backup_id = %backup_id, component = %component, "Importing component snapshot");
            if let Err(e) = backend.import_snapshot(snapshot).await {
                error!(backup_id = %backup_id, component = %component, error = %e, "Component import failed; aborting restore");
                self.reinstate_token(token).await;
                return Err(BackupError::new(
                    ErrorCode::RestoreFailed,
                    format!("Restore of {} failed", component),
                )
                .with_component(component)
                .with_stage(Stage::Apply)
                .with_cause(e));
            }
            restored.push(component);
        }

        BackupMetrics::record_token_operation("consume", true);
        let mut details = HashMap::from([("components".to_string(), restored.len().to_string())]);
        if let Some(approver) = &token.approved_by {
            details.insert("approvedBy".to_string(), approver.clone());
        }
        self.audit
            .record(RestoreAuditEventType::ApplyCompleted, options.actor(), backup_id, details)
            .await;
        info!(backup_id = %backup_id, "Restore completed");

        let mut metadata = MetadataMap::new();
        metadata.insert("completedAt".into(), TaggedValue::from(Utc::now()));
        metadata.insert(
            "storageProviderId".into(),
            TaggedValue::plain(token.metadata.storage_provider_id.clone()),
        );

        Ok(RestoreResult {
            backup_id: backup_id.to_string(),
            mode: RestoreMode::Apply,
            state: RestoreState::Completed,
            success: true,
            can_proceed: token.metadata.can_proceed,
            token: None,
            expires_at: None,
            requires_approval: token.requires_approval,
            validations: token.metadata.validations,
            integrity,
            restored_components: restored,
            metadata,
        })
    }

    async fn lookup_token(&self, token: &str) -> Result<TokenLookup> {
        Ok(self.tokens.get(token).await?)
    }

    async fn take_token(&self, token: &str) -> Result<TokenLookup> {
        Ok(self.tokens.take(token).await?)
    }

    async fn reinstate_token(&self, token: RestorePreviewToken) {
        let backup_id = token.backup_id.clone();
        match self.tokens.reinstate(token).await {
            Ok(true) => debug!(backup_id = %backup_id, "Restore token reinstated after failed apply"),
            Ok(false) => debug!(backup_id = %backup_id, "Restore token expired before it could be reinstated"),
            Err(e) => error!(backup_id = %backup_id, error = %e, "Failed to reinstate restore token"),
        }
    }

    /// Read every component's artifacts before any backend is touched.
    async fn load_snapshots(
        &self,
        record: &BackupRecord,
        provider: &dyn StorageProvider,
        destination: Option<&str>,
        components: &[Component],
    ) -> Result<Vec<(Component, ComponentSnapshot)>> {
        let mut snapshots = Vec::with_capacity(components.len());
        for component in components {
            let loaded = match inspect_component(provider, destination, record.id(), *component).await {
                Ok(artifacts) if artifacts.is_complete() => load_snapshot(provider, destination, &artifacts)
                    .await
                    .map_err(ArtifactError::from),
                Ok(artifacts) => Err(ArtifactError::Storage(crate::storage::StorageError::NotFound(
                    artifacts.missing.join(", "),
                ))),
                Err(e) => Err(e),
            };

            match loaded {
                Ok(snapshot) => snapshots.push((*component, snapshot)),
                Err(e) => {
                    return Err(BackupError::new(
                        ErrorCode::RestoreFailed,
                        format!("Artifacts for {} cannot be loaded", component),
                    )
                    .with_component(*component)
                    .with_stage(Stage::Apply)
                    .with_cause(e));
                }
            }
        }
        Ok(snapshots)
    }
}

fn token_invalid(message: impl Into<String>) -> BackupError {
    BackupError::new(ErrorCode::RestoreTokenInvalid, message).with_stage(Stage::Apply)
}

fn token_expired(token: &RestorePreviewToken) -> BackupError {
    BackupError::new(
        ErrorCode::RestoreTokenExpired,
        format!("Restore token expired at {}", token.expires_at.to_rfc3339()),
    )
    .with_stage(Stage::Apply)
}

fn unreachable_validations(record: &BackupRecord, reason: &str) -> Vec<ComponentValidation> {
    Component::ALL
        .into_iter()
        .map(|component| {
            let included = record.metadata.included(component);
            ComponentValidation {
                component,
                status: if included {
                    ValidationStatus::Invalid
                } else {
                    ValidationStatus::Warning
                },
                details: if included {
                    format!("Storage unreachable: {}", reason)
                } else {
                    "Component not included in backup".to_string()
                },
                metadata: MetadataMap::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_is_derived_from_inputs() {
        assert_eq!(RestoreOptions::preview().mode(), RestoreMode::Preview);
        assert_eq!(RestoreOptions::apply("t").mode(), RestoreMode::Apply);
        assert_eq!(RestoreOptions::apply("t").dry_run(true).mode(), RestoreMode::Preview);
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RestorePolicyConfig::default();
        assert!(policy.require_approval);
        assert_eq!(policy.token_ttl(), chrono::Duration::minutes(15));
    }
}
