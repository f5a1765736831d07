//! Crate-wide error value.
//!
//! Every failure surfaced by the engine is a [`BackupError`] carrying a stable,
//! machine-matchable [`ErrorCode`], the HTTP-style status derived from it, and
//! optional component / stage context plus the root cause.

use crate::backup::types::Component;
use serde::{Serialize, Serializer};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Boxed root cause attached to a [`BackupError`]
pub type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A required backend is unreachable
    DependencyUnavailable,
    /// Storage provider id or type is not known
    StorageProviderUnknown,
    /// A component export failed during backup
    BackupComponentFailed(Component),
    /// No backup record with the requested id
    BackupMetadataNotFound,
    /// Apply was requested without a token
    RestoreTokenRequired,
    /// Token unknown, already consumed, or issued for another backup
    RestoreTokenInvalid,
    /// Token past its expiry
    RestoreTokenExpired,
    /// Preview blocked the restore and no approval overrides it
    RestoreValidationFailed,
    /// Policy requires approval and none was recorded
    RestoreApprovalRequired,
    /// Integrity check failed at apply time
    RestoreIntegrityFailed,
    /// A component import failed during apply
    RestoreFailed,
    /// Storage provider I/O failure
    StorageIo,
    /// Streaming was requested from a provider that cannot stream
    StorageStreamingUnsupported,
    /// Metadata store failure
    MetadataStore,
    /// Invalid engine or provider configuration
    ConfigurationInvalid,
    /// Backup id is malformed
    InvalidBackupId,
}

impl ErrorCode {
    /// Wire name of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            ErrorCode::StorageProviderUnknown => "STORAGE_PROVIDER_UNKNOWN",
            ErrorCode::BackupComponentFailed(component) => match component {
                Component::Falkordb => "BACKUP_FALKORDB_FAILED",
                Component::Qdrant => "BACKUP_QDRANT_FAILED",
                Component::Postgres => "BACKUP_POSTGRES_FAILED",
                Component::Config => "BACKUP_CONFIG_FAILED",
            },
            ErrorCode::BackupMetadataNotFound => "BACKUP_METADATA_NOT_FOUND",
            ErrorCode::RestoreTokenRequired => "RESTORE_TOKEN_REQUIRED",
            ErrorCode::RestoreTokenInvalid => "RESTORE_TOKEN_INVALID",
            ErrorCode::RestoreTokenExpired => "RESTORE_TOKEN_EXPIRED",
            ErrorCode::RestoreValidationFailed => "RESTORE_VALIDATION_FAILED",
            ErrorCode::RestoreApprovalRequired => "RESTORE_APPROVAL_REQUIRED",
            ErrorCode::RestoreIntegrityFailed => "RESTORE_INTEGRITY_FAILED",
            ErrorCode::RestoreFailed => "RESTORE_FAILED",
            ErrorCode::StorageIo => "STORAGE_IO_ERROR",
            ErrorCode::StorageStreamingUnsupported => "STORAGE_STREAMING_UNSUPPORTED",
            ErrorCode::MetadataStore => "METADATA_STORE_ERROR",
            ErrorCode::ConfigurationInvalid => "CONFIGURATION_INVALID",
            ErrorCode::InvalidBackupId => "INVALID_BACKUP_ID",
        }
    }

    /// HTTP-style status associated with the code
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::DependencyUnavailable => 503,
            ErrorCode::StorageProviderUnknown => 400,
            ErrorCode::BackupComponentFailed(_) => 500,
            ErrorCode::BackupMetadataNotFound => 404,
            ErrorCode::RestoreTokenRequired => 400,
            ErrorCode::RestoreTokenInvalid => 404,
            ErrorCode::RestoreTokenExpired => 410,
            ErrorCode::RestoreValidationFailed => 409,
            ErrorCode::RestoreApprovalRequired => 403,
            ErrorCode::RestoreIntegrityFailed => 412,
            ErrorCode::RestoreFailed => 500,
            ErrorCode::StorageIo => 500,
            ErrorCode::StorageStreamingUnsupported => 501,
            ErrorCode::MetadataStore => 500,
            ErrorCode::ConfigurationInvalid => 400,
            ErrorCode::InvalidBackupId => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Phase of the engine in which an error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Backup creation
    Backup,
    /// Restore preview
    Preview,
    /// Restore approval
    Approval,
    /// Restore apply
    Apply,
    /// Integrity verification
    Verify,
    /// Retention enforcement
    Retention,
    /// Configuration / wiring
    Config,
}

/// Tagged error value returned by every engine operation
#[derive(Debug, Error)]
#[error("[{code}] {message}{}", cause_suffix(.cause))]
pub struct BackupError {
    code: ErrorCode,
    message: String,
    component: Option<Component>,
    stage: Option<Stage>,
    #[source]
    cause: Option<Cause>,
}

impl BackupError {
    /// Create an error with a code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            component: None,
            stage: None,
            cause: None,
        }
    }

    /// Attach the component the error relates to
    pub fn with_component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    /// Attach the stage the error was raised in
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attach the root cause
    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Shorthand for a missing backup record
    pub fn not_found(backup_id: &str) -> Self {
        Self::new(
            ErrorCode::BackupMetadataNotFound,
            format!("Backup {} not found", backup_id),
        )
    }

    /// Error code
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// HTTP-style status
    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Related component, if any
    pub fn component(&self) -> Option<Component> {
        self.component
    }

    /// Stage, if known
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Serializable view `{code, statusCode, component?, stage?, message, cause?}`
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "code": self.code,
            "statusCode": self.status_code(),
            "message": self.message,
        });
        if let Some(component) = self.component {
            value["component"] = serde_json::json!(component);
        }
        if let Some(stage) = self.stage {
            value["stage"] = serde_json::json!(stage);
        }
        if let Some(ref cause) = self.cause {
            value["cause"] = serde_json::json!(cause.to_string());
        }
        value
    }
}

fn cause_suffix(cause: &Option<Cause>) -> String {
    cause.as_ref().map(|c| format!(": {}", c)).unwrap_or_default()
}
