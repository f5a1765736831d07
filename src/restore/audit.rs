//! Audit trail for restore activity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreAuditEventType {
    PreviewIssued,
    Approved,
    ApplyCompleted,
    ApplyRejected,
    ApplyFailed,
}

impl RestoreAuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreAuditEventType::PreviewIssued => "preview_issued",
            RestoreAuditEventType::Approved => "approved",
            RestoreAuditEventType::ApplyCompleted => "apply_completed",
            RestoreAuditEventType::ApplyRejected => "apply_rejected",
            RestoreAuditEventType::ApplyFailed => "apply_failed",
        }
    }
}

/// Audit event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreAuditEvent {
    pub event_type: RestoreAuditEventType,

    /// Who requested, approved or applied
    pub actor: String,

    pub backup_id: String,

    pub timestamp: DateTime<Utc>,

    /// Additional event metadata (error code, reason, ...)
    pub metadata: HashMap<String, String>,
}

/// In-process audit log, mirrored to tracing
#[derive(Clone, Default)]
pub struct RestoreAuditLog {
    events: Arc<RwLock<Vec<RestoreAuditEvent>>>,
}

impl RestoreAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(
        &self,
        event_type: RestoreAuditEventType,
        actor: impl Into<String>,
        backup_id: impl Into<String>,
        metadata: HashMap<String, String>,
    ) {
        let event = RestoreAuditEvent {
            event_type,
            actor: actor.into(),
            backup_id: backup_id.into(),
            timestamp: Utc::now(),
            metadata,
        };

        info!(
            event = event.event_type.as_str(),
            actor = %event.actor,
            backup_id = %event.backup_id,
            "Restore audit event"
        );

        self.events.write().await.push(event);
    }

    pub async fn events(&self) -> Vec<RestoreAuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for_backup(&self, backup_id: &str) -> Vec<RestoreAuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.backup_id == backup_id)
            .cloned()
            .collect()
    }

    /// Clear all events (for testing)
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}
