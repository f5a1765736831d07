// Backup System Types - Core data structures and enums

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// One data source that participates in backup and restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Graph store
    Falkordb,
    /// Vector store
    Qdrant,
    /// Relational store
    Postgres,
    /// Configuration snapshot
    Config,
}

impl Component {
    /// Restore order. Backups walk the same order.
    pub const ALL: [Component; 4] = [
        Component::Falkordb,
        Component::Qdrant,
        Component::Postgres,
        Component::Config,
    ];

    /// Data components toggled by `include_data`.
    pub const DATA: [Component; 3] = [Component::Falkordb, Component::Qdrant, Component::Postgres];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Falkordb => "falkordb",
            Component::Qdrant => "qdrant",
            Component::Postgres => "postgres",
            Component::Config => "config",
        }
    }

    /// File extension for the single-artifact form of this component.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            Component::Falkordb => "rdb",
            Component::Qdrant => "snapshot",
            Component::Postgres => "sql",
            Component::Config => "json",
        }
    }

    pub fn is_data(&self) -> bool {
        !matches!(self, Component::Config)
    }

    pub fn parse(name: &str) -> Option<Self> {
        Component::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    #[default]
    Full,
    Incremental,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupStatus::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    pub checksum: String,
    pub components: BTreeMap<Component, bool>,
    pub status: BackupStatus,
}

impl BackupMetadata {
    /// Fresh in-progress metadata; every component starts as not backed up.
    pub fn begin(id: impl Into<String>, backup_type: BackupType) -> Self {
        Self {
            id: id.into(),
            backup_type,
            timestamp: Utc::now(),
            size: 0,
            checksum: String::new(),
            components: Component::ALL.into_iter().map(|c| (c, false)).collect(),
            status: BackupStatus::InProgress,
        }
    }

    /// Applies the single allowed status transition. Returns false when the
    /// metadata already reached a terminal status.
    pub fn finalize(&mut self, status: BackupStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    pub fn included(&self, component: Component) -> bool {
        self.components.get(&component).copied().unwrap_or(false)
    }

    /// Components flagged as backed up, in restore order.
    pub fn included_components(&self) -> Vec<Component> {
        Component::ALL.into_iter().filter(|c| self.included(*c)).collect()
    }
}

/// Persisted backup row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub metadata: BackupMetadata,
    pub storage_provider_id: String,
    pub destination: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupRecord {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub backup_type: BackupType,
    pub include_data: bool,
    pub include_config: bool,
    pub compression: bool,
    pub destination: Option<String>,
    pub storage_provider_id: Option<String>,
    pub labels: HashMap<String, String>,
}

impl BackupOptions {
    pub fn new() -> Self {
        Self {
            backup_type: BackupType::Full,
            include_data: true,
            include_config: true,
            compression: false,
            destination: None,
            storage_provider_id: None,
            labels: HashMap::new(),
        }
    }

    pub fn backup_type(mut self, backup_type: BackupType) -> Self {
        self.backup_type = backup_type;
        self
    }

    pub fn include_data(mut self, include: bool) -> Self {
        self.include_data = include;
        self
    }

    pub fn include_config(mut self, include: bool) -> Self {
        self.include_config = include;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
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

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Components this request asks for, in backup order.
    pub fn requested_components(&self) -> Vec<Component> {
        Component::ALL
            .into_iter()
            .filter(|c| if c.is_data() { self.include_data } else { self.include_config })
            .collect()
    }
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackupFilter {
    pub backup_type: Option<BackupType>,
    pub status: Option<BackupStatus>,
    pub storage_provider_id: Option<String>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub labels: HashMap<String, String>,
    pub limit: Option<usize>,
}

impl BackupFilter {
    pub fn matches(&self, record: &BackupRecord) -> bool {
        if let Some(backup_type) = self.backup_type {
            if record.metadata.backup_type != backup_type {
                return false;
            }
        }

        if let Some(status) = self.status {
            if record.metadata.status != status {
                return false;
            }
        }

        if let Some(ref provider) = self.storage_provider_id {
            if &record.storage_provider_id != provider {
                return false;
            }
        }

        if let Some((start, end)) = self.date_range {
            if record.metadata.timestamp < start || record.metadata.timestamp > end {
                return false;
            }
        }

        self.labels
            .iter()
            .all(|(k, v)| record.labels.get(k).map(|value| value == v).unwrap_or(false))
    }
}

/// Sorts newest-first, breaking timestamp ties by id so ordering is stable.
pub fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| {
        b.metadata
            .timestamp
            .cmp(&a.metadata.timestamp)
            .then_with(|| b.metadata.id.cmp(&a.metadata.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_finalizes_once() {
        let mut metadata = BackupMetadata::begin("backup-1", BackupType::Full);
        assert_eq!(metadata.status, BackupStatus::InProgress);
        assert!(metadata.finalize(BackupStatus::Completed));
        assert!(!metadata.finalize(BackupStatus::Failed));
        assert_eq!(metadata.status, BackupStatus::Completed);
    }

    #[test]
    fn test_requested_components_follow_flags() {
        let options = BackupOptions::new().include_data(false);
        assert_eq!(options.requested_components(), vec![Component::Config]);

        let options = BackupOptions::new().include_config(false);
        assert_eq!(options.requested_components(), Component::DATA.to_vec());
    }

    #[test]
    fn test_component_serializes_lowercase() {
        let json = serde_json::to_string(&Component::Falkordb).unwrap();
        assert_eq!(json, "\"falkordb\"");
        assert_eq!(Component::parse("qdrant"), Some(Component::Qdrant));
        assert_eq!(Component::parse("mysql"), None);
    }
}
