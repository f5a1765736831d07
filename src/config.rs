//! Engine configuration.
//!
//! Every section carries serde defaults, so a partial JSON document (or `{}`)
//! yields a working single-node setup: one `local` provider under
//! `./backups`, in-memory metadata and token stores, approval required.

use crate::error::{BackupError, ErrorCode, Result, Stage};
use crate::metadata::PostgresConfig;
use crate::restore::{RedisTokenStoreConfig, RestorePolicyConfig};
use crate::retention::RetentionPolicyConfig;
use crate::storage::StorageProviderConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for BackupError {
    fn from(err: ConfigError) -> Self {
        BackupError::new(ErrorCode::ConfigurationInvalid, "Engine configuration is invalid")
            .with_stage(Stage::Config)
            .with_cause(err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Provider used when a request names none. Falls back to the first
    /// `local` provider, then to the first configured one. "First" is by
    /// provider id in ascending order, not document order.
    pub default_provider: Option<String>,
    pub providers: BTreeMap<String, StorageProviderConfig>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            default_provider: None,
            providers: BTreeMap::from([("local".to_string(), StorageProviderConfig::local("./backups"))]),
        }
    }
}

/// Where backup records live
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataStoreConfig {
    #[default]
    Memory,
    File { directory: PathBuf },
    Postgres(PostgresConfig),
}

/// Where restore tokens live. Multi-instance deployments need `redis`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenStoreConfig {
    #[default]
    Memory,
    Redis(RedisTokenStoreConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageSettings,
    pub metadata: MetadataStoreConfig,
    pub tokens: TokenStoreConfig,
    pub restore: RestorePolicyConfig,
    pub retention: RetentionPolicyConfig,
    /// gzip level (0-9) for backup bundles
    pub compression_level: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageSettings::default(),
            metadata: MetadataStoreConfig::default(),
            tokens: TokenStoreConfig::default(),
            restore: RestorePolicyConfig::default(),
            retention: RetentionPolicyConfig::default(),
            compression_level: 6,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Replace the provider table with a single provider.
    pub fn with_provider(mut self, id: impl Into<String>, provider: StorageProviderConfig) -> Self {
        let id = id.into();
        self.storage.providers = BTreeMap::from([(id.clone(), provider)]);
        self.storage.default_provider = Some(id);
        self
    }

    /// Add a provider alongside the existing ones.
    pub fn add_provider(mut self, id: impl Into<String>, provider: StorageProviderConfig) -> Self {
        self.storage.providers.insert(id.into(), provider);
        self
    }

    pub fn with_default_provider(mut self, id: impl Into<String>) -> Self {
        self.storage.default_provider = Some(id.into());
        self
    }

    pub fn with_metadata_store(mut self, metadata: MetadataStoreConfig) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_token_store(mut self, tokens: TokenStoreConfig) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_restore_policy(mut self, restore: RestorePolicyConfig) -> Self {
        self.restore = restore;
        self
    }

    pub fn with_retention_policy(mut self, retention: RetentionPolicyConfig) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.providers.is_empty() {
            return Err(ConfigError::Invalid("at least one storage provider must be configured".into()).into());
        }
        if let Some(default_id) = &self.storage.default_provider {
            if !self.storage.providers.contains_key(default_id) {
                return Err(ConfigError::Invalid(format!(
                    "default storage provider '{}' is not configured",
                    default_id
                ))
                .into());
            }
        }
        if self.compression_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            ))
            .into());
        }
        self.restore.validate()?;
        self.retention.validate()?;
        Ok(())
    }
}
