//! Provider construction keyed by type name.
//!
//! Each provider type registers a constructor; building an unknown type is a
//! `STORAGE_PROVIDER_UNKNOWN` configuration error. New provider types are added
//! by registering another constructor.

use super::local::{LocalConfig, LocalStorageProvider};
use super::memory::MemoryStorageProvider;
use super::StorageProvider;
use crate::error::{BackupError, ErrorCode, Result, Stage};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Typed provider configuration: a `type` tag plus type-specific options.
///
/// ```json
/// { "type": "local", "base_path": "/var/backups" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl StorageProviderConfig {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            options: serde_json::Map::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn local(base_path: impl Into<String>) -> Self {
        Self::new("local").option("base_path", base_path.into())
    }

    /// Deserialize the type-specific options into a provider's config struct.
    pub fn parse_options<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(serde_json::Value::Object(self.options.clone())).map_err(|e| {
            BackupError::new(
                ErrorCode::ConfigurationInvalid,
                format!("Invalid options for {} storage provider", self.provider_type),
            )
            .with_stage(Stage::Config)
            .with_cause(e)
        })
    }
}

pub type ProviderFuture = BoxFuture<'static, Result<Arc<dyn StorageProvider>>>;

pub type ProviderConstructor = Arc<dyn Fn(StorageProviderConfig) -> ProviderFuture + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProviderFactoryRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderFactoryRegistry {
    /// Registry without any provider types.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every provider type compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();

        registry.register("local", |config: StorageProviderConfig| {
            Box::pin(async move {
                let options: LocalConfig = config.parse_options()?;
                let provider: Arc<dyn StorageProvider> =
                    Arc::new(LocalStorageProvider::from_config(options));
                Ok(provider)
            }) as ProviderFuture
        });

        registry.register("memory", |_config: StorageProviderConfig| {
            Box::pin(async move {
                let provider: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
                Ok(provider)
            }) as ProviderFuture
        });

        #[cfg(feature = "s3")]
        {
            use super::s3::{GcsConfig, S3Config, S3StorageProvider};

            registry.register("s3", |config: StorageProviderConfig| {
                Box::pin(async move {
                    let options: S3Config = config.parse_options()?;
                    let provider: Arc<dyn StorageProvider> =
                        Arc::new(S3StorageProvider::new(options).await?);
                    Ok(provider)
                }) as ProviderFuture
            });

            registry.register("gcs", |config: StorageProviderConfig| {
                Box::pin(async move {
                    let options: GcsConfig = config.parse_options()?;
                    let provider: Arc<dyn StorageProvider> =
                        Arc::new(S3StorageProvider::gcs(options).await?);
                    Ok(provider)
                }) as ProviderFuture
            });
        }

        registry
    }

    pub fn register<F>(&mut self, provider_type: impl Into<String>, constructor: F)
    where
        F: Fn(StorageProviderConfig) -> ProviderFuture + Send + Sync + 'static,
    {
        self.constructors
            .insert(provider_type.into(), Arc::new(constructor));
    }

    pub fn supports(&self, provider_type: &str) -> bool {
        self.constructors.contains_key(provider_type)
    }

    pub async fn build(&self, config: StorageProviderConfig) -> Result<Arc<dyn StorageProvider>> {
        let constructor = self.constructors.get(&config.provider_type).ok_or_else(|| {
            BackupError::new(
                ErrorCode::StorageProviderUnknown,
                format!("Unknown storage provider type '{}'", config.provider_type),
            )
            .with_stage(Stage::Config)
        })?;

        constructor(config).await
    }
}
