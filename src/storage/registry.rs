// Storage Provider Registry - named providers and default resolution

use super::factory::{ProviderFactoryRegistry, StorageProviderConfig};
use super::StorageProvider;
use crate::error::{BackupError, ErrorCode, Result, Stage};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Holds providers by id in registration order.
#[derive(Default)]
pub struct StorageProviderRegistry {
    providers: RwLock<Vec<(String, Arc<dyn StorageProvider>)>>,
    default_id: RwLock<Option<String>>,
}

impl StorageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured provider through the factory registry.
    ///
    /// Providers are registered in ascending id order, so without an explicit
    /// default the fallback picks the lexicographically first `local` id.
    pub async fn from_configs(
        factories: &ProviderFactoryRegistry,
        providers: &BTreeMap<String, StorageProviderConfig>,
        default_provider: Option<&str>,
    ) -> Result<Self> {
        let registry = Self::new();

        for (id, config) in providers {
            let provider = factories.build(config.clone()).await?;
            info!(provider_id = %id, provider_type = %config.provider_type, "Registered storage provider");
            registry.register(id.clone(), provider);
        }

        if let Some(default_id) = default_provider {
            registry.set_default(default_id)?;
        }

        Ok(registry)
    }

    /// Register (or replace) a provider under `id`.
    pub fn register(&self, id: impl Into<String>, provider: Arc<dyn StorageProvider>) {
        let id = id.into();
        let mut providers = self.providers.write();
        if let Some(slot) = providers.iter_mut().find(|(existing, _)| *existing == id) {
            slot.1 = provider;
        } else {
            providers.push((id, provider));
        }
    }

    /// Pin the default provider. The id must already be registered.
    pub fn set_default(&self, id: &str) -> Result<()> {
        if !self.contains(id) {
            return Err(unknown_provider(id));
        }
        *self.default_id.write() = Some(id.to_string());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.read().iter().any(|(existing, _)| existing == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.read().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn StorageProvider>> {
        self.providers
            .read()
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, provider)| provider.clone())
            .ok_or_else(|| unknown_provider(id))
    }

    /// Configured default, else the first registered local provider, else the
    /// first registered provider.
    pub fn get_default(&self) -> Result<(String, Arc<dyn StorageProvider>)> {
        if let Some(id) = self.default_id.read().clone() {
            return Ok((id.clone(), self.get(&id)?));
        }

        let providers = self.providers.read();
        providers
            .iter()
            .find(|(_, provider)| provider.kind() == "local")
            .or_else(|| providers.first())
            .map(|(id, provider)| (id.clone(), provider.clone()))
            .ok_or_else(|| {
                BackupError::new(
                    ErrorCode::StorageProviderUnknown,
                    "No storage providers are registered",
                )
                .with_stage(Stage::Config)
            })
    }

    /// Explicit id wins over the default.
    pub fn resolve(&self, id: Option<&str>) -> Result<(String, Arc<dyn StorageProvider>)> {
        match id {
            Some(id) => {
                debug!(provider_id = %id, "Using explicitly selected storage provider");
                Ok((id.to_string(), self.get(id)?))
            }
            None => self.get_default(),
        }
    }
}

fn unknown_provider(id: &str) -> BackupError {
    BackupError::new(
        ErrorCode::StorageProviderUnknown,
        format!("Storage provider '{}' is not registered", id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStorageProvider, MemoryStorageProvider};

    #[test]
    fn test_default_falls_back_to_first_local() {
        let registry = StorageProviderRegistry::new();
        registry.register("scratch", Arc::new(MemoryStorageProvider::new()));
        registry.register("disk", Arc::new(LocalStorageProvider::new("/tmp/unused")));

        let (id, provider) = registry.get_default().unwrap();
        assert_eq!(id, "disk");
        assert_eq!(provider.kind(), "local");
    }

    #[test]
    fn test_default_without_local_uses_first_registered() {
        let registry = StorageProviderRegistry::new();
        registry.register("a", Arc::new(MemoryStorageProvider::new()));
        registry.register("b", Arc::new(MemoryStorageProvider::new()));
        assert_eq!(registry.get_default().unwrap().0, "a");
    }

    #[test]
    fn test_configured_default_wins() {
        let registry = StorageProviderRegistry::new();
        registry.register("disk", Arc::new(LocalStorageProvider::new("/tmp/unused")));
        registry.register("scratch", Arc::new(MemoryStorageProvider::new()));
        registry.set_default("scratch").unwrap();
        assert_eq!(registry.get_default().unwrap().0, "scratch");
        assert_eq!(registry.resolve(Some("disk")).unwrap().0, "disk");
    }

    #[tokio::test]
    async fn test_configured_providers_register_in_id_order() {
        let configs = BTreeMap::from([
            ("zeta".to_string(), StorageProviderConfig::local("/tmp/unused-zeta")),
            ("scratch".to_string(), StorageProviderConfig::new("memory")),
            ("alpha".to_string(), StorageProviderConfig::local("/tmp/unused-alpha")),
        ]);

        let registry = StorageProviderRegistry::from_configs(&ProviderFactoryRegistry::with_builtin(), &configs, None)
            .await
            .unwrap();

        assert_eq!(registry.ids(), vec!["alpha", "scratch", "zeta"]);
        assert_eq!(registry.get_default().unwrap().0, "alpha");
    }

    #[test]
    fn test_unknown_provider() {
        let registry = StorageProviderRegistry::new();
        assert_eq!(
            registry.get("nope").err().unwrap().code(),
            ErrorCode::StorageProviderUnknown
        );
        assert!(registry.set_default("nope").is_err());
        assert!(registry.get_default().is_err());
    }
}
