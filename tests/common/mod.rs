// Shared fixtures for the engine integration tests
#![allow(dead_code)]

use platform_backup::backends::{BackendSet, CollectionSnapshot, ComponentSnapshot, InMemoryComponentBackend};
use platform_backup::metadata::{InMemoryMetadataStore, MetadataStore};
use platform_backup::restore::InMemoryTokenStore;
use platform_backup::storage::{MemoryStorageProvider, StorageProvider, StorageProviderRegistry};
use platform_backup::{BackupEngine, BackupRecord, Component, EngineConfig};
use std::sync::Arc;

pub const PROVIDER_ID: &str = "primary";

pub const POSTGRES_DUMP: &str = "CREATE TABLE sessions (id uuid PRIMARY KEY);\n";
pub const FALKORDB_DUMP: &[u8] = b"REDIS0011\xfagraph";
pub const CONFIG_JSON: &str = r#"{"features":{"restore":true},"tenants":["alpha","beta"]}"#;

/// One handle per component backend; clones share state with the engine's copy.
#[derive(Clone)]
pub struct Backends {
    pub falkordb: InMemoryComponentBackend,
    pub qdrant: InMemoryComponentBackend,
    pub postgres: InMemoryComponentBackend,
    pub config: InMemoryComponentBackend,
}

impl Backends {
    pub fn seeded() -> Self {
        Self {
            falkordb: InMemoryComponentBackend::new(Component::Falkordb)
                .with_data(ComponentSnapshot::single(FALKORDB_DUMP)),
            qdrant: InMemoryComponentBackend::new(Component::Qdrant).with_data(ComponentSnapshot::Collections(vec![
                CollectionSnapshot {
                    name: "documents".into(),
                    data: "qdrant-documents".into(),
                },
                CollectionSnapshot {
                    name: "agent memories".into(),
                    data: "qdrant-memories".into(),
                },
            ])),
            postgres: InMemoryComponentBackend::new(Component::Postgres)
                .with_data(ComponentSnapshot::single(POSTGRES_DUMP)),
            config: InMemoryComponentBackend::new(Component::Config).with_data(ComponentSnapshot::single(CONFIG_JSON)),
        }
    }

    pub fn all(&self) -> [&InMemoryComponentBackend; 4] {
        [&self.falkordb, &self.qdrant, &self.postgres, &self.config]
    }

    pub fn total_imports(&self) -> usize {
        self.all().iter().map(|b| b.import_count()).sum()
    }

    pub fn set(&self) -> BackendSet {
        BackendSet::new()
            .with(Arc::new(self.falkordb.clone()))
            .with(Arc::new(self.qdrant.clone()))
            .with(Arc::new(self.postgres.clone()))
            .with(Arc::new(self.config.clone()))
    }
}

pub struct Fixture {
    pub engine: BackupEngine,
    pub provider: Arc<dyn StorageProvider>,
    pub providers: Arc<StorageProviderRegistry>,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub tokens: Arc<InMemoryTokenStore>,
    pub backends: Backends,
}

impl Fixture {
    /// Memory provider, approval required, no retention.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::new())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_provider(config, Arc::new(MemoryStorageProvider::new()))
    }

    pub fn with_provider(config: EngineConfig, provider: Arc<dyn StorageProvider>) -> Self {
        let providers = Arc::new(StorageProviderRegistry::new());
        providers.register(PROVIDER_ID, provider.clone());

        let metadata = Arc::new(InMemoryMetadataStore::new());
        let tokens = Arc::new(InMemoryTokenStore::new());
        let backends = Backends::seeded();
        let engine = BackupEngine::from_parts(
            &config,
            providers.clone(),
            metadata.clone(),
            tokens.clone(),
            backends.set(),
        );

        Self {
            engine,
            provider,
            providers,
            metadata,
            tokens,
            backends,
        }
    }

    /// A second engine over the same stores, e.g. with another retention policy.
    pub fn engine_with(&self, config: EngineConfig) -> BackupEngine {
        BackupEngine::from_parts(
            &config,
            self.providers.clone(),
            self.metadata.clone(),
            self.tokens.clone(),
            self.backends.set(),
        )
    }

    pub async fn record(&self, backup_id: &str) -> BackupRecord {
        self.metadata
            .get(backup_id)
            .await
            .expect("metadata store")
            .expect("backup record")
    }

    /// Every stored artifact whose name starts with the backup id.
    pub async fn artifacts_of(&self, backup_id: &str) -> Vec<String> {
        let prefix = format!("{}_", backup_id);
        self.provider
            .list()
            .await
            .expect("provider listing")
            .into_iter()
            .filter(|path| path.rsplit('/').next().unwrap_or(path).starts_with(&prefix))
            .collect()
    }
}
