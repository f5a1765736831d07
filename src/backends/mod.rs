//! Component backends: the per-data-source export/import boundary.
//!
//! The orchestrators never speak a store's native protocol. Each data source
//! plugs in a [`ComponentBackend`] that turns its live state into a
//! [`ComponentSnapshot`] and back.

mod memory;

pub use memory::InMemoryComponentBackend;

use crate::backup::types::Component;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One named unit of a multi-part snapshot (e.g. a vector collection).
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    pub name: String,
    pub data: Bytes,
}

/// What a backend hands over on export and receives on import.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentSnapshot {
    /// Stored as `{backupId}_{component}.{ext}`
    Single(Bytes),
    /// Stored as a `{backupId}_{component}_collections.json` manifest plus
    /// one `{backupId}_{component}_{name}.snapshot` per collection
    Collections(Vec<CollectionSnapshot>),
}

impl ComponentSnapshot {
    pub fn single(data: impl Into<Bytes>) -> Self {
        ComponentSnapshot::Single(data.into())
    }

    pub fn total_len(&self) -> usize {
        match self {
            ComponentSnapshot::Single(data) => data.len(),
            ComponentSnapshot::Collections(parts) => parts.iter().map(|p| p.data.len()).sum(),
        }
    }
}

#[async_trait]
pub trait ComponentBackend: Send + Sync {
    fn component(&self) -> Component;

    /// Readiness probe. `Ok(false)` and `Err` both mean "not ready".
    async fn health_check(&self) -> Result<bool>;

    async fn export_snapshot(&self) -> Result<ComponentSnapshot>;

    async fn import_snapshot(&self, snapshot: ComponentSnapshot) -> Result<()>;
}

/// Backends keyed by the component they serve.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: BTreeMap<Component, Arc<dyn ComponentBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Arc<dyn ComponentBackend>) -> Self {
        self.insert(backend);
        self
    }

    pub fn insert(&mut self, backend: Arc<dyn ComponentBackend>) {
        self.backends.insert(backend.component(), backend);
    }

    pub fn get(&self, component: Component) -> Option<Arc<dyn ComponentBackend>> {
        self.backends.get(&component).cloned()
    }

    pub fn components(&self) -> Vec<Component> {
        self.backends.keys().copied().collect()
    }

    /// Probe one backend, folding probe errors into "not ready".
    pub async fn is_ready(&self, component: Component) -> bool {
        match self.get(component) {
            Some(backend) => match backend.health_check().await {
                Ok(ready) => ready,
                Err(e) => {
                    tracing::warn!(component = %component, error = %e, "Health check failed");
                    false
                }
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backend_set_probes() {
        let graph = InMemoryComponentBackend::new(Component::Falkordb);
        let backends = BackendSet::new().with(Arc::new(graph.clone()));

        assert!(backends.is_ready(Component::Falkordb).await);
        assert!(!backends.is_ready(Component::Qdrant).await);

        graph.set_healthy(false);
        assert!(!backends.is_ready(Component::Falkordb).await);
    }

    #[test]
    fn test_snapshot_len() {
        let snapshot = ComponentSnapshot::Collections(vec![
            CollectionSnapshot { name: "a".into(), data: Bytes::from_static(b"123") },
            CollectionSnapshot { name: "b".into(), data: Bytes::from_static(b"45") },
        ]);
        assert_eq!(snapshot.total_len(), 5);
        assert_eq!(ComponentSnapshot::single("xyz").total_len(), 3);
    }
}
