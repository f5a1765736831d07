use super::{ComponentBackend, ComponentSnapshot};
use crate::backup::types::Component;
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct BackendState {
    live: RwLock<Option<ComponentSnapshot>>,
    healthy: AtomicBool,
    fail_export: AtomicBool,
    fail_import: AtomicBool,
    exports: AtomicUsize,
    imports: AtomicUsize,
}

/// Backend whose "live" data is an in-memory snapshot. Clones share state,
/// and failures can be switched on to exercise the orchestrators.
#[derive(Clone)]
pub struct InMemoryComponentBackend {
    component: Component,
    state: Arc<BackendState>,
}

impl InMemoryComponentBackend {
    pub fn new(component: Component) -> Self {
        let state = BackendState::default();
        state.healthy.store(true, Ordering::SeqCst);
        Self {
            component,
            state: Arc::new(state),
        }
    }

    pub fn with_data(self, snapshot: ComponentSnapshot) -> Self {
        self.set_live(snapshot);
        self
    }

    pub fn set_live(&self, snapshot: ComponentSnapshot) {
        *self.state.live.write() = Some(snapshot);
    }

    pub fn live(&self) -> Option<ComponentSnapshot> {
        self.state.live.read().clone()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fail_exports(&self, fail: bool) {
        self.state.fail_export.store(fail, Ordering::SeqCst);
    }

    pub fn fail_imports(&self, fail: bool) {
        self.state.fail_import.store(fail, Ordering::SeqCst);
    }

    pub fn export_count(&self) -> usize {
        self.state.exports.load(Ordering::SeqCst)
    }

    pub fn import_count(&self) -> usize {
        self.state.imports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComponentBackend for InMemoryComponentBackend {
    fn component(&self) -> Component {
        self.component
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.state.healthy.load(Ordering::SeqCst))
    }

    async fn export_snapshot(&self) -> Result<ComponentSnapshot> {
        self.state.exports.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_export.load(Ordering::SeqCst) {
            bail!("{} export failed", self.component);
        }
        Ok(self
            .live()
            .unwrap_or_else(|| ComponentSnapshot::single(Vec::<u8>::new())))
    }

    async fn import_snapshot(&self, snapshot: ComponentSnapshot) -> Result<()> {
        self.state.imports.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_import.load(Ordering::SeqCst) {
            bail!("{} import failed", self.component);
        }
        self.set_live(snapshot);
        Ok(())
    }
}
