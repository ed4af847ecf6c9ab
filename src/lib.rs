// DbAtlas - multi-engine database access core

pub mod engine;
pub mod observability;

use std::sync::Arc;

use engine::{ConnectionManager, DriverRegistry, EngineFacade, QueryManager};

/// Composition root wiring the registry, connection manager, and façade
/// together. Embedders call [`observability::init_tracing`] once, then
/// construct one of these and keep it for the process lifetime.
pub struct AppState {
    pub registry: Arc<DriverRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub queries: Arc<QueryManager>,
    pub facade: Arc<EngineFacade>,
}

impl AppState {
    pub fn new() -> Self {
        let registry = Arc::new(DriverRegistry::with_default_drivers());
        let connections = Arc::new(ConnectionManager::new(Arc::clone(&registry)));
        let queries = Arc::new(QueryManager::new());
        let facade = Arc::new(EngineFacade::new(
            Arc::clone(&connections),
            Arc::clone(&queries),
        ));

        Self {
            registry,
            connections,
            queries,
            facade,
        }
    }

    /// Closes every live connection; call on shutdown.
    pub async fn shutdown(&self) {
        self.connections.disconnect_all().await;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::EngineKind;

    #[test]
    fn default_state_registers_every_engine() {
        let state = AppState::new();
        for kind in EngineKind::ALL {
            assert!(state.registry.get(kind).is_some(), "missing {kind:?}");
        }
    }
}
