use relayd_core::broadcast::Broadcaster;
use relayd_core::config::RelayConfig;
use relayd_core::coordinator::Coordinator;
use relayd_core::registry::RelayRegistry;
use relayd_core::store::StateStore;
use std::sync::Arc;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub store: Arc<StateStore>,
    pub registry: Arc<RelayRegistry>,
    pub broadcaster: Broadcaster,
}

impl AppState {
    /// Bring the engine up: fail-fast hardware initialization, then the
    /// broadcaster pump and the serialized coordinator. A line that can't
    /// be configured aborts startup — the process must not serve traffic
    /// with a partially initialized relay set.
    pub async fn start(
        config: &RelayConfig,
        registry: Arc<RelayRegistry>,
    ) -> relayd_core::Result<Self> {
        registry.initialize(config.timing.io_timeout()).await?;

        let (store, events) = StateStore::new(registry.ids());
        let store = Arc::new(store);
        store.set_hardware_ready(true);

        let broadcaster = Broadcaster::spawn(
            registry.clone(),
            store.clone(),
            events,
            config.timing.heartbeat_interval(),
        );
        let coordinator = Coordinator::spawn(registry.clone(), store.clone(), config);

        Ok(Self {
            coordinator,
            store,
            registry,
            broadcaster,
        })
    }
}
