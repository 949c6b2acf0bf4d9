use anyhow::{bail, Context, Result};
use relayd_core::hardware::{HardwareLine, MemoryLine};
use relayd_core::registry::RelayRegistry;
use relayd_server::state::AppState;
use std::path::Path;
use std::sync::Arc;

pub fn run(config_path: Option<&Path>, listen: Option<&str>, simulate: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let listen = listen.unwrap_or(&config.listen).to_string();

    if !simulate {
        // Hardware drivers plug in through the HardwareLine trait; none
        // ship in this binary yet.
        bail!("no hardware driver is built in; run with --simulate for in-memory relay lines");
    }

    let registry = RelayRegistry::build(&config, |def| {
        tracing::debug!(relay = def.id, line = def.line, "binding simulated line");
        Ok(Arc::new(MemoryLine::new()) as Arc<dyn HardwareLine>)
    })?;
    let registry = Arc::new(registry);

    tracing::info!(
        relays = registry.len(),
        simulate,
        "starting relay coordination engine"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let app_state = AppState::start(&config, registry)
            .await
            .context("hardware initialization failed")?;
        let coordinator = app_state.coordinator.clone();

        let listener = tokio::net::TcpListener::bind(&listen)
            .await
            .with_context(|| format!("failed to bind {listen}"))?;

        let result = tokio::select! {
            res = relayd_server::serve_on(app_state, listener) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        };

        coordinator.shutdown().await;
        result
    })
}
