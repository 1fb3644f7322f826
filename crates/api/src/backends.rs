//! Render backend wiring for the server.

use std::sync::Arc;

use reelforge_render::render_farm::RENDER_FARM_BACKEND_NAME;
use reelforge_render::{
    BackendError, BackendRegistry, RenderFarmBackend, RenderFarmConfig, SimulatedBackend,
    SimulatedConfig, SimulatedDelay,
};

use crate::config::RenderConfig;

/// Build the backend registry from configuration.
///
/// The preview backend is always available. The render farm is added when
/// `render_farm_url` is set.
pub fn build_registry(config: &RenderConfig) -> Result<BackendRegistry, BackendError> {
    let preview = SimulatedBackend::new(SimulatedConfig {
        delay: SimulatedDelay::Fixed(config.simulated_delay),
        failure_rate: config.simulated_failure_rate,
        ..Default::default()
    });
    let mut registry = BackendRegistry::new().register(Arc::new(preview));

    if let Some(url) = &config.render_farm_url {
        let farm = RenderFarmBackend::new(RenderFarmConfig {
            api_key: config.render_farm_api_key.clone(),
            poll_interval: config.render_poll_interval,
            ..RenderFarmConfig::new(url.clone())
        })?;
        registry = registry.register(Arc::new(farm));
    }

    if let Some(name) = &config.default_backend {
        if registry.get(name).is_none() {
            return Err(BackendError::Terminal(format!(
                "Default render backend '{name}' is not configured"
            )));
        }
        registry = registry.with_default(name.clone());
    }

    tracing::info!(
        backends = ?registry.names(),
        default = registry.default_name().unwrap_or_default(),
        farm = config.render_farm_url.is_some().then_some(RENDER_FARM_BACKEND_NAME),
        "Render backends configured",
    );
    Ok(registry)
}
