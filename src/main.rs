use std::sync::Arc;

use maransa_gateway::gateway;
use maransa_gateway::gateway::middleware::{AuthGate, HttpAuthGate};
use maransa_gateway::gateway::server::AppState;
use maransa_gateway::gateway::{AxumServer, ForwardEngine, RandomPolicy, ServiceRegistry};
use maransa_gateway::modules;

#[tokio::main]
async fn main() -> Result<(), String> {
    modules::logger::init_logger();

    let mut config = match modules::config::load_gateway_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!("failed to load gateway config: {}. using defaults", err);
            let cfg = gateway::GatewayConfig::default();
            let _ = modules::config::save_gateway_config(&cfg);
            cfg
        }
    };

    config.apply_env_overrides();

    if config.backend_monolith_url.is_some() {
        tracing::info!("monolith mode: business routes collapse onto the backend monolith");
    } else {
        tracing::info!("microservices mode: business routes map to individual services");
    }

    let registry = ServiceRegistry::from_config(&config);
    Arc::clone(&registry).start_refresh().await;

    let engine = Arc::new(ForwardEngine::new(
        &config,
        Arc::clone(&registry),
        Box::new(RandomPolicy),
    ));

    let auth_gate: Option<Arc<dyn AuthGate>> = match &config.auth_verify_url {
        Some(url) => Some(Arc::new(HttpAuthGate::new(url.clone()))),
        None => {
            tracing::warn!("no auth verify url configured; protected routes are open");
            None
        }
    };

    let state = AppState {
        engine,
        registry: Arc::clone(&registry),
        auth_gate,
    };

    let (server, handle) = AxumServer::start(&config, state)
        .await
        .map_err(|e| format!("failed to start gateway server: {}", e))?;

    tracing::info!(
        "api gateway listening on http://{}:{}",
        config.get_bind_address(),
        config.port
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {}", e))?;

    tracing::info!("shutdown requested, stopping server...");
    server.stop();
    registry.shutdown().await;
    let _ = handle.await;

    Ok(())
}
