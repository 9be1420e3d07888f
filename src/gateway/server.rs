use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::gateway::config::GatewayConfig;
use crate::gateway::discovery::ServiceRegistry;
use crate::gateway::forward::ForwardEngine;
use crate::gateway::handlers;
use crate::gateway::middleware::{self, AuthGate};

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ForwardEngine>,
    pub registry: Arc<ServiceRegistry>,
    pub auth_gate: Option<Arc<dyn AuthGate>>,
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl AxumServer {
    /// Start the edge server
    pub async fn start(
        config: &GatewayConfig,
        state: AppState,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let app = Router::new()
            .route("/health", get(health_check_handler))
            .route("/health/services", get(health_services_handler))
            // Every /api path funnels into the forwarding engine
            .route("/api", any(handlers::proxy_handler))
            .route("/api/*path", any(handlers::proxy_handler))
            .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
            .layer(middleware::cors_layer(&config.cors_origin))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::auth_middleware,
            ))
            .with_state(state);

        // Bind address
        let addr = format!("{}:{}", config.get_bind_address(), config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;

        tracing::info!("gateway server started at http://{}", addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
        };

        // Start server in a new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection handling ended or error: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("gateway server stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    /// Stop the server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Liveness handler
async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "service": "api-gateway"
    }))
    .into_response()
}

/// Names of the services the gateway can currently route to
async fn health_services_handler(State(state): State<AppState>) -> Response {
    let services = state.registry.known_services().await;
    Json(serde_json::json!({ "services": services })).into_response()
}
