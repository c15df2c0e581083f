//! HTTP/WebSocket server: the public surface Twilio and operators talk to
//! (spec §4 Telephony Leg, §6 Health/Status).
//!
//! Grounded on the teacher's own `server::start` for the CORS/TraceLayer/
//! HTTPS-bind shape; grounded on `original_source/server.py` for the
//! route set itself (`/incoming-call`, `/media-stream`, `/health`) and
//! for the CORS-wide-open posture the original FastAPI app takes.

pub mod twilio_ws;
pub mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{BridgeConfig, Config};
use crate::relay::{BridgeToolRegistry, SessionRegistry, ToolRegistry};

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<BridgeConfig>,
    pub registry: SessionRegistry,
    pub tools: Arc<dyn ToolRegistry>,
}

pub async fn start(host: &str, port: u16, https: bool, cert: Option<String>, key: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let state = ServerState {
        config: Arc::new(config.bridge),
        registry: SessionRegistry::new(),
        tools: Arc::new(BridgeToolRegistry::default()),
    };

    let addr: SocketAddr = format!("{host}:{port}").parse().context("invalid bind address")?;

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/", get(status_page))
        .route("/health", get(health))
        .route("/incoming-call", any(webhook::incoming_call))
        .route("/media-stream", get(twilio_ws::handle_media_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    info!(%addr, https, "voice bridge listening");

    if https {
        if let (Some(cert_path), Some(key_path)) = (cert, key) {
            let cert_data = tokio::fs::read(&cert_path).await.context("failed to read certificate file")?;
            let key_data = tokio::fs::read(&key_path).await.context("failed to read key file")?;
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem(cert_data, key_data).await?;
            axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            return shutdown(&state).await;
        }
        anyhow::bail!("--https requires --cert and --key");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    shutdown(&state).await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn shutdown(state: &ServerState) -> Result<()> {
    info!("shutting down, cancelling active sessions");
    state.registry.cancel_all().await;
    Ok(())
}

async fn status_page() -> Json<serde_json::Value> {
    Json(json!({
        "service": "voice-bridge",
        "status": "running",
    }))
}

async fn health(axum::extract::State(state): axum::extract::State<ServerState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "active_sessions": state.registry.len().await,
    }))
}
