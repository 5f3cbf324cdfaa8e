//! HTTP/WebSocket surface.

use std::io;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::batch;
use crate::config::SessionConfig;
use crate::decode::GridReader;
use crate::palette::Palette;
use crate::session;

/// Shared by every connection. The palette is process-wide; the rest is
/// read-only configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SessionConfig>,
    pub palette: &'static Palette,
    pub reader: Arc<dyn GridReader>,
}

impl AppState {
    pub fn new(
        config: SessionConfig,
        palette: &'static Palette,
        reader: Arc<dyn GridReader>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            palette,
            reader,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    palette_size: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", get(execute))
        .route("/process", post(batch::process))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "meep-host listening");
    }
    axum::serve(listener, router(state)).await
}

async fn execute(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| session::run(socket, state))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        palette_size: state.palette.len(),
    })
}
