//! The embedded HTTP origin.
//!
//! Two surfaces share one axum router: the virtual directory renderers
//! pull audio from (`/LMS2UPNP/{slot}`), and the GENA callback endpoint
//! devices NOTIFY volume changes to (`/gena/{device}`).

mod stream;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::NetworkContext;
use crate::protocol_constants::STREAM_VDIR;
use crate::registry::Registry;
use crate::stream::SlotPool;

/// Shared state for the origin handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<SlotPool>,
    pub registry: Arc<Registry>,
}

/// Errors from the origin server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind server socket: {0}")]
    Bind(std::io::Error),

    #[error("Server error: {0}")]
    Serve(std::io::Error),
}

/// Builds the origin router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("/{}/{{name}}", STREAM_VDIR), get(stream::serve_stream))
        .route("/gena/{index}", any(gena_notify))
        .with_state(state)
}

/// GENA NOTIFY callback: route the body to the owning device.
async fn gena_notify(
    Path(index): Path<usize>,
    State(state): State<AppState>,
    body: String,
) -> StatusCode {
    match state.registry.device(index) {
        Some(device) => {
            device.on_gena_notify(&body);
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// Binds and serves the origin until cancelled.
///
/// Binds to the configured local IP (all interfaces when auto-detected
/// addresses should not constrain listening) and publishes the actual
/// port back through the [`NetworkContext`].
pub async fn start_server(
    state: AppState,
    net: NetworkContext,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let port = net.get_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(ServerError::Bind)?;
    let actual = listener.local_addr().map_err(ServerError::Bind)?.port();
    net.set_port(actual);
    log::info!("[Origin] serving http://{}:{}/{}/", net.get_local_ip(), actual, STREAM_VDIR);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(ServerError::Serve)
}
