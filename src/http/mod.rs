//! HTTP surface for the gate.

mod handlers;
mod server;

pub use handlers::AppState;
pub use server::HttpServer;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// Assemble the full application router: bypass routes served locally,
/// everything else forwarded upstream, with the gate middleware layered
/// over all of it.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/signal/ready", post(handlers::signal_ready))
        .fallback(handlers::forward)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            handlers::gatekeeper,
        ))
        .with_state(state)
}
