pub mod broadcast;
pub mod browser;
pub mod cache;
pub mod config;
pub mod db;
pub mod homebase;
pub mod http;
pub mod notify;
pub mod prober;
pub mod registry;
pub mod repo;
pub mod sql_exec;
pub mod sql_guard;
pub mod state;

pub use state::AppState;

use axum::routing::get;
use axum::Router;

/// Assembles the gateway's HTTP/WS surface: the browser-facing WebSocket
/// at `/ws` (spec.md §4.H) plus the admin probes and device listing
/// (spec.md §2.K).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(browser::browser_ws_handler))
        .route("/healthz", get(http::healthz))
        .route("/readyz", get(http::readyz))
        .route("/api/v1/devices", get(http::list_devices))
        .with_state(state)
}
