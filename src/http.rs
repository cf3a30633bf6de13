//! Admin HTTP surface (spec.md §2.K): health probes plus a read-only
//! device listing, alongside the browser WebSocket listener.
//!
//! Grounded on `http/response.rs`'s JSON error envelope and
//! `http/streams.rs`'s list-then-map-to-JSON handler shape, trimmed to the
//! two probes and one listing this gateway actually needs — no write
//! endpoints, since device mutation goes through the browser `AddDevice`
//! intent (spec.md §4.H), not HTTP.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::repo::devices;
use crate::state::AppState;

#[derive(Serialize, Deserialize)]
struct ErrorEnvelope {
    code: String,
    message: String,
}

fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            code: code.to_owned(),
            message: message.into(),
        }),
    )
        .into_response()
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Liveness + readiness are split because the gateway can be up (able to
/// accept browser sockets) while its store connection is down; `/readyz`
/// reflects the latter.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => json_error(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string()),
    }
}

pub async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    match devices::load_all(&state.pool).await {
        Ok(rows) => {
            let devices: Vec<serde_json::Value> = rows
                .into_iter()
                .map(|r| {
                    serde_json::json!({
                        "address": r.address,
                        "display_name": r.display_name,
                        "hidden": r.hidden,
                        "ping_avg": r.ping_avg,
                        "ping_success": r.ping_success,
                        "last_ping": r.last_ping.map(|t| t.to_rfc3339()),
                        "last_seen": r.last_seen.map(|t| t.to_rfc3339()),
                    })
                })
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "devices": devices }))).into_response()
        }
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string()),
    }
}
