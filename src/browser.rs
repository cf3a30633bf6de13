//! Browser Session Handler (spec.md §4.H).
//!
//! Grounded on `ws_forwarder.rs`'s accept/`select!` shape, trimmed of its
//! auth handshake (browser access carries no authentication — spec.md §1
//! Out of scope) and generalized from one fixed wire protocol into
//! dispatch-by-`msg_type`.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use gateway_protocol::{BrowserEvent, BrowserRequest, StatusEntry};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::homebase::RequestOutcome;
use crate::repo::devices;
use crate::sql_exec;
use crate::sql_guard;
use crate::state::AppState;

/// Opaque credential carried by the browser, if any (spec.md §1 treats
/// authentication as out of scope; it is read and logged but never
/// validated against a user store — see `extract_bearer`).
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn browser_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = extract_bearer(&headers) {
        debug!(token_len = token.len(), "browser connection presented a bearer token");
    }
    ws.on_upgrade(move |socket| handle_browser_socket(socket, state))
}

async fn handle_browser_socket(mut socket: WebSocket, state: AppState) {
    if send_initial_snapshot(&mut socket, &state).await.is_err() {
        return;
    }

    let mut events = state.broadcaster.subscribe();
    info!("browser session connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<BrowserRequest>(&text) {
                        Ok(request) => {
                            let reply = dispatch(&state, request).await;
                            if send_event(&mut socket, reply).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping malformed browser request"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("browser session closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "browser socket read error");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut socket, event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "browser session lagged behind broadcast stream");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn send_initial_snapshot(socket: &mut WebSocket, state: &AppState) -> Result<(), ()> {
    send_event(
        socket,
        BrowserEvent::StatusSnapshot {
            data: state.cache.snapshot().await,
        },
    )
    .await?;
    send_event(
        socket,
        BrowserEvent::CommStatusSnapshot {
            data: state.notify_store.comm_snapshot().await,
        },
    )
    .await?;
    send_event(
        socket,
        BrowserEvent::PerfStatsSnapshot {
            data: state.notify_store.perf_snapshot().await,
        },
    )
    .await
}

async fn send_event(socket: &mut WebSocket, event: BrowserEvent) -> Result<(), ()> {
    let Ok(json) = serde_json::to_string(&event) else {
        return Ok(());
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

async fn dispatch(state: &AppState, request: BrowserRequest) -> BrowserEvent {
    match request.msg_type.as_str() {
        "esscmd" => run_eval(state, request, false).await,
        "gitcmd" => run_eval(state, request, true).await,
        "AddDevice" => add_device(state, request).await,
        "Addsubject" => add_subject(state, request).await,
        "sql_query" => sql_query(state, &request).await,
        "get_options" => get_options(state, &request).await,
        other => {
            debug!(msg_type = %other, "unrecognized browser msg_type");
            BrowserEvent::Error {
                message: format!("unrecognized msg_type: {other}"),
            }
        }
    }
}

/// `esscmd` / `gitcmd` (spec.md §4.H): look up or create the Link for the
/// target address, then `eval`. `gitcmd` wraps its payload in `send git {}`.
async fn run_eval(state: &AppState, request: BrowserRequest, is_git: bool) -> BrowserEvent {
    let kind = request.msg_type.clone();
    let Some(ip) = request.ip.clone() else {
        return BrowserEvent::Error {
            message: format!("{kind} requires ip"),
        };
    };
    let Some(payload) = request.msg.as_str() else {
        return BrowserEvent::CmdError {
            kind,
            ip,
            error: "missing script payload".to_owned(),
        };
    };
    let script = if is_git {
        format!("send git {{{payload}}}")
    } else {
        payload.to_owned()
    };

    let link = match state.registry.ensure(&ip).await {
        Ok(link) => link,
        Err(_) => {
            return BrowserEvent::CmdError {
                kind,
                ip,
                error: "address not allowed".to_owned(),
            }
        }
    };

    match link.eval(script, None).await {
        RequestOutcome::Ok(result) => BrowserEvent::CmdOk { kind, ip, result },
        RequestOutcome::Error(error) => BrowserEvent::CmdError { kind, ip, error },
        RequestOutcome::Timeout => BrowserEvent::CmdError {
            kind,
            ip,
            error: "request timed out".to_owned(),
        },
        RequestOutcome::LinkLost => BrowserEvent::CmdError {
            kind,
            ip,
            error: "homebase link lost".to_owned(),
        },
        RequestOutcome::QueueFull => BrowserEvent::CmdError {
            kind,
            ip,
            error: "request queue full".to_owned(),
        },
    }
}

async fn add_device(state: &AppState, request: BrowserRequest) -> BrowserEvent {
    let address = request
        .ip
        .clone()
        .or_else(|| request.msg.as_str().map(str::to_owned));
    let Some(address) = address else {
        return BrowserEvent::Error {
            message: "AddDevice requires an address".to_owned(),
        };
    };

    if let Err(e) = devices::insert_if_absent(&state.pool, &address).await {
        return BrowserEvent::Error {
            message: format!("failed to add device: {e}"),
        };
    }

    match state.registry.ensure(&address).await {
        Ok(link) => BrowserEvent::CmdOk {
            kind: "AddDevice".to_owned(),
            ip: address,
            result: serde_json::json!(link.address()),
        },
        Err(_) => BrowserEvent::Error {
            message: "address not allowed".to_owned(),
        },
    }
}

/// Collect the comma-joined `ess/animalOptions` entry from every device,
/// dedupe case-insensitively, strip empties, ensure `"test"` is first, and
/// append `new_subject` if its lowercase form is absent (spec.md §4.H
/// subject-option rules). A pure function of the cache snapshot so it's
/// testable without a running registry or store.
fn merge_subject_options(snapshot: &[StatusEntry], new_subject: &str) -> Vec<String> {
    let mut seen_lower: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();

    for entry in snapshot.iter().filter(|e| e.source == "ess" && e.entry_type == "animalOptions") {
        for option in entry.value.split(',') {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            let lower = option.to_lowercase();
            if seen_lower.insert(lower) {
                merged.push(option.to_owned());
            }
        }
    }

    if let Some(pos) = merged.iter().position(|o| o.eq_ignore_ascii_case("test")) {
        let test = merged.remove(pos);
        merged.insert(0, test);
    } else {
        merged.insert(0, "test".to_owned());
        seen_lower.insert("test".to_owned());
    }

    let new_subject = new_subject.trim();
    let new_lower = new_subject.to_lowercase();
    if !new_subject.is_empty() && !seen_lower.contains(&new_lower) {
        merged.push(new_subject.to_owned());
    }

    merged
}

async fn add_subject(state: &AppState, request: BrowserRequest) -> BrowserEvent {
    let Some(new_subject) = request.msg.as_str() else {
        return BrowserEvent::Error {
            message: "Addsubject requires a subject name".to_owned(),
        };
    };

    let snapshot = state.cache.snapshot().await;
    let merged = merge_subject_options(&snapshot, new_subject);
    let script = format!("set animalOptions {{{}}}", merged.join(","));

    for address in state.registry.known_addresses().await {
        if let Ok(link) = state.registry.ensure(&address).await {
            let _ = link.eval(script.clone(), None).await;
        }
    }

    BrowserEvent::CmdOk {
        kind: "Addsubject".to_owned(),
        ip: String::new(),
        result: serde_json::json!(merged),
    }
}

async fn sql_query(state: &AppState, request: &BrowserRequest) -> BrowserEvent {
    let Some(query) = request.msg.get("query").and_then(|v| v.as_str()) else {
        return BrowserEvent::Error {
            message: "sql_query requires a query string".to_owned(),
        };
    };
    if let Err(rejection) = sql_guard::validate_read_only(query) {
        return BrowserEvent::Error {
            message: rejection.to_string(),
        };
    }
    match sql_exec::execute_to_json(&state.pool, query).await {
        Ok(rows) => BrowserEvent::SqlTable { result: rows },
        Err(e) => BrowserEvent::Error {
            message: format!("query failed: {e}"),
        },
    }
}

async fn get_options(state: &AppState, request: &BrowserRequest) -> BrowserEvent {
    let Some(query) = request.msg.get("query").and_then(|v| v.as_str()) else {
        return BrowserEvent::Error {
            message: "get_options requires a query string".to_owned(),
        };
    };
    if let Err(rejection) = sql_guard::validate_read_only(query) {
        return BrowserEvent::Error {
            message: rejection.to_string(),
        };
    }
    match sql_exec::execute_to_json(&state.pool, query).await {
        Ok(rows) => {
            let options = rows
                .into_iter()
                .filter_map(|row| {
                    row.as_object()?.values().next().map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
                .collect();
            BrowserEvent::ListboxOptions { result: options }
        }
        Err(e) => BrowserEvent::Error {
            message: format!("query failed: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(host: &str, value: &str) -> StatusEntry {
        StatusEntry {
            host: host.to_owned(),
            source: "ess".to_owned(),
            entry_type: "animalOptions".to_owned(),
            value: value.to_owned(),
            sys_time: "t0".to_owned(),
        }
    }

    #[test]
    fn merges_and_dedupes_case_insensitively_across_devices() {
        let snapshot = vec![entry("10.0.0.1", "sally,Bob"), entry("10.0.0.2", "bob,carl")];
        let merged = merge_subject_options(&snapshot, "dan");
        assert_eq!(merged, vec!["test", "sally", "Bob", "carl", "dan"]);
    }

    #[test]
    fn ensures_test_is_first_even_if_present_elsewhere() {
        let snapshot = vec![entry("10.0.0.1", "sally,test,bob")];
        let merged = merge_subject_options(&snapshot, "carl");
        assert_eq!(merged[0], "test");
        assert_eq!(merged, vec!["test", "sally", "bob", "carl"]);
    }

    #[test]
    fn does_not_duplicate_new_subject_if_already_present() {
        let snapshot = vec![entry("10.0.0.1", "sally,bob")];
        let merged = merge_subject_options(&snapshot, "Bob");
        assert_eq!(merged, vec!["test", "sally", "bob"]);
    }

    #[test]
    fn strips_empty_options() {
        let snapshot = vec![entry("10.0.0.1", "sally,,bob,")];
        let merged = merge_subject_options(&snapshot, "");
        assert_eq!(merged, vec!["test", "sally", "bob"]);
    }

    #[test]
    fn empty_snapshot_still_yields_test_and_new_subject() {
        let merged = merge_subject_options(&[], "sally");
        assert_eq!(merged, vec!["test", "sally"]);
    }
}
