//! Homebase Link (spec.md §4.C) — the core: one supervised task per
//! device address maintaining exactly one live session.
//!
//! Grounded on `services/forwarder/src/uplink.rs` for the
//! `tokio-tungstenite` `connect_async` dial and handshake shape, and on
//! `services/server/src/ws_forwarder.rs` for the `tokio::select!`-driven
//! per-connection actor loop (timers + inbound frames + a command channel,
//! all serialized through one task — the single-writer invariant from
//! spec.md §5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use gateway_protocol::{BrowserEvent, ClassifiedFrame, OutboundCommand, RawInboundFrame};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::cache::{StatusCache, UpdateOutcome};
use crate::config::GatewayConfig;
use crate::repo::status_writer::StatusWriter;

use super::backoff::{self, BackoffPhase};
use super::catalog::SUBSCRIPTION_CATALOG;
use super::chunk::{ChunkAssembler, ChunkOutcome};
use super::pending::{PendingTable, RequestOutcome};
use super::translator::{canonicalize_numeric, translate};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Shared process-wide collaborators every Link needs; cheap to clone
/// (everything inside is an `Arc` or a clonable handle).
#[derive(Clone)]
pub struct LinkContext {
    pub cache: StatusCache,
    pub broadcaster: Broadcaster,
    pub status_writer: Arc<dyn StatusWriter>,
    pub config: Arc<GatewayConfig>,
}

enum LinkCommand {
    Eval {
        script: String,
        timeout: Option<Duration>,
        reply: oneshot::Sender<RequestOutcome>,
    },
}

/// A cheap, cloneable reference to a running Homebase Link's actor task.
#[derive(Clone)]
pub struct HomebaseLinkHandle {
    address: String,
    cmd_tx: mpsc::Sender<LinkCommand>,
}

impl HomebaseLinkHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Evaluate a script on the remote homebase (spec.md §4.H `esscmd`/
    /// `gitcmd`). Resolves with `RequestOutcome::LinkLost` if the actor
    /// task has already shut down.
    pub async fn eval(&self, script: String, timeout: Option<Duration>) -> RequestOutcome {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(LinkCommand::Eval {
                script,
                timeout,
                reply,
            })
            .await
            .is_err()
        {
            return RequestOutcome::LinkLost;
        }
        rx.await.unwrap_or(RequestOutcome::LinkLost)
    }
}

/// Spawn a new Homebase Link actor for `address` and return a handle to it.
pub fn spawn(address: String, ctx: LinkContext) -> HomebaseLinkHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let handle = HomebaseLinkHandle {
        address: address.clone(),
        cmd_tx,
    };
    tokio::spawn(run_supervisor(address, ctx, cmd_rx));
    handle
}

/// Outer Idle/Connecting supervisor loop: dial, run the Open session to
/// completion, then back off and retry. Never returns during process
/// lifetime (spec.md §4.C: terminal states do not exist).
async fn run_supervisor(address: String, ctx: LinkContext, mut cmd_rx: mpsc::Receiver<LinkCommand>) {
    let link_cfg = ctx.config.link.clone();
    let mut first_disconnect: Option<Instant> = None;
    let mut failures_in_phase2: u32 = 0;

    loop {
        // Device addresses are bare IPs per spec.md §6; an address already
        // carrying a port (used by integration tests against a mock server
        // on an ephemeral port) is dialed as-is instead of appending :2565.
        let dial_target = if address.contains(':') {
            format!("ws://{address}/ws")
        } else {
            format!("ws://{address}:2565/ws")
        };
        let connect_result = tokio::time::timeout(
            Duration::from_millis(link_cfg.connect_timeout_ms),
            tokio_tungstenite::connect_async(&dial_target),
        )
        .await;

        match connect_result {
            Ok(Ok((ws, _response))) => {
                info!(address = %address, "homebase link open");
                first_disconnect = None;
                failures_in_phase2 = 0;

                run_open_session(&address, &ctx, &mut cmd_rx, ws).await;

                info!(address = %address, "homebase link closed, will reconnect");
            }
            Ok(Err(e)) => {
                warn!(address = %address, error = %e, "homebase dial failed");
            }
            Err(_) => {
                warn!(address = %address, "homebase dial timed out");
            }
        }

        let first = *first_disconnect.get_or_insert_with(Instant::now);
        let phase = backoff::phase_for_elapsed(&link_cfg, first.elapsed(), failures_in_phase2);
        if matches!(phase, BackoffPhase::SlowBackoff { .. }) {
            failures_in_phase2 += 1;
        }
        let delay = backoff::next_delay(&link_cfg, phase);
        debug!(address = %address, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Drive one Open session until it closes for any reason. Owns the
/// pending-request table and chunk assembler for the session's lifetime
/// (spec.md §3 ownership).
async fn run_open_session(
    address: &str,
    ctx: &LinkContext,
    cmd_rx: &mut mpsc::Receiver<LinkCommand>,
    ws: WsStream,
) {
    let link_cfg = &ctx.config.link;
    let (mut sink, mut stream) = ws.split();
    let mut pending = PendingTable::new(link_cfg.max_in_flight, link_cfg.max_queue);
    let mut chunks = ChunkAssembler::new();

    emit_status(ctx, address, "ess", "connected", "1").await;
    for key in SUBSCRIPTION_CATALOG {
        send_command(
            &mut sink,
            &OutboundCommand::Subscribe {
                pattern: (*key).to_owned(),
                every: ctx.config.subscribe_every_default,
            },
        )
        .await;
        send_command(
            &mut sink,
            &OutboundCommand::Touch {
                name: (*key).to_owned(),
            },
        )
        .await;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_millis(link_cfg.heartbeat_interval_ms));
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));
    let mut refresh = tokio::time::interval(Duration::from_secs(60));
    let mut poll = tokio::time::interval(Duration::from_secs(10));
    heartbeat.tick().await;
    watchdog.tick().await;
    refresh.tick().await;
    poll.tick().await;

    let mut last_inbound = Instant::now();
    let mut awaiting_pong: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(LinkCommand::Eval { script, timeout, reply }) => {
                        submit_eval(&mut pending, &mut sink, link_cfg.request_default_timeout_ms, script, timeout, reply).await;
                    }
                    None => {
                        info!(address = %address, "homebase link handle dropped, tearing down");
                        break;
                    }
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        handle_inbound_text(address, ctx, &mut pending, &mut chunks, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_inbound = Instant::now();
                        awaiting_pong = None;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_inbound = Instant::now();
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(address = %address, "homebase closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {
                        last_inbound = Instant::now();
                    }
                    Some(Err(e)) => {
                        warn!(address = %address, error = %e, "homebase link read error");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = Some(Instant::now());
            }

            _ = watchdog.tick() => {
                if let Some(since) = awaiting_pong {
                    if since.elapsed() >= Duration::from_millis(link_cfg.heartbeat_timeout_ms) {
                        warn!(address = %address, "homebase pong timeout");
                        break;
                    }
                }
                if last_inbound.elapsed() >= Duration::from_millis(link_cfg.stale_ms) {
                    warn!(address = %address, "homebase link stale, no inbound frames");
                    break;
                }
                pending.reap_expired();
                while let Some(ready) = pending.drain_one() {
                    send_command(
                        &mut sink,
                        &OutboundCommand::Eval {
                            script: ready.script,
                            request_id: ready.request_id,
                        },
                    )
                    .await;
                }
            }

            _ = refresh.tick() => {
                for key in SUBSCRIPTION_CATALOG {
                    send_command(&mut sink, &OutboundCommand::Touch { name: (*key).to_owned() }).await;
                }
            }

            _ = poll.tick() => {
                poll_device_state(ctx, address, &mut pending, &mut sink).await;
            }
        }
    }

    emit_status(ctx, address, "ess", "connected", "0").await;
    pending.reject_all();
    chunks.clear();
}

async fn submit_eval(
    pending: &mut PendingTable,
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    default_timeout_ms: u64,
    script: String,
    timeout: Option<Duration>,
    reply: oneshot::Sender<RequestOutcome>,
) {
    let request_id = Uuid::new_v4().to_string();
    let timeout = timeout.unwrap_or(Duration::from_millis(default_timeout_ms));
    if let Some(ready) = pending.submit(request_id, script, timeout, reply) {
        send_command(
            sink,
            &OutboundCommand::Eval {
                script: ready.script,
                request_id: ready.request_id,
            },
        )
        .await;
    }
    // Otherwise queued (drained by the watchdog tick) or resolved synchronously
    // with QueueFull by `submit` itself.
}

/// Issue the two polling evals (spec.md §4.C Polling) and translate their
/// results into synthetic status entries without going through the normal
/// pending table, since there's no external caller waiting.
async fn poll_device_state(
    ctx: &LinkContext,
    address: &str,
    pending: &mut PendingTable,
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
) {
    for (script, status_type) in [("pump_voltage", "24v-v"), ("charging", "charging")] {
        let (reply, rx) = oneshot::channel();
        let request_id = Uuid::new_v4().to_string();
        if pending
            .submit(
                request_id.clone(),
                script.to_owned(),
                Duration::from_secs(10),
                reply,
            )
            .is_some()
        {
            send_command(
                sink,
                &OutboundCommand::Eval {
                    script: script.to_owned(),
                    request_id,
                },
            )
            .await;
        }

        let ctx = ctx.clone();
        let address = address.to_owned();
        let status_type = status_type.to_owned();
        tokio::spawn(async move {
            if let Ok(RequestOutcome::Ok(value)) = rx.await {
                let value = coerce_eval_result(&value);
                emit_status(&ctx, &address, "system", &status_type, &value).await;
            }
            // Failures are swallowed per spec.md §4.C Polling.
        });
    }
}

fn coerce_eval_result(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

async fn handle_inbound_text(
    address: &str,
    ctx: &LinkContext,
    pending: &mut PendingTable,
    chunks: &mut ChunkAssembler,
    text: &str,
) {
    let raw: RawInboundFrame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            debug!(address = %address, error = %e, "dropping malformed homebase frame");
            return;
        }
    };

    dispatch_classified(address, ctx, pending, chunks, raw.classify()).await;
}

fn dispatch_classified<'a>(
    address: &'a str,
    ctx: &'a LinkContext,
    pending: &'a mut PendingTable,
    chunks: &'a mut ChunkAssembler,
    frame: ClassifiedFrame,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        match frame {
            ClassifiedFrame::Response {
                request_id,
                ok,
                result,
                error,
            } => {
                if !ok {
                    if let Some(message) = &error {
                        ctx.broadcaster.publish(BrowserEvent::TclError {
                            data: message.clone(),
                        });
                    }
                }
                pending.resolve(&request_id, ok, result, error);
            }
            ClassifiedFrame::Datapoint { name, value } => {
                let translated = translate(&name, &value);
                let value = canonicalize_numeric(&translated.value);
                emit_status(ctx, address, &translated.source, &translated.entry_type, &value).await;
            }
            ClassifiedFrame::Chunk {
                message_id,
                chunk_index,
                total_chunks,
                data,
            } => match chunks.accept(&message_id, chunk_index, total_chunks, data) {
                ChunkOutcome::Complete(joined) => {
                    match serde_json::from_str::<RawInboundFrame>(&joined) {
                        Ok(reassembled) => {
                            dispatch_classified(address, ctx, pending, chunks, reassembled.classify()).await;
                        }
                        Err(e) => {
                            debug!(address = %address, error = %e, "chunked message did not parse as JSON");
                        }
                    }
                }
                ChunkOutcome::Pending => {}
                ChunkOutcome::InvalidTotal => {
                    warn!(address = %address, message_id = %message_id, "rejected chunk envelope with invalid totalChunks");
                }
            },
            ClassifiedFrame::ControlAck { action } => {
                debug!(address = %address, action = ?action, "control ack (suppressed)");
            }
            ClassifiedFrame::Unrecognized => {
                debug!(address = %address, "unrecognized inbound frame");
            }
        }
    })
}

async fn emit_status(ctx: &LinkContext, host: &str, source: &str, entry_type: &str, value: &str) {
    let sys_time = chrono::Utc::now().to_rfc3339();
    match ctx.cache.apply(host, source, entry_type, value, &sys_time).await {
        UpdateOutcome::Changed(entry) => {
            ctx.status_writer.write(&entry).await;
            ctx.broadcaster
                .publish(BrowserEvent::StatusChange { data: entry });
        }
        UpdateOutcome::Unchanged => {}
    }
}

async fn send_command(
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    command: &OutboundCommand,
) {
    let Ok(json) = serde_json::to_string(command) else {
        return;
    };
    let _ = sink.send(Message::Text(json.into())).await;
}
