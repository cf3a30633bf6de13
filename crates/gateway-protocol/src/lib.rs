//! Wire types shared between the gateway, its homebase links, and browser
//! clients.
//!
//! Two independent protocols live here:
//!
//! - The **homebase protocol** (§6): JSON frames over a `tokio-tungstenite`
//!   client connection. Outbound commands are cleanly tagged by `cmd`;
//!   inbound frames are not — a response, a datapoint push, a chunk
//!   envelope, and a control ack are different shapes sharing no common
//!   tag, so they are deserialized into [`RawInboundFrame`] (all fields
//!   optional) and classified by [`RawInboundFrame::classify`].
//! - The **browser protocol** (§6): JSON frames over an axum WebSocket,
//!   tagged by `type` on the way out and by `msg_type` on the way in.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data model (spec.md §3)
// ---------------------------------------------------------------------------

/// A canonical `(host, source, type, value, timestamp)` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub host: String,
    pub source: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub value: String,
    pub sys_time: String,
}

/// Reachability/communications summary for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommStatusEntry {
    pub host: String,
    pub address: String,
    pub ping_avg: i64,
    pub ping_success: f64,
    pub last_ping: Option<String>,
    pub server_time: String,
}

/// One row of externally-computed performance statistics, re-broadcast
/// as-is. The gateway does not interpret `stats` beyond reading `trials`
/// to decide whether to drop a zero-trial row (spec.md §4.F).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfStatsEntry {
    pub host: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub subject: String,
    pub system: String,
    pub protocol: String,
    pub variant: String,
    pub trials: i64,
    #[serde(flatten)]
    pub stats: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Homebase protocol: outbound commands (spec.md §6)
// ---------------------------------------------------------------------------

/// Commands the gateway sends to a homebase over its WebSocket session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum OutboundCommand {
    Eval {
        script: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Subscribe {
        #[serde(rename = "match")]
        pattern: String,
        every: u32,
    },
    Unsubscribe {
        #[serde(rename = "match")]
        pattern: String,
    },
    Touch {
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Homebase protocol: inbound frames (spec.md §6)
// ---------------------------------------------------------------------------

/// Deserialization target for every inbound homebase frame shape.
///
/// All fields are optional because the four frame kinds (response,
/// datapoint push, chunk envelope, control ack) share no common tag.
/// Use [`RawInboundFrame::classify`] to turn this into a [`ClassifiedFrame`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawInboundFrame {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub status: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(rename = "type")]
    pub frame_type: Option<String>,
    pub name: Option<String>,
    pub dtype: Option<String>,
    pub data: Option<serde_json::Value>,
    #[serde(rename = "isChunkedMessage")]
    pub is_chunked_message: Option<bool>,
    #[serde(rename = "messageId")]
    pub message_id: Option<String>,
    #[serde(rename = "chunkIndex")]
    pub chunk_index: Option<usize>,
    #[serde(rename = "totalChunks")]
    pub total_chunks: Option<usize>,
    pub action: Option<String>,
}

/// A frame, classified by shape, ready for dispatch.
#[derive(Debug, Clone)]
pub enum ClassifiedFrame {
    /// Response to a previously-sent `eval` (or any correlated command).
    Response {
        request_id: String,
        ok: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
    /// A pushed `{type:"datapoint", name, data}` frame.
    Datapoint { name: String, value: String },
    /// One chunk of a chunked envelope.
    Chunk {
        message_id: String,
        chunk_index: usize,
        total_chunks: usize,
        data: String,
    },
    /// A control ack with no further action required, beyond suppressed
    /// logging (spec.md §4.C).
    ControlAck { action: Option<String> },
    /// Recognized as none of the above; dropped with a log at the caller.
    Unrecognized,
}

impl RawInboundFrame {
    pub fn classify(self) -> ClassifiedFrame {
        if let Some(request_id) = self.request_id {
            let ok = self.status.as_deref() == Some("ok");
            return ClassifiedFrame::Response {
                request_id,
                ok,
                result: self.result,
                error: self.error,
            };
        }
        if self.is_chunked_message == Some(true) {
            let (Some(message_id), Some(chunk_index), Some(total_chunks), Some(data)) = (
                self.message_id,
                self.chunk_index,
                self.total_chunks,
                self.data.as_ref().and_then(|v| v.as_str()).map(str::to_owned),
            ) else {
                return ClassifiedFrame::Unrecognized;
            };
            return ClassifiedFrame::Chunk {
                message_id,
                chunk_index,
                total_chunks,
                data,
            };
        }
        if self.frame_type.as_deref() == Some("datapoint") {
            let Some(name) = self.name else {
                return ClassifiedFrame::Unrecognized;
            };
            let value = match self.data {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return ClassifiedFrame::Datapoint { name, value };
        }
        if self.status.is_some() || self.action.is_some() {
            return ClassifiedFrame::ControlAck {
                action: self.action,
            };
        }
        ClassifiedFrame::Unrecognized
    }
}

// ---------------------------------------------------------------------------
// Browser protocol: server -> browser (spec.md §6)
// ---------------------------------------------------------------------------

/// Every frame the gateway can send to a connected browser session.
///
/// Wire tags are a mix of `snake_case`, `camelCase`, and one
/// `SCREAMING_SNAKE_CASE` (`TCL_ERROR`) tag, matching the frozen wire
/// contract in spec.md §6 exactly rather than a uniform renaming scheme.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum BrowserEvent {
    #[serde(rename = "status")]
    StatusSnapshot { data: Vec<StatusEntry> },
    #[serde(rename = "commStatus")]
    CommStatusSnapshot { data: Vec<CommStatusEntry> },
    #[serde(rename = "perfStats")]
    PerfStatsSnapshot { data: Vec<PerfStatsEntry> },
    #[serde(rename = "status_changes")]
    StatusChange { data: StatusEntry },
    #[serde(rename = "comm_status_changes")]
    CommStatusChange { data: CommStatusEntry },
    #[serde(rename = "perf_stats_changes")]
    PerfStatsChange { data: PerfStatsEntry },
    #[serde(rename = "TCL_ERROR")]
    TclError { data: String },
    #[serde(rename = "cmd_ok")]
    CmdOk {
        kind: String,
        ip: String,
        result: serde_json::Value,
    },
    #[serde(rename = "cmd_error")]
    CmdError { kind: String, ip: String, error: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "sql_table")]
    SqlTable { result: Vec<serde_json::Value> },
    #[serde(rename = "listbox_options")]
    ListboxOptions { result: Vec<String> },
    #[serde(rename = "log_entry")]
    LogEntry { entry: String },
}

// ---------------------------------------------------------------------------
// Browser protocol: browser -> server (spec.md §6)
// ---------------------------------------------------------------------------

/// A request frame from a browser client.
///
/// `msg` is kept as an opaque [`serde_json::Value`] because its shape
/// depends on `msg_type`; the browser session handler parses it per-kind
/// (spec.md §4.H).
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserRequest {
    pub msg_type: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub msg: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_response_ok() {
        let raw: RawInboundFrame = serde_json::from_str(
            r#"{"requestId":"R1","status":"ok","result":"3.3"}"#,
        )
        .unwrap();
        match raw.classify() {
            ClassifiedFrame::Response { request_id, ok, result, .. } => {
                assert_eq!(request_id, "R1");
                assert!(ok);
                assert_eq!(result, Some(serde_json::json!("3.3")));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classify_response_error() {
        let raw: RawInboundFrame = serde_json::from_str(
            r#"{"requestId":"R1","status":"error","error":"bad script"}"#,
        )
        .unwrap();
        match raw.classify() {
            ClassifiedFrame::Response { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.as_deref(), Some("bad script"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classify_datapoint() {
        let raw: RawInboundFrame = serde_json::from_str(
            r#"{"type":"datapoint","name":"ess/subject","timestamp":0,"dtype":"string","data":"sally"}"#,
        )
        .unwrap();
        match raw.classify() {
            ClassifiedFrame::Datapoint { name, value } => {
                assert_eq!(name, "ess/subject");
                assert_eq!(value, "sally");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classify_chunk() {
        let raw: RawInboundFrame = serde_json::from_str(
            r#"{"isChunkedMessage":true,"messageId":"m","chunkIndex":1,"totalChunks":3,"data":"ype"}"#,
        )
        .unwrap();
        match raw.classify() {
            ClassifiedFrame::Chunk { message_id, chunk_index, total_chunks, data } => {
                assert_eq!(message_id, "m");
                assert_eq!(chunk_index, 1);
                assert_eq!(total_chunks, 3);
                assert_eq!(data, "ype");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classify_control_ack() {
        let raw: RawInboundFrame =
            serde_json::from_str(r#"{"status":"ok","action":"subscribe"}"#).unwrap();
        assert!(matches!(
            raw.classify(),
            ClassifiedFrame::ControlAck { action: Some(a) } if a == "subscribe"
        ));
    }

    #[test]
    fn outbound_command_tags_match_wire_contract() {
        let eval = OutboundCommand::Eval {
            script: "set x 1".to_owned(),
            request_id: "R1".to_owned(),
        };
        let json = serde_json::to_value(&eval).unwrap();
        assert_eq!(json["cmd"], "eval");
        assert_eq!(json["requestId"], "R1");

        let sub = OutboundCommand::Subscribe {
            pattern: "ess/*".to_owned(),
            every: 1,
        };
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["cmd"], "subscribe");
        assert_eq!(json["match"], "ess/*");
    }

    #[test]
    fn tcl_error_tag_is_screaming_snake_case() {
        let event = BrowserEvent::TclError {
            data: "bad script".to_owned(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TCL_ERROR");
    }
}
