// mock_ws_server: A mock homebase endpoint for testing the gateway's
// Homebase Link.
//
// Binds `ws://127.0.0.1:<port>` and accepts one connection at a time,
// auto-acking `subscribe`/`unsubscribe`/`touch` commands and recording
// every frame it receives so tests can assert on what the gateway sent.
// `eval` requests are NOT auto-answered — tests call `respond_ok`/
// `respond_error` to control exactly what the gateway's pending-request
// table resolves with.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    Message,
>;

/// A mock homebase server for integration testing of the Homebase Link.
pub struct MockHomebaseServer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
    write: Arc<AsyncMutex<Option<WsWrite>>>,
    received: Arc<std::sync::Mutex<Vec<Value>>>,
}

impl MockHomebaseServer {
    /// Start the mock server, binding to a random available port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let write: Arc<AsyncMutex<Option<WsWrite>>> = Arc::new(AsyncMutex::new(None));
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));

        let write_for_task = write.clone();
        let received_for_task = received.clone();
        let task = tokio::spawn(async move {
            Self::accept_loop(listener, write_for_task, received_for_task).await;
        });

        Ok(Self {
            addr,
            _task: task,
            write,
            received,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every frame received so far, in arrival order.
    pub fn received_frames(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Send an unsolicited datapoint push.
    pub async fn push_datapoint(&self, name: &str, value: &str) {
        self.send(json!({
            "type": "datapoint",
            "name": name,
            "timestamp": 0,
            "dtype": "string",
            "data": value,
        }))
        .await;
    }

    /// Send a chunked envelope, one frame per chunk, in the given order.
    pub async fn push_chunked(&self, message_id: &str, chunks: &[&str]) {
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            self.send(json!({
                "isChunkedMessage": true,
                "messageId": message_id,
                "chunkIndex": i,
                "totalChunks": total,
                "data": chunk,
                "isLastChunk": i + 1 == total,
            }))
            .await;
        }
    }

    /// Answer a pending `eval` with a successful result.
    pub async fn respond_ok(&self, request_id: &str, result: Value) {
        self.send(json!({ "requestId": request_id, "status": "ok", "result": result }))
            .await;
    }

    /// Answer a pending `eval` with an error.
    pub async fn respond_error(&self, request_id: &str, message: &str) {
        self.send(json!({ "requestId": request_id, "status": "error", "error": message }))
            .await;
    }

    /// Send an arbitrary raw frame.
    pub async fn send(&self, frame: Value) {
        let mut guard = self.write.lock().await;
        if let Some(write) = guard.as_mut() {
            let _ = write.send(Message::Text(frame.to_string().into())).await;
        }
    }

    /// Forcibly drop the current connection, simulating a link loss.
    pub async fn drop_connection(&self) {
        let mut guard = self.write.lock().await;
        if let Some(mut write) = guard.take() {
            let _ = write.close().await;
        }
    }

    async fn accept_loop(
        listener: TcpListener,
        write: Arc<AsyncMutex<Option<WsWrite>>>,
        received: Arc<std::sync::Mutex<Vec<Value>>>,
    ) {
        loop {
            let (stream, _peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let write = write.clone();
            let received = received.clone();
            tokio::spawn(async move {
                let _ = Self::handle_connection(stream, write, received).await;
            });
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        write: Arc<AsyncMutex<Option<WsWrite>>>,
        received: Arc<std::sync::Mutex<Vec<Value>>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (w, mut r) = ws_stream.split();
        *write.lock().await = Some(w);

        while let Some(msg_result) = r.next().await {
            let msg = msg_result?;
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                Message::Ping(data) => {
                    let mut guard = write.lock().await;
                    if let Some(w) = guard.as_mut() {
                        w.send(Message::Pong(data)).await?;
                    }
                    continue;
                }
                _ => continue,
            };

            let value: Value = serde_json::from_str(&text)?;
            received.lock().unwrap().push(value.clone());

            if let Some(cmd) = value.get("cmd").and_then(|v| v.as_str()) {
                if cmd != "eval" {
                    let mut guard = write.lock().await;
                    if let Some(w) = guard.as_mut() {
                        let ack = json!({ "status": "ok", "action": cmd });
                        w.send(Message::Text(ack.to_string().into())).await?;
                    }
                }
            }
        }

        *write.lock().await = None;
        Ok(())
    }
}
