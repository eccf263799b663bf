//! WebSocket Mock Server for the Realtime API
//!
//! Accepts one client connection at a time. Commands queued with
//! [`MockRealtimeServer::send`] are delivered to the current connection, or to
//! the next one if no client is connected yet.

use super::MockStats;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// How long helpers wait for a client frame before failing the test
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// What the client sent during the opening handshake
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub protocols: Option<String>,
}

enum ServerCommand {
    Send(Value),
    Close,
}

/// Realtime Mock Server State
struct RealtimeMockState {
    auto_session: bool,
    stats: MockStats,
    handshakes: parking_lot::Mutex<Vec<Handshake>>,
    frames: mpsc::UnboundedSender<Value>,
    commands: Mutex<mpsc::UnboundedReceiver<ServerCommand>>,
}

pub struct MockRealtimeServer {
    pub url: String,
    state: Arc<RealtimeMockState>,
    frames: Mutex<mpsc::UnboundedReceiver<Value>>,
    commands: mpsc::UnboundedSender<ServerCommand>,
    handle: JoinHandle<()>,
}

impl MockRealtimeServer {
    /// Start a server that greets every connection with `session.created`.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Start a server that stays silent until told otherwise.
    pub async fn start_without_session() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(auto_session: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock realtime server");
        let addr = listener.local_addr().expect("mock server address");

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RealtimeMockState {
            auto_session,
            stats: MockStats::default(),
            handshakes: parking_lot::Mutex::new(Vec::new()),
            frames: frames_tx,
            commands: Mutex::new(commands_rx),
        });

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    handle_connection(stream, state).await;
                });
            }
        });

        Self {
            url: format!("ws://{}/v1/realtime", addr),
            state,
            frames: Mutex::new(frames_rx),
            commands: commands_tx,
            handle,
        }
    }

    /// Queue a server event for the current (or next) connection.
    pub fn send(&self, event: Value) {
        let _ = self.commands.send(ServerCommand::Send(event));
    }

    /// Close the current connection from the server side.
    pub fn close(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    /// Script a complete function call: item created, one arguments delta,
    /// then the completed output item.
    pub fn send_function_call(&self, item_id: &str, call_id: &str, name: &str, arguments: &str) {
        self.send(json!({
            "type": "conversation.item.created",
            "event_id": format!("event_{}_created", item_id),
            "item": {
                "id": item_id,
                "type": "function_call",
                "status": "in_progress",
                "call_id": call_id,
                "name": name,
                "arguments": ""
            }
        }));
        self.send(json!({
            "type": "response.function_call_arguments.delta",
            "event_id": format!("event_{}_delta", item_id),
            "item_id": item_id,
            "call_id": call_id,
            "delta": arguments
        }));
        self.send_function_call_done(item_id, call_id, name, arguments);
    }

    pub fn send_function_call_done(&self, item_id: &str, call_id: &str, name: &str, arguments: &str) {
        self.send(json!({
            "type": "response.output_item.done",
            "event_id": format!("event_{}_done", item_id),
            "response_id": "resp_1",
            "item": {
                "id": item_id,
                "type": "function_call",
                "status": "completed",
                "call_id": call_id,
                "name": name,
                "arguments": arguments
            }
        }));
    }

    /// Next frame the client sent, in order.
    pub async fn next_frame(&self) -> Value {
        let mut frames = self.frames.lock().await;
        tokio::time::timeout(FRAME_TIMEOUT, frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("mock server frame channel closed")
    }

    /// Skip frames until one of the given type arrives.
    pub async fn next_frame_of_type(&self, event_type: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == event_type {
                return frame;
            }
        }
    }

    /// Collect every frame that arrives within `window`.
    pub async fn drain_frames(&self, window: Duration) -> Vec<Value> {
        let mut frames = self.frames.lock().await;
        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.recv()).await {
            collected.push(frame);
        }
        collected
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.state.handshakes.lock().clone()
    }

    pub fn connections_opened(&self) -> u64 {
        self.state.stats.opened()
    }

    /// Wait until `count` connections have been closed.
    pub async fn wait_for_closed(&self, count: u64) {
        tokio::time::timeout(FRAME_TIMEOUT, async {
            while self.state.stats.closed() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("connections still open: {}", self.state.stats.summary()));
    }
}

impl Drop for MockRealtimeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// `session.created` for the n-th connection
pub fn session_created(connection: u64) -> Value {
    json!({
        "type": "session.created",
        "event_id": format!("event_session_{}", connection),
        "session": {
            "id": format!("sess_{}", connection),
            "object": "realtime.session",
            "model": "gpt-4o-realtime-preview-2024-10-01",
            "modalities": ["text", "audio"]
        }
    })
}

/// Handle a single realtime connection
async fn handle_connection(stream: TcpStream, state: Arc<RealtimeMockState>) {
    let handshake_state = state.clone();
    let callback = move |request: &Request,
                         mut response: Response|
          -> Result<Response, ErrorResponse> {
        let protocols = request
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if protocols.is_some() {
            response
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("realtime"));
        }
        handshake_state.handshakes.lock().push(Handshake {
            uri: request.uri().to_string(),
            protocols,
        });
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("Realtime mock handshake failed: {}", e);
            return;
        }
    };
    let connection = state.stats.record_open();
    let (mut write, mut read) = ws_stream.split();

    if state.auto_session {
        let _ = write
            .send(Message::Text(session_created(connection).to_string().into()))
            .await;
        state.stats.record_sent();
    }

    let mut commands = state.commands.lock().await;
    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.stats.record_received();
                    if let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = state.frames.send(frame);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Some(ServerCommand::Send(event)) => {
                    if write.send(Message::Text(event.to_string().into())).await.is_err() {
                        break;
                    }
                    state.stats.record_sent();
                }
                Some(ServerCommand::Close) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                None => break,
            },
        }
    }

    drop(commands);
    state.stats.record_close();
}
