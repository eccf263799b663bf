//! Realtime protocol client.
//!
//! [`RealtimeClient`] owns one WebSocket connection to a realtime endpoint,
//! keeps the session configuration and tool registry in sync with the server,
//! folds every inbound event into a [`Conversation`], and runs server-initiated
//! tool calls.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! # Example
//!
//! ```rust,ignore
//! use geovoice_realtime::core::realtime::{ClientOptions, RealtimeClient, RealtimeEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = RealtimeClient::new(ClientOptions {
//!         api_key: Some("sk-...".to_string()),
//!         ..Default::default()
//!     });
//!     let mut events = client.subscribe();
//!
//!     client.connect().await?;
//!     client.wait_for_session_created().await?;
//!     client.send_user_message_content(vec![ContentPart::input_text("Where is Kilimanjaro?")])?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let RealtimeEvent::ItemCompleted { item } = event {
//!             println!("{}", item.formatted.transcript);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{DEFAULT_REALTIME_MODEL, REALTIME_URL};
use super::conversation::{Conversation, ConversationItem, FormattedTool};
use super::events::{EventBus, EventSource, RealtimeEvent, Subscription};
use super::messages::{
    ClientEvent, ContentPart, ContentType, ItemPayload, ResponseConfig, ServerEvent,
    SessionConfig, SessionPayload,
};
use crate::core::realtime::base::{
    ConnectionState, DEFAULT_SAMPLE_RATE, RealtimeError, RealtimeResult, RetryConfig,
};
use crate::core::realtime::codec::{float_to_pcm16, samples_to_ms};
use crate::core::realtime::tools::{
    ToolCallContext, ToolDefinition, ToolHandler, ToolOutputError, ToolRegistry,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Client Options
// =============================================================================

/// Connection options for [`RealtimeClient`].
#[derive(Clone)]
pub struct ClientOptions {
    /// WebSocket endpoint, without the `model` query parameter
    pub url: String,
    /// Model requested on connect
    pub model: String,
    /// API key sent as a WebSocket subprotocol. `None` for relays that
    /// authenticate on their own.
    pub api_key: Option<String>,
    /// Backoff policy for [`RealtimeClient::reconnect`]
    pub retry: RetryConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            api_key: None,
            retry: RetryConfig::default(),
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("retry", &self.retry)
            .finish()
    }
}

impl ClientOptions {
    /// Endpoint URL with the model query parameter appended.
    pub fn endpoint(&self) -> RealtimeResult<url::Url> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid url: {}", e)))?;
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }

    fn build_request(&self) -> RealtimeResult<Request> {
        let endpoint = self.endpoint()?;
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        if let Some(api_key) = self.api_key.as_deref() {
            let protocols = format!(
                "realtime, openai-insecure-api-key.{}, openai-beta.realtime-v1",
                api_key
            );
            let value = HeaderValue::from_str(&protocols).map_err(|_| {
                RealtimeError::InvalidConfiguration(
                    "api key contains characters not allowed in a header".to_string(),
                )
            })?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        Ok(request)
    }
}

// =============================================================================
// Realtime Client
// =============================================================================

/// Realtime protocol client.
///
/// Cloning is cheap; all clones share one connection and one conversation.
///
/// # Thread Safety
///
/// State lives behind `parking_lot` locks that are never held across an
/// await point, so every method except [`connect`](Self::connect),
/// [`reconnect`](Self::reconnect) and the `wait_for_*` helpers is
/// synchronous. Outbound frames go through an unbounded channel to the
/// connection task, which writes them in send order.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: ClientOptions,
    state: RwLock<ConnectionState>,
    /// Bumped on every connect and teardown. Work started under an older
    /// epoch must not touch the current connection.
    epoch: AtomicU64,
    session_created: watch::Sender<bool>,
    session_id: RwLock<Option<String>>,
    session: RwLock<SessionConfig>,
    tools: RwLock<ToolRegistry>,
    /// Also serializes connect, teardown and inbound folds.
    conversation: Mutex<Conversation>,
    input_audio: Mutex<Vec<i16>>,
    dispatched_calls: Mutex<HashSet<String>>,
    ws_sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    events: Arc<EventBus>,
}

impl Default for RealtimeClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("options", &self.inner.options)
            .field("state", &self.connection_state())
            .field("session_id", &self.session_id())
            .finish()
    }
}

impl RealtimeClient {
    pub fn new(options: ClientOptions) -> Self {
        let (session_created, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                options,
                state: RwLock::new(ConnectionState::Disconnected),
                epoch: AtomicU64::new(0),
                session_created,
                session_id: RwLock::new(None),
                session: RwLock::new(SessionConfig::with_defaults()),
                tools: RwLock::new(ToolRegistry::new()),
                conversation: Mutex::new(Conversation::new()),
                input_audio: Mutex::new(Vec::new()),
                dispatched_calls: Mutex::new(HashSet::new()),
                ws_sender: Mutex::new(None),
                connection_handle: Mutex::new(None),
                events: EventBus::new(),
            }),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the WebSocket and send the initial `session.update`.
    ///
    /// Fails with [`RealtimeError::AlreadyConnected`] unless the client is
    /// disconnected.
    pub async fn connect(&self) -> RealtimeResult<()> {
        {
            let mut state = self.inner.state.write();
            if *state != ConnectionState::Disconnected {
                return Err(RealtimeError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let request = match self.inner.options.build_request() {
            Ok(request) => request,
            Err(e) => {
                self.inner.abandon_connect(epoch);
                return Err(e);
            }
        };

        info!("Connecting to realtime endpoint {}", self.inner.options.url);
        let ws_stream = match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                error!("Realtime connection failed: {}", e);
                self.inner.abandon_connect(epoch);
                return Err(RealtimeError::ConnectionFailed(e.to_string()));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        {
            let _lifecycle = self.inner.conversation.lock();
            if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                warn!("disconnect() called while connecting, dropping socket");
                return Err(RealtimeError::ConnectionFailed(
                    "disconnected while connecting".to_string(),
                ));
            }
            *self.inner.ws_sender.lock() = Some(tx);
            *self.inner.state.write() = ConnectionState::Connected;

            let handle = tokio::spawn(run_connection(
                Arc::downgrade(&self.inner),
                epoch,
                ws_stream,
                rx,
            ));
            *self.inner.connection_handle.lock() = Some(handle);
        }

        info!("Connected to realtime endpoint");
        self.inner.send_session_update()
    }

    /// Close the socket and drop all conversation state.
    ///
    /// Safe to call in any state. Tool results that finish afterwards are
    /// discarded.
    pub fn disconnect(&self) {
        let mut conversation = self.inner.conversation.lock();
        self.inner.teardown(&mut conversation);
        info!("Disconnected from realtime endpoint");
    }

    /// Disconnect, remove every tool and restore the default session config.
    pub fn reset(&self) {
        self.disconnect();
        self.inner.tools.write().clear();
        *self.inner.session.write() = SessionConfig::with_defaults();
    }

    /// Disconnect, then connect again following the configured [`RetryConfig`].
    pub async fn reconnect(&self) -> RealtimeResult<()> {
        self.disconnect();
        let retry = self.inner.options.retry.clone();
        let mut attempt: u32 = 0;

        loop {
            match self.connect().await {
                Ok(()) => {
                    if attempt > 0 {
                        info!("Reconnected after {} failed attempts", attempt);
                    }
                    return Ok(());
                }
                Err(RealtimeError::AlreadyConnected) => return Err(RealtimeError::AlreadyConnected),
                Err(e) => {
                    attempt += 1;
                    if !retry.should_retry(attempt) {
                        error!("Giving up reconnecting after {} attempts: {}", attempt, e);
                        return Err(e);
                    }
                    let delay_ms = retry.calculate_delay(attempt);
                    warn!(
                        "Reconnection attempt {} failed: {}, retrying in {}ms",
                        attempt, e, delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// Resolve once the server has sent `session.created`.
    ///
    /// If the client disconnects while waiting, this never resolves on its
    /// own; a later connection's `session.created` still wakes it.
    pub async fn wait_for_session_created(&self) -> RealtimeResult<()> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let mut created = self.inner.session_created.subscribe();
        let result = created.wait_for(|created| *created).await.map(|_| ());
        if result.is_err() {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.read() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Server-assigned session id, once `session.created` has arrived.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session_id.read().clone()
    }

    // -------------------------------------------------------------------------
    // Session and tools
    // -------------------------------------------------------------------------

    /// Current merged session configuration.
    pub fn session(&self) -> SessionConfig {
        self.inner.session.read().clone()
    }

    pub fn turn_detection_type(&self) -> Option<&'static str> {
        self.inner.session.read().turn_detection_type()
    }

    /// Merge `partial` into the session config and, when connected, push the
    /// full config to the server.
    pub fn update_session(&self, partial: SessionConfig) -> RealtimeResult<()> {
        self.inner.session.write().merge(partial);
        if self.is_connected() {
            self.inner.send_session_update()?;
        }
        Ok(())
    }

    /// Register a tool and advertise it.
    pub fn add_tool<H>(&self, definition: ToolDefinition, handler: H) -> RealtimeResult<()>
    where
        H: ToolHandler + 'static,
    {
        self.inner.tools.write().add(definition, Arc::new(handler))?;
        self.resend_tools()
    }

    pub fn remove_tool(&self, name: &str) -> RealtimeResult<()> {
        self.inner.tools.write().remove(name)?;
        self.resend_tools()
    }

    pub fn clear_tools(&self) -> RealtimeResult<()> {
        self.inner.tools.write().clear();
        self.resend_tools()
    }

    /// Definitions of the currently registered tools.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.inner.tools.read().definitions()
    }

    fn resend_tools(&self) -> RealtimeResult<()> {
        if self.is_connected() {
            self.inner.send_session_update()?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Send a raw client event.
    pub fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        self.inner.send_event(&event)
    }

    /// Stream microphone samples to the input audio buffer.
    pub fn append_input_audio(&self, samples: &[i16]) -> RealtimeResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut input_audio = self.inner.input_audio.lock();
        self.inner.send_event(&ClientEvent::audio_append(samples))?;
        input_audio.extend_from_slice(samples);
        Ok(())
    }

    /// Like [`append_input_audio`](Self::append_input_audio) for float samples.
    pub fn append_input_audio_f32(&self, samples: &[f32]) -> RealtimeResult<()> {
        self.append_input_audio(&float_to_pcm16(samples))
    }

    /// Drop uncommitted input audio locally and on the server.
    pub fn clear_input_audio(&self) -> RealtimeResult<()> {
        let mut conversation = self.inner.conversation.lock();
        let mut input_audio = self.inner.input_audio.lock();
        self.inner.send_event(&ClientEvent::InputAudioBufferClear)?;
        conversation.advance_input_audio(input_audio.len());
        input_audio.clear();
        Ok(())
    }

    /// Number of uncommitted input samples.
    pub fn input_audio_len(&self) -> usize {
        self.inner.input_audio.lock().len()
    }

    /// Add a user message and ask for a response.
    pub fn send_user_message_content(&self, content: Vec<ContentPart>) -> RealtimeResult<()> {
        if !content.is_empty() {
            self.inner.send_event(&ClientEvent::ConversationItemCreate {
                item: ItemPayload::user_message(content),
                previous_item_id: None,
            })?;
        }
        self.create_response()
    }

    /// Ask the server for a response.
    ///
    /// Without turn detection, buffered input audio is committed first and
    /// attached to the user item the commit produces.
    pub fn create_response(&self) -> RealtimeResult<()> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        if self.turn_detection_type().is_none() {
            let mut conversation = self.inner.conversation.lock();
            if let Some(buffered) = self.inner.commit_input_audio(&mut conversation)? {
                conversation.queue_input_audio(buffered);
            }
        }
        self.inner
            .send_event(&ClientEvent::ResponseCreate { response: None })
    }

    /// Cancel the in-flight response.
    ///
    /// With an item id, the item must be an assistant message with audio; its
    /// audio is truncated at `sample_count` samples (what the user actually
    /// heard). Returns the item that was truncated.
    pub fn cancel_response(
        &self,
        item_id: Option<&str>,
        sample_count: usize,
    ) -> RealtimeResult<Option<ConversationItem>> {
        let Some(item_id) = item_id else {
            self.inner.send_event(&ClientEvent::ResponseCancel)?;
            return Ok(None);
        };

        let item = self
            .item(item_id)
            .ok_or_else(|| RealtimeError::ItemNotFound(item_id.to_string()))?;
        let Some(content_index) = item
            .content
            .iter()
            .position(|part| part.content_type == ContentType::Audio)
            .filter(|_| item.is_assistant_audio())
        else {
            return Err(RealtimeError::InvalidItem(format!(
                "\"{}\" is not an assistant message with audio",
                item_id
            )));
        };

        self.inner.send_event(&ClientEvent::ResponseCancel)?;
        self.inner.send_event(&ClientEvent::ConversationItemTruncate {
            item_id: item_id.to_string(),
            content_index,
            audio_end_ms: samples_to_ms(sample_count, DEFAULT_SAMPLE_RATE),
        })?;
        Ok(Some(item))
    }

    pub fn delete_item(&self, item_id: &str) -> RealtimeResult<()> {
        self.inner.send_event(&ClientEvent::ConversationItemDelete {
            item_id: item_id.to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Conversation and events
    // -------------------------------------------------------------------------

    /// Snapshot of all conversation items in order.
    pub fn items(&self) -> Vec<ConversationItem> {
        self.inner.conversation.lock().items()
    }

    pub fn item(&self, id: &str) -> Option<ConversationItem> {
        self.inner.conversation.lock().get_item(id).cloned()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    /// Wait for the next item appended to the conversation.
    pub async fn wait_for_next_item(&self) -> Option<ConversationItem> {
        let mut events = self.subscribe();
        while let Some(event) = events.recv().await {
            if let RealtimeEvent::ItemAppended { item } = event {
                return Some(item);
            }
        }
        None
    }

    /// Wait for the next item that reaches `completed`.
    pub async fn wait_for_next_completed_item(&self) -> Option<ConversationItem> {
        let mut events = self.subscribe();
        while let Some(event) = events.recv().await {
            if let RealtimeEvent::ItemCompleted { item } = event {
                return Some(item);
            }
        }
        None
    }
}

// =============================================================================
// Shared State
// =============================================================================

impl ClientInner {
    fn send_event(&self, event: &ClientEvent) -> RealtimeResult<()> {
        let sender = self.ws_sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(RealtimeError::NotConnected);
        };
        self.write_envelope(tx, event)
    }

    /// Send only while the connection that started the work is still current.
    fn send_event_in_epoch(&self, epoch: u64, event: &ClientEvent) -> RealtimeResult<()> {
        let sender = self.ws_sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(RealtimeError::NotConnected);
        };
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(RealtimeError::NotConnected);
        }
        self.write_envelope(tx, event)
    }

    fn write_envelope(
        &self,
        tx: &mpsc::UnboundedSender<String>,
        event: &ClientEvent,
    ) -> RealtimeResult<()> {
        let event_id = format!("evt_{}", Uuid::new_v4().simple());
        let envelope = event.to_envelope(&event_id)?;
        let text = serde_json::to_string(&envelope)?;
        self.events
            .emit(RealtimeEvent::protocol(EventSource::Client, envelope));
        tx.send(text).map_err(|_| RealtimeError::NotConnected)?;
        debug!("Sent {} ({})", event.event_type(), event_id);
        Ok(())
    }

    fn send_session_update(&self) -> RealtimeResult<()> {
        let session = SessionPayload {
            config: self.session.read().clone(),
            tools: self.tools.read().definitions(),
        };
        self.send_event(&ClientEvent::SessionUpdate { session })
    }

    /// Reset the state a connect attempt claimed, unless it was superseded.
    fn abandon_connect(&self, epoch: u64) {
        let _lifecycle = self.conversation.lock();
        if self.epoch.load(Ordering::SeqCst) == epoch {
            *self.state.write() = ConnectionState::Disconnected;
        }
    }

    /// Caller holds the conversation lock.
    fn teardown(&self, conversation: &mut Conversation) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;
        // Dropping the sender ends the connection task, which closes the socket.
        self.ws_sender.lock().take();
        self.connection_handle.lock().take();
        conversation.clear();
        self.input_audio.lock().clear();
        self.dispatched_calls.lock().clear();
        *self.session_id.write() = None;
        self.session_created.send_replace(false);
    }

    /// Remote close or transport failure on the connection of `epoch`.
    fn socket_closed(&self, epoch: u64, reason: &str) {
        let mut conversation = self.conversation.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        warn!("Realtime socket closed: {}", reason);
        self.teardown(&mut conversation);
        self.events.emit(RealtimeEvent::protocol(
            EventSource::System,
            json!({"type": "socket.closed", "reason": reason}),
        ));
    }

    fn handle_frame(self: &Arc<Self>, epoch: u64, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping non-JSON frame: {}", e);
                return;
            }
        };

        let mut conversation = self.conversation.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Dropping frame from a closed connection");
            return;
        }

        self.events
            .emit(RealtimeEvent::protocol(EventSource::Server, value.clone()));

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>")
            .to_string();
        let event: ServerEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed {} event: {}", event_type, e);
                return;
            }
        };

        match &event {
            ServerEvent::SessionCreated { session } => {
                info!("Session created: {}", session.id);
                *self.session_id.write() = Some(session.id.clone());
                self.session_created.send_replace(true);
            }
            ServerEvent::SpeechStarted { .. } => {
                self.events.emit(RealtimeEvent::Interrupted);
            }
            ServerEvent::Error { error } => {
                warn!("Server error ({}): {}", error.error_type, error.message);
                self.events.emit(RealtimeEvent::Error {
                    error: error.clone(),
                });
            }
            ServerEvent::Unknown => debug!("Unhandled server event {}", event_type),
            _ => {}
        }

        let items_before = conversation.len();
        let outcome = {
            let input_audio = self.input_audio.lock();
            conversation.process(&event, &input_audio)
        };

        if let Some(item) = outcome.item {
            if conversation.len() > items_before {
                self.events.emit(RealtimeEvent::ItemAppended { item: item.clone() });
            }
            self.events.emit(RealtimeEvent::ConversationUpdated {
                item: item.clone(),
                delta: outcome.delta,
            });
            if outcome.completed {
                if let Some(tool) = item.formatted.tool.clone()
                    && item.is_function_call()
                {
                    self.dispatch_tool(epoch, tool);
                }
                self.events.emit(RealtimeEvent::ItemCompleted { item });
            }
        }

        if matches!(event, ServerEvent::SpeechStopped { .. }) {
            self.commit_after_speech(&mut conversation);
        }
    }

    /// Commit the input buffer and hand back what it held. `None` when the
    /// buffer is empty.
    ///
    /// The buffer stays locked from the commit until it is emptied, so audio
    /// appended concurrently lands in the next turn on both ends.
    fn commit_input_audio(
        &self,
        conversation: &mut Conversation,
    ) -> RealtimeResult<Option<Vec<i16>>> {
        let mut input_audio = self.input_audio.lock();
        if input_audio.is_empty() {
            return Ok(None);
        }
        self.send_event(&ClientEvent::InputAudioBufferCommit)?;
        let committed = std::mem::take(&mut *input_audio);
        conversation.advance_input_audio(committed.len());
        Ok(Some(committed))
    }

    /// Server VAD ended a turn: commit what was captured and ask for a reply.
    fn commit_after_speech(&self, conversation: &mut Conversation) {
        match self.commit_input_audio(conversation) {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to commit input audio: {}", e);
                return;
            }
        }

        let response = {
            let session = self.session.read();
            ResponseConfig {
                modalities: session.modalities.clone(),
                instructions: session.instructions.clone(),
                ..Default::default()
            }
        };
        if let Err(e) = self.send_event(&ClientEvent::ResponseCreate {
            response: Some(response),
        }) {
            warn!("Failed to request response after speech: {}", e);
        }
    }

    fn dispatch_tool(self: &Arc<Self>, epoch: u64, tool: FormattedTool) {
        if !self.dispatched_calls.lock().insert(tool.call_id.clone()) {
            debug!("Tool call {} already dispatched", tool.call_id);
            return;
        }
        let handler = self.tools.read().handler(&tool.name);
        let inner = Arc::clone(self);

        debug!("Dispatching tool {} ({})", tool.name, tool.call_id);
        tokio::spawn(async move {
            let output = run_tool(handler, &tool).await.to_string();

            let output_item = ClientEvent::ConversationItemCreate {
                item: ItemPayload::function_call_output(tool.call_id.clone(), output),
                previous_item_id: None,
            };
            if let Err(e) = inner.send_event_in_epoch(epoch, &output_item) {
                warn!("Dropping result of tool call {}: {}", tool.call_id, e);
                return;
            }
            if let Err(e) =
                inner.send_event_in_epoch(epoch, &ClientEvent::ResponseCreate { response: None })
            {
                warn!("Failed to request response after {}: {}", tool.call_id, e);
            }
        });
    }
}

/// Run a tool call to a JSON result. Every failure becomes an error payload.
async fn run_tool(handler: Option<Arc<dyn ToolHandler>>, tool: &FormattedTool) -> Value {
    let arguments: Value = match serde_json::from_str(&tool.arguments) {
        Ok(arguments) => arguments,
        Err(e) => {
            warn!("Malformed arguments for {}: {}", tool.name, e);
            return json!({
                "error": format!("invalid JSON arguments: {}", e),
                "raw": tool.arguments,
            });
        }
    };

    let Some(handler) = handler else {
        warn!("No handler registered for tool {}", tool.name);
        return json!({ "error": format!("tool \"{}\" has not been added", tool.name) });
    };

    let context = ToolCallContext {
        call_id: tool.call_id.clone(),
        name: tool.name.clone(),
    };
    match tokio::spawn(async move { handler.call(arguments, context).await }).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) if e.is::<ToolOutputError>() => {
            warn!("Failed to serialize output of {}: {}", tool.name, e);
            json!({ "error": "failed to serialize tool output" })
        }
        Ok(Err(e)) => {
            warn!("Tool {} failed: {}", tool.name, e);
            json!({ "error": e.to_string() })
        }
        Err(e) => {
            error!("Tool {} panicked: {}", tool.name, e);
            json!({ "error": format!("tool \"{}\" panicked", tool.name) })
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

async fn run_connection(
    inner: Weak<ClientInner>,
    epoch: u64,
    ws_stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                        error!("Failed to send WebSocket message: {}", e);
                        break format!("send failed: {}", e);
                    }
                }
                None => {
                    // disconnect() dropped the sender
                    if let Err(e) = ws_sink.close().await {
                        debug!("Error closing WebSocket: {}", e);
                    }
                    debug!("Realtime connection task ended");
                    return;
                }
            },

            message = ws_stream.next() => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                match message {
                    Some(Ok(Message::Text(text))) => inner.handle_frame(epoch, text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => inner.handle_frame(epoch, text),
                        Err(e) => warn!("Dropping binary frame that is not UTF-8: {}", e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("WebSocket closed by server");
                        break frame
                            .map(|f| format!("closed by server: {} {}", f.code, f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break e.to_string();
                    }
                    None => break "stream ended".to_string(),
                }
            }
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.socket_closed(epoch, &reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::openai::messages::TurnDetection;

    fn echo_definition() -> ToolDefinition {
        ToolDefinition::new("echo", "Echo", json!({"type": "object"}))
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = RealtimeClient::default();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client.session_id().is_none());
        assert!(client.items().is_empty());
        assert_eq!(client.session(), SessionConfig::with_defaults());
    }

    #[test]
    fn test_endpoint_appends_model() {
        let options = ClientOptions {
            url: "ws://127.0.0.1:9000/v1/realtime".to_string(),
            model: "test-model".to_string(),
            ..Default::default()
        };
        assert_eq!(
            options.endpoint().unwrap().as_str(),
            "ws://127.0.0.1:9000/v1/realtime?model=test-model"
        );

        let bad = ClientOptions {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            bad.endpoint(),
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_request_carries_api_key_subprotocol() {
        let options = ClientOptions {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let request = options.build_request().unwrap();
        assert_eq!(
            request.headers()["Sec-WebSocket-Protocol"],
            "realtime, openai-insecure-api-key.sk-test, openai-beta.realtime-v1"
        );

        let anonymous = ClientOptions::default().build_request().unwrap();
        assert!(!anonymous.headers().contains_key("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let options = ClientOptions {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", options);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_send_requires_connection() {
        let client = RealtimeClient::default();
        assert!(matches!(
            client.send(ClientEvent::ResponseCancel),
            Err(RealtimeError::NotConnected)
        ));
        assert!(matches!(
            client.create_response(),
            Err(RealtimeError::NotConnected)
        ));
        assert!(matches!(
            client.append_input_audio(&[1, 2, 3]),
            Err(RealtimeError::NotConnected)
        ));
        assert_eq!(client.input_audio_len(), 0);
    }

    #[test]
    fn test_append_empty_audio_is_noop() {
        let client = RealtimeClient::default();
        assert!(client.append_input_audio(&[]).is_ok());
    }

    #[test]
    fn test_update_session_while_disconnected() {
        let client = RealtimeClient::default();
        client
            .update_session(SessionConfig {
                instructions: Some("Answer about geography".to_string()),
                turn_detection: Some(TurnDetection::server_vad()),
                ..Default::default()
            })
            .unwrap();

        let session = client.session();
        assert_eq!(session.instructions.as_deref(), Some("Answer about geography"));
        assert_eq!(session.temperature, Some(0.8));
        assert_eq!(client.turn_detection_type(), Some("server_vad"));
    }

    #[test]
    fn test_tools_while_disconnected() {
        let client = RealtimeClient::default();
        let echo = |args: Value, _ctx: ToolCallContext| async move { Ok::<_, anyhow::Error>(args) };

        client.add_tool(echo_definition(), echo).unwrap();
        assert!(matches!(
            client.add_tool(echo_definition(), echo),
            Err(RealtimeError::ToolRegistration(_))
        ));
        assert_eq!(client.tools().len(), 1);

        client.remove_tool("echo").unwrap();
        assert!(client.remove_tool("echo").is_err());
        assert!(client.tools().is_empty());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let client = RealtimeClient::default();
        client
            .add_tool(echo_definition(), |args: Value, _ctx: ToolCallContext| async move {
                Ok::<_, anyhow::Error>(args)
            })
            .unwrap();
        client
            .update_session(SessionConfig {
                instructions: Some("custom".to_string()),
                ..Default::default()
            })
            .unwrap();

        client.reset();
        assert!(client.tools().is_empty());
        assert_eq!(client.session(), SessionConfig::with_defaults());
    }

    #[test]
    fn test_cancel_response_unknown_item() {
        let client = RealtimeClient::default();
        assert!(matches!(
            client.cancel_response(Some("missing"), 0),
            Err(RealtimeError::ItemNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_for_session_requires_connection() {
        let client = RealtimeClient::default();
        assert!(matches!(
            client.wait_for_session_created().await,
            Err(RealtimeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let client = RealtimeClient::new(ClientOptions {
            url: "ws://127.0.0.1:1/v1/realtime".to_string(),
            retry: RetryConfig::disabled(),
            ..Default::default()
        });
        assert!(matches!(
            client.connect().await,
            Err(RealtimeError::ConnectionFailed(_))
        ));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(client.reconnect().await.is_err());
    }

    #[tokio::test]
    async fn test_run_tool_outcomes() {
        let tool = |arguments: &str| FormattedTool {
            name: "echo".to_string(),
            call_id: "call_1".to_string(),
            arguments: arguments.to_string(),
        };
        let echo: Arc<dyn ToolHandler> =
            Arc::new(|args: Value, _ctx: ToolCallContext| async move { Ok::<_, anyhow::Error>(args) });
        let failing: Arc<dyn ToolHandler> = Arc::new(|_args: Value, _ctx: ToolCallContext| async move {
            Err::<Value, _>(anyhow::anyhow!("geocoder unavailable"))
        });

        assert_eq!(
            run_tool(Some(echo.clone()), &tool(r#"{"text":"hi"}"#)).await,
            json!({"text": "hi"})
        );

        let malformed = run_tool(Some(echo), &tool("{not json")).await;
        assert!(malformed["error"].as_str().unwrap().contains("invalid JSON"));
        assert_eq!(malformed["raw"], "{not json");

        let missing = run_tool(None, &tool("{}")).await;
        assert!(missing["error"].as_str().unwrap().contains("echo"));

        assert_eq!(
            run_tool(Some(failing), &tool("{}")).await,
            json!({"error": "geocoder unavailable"})
        );
    }

    #[tokio::test]
    async fn test_run_tool_unserializable_output() {
        let grid: Arc<dyn ToolHandler> = Arc::new(|_args: Value, _ctx: ToolCallContext| async move {
            Ok::<_, anyhow::Error>(std::collections::HashMap::from([((0u8, 0u8), "origin")]))
        });
        let result = run_tool(
            Some(grid),
            &FormattedTool {
                name: "grid".to_string(),
                call_id: "call_5".to_string(),
                arguments: "{}".to_string(),
            },
        )
        .await;
        assert_eq!(result, json!({"error": "failed to serialize tool output"}));
    }

    #[tokio::test]
    async fn test_run_tool_panic_becomes_error() {
        let panicking: Arc<dyn ToolHandler> =
            Arc::new(|_args: Value, _ctx: ToolCallContext| async move {
                if true {
                    panic!("boom");
                }
                Ok::<Value, anyhow::Error>(Value::Null)
            });
        let result = run_tool(
            Some(panicking),
            &FormattedTool {
                name: "explode".to_string(),
                call_id: "call_9".to_string(),
                arguments: "{}".to_string(),
            },
        )
        .await;
        assert!(result["error"].as_str().unwrap().contains("panicked"));
    }
}
