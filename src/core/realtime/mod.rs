//! Realtime voice protocol client.
//!
//! This module provides a client for the realtime bidirectional voice
//! protocol: a persistent WebSocket carrying JSON events, with audio encoded
//! as base64 PCM16 inside them.
//!
//! # Architecture
//!
//! - `codec` - PCM16 / base64 / WAV helpers
//! - `tools` - function tools the model may call
//! - `openai` - wire messages, conversation store, observer bus and the
//!   [`RealtimeClient`] that ties them together
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz.
//!
//! # Example
//!
//! ```rust,ignore
//! use geovoice_realtime::core::realtime::{
//!     ClientOptions, RealtimeClient, ToolCallContext, ToolDefinition,
//! };
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = RealtimeClient::new(ClientOptions::default());
//!     client.add_tool(
//!         ToolDefinition::new("geocode", "Resolve a place name", json!({"type": "object"})),
//!         |args: Value, _ctx: ToolCallContext| async move {
//!             Ok(json!({"lat": -3.07, "lon": 37.35, "query": args["place"]}))
//!         },
//!     )?;
//!     client.connect().await?;
//!     client.wait_for_session_created().await?;
//!     Ok(())
//! }
//! ```

mod base;
pub mod codec;
pub mod openai;
pub mod tools;

pub use base::{
    ConnectionState, DEFAULT_SAMPLE_RATE, RealtimeError, RealtimeResult, RetryConfig,
};
pub use openai::{
    ClientEvent, ClientOptions, ContentPart, Conversation, ConversationItem, EventSource,
    ItemDelta, RealtimeClient, RealtimeEvent, RealtimeVoice, ServerEvent, SessionConfig,
    Subscription, TurnDetection,
};
pub use tools::{ToolCallContext, ToolDefinition, ToolHandler, ToolOutputError, ToolRegistry};
