//! Realtime API protocol module.
//!
//! This module speaks the realtime WebSocket protocol: JSON events in both
//! directions, audio carried as base64 PCM16 inside those events.
//!
//! # Features
//!
//! - Session configuration with partial updates
//! - Streaming microphone input with server or manual turn detection
//! - Conversation reconstruction from streamed deltas
//! - Server-initiated function calling
//! - Observer API for protocol frames and conversation changes
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.

mod client;
mod config;
mod conversation;
mod events;
mod messages;

pub use client::{ClientOptions, RealtimeClient};
pub use config::{AudioFormat, DEFAULT_REALTIME_MODEL, Modality, REALTIME_URL, RealtimeVoice};
pub use conversation::{
    Conversation, ConversationItem, FormattedItem, FormattedTool, ItemDelta, ProcessOutcome,
};
pub use events::{EventBus, EventSource, RealtimeEvent, Subscription};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ContentType, InputAudioTranscription, ItemPayload,
    ItemRole, ItemStatus, ItemType, MaxTokens, Response, ResponseConfig, ServerEvent, Session,
    SessionConfig, SessionPayload, TurnDetection,
};
