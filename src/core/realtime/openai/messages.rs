//! Realtime WebSocket message types.
//!
//! This module defines the client and server event types of the realtime
//! protocol. All events are JSON-encoded text frames.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - input_audio_buffer.commit - Commit audio buffer
//! - input_audio_buffer.clear - Clear audio buffer
//! - conversation.item.create - Add item to conversation
//! - conversation.item.truncate - Truncate an item's audio
//! - conversation.item.delete - Delete conversation item
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events (received from server):
//! - error - Error occurred
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / speech_stopped / committed
//! - conversation.item.created / truncated / deleted
//! - conversation.item.input_audio_transcription.completed
//! - response.created / response.done
//! - response.output_item.added / done
//! - response.content_part.added
//! - response.text.delta, response.audio_transcript.delta, response.audio.delta
//! - response.function_call_arguments.delta
//!
//! Any other server event type deserializes to [`ServerEvent::Unknown`].

use serde::{Deserialize, Serialize};

use super::config::{AudioFormat, Modality, RealtimeVoice};
use crate::core::realtime::tools::ToolDefinition;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration.
///
/// Every field is optional so the same type doubles as a partial update:
/// [`SessionConfig::merge`] overlays the `Some` fields of a partial onto the
/// retained configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<RealtimeVoice>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<AudioFormat>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<AudioFormat>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration. [`TurnDetection::None`] goes out as `null`.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_turn_detection"
    )]
    pub turn_detection: Option<TurnDetection>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum response output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl SessionConfig {
    /// Configuration a fresh client starts from.
    pub fn with_defaults() -> Self {
        Self {
            modalities: Some(vec![Modality::Text, Modality::Audio]),
            instructions: Some(String::new()),
            voice: Some(RealtimeVoice::default()),
            input_audio_format: Some(AudioFormat::Pcm16),
            output_audio_format: Some(AudioFormat::Pcm16),
            input_audio_transcription: None,
            turn_detection: Some(TurnDetection::None {}),
            tool_choice: Some("auto".to_string()),
            temperature: Some(0.8),
            max_response_output_tokens: Some(MaxTokens::Number(4096)),
        }
    }

    /// Overlay every `Some` field of `partial` onto `self`.
    pub fn merge(&mut self, partial: SessionConfig) {
        let SessionConfig {
            modalities,
            instructions,
            voice,
            input_audio_format,
            output_audio_format,
            input_audio_transcription,
            turn_detection,
            tool_choice,
            temperature,
            max_response_output_tokens,
        } = partial;

        if modalities.is_some() {
            self.modalities = modalities;
        }
        if instructions.is_some() {
            self.instructions = instructions;
        }
        if voice.is_some() {
            self.voice = voice;
        }
        if input_audio_format.is_some() {
            self.input_audio_format = input_audio_format;
        }
        if output_audio_format.is_some() {
            self.output_audio_format = output_audio_format;
        }
        if input_audio_transcription.is_some() {
            self.input_audio_transcription = input_audio_transcription;
        }
        if turn_detection.is_some() {
            self.turn_detection = turn_detection;
        }
        if tool_choice.is_some() {
            self.tool_choice = tool_choice;
        }
        if temperature.is_some() {
            self.temperature = temperature;
        }
        if max_response_output_tokens.is_some() {
            self.max_response_output_tokens = max_response_output_tokens;
        }
    }

    /// Turn detection type name, or `None` when turn detection is off.
    pub fn turn_detection_type(&self) -> Option<&'static str> {
        match self.turn_detection {
            Some(TurnDetection::ServerVad { .. }) => Some("server_vad"),
            Some(TurnDetection::SemanticVad { .. }) => Some("semantic_vad"),
            Some(TurnDetection::None {}) | None => None,
        }
    }
}

fn serialize_turn_detection<S>(value: &Option<TurnDetection>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(TurnDetection::None {}) | None => serializer.serialize_none(),
        Some(detection) => detection.serialize(serializer),
    }
}

/// Body of a `session.update` event: the merged config plus the tools that
/// currently have a registered handler.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPayload {
    #[serde(flatten)]
    pub config: SessionConfig,
    pub tools: Vec<ToolDefinition>,
}

/// Maximum tokens configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    /// Specific number of tokens
    Number(u32),
    /// Unbounded, always the string "inf"
    Infinite(String),
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// Semantic VAD
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
    },
    /// No turn detection, turns are committed by the client
    #[serde(rename = "none")]
    None {},
}

impl TurnDetection {
    /// Server VAD with the server's defaults.
    pub fn server_vad() -> Self {
        TurnDetection::ServerVad {
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Kind of conversation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message,
    FunctionCall,
    FunctionCallOutput,
}

/// Author of a message item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
    System,
}

/// Lifecycle status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
    Incomplete,
    Failed,
}

/// Conversation item as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPayload {
    /// Item ID (absent on client-created items)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    /// Item role (message items only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ItemRole>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call and function call output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ItemPayload {
    /// User message carrying the given content parts.
    pub fn user_message(content: Vec<ContentPart>) -> Self {
        Self {
            id: None,
            item_type: ItemType::Message,
            status: None,
            role: Some(ItemRole::User),
            content: Some(content),
            call_id: None,
            name: None,
            arguments: None,
            output: None,
        }
    }

    /// Result of a function call, `output` being serialized JSON.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: None,
            item_type: ItemType::FunctionCallOutput,
            status: None,
            role: None,
            content: None,
            call_id: Some(call_id.into()),
            name: None,
            arguments: None,
            output: Some(output.into()),
        }
    }
}

/// Kind of content part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    InputText,
    InputAudio,
    Text,
    Audio,
    #[serde(other)]
    Unknown,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    /// `input_text` part.
    pub fn input_text(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::InputText,
            text: Some(text.into()),
            audio: None,
            transcript: None,
        }
    }

    /// `input_audio` part from PCM16 samples.
    pub fn input_audio(samples: &[i16]) -> Self {
        Self {
            content_type: ContentType::InputAudio,
            text: None,
            audio: Some(crate::core::realtime::codec::encode_pcm16(samples)),
            transcript: None,
        }
    }
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,
    /// System instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Voice for audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<RealtimeVoice>,
    /// Temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Max output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the realtime endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionPayload,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 audio
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ItemPayload,
        /// Previous item ID to insert after
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Truncate a conversation item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: usize,
        /// Audio end in ms
        audio_end_ms: u64,
    },

    /// Delete a conversation item
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete {
        /// Item ID
        item_id: String,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from PCM16 samples.
    pub fn audio_append(samples: &[i16]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: crate::core::realtime::codec::encode_pcm16(samples),
        }
    }

    /// Wire type tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ConversationItemTruncate { .. } => "conversation.item.truncate",
            ClientEvent::ConversationItemDelete { .. } => "conversation.item.delete",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }

    /// Serialize into a JSON object carrying the given `event_id`.
    pub fn to_envelope(&self, event_id: &str) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "event_id".to_string(),
                serde_json::Value::String(event_id.to_string()),
            );
        }
        Ok(value)
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the realtime endpoint.
///
/// Only the fields the client consumes are modelled; everything else in a
/// frame is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: Session,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: Session,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        audio_start_ms: u64,
        /// Item ID
        item_id: String,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        audio_end_ms: u64,
        /// Item ID
        item_id: String,
    },

    /// Input audio buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        /// Item ID the committed audio becomes
        item_id: String,
        /// Previous item ID
        #[serde(default)]
        previous_item_id: Option<String>,
    },

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        /// Previous item ID
        #[serde(default)]
        previous_item_id: Option<String>,
        /// Created item
        item: ItemPayload,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        item_id: String,
        /// Content index
        #[serde(default)]
        content_index: usize,
        /// Transcript text
        transcript: String,
    },

    /// Conversation item truncated
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        /// Item ID
        item_id: String,
        /// Content index
        #[serde(default)]
        content_index: usize,
        /// Audio end in ms
        audio_end_ms: u64,
    },

    /// Conversation item deleted
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted {
        /// Item ID
        item_id: String,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: Response,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: Response,
    },

    /// Output item added to response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Response ID
        response_id: String,
        /// Item
        item: ItemPayload,
    },

    /// Output item done
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        /// Response ID
        response_id: String,
        /// Item
        item: ItemPayload,
    },

    /// Content part added
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        /// Item ID
        item_id: String,
        /// Content index
        #[serde(default)]
        content_index: usize,
        /// Content part
        part: ContentPart,
    },

    /// Text delta
    #[serde(rename = "response.text.delta")]
    TextDelta {
        /// Item ID
        item_id: String,
        /// Content index
        #[serde(default)]
        content_index: usize,
        /// Text delta
        delta: String,
    },

    /// Audio transcript delta
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Item ID
        item_id: String,
        /// Content index
        #[serde(default)]
        content_index: usize,
        /// Transcript delta
        delta: String,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Item ID
        item_id: String,
        /// Content index
        #[serde(default)]
        content_index: usize,
        /// Base64-encoded PCM16 delta
        delta: String,
    },

    /// Function call arguments delta
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        /// Item ID
        item_id: String,
        /// Call ID
        #[serde(default)]
        call_id: Option<String>,
        /// Arguments delta
        delta: String,
    },

    /// Any event type the client does not consume
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information reported by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Session {
    /// Session ID
    pub id: String,
    /// Model used
    #[serde(default)]
    pub model: Option<String>,
    /// Response modalities
    #[serde(default)]
    pub modalities: Vec<Modality>,
}

/// Response information.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Response ID
    pub id: String,
    /// Response status
    #[serde(default)]
    pub status: Option<String>,
}
