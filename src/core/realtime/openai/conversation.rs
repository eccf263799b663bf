//! Conversation transcript reconstruction.
//!
//! The server streams a conversation as interleaved events: items are
//! created, content parts are added, text/transcript/audio/argument deltas
//! arrive per item, and the input side reports speech boundaries and late
//! transcriptions that may precede the item they belong to. [`Conversation`]
//! folds those events into an ordered list of [`ConversationItem`]s.
//!
//! Folding never fails. Events that reference unknown items are logged and
//! ignored; out-of-order transcript and speech-capture events are parked in
//! pending tables until their item appears.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::messages::{ContentPart, ContentType, ItemPayload, ItemRole, ItemStatus, ItemType, ServerEvent};
use crate::core::realtime::base::DEFAULT_SAMPLE_RATE;
use crate::core::realtime::codec::{decode_pcm16, merge_samples, ms_to_samples};

/// Tool call descriptor of a `function_call` item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormattedTool {
    pub name: String,
    pub call_id: String,
    /// Accumulated JSON argument text
    pub arguments: String,
}

/// Client-side rendering of an item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormattedItem {
    pub text: String,
    pub transcript: String,
    /// PCM16 samples at 24kHz
    pub audio: Vec<i16>,
    pub tool: Option<FormattedTool>,
    pub output: Option<String>,
}

/// A conversation item together with its formatted rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationItem {
    pub id: String,
    pub item_type: ItemType,
    pub role: Option<ItemRole>,
    pub status: ItemStatus,
    pub content: Vec<ContentPart>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    pub output: Option<String>,
    pub formatted: FormattedItem,
}

impl ConversationItem {
    /// Whether this item is a function call awaiting a tool result.
    pub fn is_function_call(&self) -> bool {
        self.item_type == ItemType::FunctionCall
    }

    /// Whether this item is an assistant message that carries an audio part.
    pub fn is_assistant_audio(&self) -> bool {
        self.item_type == ItemType::Message
            && self.role == Some(ItemRole::Assistant)
            && self
                .content
                .iter()
                .any(|part| part.content_type == ContentType::Audio)
    }

    fn from_payload(id: String, payload: &ItemPayload) -> Self {
        Self {
            id,
            item_type: payload.item_type,
            role: payload.role,
            status: payload.status.unwrap_or_default(),
            content: payload.content.clone().unwrap_or_default(),
            call_id: payload.call_id.clone(),
            name: payload.name.clone(),
            arguments: payload.arguments.clone(),
            output: payload.output.clone(),
            formatted: FormattedItem::default(),
        }
    }
}

/// Incremental change carried by a fold.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemDelta {
    Text(String),
    Transcript(String),
    Audio(Vec<i16>),
    Arguments(String),
}

/// Result of folding one server event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    /// Snapshot of the affected item, if any
    pub item: Option<ConversationItem>,
    pub delta: Option<ItemDelta>,
    /// The item reached `completed` with this event
    pub completed: bool,
}

impl ProcessOutcome {
    fn item(item: &ConversationItem) -> Self {
        Self {
            item: Some(item.clone()),
            delta: None,
            completed: false,
        }
    }

    fn delta(item: &ConversationItem, delta: ItemDelta) -> Self {
        Self {
            item: Some(item.clone()),
            delta: Some(delta),
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SpeechCapture {
    audio_start_ms: u64,
    audio_end_ms: Option<u64>,
    audio: Option<Vec<i16>>,
}

/// Ordered conversation state built from server events.
#[derive(Debug, Default)]
pub struct Conversation {
    items: HashMap<String, ConversationItem>,
    order: Vec<String>,
    responses: HashMap<String, Vec<String>>,
    pending_speech: HashMap<String, SpeechCapture>,
    pending_transcripts: HashMap<String, String>,
    queued_input_audio: Option<Vec<i16>>,
    /// Samples already committed or cleared from the input buffer. Server
    /// speech offsets count from session start, so they are shifted by this.
    input_audio_offset: usize,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all items and pending state.
    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
        self.responses.clear();
        self.pending_speech.clear();
        self.pending_transcripts.clear();
        self.queued_input_audio = None;
        self.input_audio_offset = 0;
    }

    /// Record that `samples` left the front of the input buffer.
    pub fn advance_input_audio(&mut self, samples: usize) {
        self.input_audio_offset += samples;
    }

    pub fn input_audio_offset(&self) -> usize {
        self.input_audio_offset
    }

    /// Park committed input audio for the next user message that has no
    /// speech capture of its own.
    pub fn queue_input_audio(&mut self, samples: Vec<i16>) {
        self.queued_input_audio = Some(samples);
    }

    /// Snapshot of all items in creation order.
    pub fn items(&self) -> Vec<ConversationItem> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id))
            .cloned()
            .collect()
    }

    pub fn get_item(&self, id: &str) -> Option<&ConversationItem> {
        self.items.get(id)
    }

    /// Output item ids of a response, in arrival order.
    pub fn response_items(&self, response_id: &str) -> Option<&[String]> {
        self.responses.get(response_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fold one server event into the conversation.
    ///
    /// `input_audio` is the client's uncommitted microphone buffer; it is only
    /// read on `speech_stopped` to cut the captured span. Its first sample sits
    /// at [`input_audio_offset`](Self::input_audio_offset) on the session timeline.
    pub fn process(&mut self, event: &ServerEvent, input_audio: &[i16]) -> ProcessOutcome {
        match event {
            ServerEvent::ConversationItemCreated { item, .. } => self.item_created(item),

            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
                ..
            } => {
                let Some(item) = self.items.get_mut(item_id) else {
                    warn!("item.truncated: item \"{}\" not found", item_id);
                    return ProcessOutcome::default();
                };
                let end = ms_to_samples(*audio_end_ms, DEFAULT_SAMPLE_RATE)
                    .min(item.formatted.audio.len());
                item.formatted.audio.truncate(end);
                item.formatted.transcript.clear();
                ProcessOutcome::item(item)
            }

            ServerEvent::ConversationItemDeleted { item_id } => {
                let Some(item) = self.items.remove(item_id) else {
                    warn!("item.deleted: item \"{}\" not found", item_id);
                    return ProcessOutcome::default();
                };
                self.order.retain(|id| id != item_id);
                ProcessOutcome {
                    item: Some(item),
                    delta: None,
                    completed: false,
                }
            }

            ServerEvent::TranscriptionCompleted {
                item_id,
                content_index,
                transcript,
            } => {
                let formatted = if transcript.is_empty() {
                    " ".to_string()
                } else {
                    transcript.clone()
                };
                let Some(item) = self.items.get_mut(item_id) else {
                    debug!("Transcript for \"{}\" arrived before its item", item_id);
                    self.pending_transcripts.insert(item_id.clone(), formatted);
                    return ProcessOutcome::default();
                };
                if let Some(part) = item.content.get_mut(*content_index) {
                    part.transcript = Some(transcript.clone());
                }
                item.formatted.transcript = formatted;
                ProcessOutcome::delta(item, ItemDelta::Transcript(transcript.clone()))
            }

            ServerEvent::SpeechStarted {
                item_id,
                audio_start_ms,
            } => {
                self.pending_speech.insert(
                    item_id.clone(),
                    SpeechCapture {
                        audio_start_ms: *audio_start_ms,
                        ..Default::default()
                    },
                );
                ProcessOutcome::default()
            }

            ServerEvent::SpeechStopped {
                item_id,
                audio_end_ms,
            } => self.speech_stopped(item_id, *audio_end_ms, input_audio),

            ServerEvent::ResponseCreated { response } => {
                self.responses.entry(response.id.clone()).or_default();
                ProcessOutcome::default()
            }

            ServerEvent::OutputItemAdded { response_id, item } => {
                let Some(output) = self.responses.get_mut(response_id) else {
                    warn!("output_item.added: response \"{}\" not found", response_id);
                    return ProcessOutcome::default();
                };
                if let Some(id) = &item.id {
                    output.push(id.clone());
                }
                ProcessOutcome::default()
            }

            ServerEvent::OutputItemDone { item: payload, .. } => {
                let Some(id) = payload.id.as_deref() else {
                    warn!("output_item.done without item id");
                    return ProcessOutcome::default();
                };
                let Some(item) = self.items.get_mut(id) else {
                    warn!("output_item.done: item \"{}\" not found", id);
                    return ProcessOutcome::default();
                };
                if let Some(status) = payload.status {
                    item.status = status;
                }
                // Servers that skip argument deltas still deliver the full text here.
                if let (Some(tool), Some(arguments)) =
                    (item.formatted.tool.as_mut(), payload.arguments.as_ref())
                    && tool.arguments.is_empty()
                {
                    tool.arguments = arguments.clone();
                    item.arguments = Some(arguments.clone());
                }
                ProcessOutcome {
                    item: Some(item.clone()),
                    delta: None,
                    completed: item.status == ItemStatus::Completed,
                }
            }

            ServerEvent::ContentPartAdded { item_id, part, .. } => {
                let Some(item) = self.items.get_mut(item_id) else {
                    warn!("content_part.added: item \"{}\" not found", item_id);
                    return ProcessOutcome::default();
                };
                item.content.push(part.clone());
                ProcessOutcome::item(item)
            }

            ServerEvent::AudioTranscriptDelta {
                item_id,
                content_index,
                delta,
            } => {
                let Some(item) = self.items.get_mut(item_id) else {
                    warn!("audio_transcript.delta: item \"{}\" not found", item_id);
                    return ProcessOutcome::default();
                };
                if let Some(part) = item.content.get_mut(*content_index) {
                    part.transcript.get_or_insert_with(String::new).push_str(delta);
                }
                item.formatted.transcript.push_str(delta);
                ProcessOutcome::delta(item, ItemDelta::Transcript(delta.clone()))
            }

            ServerEvent::TextDelta {
                item_id,
                content_index,
                delta,
            } => {
                let Some(item) = self.items.get_mut(item_id) else {
                    warn!("text.delta: item \"{}\" not found", item_id);
                    return ProcessOutcome::default();
                };
                if let Some(part) = item.content.get_mut(*content_index) {
                    part.text.get_or_insert_with(String::new).push_str(delta);
                }
                item.formatted.text.push_str(delta);
                ProcessOutcome::delta(item, ItemDelta::Text(delta.clone()))
            }

            ServerEvent::AudioDelta { item_id, delta, .. } => {
                let Some(item) = self.items.get_mut(item_id) else {
                    warn!("audio.delta: item \"{}\" not found", item_id);
                    return ProcessOutcome::default();
                };
                let samples = match decode_pcm16(delta) {
                    Ok(samples) => samples,
                    Err(e) => {
                        warn!("audio.delta for \"{}\" is not valid base64: {}", item_id, e);
                        return ProcessOutcome::default();
                    }
                };
                item.formatted.audio = merge_samples(&item.formatted.audio, &samples);
                ProcessOutcome::delta(item, ItemDelta::Audio(samples))
            }

            ServerEvent::FunctionCallArgumentsDelta { item_id, delta, .. } => {
                let Some(item) = self.items.get_mut(item_id) else {
                    warn!("function_call_arguments.delta: item \"{}\" not found", item_id);
                    return ProcessOutcome::default();
                };
                item.arguments.get_or_insert_with(String::new).push_str(delta);
                if let Some(tool) = item.formatted.tool.as_mut() {
                    tool.arguments.push_str(delta);
                }
                ProcessOutcome::delta(item, ItemDelta::Arguments(delta.clone()))
            }

            ServerEvent::Error { .. }
            | ServerEvent::SessionCreated { .. }
            | ServerEvent::SessionUpdated { .. }
            | ServerEvent::InputAudioBufferCommitted { .. }
            | ServerEvent::ResponseDone { .. }
            | ServerEvent::Unknown => ProcessOutcome::default(),
        }
    }

    fn item_created(&mut self, payload: &ItemPayload) -> ProcessOutcome {
        let Some(id) = payload.id.clone() else {
            warn!("item.created without item id");
            return ProcessOutcome::default();
        };
        if let Some(existing) = self.items.get(&id) {
            debug!("Item \"{}\" already exists, keeping the first copy", id);
            return ProcessOutcome::item(existing);
        }

        let mut item = ConversationItem::from_payload(id.clone(), payload);

        for part in &item.content {
            if matches!(part.content_type, ContentType::Text | ContentType::InputText)
                && let Some(text) = &part.text
            {
                item.formatted.text.push_str(text);
            }
        }

        if let Some(transcript) = self.pending_transcripts.remove(&id) {
            item.formatted.transcript = transcript;
        }

        let mut captured = false;
        if self
            .pending_speech
            .get(&id)
            .is_some_and(|capture| capture.audio.is_some())
            && let Some(audio) = self.pending_speech.remove(&id).and_then(|c| c.audio)
        {
            item.formatted.audio = audio;
            captured = true;
        }

        match item.item_type {
            ItemType::Message => {
                if item.role == Some(ItemRole::User) {
                    item.status = ItemStatus::Completed;
                    if !captured && let Some(audio) = self.queued_input_audio.take() {
                        item.formatted.audio = audio;
                    }
                } else {
                    item.status = ItemStatus::InProgress;
                }
            }
            ItemType::FunctionCall => {
                item.formatted.tool = Some(FormattedTool {
                    name: item.name.clone().unwrap_or_default(),
                    call_id: item.call_id.clone().unwrap_or_default(),
                    arguments: String::new(),
                });
                item.status = ItemStatus::InProgress;
            }
            ItemType::FunctionCallOutput => {
                item.status = ItemStatus::Completed;
                item.formatted.output = item.output.clone();
            }
        }

        let completed = item.status == ItemStatus::Completed;
        self.order.push(id.clone());
        let outcome = ProcessOutcome {
            item: Some(item.clone()),
            delta: None,
            completed,
        };
        self.items.insert(id, item);
        outcome
    }

    fn speech_stopped(&mut self, item_id: &str, audio_end_ms: u64, input_audio: &[i16]) -> ProcessOutcome {
        let mut capture = self.pending_speech.remove(item_id).unwrap_or_else(|| SpeechCapture {
            audio_start_ms: audio_end_ms,
            ..Default::default()
        });
        capture.audio_end_ms = Some(audio_end_ms);

        let len = input_audio.len();
        let offset = self.input_audio_offset;
        let start = ms_to_samples(capture.audio_start_ms, DEFAULT_SAMPLE_RATE)
            .saturating_sub(offset)
            .min(len);
        let end = ms_to_samples(audio_end_ms, DEFAULT_SAMPLE_RATE)
            .saturating_sub(offset)
            .clamp(start, len);
        let audio = input_audio[start..end].to_vec();

        if let Some(item) = self.items.get_mut(item_id) {
            item.formatted.audio = audio;
            return ProcessOutcome::item(item);
        }

        capture.audio = Some(audio);
        self.pending_speech.insert(item_id.to_string(), capture);
        ProcessOutcome::default()
    }
}
