//! Configuration module for the geovoice realtime client
//!
//! This module loads client configuration from various sources: .env files,
//! YAML files, and environment variables. Priority: YAML > ENV vars > .env
//! values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `validation`: Configuration validation logic
//!
//! # Environment variables
//! - `REALTIME_URL` - WebSocket endpoint
//! - `REALTIME_MODEL` - model requested on connect
//! - `OPENAI_API_KEY` - API key
//! - `REALTIME_VOICE` - output voice
//! - `REALTIME_INSTRUCTIONS` - system instructions
//! - `REALTIME_TRANSCRIPTION_MODEL` - input transcription model
//! - `REALTIME_TURN_DETECTION` - `server_vad`, `semantic_vad` or `none`
//! - `REALTIME_TEMPERATURE` - sampling temperature
//!
//! # Example
//! ```rust,no_run
//! use geovoice_realtime::config::ClientSettings;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let settings = ClientSettings::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let settings = ClientSettings::from_file(Path::new("config.yaml"))?;
//!
//! println!("Connecting to {}", settings.url);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;

use thiserror::Error;

mod validation;
mod yaml;

pub use yaml::{RealtimeYaml, SessionYaml, YamlConfig};

use crate::core::realtime::openai::{InputAudioTranscription, SessionConfig};
use crate::core::realtime::{
    ClientOptions, RealtimeVoice, RetryConfig, TurnDetection,
    openai::{DEFAULT_REALTIME_MODEL, REALTIME_URL},
};

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Turn detection mode selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnDetectionMode {
    /// Server-side VAD commits turns
    ServerVad,
    /// Semantic VAD commits turns
    SemanticVad,
    /// The client commits turns
    #[default]
    Manual,
}

impl TurnDetectionMode {
    /// Parse a mode name
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "server_vad" | "server" => Ok(Self::ServerVad),
            "semantic_vad" | "semantic" => Ok(Self::SemanticVad),
            "none" | "manual" | "" => Ok(Self::Manual),
            other => Err(ConfigError::Invalid {
                key: "turn_detection",
                reason: format!(
                    "unknown mode '{}', expected server_vad, semantic_vad or none",
                    other
                ),
            }),
        }
    }

    fn to_turn_detection(self) -> TurnDetection {
        match self {
            Self::ServerVad => TurnDetection::server_vad(),
            Self::SemanticVad => TurnDetection::SemanticVad { eagerness: None },
            Self::Manual => TurnDetection::None {},
        }
    }
}

/// Client configuration
///
/// Contains everything needed to open a realtime session:
/// - Endpoint settings (URL, model, API key)
/// - Session defaults (voice, instructions, transcription, turn detection)
/// - Reconnection policy
#[derive(Debug, Clone)]
pub struct ClientSettings {
    // Endpoint settings
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,

    // Session defaults
    pub voice: RealtimeVoice,
    pub instructions: Option<String>,
    pub transcription_model: Option<String>,
    pub turn_detection: TurnDetectionMode,
    pub temperature: Option<f32>,

    // Reconnection
    pub retry: RetryConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            api_key: None,
            voice: RealtimeVoice::default(),
            instructions: None,
            transcription_model: None,
            turn_detection: TurnDetectionMode::default(),
            temperature: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Implement Drop to zeroize the API key when ClientSettings is dropped.
impl Drop for ClientSettings {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl ClientSettings {
    /// Load configuration from environment variables
    ///
    /// The `.env` file is loaded by `main` before this runs, so its values
    /// show up here as ordinary environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Self::load(None)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a YAML file, falling back to environment
    /// variables for anything the file leaves out
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let settings = Self::load(Some(yaml))?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(yaml: Option<YamlConfig>) -> Result<Self, ConfigError> {
        let yaml = yaml.unwrap_or_default();
        let realtime = yaml.realtime.unwrap_or_default();
        let session = yaml.session.unwrap_or_default();
        let defaults = Self::default();

        let url = realtime
            .url
            .or_else(|| env_var("REALTIME_URL"))
            .unwrap_or_else(|| defaults.url.clone());
        let model = realtime
            .model
            .or_else(|| env_var("REALTIME_MODEL"))
            .unwrap_or_else(|| defaults.model.clone());
        let api_key = realtime.api_key.or_else(|| env_var("OPENAI_API_KEY"));

        let voice = match session.voice.or_else(|| env_var("REALTIME_VOICE")) {
            Some(name) => RealtimeVoice::parse(&name).ok_or_else(|| ConfigError::Invalid {
                key: "voice",
                reason: format!("unknown voice '{}'", name),
            })?,
            None => defaults.voice,
        };

        let instructions = session
            .instructions
            .or_else(|| env_var("REALTIME_INSTRUCTIONS"));
        let transcription_model = session
            .transcription_model
            .or_else(|| env_var("REALTIME_TRANSCRIPTION_MODEL"));

        let turn_detection = match session
            .turn_detection
            .or_else(|| env_var("REALTIME_TURN_DETECTION"))
        {
            Some(mode) => TurnDetectionMode::parse(&mode)?,
            None => defaults.turn_detection,
        };

        let temperature = match session.temperature {
            Some(t) => Some(t),
            None => env_var("REALTIME_TEMPERATURE")
                .map(|raw| {
                    raw.parse::<f32>().map_err(|_| ConfigError::Invalid {
                        key: "temperature",
                        reason: format!("'{}' is not a number", raw),
                    })
                })
                .transpose()?,
        };

        Ok(Self {
            url,
            model,
            api_key,
            voice,
            instructions,
            transcription_model,
            turn_detection,
            temperature,
            retry: yaml.retry.unwrap_or_default(),
        })
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_endpoint_url(&self.url)?;
        validation::validate_model(&self.model)?;
        validation::validate_temperature(self.temperature)?;
        Ok(())
    }

    /// Connection options for [`RealtimeClient`](crate::core::realtime::RealtimeClient)
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            url: self.url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            retry: self.retry.clone(),
        }
    }

    /// Partial session configuration carrying the configured defaults
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            voice: Some(self.voice),
            instructions: self.instructions.clone(),
            input_audio_transcription: self
                .transcription_model
                .clone()
                .map(|model| InputAudioTranscription { model }),
            turn_detection: Some(self.turn_detection.to_turn_detection()),
            temperature: self.temperature,
            ..Default::default()
        }
    }
}

/// Read a non-empty environment variable
fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
