use serde::Deserialize;
use std::path::Path;

use super::ConfigError;
use crate::core::realtime::RetryConfig;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override the corresponding environment variables.
///
/// # Example YAML structure
/// ```yaml
/// realtime:
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-10-01"
///   api_key: "sk-..."
///
/// session:
///   voice: "alloy"
///   instructions: "You answer questions about places on Earth."
///   transcription_model: "whisper-1"
///   turn_detection: "server_vad"
///   temperature: 0.7
///
/// retry:
///   enabled: true
///   max_attempts: 5
///   initial_delay_ms: 1000
///   max_delay_ms: 30000
///   backoff_multiplier: 2.0
///   jitter: true
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub realtime: Option<RealtimeYaml>,
    pub session: Option<SessionYaml>,
    pub retry: Option<RetryConfig>,
}

/// Endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// Session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub transcription_model: Option<String>,
    /// `server_vad`, `semantic_vad` or `none`
    pub turn_detection: Option<String>,
    pub temperature: Option<f32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
