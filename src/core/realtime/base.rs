//! Base types shared by the realtime protocol client.
//!
//! This module defines the error taxonomy, the connection lifecycle state and
//! the retry policy used when re-establishing a realtime session.
//!
//! # Audio Format
//!
//! All audio handled by the client is PCM 16-bit signed little-endian, mono,
//! at 24kHz.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample rate used for every millisecond to sample conversion.
///
/// The server never advertises its rate, so this is fixed for the whole
/// session.
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the endpoint failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// `connect()` was called while a connection is open or opening
    #[error("Already connected, use disconnect() first")]
    AlreadyConnected,

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Tool registration error
    #[error("Tool registration failed: {0}")]
    ToolRegistration(String),

    /// Referenced conversation item does not exist
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Referenced conversation item cannot be used for the operation
    #[error("Invalid item: {0}")]
    InvalidItem(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::SerializationError(err.to_string())
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Retry Configuration
// =============================================================================

/// Backoff policy used by [`RealtimeClient::reconnect`](super::RealtimeClient::reconnect).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries. When disabled a single attempt is made.
    /// Default: true
    pub enabled: bool,

    /// Maximum number of attempts before giving up.
    /// Set to 0 for unlimited attempts.
    /// Default: 5
    pub max_attempts: u32,

    /// Initial delay between attempts (milliseconds).
    /// Default: 1000ms
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts (milliseconds).
    /// Default: 30000ms (30 seconds)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Whether to add jitter to the delay.
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with retries disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay in milliseconds before the given attempt (1-based).
    ///
    /// `initial_delay_ms * backoff_multiplier^(attempt - 1)`, capped at
    /// `max_delay_ms`, then spread by up to 25% either way when jitter is on.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.max(1) - 1;
        let uncapped =
            self.initial_delay_ms as f64 * (self.backoff_multiplier as f64).powi(exponent as i32);
        let capped = uncapped.min(self.max_delay_ms as f64);

        let spread = if self.jitter { capped * 0.25 * jitter_unit() } else { 0.0 };
        (capped + spread).max(0.0) as u64
    }

    /// Check if another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        if !self.enabled {
            return false;
        }
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// Uniform value in `[-1.0, 1.0)` taken from the random bits of a v4 UUID.
fn jitter_unit() -> f64 {
    const MANTISSA_BITS: u32 = 53;
    let bits = (uuid::Uuid::new_v4().as_u128() as u64) & ((1u64 << MANTISSA_BITS) - 1);
    (bits as f64 / (1u64 << MANTISSA_BITS) as f64) * 2.0 - 1.0
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection lifecycle of the realtime client.
///
/// `Connected` covers both "socket open, session pending" and "session
/// created"; the latter is tracked separately and awaited through
/// `wait_for_session_created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Socket open
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}
