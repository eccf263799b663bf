pub mod realtime;

// Re-export commonly used types for convenience
pub use realtime::{
    ClientOptions, ConnectionState, RealtimeClient, RealtimeError, RealtimeEvent, RealtimeResult,
    RetryConfig,
};
