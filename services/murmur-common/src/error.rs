//! Error types for the Murmur agent.

use thiserror::Error;

/// Result type alias using the Murmur error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Murmur services.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Quota exhausted for a rate-limited resource
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Upstream service reported rate limiting
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Resource not found (e.g. a retired model tier)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// State store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input or malformed response
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The model produced no usable output (e.g. safety-blocked)
    #[error("Empty response: {0}")]
    EmptyResponse(String),

    /// No decision arrived before the deadline
    #[error("Decision timed out")]
    DecisionTimeout,

    /// The decision channel closed while a request was outstanding
    #[error("Decision channel closed")]
    ChannelClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check whether the caller should fail over to the next resource in a
    /// priority-ordered list instead of surfacing this error.
    ///
    /// Matches the set of upstream signals that mean "this tier is unusable
    /// right now, another may work": quota/rate limits, retired models, and
    /// empty (safety-blocked) output.
    pub const fn should_failover(&self) -> bool {
        matches!(
            self,
            Self::QuotaExhausted(_)
                | Self::RateLimited(_)
                | Self::NotFound(_)
                | Self::EmptyResponse(_)
        )
    }

    /// Check whether this error is expected to clear by the next sweep.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::QuotaExhausted(_)
                | Self::RateLimited(_)
                | Self::NotFound(_)
                | Self::EmptyResponse(_)
                | Self::Transport(_)
                | Self::DecisionTimeout
        )
    }

    /// Check if this is a configuration error.
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
