// ── ZapLine Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`, plus
// the outbound transport taxonomy the dispatcher's retry policy keys on.
//
// Design rules:
//   • Variants are coarse-grained by domain (Store, Network, Provider…).
//   • `#[from]` wires std/external conversions automatically.
//   • No variant carries secret material (API keys) in its message.

use std::time::Duration;
use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Shared key-value store failure.
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Model provider HTTP or API-level failure (non-secret detail only).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Outbound chat gateway failure that survived the dispatcher's retries.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Engine or agent configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Outbound transport taxonomy ────────────────────────────────────────────
// The dispatcher decides retry vs. abort vs. terminal-success purely from
// this classification; the gateway client owns the mapping from raw HTTP
// responses into it.

#[derive(Debug, Error)]
pub enum TransportError {
    /// The gateway answered with a non-2xx HTTP status.
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The gateway reported the destination does not exist on the chat
    /// network. An expected condition in this domain, not a system fault.
    #[error("destination is not reachable on the network")]
    RecipientMissing,

    /// A single delivery attempt exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure before any HTTP status was produced.
    #[error("network failure: {0}")]
    Network(String),
}

impl TransportError {
    /// 5xx-class gateway response — transient, retried with backoff.
    pub fn is_server_error(&self) -> bool {
        matches!(self, TransportError::Status { status, .. } if (500..600).contains(status))
    }

    /// Transport-level failure (no usable status) — retried with backoff.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Network(_))
    }
}
