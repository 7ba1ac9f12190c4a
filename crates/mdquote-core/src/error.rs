//! Correlator and session error types.

use thiserror::Error;

/// Errors raised by a [`BatchCorrelator`](crate::batch::BatchCorrelator).
///
/// Only [`CorrelatorError::InvalidArgument`] ever reaches the
/// requester. The other variants describe a misbehaving or stale delivery
/// event and are logged and dropped by the dispatch path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelatorError {
    /// The batch could not be built (empty key set, blank key).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An event referenced a key that is not part of the batch.
    #[error("key '{key}' is not part of batch {batch}")]
    UnknownKey { batch: u64, key: String },

    /// An event arrived for a key that already reached a terminal state.
    #[error("key '{key}' in batch {batch} was already completed")]
    DuplicateCompletion { batch: u64, key: String },

    /// An event arrived after the batch timed out and was handed back.
    #[error("batch {batch} is closed")]
    BatchClosed { batch: u64 },
}

/// Errors raised by a market-data session adapter.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not logged in to the feed.
    #[error("market data session is not connected")]
    NotConnected,

    /// WebSocket connect/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Token acquisition or login was refused.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The feed sent something that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session configuration is unusable.
    #[error("invalid session configuration: {0}")]
    Config(String),

    /// The session was shut down.
    #[error("market data session is closed")]
    Closed,
}

impl SessionError {
    /// Returns `true` if reconnecting may clear the error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::WebSocket(_) | Self::Auth(_)
        )
    }
}

/// Errors surfaced by [`QuoteService::request`](crate::service::QuoteService::request).
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error(transparent)]
    Correlator(#[from] CorrelatorError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_retryable() {
        assert!(SessionError::WebSocket("reset".into()).is_retryable());
        assert!(SessionError::NotConnected.is_retryable());
        assert!(!SessionError::Config("no service".into()).is_retryable());
        assert!(!SessionError::Closed.is_retryable());
    }

    #[test]
    fn messages_name_the_batch() {
        let e = CorrelatorError::DuplicateCompletion { batch: 7, key: "IBM.N".into() };
        assert_eq!(e.to_string(), "key 'IBM.N' in batch 7 was already completed");
    }
}
