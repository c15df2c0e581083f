//! Error taxonomy for the voice bridge.
//!
//! Most code propagates `anyhow::Result` the way the rest of the crate
//! does, but call sites that need to branch on *kind* (retry a transient
//! failure, tear the session down on a lost connection, refuse to start on
//! a bad config) match on [`BridgeError`] first.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Recoverable I/O hiccup; the caller may retry.
    #[error("transient I/O error: {0}")]
    Transient(String),

    /// The underlying WebSocket (Twilio or OpenAI) dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A frame didn't match the expected wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration is missing or invalid; the process cannot proceed.
    #[error("configuration error: {0}")]
    ConfigFatal(String),

    /// A bounded resource (queue, memory cap) was exceeded.
    #[error("resource pressure: {0}")]
    ResourcePressure(String),
}

impl BridgeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(BridgeError::Transient("x".into()).is_retryable());
        assert!(!BridgeError::ConnectionLost("x".into()).is_retryable());
        assert!(!BridgeError::Protocol("x".into()).is_retryable());
        assert!(!BridgeError::ConfigFatal("x".into()).is_retryable());
        assert!(!BridgeError::ResourcePressure("x".into()).is_retryable());
    }
}
