//! Gateway trait for messaging platform adapters.

use crate::message::{OutgoingContent, OutgoingMessage};
use async_trait::async_trait;

/// Result type for gateway operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Gateway error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChannelError> for relay_common::Error {
    fn from(e: ChannelError) -> Self {
        Self::External(e.to_string())
    }
}

/// Messaging gateway adapter.
///
/// Implement this trait to relay through a new messaging platform.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Get the gateway name.
    fn name(&self) -> &'static str;

    /// Maximum characters per outbound message.
    fn max_message_length(&self) -> usize;

    /// Send a new message, returning its ID.
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String>;

    /// Replace the content of a previously sent message.
    async fn edit(&self, channel_id: &str, message_id: &str, content: OutgoingContent) -> ChannelResult<()>;

    /// Delete a previously sent message.
    async fn delete(&self, channel_id: &str, message_id: &str) -> ChannelResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_error_is_upstream_failure() {
        let err: relay_common::Error = ChannelError::SendFailed("socket closed".into()).into();
        assert!(!err.is_user_facing());
        assert!(err.to_string().contains("socket closed"));
    }
}
