//! Message types for gateway communication.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Gateway type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Discord,
    Cli,
}

impl ChannelType {
    /// Get the channel type as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Cli => "cli",
        }
    }
}

/// A slash command invoked by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEvent {
    /// Interaction ID (gateway-specific)
    pub id: String,
    pub channel_type: ChannelType,
    /// Channel the command was invoked in
    pub channel_id: String,
    /// Invoking user
    pub user_id: String,
    /// Command name without the leading slash
    pub command: String,
    /// String options keyed by option name
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
}

impl CommandEvent {
    /// Non-blank option value, trimmed.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// A plain chat message, possibly replying to an earlier message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message ID (gateway-specific)
    pub id: String,
    pub channel_type: ChannelType,
    pub channel_id: String,
    /// Sender
    pub user_id: String,
    /// Whether the sender is a bot (bots are never answered)
    #[serde(default)]
    pub is_bot: bool,
    pub text: String,
    /// Message this one replies to
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
}

/// Everything a gateway can deliver.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Command(CommandEvent),
    Message(ChannelMessage),
}

impl InboundEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Command(c) => &c.user_id,
            Self::Message(m) => &m.user_id,
        }
    }
}

/// Outgoing message to send to a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target channel type
    pub channel_type: ChannelType,
    /// Target channel ID
    pub channel_id: String,
    /// Reply to message ID (optional)
    pub reply_to: Option<String>,
    /// Message content
    pub content: OutgoingContent,
}

/// Outgoing message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingContent {
    /// Plain text
    Text { text: String },
    /// Image attachment
    Image {
        data: Vec<u8>,
        mime_type: String,
        filename: String,
        caption: Option<String>,
    },
}

impl OutgoingContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }
}

/// Current time in Unix millis.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_ignores_blank_values() {
        let cmd = CommandEvent {
            id: "1".into(),
            channel_type: ChannelType::Cli,
            channel_id: "cli".into(),
            user_id: "u1".into(),
            command: "e".into(),
            options: [("question".to_string(), "   ".to_string()), ("name".to_string(), " proj ".to_string())]
                .into_iter()
                .collect(),
            timestamp: 0,
        };
        assert_eq!(cmd.option("question"), None);
        assert_eq!(cmd.option("name"), Some("proj"));
        assert_eq!(cmd.option("missing"), None);
    }

    #[test]
    fn channel_message_defaults() {
        let msg: ChannelMessage = serde_json::from_str(
            r#"{"id":"9","channel_type":"discord","channel_id":"c","user_id":"u","text":"hi","timestamp":1}"#,
        )
        .unwrap();
        assert!(msg.reply_to.is_none());
        assert!(!msg.is_bot);
        assert_eq!(msg.channel_type.as_str(), "discord");
    }

    #[test]
    fn outgoing_content_text() {
        assert_eq!(OutgoingContent::text("x").as_text(), Some("x"));
    }
}
