//! CLI gateway for interactive terminal sessions.
//!
//! Reads stdin and writes stdout, which makes it useful for local testing.
//! Input lines:
//!
//! - `/e what is rust` runs a command (see `/help`)
//! - `>MESSAGE_ID more please` replies to a message the relay sent
//! - any other line is shorthand for `/chat`
//!
//! Every message the relay sends is printed with its ID so it can be replied to.

use crate::bridge::{OPT_ACTION, OPT_MESSAGE, OPT_NAME, OPT_PROMPT, OPT_QUESTION};
use crate::format::MAX_MESSAGE_LENGTH;
use crate::message::{
    now_millis, ChannelMessage, ChannelType, CommandEvent, InboundEvent, OutgoingContent,
    OutgoingMessage,
};
use crate::traits::{ChannelError, ChannelResult, Gateway};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const CLI_CHANNEL_ID: &str = "cli";

/// CLI gateway - stdin/stdout, always available.
pub struct CliGateway {
    user_id: String,
    max_message_length: usize,
}

impl CliGateway {
    /// Create a CLI gateway acting for `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }

    /// Override the per-message character limit.
    pub fn with_max_message_length(mut self, max: usize) -> Self {
        self.max_message_length = max.max(1);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Read stdin until EOF or `/quit`, forwarding each event to `tx`.
    pub async fn listen(&self, tx: mpsc::Sender<InboundEvent>) -> ChannelResult<()> {
        let stdin = io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => return Err(ChannelError::Connection(format!("stdin: {e}"))),
            };
            let line = line.trim();
            if line == "/quit" || line == "/exit" {
                break;
            }

            let Some(event) = parse_line(line, &self.user_id) else {
                continue;
            };
            if tx.send(event).await.is_err() {
                tracing::warn!("Dispatcher stopped, closing CLI input");
                break;
            }
        }

        tracing::info!("CLI input closed");
        Ok(())
    }
}

#[async_trait]
impl Gateway for CliGateway {
    fn name(&self) -> &'static str {
        "cli"
    }

    fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let id = short_id();
        println!("[{id}] {}", render(&message.content));
        Ok(id)
    }

    async fn edit(&self, _channel_id: &str, message_id: &str, content: OutgoingContent) -> ChannelResult<()> {
        println!("[{message_id}] {}", render(&content));
        Ok(())
    }

    async fn delete(&self, _channel_id: &str, message_id: &str) -> ChannelResult<()> {
        println!("[{message_id}] (deleted)");
        Ok(())
    }
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

fn render(content: &OutgoingContent) -> String {
    match content {
        OutgoingContent::Text { text } => text.clone(),
        OutgoingContent::Image {
            data,
            filename,
            caption,
            ..
        } => match caption {
            Some(cap) => format!("[Image: {filename}, {} bytes] {cap}", data.len()),
            None => format!("[Image: {filename}, {} bytes]", data.len()),
        },
    }
}

/// Turn one input line into an inbound event.
pub fn parse_line(line: &str, user_id: &str) -> Option<InboundEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix('>') {
        let (target, text) = split_first_word(rest);
        if target.is_empty() {
            return None;
        }
        return Some(InboundEvent::Message(ChannelMessage {
            id: short_id(),
            channel_type: ChannelType::Cli,
            channel_id: CLI_CHANNEL_ID.into(),
            user_id: user_id.into(),
            is_bot: false,
            text: text.to_string(),
            reply_to: Some(target.to_string()),
            timestamp: now_millis(),
        }));
    }

    let (command, rest) = match line.strip_prefix('/') {
        Some(body) => split_first_word(body),
        None => ("chat", line),
    };
    if command.is_empty() {
        return None;
    }

    let mut options = HashMap::new();
    match command {
        "e" => {
            options.insert(OPT_QUESTION.to_string(), rest.to_string());
        }
        "chat" => {
            options.insert(OPT_MESSAGE.to_string(), rest.to_string());
        }
        "imagine" => {
            options.insert(OPT_PROMPT.to_string(), rest.to_string());
        }
        "history" => {
            let (action, name) = split_first_word(rest);
            options.insert(OPT_ACTION.to_string(), action.to_string());
            options.insert(OPT_NAME.to_string(), name.to_string());
        }
        _ => {}
    }

    Some(InboundEvent::Command(CommandEvent {
        id: short_id(),
        channel_type: ChannelType::Cli,
        channel_id: CLI_CHANNEL_ID.into(),
        user_id: user_id.into(),
        command: command.to_string(),
        options,
        timestamp: now_millis(),
    }))
}

fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (text, ""),
    }
}
