//! Command dispatcher for the relay.
//!
//! Handles the complete flow for every inbound event:
//! 1. Check the allow-list
//! 2. Build the conversation (fresh, named history, or reply chain)
//! 3. Acknowledge, then call the provider
//! 4. Chunk the response, edit the acknowledgement, send follow-ups
//! 5. Register every sent segment as a reply anchor

use crate::format::split_message;
use crate::message::{
    ChannelMessage, ChannelType, CommandEvent, InboundEvent, OutgoingContent, OutgoingMessage,
};
use crate::traits::Gateway;
use relay_agent::Provider;
use relay_common::config::Config;
use relay_common::logging::generate_trace_id;
use relay_common::{Error, Result};
use relay_history::{Conversation, ConversationStore, HistorySummary};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Option carrying the `/e` question.
pub const OPT_QUESTION: &str = "question";
/// Option carrying the `/chat` message.
pub const OPT_MESSAGE: &str = "message";
/// Option carrying the `/imagine` prompt.
pub const OPT_PROMPT: &str = "prompt";
/// `/history` sub-command.
pub const OPT_ACTION: &str = "action";
/// `/history` target name.
pub const OPT_NAME: &str = "name";

/// Usage text for `/help`.
pub const HELP_TEXT: &str = "\
Commands:
/e <question> - ask a question in a new conversation
/chat <message> - continue your active saved history
/history start <name> - start a saved history
/history load <name> - make a saved history active again
/history list - list the histories you can load
/history delete <name> - delete a saved history
/history clear - forget your reply threads (saved histories are kept)
/imagine <prompt> - generate an image
Reply to any of my messages to continue that conversation.";

const EMPTY_RESPONSE: &str = "(The model returned an empty response.)";

/// Dispatcher settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// User IDs allowed to run generation commands (`*` allows everyone)
    pub allowed_users: Vec<String>,
    pub system_prompt: String,
    /// Placeholder shown while generating
    pub ack_text: String,
    /// Reply for users not on the allow-list
    pub denied_text: String,
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_users: config.gateway.allowed_users.clone(),
            system_prompt: config.prompt.system_prompt.clone(),
            ack_text: config.gateway.ack_text.clone(),
            denied_text: config.gateway.denied_text.clone(),
        }
    }
}

/// Where a response goes.
#[derive(Debug, Clone)]
struct Origin {
    channel_type: ChannelType,
    channel_id: String,
    user_id: String,
    source_id: String,
}

impl Origin {
    fn from_command(cmd: &CommandEvent) -> Self {
        Self {
            channel_type: cmd.channel_type,
            channel_id: cmd.channel_id.clone(),
            user_id: cmd.user_id.clone(),
            source_id: cmd.id.clone(),
        }
    }

    fn from_message(msg: &ChannelMessage) -> Self {
        Self {
            channel_type: msg.channel_type,
            channel_id: msg.channel_id.clone(),
            user_id: msg.user_id.clone(),
            source_id: msg.id.clone(),
        }
    }

    fn reply(&self, content: OutgoingContent) -> OutgoingMessage {
        OutgoingMessage {
            channel_type: self.channel_type,
            channel_id: self.channel_id.clone(),
            reply_to: Some(self.source_id.clone()),
            content,
        }
    }
}

/// Routes inbound events through the store, the provider and back out the gateway.
pub struct CommandDispatcher {
    store: Arc<ConversationStore>,
    provider: Arc<dyn Provider>,
    gateway: Arc<dyn Gateway>,
    settings: DispatcherSettings,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<ConversationStore>,
        provider: Arc<dyn Provider>,
        gateway: Arc<dyn Gateway>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            store,
            provider,
            gateway,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Whether `user_id` may run generation commands.
    ///
    /// An empty allow-list allows no one.
    pub fn is_allowed(&self, user_id: &str) -> bool {
        self.settings
            .allowed_users
            .iter()
            .any(|u| u == "*" || u == user_id)
    }

    /// Handle one inbound event. Failures are reported to the user, never returned.
    pub async fn handle(&self, event: InboundEvent) {
        let trace_id = generate_trace_id();
        match event {
            InboundEvent::Command(cmd) => {
                let span = tracing::info_span!(
                    "command",
                    trace_id = %trace_id,
                    user_id = %cmd.user_id,
                    command = %cmd.command,
                );
                self.handle_command(cmd).instrument(span).await;
            }
            InboundEvent::Message(msg) => {
                let span = tracing::info_span!(
                    "reply",
                    trace_id = %trace_id,
                    user_id = %msg.user_id,
                    reply_to = msg.reply_to.as_deref().unwrap_or_default(),
                );
                self.handle_message(msg).instrument(span).await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    async fn handle_command(&self, cmd: CommandEvent) {
        let origin = Origin::from_command(&cmd);
        tracing::info!(options = cmd.options.len(), "Handling command");

        if let Err(e) = self.run_command(&cmd, &origin).await {
            self.report(&origin, None, &e).await;
        }
    }

    async fn run_command(&self, cmd: &CommandEvent, origin: &Origin) -> Result<()> {
        if cmd.command == "help" {
            return self.say(origin, HELP_TEXT).await;
        }

        if !self.is_allowed(&cmd.user_id) {
            tracing::warn!("User not on allow-list");
            return self.say(origin, &self.settings.denied_text).await;
        }

        match cmd.command.as_str() {
            "e" => {
                let question = required(cmd, OPT_QUESTION, "Please provide a question, e.g. `/e what is Rust?`")?;
                let conversation = self
                    .store
                    .begin_conversation(&self.settings.system_prompt, question);
                self.generate(origin, conversation, None).await
            }
            "chat" => {
                let message = required(cmd, OPT_MESSAGE, "Please provide a message, e.g. `/chat go on`")?;
                self.chat(origin, message).await
            }
            "history" => self.history(cmd, origin).await,
            "imagine" => {
                let prompt = required(cmd, OPT_PROMPT, "Please describe the image, e.g. `/imagine a red fox`")?;
                self.imagine(origin, prompt).await
            }
            other => Err(Error::InvalidInput(format!(
                "Unknown command `/{other}`. Use /help to see what I can do."
            ))),
        }
    }

    /// Continue the user's active named history, or start an untracked conversation.
    async fn chat(&self, origin: &Origin, message: &str) -> Result<()> {
        let Some(active) = self.store.active_named_history(&origin.user_id).await else {
            tracing::debug!("No active history, starting untracked conversation");
            let conversation = self
                .store
                .begin_conversation(&self.settings.system_prompt, message);
            return self.generate(origin, conversation, None).await;
        };

        let history = self
            .store
            .load_named_history(&active.name, &origin.user_id)
            .await?;
        let conversation = self.store.continue_conversation(&history, message);
        tracing::info!(name = %active.name, turns = conversation.len(), "Continuing named history");
        self.generate(origin, conversation, Some(&active.name)).await
    }

    async fn history(&self, cmd: &CommandEvent, origin: &Origin) -> Result<()> {
        let user = origin.user_id.as_str();
        let action = cmd.option(OPT_ACTION).unwrap_or("list");

        match action {
            "start" => {
                let name = required(cmd, OPT_NAME, "Please name the history, e.g. `/history start project`")?;
                let conversation = self
                    .store
                    .start_named_history(name, Some(user), &self.settings.system_prompt)
                    .await?;
                let text = format!(
                    "Started history `{name}`. Use /chat or reply to this message to add to it."
                );
                self.announce(origin, &text, &conversation, name).await
            }
            "load" => {
                let name = required(cmd, OPT_NAME, "Please name the history, e.g. `/history load project`")?;
                let conversation = self.store.load_named_history(name, user).await?;
                let text = format!(
                    "Loaded history `{name}` ({} turns). Use /chat or reply to this message to continue it.",
                    conversation.len()
                );
                self.announce(origin, &text, &conversation, name).await
            }
            "list" => {
                let histories = self.store.list_named_histories(user).await;
                self.say(origin, &format_history_list(&histories)).await
            }
            "delete" => {
                let name = required(cmd, OPT_NAME, "Please name the history, e.g. `/history delete project`")?;
                self.store.delete_named_history(name, user).await?;
                self.say(origin, &format!("Deleted history `{name}`.")).await
            }
            "clear" => {
                let removed = self.store.clear_user_context(user).await;
                self.say(
                    origin,
                    &format!("Forgot {removed} tracked messages. Saved histories are kept."),
                )
                .await
            }
            other => Err(Error::InvalidInput(format!(
                "Unknown history action `{other}`. Use start, load, list, delete or clear."
            ))),
        }
    }

    async fn imagine(&self, origin: &Origin, prompt: &str) -> Result<()> {
        let ack = self
            .gateway
            .send(origin.reply(OutgoingContent::text(&self.settings.ack_text)))
            .await?;

        if let Err(e) = self.render_images(origin, &ack, prompt).await {
            self.report(origin, Some(&ack), &e).await;
        }
        Ok(())
    }

    async fn render_images(&self, origin: &Origin, ack: &str, prompt: &str) -> Result<()> {
        let images = self.provider.generate_image(prompt).await?;
        if images.is_empty() {
            return Err(Error::External(format!(
                "{} returned no images",
                self.provider.name()
            )));
        }

        tracing::info!(images = images.len(), "Generated images");
        self.gateway
            .edit(
                &origin.channel_id,
                ack,
                OutgoingContent::text(format!("Here is what I made for: {prompt}")),
            )
            .await?;

        for (index, image) in images.into_iter().enumerate() {
            let filename = format!("image-{}.{}", index + 1, image.extension());
            self.gateway
                .send(origin.reply(OutgoingContent::Image {
                    data: image.data,
                    mime_type: image.mime_type,
                    filename,
                    caption: None,
                }))
                .await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Replies
    // ─────────────────────────────────────────────────────────────────────

    async fn handle_message(&self, msg: ChannelMessage) {
        if msg.is_bot {
            return;
        }
        let Some(anchor_id) = msg.reply_to.as_deref() else {
            return;
        };
        let text = msg.text.trim();
        if text.is_empty() {
            return;
        }

        let entry = match self.store.resolve_anchor(anchor_id).await {
            Ok(entry) => entry,
            Err(_) => {
                tracing::debug!("Reply to untracked message, ignoring");
                return;
            }
        };

        if !self.is_allowed(&msg.user_id) {
            tracing::warn!("Reply from user not on allow-list, ignoring");
            return;
        }

        let origin = Origin::from_message(&msg);
        let result = async {
            let base = match entry.name.as_deref() {
                Some(name) => match self.store.load_named_history(name, &msg.user_id).await {
                    Ok(history) => history,
                    Err(e) if e.is_not_found() => entry.conversation.clone(),
                    Err(e) => return Err(e),
                },
                None => entry.conversation.clone(),
            };
            let conversation = self.store.continue_conversation(&base, text);
            tracing::info!(
                name = entry.name.as_deref().unwrap_or_default(),
                turns = conversation.len(),
                "Continuing reply thread"
            );
            self.generate(&origin, conversation, entry.name.as_deref()).await
        }
        .await;

        if let Err(e) = result {
            self.report(&origin, None, &e).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Generation
    // ─────────────────────────────────────────────────────────────────────

    /// Acknowledge, generate, and deliver. Failures after the acknowledgement
    /// replace the acknowledgement text.
    async fn generate(&self, origin: &Origin, conversation: Conversation, name: Option<&str>) -> Result<()> {
        let ack = self
            .gateway
            .send(origin.reply(OutgoingContent::text(&self.settings.ack_text)))
            .await?;

        if let Err(e) = self.complete(origin, &ack, conversation, name).await {
            self.report(origin, Some(&ack), &e).await;
        }
        Ok(())
    }

    async fn complete(
        &self,
        origin: &Origin,
        ack: &str,
        conversation: Conversation,
        name: Option<&str>,
    ) -> Result<()> {
        let response = self.provider.generate(conversation.turns()).await?;
        let conversation = self.store.record_reply(&conversation, &response);

        let mut segments = split_message(&response, self.gateway.max_message_length()).into_iter();
        let first = segments.next().unwrap_or_else(|| EMPTY_RESPONSE.to_string());

        self.gateway
            .edit(&origin.channel_id, ack, OutgoingContent::text(first))
            .await?;
        self.store
            .register_anchor(ack, &conversation, &origin.user_id, name, None)
            .await;

        let mut sent = 1;
        for segment in segments {
            let id = self
                .gateway
                .send(origin.reply(OutgoingContent::text(segment)))
                .await?;
            self.store
                .register_anchor(&id, &conversation, &origin.user_id, name, Some(ack))
                .await;
            sent += 1;
        }

        tracing::info!(
            provider = self.provider.name(),
            segments = sent,
            chars = response.chars().count(),
            "Delivered response"
        );
        Ok(())
    }

    /// Send a plain reply.
    async fn say(&self, origin: &Origin, text: &str) -> Result<()> {
        self.gateway
            .send(origin.reply(OutgoingContent::text(text)))
            .await?;
        Ok(())
    }

    /// Send a notice that doubles as an anchor for a named history.
    async fn announce(&self, origin: &Origin, text: &str, conversation: &Conversation, name: &str) -> Result<()> {
        let id = self
            .gateway
            .send(origin.reply(OutgoingContent::text(text)))
            .await?;
        self.store
            .register_anchor(&id, conversation, &origin.user_id, Some(name), None)
            .await;
        Ok(())
    }

    async fn report(&self, origin: &Origin, ack: Option<&str>, error: &Error) {
        if error.is_user_facing() {
            tracing::warn!(error = %error, "Request rejected");
        } else {
            tracing::error!(error = %error, "Request failed");
        }

        let content = OutgoingContent::text(error.user_message());
        let delivered = match ack {
            Some(ack) => self.gateway.edit(&origin.channel_id, ack, content).await,
            None => self.gateway.send(origin.reply(content)).await.map(|_| ()),
        };
        if let Err(e) = delivered {
            tracing::error!(error = %e, "Failed to deliver error reply");
        }
    }

    /// Start a background processor that handles events from a gateway.
    ///
    /// Each event runs in its own task. The processor finishes once the
    /// sender is dropped and every in-flight event is done.
    pub fn spawn_processor(
        dispatcher: Arc<Self>,
        mut rx: mpsc::Receiver<InboundEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Dispatcher started");
            let mut tasks = JoinSet::new();

            while let Some(event) = rx.recv().await {
                while tasks.try_join_next().is_some() {}

                let dispatcher = dispatcher.clone();
                tasks.spawn(async move { dispatcher.handle(event).await });
            }

            while tasks.join_next().await.is_some() {}
            tracing::info!("Dispatcher stopped");
        })
    }
}

fn required<'a>(cmd: &'a CommandEvent, option: &str, hint: &str) -> Result<&'a str> {
    cmd.option(option)
        .ok_or_else(|| Error::InvalidInput(hint.to_string()))
}

fn format_history_list(histories: &[HistorySummary]) -> String {
    if histories.is_empty() {
        return "No saved histories yet. Start one with `/history start <name>`.".into();
    }

    let mut lines = vec!["Saved histories:".to_string()];
    lines.extend(histories.iter().map(|h| {
        format!(
            "- `{}` ({} turns, created {})",
            h.name,
            h.turn_count,
            h.created_at.format("%Y-%m-%d %H:%M UTC")
        )
    }));
    lines.join("\n")
}
