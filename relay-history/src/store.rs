//! Conversation store shared by every command handler.
//!
//! Constructed once at startup, shared behind an `Arc`, flushed at shutdown.
//!
//! Handlers interleave at every network call, so a conversation read through
//! [`ConversationStore::resolve_context`] may be stale by the time the
//! matching [`ConversationStore::register_anchor`] runs. Two replies to the
//! same anchor can therefore fork the chain or overwrite each other's
//! named-history update (last write wins). This is accepted best-effort
//! behaviour.

use crate::anchors::{AnchorCache, AnchorEntry};
use crate::persistence::HistoryPersistence;
use crate::types::{Conversation, HistoryRecord, HistorySummary, Turn};
use relay_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum number of in-memory anchors
    pub anchor_capacity: usize,
    /// When false, system prompts are sent as user turns
    pub system_role_supported: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            anchor_capacity: 10_000,
            system_role_supported: true,
        }
    }
}

/// A user's most recently used named history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveHistory {
    pub name: String,
    /// Anchor the history was last registered under
    pub anchor_id: String,
}

/// Reply anchors plus durable named histories.
pub struct ConversationStore {
    anchors: Mutex<AnchorCache>,
    named: RwLock<HashMap<String, HistoryRecord>>,
    persistence: Arc<dyn HistoryPersistence>,
    system_role_supported: bool,
}

impl ConversationStore {
    /// Create a store, loading every named history from `persistence`.
    pub async fn open(persistence: Arc<dyn HistoryPersistence>, options: StoreOptions) -> Result<Self> {
        let named = persistence
            .read_all()
            .await
            .map_err(|e| e.with_context(format!("loading histories from {}", persistence.name())))?;

        tracing::info!(
            backend = persistence.name(),
            histories = named.len(),
            anchor_capacity = options.anchor_capacity,
            "Conversation store opened"
        );

        Ok(Self {
            anchors: Mutex::new(AnchorCache::new(options.anchor_capacity)),
            named: RwLock::new(named),
            persistence,
            system_role_supported: options.system_role_supported,
        })
    }

    /// Turn carrying the system prompt, honouring the service's role support.
    fn prompt_turn(&self, system_prompt: &str) -> Turn {
        if self.system_role_supported {
            Turn::system(system_prompt)
        } else {
            Turn::user(system_prompt)
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Conversation building
    // ─────────────────────────────────────────────────────────────────────

    /// Fresh conversation: the system prompt followed by the user's message.
    ///
    /// A blank prompt is left out.
    pub fn begin_conversation(&self, system_prompt: &str, user_turn: &str) -> Conversation {
        let mut conversation = if system_prompt.trim().is_empty() {
            Conversation::new()
        } else {
            Conversation::starting_with(self.prompt_turn(system_prompt))
        };
        conversation.push_user(user_turn);
        conversation
    }

    /// Copy of `existing` with one more user turn. The prompt is never re-sent.
    pub fn continue_conversation(&self, existing: &Conversation, user_turn: &str) -> Conversation {
        let mut conversation = existing.clone();
        conversation.push_user(user_turn);
        conversation
    }

    /// Copy of `existing` with the generated response appended.
    pub fn record_reply(&self, existing: &Conversation, reply: &str) -> Conversation {
        let mut conversation = existing.clone();
        conversation.push_assistant(reply);
        conversation
    }

    // ─────────────────────────────────────────────────────────────────────
    // Anchors
    // ─────────────────────────────────────────────────────────────────────

    /// Conversation behind a sent message, following follow-up links.
    pub async fn resolve_context(&self, anchor_id: &str) -> Result<Conversation> {
        self.resolve_anchor(anchor_id).await.map(|entry| entry.conversation)
    }

    /// Full anchor entry behind a sent message, following follow-up links.
    pub async fn resolve_anchor(&self, anchor_id: &str) -> Result<AnchorEntry> {
        self.anchors.lock().await.resolve(anchor_id).ok_or_else(|| {
            Error::NotFound(
                "That message is no longer part of a tracked conversation. Start a new one with /e."
                    .into(),
            )
        })
    }

    /// Record a sent message as an anchor for `conversation`.
    ///
    /// With a `name`, the conversation is also written to that named history.
    /// A failed write is logged; the in-memory state stays authoritative.
    pub async fn register_anchor(
        &self,
        message_id: &str,
        conversation: &Conversation,
        owner: &str,
        name: Option<&str>,
        parent: Option<&str>,
    ) {
        let name = name.map(normalize_name).filter(|n| !n.is_empty());

        let (linked, record) = match name {
            Some(name) => self.update_named(name, conversation, owner).await,
            None => (None, None),
        };

        let mut conversation = conversation.clone();
        if linked.is_none() {
            conversation.name = None;
        }
        let turns = conversation.len();
        self.anchors.lock().await.insert(
            message_id,
            conversation,
            owner,
            linked.map(String::from),
            parent,
        );
        tracing::debug!(message_id, owner, name = linked, parent, turns, "Registered anchor");

        if let Some(record) = record {
            self.persist(&record).await;
        }
    }

    /// Write `conversation` into the named history `name` on behalf of `owner`.
    ///
    /// Returns the name when the anchor stays linked to the history, and the
    /// record to persist when its turns changed. A missing record (deleted
    /// while a response was in flight) or one owned by someone else leaves
    /// the anchor untracked.
    async fn update_named<'a>(
        &self,
        name: &'a str,
        conversation: &Conversation,
        owner: &str,
    ) -> (Option<&'a str>, Option<HistoryRecord>) {
        let mut named = self.named.write().await;
        let Some(record) = named.get_mut(name) else {
            tracing::warn!(name, owner, "Named history no longer exists, anchor left untracked");
            return (None, None);
        };

        if !record.is_accessible_by(owner) {
            tracing::warn!(name, owner, "Named history belongs to another user, anchor left untracked");
            return (None, None);
        }

        // Identical content means this is a follow-up segment of a
        // response that was already persisted.
        if record.turns.as_slice() == conversation.turns() {
            return (Some(name), None);
        }

        record.replace_turns(conversation);
        (Some(name), Some(record.clone()))
    }

    /// Most recently registered named anchor of `owner`, if any.
    pub async fn active_named_history(&self, owner: &str) -> Option<ActiveHistory> {
        let anchors = self.anchors.lock().await;
        let (anchor_id, entry) = anchors.latest_named(owner)?;
        Some(ActiveHistory {
            name: entry.name?,
            anchor_id,
        })
    }

    /// Drop every anchor owned by `owner`. Named histories are untouched.
    pub async fn clear_user_context(&self, owner: &str) -> usize {
        let removed = self.anchors.lock().await.remove_owner(owner);
        tracing::info!(owner, removed, "Cleared user context");
        removed
    }

    pub async fn anchor_count(&self) -> usize {
        self.anchors.lock().await.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Named histories
    // ─────────────────────────────────────────────────────────────────────

    /// Create a named history seeded with the system prompt as its only turn.
    pub async fn start_named_history(
        &self,
        name: &str,
        owner: Option<&str>,
        system_prompt: &str,
    ) -> Result<Conversation> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(Error::InvalidInput("A history name is required.".into()));
        }

        let mut conversation = Conversation::new().with_name(name);
        conversation.owner = owner.map(String::from);
        if !system_prompt.trim().is_empty() {
            conversation.append(self.prompt_turn(system_prompt))?;
        }

        let record = {
            let mut named = self.named.write().await;
            if named.contains_key(name) {
                return Err(Error::AlreadyExists(format!(
                    "A history named `{name}` already exists."
                )));
            }
            let record = HistoryRecord::new(name, owner.map(String::from), &conversation);
            named.insert(name.to_string(), record.clone());
            record
        };

        tracing::info!(name, owner, "Started named history");
        self.persist(&record).await;
        Ok(conversation)
    }

    /// Load a named history on behalf of `user`.
    pub async fn load_named_history(&self, name: &str, user: &str) -> Result<Conversation> {
        let name = normalize_name(name);
        let named = self.named.read().await;
        let record = named
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("No history named `{name}`.")))?;

        if !record.is_accessible_by(user) {
            return Err(Error::Forbidden(format!(
                "The history `{name}` belongs to another user."
            )));
        }

        record.to_conversation()
    }

    /// Histories `user` may load: shared ones and their own.
    ///
    /// Ordered by creation time, then name.
    pub async fn list_named_histories(&self, user: &str) -> Vec<HistorySummary> {
        let named = self.named.read().await;
        let mut summaries: Vec<HistorySummary> = named
            .values()
            .filter(|r| r.is_accessible_by(user))
            .map(HistoryRecord::summary)
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        summaries
    }

    /// Delete a named history. Anchors linked to it become untracked.
    pub async fn delete_named_history(&self, name: &str, user: &str) -> Result<()> {
        let name = normalize_name(name);
        {
            let mut named = self.named.write().await;
            let record = named
                .get(name)
                .ok_or_else(|| Error::NotFound(format!("No history named `{name}`.")))?;
            if !record.is_accessible_by(user) {
                return Err(Error::Forbidden(format!(
                    "The history `{name}` belongs to another user."
                )));
            }
            named.remove(name);
        }

        self.anchors.lock().await.forget_name(name);

        if let Err(e) = self.persistence.remove(name).await {
            tracing::error!(name, error = %e, "Failed to delete history record");
        }
        tracing::info!(name, user, "Deleted named history");
        Ok(())
    }

    /// Rewrite every named history to storage.
    ///
    /// Every record is attempted; the first failure is returned.
    pub async fn flush(&self) -> Result<()> {
        let records: Vec<HistoryRecord> = self.named.read().await.values().cloned().collect();
        let mut first_error = None;

        for record in &records {
            if let Err(e) = self.persistence.write(&record.name, record).await {
                tracing::error!(name = %record.name, error = %e, "Failed to flush history");
                first_error.get_or_insert(e);
            }
        }

        tracing::info!(histories = records.len(), "Flushed named histories");
        match first_error {
            Some(e) => Err(Error::External(format!("flushing histories: {e}"))),
            None => Ok(()),
        }
    }

    async fn persist(&self, record: &HistoryRecord) {
        if let Err(e) = self.persistence.write(&record.name, record).await {
            tracing::error!(
                name = %record.name,
                backend = self.persistence.name(),
                error = %e,
                "Failed to persist history, keeping in-memory copy"
            );
        }
    }
}

/// History names ignore surrounding whitespace; otherwise they match exactly.
fn normalize_name(name: &str) -> &str {
    name.trim()
}
