//! Conversation types.

use chrono::{DateTime, Utc};
use relay_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model, sent once per conversation
    System,
    /// Message written by the user
    User,
    /// Generated response
    Assistant,
}

impl Role {
    /// Wire name of the role.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged unit of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, append-only sequence of turns.
///
/// A system turn may only appear once, as the first turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
    /// User the conversation belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Set only for conversations backed by a named history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Conversation {
    /// Create an empty conversation stamped with the current time.
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            owner: None,
            created_at: Some(Utc::now()),
            name: None,
        }
    }

    /// Build a conversation from stored turns, checking the system-turn rule.
    pub fn from_turns(turns: Vec<Turn>) -> Result<Self> {
        let mut conversation = Self::new();
        for turn in turns {
            conversation.append(turn)?;
        }
        Ok(conversation)
    }

    /// Conversation whose first turn is `turn`. Any role may open a conversation.
    pub fn starting_with(turn: Turn) -> Self {
        let mut conversation = Self::new();
        conversation.turns.push(turn);
        conversation
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Whether the conversation already carries a system turn.
    pub fn has_system_turn(&self) -> bool {
        self.turns.first().is_some_and(|t| t.role == Role::System)
    }

    /// Append a turn.
    ///
    /// A system turn is only accepted as the very first turn.
    pub fn append(&mut self, turn: Turn) -> Result<()> {
        if turn.role == Role::System && !self.turns.is_empty() {
            return Err(Error::Internal(
                "system turn must be the first turn of a conversation".into(),
            ));
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Append a user turn. Never violates the system-turn rule.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    /// Append an assistant turn. Never violates the system-turn rule.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::assistant(content));
    }
}

/// Durable form of a named conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub name: String,
    /// Only this user may load or continue the history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl HistoryRecord {
    /// Create a record from a conversation.
    pub fn new(name: impl Into<String>, owner: Option<String>, conversation: &Conversation) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            owner,
            created_at: conversation.created_at.unwrap_or(now),
            updated_at: now,
            turns: conversation.turns().to_vec(),
        }
    }

    /// Whether `user` may load or continue this history.
    pub fn is_accessible_by(&self, user: &str) -> bool {
        self.owner.as_deref().map_or(true, |owner| owner == user)
    }

    /// Rebuild the in-memory conversation.
    pub fn to_conversation(&self) -> Result<Conversation> {
        let mut conversation = Conversation::from_turns(self.turns.clone())?;
        conversation.owner = self.owner.clone();
        conversation.created_at = Some(self.created_at);
        conversation.name = Some(self.name.clone());
        Ok(conversation)
    }

    /// Replace the stored turns with those of `conversation`.
    pub fn replace_turns(&mut self, conversation: &Conversation) {
        self.turns = conversation.turns().to_vec();
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> HistorySummary {
        HistorySummary {
            name: self.name.clone(),
            turn_count: self.turns.len(),
            created_at: self.created_at,
        }
    }
}

/// Listing entry for a named history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub name: String,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
}
