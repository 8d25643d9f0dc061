//! Reply anchors: sent message id → conversation.
//!
//! Entries live only in memory and are bounded by an LRU policy. Eviction
//! never loses durable data because named conversations are persisted
//! separately.

use crate::types::Conversation;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Conversation state recorded for one sent message.
#[derive(Debug, Clone)]
pub struct AnchorEntry {
    /// Conversation the message produced or extended
    pub conversation: Conversation,
    /// User whose command produced the message
    pub owner: String,
    /// Named history the conversation is linked to
    pub name: Option<String>,
    /// First message of the same response, for follow-up segments
    pub parent: Option<String>,
    /// Registration order, higher is newer
    pub seq: u64,
}

/// LRU-bounded anchor table.
pub struct AnchorCache {
    entries: LruCache<String, AnchorEntry>,
    next_seq: u64,
}

impl AnchorCache {
    /// Create a cache holding at most `capacity` anchors (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Record an anchor.
    ///
    /// A parent link is normalized to the root of its chain so lookups need a
    /// single hop. Links to unknown anchors or to the anchor itself are dropped.
    pub fn insert(
        &mut self,
        message_id: &str,
        conversation: Conversation,
        owner: &str,
        name: Option<String>,
        parent: Option<&str>,
    ) {
        let parent = parent.and_then(|p| {
            if p == message_id {
                tracing::warn!(message_id, "Ignoring self-referencing parent anchor");
                return None;
            }
            match self.entries.peek(p) {
                Some(entry) => Some(entry.parent.clone().unwrap_or_else(|| p.to_string())),
                None => {
                    tracing::debug!(message_id, parent = p, "Parent anchor not tracked, storing as root");
                    None
                }
            }
        });

        self.next_seq += 1;
        let entry = AnchorEntry {
            conversation,
            owner: owner.to_string(),
            name: name.filter(|n| !n.is_empty()),
            parent,
            seq: self.next_seq,
        };

        if let Some((evicted, _)) = self.entries.push(message_id.to_string(), entry) {
            if evicted != message_id {
                tracing::debug!(anchor = %evicted, "Evicted least recently used anchor");
            }
        }
    }

    /// Look up an anchor, following a follow-up link to its root.
    ///
    /// When the root has been evicted the follow-up's own entry is returned.
    pub fn resolve(&mut self, message_id: &str) -> Option<AnchorEntry> {
        let entry = self.entries.get(message_id)?.clone();
        if let Some(parent) = entry.parent.as_deref() {
            if let Some(root) = self.entries.get(parent) {
                return Some(root.clone());
            }
        }
        Some(entry)
    }

    /// Most recently registered anchor of `owner` that is linked to a name.
    pub fn latest_named(&self, owner: &str) -> Option<(String, AnchorEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.owner == owner && e.name.is_some())
            .max_by_key(|(_, e)| e.seq)
            .map(|(id, e)| (id.clone(), e.clone()))
    }

    /// Remove every anchor owned by `owner`, returning how many were dropped.
    pub fn remove_owner(&mut self, owner: &str) -> usize {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owner == owner)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.entries.pop(id);
        }
        ids.len()
    }

    /// Unlink every anchor from a deleted named history.
    pub fn forget_name(&mut self, name: &str) {
        for (_, entry) in self.entries.iter_mut() {
            if entry.name.as_deref() == Some(name) {
                entry.name = None;
                entry.conversation.name = None;
            }
        }
    }
}
