//! Relay History - conversation state for reply chains and named histories.
//!
//! ## Architecture
//!
//! ```text
//! sent message id ──► AnchorCache (LRU, in memory) ──► Conversation
//!                          │ name
//!                          ▼
//!                 named records ──► HistoryPersistence (JSON files)
//! ```
//!
//! Anchors are volatile and bounded; named histories are durable and are
//! rewritten every time a turn is appended to a conversation linked to them.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod anchors;
pub mod persistence;
pub mod store;
pub mod types;

pub use anchors::{AnchorCache, AnchorEntry};
pub use persistence::{HistoryPersistence, JsonFileStore, MemoryPersistence};
pub use store::{ActiveHistory, ConversationStore, StoreOptions};
pub use types::{Conversation, HistoryRecord, HistorySummary, Role, Turn};
