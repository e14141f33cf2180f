//! Conversation identity.
//!
//! The host tells us which conversation is open. Items the host has not yet
//! assigned a stable id to get a provisional, session-scoped key instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use uuid::Uuid;

/// Prefix marking item keys derived from provisional conversation keys.
pub const PROVISIONAL_PREFIX: &str = "provisional:";

/// Whether an item key was derived from a provisional conversation key.
pub fn is_provisional_item_key(item_key: &str) -> bool {
    item_key.starts_with(PROVISIONAL_PREFIX)
}

/// Identifies the conversation a snapshot belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConversationKey {
    /// Host-assigned id, safe to persist across sessions.
    Stable(String),
    /// Generated placeholder, valid for this session only.
    Provisional(String),
}

impl ConversationKey {
    pub fn stable(id: impl Into<String>) -> Self {
        Self::Stable(id.into())
    }

    /// Generates a fresh provisional key.
    pub fn provisional() -> Self {
        Self::Provisional(Uuid::new_v4().to_string())
    }

    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Stable(_))
    }

    /// String used to key storage entries and per-item bookkeeping.
    pub fn item_key(&self) -> String {
        match self {
            Self::Stable(id) => id.clone(),
            Self::Provisional(id) => format!("{PROVISIONAL_PREFIX}{id}"),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.item_key())
    }
}

/// Supplies "which conversation is active now" plus change notification.
pub trait ConversationIdentity: Send + Sync {
    fn current(&self) -> Option<ConversationKey>;

    fn subscribe(&self) -> watch::Receiver<Option<ConversationKey>>;
}

/// Identity provider backed by a `watch` channel the host pushes into.
#[derive(Debug)]
pub struct WatchIdentityProvider {
    sender: watch::Sender<Option<ConversationKey>>,
}

impl WatchIdentityProvider {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Announces the active conversation. `None` means no item is open.
    pub fn set_active(&self, key: Option<ConversationKey>) {
        self.sender.send_if_modified(|current| {
            if *current == key {
                false
            } else {
                *current = key;
                true
            }
        });
    }
}

impl Default for WatchIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationIdentity for WatchIdentityProvider {
    fn current(&self) -> Option<ConversationKey> {
        self.sender.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<ConversationKey>> {
        self.sender.subscribe()
    }
}
