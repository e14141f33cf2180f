//! Reply pane domain: per-conversation snapshot and conversation identity.

pub mod identity;
pub mod model;

pub use identity::{ConversationIdentity, ConversationKey, WatchIdentityProvider};
pub use model::{PanePhase, TaskPaneSnapshot};
