//! Domain layer for draftpane.
//!
//! Holds the models and collaborator contracts shared by the infrastructure
//! and application crates. Nothing here performs I/O.

pub mod config;
pub mod draft;
pub mod error;
pub mod pane;
pub mod storage;

pub use draft::{Citation, DraftRequest, DraftResponse, DraftingService, Executor};
pub use error::{DraftError, FailureKind, Result};
pub use pane::{ConversationKey, PanePhase, TaskPaneSnapshot};
pub use storage::KeyValueStore;
