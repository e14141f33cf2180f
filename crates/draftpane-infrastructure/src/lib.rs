//! Infrastructure layer for draftpane.
//!
//! Adapters for the collaborators the core crate defines: storage surfaces,
//! the HTTP drafting client, configuration loading, and the per-item snapshot
//! synchronizer built on top of them.

pub mod config_service;
pub mod dto;
pub mod http_drafting_service;
pub mod kv_store;
pub mod paths;
pub mod snapshot_store;

pub use config_service::ConfigService;
pub use http_drafting_service::HttpDraftingService;
pub use kv_store::{FileKeyValueStore, MemoryKeyValueStore, open_storage};
pub use paths::DraftPanePaths;
pub use snapshot_store::SnapshotStore;
