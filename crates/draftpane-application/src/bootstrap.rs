//! Wiring of a [`PaneController`] from configuration.

use crate::operation_registry::OperationRegistry;
use crate::pane_controller::PaneController;
use draftpane_core::config::DraftPaneConfig;
use draftpane_core::error::Result;
use draftpane_infrastructure::{DraftPanePaths, HttpDraftingService, SnapshotStore, open_storage};
use std::path::PathBuf;
use std::sync::Arc;

/// Directory holding pane snapshots for `config`, if one can be determined.
pub fn panes_dir(config: &DraftPaneConfig) -> Option<PathBuf> {
    match &config.storage.data_dir {
        Some(dir) => Some(dir.join("panes")),
        None => DraftPanePaths::panes_dir().ok(),
    }
}

/// Opens the snapshot store described by `config`, falling back to memory.
pub async fn open_snapshot_store(config: &DraftPaneConfig) -> SnapshotStore {
    let storage = open_storage(panes_dir(config)).await;
    SnapshotStore::new(storage, config.storage.debounce())
}

/// Builds a controller talking to the configured HTTP drafting service.
///
/// Installs the process-wide registry with the configured retry policy if
/// none exists yet.
pub async fn build_controller(config: &DraftPaneConfig) -> Result<PaneController> {
    if !OperationRegistry::install_global(config.retry) {
        tracing::debug!("[Bootstrap] Operation registry already installed");
    }
    let registry = OperationRegistry::global();
    let store = open_snapshot_store(config).await;
    let service = Arc::new(HttpDraftingService::new(&config.service)?);

    tracing::debug!("[Bootstrap] Drafting via {}", service.endpoint());
    Ok(PaneController::new(registry, store, service))
}
