use anyhow::{Result, bail};
use draftpane_application::bootstrap::open_snapshot_store;
use draftpane_core::config::DraftPaneConfig;

pub async fn run(config: &DraftPaneConfig, item: &str) -> Result<()> {
    let store = open_snapshot_store(config).await;
    if !store.is_durable() {
        bail!("No persistent pane storage available");
    }
    let snapshot = store.read(item).await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
