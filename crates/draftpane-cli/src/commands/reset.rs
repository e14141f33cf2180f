use anyhow::{Result, bail};
use draftpane_application::bootstrap::open_snapshot_store;
use draftpane_core::config::DraftPaneConfig;
use draftpane_core::pane::TaskPaneSnapshot;

pub async fn run(config: &DraftPaneConfig, item: &str) -> Result<()> {
    let store = open_snapshot_store(config).await;
    if !store.is_durable() {
        bail!("No persistent pane storage available");
    }
    store.write(item, TaskPaneSnapshot::default()).await?;
    println!("Cleared {item}");
    Ok(())
}
