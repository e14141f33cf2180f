use anyhow::{Context, Result, bail};
use draftpane_application::build_controller;
use draftpane_core::config::DraftPaneConfig;
use draftpane_core::pane::model::STATUS_DONE;
use draftpane_core::pane::{ConversationKey, TaskPaneSnapshot};
use std::path::Path;

pub async fn run(
    config: &DraftPaneConfig,
    item: &str,
    message: &Path,
    prompt: Option<&str>,
) -> Result<()> {
    let body = tokio::fs::read_to_string(message)
        .await
        .with_context(|| format!("Failed to read message from {}", message.display()))?;

    let controller = build_controller(config).await?;
    controller
        .switch_to(Some(ConversationKey::stable(item)))
        .await;
    if let Some(prompt) = prompt {
        controller.set_prompt(prompt).await?;
    }

    let mut updates = controller.subscribe();
    if controller.resume(&body).await? {
        eprintln!("Resuming interrupted request for {item}");
    } else if controller.start(&body).await?.is_none() {
        bail!("A request for {item} is already in flight");
    }

    let mut last_status = String::new();
    let finished = loop {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.status_message != last_status {
            eprintln!("{}", snapshot.status_message);
            last_status = snapshot.status_message.clone();
        }
        if !snapshot.is_sending {
            break snapshot;
        }

        tokio::select! {
            changed = updates.changed() => changed.context("Pane controller stopped")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling");
                controller.cancel().await?;
            }
        }
    };

    controller.teardown().await?;
    print_result(&finished)
}

fn print_result(snapshot: &TaskPaneSnapshot) -> Result<()> {
    let response = match &snapshot.pipeline_response {
        Some(response) if snapshot.status_message == STATUS_DONE => response,
        _ => bail!("{}", snapshot.status_message),
    };

    println!("{}", response.reply);
    if !response.citations.is_empty() {
        println!();
        for (index, citation) in response.citations.iter().enumerate() {
            println!("[{}] {} <{}>", index + 1, citation.title, citation.url);
        }
    }
    Ok(())
}
