use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "draftpane")]
#[command(about = "draftpane CLI - resilient reply drafting", long_about = None)]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Draft a reply for a conversation, resuming an interrupted request
    Draft {
        /// Conversation item key
        #[arg(long)]
        item: String,
        /// File containing the message being replied to
        #[arg(long)]
        message: PathBuf,
        /// Optional instruction ("decline politely", ...)
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Print the stored pane snapshot as JSON
    Status {
        #[arg(long)]
        item: String,
    },
    /// Clear the stored pane snapshot
    Reset {
        #[arg(long)]
        item: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    commands::utils::init_tracing();
    let cli = Cli::parse();
    let config = commands::utils::load_config(cli.config.as_deref());

    match cli.command {
        Commands::Draft {
            item,
            message,
            prompt,
        } => commands::draft::run(&config, &item, &message, prompt.as_deref()).await?,
        Commands::Status { item } => commands::status::run(&config, &item).await?,
        Commands::Reset { item } => commands::reset::run(&config, &item).await?,
    }

    Ok(())
}
