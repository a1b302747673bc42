//! handoff - live chat routing server

use anyhow::Result;
use clap::{Parser, Subcommand};
use handoff::config::Config;
use handoff::server::Server;
use handoff::store::{self, ClosedFilter};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "handoff")]
#[command(about = "Routes live visitor chats to a pool of human attendants")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the routing server
    Serve {
        /// Listen address override
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Print closed conversations from the configured store as JSON
    History {
        /// Only conversations owned by this attendant
        #[arg(long)]
        assigned_to: Option<String>,

        /// Maximum number of conversations
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if config.attendants.is_empty() {
                tracing::warn!("No attendants configured; nobody will be able to join");
            }

            let server = Server::from_config(config);
            let listener = server.bind().await?;

            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(()).await;
                }
            });

            server.run(listener, shutdown_rx).await
        }
        Commands::History { assigned_to, limit } => {
            let store = store::open(&config.store);
            let sessions = store
                .find_closed(&ClosedFilter { assigned_to, limit })
                .await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            Ok(())
        }
    }
}
