use anyhow::Result;
use clap::Parser;
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use mail_migration::cli::{Cli, CliHandler};
use mail_migration::config::MigrationConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing for logging
    let level = if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = MigrationConfig::load(cli.config.as_deref())?;
    let handler = CliHandler::new(config);

    // Stop before the next mailbox on Ctrl-C; finished mailboxes stay written
    let cancel = handler.cancel_flag();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current mailbox");
                cancel.store(true, Ordering::SeqCst);
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    handler.handle_command(cli.command).await
}
