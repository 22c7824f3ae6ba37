//! scansync CLI - offline scanner client
//!
//! Queues check-ins and stock adjustments locally and syncs them with the
//! scansync API when a connection is available.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::audit::run_audit;
use crate::commands::common::{resolve_queue_path, RemoteSettings};
use crate::commands::enqueue::{run_adjust, run_checkin};
use crate::commands::outbox::run_outbox;
use crate::commands::records::run_records;
use crate::commands::rejected::run_rejected;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scansync=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let queue_path = resolve_queue_path(cli.queue_path);

    match cli.command {
        Commands::Status { scope, json } => run_status(scope, json, &queue_path)?,
        Commands::Checkin {
            ticket_id,
            code,
            event_id,
            source,
        } => run_checkin(&ticket_id, &code, &event_id, &source, &queue_path)?,
        Commands::Adjust {
            item_id,
            delta,
            reason,
        } => run_adjust(&item_id, delta, reason.as_deref(), &queue_path)?,
        Commands::Outbox { scope, json } => run_outbox(scope, json, &queue_path)?,
        Commands::Records { scope, json } => run_records(scope, json, &queue_path)?,
        Commands::Audit { limit, json } => run_audit(limit, json, &queue_path)?,
        Commands::Rejected { command } => run_rejected(command, &queue_path)?,
        Commands::Sync {
            scope,
            watch,
            interval,
        } => {
            let remote = RemoteSettings {
                api_url: cli.api_url,
                session_token: cli.session_token,
                client_id: cli.client_id,
            };
            run_sync(&remote, scope, watch, interval, &queue_path).await?;
        }
    }

    Ok(())
}
