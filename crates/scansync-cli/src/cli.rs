use std::path::PathBuf;

use clap::{Parser, Subcommand};
use scansync_core::Scope;

#[derive(Parser)]
#[command(name = "scansync")]
#[command(about = "Scan tickets and stock offline, sync when the network is back")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the local offline queue
    #[arg(long, global = true, value_name = "PATH", env = "SCANSYNC_QUEUE_PATH")]
    pub queue_path: Option<PathBuf>,

    /// Base URL of the scansync API
    #[arg(long, global = true, value_name = "URL", env = "SCANSYNC_API_URL")]
    pub api_url: Option<String>,

    /// Portal session token used to obtain sync tokens
    #[arg(
        long,
        global = true,
        value_name = "TOKEN",
        env = "SCANSYNC_SESSION_TOKEN",
        hide_env_values = true
    )]
    pub session_token: Option<String>,

    /// Stable identifier of this scanner (generated and stored when omitted)
    #[arg(long, global = true, value_name = "ID", env = "SCANSYNC_CLIENT_ID")]
    pub client_id: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show watermark, queue status, and outbox size per scope
    Status {
        #[arg(long)]
        scope: Option<Scope>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a ticket check-in
    #[command(alias = "scan")]
    Checkin {
        /// Ticket id
        ticket_id: String,
        /// Code printed on the ticket
        #[arg(long)]
        code: String,
        /// Event the ticket admits to
        #[arg(long)]
        event_id: String,
        /// Gate or device label recorded with the scan
        #[arg(long, default_value = "cli")]
        source: String,
    },
    /// Queue a stock adjustment
    Adjust {
        /// Inventory item id
        item_id: String,
        /// Quantity change, e.g. -3
        #[arg(allow_hyphen_values = true)]
        delta: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List events waiting to be pushed
    Outbox {
        #[arg(long)]
        scope: Option<Scope>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List cached records of a scope
    Records {
        scope: Scope,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent queue operations
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect events the server refused
    Rejected {
        #[command(subcommand)]
        command: Option<RejectedCommands>,
    },
    /// Sync with the server
    Sync {
        #[arg(long)]
        scope: Option<Scope>,
        /// Keep syncing until interrupted
        #[arg(long)]
        watch: bool,
        /// Seconds between cycles in watch mode
        #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..=3_600))]
        interval: u64,
    },
}

#[derive(Subcommand)]
pub enum RejectedCommands {
    /// List refused events with the server's reason (default)
    List {
        #[arg(long)]
        scope: Option<Scope>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move refused events back to the outbox for the next sync
    Retry {
        /// Event ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Drop refused events for good
    Discard {
        /// Event ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}
