use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] scansync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),
    #[error("Invalid {event_type} event: {details}")]
    InvalidEvent {
        event_type: &'static str,
        details: String,
    },
    #[error("Missing {0}; pass the flag or set the environment variable")]
    NotConfigured(&'static str),
}
