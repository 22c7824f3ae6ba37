//! scansync-core - Core library for scansync
//!
//! This crate contains the models, server-side event log and mutation ledger,
//! the durable offline queue, and the client sync loop shared by the API
//! server and the scanner CLI.

pub mod client;
pub mod db;
pub mod error;
pub mod models;
pub mod protocol;
pub mod queue;
pub mod services;
pub mod util;

pub use error::{Error, Result, ValidationIssue};
pub use models::{Record, Scope, SyncEvent};
