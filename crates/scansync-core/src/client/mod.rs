//! Client side of the sync protocol: the transport seam and the sync loop.

mod http;
mod runner;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Scope;
use crate::protocol::{InitialResponse, PullRequest, PullResponse, PushRequest, PushResponse};

pub use http::HttpTransport;
pub use runner::{backoff_delay, CycleReport, RunnerConfig, SyncRunner};

/// Network boundary used by [`SyncRunner`].
///
/// Implementations report connectivity problems as [`crate::Error::Transport`]
/// so the runner knows it may retry.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn fetch_initial(
        &self,
        scope: Scope,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<InitialResponse>;

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse>;

    async fn push(&self, request: &PushRequest) -> Result<PushResponse>;
}
