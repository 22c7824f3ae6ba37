use std::path::Path;
use std::time::Duration;

use scansync_core::client::{CycleReport, HttpTransport, RunnerConfig, SyncRunner};
use scansync_core::queue::OfflineQueue;
use scansync_core::util::normalize_text_option;
use scansync_core::Scope;
use tokio::sync::watch;

use crate::commands::common::{open_queue, resolve_client_id, scopes_or_all, RemoteSettings};
use crate::error::CliError;

pub async fn run_sync(
    remote: &RemoteSettings,
    scope: Option<Scope>,
    watch_mode: bool,
    interval_secs: u64,
    queue_path: &Path,
) -> Result<(), CliError> {
    let api_url = normalize_text_option(remote.api_url.clone())
        .ok_or(CliError::NotConfigured("SCANSYNC_API_URL"))?;
    let session_token = normalize_text_option(remote.session_token.clone())
        .ok_or(CliError::NotConfigured("SCANSYNC_SESSION_TOKEN"))?;
    let client_id = resolve_client_id(remote.client_id.clone(), queue_path)?;

    let transport = HttpTransport::new(api_url, session_token)?;
    let queue = open_queue(queue_path)?;
    let mut config = RunnerConfig::new(client_id);
    config.scopes = scopes_or_all(scope);
    config.interval = Duration::from_secs(interval_secs);
    let mut runner = SyncRunner::new(transport, queue, config);

    if watch_mode {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Stopping after the current cycle...");
                shutdown_tx.send(true).ok();
            }
        });
        println!("Syncing every {interval_secs}s; press Ctrl-C to stop.");
        runner.run(shutdown_rx).await?;
    } else {
        let reports = runner.run_cycle().await?;
        for line in format_cycle_lines(&reports) {
            println!("{line}");
        }
    }

    runner.into_queue().close()?;
    Ok(())
}

pub fn format_cycle_lines(reports: &[CycleReport]) -> Vec<String> {
    reports
        .iter()
        .map(|report| {
            let mut line = format!(
                "{:<10} seq {:<6} pulled {:<4} pushed {:<4} skipped {}",
                report.scope.as_str(),
                report.server_seq,
                report.pulled,
                report.pushed,
                report.skipped
            );
            if report.rejected > 0 {
                line.push_str(&format!(
                    " rejected {} (see `scansync rejected`)",
                    report.rejected
                ));
            }
            if let Some(records) = report.baseline_records {
                line.push_str(&format!(" (baseline: {records} records)"));
            }
            line
        })
        .collect()
}
