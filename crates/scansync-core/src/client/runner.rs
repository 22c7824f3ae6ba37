//! Sync loop: baseline on cold start, pull to catch up, push the outbox.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use super::SyncTransport;
use crate::error::{Error, Result, ValidationIssue};
use crate::models::{PushOutcome, Scope};
use crate::protocol::{PullRequest, PushRequest};
use crate::queue::{OfflineQueue, PendingEvent, QueueStatus};

/// Baseline attempts before giving up when the log keeps moving between pages
const BASELINE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub client_id: String,
    pub scopes: Vec<Scope>,
    /// Page size requested from `/sync/initial` (server default when `None`)
    pub initial_limit: Option<i64>,
    /// Page size requested from `/sync/pull` (server default when `None`)
    pub pull_limit: Option<i64>,
    /// Outbox events sent per push
    pub push_batch_size: usize,
    /// Attempts per push batch, all with the same `clientMutationId`
    pub push_attempts: u32,
    /// Pause between successful cycles in [`SyncRunner::run`]
    pub interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RunnerConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scopes: Scope::ALL.to_vec(),
            initial_limit: None,
            pull_limit: None,
            push_batch_size: 100,
            push_attempts: 3,
            interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

/// What one cycle did for a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub scope: Scope,
    /// Records loaded when the scope was cold
    pub baseline_records: Option<usize>,
    pub pulled: usize,
    pub pushed: usize,
    pub skipped: usize,
    /// Events the server refused, now parked in the queue
    pub rejected: usize,
    pub server_seq: i64,
}

/// Delay before retry number `failures` (1-based): `base * 2^(failures-1)`, capped.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(20);
    base.saturating_mul(1_u32 << exponent).min(max)
}

pub struct SyncRunner<T, Q> {
    transport: T,
    queue: Q,
    config: RunnerConfig,
}

impl<T: SyncTransport, Q: OfflineQueue> SyncRunner<T, Q> {
    pub const fn new(transport: T, queue: Q, config: RunnerConfig) -> Self {
        Self {
            transport,
            queue,
            config,
        }
    }

    pub const fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    pub fn into_queue(self) -> Q {
        self.queue
    }

    /// One pass over every configured scope.
    pub async fn run_cycle(&mut self) -> Result<Vec<CycleReport>> {
        let mut reports = Vec::with_capacity(self.config.scopes.len());
        for scope in self.config.scopes.clone() {
            reports.push(self.sync_scope(scope).await?);
        }
        Ok(reports)
    }

    pub async fn sync_scope(&mut self, scope: Scope) -> Result<CycleReport> {
        let mut report = CycleReport {
            scope,
            baseline_records: None,
            pulled: 0,
            pushed: 0,
            skipped: 0,
            rejected: 0,
            server_seq: 0,
        };

        if self.queue.sync_state(scope)?.status == QueueStatus::Uninitialized {
            report.baseline_records = Some(self.load_baseline(scope).await?);
        }
        report.pulled += self.catch_up(scope).await?;

        let flushed = self.flush_outbox(scope).await?;
        report.pushed = flushed.pushed;
        report.skipped = flushed.skipped;
        report.rejected = flushed.rejected;
        let pushed = flushed.pushed;
        if pushed > 0 {
            // Fold our own accepted events into the cache
            report.pulled += self.catch_up(scope).await?;
        }

        report.server_seq = self.queue.sync_state(scope)?.last_server_seq;
        tracing::debug!(
            %scope,
            pulled = report.pulled,
            pushed = report.pushed,
            skipped = report.skipped,
            rejected = report.rejected,
            server_seq = report.server_seq,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Loop cycles until `shutdown` turns true.
    ///
    /// Shutdown is observed between cycles, so a consumed batch is always
    /// acknowledged or requeued before the loop exits. Local storage
    /// failures end the loop; everything else backs off and retries.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut failures = 0_u32;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_cycle().await {
                Ok(_) => {
                    failures = 0;
                    self.config.interval
                }
                Err(error @ (Error::Database(_) | Error::Io(_))) => return Err(error),
                Err(error) => {
                    failures = failures.saturating_add(1);
                    let delay =
                        backoff_delay(self.config.backoff_base, self.config.backoff_max, failures);
                    tracing::warn!(
                        %error,
                        failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Sync cycle failed; backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Sync loop stopped");
        Ok(())
    }

    /// Page the baseline to completion and replace the local cache.
    ///
    /// Restarts when the log advances between pages so the snapshot and its
    /// watermark describe the same point in the log.
    async fn load_baseline(&mut self, scope: Scope) -> Result<usize> {
        for attempt in 1..=BASELINE_ATTEMPTS {
            let first = self
                .transport
                .fetch_initial(scope, None, self.config.initial_limit)
                .await?;
            let server_seq = first.server_seq;
            let mut records = first.records;
            let mut cursor = first.next_cursor.filter(|_| first.has_more);
            let mut consistent = true;

            while let Some(after) = cursor.take() {
                let page = self
                    .transport
                    .fetch_initial(scope, Some(&after), self.config.initial_limit)
                    .await?;
                if page.server_seq != server_seq {
                    consistent = false;
                    break;
                }
                records.extend(page.records);
                cursor = page.next_cursor.filter(|_| page.has_more);
            }

            if consistent {
                self.queue.apply_snapshot(scope, &records, server_seq)?;
                tracing::info!(%scope, records = records.len(), server_seq, "Loaded baseline");
                return Ok(records.len());
            }
            tracing::debug!(%scope, attempt, "Log advanced during baseline; restarting");
        }

        Err(Error::Transport(format!(
            "baseline for {scope} did not settle after {BASELINE_ATTEMPTS} attempts"
        )))
    }

    async fn catch_up(&mut self, scope: Scope) -> Result<usize> {
        let mut applied = 0;
        loop {
            let request = PullRequest {
                scope,
                last_server_seq: self.queue.sync_state(scope)?.last_server_seq,
                limit: self.config.pull_limit,
            };
            let page = self.transport.pull(&request).await?;
            applied += self.queue.apply_deltas(scope, &page.events)?;
            if !page.has_more || page.events.is_empty() {
                return Ok(applied);
            }
        }
    }

    /// Push the outbox batch by batch.
    ///
    /// Events the server refuses are parked and the rest go back to the
    /// outbox for the next batch, so one bad event never blocks the scope.
    async fn flush_outbox(&mut self, scope: Scope) -> Result<Flushed> {
        let mut flushed = Flushed::default();
        loop {
            let batch = self
                .queue
                .consume_events(scope, self.config.push_batch_size)?;
            if batch.is_empty() {
                return Ok(flushed);
            }

            let request = PushRequest {
                scope,
                client_id: self.config.client_id.clone(),
                client_mutation_id: Uuid::now_v7().to_string(),
                last_known_server_seq: self.queue.sync_state(scope)?.last_server_seq,
                events: batch.iter().map(PendingEvent::to_candidate).collect(),
            };

            match self.push_with_retry(&request).await {
                Ok(outcome) => {
                    let ids: Vec<String> = batch.iter().map(|event| event.id.clone()).collect();
                    self.queue.mark_acknowledged(scope, &ids)?;
                    flushed.pushed += outcome.events.len();
                    flushed.skipped += outcome.skipped.len();
                }
                Err(error) => {
                    let Some(blamed) = refused_positions(&error, batch.len()) else {
                        self.queue.requeue_events(scope, &batch)?;
                        return Err(error);
                    };

                    let mut refused = Vec::with_capacity(blamed.len());
                    let mut retry = Vec::with_capacity(batch.len() - blamed.len());
                    for (position, event) in batch.into_iter().enumerate() {
                        if blamed.contains(&position) {
                            refused.push((event, refusal_reason(&error, position)));
                        } else {
                            retry.push(event);
                        }
                    }
                    tracing::warn!(
                        %scope,
                        %error,
                        refused = refused.len(),
                        retried = retry.len(),
                        "Server refused push; parking blamed events"
                    );
                    self.queue.reject_events(scope, &refused)?;
                    self.queue.requeue_events(scope, &retry)?;
                    flushed.rejected += refused.len();
                }
            }
        }
    }

    async fn push_with_retry(&self, request: &PushRequest) -> Result<PushOutcome> {
        let attempts = self.config.push_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.push(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if error.is_retryable() && attempt < attempts => {
                    let delay =
                        backoff_delay(self.config.backoff_base, self.config.backoff_max, attempt);
                    tracing::debug!(%error, attempt, "Push failed; retrying same mutation");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[derive(Debug, Default)]
struct Flushed {
    pushed: usize,
    skipped: usize,
    rejected: usize,
}

/// Batch positions a refusal is about, or `None` when the batch itself is fine
/// and should be retried later (auth, permissions, connectivity).
fn refused_positions(error: &Error, batch_len: usize) -> Option<BTreeSet<usize>> {
    match error {
        Error::Validation { issues, .. } => {
            let blamed: BTreeSet<usize> = issues
                .iter()
                .filter_map(issue_position)
                .filter(|position| *position < batch_len)
                .collect();
            Some(if blamed.is_empty() {
                (0..batch_len).collect()
            } else {
                blamed
            })
        }
        Error::Rejected { status, .. } if !matches!(status, 401 | 403) => {
            Some((0..batch_len).collect())
        }
        _ => None,
    }
}

/// Position from a path such as `events[2].payload.delta`
fn issue_position(issue: &ValidationIssue) -> Option<usize> {
    let (index, _) = issue.path.strip_prefix("events[")?.split_once(']')?;
    index.parse().ok()
}

fn refusal_reason(error: &Error, position: usize) -> String {
    let Error::Validation { message, issues } = error else {
        return error.to_string();
    };
    let details: Vec<String> = issues
        .iter()
        .filter(|issue| issue_position(issue) == Some(position))
        .map(|issue| format!("{}: {}", issue.path, issue.message))
        .collect();
    if details.is_empty() {
        message.clone()
    } else {
        format!("{message} ({})", details.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CandidateEvent, EventKind, InventoryAdjust, InventoryItem, Record, TicketCheckin,
        TicketStatus,
    };
    use crate::protocol::{
        clamp_limit, InitialResponse, PullResponse, PushResponse, INITIAL_DEFAULT_LIMIT,
        INITIAL_MAX_LIMIT, PULL_DEFAULT_LIMIT, PULL_MAX_LIMIT,
    };
    use crate::queue::SqliteOfflineQueue;
    use crate::services::SyncService;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Calls the server engine directly
    struct LocalTransport {
        service: SyncService,
        failing_pushes: AtomicU32,
        mutation_ids: Mutex<Vec<String>>,
    }

    impl LocalTransport {
        fn new(service: SyncService) -> Self {
            Self {
                service,
                failing_pushes: AtomicU32::new(0),
                mutation_ids: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SyncTransport for LocalTransport {
        async fn fetch_initial(
            &self,
            scope: Scope,
            cursor: Option<&str>,
            limit: Option<i64>,
        ) -> Result<InitialResponse> {
            let limit = clamp_limit(limit, INITIAL_DEFAULT_LIMIT, INITIAL_MAX_LIMIT);
            self.service.baseline(scope, cursor, limit).await
        }

        async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
            let limit = clamp_limit(request.limit, PULL_DEFAULT_LIMIT, PULL_MAX_LIMIT);
            self.service.pull(request, limit).await
        }

        async fn push(&self, request: &PushRequest) -> Result<PushResponse> {
            self.mutation_ids
                .lock()
                .unwrap()
                .push(request.client_mutation_id.clone());
            let remaining = self.failing_pushes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_pushes.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Transport("connection reset".to_string()));
            }
            self.service.push(request).await
        }
    }

    fn config() -> RunnerConfig {
        RunnerConfig {
            initial_limit: Some(2),
            pull_limit: Some(2),
            backoff_base: Duration::ZERO,
            ..RunnerConfig::new("scanner-1")
        }
    }

    fn item(id: &str, quantity: i64) -> Record {
        Record::Inventory(InventoryItem {
            id: id.to_string(),
            name: format!("Item {id}"),
            sku: None,
            quantity,
            location: None,
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        })
    }

    fn adjust(item_id: &str, delta: i64) -> EventKind {
        EventKind::InventoryAdjust(InventoryAdjust {
            item_id: item_id.to_string(),
            delta,
            reason: None,
        })
    }

    async fn server_records(service: &SyncService, scope: Scope) -> Vec<Record> {
        service
            .baseline(scope, None, INITIAL_MAX_LIMIT)
            .await
            .unwrap()
            .records
    }

    /// Another scanner pushes straight to the server
    async fn remote_push(service: &SyncService, mutation_id: &str, events: Vec<CandidateEvent>) {
        service
            .push(&PushRequest {
                scope: Scope::Inventory,
                client_id: "scanner-2".to_string(),
                client_mutation_id: mutation_id.to_string(),
                last_known_server_seq: 0,
                events,
            })
            .await
            .unwrap();
    }

    fn remote_adjust(id: &str, item_id: &str, delta: i64) -> CandidateEvent {
        let kind = adjust(item_id, delta);
        CandidateEvent {
            id: id.to_string(),
            dedupe_key: None,
            event_type: kind.event_type().to_string(),
            payload: kind.to_payload(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, max, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, max, 7), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, max, 500), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn baseline_and_pull_reconstruct_server_state() {
        let service = SyncService::open_in_memory().unwrap();
        service
            .import_records(&[item("item-a", 5), item("item-b", 1), item("item-c", 9)])
            .await
            .unwrap();
        remote_push(&service, "r-1", vec![remote_adjust("r1", "item-a", 2)]).await;

        let transport = LocalTransport::new(service.clone());
        let mut runner = SyncRunner::new(
            transport,
            SqliteOfflineQueue::open_in_memory().unwrap(),
            config(),
        );

        let report = runner.sync_scope(Scope::Inventory).await.unwrap();
        assert_eq!(report.baseline_records, Some(3));
        assert_eq!(report.server_seq, 1);

        remote_push(
            &service,
            "r-2",
            vec![
                remote_adjust("r2", "item-b", 4),
                remote_adjust("r3", "item-c", -9),
                remote_adjust("r4", "item-a", 1),
            ],
        )
        .await;

        let report = runner.sync_scope(Scope::Inventory).await.unwrap();
        assert_eq!(report.baseline_records, None);
        assert_eq!(report.pulled, 3);
        assert_eq!(report.server_seq, 4);

        assert_eq!(
            runner.queue().records(Scope::Inventory).unwrap(),
            server_records(&service, Scope::Inventory).await
        );
    }

    #[tokio::test]
    async fn local_events_are_pushed_and_folded_back() {
        let service = SyncService::open_in_memory().unwrap();
        service.import_records(&[item("item-a", 5)]).await.unwrap();

        let mut runner = SyncRunner::new(
            LocalTransport::new(service.clone()),
            SqliteOfflineQueue::open_in_memory().unwrap(),
            config(),
        );
        runner.sync_scope(Scope::Inventory).await.unwrap();

        runner
            .queue_mut()
            .enqueue_event(&adjust("item-a", -3), None)
            .unwrap();
        assert_eq!(
            runner.queue().sync_state(Scope::Inventory).unwrap().status,
            QueueStatus::Dirty
        );

        let report = runner.sync_scope(Scope::Inventory).await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.pulled, 1);

        let state = runner.queue().sync_state(Scope::Inventory).unwrap();
        assert_eq!(state.status, QueueStatus::Synced);
        assert_eq!(state.last_server_seq, 1);
        assert!(runner.queue().pending_events(None).unwrap().is_empty());
        assert_eq!(
            runner.queue().records(Scope::Inventory).unwrap(),
            server_records(&service, Scope::Inventory).await
        );
    }

    #[tokio::test]
    async fn duplicate_checkin_is_skipped_by_server() {
        let service = SyncService::open_in_memory().unwrap();
        let checkin = EventKind::TicketCheckin(TicketCheckin {
            ticket_id: "T-1".to_string(),
            code: "ABC123".to_string(),
            event_id: "gala".to_string(),
            status: TicketStatus::CheckedIn,
            attempted_at: Utc::now(),
            source: "gate-a".to_string(),
        });

        let mut first = SyncRunner::new(
            LocalTransport::new(service.clone()),
            SqliteOfflineQueue::open_in_memory().unwrap(),
            config(),
        );
        let mut second = SyncRunner::new(
            LocalTransport::new(service.clone()),
            SqliteOfflineQueue::open_in_memory().unwrap(),
            RunnerConfig::new("scanner-2"),
        );
        for runner in [&mut first, &mut second] {
            runner
                .queue_mut()
                .enqueue_event(&checkin, checkin.default_dedupe_key())
                .unwrap();
        }

        let report = first.sync_scope(Scope::Tickets).await.unwrap();
        assert_eq!((report.pushed, report.skipped), (1, 0));
        let report = second.sync_scope(Scope::Tickets).await.unwrap();
        assert_eq!((report.pushed, report.skipped), (0, 1));

        assert_eq!(service.server_seq(Scope::Tickets).await.unwrap(), 1);
        assert_eq!(
            second.queue().records(Scope::Tickets).unwrap(),
            first.queue().records(Scope::Tickets).unwrap()
        );
    }

    #[tokio::test]
    async fn transient_push_failure_retries_same_mutation() {
        let service = SyncService::open_in_memory().unwrap();
        service.import_records(&[item("item-a", 5)]).await.unwrap();

        let transport = LocalTransport::new(service.clone());
        transport.failing_pushes.store(1, Ordering::SeqCst);
        let mut runner = SyncRunner::new(
            transport,
            SqliteOfflineQueue::open_in_memory().unwrap(),
            config(),
        );
        runner
            .queue_mut()
            .enqueue_event(&adjust("item-a", 1), None)
            .unwrap();

        let report = runner.sync_scope(Scope::Inventory).await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(service.server_seq(Scope::Inventory).await.unwrap(), 1);

        let ids = runner.transport.mutation_ids.lock().unwrap().clone();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn exhausted_push_requeues_batch() {
        let service = SyncService::open_in_memory().unwrap();
        service.import_records(&[item("item-a", 5)]).await.unwrap();

        let transport = LocalTransport::new(service.clone());
        transport.failing_pushes.store(10, Ordering::SeqCst);
        let mut runner = SyncRunner::new(
            transport,
            SqliteOfflineQueue::open_in_memory().unwrap(),
            RunnerConfig {
                push_attempts: 2,
                ..config()
            },
        );
        let queued = runner
            .queue_mut()
            .enqueue_event(&adjust("item-a", 1), None)
            .unwrap();

        let err = runner.sync_scope(Scope::Inventory).await.unwrap_err();
        assert!(err.is_retryable());

        let pending = runner.queue().pending_events(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, queued.id);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(service.server_seq(Scope::Inventory).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refused_event_is_parked_and_the_rest_still_sync() {
        let service = SyncService::open_in_memory().unwrap();
        service
            .import_records(&[item("item-a", 5), item("item-b", 4)])
            .await
            .unwrap();

        let mut first = SyncRunner::new(
            LocalTransport::new(service.clone()),
            SqliteOfflineQueue::open_in_memory().unwrap(),
            config(),
        );
        let mut second = SyncRunner::new(
            LocalTransport::new(service.clone()),
            SqliteOfflineQueue::open_in_memory().unwrap(),
            RunnerConfig::new("scanner-2"),
        );
        for runner in [&mut first, &mut second] {
            runner.sync_scope(Scope::Inventory).await.unwrap();
            runner
                .queue_mut()
                .enqueue_event(&adjust("item-a", -4), None)
                .unwrap();
        }
        first.sync_scope(Scope::Inventory).await.unwrap();

        let valid = second
            .queue_mut()
            .enqueue_event(&adjust("item-b", 1), None)
            .unwrap();
        let report = second.sync_scope(Scope::Inventory).await.unwrap();
        assert_eq!((report.pushed, report.rejected), (1, 1));

        let parked = second.queue().rejected_events(None).unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].event.payload["itemId"], "item-a");
        assert!(parked[0].reason.contains("events[0].payload.delta"));
        assert_ne!(parked[0].event.id, valid.id);

        assert!(second.queue().pending_events(None).unwrap().is_empty());
        assert_eq!(
            second.queue().sync_state(Scope::Inventory).unwrap().status,
            QueueStatus::Synced
        );
        assert_eq!(
            second.queue().records(Scope::Inventory).unwrap(),
            server_records(&service, Scope::Inventory).await
        );
        let item_b = service
            .get_record(Scope::Inventory, "item-b")
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(item_b, Record::Inventory(item) if item.quantity == 5));

        // Nothing is resent on later cycles
        let report = second.sync_scope(Scope::Inventory).await.unwrap();
        assert_eq!((report.pushed, report.rejected), (0, 0));
        assert_eq!(service.server_seq(Scope::Inventory).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn forbidden_push_keeps_batch_queued() {
        struct ForbiddenPush;

        #[async_trait]
        impl SyncTransport for ForbiddenPush {
            async fn fetch_initial(
                &self,
                scope: Scope,
                _cursor: Option<&str>,
                _limit: Option<i64>,
            ) -> Result<InitialResponse> {
                Ok(InitialResponse {
                    scope,
                    records: Vec::new(),
                    has_more: false,
                    next_cursor: None,
                    server_seq: 0,
                })
            }

            async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
                Ok(PullResponse {
                    scope: request.scope,
                    events: Vec::new(),
                    server_seq: 0,
                    has_more: false,
                    next_cursor: None,
                })
            }

            async fn push(&self, _request: &PushRequest) -> Result<PushResponse> {
                Err(Error::Rejected {
                    status: 403,
                    message: "Missing permission for scope `inventory`".to_string(),
                })
            }
        }

        let mut runner = SyncRunner::new(
            ForbiddenPush,
            SqliteOfflineQueue::open_in_memory().unwrap(),
            config(),
        );
        runner
            .queue_mut()
            .enqueue_event(&adjust("item-a", 1), None)
            .unwrap();

        let err = runner.sync_scope(Scope::Inventory).await.unwrap_err();
        assert!(matches!(err, Error::Rejected { status: 403, .. }));
        assert_eq!(runner.queue().pending_events(None).unwrap().len(), 1);
        assert!(runner.queue().rejected_events(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unappliable_pull_triggers_rebaseline() {
        let service = SyncService::open_in_memory().unwrap();
        service.import_records(&[item("item-a", 5)]).await.unwrap();

        let mut runner = SyncRunner::new(
            LocalTransport::new(service.clone()),
            SqliteOfflineQueue::open_in_memory().unwrap(),
            config(),
        );
        runner.sync_scope(Scope::Inventory).await.unwrap();

        // Drop the cached item so the next pulled adjustment has nothing to land on
        runner
            .queue_mut()
            .apply_snapshot(Scope::Inventory, &[], 0)
            .unwrap();
        remote_push(&service, "r-1", vec![remote_adjust("r1", "item-a", 2)]).await;

        let report = runner.sync_scope(Scope::Inventory).await.unwrap();
        assert_eq!(report.baseline_records, None);
        assert_eq!(
            runner.queue().sync_state(Scope::Inventory).unwrap().status,
            QueueStatus::Uninitialized
        );

        let report = runner.sync_scope(Scope::Inventory).await.unwrap();
        assert_eq!(report.baseline_records, Some(1));
        assert_eq!(
            runner.queue().records(Scope::Inventory).unwrap(),
            server_records(&service, Scope::Inventory).await
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let service = SyncService::open_in_memory().unwrap();
        let mut runner = SyncRunner::new(
            LocalTransport::new(service),
            SqliteOfflineQueue::open_in_memory().unwrap(),
            RunnerConfig {
                interval: Duration::from_secs(3600),
                ..config()
            },
        );
        let (tx, rx) = watch::channel(false);

        let (result, ()) = tokio::join!(runner.run(rx), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        });
        result.unwrap();

        for scope in Scope::ALL {
            assert_eq!(
                runner.queue().sync_state(scope).unwrap().status,
                QueueStatus::Synced
            );
        }
    }
}
