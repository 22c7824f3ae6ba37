//! Server sync engine: baseline export, incremental pull, and batched push.

#![allow(clippy::cast_possible_wrap)]

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use tokio::sync::Mutex;

use crate::db::{
    AppendOutcome, Database, MutationLedger, PermissionRepository, RecordRepository,
    SqliteEventLog, SqliteMutationLedger, SqlitePermissionRepository, SqliteRecordRepository,
};
use crate::error::{Error, Result, ValidationIssue};
use crate::models::{
    invalid_payload_message, scope_of_type, CandidateEvent, EventKind, Permission, PushOutcome,
    Record, Scope, SkipReason, SkippedEvent, SyncMutation,
};
use crate::protocol::{InitialResponse, PullRequest, PullResponse, PushRequest};

/// Thread-safe handle to the server store.
///
/// Every operation locks the connection for its whole transaction, so
/// pushes are serialized in-process as well as by SQLite's write lock.
#[derive(Clone)]
pub struct SyncService {
    db: Arc<Mutex<Database>>,
}

impl SyncService {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the store at `path`, creating parent directories as needed.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::new(Database::open(path)?))
    }

    /// In-memory store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub async fn has_permission(&self, user_id: &str, permission: Permission) -> Result<bool> {
        let db = self.db.lock().await;
        SqlitePermissionRepository::new(db.connection()).has_permission(user_id, permission)
    }

    /// `scanning` plus the scope's own permission
    pub async fn can_sync(&self, user_id: &str, scope: Scope) -> Result<bool> {
        let db = self.db.lock().await;
        let permissions = SqlitePermissionRepository::new(db.connection());
        Ok(permissions.has_permission(user_id, Permission::Scanning)?
            && permissions.has_permission(user_id, scope.required_permission())?)
    }

    pub async fn grant_permission(&self, user_id: &str, permission: Permission) -> Result<()> {
        let db = self.db.lock().await;
        SqlitePermissionRepository::new(db.connection()).grant(user_id, permission)
    }

    pub async fn revoke_permission(&self, user_id: &str, permission: Permission) -> Result<bool> {
        let db = self.db.lock().await;
        SqlitePermissionRepository::new(db.connection()).revoke(user_id, permission)
    }

    /// Load records directly into the store without logging events.
    ///
    /// Used to seed a scope before scanners connect; baselines pick them up.
    pub async fn import_records(&self, records: &[Record]) -> Result<usize> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let store = SqliteRecordRepository::new(&tx);
        for record in records {
            store.upsert(record)?;
        }
        tx.commit()?;
        tracing::info!(count = records.len(), "Imported records");
        Ok(records.len())
    }

    /// Current log high-water mark of a scope
    pub async fn server_seq(&self, scope: Scope) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteEventLog::new(db.connection()).head(scope)
    }

    pub async fn get_record(&self, scope: Scope, id: &str) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).get(scope, id)
    }

    pub async fn baseline(
        &self,
        scope: Scope,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<InitialResponse> {
        let mut db = self.db.lock().await;
        baseline_page(db.connection_mut(), scope, cursor, limit)
    }

    pub async fn pull(&self, request: &PullRequest, limit: usize) -> Result<PullResponse> {
        request.validate()?;
        let mut db = self.db.lock().await;
        pull_page(db.connection_mut(), request.scope, request.last_server_seq, limit)
    }

    pub async fn push(&self, request: &PushRequest) -> Result<PushOutcome> {
        let mut db = self.db.lock().await;
        push_batch(db.connection_mut(), request)
    }
}

fn baseline_page(
    conn: &mut Connection,
    scope: Scope,
    cursor: Option<&str>,
    limit: usize,
) -> Result<InitialResponse> {
    let tx = conn.transaction()?;
    let mut records = SqliteRecordRepository::new(&tx).list_page(scope, cursor, limit + 1)?;
    let server_seq = SqliteEventLog::new(&tx).head(scope)?;
    tx.commit()?;

    let has_more = records.len() > limit;
    records.truncate(limit);
    let next_cursor = if has_more {
        records.last().map(|record| record.id().to_string())
    } else {
        None
    };

    Ok(InitialResponse {
        scope,
        records,
        has_more,
        next_cursor,
        server_seq,
    })
}

fn pull_page(
    conn: &mut Connection,
    scope: Scope,
    last_server_seq: i64,
    limit: usize,
) -> Result<PullResponse> {
    let tx = conn.transaction()?;
    let log = SqliteEventLog::new(&tx);
    let mut events = log.events_after(scope, last_server_seq, limit + 1)?;
    let server_seq = log.head(scope)?;
    tx.commit()?;

    let has_more = events.len() > limit;
    events.truncate(limit);
    let next_cursor = events.last().map(|event| event.server_seq);

    Ok(PullResponse {
        scope,
        events,
        server_seq,
        has_more,
        next_cursor,
    })
}

/// Resolve the typed kind of a candidate, reporting issues against its
/// position in the batch.
fn parse_candidate(scope: Scope, index: usize, candidate: &CandidateEvent) -> Result<EventKind> {
    let invalid = |issues: Vec<ValidationIssue>| {
        Error::validation(invalid_payload_message(scope), issues)
    };

    match scope_of_type(&candidate.event_type) {
        None => {
            return Err(invalid(vec![ValidationIssue::new(
                format!("events[{index}].type"),
                format!("unknown event type `{}`", candidate.event_type),
            )]))
        }
        Some(event_scope) if event_scope != scope => {
            return Err(invalid(vec![ValidationIssue::new(
                format!("events[{index}].type"),
                format!(
                    "`{}` belongs to scope `{event_scope}`, not `{scope}`",
                    candidate.event_type
                ),
            )]))
        }
        Some(_) => {}
    }

    let prefix = format!("events[{index}].payload");
    EventKind::parse(&candidate.event_type, &candidate.payload).map_err(|issues| {
        invalid(
            issues
                .into_iter()
                .map(|issue| issue.nested(&prefix))
                .collect(),
        )
    })
}

fn push_batch(conn: &mut Connection, request: &PushRequest) -> Result<PushOutcome> {
    request.validate()?;
    let scope = request.scope;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let ledger = SqliteMutationLedger::new(&tx);
    let log = SqliteEventLog::new(&tx);
    let store = SqliteRecordRepository::new(&tx);

    let existing = ledger.get(&request.client_mutation_id)?;
    if let Some(existing) = &existing {
        if existing.client_id != request.client_id || existing.scope != scope {
            return Err(Error::validation(
                "Invalid push request",
                vec![ValidationIssue::new(
                    "clientMutationId",
                    "already used by a different client or scope",
                )],
            ));
        }
        if let (true, Some(outcome)) = (existing.is_acknowledged(), &existing.outcome) {
            tracing::debug!(
                %scope,
                events = outcome.events.len(),
                "Replaying acknowledged mutation"
            );
            return Ok(outcome.clone());
        }
    }

    let head = log.head(scope)?;
    if request.last_known_server_seq > head {
        tracing::warn!(
            %scope,
            last_known = request.last_known_server_seq,
            server_seq = head,
            "Client watermark is ahead of the log"
        );
    }

    let mut accepted = Vec::new();
    let mut skipped = Vec::new();
    for (index, candidate) in request.events.iter().enumerate() {
        let skip = |reason| SkippedEvent {
            id: candidate.id.clone(),
            dedupe_key: candidate.dedupe_key.clone(),
            reason,
        };

        if let Some(key) = candidate.dedupe_key.as_deref() {
            if log.dedupe_key_exists(scope, key)? {
                skipped.push(skip(SkipReason::DuplicateDedupeKey));
                continue;
            }
        }
        if log.contains(&candidate.id)? {
            skipped.push(skip(SkipReason::DuplicateEventId));
            continue;
        }

        let kind = parse_candidate(scope, index, candidate)?;
        let current = store.get(scope, kind.record_id())?;
        let prefix = format!("events[{index}].payload");
        let change = kind.apply(current, candidate.occurred_at).map_err(|issues| {
            Error::validation(
                invalid_payload_message(scope),
                issues
                    .into_iter()
                    .map(|issue| issue.nested(&prefix))
                    .collect(),
            )
        })?;

        match log.append(scope, &request.client_id, &request.client_mutation_id, candidate)? {
            AppendOutcome::Appended(event) => {
                store.apply(&change)?;
                accepted.push(event);
            }
            AppendOutcome::Conflict => {
                let reason = match candidate.dedupe_key.as_deref() {
                    Some(key) if log.dedupe_key_exists(scope, key)? => {
                        SkipReason::DuplicateDedupeKey
                    }
                    _ => SkipReason::DuplicateEventId,
                };
                skipped.push(skip(reason));
            }
        }
    }

    let outcome = PushOutcome::applied(accepted, skipped);
    let now = Utc::now();
    ledger.upsert(&SyncMutation {
        client_mutation_id: request.client_mutation_id.clone(),
        client_id: request.client_id.clone(),
        scope,
        event_count: request.events.len() as i64,
        first_server_seq: outcome.first_server_seq(),
        last_server_seq: outcome.last_server_seq(),
        acknowledged_seq: Some(log.head(scope)?),
        outcome: Some(outcome.clone()),
        created_at: existing.map_or(now, |mutation| mutation.created_at),
        updated_at: now,
    })?;
    tx.commit()?;

    tracing::info!(
        %scope,
        applied = outcome.events.len(),
        skipped = outcome.skipped.len(),
        server_seq = outcome.last_server_seq(),
        "Applied push batch"
    );
    Ok(outcome)
}
