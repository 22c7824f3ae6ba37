//! Sync events: the persisted log entry and the closed set of event kinds

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use super::{InventoryItem, Record, RecordChange, Scope, Ticket, TicketStatus};
use crate::error::ValidationIssue;
use crate::util::{from_millis, to_millis};

pub const TICKET_CHECKIN: &str = "ticket.checkin";
pub const TICKET_VOID: &str = "ticket.void";
pub const INVENTORY_UPSERT: &str = "inventory.upsert";
pub const INVENTORY_ADJUST: &str = "inventory.adjust";
pub const INVENTORY_REMOVE: &str = "inventory.remove";

/// An immutable entry of the per-scope event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: String,
    pub scope: Scope,
    pub client_id: String,
    pub client_mutation_id: String,
    #[serde(default)]
    pub dedupe_key: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
    /// Assigned by the server when the event is persisted
    pub server_seq: i64,
}

impl SyncEvent {
    /// Parse the payload into its typed kind.
    pub fn kind(&self) -> Result<EventKind, Vec<ValidationIssue>> {
        EventKind::parse(&self.event_type, &self.payload)
    }
}

/// An event as submitted by a client, before sequencing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketCheckin {
    pub ticket_id: String,
    pub code: String,
    pub event_id: String,
    pub status: TicketStatus,
    pub attempted_at: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketVoid {
    pub ticket_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpsert {
    pub item_id: String,
    pub name: String,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAdjust {
    pub item_id: String,
    pub delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRemove {
    pub item_id: String,
}

/// Every event type the protocol understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    TicketCheckin(TicketCheckin),
    TicketVoid(TicketVoid),
    InventoryUpsert(InventoryUpsert),
    InventoryAdjust(InventoryAdjust),
    InventoryRemove(InventoryRemove),
}

/// Scope an event type belongs to, or `None` for unknown types.
pub fn scope_of_type(event_type: &str) -> Option<Scope> {
    match event_type {
        TICKET_CHECKIN | TICKET_VOID => Some(Scope::Tickets),
        INVENTORY_UPSERT | INVENTORY_ADJUST | INVENTORY_REMOVE => Some(Scope::Inventory),
        _ => None,
    }
}

/// Error message reported when a batch fails payload validation.
pub const fn invalid_payload_message(scope: Scope) -> &'static str {
    match scope {
        Scope::Inventory => "Invalid inventory event payload",
        Scope::Tickets => "Invalid ticket event payload",
    }
}

impl EventKind {
    /// Validate `payload` against the schema for `event_type`.
    ///
    /// All problems are collected; issue paths are relative to the payload.
    pub fn parse(event_type: &str, payload: &Value) -> Result<Self, Vec<ValidationIssue>> {
        let mut reader = PayloadReader::new(payload);
        let kind = match event_type {
            TICKET_CHECKIN => {
                let ticket_id = reader.required_str("ticketId");
                let code = reader.required_str("code");
                let event_id = reader.required_str("eventId");
                let status = reader.required_parsed::<TicketStatus>("status");
                let attempted_at = reader.required_timestamp("attemptedAt");
                let source = reader.required_str("source");
                match (ticket_id, code, event_id, status, attempted_at, source) {
                    (
                        Some(ticket_id),
                        Some(code),
                        Some(event_id),
                        Some(status),
                        Some(attempted_at),
                        Some(source),
                    ) => Some(Self::TicketCheckin(TicketCheckin {
                        ticket_id,
                        code,
                        event_id,
                        status,
                        attempted_at,
                        source,
                    })),
                    _ => None,
                }
            }
            TICKET_VOID => {
                let ticket_id = reader.required_str("ticketId");
                let reason = reader.required_str("reason");
                match (ticket_id, reason) {
                    (Some(ticket_id), Some(reason)) => {
                        Some(Self::TicketVoid(TicketVoid { ticket_id, reason }))
                    }
                    _ => None,
                }
            }
            INVENTORY_UPSERT => {
                let item_id = reader.required_str("itemId");
                let name = reader.required_str("name");
                let quantity = reader.required_i64("quantity");
                let sku = reader.optional_str("sku");
                let location = reader.optional_str("location");
                if quantity.is_some_and(|quantity| quantity < 0) {
                    reader.issue("quantity", "must not be negative");
                }
                match (item_id, name, quantity) {
                    (Some(item_id), Some(name), Some(quantity)) => {
                        Some(Self::InventoryUpsert(InventoryUpsert {
                            item_id,
                            name,
                            quantity,
                            sku,
                            location,
                        }))
                    }
                    _ => None,
                }
            }
            INVENTORY_ADJUST => {
                let item_id = reader.required_str("itemId");
                let delta = reader.required_i64("delta");
                let reason = reader.optional_str("reason");
                if delta == Some(0) {
                    reader.issue("delta", "must not be zero");
                }
                match (item_id, delta) {
                    (Some(item_id), Some(delta)) => Some(Self::InventoryAdjust(InventoryAdjust {
                        item_id,
                        delta,
                        reason,
                    })),
                    _ => None,
                }
            }
            INVENTORY_REMOVE => reader
                .required_str("itemId")
                .map(|item_id| Self::InventoryRemove(InventoryRemove { item_id })),
            other => {
                return Err(vec![ValidationIssue::new(
                    "type",
                    format!("unknown event type `{other}`"),
                )])
            }
        };
        reader.finish(kind)
    }

    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::TicketCheckin(_) => TICKET_CHECKIN,
            Self::TicketVoid(_) => TICKET_VOID,
            Self::InventoryUpsert(_) => INVENTORY_UPSERT,
            Self::InventoryAdjust(_) => INVENTORY_ADJUST,
            Self::InventoryRemove(_) => INVENTORY_REMOVE,
        }
    }

    pub const fn scope(&self) -> Scope {
        match self {
            Self::TicketCheckin(_) | Self::TicketVoid(_) => Scope::Tickets,
            Self::InventoryUpsert(_) | Self::InventoryAdjust(_) | Self::InventoryRemove(_) => {
                Scope::Inventory
            }
        }
    }

    /// Id of the record this event touches
    pub fn record_id(&self) -> &str {
        match self {
            Self::TicketCheckin(checkin) => &checkin.ticket_id,
            Self::TicketVoid(void) => &void.ticket_id,
            Self::InventoryUpsert(upsert) => &upsert.item_id,
            Self::InventoryAdjust(adjust) => &adjust.item_id,
            Self::InventoryRemove(remove) => &remove.item_id,
        }
    }

    /// Business-level dedupe key clients attach by default.
    ///
    /// A ticket can only be admitted once, so check-ins collapse per ticket.
    pub fn default_dedupe_key(&self) -> Option<String> {
        match self {
            Self::TicketCheckin(checkin) => Some(format!("ticket:{}", checkin.ticket_id)),
            _ => None,
        }
    }

    pub fn to_payload(&self) -> Value {
        let payload = match self {
            Self::TicketCheckin(inner) => serde_json::to_value(inner),
            Self::TicketVoid(inner) => serde_json::to_value(inner),
            Self::InventoryUpsert(inner) => serde_json::to_value(inner),
            Self::InventoryAdjust(inner) => serde_json::to_value(inner),
            Self::InventoryRemove(inner) => serde_json::to_value(inner),
        };
        payload.unwrap_or(Value::Null)
    }

    /// Compute the record change this event causes given the current record.
    ///
    /// `at` becomes the record's `updatedAt`; callers pass the event's
    /// `occurredAt` so server and clients materialize identical state.
    pub fn apply(
        &self,
        current: Option<Record>,
        at: DateTime<Utc>,
    ) -> Result<RecordChange, Vec<ValidationIssue>> {
        match self {
            Self::TicketCheckin(checkin) => {
                let current = as_ticket(current);
                let checked_in_at = if checkin.status == TicketStatus::CheckedIn {
                    Some(checkin.attempted_at)
                } else {
                    current.as_ref().and_then(|ticket| ticket.checked_in_at)
                };
                Ok(RecordChange::Upsert(Record::Ticket(Ticket {
                    id: checkin.ticket_id.clone(),
                    code: checkin.code.clone(),
                    event_id: checkin.event_id.clone(),
                    status: checkin.status,
                    holder_name: current.and_then(|ticket| ticket.holder_name),
                    checked_in_at,
                    updated_at: at,
                })))
            }
            Self::TicketVoid(void) => {
                let mut ticket = as_ticket(current).ok_or_else(|| {
                    vec![ValidationIssue::new(
                        "ticketId",
                        format!("ticket `{}` does not exist", void.ticket_id),
                    )]
                })?;
                ticket.status = TicketStatus::Void;
                ticket.updated_at = at;
                Ok(RecordChange::Upsert(Record::Ticket(ticket)))
            }
            Self::InventoryUpsert(upsert) => Ok(RecordChange::Upsert(Record::Inventory(
                InventoryItem {
                    id: upsert.item_id.clone(),
                    name: upsert.name.clone(),
                    sku: upsert.sku.clone(),
                    quantity: upsert.quantity,
                    location: upsert.location.clone(),
                    updated_at: at,
                },
            ))),
            Self::InventoryAdjust(adjust) => {
                let mut item = as_item(current).ok_or_else(|| {
                    vec![ValidationIssue::new(
                        "itemId",
                        format!("inventory item `{}` does not exist", adjust.item_id),
                    )]
                })?;
                let quantity = item.quantity.checked_add(adjust.delta).filter(|q| *q >= 0);
                let Some(quantity) = quantity else {
                    return Err(vec![ValidationIssue::new(
                        "delta",
                        format!(
                            "adjustment of {} would take `{}` below zero (on hand: {})",
                            adjust.delta, adjust.item_id, item.quantity
                        ),
                    )]);
                };
                item.quantity = quantity;
                item.updated_at = at;
                Ok(RecordChange::Upsert(Record::Inventory(item)))
            }
            Self::InventoryRemove(remove) => Ok(RecordChange::Delete {
                scope: Scope::Inventory,
                id: remove.item_id.clone(),
            }),
        }
    }
}

fn as_ticket(record: Option<Record>) -> Option<Ticket> {
    match record {
        Some(Record::Ticket(ticket)) => Some(ticket),
        _ => None,
    }
}

fn as_item(record: Option<Record>) -> Option<InventoryItem> {
    match record {
        Some(Record::Inventory(item)) => Some(item),
        _ => None,
    }
}

/// Field-by-field payload checker that collects every issue instead of
/// stopping at the first one.
struct PayloadReader<'a> {
    object: Option<&'a Map<String, Value>>,
    issues: Vec<ValidationIssue>,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a Value) -> Self {
        let object = payload.as_object();
        let issues = if object.is_none() {
            vec![ValidationIssue::new("", "payload must be a JSON object")]
        } else {
            Vec::new()
        };
        Self { object, issues }
    }

    fn issue(&mut self, field: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(field, message));
    }

    fn field(&self, name: &str) -> Option<&'a Value> {
        self.object
            .and_then(|object| object.get(name))
            .filter(|value| !value.is_null())
    }

    fn required_str(&mut self, name: &str) -> Option<String> {
        self.object?;
        match self.field(name) {
            None => {
                self.issue(name, "is required");
                None
            }
            Some(Value::String(value)) if !value.trim().is_empty() => {
                Some(value.trim().to_string())
            }
            Some(Value::String(_)) => {
                self.issue(name, "must not be empty");
                None
            }
            Some(_) => {
                self.issue(name, "must be a string");
                None
            }
        }
    }

    fn optional_str(&mut self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(value) => crate::util::normalize_text_option(Some(value.clone())),
            _ => {
                self.issue(name, "must be a string");
                None
            }
        }
    }

    fn required_i64(&mut self, name: &str) -> Option<i64> {
        self.object?;
        match self.field(name) {
            None => {
                self.issue(name, "is required");
                None
            }
            Some(value) => {
                let parsed = value.as_i64();
                if parsed.is_none() {
                    self.issue(name, "must be an integer");
                }
                parsed
            }
        }
    }

    fn required_parsed<T: FromStr<Err = String>>(&mut self, name: &str) -> Option<T> {
        let raw = self.required_str(name)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(message) => {
                self.issue(name, message);
                None
            }
        }
    }

    fn required_timestamp(&mut self, name: &str) -> Option<DateTime<Utc>> {
        let raw = self.required_str(name)?;
        match DateTime::parse_from_rfc3339(&raw) {
            // Millisecond precision, matching what the stores persist
            Ok(value) => Some(from_millis(to_millis(value.with_timezone(&Utc)))),
            Err(_) => {
                self.issue(name, "must be an RFC 3339 timestamp");
                None
            }
        }
    }

    fn finish<T>(self, value: Option<T>) -> Result<T, Vec<ValidationIssue>> {
        match value {
            Some(value) if self.issues.is_empty() => Ok(value),
            _ => Err(self.issues),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 19, 30, 0).unwrap()
    }

    fn checkin_payload() -> Value {
        json!({
            "ticketId": "T-1",
            "code": "ABC123",
            "eventId": "gala",
            "status": "checked_in",
            "attemptedAt": "2024-05-01T19:30:00Z",
            "source": "gate-a"
        })
    }

    #[test]
    fn parses_ticket_checkin() {
        let kind = EventKind::parse(TICKET_CHECKIN, &checkin_payload()).unwrap();
        assert_eq!(kind.scope(), Scope::Tickets);
        assert_eq!(kind.record_id(), "T-1");
        assert_eq!(kind.default_dedupe_key().as_deref(), Some("ticket:T-1"));
    }

    #[test]
    fn checkin_reports_every_missing_field() {
        let issues = EventKind::parse(TICKET_CHECKIN, &json!({"code": "ABC123"})).unwrap_err();
        let paths: Vec<_> = issues.iter().map(|issue| issue.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["ticketId", "eventId", "status", "attemptedAt", "source"]
        );
    }

    #[test]
    fn checkin_rejects_bad_status_and_timestamp() {
        let mut payload = checkin_payload();
        payload["status"] = json!("used");
        payload["attemptedAt"] = json!("yesterday");
        let issues = EventKind::parse(TICKET_CHECKIN, &payload).unwrap_err();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].path, "status");
        assert_eq!(issues[1].path, "attemptedAt");
    }

    #[test]
    fn non_object_payload_is_single_issue() {
        let issues = EventKind::parse(TICKET_CHECKIN, &json!([1, 2])).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let issues = EventKind::parse("ticket.teleport", &json!({})).unwrap_err();
        assert_eq!(issues[0].path, "type");
        assert_eq!(scope_of_type("ticket.teleport"), None);
    }

    #[test]
    fn adjust_rejects_zero_delta_and_non_integer() {
        let issues =
            EventKind::parse(INVENTORY_ADJUST, &json!({"itemId": "a", "delta": 0})).unwrap_err();
        assert_eq!(issues[0].message, "must not be zero");

        let issues =
            EventKind::parse(INVENTORY_ADJUST, &json!({"itemId": "a", "delta": 1.5})).unwrap_err();
        assert_eq!(issues[0].message, "must be an integer");
    }

    #[test]
    fn to_payload_round_trips() {
        let kind = EventKind::parse(TICKET_CHECKIN, &checkin_payload()).unwrap();
        let reparsed = EventKind::parse(kind.event_type(), &kind.to_payload()).unwrap();
        assert_eq!(kind, reparsed);
    }

    #[test]
    fn checkin_creates_missing_ticket() {
        let kind = EventKind::parse(TICKET_CHECKIN, &checkin_payload()).unwrap();
        let change = kind.apply(None, at()).unwrap();
        let RecordChange::Upsert(Record::Ticket(ticket)) = change else {
            panic!("expected ticket upsert");
        };
        assert_eq!(ticket.status, TicketStatus::CheckedIn);
        assert_eq!(ticket.checked_in_at, Some(at()));
        assert_eq!(ticket.updated_at, at());
    }

    #[test]
    fn adjust_requires_existing_item_and_stock() {
        let kind =
            EventKind::parse(INVENTORY_ADJUST, &json!({"itemId": "item-a", "delta": -5})).unwrap();
        assert!(kind.apply(None, at()).is_err());

        let item = InventoryItem {
            id: "item-a".to_string(),
            name: "Lanyard".to_string(),
            sku: None,
            quantity: 3,
            location: None,
            updated_at: at(),
        };
        let issues = kind.apply(Some(item.clone().into()), at()).unwrap_err();
        assert_eq!(issues[0].path, "delta");

        let restock =
            EventKind::parse(INVENTORY_ADJUST, &json!({"itemId": "item-a", "delta": 7})).unwrap();
        let RecordChange::Upsert(Record::Inventory(updated)) =
            restock.apply(Some(item.into()), at()).unwrap()
        else {
            panic!("expected inventory upsert");
        };
        assert_eq!(updated.quantity, 10);
    }

    #[test]
    fn void_requires_existing_ticket() {
        let kind =
            EventKind::parse(TICKET_VOID, &json!({"ticketId": "T-9", "reason": "refund"})).unwrap();
        let issues = kind.apply(None, at()).unwrap_err();
        assert!(issues[0].message.contains("does not exist"));
    }
}
