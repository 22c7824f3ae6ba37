//! Synchronized domain records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Scope;

/// A stock-keeping item in the inventory scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Admission state of a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Valid,
    CheckedIn,
    Void,
}

impl TicketStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::CheckedIn => "checked_in",
            Self::Void => "void",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "checked_in" => Ok(Self::CheckedIn),
            "void" => Ok(Self::Void),
            other => Err(format!("unknown ticket status `{other}`")),
        }
    }
}

/// An admission ticket in the tickets scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub code: String,
    pub event_id: String,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A record of either scope.
///
/// Serialized untagged: the surrounding response always names the scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    Inventory(InventoryItem),
    Ticket(Ticket),
}

impl Record {
    pub fn id(&self) -> &str {
        match self {
            Self::Inventory(item) => &item.id,
            Self::Ticket(ticket) => &ticket.id,
        }
    }

    pub const fn scope(&self) -> Scope {
        match self {
            Self::Inventory(_) => Scope::Inventory,
            Self::Ticket(_) => Scope::Tickets,
        }
    }

    pub const fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Inventory(item) => item.updated_at,
            Self::Ticket(ticket) => ticket.updated_at,
        }
    }

    /// Decode a record whose scope is known from context.
    pub fn from_value(scope: Scope, value: serde_json::Value) -> serde_json::Result<Self> {
        match scope {
            Scope::Inventory => serde_json::from_value(value).map(Self::Inventory),
            Scope::Tickets => serde_json::from_value(value).map(Self::Ticket),
        }
    }
}

impl From<InventoryItem> for Record {
    fn from(item: InventoryItem) -> Self {
        Self::Inventory(item)
    }
}

impl From<Ticket> for Record {
    fn from(ticket: Ticket) -> Self {
        Self::Ticket(ticket)
    }
}

/// Result of applying an event's effect to the current record state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    Upsert(Record),
    Delete { scope: Scope, id: String },
}

impl RecordChange {
    pub fn id(&self) -> &str {
        match self {
            Self::Upsert(record) => record.id(),
            Self::Delete { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ticket() -> Ticket {
        Ticket {
            id: "T-1".to_string(),
            code: "ABC123".to_string(),
            event_id: "gala".to_string(),
            status: TicketStatus::Valid,
            holder_name: None,
            checked_in_at: None,
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap(),
        }
    }

    #[test]
    fn ticket_serializes_camel_case() {
        let value = serde_json::to_value(Record::from(ticket())).unwrap();
        assert_eq!(value["eventId"], "gala");
        assert_eq!(value["status"], "valid");
        assert!(value.get("holderName").is_none());
    }

    #[test]
    fn from_value_uses_scope() {
        let value = serde_json::to_value(ticket()).unwrap();
        let record = Record::from_value(Scope::Tickets, value.clone()).unwrap();
        assert_eq!(record.scope(), Scope::Tickets);
        assert_eq!(record.id(), "T-1");
        assert!(Record::from_value(Scope::Inventory, value).is_err());
    }

    #[test]
    fn untagged_decode_distinguishes_scopes() {
        let item = InventoryItem {
            id: "item-a".to_string(),
            name: "Lanyard".to_string(),
            sku: Some("LAN-01".to_string()),
            quantity: 40,
            location: None,
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        };
        let json = serde_json::to_string(&Record::from(item)).unwrap();
        let decoded: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.scope(), Scope::Inventory);

        let json = serde_json::to_string(&Record::from(ticket())).unwrap();
        let decoded: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.scope(), Scope::Tickets);
    }

    #[test]
    fn ticket_status_parse() {
        assert_eq!(
            "checked_in".parse::<TicketStatus>().unwrap(),
            TicketStatus::CheckedIn
        );
        assert!("used".parse::<TicketStatus>().is_err());
    }
}
