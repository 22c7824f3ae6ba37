//! Data models for scansync

mod event;
mod mutation;
mod record;
mod scope;

pub use event::{
    invalid_payload_message, scope_of_type, CandidateEvent, EventKind, InventoryAdjust,
    InventoryRemove, InventoryUpsert, SyncEvent, TicketCheckin, TicketVoid, INVENTORY_ADJUST,
    INVENTORY_REMOVE, INVENTORY_UPSERT, TICKET_CHECKIN, TICKET_VOID,
};
pub use mutation::{PushOutcome, PushStatus, SkipReason, SkippedEvent, SyncMutation};
pub use record::{InventoryItem, Record, RecordChange, Ticket, TicketStatus};
pub use scope::{Permission, Scope};
