//! Shared services used by the API server and tests.

mod sync_service;

pub use sync_service::SyncService;
