pub mod audit;
pub mod common;
pub mod enqueue;
pub mod outbox;
pub mod records;
pub mod rejected;
pub mod status;
pub mod sync;
