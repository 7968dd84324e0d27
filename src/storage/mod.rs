//! SQLite persistence for trade records and market metadata.
//!
//! Writes go through a non-blocking channel to a dedicated writer thread so
//! the ingestion and execution paths never touch the database directly.

pub mod schema;
pub mod types;
pub mod writer;

pub use types::{MarketRecord, TradeRecord};
pub use writer::{create_storage_channel, StorageChannel};

/// Storage channel whose writer side is absent; sends are silently dropped.
/// Only for unit tests that need an `EngineContext`.
pub fn create_storage_channel_for_tests() -> StorageChannel {
    writer::detached_channel()
}
