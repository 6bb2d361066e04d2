//! Storage backend for registration records.
//!
//! The backend owns durability and TTL expiry. The registry only ever
//! upserts on registration, updates from the refresher, and reads for
//! discovery; it never deletes. A record whose TTL lapses disappears on its
//! own, which is what lets the registry crash without leaving stale kites.
pub mod memory;

pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::query::Query;
use crate::types::{KiteId, KiteRecord, RegisterValue};

#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Create or overwrite the record for `kite`, resetting its TTL.
    async fn upsert(&self, kite: &KiteId, value: &RegisterValue) -> Result<(), StorageError>;

    /// Overwrite an existing record, resetting its TTL.
    ///
    /// Fails with [`StorageError::NotFound`] when the record has already
    /// expired or never existed. An update must not resurrect a record.
    async fn update(&self, kite: &KiteId, value: &RegisterValue) -> Result<(), StorageError>;

    /// Live records matching `query`.
    async fn get(&self, query: &Query) -> Result<Vec<KiteRecord>, StorageError>;
}
