//! In-memory storage backend with per-record TTL.
//!
//! Expiry runs on the tokio clock so tests can drive it with paused time.
//! Expired records are invisible to reads and updates immediately and are
//! swept from the map on the next write.
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::StorageError;
use crate::query::Query;
use crate::storage::Storage;
use crate::types::{KiteId, KiteRecord, RegisterValue};

#[derive(Debug, Clone)]
struct StoredRecord {
    kite: KiteId,
    value: RegisterValue,
    expires_at: Instant,
}

/// Records keyed by kite id, ordered so reads are deterministic.
#[derive(Debug)]
pub struct MemoryStorage {
    records: Mutex<BTreeMap<String, StoredRecord>>,
    ttl: Duration,
}

impl MemoryStorage {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            ttl,
        }
    }

    /// TTL applied to every write.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of records that have not expired.
    pub fn live_count(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|r| r.expires_at > now)
            .count()
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, r| r.expires_at > now);
        before - records.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredRecord>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn upsert(&self, kite: &KiteId, value: &RegisterValue) -> Result<(), StorageError> {
        let now = Instant::now();
        let mut records = self.lock();
        records.retain(|_, r| r.expires_at > now);
        records.insert(
            kite.id.clone(),
            StoredRecord {
                kite: kite.clone(),
                value: value.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    async fn update(&self, kite: &KiteId, value: &RegisterValue) -> Result<(), StorageError> {
        let now = Instant::now();
        let mut records = self.lock();
        match records.get_mut(&kite.id) {
            Some(record) if record.expires_at > now => {
                record.kite = kite.clone();
                record.value = value.clone();
                record.expires_at = now + self.ttl;
                Ok(())
            }
            Some(_) => {
                records.remove(&kite.id);
                Err(StorageError::NotFound { key: kite.key() })
            }
            None => Err(StorageError::NotFound { key: kite.key() }),
        }
    }

    async fn get(&self, query: &Query) -> Result<Vec<KiteRecord>, StorageError> {
        let now = Instant::now();
        let records = self.lock();
        Ok(records
            .values()
            .filter(|r| r.expires_at > now && query.matches(&r.kite))
            .map(|r| KiteRecord {
                kite: r.kite.clone(),
                url: r.value.url.clone(),
                token: None,
            })
            .collect())
    }
}
