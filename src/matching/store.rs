// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Waiting-state persistence.
//!
//! Pending entries must survive restart: an entry already past its deadline
//! when the process comes back resolves to timeout on the first sweep, never
//! silently dropped. Values are JSON documents so layouts stay additively
//! versioned across releases.
//!
//! Key layout in the embedded database (single default column family):
//! - `pending:<correlation key>`: in-flight entries
//! - `journey:<correlation key>`: terminal journeys kept for audit reads

use crate::correlation::CorrelationKey;
use crate::error::{MonitorError, MonitorResult};
use crate::matching::journey::PendingEntry;
use crate::types::Journey;
use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const PENDING_PREFIX: &[u8] = b"pending:";
const JOURNEY_PREFIX: &[u8] = b"journey:";

/// Durable map: correlation key -> partially-built journey + deadline.
///
/// Reads and writes are atomic per key; the engine's shard discipline makes
/// each key's history a strict sequence, so `upsert` is a plain replace.
#[async_trait]
pub trait WaitingStore: Send + Sync {
    async fn get(&self, key: &CorrelationKey) -> MonitorResult<Option<PendingEntry>>;
    async fn upsert(&self, entry: &PendingEntry) -> MonitorResult<()>;
    async fn delete(&self, key: &CorrelationKey) -> MonitorResult<()>;
    /// Entries whose deadline is at or before `now_ms`.
    async fn scan_expired(&self, now_ms: u64) -> MonitorResult<Vec<PendingEntry>>;
    async fn pending_count(&self) -> MonitorResult<usize>;
    /// Persists a terminal journey for audit reads.
    async fn archive(&self, journey: &Journey) -> MonitorResult<()>;
    async fn get_archived(&self, key: &CorrelationKey) -> MonitorResult<Option<Journey>>;
}

/// Opens (or creates) the embedded database shared by the waiting store and
/// the subscription store.
pub fn open_database<P: AsRef<Path>>(path: P) -> MonitorResult<Arc<DB>> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
    let db = DB::open(&opts, path.as_ref())
        .map_err(|e| MonitorError::Storage(format!("failed to open database: {}", e)))?;
    Ok(Arc::new(db))
}

/// Embedded RocksDB implementation.
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn pending_key(key: &CorrelationKey) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PENDING_PREFIX.len() + key.as_str().len());
        buf.extend_from_slice(PENDING_PREFIX);
        buf.extend_from_slice(key.as_str().as_bytes());
        buf
    }

    fn journey_key(key: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(JOURNEY_PREFIX.len() + key.len());
        buf.extend_from_slice(JOURNEY_PREFIX);
        buf.extend_from_slice(key.as_bytes());
        buf
    }

    fn scan_pending(&self) -> MonitorResult<Vec<PendingEntry>> {
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(PENDING_PREFIX, Direction::Forward));
        for item in iter {
            let (key, value) =
                item.map_err(|e| MonitorError::Storage(format!("pending scan failed: {}", e)))?;
            if !key.starts_with(PENDING_PREFIX) {
                break;
            }
            let entry: PendingEntry = serde_json::from_slice(&value).map_err(|e| {
                MonitorError::Storage(format!(
                    "undecodable pending entry at {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[async_trait]
impl WaitingStore for RocksDbStore {
    async fn get(&self, key: &CorrelationKey) -> MonitorResult<Option<PendingEntry>> {
        let raw = self
            .db
            .get(Self::pending_key(key))
            .map_err(|e| MonitorError::Storage(format!("get failed: {}", e)))?;
        match raw {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| MonitorError::Storage(format!("undecodable pending entry: {}", e))),
        }
    }

    async fn upsert(&self, entry: &PendingEntry) -> MonitorResult<()> {
        let value = serde_json::to_vec(entry)
            .map_err(|e| MonitorError::Storage(format!("encode failed: {}", e)))?;
        self.db
            .put(Self::pending_key(&entry.key), value)
            .map_err(|e| MonitorError::Storage(format!("put failed: {}", e)))?;
        debug!(
            "pending entry persisted: key={}, deadline={}, legs_remaining={}",
            entry.key, entry.deadline, entry.legs_remaining
        );
        Ok(())
    }

    async fn delete(&self, key: &CorrelationKey) -> MonitorResult<()> {
        self.db
            .delete(Self::pending_key(key))
            .map_err(|e| MonitorError::Storage(format!("delete failed: {}", e)))
    }

    async fn scan_expired(&self, now_ms: u64) -> MonitorResult<Vec<PendingEntry>> {
        Ok(self
            .scan_pending()?
            .into_iter()
            .filter(|e| e.deadline <= now_ms)
            .collect())
    }

    async fn pending_count(&self) -> MonitorResult<usize> {
        Ok(self.scan_pending()?.len())
    }

    async fn archive(&self, journey: &Journey) -> MonitorResult<()> {
        let value = serde_json::to_vec(journey)
            .map_err(|e| MonitorError::Storage(format!("encode failed: {}", e)))?;
        self.db
            .put(Self::journey_key(&journey.id), value)
            .map_err(|e| MonitorError::Storage(format!("archive failed: {}", e)))
    }

    async fn get_archived(&self, key: &CorrelationKey) -> MonitorResult<Option<Journey>> {
        let raw = self
            .db
            .get(Self::journey_key(key.as_str()))
            .map_err(|e| MonitorError::Storage(format!("get failed: {}", e)))?;
        match raw {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| MonitorError::Storage(format!("undecodable journey: {}", e))),
        }
    }
}

/// In-memory implementation for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    pending: RwLock<HashMap<CorrelationKey, PendingEntry>>,
    journeys: RwLock<HashMap<String, Journey>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WaitingStore for MemoryStore {
    async fn get(&self, key: &CorrelationKey) -> MonitorResult<Option<PendingEntry>> {
        Ok(self.pending.read().await.get(key).cloned())
    }

    async fn upsert(&self, entry: &PendingEntry) -> MonitorResult<()> {
        self.pending
            .write()
            .await
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &CorrelationKey) -> MonitorResult<()> {
        self.pending.write().await.remove(key);
        Ok(())
    }

    async fn scan_expired(&self, now_ms: u64) -> MonitorResult<Vec<PendingEntry>> {
        Ok(self
            .pending
            .read()
            .await
            .values()
            .filter(|e| e.deadline <= now_ms)
            .cloned()
            .collect())
    }

    async fn pending_count(&self) -> MonitorResult<usize> {
        Ok(self.pending.read().await.len())
    }

    async fn archive(&self, journey: &Journey) -> MonitorResult<()> {
        self.journeys
            .write()
            .await
            .insert(journey.id.clone(), journey.clone());
        Ok(())
    }

    async fn get_archived(&self, key: &CorrelationKey) -> MonitorResult<Option<Journey>> {
        Ok(self.journeys.read().await.get(key.as_str()).cloned())
    }
}
