use crate::codec::EncodedLog;
use crate::error::StoreError;
use crate::store::{LogStore, RecordId, StoredRow};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// A store that keeps records in process memory, in insertion order.
///
/// Useful as a custom model for tests and tools that don't need
/// persistence. Ids are sequential integers starting at 1.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: Vec<StoredRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored rows in insertion order.
    pub fn rows(&self) -> Vec<StoredRow> {
        self.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave `rows` half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert(&self, log: &EncodedLog) -> Result<RecordId, StoreError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = RecordId::Int(inner.next_id);
        inner.rows.push(StoredRow {
            id: id.clone(),
            log: log.clone(),
        });
        Ok(id)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().rows.len() as u64)
    }

    async fn latest(&self, limit: u64) -> Result<Vec<StoredRow>, StoreError> {
        let mut rows = self.lock().rows.clone();
        // Stable sort keeps insertion order among equal `unix_time`s.
        rows.sort_by(|a, b| b.log.unix_time.cmp(&a.log.unix_time));
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn delete_where_id_not_in(&self, keep: &[RecordId]) -> Result<u64, StoreError> {
        let keep: HashSet<&RecordId> = keep.iter().collect();
        let mut inner = self.lock();
        let before = inner.rows.len();
        inner.rows.retain(|row| keep.contains(&row.id));
        Ok((before - inner.rows.len()) as u64)
    }

    async fn select_unix_time_at_most(&self, cutoff: i64) -> Result<Vec<StoredRow>, StoreError> {
        Ok(self
            .lock()
            .rows
            .iter()
            .filter(|row| row.log.unix_time <= cutoff)
            .cloned()
            .collect())
    }

    async fn delete_all(&self, ids: &[RecordId]) -> Result<u64, StoreError> {
        let doomed: HashSet<&RecordId> = ids.iter().collect();
        let mut inner = self.lock();
        let before = inner.rows.len();
        inner.rows.retain(|row| !doomed.contains(&row.id));
        Ok((before - inner.rows.len()) as u64)
    }
}
