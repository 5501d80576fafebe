use crate::codec::EncodedLog;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned primary identifier of a persisted record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Auto-increment key of a relational table.
    Int(i64),
    /// Document id of a document index.
    Key(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Key(id) => f.write_str(id),
        }
    }
}

/// A persisted record together with its identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRow {
    pub id: RecordId,
    pub log: EncodedLog,
}

/// Backing store for encoded log records.
///
/// Implementations are expected to make each individual call atomic; nothing
/// here spans calls, so a select followed by a delete can interleave with
/// concurrent inserts. All ordering is by `unix_time`; records sharing a
/// `unix_time` come back in the store's natural order.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one record and return the identifier the store assigned.
    async fn insert(&self, log: &EncodedLog) -> Result<RecordId, StoreError>;

    /// Number of stored records.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Up to `limit` records ordered by `unix_time`, newest first.
    async fn latest(&self, limit: u64) -> Result<Vec<StoredRow>, StoreError>;

    /// Delete every record whose id is not in `keep` and return how many
    /// were removed. An empty `keep` deletes everything.
    async fn delete_where_id_not_in(&self, keep: &[RecordId]) -> Result<u64, StoreError>;

    /// All records with `unix_time <= cutoff`.
    async fn select_unix_time_at_most(&self, cutoff: i64) -> Result<Vec<StoredRow>, StoreError>;

    /// Delete the given records and return how many were removed.
    async fn delete_all(&self, ids: &[RecordId]) -> Result<u64, StoreError>;
}

/// Collect the identifiers of `rows`.
pub fn pluck_ids(rows: &[StoredRow]) -> Vec<RecordId> {
    rows.iter().map(|row| row.id.clone()).collect()
}
