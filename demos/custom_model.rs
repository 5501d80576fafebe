use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use log_to_db::codec::EncodedLog;
use log_to_db::config::{ConnectionConfig, Settings};
use log_to_db::error::StoreError;
use log_to_db::memory_store::MemoryStore;
use log_to_db::store::{LogStore, RecordId, StoredRow};
use log_to_db::{Exception, LogEvent, LogToDb};

/// Store that prints every insert before keeping it in memory. Imagine it
/// talks to a database this crate has no backend for.
struct PrintingStore {
    inner: MemoryStore,
}

#[async_trait]
impl LogStore for PrintingStore {
    async fn insert(&self, log: &EncodedLog) -> Result<RecordId, StoreError> {
        let id = self.inner.insert(log).await?;
        println!(
            "[printing-store] #{} {} context={}",
            id,
            log.message.as_deref().unwrap_or(""),
            log.context.as_deref().unwrap_or("-"),
        );
        Ok(id)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    async fn latest(&self, limit: u64) -> Result<Vec<StoredRow>, StoreError> {
        self.inner.latest(limit).await
    }

    async fn delete_where_id_not_in(&self, keep: &[RecordId]) -> Result<u64, StoreError> {
        self.inner.delete_where_id_not_in(keep).await
    }

    async fn select_unix_time_at_most(&self, cutoff: i64) -> Result<Vec<StoredRow>, StoreError> {
        self.inner.select_unix_time_at_most(cutoff).await
    }

    async fn delete_all(&self, ids: &[RecordId]) -> Result<u64, StoreError> {
        self.inner.delete_all(ids).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::default()
        .with_connection("default", ConnectionConfig::new("sqlite", "sqlite::memory:"));
    settings.model = Some("printing".to_string());
    settings.queue = true;
    settings.queue_name = Some("logs".to_string());

    let store = Arc::new(PrintingStore {
        inner: MemoryStore::new(),
    });
    let log_to_db = LogToDb::builder(settings)
        .channel("payments")
        .custom_model("printing", store)
        .build()?;

    log_to_db
        .new_from_event(LogEvent::new("charge accepted").level(200, "INFO").channel("payments"))
        .await;

    // Saved right away, then queued like every other event.
    let cause = Exception::new("TimeoutError", "gateway did not answer");
    log_to_db
        .new_from_event(
            LogEvent::new("charge failed")
                .level(400, "ERROR")
                .channel("payments")
                .with_context("order_id", 1234i64)
                .with_exception(Exception::new("PaymentError", "charge failed").with_code(402).with_previous(cause)),
        )
        .await;

    sleep(Duration::from_millis(200)).await;
    println!("stored records: {}", log_to_db.latest(100).await?.len());

    Ok(())
}
