use tokio::time::Duration;

use log_to_db::backend::StoreHandle;
use log_to_db::config::{ConnectionConfig, Settings};
use log_to_db::env::{env_or, LOG_TO_DB_MAX_RECORDS_ENV};
use log_to_db::{LogEvent, LogToDb};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let max_records: u64 = env_or(LOG_TO_DB_MAX_RECORDS_ENV, "5").parse()?;

    let mut connection = ConnectionConfig::new("sqlite", "sqlite::memory:");
    connection.max_connections = Some(1);
    let mut settings = Settings::default().with_connection("default", connection);
    settings.retention.max_records = Some(max_records);

    let log_to_db = LogToDb::builder(settings).collection("retention_demo").build()?;
    if let StoreHandle::Relational(store) = log_to_db.store() {
        store.migrate().await?;
    }

    for i in 0..12 {
        log_to_db
            .new_from_event(LogEvent::new(format!("event {}", i)).level(200, "INFO"))
            .await;
    }
    println!("stored: {}", log_to_db.latest(100).await?.len());

    let pruned = log_to_db.prune_to_max(8).await;
    println!("prune_to_max(8) acted: {}, left: {}", pruned, log_to_db.latest(100).await?.len());

    // Everything above was written within the last minute.
    let pruned = log_to_db.prune_older_than("1 hour ago").await;
    println!("prune_older_than(1 hour ago) acted: {}", pruned);

    let retention = log_to_db.spawn_retention_task(Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    retention.abort();
    println!("after configured retention: {}", log_to_db.latest(100).await?.len());

    let pruned = log_to_db.prune_older_than("tomorrow").await;
    println!("prune_older_than(tomorrow) acted: {}, left: {}", pruned, log_to_db.latest(100).await?.len());

    Ok(())
}
