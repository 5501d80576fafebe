use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use log_to_db::backend::StoreHandle;
use log_to_db::config::{ConnectionConfig, Settings};
use log_to_db::env::{env_or, LOG_TO_DB_DATABASE_URL_ENV};
use log_to_db::init::init_tracing;
use log_to_db::LogToDb;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = env_or(LOG_TO_DB_DATABASE_URL_ENV, "sqlite://logs.db?mode=rwc");
    let settings = Settings::from_env()
        .with_connection("default", ConnectionConfig::new("sqlite", url));

    let log_to_db = LogToDb::new(settings)?;
    if let StoreHandle::Relational(store) = log_to_db.store() {
        store.migrate().await?;
    }

    init_tracing(log_to_db.clone())?;

    info!("starting service");
    warn!(attempts = 3, "slow upstream");

    let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "invalid password");
    error!(
        user_id = 42,
        error = &err as &(dyn std::error::Error + 'static),
        "authentication failed"
    );

    sleep(Duration::from_secs(1)).await;

    for log in log_to_db.latest(10).await? {
        println!(
            "#{} [{}] {} {}",
            log.id,
            log.level_name.as_deref().unwrap_or("-"),
            log.datetime.as_deref().unwrap_or("-"),
            log.message.as_deref().unwrap_or(""),
        );
        if let Some(exception) = log.exception() {
            println!("    {}: {} ({}:{})", exception.class, exception.message, exception.file, exception.line);
        }
    }

    Ok(())
}
