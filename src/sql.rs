use crate::codec::EncodedLog;
use crate::config::ConnectionConfig;
use crate::error::StoreError;
use crate::store::{LogStore, RecordId, StoredRow};
use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use tracing::debug;

static INSTALL_DRIVERS: Once = Once::new();

const COLUMNS: &str = "id, message, channel, level, level_name, unix_time, datetime, context, extra";

/// SQL flavour, used only for schema creation; queries are written in the
/// `$N` placeholder syntax both SQLite and Postgres accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn from_driver(driver: &str) -> Self {
        match driver.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pgsql" => Dialect::Postgres,
            _ => Dialect::Sqlite,
        }
    }
}

/// Relational log table accessed through the sqlx `Any` driver.
///
/// Expected schema (created by [`SqlStore::migrate`]):
///
/// ```sql
/// CREATE TABLE log (
///   id          INTEGER PRIMARY KEY AUTOINCREMENT,  -- BIGSERIAL on Postgres
///   message     TEXT,
///   channel     TEXT,
///   level       BIGINT,
///   level_name  TEXT,
///   unix_time   BIGINT NOT NULL,
///   datetime    TEXT,
///   context     TEXT,
///   extra       TEXT
/// );
/// ```
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
    connection: String,
    table: String,
}

impl SqlStore {
    /// Create a store whose pool connects on first use.
    ///
    /// Must be called from within a Tokio runtime, since the pool spawns its
    /// maintenance task immediately.
    pub fn connect_lazy(
        connection: &str,
        config: &ConnectionConfig,
        table: &str,
    ) -> Result<Self, StoreError> {
        INSTALL_DRIVERS.call_once(install_default_drivers);

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(5))
            .connect_lazy(&config.url)?;

        Ok(SqlStore {
            pool,
            dialect: Dialect::from_driver(&config.driver),
            connection: connection.to_string(),
            table: table.to_string(),
        })
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the log table and its `unix_time` index if they don't exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let id_column = match self.dialect {
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
        };
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {id_column},
                message TEXT,
                channel TEXT,
                level BIGINT,
                level_name TEXT,
                unix_time BIGINT NOT NULL,
                datetime TEXT,
                context TEXT,
                extra TEXT
            )",
            table = self.table,
        );
        sqlx::query(&create).execute(&self.pool).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_unix_time_idx ON {table} (unix_time)",
            table = self.table,
        );
        sqlx::query(&index).execute(&self.pool).await?;

        debug!(target: "log_to_db::sql", table = %self.table, "log table ready");
        Ok(())
    }
}

fn row_to_stored(row: &AnyRow) -> Result<StoredRow, sqlx::Error> {
    let level: Option<i64> = row.try_get("level")?;
    Ok(StoredRow {
        id: RecordId::Int(row.try_get("id")?),
        log: EncodedLog {
            message: row.try_get("message")?,
            channel: row.try_get("channel")?,
            level: level.and_then(|l| i32::try_from(l).ok()),
            level_name: row.try_get("level_name")?,
            unix_time: row.try_get("unix_time")?,
            datetime: row.try_get("datetime")?,
            context: row.try_get("context")?,
            extra: row.try_get("extra")?,
        },
    })
}

// Ids are integers produced by the database, so they are inlined as
// literals; this avoids per-statement bind parameter limits on large sets.
fn int_id_list(ids: &[RecordId]) -> Vec<String> {
    ids.iter()
        .filter_map(|id| match id {
            RecordId::Int(id) => Some(id.to_string()),
            RecordId::Key(_) => None,
        })
        .collect()
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl LogStore for SqlStore {
    async fn insert(&self, log: &EncodedLog) -> Result<RecordId, StoreError> {
        let query = format!(
            "INSERT INTO {} (message, channel, level, level_name, unix_time, datetime, context, extra)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
            self.table
        );

        let row = sqlx::query(&query)
            .bind(log.message.clone())
            .bind(log.channel.clone())
            .bind(log.level.map(i64::from))
            .bind(log.level_name.clone())
            .bind(log.unix_time)
            .bind(log.datetime.clone())
            .bind(log.context.clone())
            .bind(log.extra.clone())
            .fetch_one(&self.pool)
            .await?;

        Ok(RecordId::Int(row.try_get("id")?))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let query = format!("SELECT COUNT(*) AS total FROM {}", self.table);
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn latest(&self, limit: u64) -> Result<Vec<StoredRow>, StoreError> {
        let query = format!(
            "SELECT {} FROM {} ORDER BY unix_time DESC LIMIT $1",
            COLUMNS, self.table
        );
        let rows = sqlx::query(&query)
            .bind(saturating_i64(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_stored).collect::<Result<_, _>>()?)
    }

    async fn delete_where_id_not_in(&self, keep: &[RecordId]) -> Result<u64, StoreError> {
        let keep = int_id_list(keep);
        let query = if keep.is_empty() {
            format!("DELETE FROM {}", self.table)
        } else {
            format!(
                "DELETE FROM {} WHERE id NOT IN ({})",
                self.table,
                keep.join(", ")
            )
        };

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn select_unix_time_at_most(&self, cutoff: i64) -> Result<Vec<StoredRow>, StoreError> {
        let query = format!(
            "SELECT {} FROM {} WHERE unix_time <= $1",
            COLUMNS, self.table
        );
        let rows = sqlx::query(&query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_stored).collect::<Result<_, _>>()?)
    }

    async fn delete_all(&self, ids: &[RecordId]) -> Result<u64, StoreError> {
        let ids = int_id_list(ids);
        if ids.is_empty() {
            return Ok(0);
        }

        let query = format!(
            "DELETE FROM {} WHERE id IN ({})",
            self.table,
            ids.join(", ")
        );
        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
