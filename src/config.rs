//! Settings consumed by [`LogToDb`](crate::dispatcher::LogToDb).
//!
//! A [`Settings`] value is assembled once (deserialized, built in code, or
//! read from the environment with [`Settings::from_env`]) and handed to the
//! builder, which keeps it immutable for the lifetime of the instance.

use crate::codec::DEFAULT_DATETIME_FORMAT;
use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Collection (table / index) used when nothing else names one.
pub const DEFAULT_COLLECTION: &str = "log";

/// Connection name meaning "whatever the registry's default is".
pub const DEFAULT_CONNECTION: &str = "default";

/// Driver identifier selecting the document backend. Any other driver is
/// treated as relational.
pub const DOCUMENT_DRIVER: &str = "opensearch";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub collection: String,
    /// Name of a custom store registered on the builder. When set it replaces
    /// the relational/document store entirely.
    pub model: Option<String>,
    pub connection: Option<String>,
    pub queue: bool,
    pub queue_name: Option<String>,
    pub queue_connection: Option<String>,
    /// Persist `context` alongside the message.
    pub detailed: bool,
    /// chrono strftime pattern applied to `datetime` on write.
    pub datetime_format: String,
    pub channels: BTreeMap<String, ChannelConfig>,
    pub database: DatabaseConfig,
    pub retention: RetentionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            collection: DEFAULT_COLLECTION.to_string(),
            model: None,
            connection: None,
            queue: false,
            queue_name: None,
            queue_connection: None,
            detailed: true,
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            channels: BTreeMap::new(),
            database: DatabaseConfig::default(),
            retention: RetentionSettings::default(),
        }
    }
}

/// Per-channel storage overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub connection: Option<String>,
    pub collection: Option<String>,
}

/// Registry of database connections, keyed by name.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection used for the `"default"` sentinel and for unknown names.
    pub default: String,
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            default: DEFAULT_CONNECTION.to_string(),
            connections: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `"sqlite"`, `"postgres"`, `"opensearch"`, ...
    pub driver: String,
    /// Connection URL, e.g. `sqlite://logs.db` or `http://127.0.0.1:9200`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl ConnectionConfig {
    pub fn new(driver: impl Into<String>, url: impl Into<String>) -> Self {
        ConnectionConfig {
            driver: driver.into(),
            url: url.into(),
            username: None,
            password: None,
            max_connections: None,
        }
    }

    pub fn is_document(&self) -> bool {
        self.driver.eq_ignore_ascii_case(DOCUMENT_DRIVER)
    }
}

/// Limits applied by [`LogToDb::apply_retention`](crate::dispatcher::LogToDb::apply_retention).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Keep at most this many records.
    pub max_records: Option<u64>,
    /// Delete records older than this many hours.
    pub max_hours: Option<u64>,
}

impl Settings {
    /// Register a named connection.
    pub fn with_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.database.connections.insert(name.into(), config);
        self
    }

    pub fn with_default_connection(mut self, name: impl Into<String>) -> Self {
        self.database.default = name.into();
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, channel: ChannelConfig) -> Self {
        self.channels.insert(name.into(), channel);
        self
    }

    /// Default settings overridden by `LOG_TO_DB_*` environment variables.
    pub fn from_env() -> Self {
        Settings::default().apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps variable names (see
    /// [`crate::env`]) to values. Unparseable values are ignored.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| text(key).and_then(|v| env::parse_bool(&v));
        let number = |key: &str| text(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = text(env::LOG_TO_DB_COLLECTION_ENV) {
            self.collection = v;
        }
        if let Some(v) = text(env::LOG_TO_DB_MODEL_ENV) {
            self.model = Some(v);
        }
        if let Some(v) = text(env::LOG_TO_DB_CONNECTION_ENV) {
            self.connection = Some(v);
        }
        if let Some(v) = flag(env::LOG_TO_DB_QUEUE_ENV) {
            self.queue = v;
        }
        if let Some(v) = text(env::LOG_TO_DB_QUEUE_NAME_ENV) {
            self.queue_name = Some(v);
        }
        if let Some(v) = text(env::LOG_TO_DB_QUEUE_CONNECTION_ENV) {
            self.queue_connection = Some(v);
        }
        if let Some(v) = flag(env::LOG_TO_DB_DETAILED_ENV) {
            self.detailed = v;
        }
        if let Some(v) = text(env::LOG_TO_DB_DATETIME_FORMAT_ENV) {
            self.datetime_format = v;
        }
        if let Some(v) = number(env::LOG_TO_DB_MAX_RECORDS_ENV) {
            self.retention.max_records = Some(v);
        }
        if let Some(v) = number(env::LOG_TO_DB_MAX_HOURS_ENV) {
            self.retention.max_hours = Some(v);
        }

        if let Some(url) = text(env::LOG_TO_DB_DATABASE_URL_ENV) {
            let driver = text(env::LOG_TO_DB_DATABASE_DRIVER_ENV)
                .unwrap_or_else(|| env::driver_from_url(&url).to_string());
            let name = self.database.default.clone();
            let mut connection = ConnectionConfig::new(driver, url);
            connection.username = text(env::LOG_TO_DB_DATABASE_USER_ENV);
            connection.password = text(env::LOG_TO_DB_DATABASE_PASSWORD_ENV);
            self.database.connections.insert(name, connection);
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.collection, "log");
        assert!(settings.detailed);
        assert!(!settings.queue);
        assert_eq!(settings.datetime_format, DEFAULT_DATETIME_FORMAT);
        assert_eq!(settings.database.default, "default");
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let settings = Settings::default().apply_overrides(lookup(&[
            ("LOG_TO_DB_COLLECTION", "audit"),
            ("LOG_TO_DB_QUEUE", "true"),
            ("LOG_TO_DB_QUEUE_NAME", "logs"),
            ("LOG_TO_DB_DETAILED", "maybe"),
            ("LOG_TO_DB_MAX_RECORDS", "1000"),
            ("LOG_TO_DB_MAX_HOURS", "-3"),
        ]));

        assert_eq!(settings.collection, "audit");
        assert!(settings.queue);
        assert_eq!(settings.queue_name.as_deref(), Some("logs"));
        assert!(settings.detailed);
        assert_eq!(settings.retention.max_records, Some(1000));
        assert_eq!(settings.retention.max_hours, None);
    }

    #[test]
    fn database_url_registers_default_connection() {
        let settings = Settings::default().apply_overrides(lookup(&[
            ("LOG_TO_DB_DATABASE_URL", "postgres://u:p@db:5432/app"),
        ]));

        let connection = &settings.database.connections["default"];
        assert_eq!(connection.driver, "postgres");
        assert_eq!(connection.url, "postgres://u:p@db:5432/app");
    }

    #[test]
    fn deserializes_partial_documents() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "queue": true,
            "channels": { "audit": { "collection": "audit_log" } },
            "database": {
                "default": "main",
                "connections": { "main": { "driver": "sqlite", "url": "sqlite::memory:" } }
            }
        }))
        .unwrap();

        assert!(settings.queue);
        assert_eq!(settings.collection, "log");
        assert_eq!(settings.channels["audit"].collection.as_deref(), Some("audit_log"));
        assert_eq!(settings.database.connections["main"].driver, "sqlite");
    }
}
