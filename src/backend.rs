use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::codec::EncodedLog;
use crate::config::{ConnectionConfig, Settings, DEFAULT_COLLECTION, DEFAULT_CONNECTION};
use crate::error::{ConfigError, StoreError};
use crate::store::{LogStore, RecordId, StoredRow};

#[cfg(feature = "document")]
use crate::document::DocumentStore;
#[cfg(feature = "relational")]
use crate::sql::SqlStore;

/// Backend family selected from a connection's driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Relational,
    Document,
}

/// Where records of one [`LogToDb`](crate::dispatcher::LogToDb) instance go.
///
/// Resolved once at construction and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Name of the entry in the database registry.
    pub connection: String,
    /// Table or index name.
    pub collection: String,
    pub kind: BackendKind,
    /// The registry entry for `connection`.
    pub database: ConnectionConfig,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve the connection, collection and backend kind for a new instance.
///
/// Per field, a configured channel's value wins over the explicit argument,
/// which wins over the global setting. The collection defaults to `"log"`.
/// A connection name that is empty, `"default"` or missing from the registry
/// falls back to the registry's default connection; if that has no entry
/// either, resolution fails.
pub fn resolve(
    settings: &Settings,
    explicit_connection: Option<&str>,
    explicit_collection: Option<&str>,
    channel: Option<&str>,
) -> Result<StorageConfig, ConfigError> {
    let channel_config = non_empty(channel).and_then(|name| settings.channels.get(name));

    let requested_connection = non_empty(channel_config.and_then(|c| c.connection.as_deref()))
        .or_else(|| non_empty(explicit_connection))
        .or_else(|| non_empty(settings.connection.as_deref()));

    let collection = non_empty(channel_config.and_then(|c| c.collection.as_deref()))
        .or_else(|| non_empty(explicit_collection))
        .or_else(|| non_empty(Some(settings.collection.as_str())))
        .unwrap_or(DEFAULT_COLLECTION)
        .to_string();

    let registry = &settings.database.connections;
    let connection = match requested_connection {
        Some(name) if name != DEFAULT_CONNECTION && registry.contains_key(name) => name.to_string(),
        Some(name) if name != DEFAULT_CONNECTION => {
            warn!(
                target: "log_to_db::backend",
                connection = name,
                fallback = %settings.database.default,
                "unknown connection, using the default one"
            );
            settings.database.default.clone()
        }
        _ => settings.database.default.clone(),
    };

    let database = registry
        .get(&connection)
        .cloned()
        .ok_or_else(|| ConfigError::MissingConnection(connection.clone()))?;

    let kind = if database.is_document() {
        BackendKind::Document
    } else {
        BackendKind::Relational
    };

    if !is_valid_collection(&collection, kind) {
        return Err(ConfigError::InvalidCollection(collection));
    }

    Ok(StorageConfig {
        connection,
        collection,
        kind,
        database,
    })
}

// Relational names are spliced into SQL, so `-` is only allowed for indices.
fn is_valid_collection(name: &str, kind: BackendKind) -> bool {
    !name.is_empty()
        && name.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || c == '_'
                || c == '.'
                || (c == '-' && kind == BackendKind::Document)
        })
}

/// The store a [`LogToDb`](crate::dispatcher::LogToDb) writes to.
///
/// Downstream code only uses the [`LogStore`] capability set; the variant is
/// chosen once by [`StoreHandle::open`].
#[derive(Clone)]
pub enum StoreHandle {
    #[cfg(feature = "relational")]
    Relational(SqlStore),
    #[cfg(feature = "document")]
    Document(DocumentStore),
    /// A store supplied by the application through a custom model.
    Custom(Arc<dyn LogStore>),
}

impl StoreHandle {
    /// Open the store for `storage`.
    ///
    /// A custom model takes precedence and is returned as is. Document
    /// stores come back already bound to the connection and collection.
    pub fn open(
        storage: &StorageConfig,
        custom: Option<Arc<dyn LogStore>>,
    ) -> Result<Self, ConfigError> {
        if let Some(store) = custom {
            return Ok(StoreHandle::Custom(store));
        }

        match storage.kind {
            BackendKind::Relational => {
                #[cfg(feature = "relational")]
                {
                    let store = SqlStore::connect_lazy(
                        &storage.connection,
                        &storage.database,
                        &storage.collection,
                    )
                    .map_err(|source| ConfigError::StoreOpen {
                        kind: BackendKind::Relational,
                        connection: storage.connection.clone(),
                        source,
                    })?;
                    Ok(StoreHandle::Relational(store))
                }

                #[cfg(not(feature = "relational"))]
                {
                    Err(ConfigError::BackendDisabled(BackendKind::Relational))
                }
            }
            BackendKind::Document => {
                #[cfg(feature = "document")]
                {
                    let mut store = DocumentStore::new(&storage.database);
                    store.bind(&storage.connection, &storage.collection);
                    Ok(StoreHandle::Document(store))
                }

                #[cfg(not(feature = "document"))]
                {
                    Err(ConfigError::BackendDisabled(BackendKind::Document))
                }
            }
        }
    }

    fn as_store(&self) -> &dyn LogStore {
        match self {
            #[cfg(feature = "relational")]
            StoreHandle::Relational(store) => store,
            #[cfg(feature = "document")]
            StoreHandle::Document(store) => store,
            StoreHandle::Custom(store) => store.as_ref(),
        }
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "relational")]
            StoreHandle::Relational(store) => f
                .debug_struct("Relational")
                .field("connection", &store.connection())
                .field("table", &store.table())
                .finish(),
            #[cfg(feature = "document")]
            StoreHandle::Document(store) => f
                .debug_struct("Document")
                .field("connection", &store.connection())
                .field("index", &store.index())
                .finish(),
            StoreHandle::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[async_trait]
impl LogStore for StoreHandle {
    async fn insert(&self, log: &EncodedLog) -> Result<RecordId, StoreError> {
        self.as_store().insert(log).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.as_store().count().await
    }

    async fn latest(&self, limit: u64) -> Result<Vec<StoredRow>, StoreError> {
        self.as_store().latest(limit).await
    }

    async fn delete_where_id_not_in(&self, keep: &[RecordId]) -> Result<u64, StoreError> {
        self.as_store().delete_where_id_not_in(keep).await
    }

    async fn select_unix_time_at_most(&self, cutoff: i64) -> Result<Vec<StoredRow>, StoreError> {
        self.as_store().select_unix_time_at_most(cutoff).await
    }

    async fn delete_all(&self, ids: &[RecordId]) -> Result<u64, StoreError> {
        self.as_store().delete_all(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::memory_store::MemoryStore;

    fn settings() -> Settings {
        Settings::default()
            .with_default_connection("main")
            .with_connection("main", ConnectionConfig::new("sqlite", "sqlite::memory:"))
            .with_connection("archive", ConnectionConfig::new("postgres", "postgres://db/archive"))
            .with_connection("search", ConnectionConfig::new("opensearch", "http://search:9200"))
            .with_channel(
                "audit",
                ChannelConfig {
                    connection: Some("archive".into()),
                    collection: Some("audit_log".into()),
                },
            )
            .with_channel(
                "partial",
                ChannelConfig {
                    connection: None,
                    collection: Some("partial_log".into()),
                },
            )
    }

    #[test]
    fn defaults_to_log_collection_on_default_connection() {
        let storage = resolve(&settings(), None, None, None).unwrap();
        assert_eq!(storage.connection, "main");
        assert_eq!(storage.collection, "log");
        assert_eq!(storage.kind, BackendKind::Relational);
    }

    #[test]
    fn channel_values_win_over_explicit_ones() {
        let storage = resolve(&settings(), Some("search"), Some("other"), Some("audit")).unwrap();
        assert_eq!(storage.connection, "archive");
        assert_eq!(storage.collection, "audit_log");
    }

    #[test]
    fn channel_fields_fall_back_individually() {
        let storage = resolve(&settings(), Some("archive"), Some("other"), Some("partial")).unwrap();
        assert_eq!(storage.connection, "archive");
        assert_eq!(storage.collection, "partial_log");
    }

    #[test]
    fn unknown_channel_uses_explicit_values() {
        let storage = resolve(&settings(), Some("archive"), Some("jobs"), Some("nope")).unwrap();
        assert_eq!(storage.connection, "archive");
        assert_eq!(storage.collection, "jobs");
    }

    #[test]
    fn default_sentinel_and_unknown_names_use_registry_default() {
        let storage = resolve(&settings(), Some("default"), None, None).unwrap();
        assert_eq!(storage.connection, "main");

        let storage = resolve(&settings(), Some("missing"), None, None).unwrap();
        assert_eq!(storage.connection, "main");
    }

    #[test]
    fn document_driver_selects_document_backend() {
        let storage = resolve(&settings(), Some("search"), Some("app-logs"), None).unwrap();
        assert_eq!(storage.kind, BackendKind::Document);
    }

    #[test]
    fn missing_default_connection_is_fatal() {
        let settings = Settings::default();
        let err = resolve(&settings, None, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingConnection(name) if name == "default"));
    }

    #[test]
    fn unsafe_collection_names_are_rejected() {
        let err = resolve(&settings(), None, Some("log; DROP TABLE x"), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCollection(_)));

        let err = resolve(&settings(), None, Some("app-logs"), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCollection(_)));
    }

    #[test]
    fn custom_model_takes_precedence() {
        let storage = resolve(&settings(), Some("search"), None, None).unwrap();
        let custom: Arc<dyn LogStore> = Arc::new(MemoryStore::new());
        let handle = StoreHandle::open(&storage, Some(custom)).unwrap();
        assert!(matches!(handle, StoreHandle::Custom(_)));
    }

    #[cfg(feature = "document")]
    #[test]
    fn document_handle_is_bound_on_open() {
        let storage = resolve(&settings(), Some("search"), Some("app-logs"), None).unwrap();
        match StoreHandle::open(&storage, None).unwrap() {
            StoreHandle::Document(store) => {
                assert_eq!(store.connection(), "search");
                assert_eq!(store.index(), "app-logs");
            }
            other => panic!("expected document store, got {:?}", other),
        }
    }
}
