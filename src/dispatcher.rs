use crate::backend::{resolve, StorageConfig, StoreHandle};
use crate::codec::{decode_row, encode_record, is_valid_datetime_format, StoredLog};
use crate::config::Settings;
use crate::error::{ConfigError, FetchError};
use crate::queue::{JobRunner, QueueTarget, SaveLogJob, TokioJobRunner};
use crate::record::{LogEvent, LogRecord};
use crate::retention;
use crate::store::LogStore;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

/// Persists log events into the store resolved for one channel.
///
/// Cheap to clone; clones share the store, settings and job runner.
///
/// **Delivery**
/// - queue disabled: every event is normalized, encoded and inserted before
///   [`LogToDb::new_from_event`] returns.
/// - queue enabled: an event carrying a throwable under `context.exception`
///   is saved synchronously first; every event is then handed to the
///   [`JobRunner`] as a [`SaveLogJob`].
#[derive(Clone)]
pub struct LogToDb {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    storage: StorageConfig,
    store: StoreHandle,
    runner: Option<Arc<dyn JobRunner>>,
    queue_target: QueueTarget,
}

impl fmt::Debug for LogToDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogToDb")
            .field("storage", &self.inner.storage)
            .field("store", &self.inner.store)
            .field("queued", &self.inner.runner.is_some())
            .field("queue_target", &self.inner.queue_target)
            .finish()
    }
}

/// Builder for [`LogToDb`].
///
/// Explicit connection and collection only apply to fields the channel's
/// configuration leaves unset.
pub struct LogToDbBuilder {
    settings: Settings,
    channel: Option<String>,
    connection: Option<String>,
    collection: Option<String>,
    models: HashMap<String, Arc<dyn LogStore>>,
    runner: Option<Arc<dyn JobRunner>>,
}

impl LogToDbBuilder {
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Register a store that [`Settings::model`] can select by `name`.
    pub fn custom_model(mut self, name: impl Into<String>, store: Arc<dyn LogStore>) -> Self {
        self.models.insert(name.into(), store);
        self
    }

    /// Runner used when queuing is enabled. Defaults to a [`TokioJobRunner`].
    pub fn job_runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    fn open_store(&self) -> Result<(StorageConfig, StoreHandle), ConfigError> {
        let custom = match self.settings.model.as_deref().filter(|m| !m.is_empty()) {
            Some(name) => Some(
                self.models
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))?,
            ),
            None => None,
        };

        let storage = resolve(
            &self.settings,
            self.connection.as_deref(),
            self.collection.as_deref(),
            self.channel.as_deref(),
        )?;
        let store = StoreHandle::open(&storage, custom)?;
        Ok((storage, store))
    }

    /// Resolve storage and open the store.
    ///
    /// Relational stores create their pool here, so this has to run inside a
    /// Tokio runtime.
    pub fn build(self) -> Result<LogToDb, ConfigError> {
        if !is_valid_datetime_format(&self.settings.datetime_format) {
            return Err(ConfigError::InvalidDatetimeFormat(
                self.settings.datetime_format.clone(),
            ));
        }

        let (storage, store) = self.open_store()?;

        let runner = if self.settings.queue {
            Some(
                self.runner
                    .unwrap_or_else(|| Arc::new(TokioJobRunner::default()) as Arc<dyn JobRunner>),
            )
        } else {
            None
        };
        let queue_target = QueueTarget::from_overrides(
            self.settings.queue_connection.as_deref(),
            self.settings.queue_name.as_deref(),
        );

        debug!(
            target: "log_to_db::dispatcher",
            connection = %storage.connection,
            collection = %storage.collection,
            kind = ?storage.kind,
            queued = runner.is_some(),
            "log store resolved"
        );

        Ok(LogToDb {
            inner: Arc::new(Inner {
                settings: self.settings,
                storage,
                store,
                runner,
                queue_target,
            }),
        })
    }
}

impl LogToDb {
    pub fn builder(settings: Settings) -> LogToDbBuilder {
        LogToDbBuilder {
            settings,
            channel: None,
            connection: None,
            collection: None,
            models: HashMap::new(),
            runner: None,
        }
    }

    /// Instance for the global defaults, with no channel or explicit target.
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        LogToDb::builder(settings).build()
    }

    /// Open the store a channel (or explicit connection and collection)
    /// resolves to, without building a dispatcher.
    ///
    /// Custom models can only be registered on a builder, so settings naming
    /// one fail with [`ConfigError::UnknownModel`] here.
    pub fn model(
        settings: &Settings,
        channel: Option<&str>,
        connection: Option<&str>,
        collection: Option<&str>,
    ) -> Result<StoreHandle, ConfigError> {
        let builder = LogToDbBuilder {
            settings: settings.clone(),
            channel: channel.map(str::to_string),
            connection: connection.map(str::to_string),
            collection: collection.map(str::to_string),
            models: HashMap::new(),
            runner: None,
        };
        builder.open_store().map(|(_, store)| store)
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.inner.storage
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    /// Queue jobs go to; only meaningful when queuing is enabled.
    pub fn queue_target(&self) -> &QueueTarget {
        &self.inner.queue_target
    }

    /// Deliver one event.
    ///
    /// **Returns**
    /// - without queuing: whether the store accepted the record.
    /// - with queuing: whether the job runner accepted the job. The outcome
    ///   of the synchronous exception save does not affect the result.
    pub async fn new_from_event(&self, event: LogEvent) -> bool {
        let Some(runner) = self.inner.runner.as_ref() else {
            return self.save(event).await;
        };

        // Throwables are snapshotted in-process before anything is queued.
        let has_exception = event.exception().is_some();
        if has_exception && !self.save(event.clone()).await {
            warn!(target: "log_to_db::dispatcher", "synchronous exception save failed");
        }

        runner.dispatch(SaveLogJob::new(self.clone(), event), &self.inner.queue_target)
    }

    /// Normalize, encode and insert `event`, returning whether the insert
    /// succeeded. Failures are logged, never retried.
    pub async fn save(&self, event: LogEvent) -> bool {
        let settings = &self.inner.settings;
        let record = LogRecord::generate(event, settings.detailed);
        let encoded = encode_record(&record, &settings.datetime_format);

        match self.inner.store.insert(&encoded).await {
            Ok(id) => {
                debug!(target: "log_to_db::dispatcher", %id, "log record stored");
                true
            }
            Err(e) => {
                warn!(
                    target: "log_to_db::dispatcher",
                    error = %e,
                    connection = %self.inner.storage.connection,
                    collection = %self.inner.storage.collection,
                    "failed to store log record"
                );
                false
            }
        }
    }

    /// The `limit` newest records, decoded.
    pub async fn latest(&self, limit: u64) -> Result<Vec<StoredLog>, FetchError> {
        let rows = self.inner.store.latest(limit).await?;
        Ok(rows.into_iter().map(decode_row).collect::<Result<_, _>>()?)
    }

    /// See [`retention::prune_to_max`].
    pub async fn prune_to_max(&self, max: u64) -> bool {
        retention::prune_to_max(&self.inner.store, max).await
    }

    /// See [`retention::prune_older_than`].
    pub async fn prune_older_than(&self, cutoff: &str) -> bool {
        retention::prune_older_than(&self.inner.store, cutoff).await
    }

    /// Apply the configured [`RetentionSettings`](crate::config::RetentionSettings):
    /// the age limit first, then the count limit. Returns whether either
    /// removed anything.
    pub async fn apply_retention(&self) -> bool {
        let policy = &self.inner.settings.retention;
        let mut acted = false;

        if let Some(hours) = policy.max_hours {
            let age = i64::try_from(hours.saturating_mul(3_600)).unwrap_or(i64::MAX);
            let cutoff = Utc::now().timestamp().saturating_sub(age);
            acted |= retention::prune_at_or_before(&self.inner.store, cutoff).await;
        }
        if let Some(max) = policy.max_records {
            acted |= retention::prune_to_max(&self.inner.store, max).await;
        }

        acted
    }

    /// Run [`LogToDb::apply_retention`] every `interval` on the current Tokio
    /// runtime until the handle is aborted.
    pub fn spawn_retention_task(&self, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        let interval = interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if this.apply_retention().await {
                    debug!(target: "log_to_db::retention", "retention pass removed records");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::exception::Exception;
    use crate::memory_store::MemoryStore;

    fn settings() -> Settings {
        let mut settings =
            Settings::default().with_connection("default", ConnectionConfig::new("sqlite", "sqlite::memory:"));
        settings.model = Some("memory".into());
        settings
    }

    fn build(settings: Settings, store: &Arc<MemoryStore>) -> LogToDb {
        LogToDb::builder(settings)
            .custom_model("memory", store.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn sync_delivery_writes_encoded_record() {
        let store = Arc::new(MemoryStore::new());
        let log_to_db = build(settings(), &store);

        let event = LogEvent::new("hello")
            .level(200, "INFO")
            .channel("app")
            .with_context("user", 7i64)
            .with_extra("host", "web-1");
        assert!(log_to_db.new_from_event(event).await);

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].log.message.as_deref(), Some("hello"));
        assert_eq!(rows[0].log.context.as_deref(), Some(r#"{"user":7}"#));
        assert_eq!(rows[0].log.extra.as_deref(), Some(r#"{"host":"web-1"}"#));
    }

    #[tokio::test]
    async fn non_detailed_mode_drops_context() {
        let store = Arc::new(MemoryStore::new());
        let mut settings = settings();
        settings.detailed = false;
        let log_to_db = build(settings, &store);

        assert!(log_to_db.save(LogEvent::new("x").with_context("user", 7i64)).await);
        assert_eq!(store.rows()[0].log.context, None);
    }

    #[tokio::test]
    async fn latest_decodes_structured_fields() {
        let store = Arc::new(MemoryStore::new());
        let log_to_db = build(settings(), &store);

        log_to_db
            .save(LogEvent::new("boom").with_exception(Exception::new("RuntimeError", "boom")))
            .await;

        let logs = log_to_db.latest(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        let exception = logs[0].exception().unwrap();
        assert_eq!(exception.class, "RuntimeError");
        assert_eq!(exception.message, "boom");
    }

    #[test]
    fn invalid_datetime_format_is_rejected() {
        let mut settings = settings();
        settings.datetime_format = "%Q".into();
        let err = LogToDb::builder(settings)
            .custom_model("memory", Arc::new(MemoryStore::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDatetimeFormat(_)));
    }

    #[test]
    fn unregistered_model_is_rejected() {
        let err = LogToDb::new(settings()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModel(name) if name == "memory"));
    }

    #[tokio::test]
    async fn apply_retention_uses_configured_limits() {
        let store = Arc::new(MemoryStore::new());
        let mut settings = settings();
        settings.retention.max_records = Some(2);
        settings.retention.max_hours = Some(24);
        let log_to_db = build(settings, &store);

        let now = Utc::now().timestamp();
        for unix_time in [now - 3 * 86_400, now - 30, now - 20, now - 10] {
            store
                .insert(&crate::codec::EncodedLog {
                    unix_time,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        assert!(log_to_db.apply_retention().await);
        let mut times: Vec<_> = store.rows().iter().map(|r| r.log.unix_time).collect();
        times.sort();
        assert_eq!(times, vec![now - 20, now - 10]);
        assert!(!log_to_db.apply_retention().await);
    }
}
