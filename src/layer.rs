use crate::dispatcher::LogToDb;
use crate::exception::Exception;
use crate::record::{Context as LogContext, ContextValue, LogEvent, EXCEPTION_KEY};
use chrono::Utc;
use serde_json::{Map, Value};
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets whose events never reach the store. Store clients log from
/// inside the write path, so capturing them would feed back into it.
const IGNORED_TARGETS: &[&str] = &["log_to_db", "sqlx", "reqwest", "hyper"];

/// `tracing_subscriber` layer that turns events into [`LogEvent`]s and
/// hands them to a [`LogToDb`] from a background task.
///
/// Events pass through a bounded channel; when it is full new events are
/// dropped and counted rather than blocking the application thread.
pub struct LogToDbLayer {
    sender: mpsc::Sender<LogEvent>,
    min_level: Level,
    /// Total events seen by the layer (before filtering).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full.
    pub dropped_events: Arc<AtomicU64>,
    /// Handed to [`LogToDb::new_from_event`] and rejected there.
    pub failed_events: Arc<AtomicU64>,
}

impl LogToDbLayer {
    /// Create the layer and spawn the task delivering its events.
    ///
    /// **Parameters**
    /// - `log_to_db`: destination for every captured event.
    /// - `buffer`: channel capacity, at least 16.
    /// - `min_level`: least severe level captured (`Level::INFO` captures
    ///   `INFO`, `WARN` and `ERROR`).
    ///
    /// Must be called from within a Tokio runtime. The task ends once the
    /// layer is dropped and the channel is drained.
    pub fn new(log_to_db: LogToDb, buffer: usize, min_level: Level) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LogEvent>(buffer.max(16));

        let failed_events = Arc::new(AtomicU64::new(0));
        let failed_events_bg = Arc::clone(&failed_events);

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !log_to_db.new_from_event(event).await {
                    failed_events_bg.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        (
            Self {
                sender: tx,
                min_level,
                total_events: Arc::new(AtomicU64::new(0)),
                enqueued_events: Arc::new(AtomicU64::new(0)),
                dropped_events: Arc::new(AtomicU64::new(0)),
                failed_events,
            },
            handle,
        )
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|prefix| {
        target == *prefix
            || target
                .strip_prefix(prefix)
                .map_or(false, |rest| rest.starts_with("::"))
    })
}

/// Numeric severity and name stored for a `tracing` level.
pub fn level_code(level: &Level) -> (i32, &'static str) {
    match *level {
        Level::ERROR => (400, "ERROR"),
        Level::WARN => (300, "WARNING"),
        Level::INFO => (200, "INFO"),
        Level::DEBUG => (100, "DEBUG"),
        _ => (50, "TRACE"),
    }
}

impl<S> Layer<S> for LogToDbLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if *meta.level() > self.min_level || is_ignored(meta.target()) {
            return;
        }

        let mut context = LogContext::new();
        let mut message: Option<String> = None;
        event.record(&mut FieldVisitor {
            context: &mut context,
            message: &mut message,
        });

        let mut extra = Map::new();
        if let Some(module_path) = meta.module_path() {
            extra.insert("module_path".into(), Value::from(module_path));
        }
        if let Some(file) = meta.file() {
            extra.insert("file".into(), Value::from(file));
        }
        if let Some(line) = meta.line() {
            extra.insert("line".into(), Value::from(line));
        }

        let (level, level_name) = level_code(meta.level());
        let log_event = LogEvent {
            message,
            level: Some(level),
            level_name: Some(level_name.to_string()),
            channel: Some(meta.target().to_string()),
            datetime: Some(Utc::now()),
            context,
            extra,
        };

        match self.sender.try_send(log_event) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // No tracing here: the event would come straight back.
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Collects event fields into a context map.
///
/// `message` becomes the record message; an error recorded as `error` or
/// `exception` becomes the throwable under `context.exception`.
pub struct FieldVisitor<'a> {
    pub context: &'a mut LogContext,
    pub message: &'a mut Option<String>,
}

impl<'a> FieldVisitor<'a> {
    fn insert(&mut self, field: &Field, value: impl Into<Value>) {
        self.context
            .insert(field.name().to_string(), ContextValue::Json(value.into()));
    }
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.insert(field, value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        match field.name() {
            "error" | EXCEPTION_KEY => {
                self.context.insert(
                    EXCEPTION_KEY.to_string(),
                    ContextValue::Throwable(Arc::new(Exception::from_error(value))),
                );
            }
            _ => self.insert(field, value.to_string()),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.insert(field, format!("{:?}", value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, Settings};
    use crate::memory_store::MemoryStore;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn log_to_db(store: &Arc<MemoryStore>) -> LogToDb {
        let mut settings = Settings::default()
            .with_connection("default", ConnectionConfig::new("sqlite", "sqlite::memory:"));
        settings.model = Some("memory".into());
        LogToDb::builder(settings)
            .custom_model("memory", store.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn ignored_targets_match_on_path_boundaries() {
        assert!(is_ignored("sqlx"));
        assert!(is_ignored("sqlx::query"));
        assert!(is_ignored("log_to_db::dispatcher"));
        assert!(!is_ignored("sqlxish"));
        assert!(!is_ignored("app::handlers"));
    }

    #[tokio::test]
    async fn events_are_filtered_and_stored() {
        let store = Arc::new(MemoryStore::new());
        let (layer, handle) = LogToDbLayer::new(log_to_db(&store), 64, Level::INFO);
        let total = Arc::clone(&layer.total_events);
        let enqueued = Arc::clone(&layer.enqueued_events);

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app", user = 7, "hello");
            tracing::debug!(target: "app", "too verbose");
            tracing::error!(target: "sqlx::query", "from the store client");

            let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
            tracing::error!(target: "app", error = &err as &(dyn Error + 'static), "write failed");
        });

        handle.await.unwrap();
        assert_eq!(total.load(Ordering::Relaxed), 4);
        assert_eq!(enqueued.load(Ordering::Relaxed), 2);

        let mut rows = store.rows();
        rows.sort_by(|a, b| a.log.message.cmp(&b.log.message));
        assert_eq!(rows.len(), 2);

        let hello = &rows[0].log;
        assert_eq!(hello.message.as_deref(), Some("hello"));
        assert_eq!(hello.level, Some(200));
        assert_eq!(hello.level_name.as_deref(), Some("INFO"));
        assert_eq!(hello.channel.as_deref(), Some("app"));
        assert_eq!(hello.context.as_deref(), Some(r#"{"user":7}"#));

        let failed = &rows[1].log;
        assert_eq!(failed.message.as_deref(), Some("write failed"));
        let context: Value = serde_json::from_str(failed.context.as_deref().unwrap()).unwrap();
        assert_eq!(context["exception"]["message"], "disk full");
    }

    #[test]
    fn level_codes() {
        assert_eq!(level_code(&Level::ERROR), (400, "ERROR"));
        assert_eq!(level_code(&Level::WARN).0, 300);
    }
}
