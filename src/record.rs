use crate::exception::Throwable;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Context key holding a throwable.
pub const EXCEPTION_KEY: &str = "exception";

/// A value inside an event's context map.
///
/// Most values are plain JSON. A [`ContextValue::Throwable`] keeps a live
/// error object until the field codec snapshots it.
#[derive(Clone)]
pub enum ContextValue {
    Json(Value),
    Throwable(Arc<dyn Throwable>),
}

impl ContextValue {
    pub fn as_throwable(&self) -> Option<&dyn Throwable> {
        match self {
            ContextValue::Throwable(t) => Some(t.as_ref()),
            ContextValue::Json(_) => None,
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Json(value) => write!(f, "Json({})", value),
            ContextValue::Throwable(t) => write!(f, "Throwable({}: {})", t.class_name(), t),
        }
    }
}

// Throwables outside the `exception` key have no snapshot slot; they are
// written as their message.
impl Serialize for ContextValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ContextValue::Json(value) => value.serialize(serializer),
            ContextValue::Throwable(t) => serializer.serialize_str(&t.to_string()),
        }
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        ContextValue::Json(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Json(Value::String(value))
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Json(Value::from(value))
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Json(Value::Bool(value))
    }
}

pub type Context = BTreeMap<String, ContextValue>;

/// Raw log event as handed over by the logging pipeline.
///
/// Every field is optional; an empty `context` or `extra` map means the key
/// was absent.
#[derive(Clone, Debug, Default)]
pub struct LogEvent {
    pub message: Option<String>,
    pub level: Option<i32>,
    pub level_name: Option<String>,
    pub channel: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub context: Context,
    pub extra: Map<String, Value>,
}

impl LogEvent {
    pub fn new(message: impl Into<String>) -> Self {
        LogEvent {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn level(mut self, level: i32, level_name: impl Into<String>) -> Self {
        self.level = Some(level);
        self.level_name = Some(level_name.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = Some(datetime);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Throwable + 'static) -> Self {
        self.context.insert(
            EXCEPTION_KEY.to_string(),
            ContextValue::Throwable(Arc::new(exception)),
        );
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// The throwable stored under `context.exception`, if the value there is
    /// one. JSON values under that key are not throwables.
    pub fn exception(&self) -> Option<&dyn Throwable> {
        self.context
            .get(EXCEPTION_KEY)
            .and_then(ContextValue::as_throwable)
    }
}

/// Canonical record produced from a [`LogEvent`], before field encoding.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub message: Option<String>,
    pub level: Option<i32>,
    pub level_name: Option<String>,
    pub channel: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub context: Option<Context>,
    pub extra: Option<Map<String, Value>>,
    /// Normalization time in epoch seconds; the only key retention orders by.
    pub unix_time: i64,
}

impl LogRecord {
    /// Normalize `event`, stamping `unix_time` with the current clock.
    ///
    /// `context` is kept only in detailed mode and only when non-empty;
    /// `extra` is kept when non-empty. This cannot fail.
    pub fn generate(event: LogEvent, detailed: bool) -> Self {
        Self::generate_at(event, detailed, Utc::now().timestamp())
    }

    pub fn generate_at(event: LogEvent, detailed: bool, unix_time: i64) -> Self {
        let context = if detailed && !event.context.is_empty() {
            Some(event.context)
        } else {
            None
        };
        let extra = if event.extra.is_empty() {
            None
        } else {
            Some(event.extra)
        };

        LogRecord {
            message: event.message,
            level: event.level,
            level_name: event.level_name,
            channel: event.channel,
            datetime: event.datetime,
            context,
            extra,
            unix_time,
        }
    }
}
