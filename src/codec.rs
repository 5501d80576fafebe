//! Conversion between [`LogRecord`]s and their stored representation.
//!
//! Structured fields are written as JSON text, but only when non-empty: an
//! empty `context` or `extra` is stored as null rather than `"{}"`, and null
//! or empty text reads back as absent. Throwables under `context.exception`
//! are replaced with an [`ExceptionInfo`] snapshot on the way in. The
//! `datetime` field is formatted on write and returned verbatim on read.

use crate::error::CodecError;
use crate::exception::ExceptionInfo;
use crate::record::{Context, ContextValue, LogRecord, EXCEPTION_KEY};
use crate::store::{RecordId, StoredRow};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write;

/// Default `datetime` format, sortable as text.
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A record as written to and read from a store: structured fields are JSON
/// text and `datetime` is pre-formatted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodedLog {
    pub message: Option<String>,
    pub channel: Option<String>,
    pub level: Option<i32>,
    pub level_name: Option<String>,
    pub unix_time: i64,
    pub datetime: Option<String>,
    pub context: Option<String>,
    pub extra: Option<String>,
}

/// A record fetched back from a store with its structured fields decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredLog {
    pub id: RecordId,
    pub message: Option<String>,
    pub channel: Option<String>,
    pub level: Option<i32>,
    pub level_name: Option<String>,
    pub unix_time: i64,
    pub datetime: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub extra: Option<Map<String, Value>>,
}

impl StoredLog {
    /// The snapshot stored under `context.exception`, if it has that shape.
    pub fn exception(&self) -> Option<ExceptionInfo> {
        let value = self.context.as_ref()?.get(EXCEPTION_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// Serialize `value` as JSON text unless it is empty.
pub fn encode_if_not_empty(value: &Map<String, Value>) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    serde_json::to_string(value).ok()
}

/// Parse stored JSON text back into a map unless it is null or empty.
///
/// Malformed text is the one codec failure that reaches the caller.
pub fn decode_if_not_empty(
    raw: Option<&str>,
    field: &'static str,
) -> Result<Option<Map<String, Value>>, CodecError> {
    match raw {
        Some(text) if !text.is_empty() => serde_json::from_str(text)
            .map(Some)
            .map_err(|source| CodecError { field, source }),
        _ => Ok(None),
    }
}

/// Turn a context map into plain JSON, snapshotting a throwable found under
/// the `exception` key.
///
/// Anything else under `exception` (text, objects, empty values) passes
/// through unchanged.
pub fn capture_context(context: &Context) -> Map<String, Value> {
    context
        .iter()
        .map(|(key, value)| {
            let json = match value {
                ContextValue::Throwable(t) if key == EXCEPTION_KEY => {
                    serde_json::to_value(ExceptionInfo::capture(t.as_ref()))
                        .unwrap_or(Value::Null)
                }
                ContextValue::Throwable(t) => Value::String(t.to_string()),
                ContextValue::Json(v) => v.clone(),
            };
            (key.clone(), json)
        })
        .collect()
}

/// Encode a context map for storage.
pub fn encode_context(context: &Context) -> Option<String> {
    encode_if_not_empty(&capture_context(context))
}

/// Format `datetime` with a strftime-style pattern.
///
/// Patterns are validated when settings are loaded; an invalid one reaching
/// this point falls back to RFC 3339 instead of failing.
pub fn format_datetime(datetime: &DateTime<Utc>, format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", datetime.format(format)).is_err() {
        return datetime.to_rfc3339();
    }
    out
}

pub fn is_valid_datetime_format(format: &str) -> bool {
    !format.is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Apply the write-side codec to every field of `record`.
pub fn encode_record(record: &LogRecord, datetime_format: &str) -> EncodedLog {
    EncodedLog {
        message: record.message.clone(),
        channel: record.channel.clone(),
        level: record.level,
        level_name: record.level_name.clone(),
        unix_time: record.unix_time,
        datetime: record
            .datetime
            .as_ref()
            .map(|dt| format_datetime(dt, datetime_format)),
        context: record.context.as_ref().and_then(encode_context),
        extra: record.extra.as_ref().and_then(encode_if_not_empty),
    }
}

/// Apply the read-side codec to a fetched row.
pub fn decode_row(row: StoredRow) -> Result<StoredLog, CodecError> {
    let StoredRow { id, log } = row;
    Ok(StoredLog {
        id,
        context: decode_if_not_empty(log.context.as_deref(), "context")?,
        extra: decode_if_not_empty(log.extra.as_deref(), "extra")?,
        message: log.message,
        channel: log.channel,
        level: log.level,
        level_name: log.level_name,
        unix_time: log.unix_time,
        datetime: log.datetime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::Exception;
    use crate::record::LogEvent;
    use chrono::TimeZone;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn empty_structured_fields_are_not_encoded() {
        assert_eq!(encode_if_not_empty(&Map::new()), None);
        assert_eq!(decode_if_not_empty(None, "extra").unwrap(), None);
        assert_eq!(decode_if_not_empty(Some(""), "extra").unwrap(), None);
    }

    #[test]
    fn non_empty_structured_fields_round_trip() {
        let extra = map(json!({"host": "web-1", "pid": 42, "tags": ["a", "b"]}));
        let encoded = encode_if_not_empty(&extra).unwrap();
        let decoded = decode_if_not_empty(Some(&encoded), "extra").unwrap();
        assert_eq!(decoded, Some(extra));
    }

    #[test]
    fn malformed_text_is_reported_with_field_name() {
        let err = decode_if_not_empty(Some("{not json"), "context").unwrap_err();
        assert_eq!(err.field, "context");
    }

    #[test]
    fn exception_is_snapshotted() {
        let event = LogEvent::new("boom")
            .with_exception(
                Exception::new("PaymentError", "card declined")
                    .with_code(402)
                    .with_previous(Exception::new("GatewayTimeout", "no answer")),
            )
            .with_context("order_id", 99i64);

        let captured = capture_context(&event.context);
        let exception = &captured["exception"];
        assert_eq!(exception["class"], "PaymentError");
        assert_eq!(exception["message"], "card declined");
        assert_eq!(exception["code"], 402);
        assert_eq!(exception["file"], file!());
        assert_eq!(exception["previous"]["class"], "GatewayTimeout");
        assert!(exception["previous"]["previous"].is_null());
        assert_eq!(captured["order_id"], 99);
    }

    #[test]
    fn non_throwable_exception_passes_through() {
        let event = LogEvent::new("m").with_context("exception", json!({"class": "Custom"}));
        let captured = capture_context(&event.context);
        assert_eq!(captured["exception"], json!({"class": "Custom"}));

        let event = LogEvent::new("m").with_context("exception", "");
        let captured = capture_context(&event.context);
        assert_eq!(captured["exception"], json!(""));
    }

    #[test]
    fn datetime_uses_configured_format() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(format_datetime(&dt, "%Y-%m-%d %H:%M:%S"), "2024-03-09 14:05:07");
        assert_eq!(
            format_datetime(&dt, DEFAULT_DATETIME_FORMAT),
            "2024-03-09 14:05:07.000000"
        );
    }

    #[test]
    fn datetime_format_validation() {
        assert!(is_valid_datetime_format(DEFAULT_DATETIME_FORMAT));
        assert!(!is_valid_datetime_format("%Y-%"));
        assert!(!is_valid_datetime_format(""));
    }

    #[test]
    fn encode_then_decode_record() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let event = LogEvent::new("saved")
            .level(200, "INFO")
            .channel("app")
            .datetime(dt)
            .with_context("user", "ana")
            .with_extra("ip", "10.0.0.1");
        let record = LogRecord::generate_at(event, true, 1_704_067_200);

        let encoded = encode_record(&record, "%Y-%m-%d");
        assert_eq!(encoded.datetime.as_deref(), Some("2024-01-01"));
        assert_eq!(encoded.context.as_deref(), Some(r#"{"user":"ana"}"#));

        let stored = decode_row(StoredRow {
            id: RecordId::Int(1),
            log: encoded,
        })
        .unwrap();
        assert_eq!(stored.context.unwrap()["user"], "ana");
        assert_eq!(stored.extra.unwrap()["ip"], "10.0.0.1");
        assert_eq!(stored.unix_time, 1_704_067_200);
        assert_eq!(stored.datetime.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn record_without_structured_fields_stores_nulls() {
        let record = LogRecord::generate_at(LogEvent::new("bare"), true, 1);
        let encoded = encode_record(&record, DEFAULT_DATETIME_FORMAT);
        assert_eq!(encoded.context, None);
        assert_eq!(encoded.extra, None);
        assert_eq!(encoded.datetime, None);
    }
}
