//! Throwable values carried in `context.exception` and their stored snapshot.
//!
//! A [`Throwable`] is a live error object attached to a log event. Before a
//! record is persisted it is turned into an [`ExceptionInfo`], a plain
//! serializable copy that no longer references the original error. Queued
//! delivery never carries live throwables across workers; the dispatcher saves
//! such events synchronously first.

use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Base throwable kind recognized by the field codec.
///
/// Any type implementing this trait is captured into an [`ExceptionInfo`]
/// when it appears under the `exception` key of an event's context. The
/// message is taken from the `Display` implementation.
pub trait Throwable: Error + Send + Sync {
    /// Name of the concrete exception class, e.g. `"RuntimeError"`.
    fn class_name(&self) -> &str;

    fn code(&self) -> i64 {
        0
    }

    /// Source file where the throwable was created.
    fn file(&self) -> &str;

    /// Source line where the throwable was created.
    fn line(&self) -> u32;

    /// Stack frames captured at creation time, innermost first.
    fn trace(&self) -> &[StackFrame] {
        &[]
    }

    /// The throwable that caused this one, if any.
    fn previous(&self) -> Option<&dyn Throwable> {
        None
    }
}

/// A single frame of a captured stack trace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Snapshot of a [`Throwable`] as stored in `context.exception`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub class: String,
    pub message: String,
    pub code: i64,
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub trace: Vec<StackFrame>,
    #[serde(default)]
    pub previous: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    /// Eagerly copy everything out of `throwable`, following the whole
    /// `previous` chain.
    pub fn capture(throwable: &dyn Throwable) -> Self {
        ExceptionInfo {
            class: throwable.class_name().to_string(),
            message: throwable.to_string(),
            code: throwable.code(),
            file: throwable.file().to_string(),
            line: throwable.line(),
            trace: throwable.trace().to_vec(),
            previous: throwable
                .previous()
                .map(|prev| Box::new(ExceptionInfo::capture(prev))),
        }
    }
}

/// General purpose [`Throwable`] for application code.
///
/// The creation site is recorded through `#[track_caller]`. A backtrace is
/// always captured, whatever `RUST_BACKTRACE` says.
#[derive(Debug, Clone)]
pub struct Exception {
    class: String,
    message: String,
    code: i64,
    file: String,
    line: u32,
    trace: Vec<StackFrame>,
    previous: Option<Arc<Exception>>,
}

impl Exception {
    #[track_caller]
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        let location = Location::caller();
        Exception {
            class: class.into(),
            message: message.into(),
            code: 0,
            file: location.file().to_string(),
            line: location.line(),
            trace: capture_trace(),
            previous: None,
        }
    }

    /// Wrap an arbitrary error, turning its `source()` chain into
    /// `previous` exceptions.
    ///
    /// Rust errors carry no class name at runtime, so the leading type or
    /// variant name of the `Debug` representation is used instead.
    #[track_caller]
    pub fn from_error(err: &dyn Error) -> Self {
        let location = Location::caller();
        let mut exception = Self::from_error_at(err, location);
        exception.trace = capture_trace();
        exception
    }

    fn from_error_at(err: &dyn Error, location: &Location<'_>) -> Self {
        Exception {
            class: class_name_of(err),
            message: err.to_string(),
            code: 0,
            file: location.file().to_string(),
            line: location.line(),
            trace: Vec::new(),
            previous: err
                .source()
                .map(|source| Arc::new(Self::from_error_at(source, location))),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_previous(mut self, previous: Exception) -> Self {
        self.previous = Some(Arc::new(previous));
        self
    }

    pub fn with_trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for Exception {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.previous
            .as_deref()
            .map(|prev| prev as &(dyn Error + 'static))
    }
}

impl Throwable for Exception {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn code(&self) -> i64 {
        self.code
    }

    fn file(&self) -> &str {
        &self.file
    }

    fn line(&self) -> u32 {
        self.line
    }

    fn trace(&self) -> &[StackFrame] {
        &self.trace
    }

    fn previous(&self) -> Option<&dyn Throwable> {
        self.previous.as_deref().map(|prev| prev as &dyn Throwable)
    }
}

fn class_name_of(err: &dyn Error) -> String {
    let debug = format!("{:?}", err);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

fn capture_trace() -> Vec<StackFrame> {
    let backtrace = Backtrace::force_capture();
    if backtrace.status() == BacktraceStatus::Captured {
        parse_backtrace(&backtrace.to_string())
    } else {
        Vec::new()
    }
}

/// Parse the `Display` output of [`std::backtrace::Backtrace`] into frames.
///
/// Frame lines look like `  3: crate::module::function` and may be followed
/// by an `at path/to/file.rs:LINE:COL` line.
pub fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let (file, line_no) = split_location(location);
                frame.file = Some(file);
                frame.line = line_no;
            }
            continue;
        }

        if let Some((index, function)) = line.split_once(": ") {
            if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(StackFrame {
                    function: function.trim().to_string(),
                    file: None,
                    line: None,
                });
            }
        }
    }

    frames
}

// `path:line:col`, where the path itself may contain colons.
fn split_location(location: &str) -> (String, Option<u32>) {
    let mut parts = location.rsplitn(3, ':');
    let col = parts.next();
    let line = parts.next();
    let path = parts.next();

    match (path, line, col) {
        (Some(path), Some(line), Some(_)) => (path.to_string(), line.parse().ok()),
        _ => (location.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ParseFailure {
        inner: std::num::ParseIntError,
    }

    impl fmt::Display for ParseFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "could not parse port")
        }
    }

    impl Error for ParseFailure {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.inner)
        }
    }

    #[test]
    fn capture_copies_all_fields() {
        let exception = Exception::new("RuntimeError", "boom").with_code(42);
        let line = line!() - 1;

        let info = ExceptionInfo::capture(&exception);
        assert_eq!(info.class, "RuntimeError");
        assert_eq!(info.message, "boom");
        assert_eq!(info.code, 42);
        assert_eq!(info.file, file!());
        assert_eq!(info.line, line);
        assert!(info.previous.is_none());
    }

    #[test]
    fn capture_follows_previous_chain() {
        let root = Exception::new("IoError", "disk full");
        let exception = Exception::new("SaveError", "could not save").with_previous(root);

        let info = ExceptionInfo::capture(&exception);
        let previous = info.previous.expect("previous captured");
        assert_eq!(previous.class, "IoError");
        assert_eq!(previous.message, "disk full");
        assert!(previous.previous.is_none());
    }

    #[test]
    fn from_error_walks_source_chain() {
        let inner = "abc".parse::<u16>().unwrap_err();
        let err = ParseFailure { inner };

        let exception = Exception::from_error(&err);
        let info = ExceptionInfo::capture(&exception);
        assert_eq!(info.class, "ParseFailure");
        assert_eq!(info.message, "could not parse port");
        let previous = info.previous.expect("source captured");
        assert_eq!(previous.class, "ParseIntError");
        assert!(previous.previous.is_none());
    }

    #[test]
    fn parse_backtrace_reads_frames_and_locations() {
        let text = "   0: app::handler::run\n             at ./src/handler.rs:10:5\n   1: std::rt::lang_start\n   2: main\n             at C:\\work\\src\\main.rs:3:1\n";

        let frames = parse_backtrace(text);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].function, "app::handler::run");
        assert_eq!(frames[0].file.as_deref(), Some("./src/handler.rs"));
        assert_eq!(frames[0].line, Some(10));
        assert_eq!(frames[1].file, None);
        assert_eq!(frames[2].file.as_deref(), Some("C:\\work\\src\\main.rs"));
        assert_eq!(frames[2].line, Some(3));
    }

    #[test]
    fn trace_is_captured_without_backtrace_env() {
        std::env::remove_var("RUST_BACKTRACE");
        std::env::remove_var("RUST_LIB_BACKTRACE");

        let info = ExceptionInfo::capture(&Exception::new("RuntimeError", "boom"));
        assert!(!info.trace.is_empty());
        assert!(info.trace.iter().all(|frame| !frame.function.is_empty()));

        let err = "x".parse::<u8>().unwrap_err();
        assert!(!Exception::from_error(&err).trace().is_empty());
    }

    #[test]
    fn snapshot_serializes_missing_previous_as_null() {
        let info = ExceptionInfo::capture(&Exception::new("E", "m"));
        let value = serde_json::to_value(&info).unwrap();
        assert!(value["previous"].is_null());
        assert_eq!(value["class"], "E");
    }
}
