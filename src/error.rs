use crate::backend::BackendKind;
use std::error::Error;

/// Fatal problems detected while building a [`LogToDb`](crate::dispatcher::LogToDb).
///
/// These are returned from the builder instead of producing a half-initialized
/// instance; the caller is expected to treat them as startup failures.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Neither the selected connection nor the default one has an entry in
    /// the database registry.
    #[error("no database connection configured for `{0}`")]
    MissingConnection(String),

    #[error("custom model `{0}` is not registered")]
    UnknownModel(String),

    /// Collection names end up in SQL statements and URLs, so they are
    /// restricted to `[A-Za-z0-9_.-]`.
    #[error("invalid collection name `{0}`")]
    InvalidCollection(String),

    #[error("invalid datetime format `{0}`")]
    InvalidDatetimeFormat(String),

    #[error("{0:?} backend is not enabled in this build")]
    BackendDisabled(BackendKind),

    #[error("failed to open {kind:?} store for connection `{connection}`: {source}")]
    StoreOpen {
        kind: BackendKind,
        connection: String,
        #[source]
        source: StoreError,
    },
}

/// Failure reported by a [`LogStore`](crate::store::LogStore) implementation.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "relational")]
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[cfg(feature = "document")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected store response: {0}")]
    UnexpectedResponse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Escape hatch for custom stores wrapping their own client errors.
    #[error("backend error: {0}")]
    Backend(Box<dyn Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        StoreError::Backend(err.into())
    }
}

/// A structured field read back from the store could not be parsed.
#[derive(thiserror::Error, Debug)]
#[error("malformed `{field}` payload: {source}")]
pub struct CodecError {
    pub field: &'static str,
    #[source]
    pub source: serde_json::Error,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CutoffError {
    #[error("empty retention cutoff")]
    Empty,

    #[error("unrecognised retention cutoff `{0}`")]
    Unrecognised(String),

    #[error("retention cutoff `{0}` is out of range")]
    OutOfRange(String),
}

/// Failure of a read through [`LogToDb::latest`](crate::dispatcher::LogToDb::latest).
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
