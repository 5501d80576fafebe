//! Persist log events into a relational table or a document index.
//!
//! [`LogToDb`] normalizes each [`LogEvent`], encodes its structured fields and
//! writes it to the store resolved from [`Settings`], either directly or
//! through a [`JobRunner`]. Stored volume is bounded by count or age through
//! the [`retention`] functions.

pub mod backend;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod env;
pub mod error;
pub mod exception;
pub mod init;
pub mod layer;
pub mod memory_store;
pub mod queue;
pub mod record;
pub mod retention;
pub mod store;

#[cfg(feature = "document")]
pub mod document;
#[cfg(feature = "relational")]
pub mod sql;

pub use crate::config::Settings;
pub use crate::dispatcher::{LogToDb, LogToDbBuilder};
pub use crate::exception::{Exception, Throwable};
pub use crate::queue::JobRunner;
pub use crate::record::LogEvent;
pub use crate::store::LogStore;
