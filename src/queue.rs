use crate::dispatcher::LogToDb;
use crate::record::LogEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Queue selection for an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueTarget {
    /// Default queue on the default queue connection.
    Default,
    /// Named queue on the default queue connection.
    Queue(String),
    /// Default queue on a named queue connection.
    Connection(String),
    ConnectionAndQueue { connection: String, queue: String },
}

impl QueueTarget {
    /// Build the target from the optional overrides; empty strings count as
    /// unset.
    pub fn from_overrides(queue_connection: Option<&str>, queue_name: Option<&str>) -> Self {
        let connection = queue_connection.filter(|c| !c.is_empty());
        let queue = queue_name.filter(|q| !q.is_empty());

        match (connection, queue) {
            (None, None) => QueueTarget::Default,
            (Some(connection), Some(queue)) => QueueTarget::ConnectionAndQueue {
                connection: connection.to_string(),
                queue: queue.to_string(),
            },
            (Some(connection), None) => QueueTarget::Connection(connection.to_string()),
            (None, Some(queue)) => QueueTarget::Queue(queue.to_string()),
        }
    }

    pub fn connection(&self) -> Option<&str> {
        match self {
            QueueTarget::Connection(connection)
            | QueueTarget::ConnectionAndQueue { connection, .. } => Some(connection),
            _ => None,
        }
    }

    pub fn queue(&self) -> Option<&str> {
        match self {
            QueueTarget::Queue(queue) | QueueTarget::ConnectionAndQueue { queue, .. } => {
                Some(queue)
            }
            _ => None,
        }
    }
}

/// Deferred save of one event.
///
/// Running the job performs the synchronous save path of its [`LogToDb`]
/// exactly once.
#[derive(Clone, Debug)]
pub struct SaveLogJob {
    log_to_db: LogToDb,
    event: LogEvent,
}

impl SaveLogJob {
    pub fn new(log_to_db: LogToDb, event: LogEvent) -> Self {
        SaveLogJob { log_to_db, event }
    }

    pub fn event(&self) -> &LogEvent {
        &self.event
    }

    /// Persist the event; returns whether the store accepted it.
    pub async fn handle(self) -> bool {
        self.log_to_db.save(self.event).await
    }
}

/// Asynchronous job runner jobs are handed to.
///
/// `dispatch` must not block; its result only says whether the job was
/// accepted, never whether it eventually ran successfully.
pub trait JobRunner: Send + Sync {
    fn dispatch(&self, job: SaveLogJob, target: &QueueTarget) -> bool;
}

/// Counters shared between a [`TokioJobRunner`] and its workers.
#[derive(Debug, Default)]
pub struct RunnerStats {
    pub enqueued: AtomicU64,
    /// Rejected because the lane was full or closed.
    pub dropped: AtomicU64,
    pub completed: AtomicU64,
    /// Ran, but the store did not accept the record.
    pub failed: AtomicU64,
}

/// In-process [`JobRunner`] with one bounded channel and worker task per
/// queue target.
///
/// Workers are spawned lazily on the current Tokio runtime the first time a
/// target is used. Jobs are fire-and-forget; failures are only counted and
/// logged.
pub struct TokioJobRunner {
    buffer: usize,
    lanes: Mutex<HashMap<QueueTarget, mpsc::Sender<SaveLogJob>>>,
    stats: Arc<RunnerStats>,
}

impl TokioJobRunner {
    pub fn new(buffer: usize) -> Self {
        TokioJobRunner {
            buffer: buffer.max(16),
            lanes: Mutex::new(HashMap::new()),
            stats: Arc::new(RunnerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RunnerStats> {
        Arc::clone(&self.stats)
    }

    fn spawn_lane(&self, target: &QueueTarget) -> Option<mpsc::Sender<SaveLogJob>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let (tx, mut rx) = mpsc::channel::<SaveLogJob>(self.buffer);
        let stats = Arc::clone(&self.stats);
        let lane = target.clone();

        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                if job.handle().await {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(target: "log_to_db::queue", queue = ?lane, "queued log save failed");
                }
            }
            debug!(target: "log_to_db::queue", queue = ?lane, "queue worker stopped");
        });

        Some(tx)
    }
}

impl Default for TokioJobRunner {
    fn default() -> Self {
        TokioJobRunner::new(1024)
    }
}

impl JobRunner for TokioJobRunner {
    fn dispatch(&self, job: SaveLogJob, target: &QueueTarget) -> bool {
        let sender = {
            let mut lanes = self
                .lanes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match lanes.get(target) {
                Some(sender) if !sender.is_closed() => sender.clone(),
                _ => match self.spawn_lane(target) {
                    Some(sender) => {
                        lanes.insert(target.clone(), sender.clone());
                        sender
                    }
                    None => {
                        warn!(target: "log_to_db::queue", "no Tokio runtime, dropping queued log");
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        return false;
                    }
                },
            }
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(target: "log_to_db::queue", queue = ?target, "queue full, dropping log record");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_from_overrides() {
        assert_eq!(QueueTarget::from_overrides(None, None), QueueTarget::Default);
        assert_eq!(QueueTarget::from_overrides(Some(""), Some("")), QueueTarget::Default);
        assert_eq!(
            QueueTarget::from_overrides(Some("redis"), Some("logs")),
            QueueTarget::ConnectionAndQueue {
                connection: "redis".into(),
                queue: "logs".into()
            }
        );
        assert_eq!(
            QueueTarget::from_overrides(Some("redis"), None),
            QueueTarget::Connection("redis".into())
        );
        assert_eq!(
            QueueTarget::from_overrides(None, Some("logs")),
            QueueTarget::Queue("logs".into())
        );
    }

    #[test]
    fn target_accessors() {
        let target = QueueTarget::from_overrides(Some("redis"), Some("logs"));
        assert_eq!(target.connection(), Some("redis"));
        assert_eq!(target.queue(), Some("logs"));
        assert_eq!(QueueTarget::Default.queue(), None);
    }
}
