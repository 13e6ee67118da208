use crate::error::LaneError;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub(crate) fn from_outcome(outcome: &Result<(), LaneError>) -> Self {
        match outcome {
            Ok(()) => TaskStatus::Completed,
            Err(LaneError::Cancelled) | Err(LaneError::ShuttingDown) => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        }
    }
}

/// Serializable view of a task for status surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub lane: String,
    pub description: String,
    pub status: TaskStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Fired once when a task waited in queue longer than its threshold.
/// Receives the observed wait and the number of tasks still queued behind it.
pub type WaitCallback = Box<dyn FnOnce(Duration, usize) + Send>;

#[derive(Default)]
pub struct SubmitOptions {
    pub description: String,
    /// Overrides the lane's `warn_after`.
    pub warn_after: Option<Duration>,
    pub on_wait: Option<WaitCallback>,
}

impl SubmitOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn warn_after(mut self, threshold: Duration) -> Self {
        self.warn_after = Some(threshold);
        self
    }

    pub fn on_wait<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Duration, usize) + Send + 'static,
    {
        self.on_wait = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("description", &self.description)
            .field("warn_after", &self.warn_after)
            .field("on_wait", &self.on_wait.is_some())
            .finish()
    }
}

pub(crate) type BoxedWork =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), String>> + Send>;

/// A queued unit of work. Owned by exactly one lane queue until dequeued.
pub(crate) struct LaneTask {
    pub id: String,
    pub lane: String,
    pub description: String,
    pub enqueued_at: Instant,
    pub enqueued_wall: DateTime<Utc>,
    pub work: BoxedWork,
    pub token: CancellationToken,
    pub done: Option<oneshot::Sender<Result<(), LaneError>>>,
    pub warn_after: Option<Duration>,
    pub on_wait: Option<WaitCallback>,
}

impl LaneTask {
    pub fn new(
        lane: &str,
        opts: SubmitOptions,
        work: BoxedWork,
        token: CancellationToken,
        done: Option<oneshot::Sender<Result<(), LaneError>>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            lane: lane.to_string(),
            description: opts.description,
            enqueued_at: Instant::now(),
            enqueued_wall: Utc::now(),
            work,
            token,
            done,
            warn_after: opts.warn_after,
            on_wait: opts.on_wait,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            lane: self.lane.clone(),
            description: self.description.clone(),
            status: TaskStatus::Queued,
            enqueued_at: self.enqueued_wall,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Resolve a task that never ran.
    pub fn resolve(mut self, outcome: Result<(), LaneError>) -> TaskSnapshot {
        let mut snapshot = self.snapshot();
        snapshot.status = TaskStatus::from_outcome(&outcome);
        snapshot.completed_at = Some(Utc::now());
        snapshot.error = outcome.as_ref().err().map(|e| e.to_string());
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
        snapshot
    }
}

/// Bookkeeping for a task that left the queue and is executing.
pub(crate) struct ActiveTask {
    pub id: String,
    pub description: String,
    pub enqueued_wall: DateTime<Utc>,
    pub started_wall: DateTime<Utc>,
    pub token: CancellationToken,
}

impl ActiveTask {
    pub fn snapshot(&self, lane: &str) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            lane: lane.to_string(),
            description: self.description.clone(),
            status: TaskStatus::Active,
            enqueued_at: self.enqueued_wall,
            started_at: Some(self.started_wall),
            completed_at: None,
            error: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn noop_work() -> BoxedWork {
        Box::new(|_token| async { Ok(()) }.boxed())
    }

    #[test]
    fn test_status_from_outcome() {
        assert_eq!(TaskStatus::from_outcome(&Ok(())), TaskStatus::Completed);
        assert_eq!(
            TaskStatus::from_outcome(&Err(LaneError::Cancelled)),
            TaskStatus::Cancelled
        );
        assert_eq!(
            TaskStatus::from_outcome(&Err(LaneError::Panicked("x".to_string()))),
            TaskStatus::Failed
        );
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Active).unwrap();
        assert_eq!(json, r#""active""#);
    }

    #[test]
    fn test_resolve_delivers_outcome() {
        let (tx, mut rx) = oneshot::channel();
        let task = LaneTask::new(
            "main",
            SubmitOptions::new("unit"),
            noop_work(),
            CancellationToken::new(),
            Some(tx),
        );
        let snapshot = task.resolve(Err(LaneError::Cancelled));
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert_eq!(snapshot.description, "unit");
        assert_eq!(rx.try_recv().unwrap(), Err(LaneError::Cancelled));
    }

    #[test]
    fn test_submit_options_builder() {
        let opts = SubmitOptions::new("fan-out")
            .warn_after(Duration::from_millis(5))
            .on_wait(|_, _| {});
        assert_eq!(opts.description, "fan-out");
        assert_eq!(opts.warn_after, Some(Duration::from_millis(5)));
        assert!(opts.on_wait.is_some());
    }
}
