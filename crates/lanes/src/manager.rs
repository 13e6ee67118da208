//! Registry of lanes and the public scheduling API.

use crate::config::LaneTable;
use crate::error::LaneError;
use crate::lane::{Hooks, Lane};
use crate::task::{BoxedWork, LaneTask, SubmitOptions, TaskSnapshot};
use clawd_interfaces::{CrashSink, EventSink};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Point-in-time counters for one lane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaneStats {
    pub lane: String,
    pub queued: usize,
    pub active: usize,
    /// 0 means unlimited.
    pub max_concurrent: usize,
    pub hard_cap: Option<usize>,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

struct Inner {
    lanes: RwLock<HashMap<String, Arc<Lane>>>,
    table: LaneTable,
    hooks: Arc<Hooks>,
}

/// Multi-lane task scheduler.
///
/// Cheap to clone; all clones share the same lanes. Lanes are created on
/// first reference, which spawns their pump, so every method that may
/// create a lane must run inside a Tokio runtime.
#[derive(Clone)]
pub struct LaneManager {
    inner: Arc<Inner>,
}

impl LaneManager {
    pub fn new(table: LaneTable) -> Self {
        Self::with_hooks(table, None, None)
    }

    pub fn with_hooks(
        table: LaneTable,
        events: Option<Arc<dyn EventSink>>,
        crash: Option<Arc<dyn CrashSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: RwLock::new(HashMap::new()),
                table,
                hooks: Arc::new(Hooks {
                    events,
                    crash,
                    shutdown: CancellationToken::new(),
                }),
            }),
        }
    }

    pub fn table(&self) -> &LaneTable {
        &self.inner.table
    }

    fn existing(&self, name: &str) -> Option<Arc<Lane>> {
        self.inner.lanes.read().get(name).cloned()
    }

    fn lane(&self, name: &str) -> Arc<Lane> {
        if let Some(lane) = self.existing(name) {
            return lane;
        }

        let mut lanes = self.inner.lanes.write();
        if let Some(lane) = lanes.get(name) {
            return Arc::clone(lane);
        }

        let spec = self.inner.table.spec_for(name);
        let lane = Arc::new(Lane::new(name, spec));
        if self.inner.hooks.shutdown.is_cancelled() {
            lane.close();
        } else {
            lane.spawn_pump(Arc::clone(&self.inner.hooks));
        }
        info!(
            lane = %name,
            max_concurrent = lane.stats().max_concurrent,
            "Lane created"
        );
        lanes.insert(name.to_string(), Arc::clone(&lane));
        lane
    }

    /// Run `work` in `lane` and wait for its result.
    ///
    /// The task executes under a child of `cancel`: cancelling `cancel` (or
    /// dropping the returned future) cancels the task, removing it from the
    /// queue if it has not started yet.
    pub async fn submit<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        lane: &str,
        opts: SubmitOptions,
        work: F,
    ) -> Result<T, LaneError>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(LaneError::Cancelled);
        }

        let (value_tx, value_rx) = oneshot::channel();
        let boxed: BoxedWork = Box::new(move |token| {
            async move {
                let value = work(token).await?;
                let _ = value_tx.send(value);
                Ok::<(), String>(())
            }
            .boxed()
        });

        let token = cancel.child_token();
        let (done_tx, done_rx) = oneshot::channel();
        let lane = self.lane(lane);
        let task = LaneTask::new(&lane.name, opts, boxed, token.clone(), Some(done_tx));
        let task_id = lane.enqueue(task, &self.inner.hooks)?;

        let mut guard = SubmitGuard {
            lane: &lane,
            hooks: &self.inner.hooks,
            task_id: &task_id,
            token,
            armed: true,
        };

        let outcome = tokio::select! {
            done = done_rx => done.unwrap_or(Err(LaneError::Cancelled)),
            _ = cancel.cancelled() => {
                if let Some(task) = lane.remove_queued(&task_id) {
                    lane.resolve_unstarted(task, Err(LaneError::Cancelled), &self.inner.hooks);
                }
                Err(LaneError::Cancelled)
            }
        };
        guard.armed = false;

        outcome?;
        value_rx
            .await
            .map_err(|_| LaneError::Failed("task finished without a result".to_string()))
    }

    /// Enqueue `work` in `lane` and return its task id immediately.
    ///
    /// The outcome is only observable through lane events and statistics.
    pub fn submit_async<F, Fut>(
        &self,
        lane: &str,
        opts: SubmitOptions,
        work: F,
    ) -> Result<String, LaneError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let boxed: BoxedWork = Box::new(move |token| work(token).boxed());
        let lane = self.lane(lane);
        let task = LaneTask::new(&lane.name, opts, boxed, CancellationToken::new(), None);
        lane.enqueue(task, &self.inner.hooks)
    }

    /// Change a lane's concurrency limit at runtime.
    ///
    /// Negative values mean unlimited. The result is clamped to the lane's
    /// hard ceiling and returned. Queued tasks that become runnable start
    /// without waiting for another submission.
    pub fn set_concurrency(&self, lane: &str, max: i64) -> usize {
        let requested = usize::try_from(max).unwrap_or(0);
        let lane = self.lane(lane);
        let effective = lane.set_max_concurrent(requested);
        if effective != requested {
            info!(
                lane = %lane.name,
                requested = max,
                effective,
                "Concurrency clamped to hard cap"
            );
        } else {
            info!(lane = %lane.name, effective, "Concurrency updated");
        }
        effective
    }

    /// Cancel every executing task in `lane`. Returns how many were signalled.
    pub fn cancel_active(&self, lane: &str) -> usize {
        let Some(lane) = self.existing(lane) else {
            return 0;
        };
        let count = lane.cancel_active();
        if count > 0 {
            info!(lane = %lane.name, count, "Cancelled active tasks");
        }
        count
    }

    /// Remove every queued task in `lane`, resolving each as cancelled.
    pub fn clear_lane(&self, lane: &str) -> usize {
        let Some(lane) = self.existing(lane) else {
            return 0;
        };
        let removed = lane.take_queue();
        let count = removed.len();
        for task in removed {
            lane.resolve_unstarted(task, Err(LaneError::Cancelled), &self.inner.hooks);
        }
        if count > 0 {
            info!(lane = %lane.name, count, "Cleared queued tasks");
        }
        count
    }

    pub fn stats(&self, lane: &str) -> Option<LaneStats> {
        self.existing(lane).map(|lane| lane.stats())
    }

    /// Stats for every lane created so far, sorted by name.
    pub fn all_stats(&self) -> Vec<LaneStats> {
        let lanes: Vec<Arc<Lane>> = self.inner.lanes.read().values().cloned().collect();
        let mut stats: Vec<LaneStats> = lanes.iter().map(|lane| lane.stats()).collect();
        stats.sort_by(|a, b| a.lane.cmp(&b.lane));
        stats
    }

    pub fn queued_total(&self) -> usize {
        self.all_stats().iter().map(|s| s.queued).sum()
    }

    pub fn active_total(&self) -> usize {
        self.all_stats().iter().map(|s| s.active).sum()
    }

    /// Active and queued tasks of a lane.
    pub fn tasks(&self, lane: &str) -> Vec<TaskSnapshot> {
        self.existing(lane)
            .map(|lane| lane.snapshots())
            .unwrap_or_default()
    }

    /// Most recently finished tasks of a lane, oldest first.
    pub fn recent(&self, lane: &str) -> Vec<TaskSnapshot> {
        self.existing(lane)
            .map(|lane| lane.recent())
            .unwrap_or_default()
    }

    /// Stop all pumps and refuse further submissions.
    ///
    /// Tasks still queued resolve with [`LaneError::ShuttingDown`]; running
    /// tasks are left to finish. Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.hooks.shutdown.cancel();
        let lanes: Vec<Arc<Lane>> = self.inner.lanes.read().values().cloned().collect();
        let mut dropped = 0;
        for lane in lanes {
            for task in lane.close() {
                dropped += 1;
                lane.resolve_unstarted(task, Err(LaneError::ShuttingDown), &self.inner.hooks);
            }
        }
        info!(dropped, "Lane manager shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.hooks.shutdown.is_cancelled()
    }
}

impl Default for LaneManager {
    fn default() -> Self {
        Self::new(LaneTable::standard())
    }
}

/// Cancels a blocking submission's task if the submitting future is dropped.
struct SubmitGuard<'a> {
    lane: &'a Lane,
    hooks: &'a Hooks,
    task_id: &'a str,
    token: CancellationToken,
    armed: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.token.cancel();
        if let Some(task) = self.lane.remove_queued(self.task_id) {
            self.lane
                .resolve_unstarted(task, Err(LaneError::Cancelled), self.hooks);
        }
    }
}
