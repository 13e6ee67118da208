//! One lane: FIFO queue, active set, pump and execution wrapper.

use crate::config::{clamp_concurrency, LaneSpec};
use crate::error::LaneError;
use crate::events::LaneEvent;
use crate::manager::LaneStats;
use crate::metrics;
use crate::task::{ActiveTask, LaneTask, TaskSnapshot, TaskStatus};
use chrono::Utc;
use clawd_interfaces::{CrashReport, CrashSink, EventSink};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const RECENT_HISTORY: usize = 32;

/// Collaborators shared by every lane of one manager.
pub(crate) struct Hooks {
    pub events: Option<Arc<dyn EventSink>>,
    pub crash: Option<Arc<dyn CrashSink>>,
    pub shutdown: CancellationToken,
}

impl Hooks {
    /// Deliver an event. A panicking sink is logged and otherwise ignored.
    pub fn emit(&self, event: LaneEvent) {
        let name = event.name();
        let delivered =
            panic::catch_unwind(AssertUnwindSafe(|| event.emit(self.events.as_deref())));
        if let Err(payload) = delivered {
            error!(event = name, "Event sink panicked: {}", panic_message(payload));
        }
    }

    fn record_crash(&self, report: CrashReport) {
        let Some(crash) = &self.crash else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| crash.record(&report))) {
            error!(lane = %report.lane, "Crash sink panicked: {}", panic_message(payload));
        }
    }
}

pub(crate) struct LaneState {
    queue: VecDeque<LaneTask>,
    active: HashMap<String, ActiveTask>,
    max_concurrent: usize,
    closed: bool,
    recent: VecDeque<TaskSnapshot>,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

impl LaneState {
    fn has_capacity(&self) -> bool {
        self.max_concurrent == 0 || self.active.len() < self.max_concurrent
    }

    fn record(&mut self, snapshot: TaskSnapshot) {
        match snapshot.status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            _ => self.failed += 1,
        }
        if self.recent.len() == RECENT_HISTORY {
            self.recent.pop_front();
        }
        self.recent.push_back(snapshot);
    }
}

pub(crate) struct Lane {
    pub name: String,
    pub spec: LaneSpec,
    state: Mutex<LaneState>,
    wake: Notify,
}

impl Lane {
    pub fn new(name: &str, spec: LaneSpec) -> Self {
        let max_concurrent = spec.initial_concurrency();
        Self {
            name: name.to_string(),
            spec,
            state: Mutex::new(LaneState {
                queue: VecDeque::new(),
                active: HashMap::new(),
                max_concurrent,
                closed: false,
                recent: VecDeque::new(),
                completed: 0,
                failed: 0,
                cancelled: 0,
            }),
            wake: Notify::new(),
        }
    }

    /// Start the lane's pump. Exits when `hooks.shutdown` is cancelled.
    pub fn spawn_pump(self: &Arc<Self>, hooks: Arc<Hooks>) {
        let lane = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = hooks.shutdown.cancelled() => break,
                    _ = lane.wake.notified() => {}
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| lane.drain(&hooks))) {
                    error!(lane = %lane.name, "Lane pump panicked: {}", panic_message(payload));
                    lane.wake.notify_one();
                }
            }
            debug!(lane = %lane.name, "Lane pump stopped");
        });
    }

    /// Append a task and wake the pump.
    ///
    /// The wake-up is issued under the same lock as the append, and `Notify`
    /// keeps one permit when the pump is not parked, so a task can never sit
    /// in the queue without a pending wake-up.
    pub fn enqueue(&self, task: LaneTask, hooks: &Hooks) -> Result<String, LaneError> {
        let id = task.id.clone();
        let description = task.description.clone();
        let queued = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(LaneError::ShuttingDown);
            }
            state.queue.push_back(task);
            self.wake.notify_one();
            state.queue.len()
        };

        debug!(lane = %self.name, task = %id, queued, "Task enqueued");
        hooks.emit(LaneEvent::TaskEnqueued {
            lane: self.name.clone(),
            task_id: id.clone(),
            description,
            queued,
        });
        Ok(id)
    }

    /// Move runnable tasks from the queue into the active set.
    fn drain(self: &Arc<Self>, hooks: &Arc<Hooks>) {
        loop {
            let (mut task, queued_behind, started_wall) = {
                let mut state = self.state.lock();
                if !state.has_capacity() {
                    return;
                }
                let Some(task) = state.queue.pop_front() else {
                    return;
                };
                if task.token.is_cancelled() {
                    drop(state);
                    self.resolve_unstarted(task, Err(LaneError::Cancelled), hooks);
                    continue;
                }
                let started_wall = Utc::now();
                state.active.insert(
                    task.id.clone(),
                    ActiveTask {
                        id: task.id.clone(),
                        description: task.description.clone(),
                        enqueued_wall: task.enqueued_wall,
                        started_wall,
                        token: task.token.clone(),
                    },
                );
                (task, state.queue.len(), started_wall)
            };

            let mut handoff = Handoff {
                lane: self,
                task_id: task.id.clone(),
                armed: true,
            };

            let waited = task.enqueued_at.elapsed();
            metrics::record_wait(&self.name, waited);
            if let Some(threshold) = task.warn_after.or(self.spec.warn_after) {
                if waited > threshold {
                    warn!(
                        lane = %self.name,
                        task = %task.id,
                        "Task waited {:?} in queue ({} still queued)",
                        waited,
                        queued_behind
                    );
                    if let Some(on_wait) = task.on_wait.take() {
                        let called = panic::catch_unwind(AssertUnwindSafe(|| {
                            on_wait(waited, queued_behind)
                        }));
                        if let Err(payload) = called {
                            let message = format!("on_wait callback: {}", panic_message(payload));
                            self.report_panic(&task.id, &task.description, &message, hooks);
                        }
                    }
                }
            }

            hooks.emit(LaneEvent::TaskStarted {
                lane: self.name.clone(),
                task_id: task.id.clone(),
                waited_ms: waited.as_millis() as u64,
            });
            handoff.armed = false;
            self.execute(task, started_wall, Arc::clone(hooks));
        }
    }

    /// Run one dequeued task on its own Tokio task.
    fn execute(
        self: &Arc<Self>,
        task: LaneTask,
        started_wall: chrono::DateTime<Utc>,
        hooks: Arc<Hooks>,
    ) {
        let lane = Arc::clone(self);
        tokio::spawn(async move {
            let LaneTask {
                id,
                description,
                enqueued_wall,
                work,
                token,
                mut done,
                ..
            } = task;

            let started = Instant::now();
            let work_token = token.clone();
            let mut handle = tokio::spawn(async move { work(work_token).await });

            let outcome = tokio::select! {
                joined = &mut handle => match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(message)) => Err(LaneError::Failed(message)),
                    Err(e) if e.is_panic() => {
                        let message = panic_message(e.into_panic());
                        lane.report_panic(&id, &description, &message, &hooks);
                        Err(LaneError::Panicked(message))
                    }
                    Err(_) => Err(LaneError::Cancelled),
                },
                _ = token.cancelled() => {
                    handle.abort();
                    Err(LaneError::Cancelled)
                }
                _ = watchdog(lane.spec.watchdog) => {
                    warn!(
                        lane = %lane.name,
                        task = %id,
                        "Watchdog expired after {:?}, cancelling task",
                        lane.spec.watchdog.unwrap_or_default()
                    );
                    metrics::increment_watchdog(&lane.name);
                    token.cancel();
                    handle.abort();
                    Err(LaneError::Cancelled)
                }
            };

            let ran = started.elapsed();
            metrics::record_run(&lane.name, ran);

            let status = TaskStatus::from_outcome(&outcome);
            let snapshot = TaskSnapshot {
                id: id.clone(),
                lane: lane.name.clone(),
                description,
                status,
                enqueued_at: enqueued_wall,
                started_at: Some(started_wall),
                completed_at: Some(Utc::now()),
                error: outcome.as_ref().err().map(|e| e.to_string()),
            };
            let error = snapshot.error.clone();

            // The slot must be vacated before the pump is woken again.
            {
                let mut state = lane.state.lock();
                state.active.remove(&id);
                state.record(snapshot);
            }

            if let Some(done) = done.take() {
                let _ = done.send(outcome);
            }

            if status == TaskStatus::Cancelled {
                hooks.emit(LaneEvent::TaskCancelled {
                    lane: lane.name.clone(),
                    task_id: id,
                    was_active: true,
                });
            } else {
                hooks.emit(LaneEvent::TaskCompleted {
                    lane: lane.name.clone(),
                    task_id: id,
                    status,
                    duration_ms: ran.as_millis() as u64,
                    error,
                });
            }

            lane.wake.notify_one();
        });
    }

    fn report_panic(&self, task_id: &str, description: &str, message: &str, hooks: &Hooks) {
        error!(
            lane = %self.name,
            task = %task_id,
            "panic in lane task '{}': {}",
            description,
            message
        );
        metrics::increment_panics(&self.name);
        hooks.record_crash(CrashReport {
            at: Utc::now(),
            lane: self.name.clone(),
            task_id: task_id.to_string(),
            description: description.to_string(),
            message: message.to_string(),
        });
    }

    /// Resolve a task that never started and account for it.
    pub fn resolve_unstarted(&self, task: LaneTask, outcome: Result<(), LaneError>, hooks: &Hooks) {
        let snapshot = task.resolve(outcome);
        let task_id = snapshot.id.clone();
        self.state.lock().record(snapshot);
        hooks.emit(LaneEvent::TaskCancelled {
            lane: self.name.clone(),
            task_id,
            was_active: false,
        });
    }

    /// Take a task out of the queue if it has not started yet.
    pub fn remove_queued(&self, task_id: &str) -> Option<LaneTask> {
        let mut state = self.state.lock();
        let position = state.queue.iter().position(|t| t.id == task_id)?;
        state.queue.remove(position)
    }

    /// Cancel every executing task. Queued tasks are left alone.
    pub fn cancel_active(&self) -> usize {
        let state = self.state.lock();
        for task in state.active.values() {
            task.token.cancel();
        }
        state.active.len()
    }

    /// Remove every queued task. Active tasks are left alone.
    pub fn take_queue(&self) -> Vec<LaneTask> {
        self.state.lock().queue.drain(..).collect()
    }

    /// Set the concurrency limit, clamped to the hard ceiling. Returns the
    /// effective value.
    pub fn set_max_concurrent(&self, requested: usize) -> usize {
        let effective = clamp_concurrency(requested, self.spec.hard_cap);
        let mut state = self.state.lock();
        state.max_concurrent = effective;
        self.wake.notify_one();
        effective
    }

    /// Refuse further submissions and hand back whatever is still queued.
    pub fn close(&self) -> Vec<LaneTask> {
        let mut state = self.state.lock();
        state.closed = true;
        state.queue.drain(..).collect()
    }

    pub fn stats(&self) -> LaneStats {
        let state = self.state.lock();
        LaneStats {
            lane: self.name.clone(),
            queued: state.queue.len(),
            active: state.active.len(),
            max_concurrent: state.max_concurrent,
            hard_cap: self.spec.hard_cap,
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
        }
    }

    /// Active tasks (by start time) followed by queued tasks (FIFO order).
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        let state = self.state.lock();
        let mut active: Vec<TaskSnapshot> = state
            .active
            .values()
            .map(|t| t.snapshot(&self.name))
            .collect();
        active.sort_by_key(|t| t.started_at);
        active.extend(state.queue.iter().map(LaneTask::snapshot));
        active
    }

    pub fn recent(&self) -> Vec<TaskSnapshot> {
        self.state.lock().recent.iter().cloned().collect()
    }
}

/// Frees a task's active slot if the pump unwinds before handing it off.
struct Handoff<'a> {
    lane: &'a Lane,
    task_id: String,
    armed: bool,
}

impl Drop for Handoff<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lane.state.lock().active.remove(&self.task_id);
        }
    }
}

async fn watchdog(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
