//! Lane lifecycle notifications.

use crate::task::TaskStatus;
use clawd_interfaces::EventSink;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LaneEvent {
    TaskEnqueued {
        lane: String,
        task_id: String,
        description: String,
        queued: usize,
    },
    TaskStarted {
        lane: String,
        task_id: String,
        waited_ms: u64,
    },
    TaskCompleted {
        lane: String,
        task_id: String,
        status: TaskStatus,
        duration_ms: u64,
        error: Option<String>,
    },
    TaskCancelled {
        lane: String,
        task_id: String,
        was_active: bool,
    },
}

impl LaneEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LaneEvent::TaskEnqueued { .. } => "task_enqueued",
            LaneEvent::TaskStarted { .. } => "task_started",
            LaneEvent::TaskCompleted { .. } => "task_completed",
            LaneEvent::TaskCancelled { .. } => "task_cancelled",
        }
    }

    pub(crate) fn emit(self, sink: Option<&dyn EventSink>) {
        let Some(sink) = sink else {
            return;
        };
        match serde_json::to_value(&self) {
            Ok(payload) => sink.emit(self.name(), payload),
            Err(e) => tracing::warn!("Failed to serialize lane event {}: {}", self.name(), e),
        }
    }
}
