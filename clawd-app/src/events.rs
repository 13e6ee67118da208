//! Lifecycle event sink shared by the hub and the lane manager.

use crate::metrics::DaemonMetrics;
use clawd_hub::{EVENT_AGENT_CONNECTED, EVENT_AGENT_DISCONNECTED};
use clawd_interfaces::EventSink;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Logs lifecycle events and keeps the daemon counters.
pub struct DaemonEvents {
    metrics: Arc<DaemonMetrics>,
}

impl DaemonEvents {
    pub fn new(metrics: Arc<DaemonMetrics>) -> Self {
        Self { metrics }
    }
}

impl EventSink for DaemonEvents {
    fn emit(&self, event: &str, payload: Value) {
        match event {
            EVENT_AGENT_CONNECTED => {
                self.metrics.inc_agents_connected();
                info!(agent = %payload["name"], "agent_connected");
            }
            EVENT_AGENT_DISCONNECTED => {
                self.metrics.inc_agents_disconnected();
                info!(
                    agent = %payload["name"],
                    reason = %payload["reason"],
                    "agent_disconnected"
                );
            }
            "task_enqueued" => self.metrics.inc_tasks_enqueued(),
            "task_completed" => match payload["status"].as_str() {
                Some("completed") => self.metrics.inc_tasks_completed(),
                _ => self.metrics.inc_tasks_failed(),
            },
            "task_cancelled" => self.metrics.inc_tasks_cancelled(),
            _ => {}
        }
        debug!(event = %event, payload = %payload, "Lifecycle event");
    }
}
