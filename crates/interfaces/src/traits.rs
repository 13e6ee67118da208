use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Receives lifecycle notifications (`agent_connected`, `task_started`, ...).
///
/// Called inline from hot paths, so implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// A contained panic from a lane task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashReport {
    pub at: DateTime<Utc>,
    pub lane: String,
    pub task_id: String,
    pub description: String,
    pub message: String,
}

/// Durable destination for [`CrashReport`]s.
pub trait CrashSink: Send + Sync {
    fn record(&self, report: &CrashReport);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EventSink for Recorder {
        fn emit(&self, event: &str, _payload: Value) {
            self.events.lock().unwrap().push(event.to_string());
        }
    }

    #[test]
    fn test_event_sink_object_safe() {
        let recorder = Recorder {
            events: Mutex::new(Vec::new()),
        };
        let sink: &dyn EventSink = &recorder;
        sink.emit("agent_connected", serde_json::json!({"name": "main"}));
        assert_eq!(recorder.events.lock().unwrap().as_slice(), ["agent_connected"]);
    }

    #[test]
    fn test_crash_report_serialization() {
        let report = CrashReport {
            at: Utc::now(),
            lane: "main".to_string(),
            task_id: "t1".to_string(),
            description: "chat turn".to_string(),
            message: "index out of bounds".to_string(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["lane"], "main");
        assert_eq!(json["message"], "index out of bounds");
    }
}
