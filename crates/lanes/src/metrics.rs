//! Metrics instrumentation for lane scheduling.

use std::time::Duration;

/// Record how long a task waited in queue.
pub fn record_wait(lane: &str, waited: Duration) {
    ::metrics::histogram!("lane_wait_duration", as_ms(waited), "lane" => lane.to_string());
}

/// Record how long a task executed.
pub fn record_run(lane: &str, ran: Duration) {
    ::metrics::histogram!("lane_task_duration", as_ms(ran), "lane" => lane.to_string());
}

/// Increment contained panic counter.
pub fn increment_panics(lane: &str) {
    ::metrics::counter!("lane_task_panics", 1, "lane" => lane.to_string());
}

/// Increment watchdog expiry counter.
pub fn increment_watchdog(lane: &str) {
    ::metrics::counter!("lane_watchdog_fired", 1, "lane" => lane.to_string());
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
