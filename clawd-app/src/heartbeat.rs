//! Periodic liveness check of the primary agent, run through the heartbeat lane.

use crate::config::HeartbeatConfig;
use crate::state::AppState;
use chrono::Utc;
use clawd_lanes::{lanes, LaneError, SubmitOptions};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of one heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Beat {
    Sent,
    /// Primary agent not connected, or the previous beat is still in flight.
    Skipped,
    Failed(String),
}

pub fn spawn(state: Arc<AppState>, config: HeartbeatConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?period, "Heartbeat started");

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let beat = beat(&state, &config).await;
                    debug!(?beat, "Heartbeat tick");
                }
            }
        }
        info!("Heartbeat stopped");
    })
}

/// Run one heartbeat: a `heartbeat` call to the primary agent in the
/// heartbeat lane.
pub async fn beat(state: &AppState, config: &HeartbeatConfig) -> Beat {
    let primary = state.hub.config().primary.clone();
    if !state.hub.is_connected(&primary) {
        state.metrics.inc_heartbeats_skipped();
        return Beat::Skipped;
    }
    if let Some(stats) = state.lanes.stats(lanes::HEARTBEAT) {
        if stats.active + stats.queued > 0 {
            state.metrics.inc_heartbeats_skipped();
            return Beat::Skipped;
        }
    }

    let hub = Arc::clone(&state.hub);
    let timeout = config.timeout();
    let result = state
        .lanes
        .submit(
            &state.shutdown,
            lanes::HEARTBEAT,
            SubmitOptions::new("heartbeat"),
            move |token| async move {
                hub.call_sync(&token, "heartbeat", json!({ "at": Utc::now() }), timeout)
                    .await
                    .map_err(|e| e.to_string())
            },
        )
        .await;

    match result {
        Ok(_) => {
            state.metrics.inc_heartbeats_sent();
            Beat::Sent
        }
        Err(LaneError::ShuttingDown) => Beat::Skipped,
        Err(e) => {
            state.metrics.inc_heartbeat_failures();
            warn!(agent = %primary, "Heartbeat failed: {}", e);
            Beat::Failed(e.to_string())
        }
    }
}
