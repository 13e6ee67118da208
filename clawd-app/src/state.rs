use crate::config::DaemonConfig;
use crate::crash_log::CrashLog;
use crate::events::DaemonEvents;
use crate::metrics::DaemonMetrics;
use clawd_hub::{Hub, LoggingHandler};
use clawd_interfaces::{CrashSink, EventSink};
use clawd_lanes::LaneManager;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the HTTP handlers and background loops share.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub lanes: LaneManager,
    pub metrics: Arc<DaemonMetrics>,
    pub crash_log: Arc<CrashLog>,
    pub started: Instant,
    /// Cancelled once on shutdown; parent of every request's token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the hub and the lane manager to the daemon's sinks.
    pub fn build(config: &DaemonConfig) -> anyhow::Result<Arc<Self>> {
        let metrics = DaemonMetrics::new();
        let events: Arc<dyn EventSink> = Arc::new(DaemonEvents::new(Arc::clone(&metrics)));
        let crash_log =
            Arc::new(CrashLog::new(&config.crash_log)?.with_max_bytes(config.crash_log_max_bytes));
        let crash: Arc<dyn CrashSink> = crash_log.clone();

        let hub = Hub::new(config.hub.clone())
            .with_events(Arc::clone(&events))
            .with_handler(Arc::new(LoggingHandler));
        let lanes = LaneManager::with_hooks(config.lane_table(), Some(events), Some(crash));

        info!(
            primary = %config.hub.primary,
            crash_log = %config.crash_log.display(),
            "Daemon state ready"
        );

        Ok(Arc::new(Self {
            hub: Arc::new(hub),
            lanes,
            metrics,
            crash_log,
            started: Instant::now(),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Stop background loops and the lane pumps. Safe to call twice.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.lanes.shutdown();
    }
}
