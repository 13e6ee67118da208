use thiserror::Error;

/// Terminal outcome of a lane task that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaneError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("panic in lane task: {0}")]
    Panicked(String),

    /// Caller cancellation and watchdog expiry both surface as this variant.
    #[error("Task cancelled")]
    Cancelled,

    #[error("Lane manager is shutting down")]
    ShuttingDown,
}

impl LaneError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LaneError::Cancelled)
    }
}
