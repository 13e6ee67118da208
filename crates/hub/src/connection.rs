//! One live agent session and its bounded outbound queue.

use crate::error::HubError;
use chrono::{DateTime, Utc};
use clawd_protocol::{encode, Frame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Public view of a registered connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInfo {
    pub name: String,
    pub id: String,
    pub connected_at: DateTime<Utc>,
}

/// A live agent session.
///
/// The outbound queue is the only hand-off point between producers and the
/// transport's write loop. Closing drops the sender, which ends the write
/// loop once it has drained what was already queued.
pub struct Connection {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    closed: CancellationToken,
    last_seen: Mutex<Instant>,
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue.
    pub fn new(name: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            outbound: Mutex::new(Some(tx)),
            closed: CancellationToken::new(),
            last_seen: Mutex::new(Instant::now()),
        });
        (conn, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            name: self.name.clone(),
            id: self.id.clone(),
            connected_at: self.created_at,
        }
    }

    /// Non-blocking enqueue of an already serialized message.
    pub fn try_send(&self, text: String) -> Result<(), HubError> {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(HubError::Closed(self.name.clone()));
        };
        tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => HubError::Backpressure(self.name.clone()),
            TrySendError::Closed(_) => HubError::Closed(self.name.clone()),
        })
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<(), HubError> {
        self.try_send(encode(frame)?)
    }

    /// Close the outbound queue and signal the transport. Idempotent.
    pub fn close(&self) {
        self.outbound.lock().take();
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_queue_is_backpressure() {
        let (conn, _rx) = Connection::new("main", 1);
        conn.try_send("one".to_string()).unwrap();
        match conn.try_send("two".to_string()) {
            Err(HubError::Backpressure(name)) => assert_eq!(name, "main"),
            other => panic!("Expected backpressure, got {:?}", other),
        }
    }

    #[test]
    fn test_send_after_close_fails() {
        let (conn, _rx) = Connection::new("main", 4);
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send_frame(&Frame::event("ready", json!({}))),
            Err(HubError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_ends_receiver_after_drain() {
        let (conn, mut rx) = Connection::new("main", 4);
        conn.try_send("queued".to_string()).unwrap();
        conn.close();
        assert_eq!(rx.recv().await.as_deref(), Some("queued"));
        assert_eq!(rx.recv().await, None);
        conn.closed().await;
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _) = Connection::new("main", 1);
        let (b, _) = Connection::new("main", 1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.info().name, "main");
    }
}
