//! Registry of live agent connections and frame routing.

use crate::config::HubConfig;
use crate::connection::{AgentInfo, Connection};
use crate::error::HubError;
use crate::handler::InboundHandler;
use clawd_interfaces::EventSink;
use clawd_protocol::{
    decode, encode, new_correlation_id, AgentEvent, ApprovalRequest, ApprovalResponse,
    AskRequest, AskResponse, Frame, FrameType, EVENT_READY,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const EVENT_AGENT_CONNECTED: &str = "agent_connected";
pub const EVENT_AGENT_DISCONNECTED: &str = "agent_disconnected";

type PendingMap = Mutex<HashMap<String, oneshot::Sender<Frame>>>;

/// Agent hub.
///
/// Holds at most one live [`Connection`] per agent name. Frames go out through
/// each connection's bounded queue; replies to synchronous calls come back
/// through [`Hub::dispatch`], which is driven by the transport's read loop.
pub struct Hub {
    config: HubConfig,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    pending: PendingMap,
    events: Option<Arc<dyn EventSink>>,
    handler: Option<Arc<dyn InboundHandler>>,
    started: Instant,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            events: None,
            handler: None,
            started: Instant::now(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Install `conn` under its name, evicting any previous holder first.
    ///
    /// The evicted connection is closed and its `agent_disconnected` event
    /// emitted before the new one becomes visible, so a name never resolves
    /// to two live connections. Events are emitted outside the registry lock;
    /// a holder that shows up in between is evicted on the next pass.
    pub fn register(&self, conn: Arc<Connection>) {
        loop {
            let evicted = {
                let mut connections = self.connections.write();
                match connections.remove(conn.name()) {
                    Some(old) => {
                        old.close();
                        Some(old)
                    }
                    None => {
                        connections.insert(conn.name().to_string(), Arc::clone(&conn));
                        None
                    }
                }
            };
            let Some(old) = evicted else {
                break;
            };
            info!(agent = %old.name(), id = %old.id(), "Agent replaced by new connection");
            self.emit_disconnected(&old, "replaced");
        }

        info!(agent = %conn.name(), id = %conn.id(), "Agent connected");
        self.emit(
            EVENT_AGENT_CONNECTED,
            json!({ "name": conn.name(), "id": conn.id() }),
        );

        // Best effort: a full buffer just loses the notification.
        tokio::spawn(async move {
            let ready = Frame::event(EVENT_READY, json!({ "name": conn.name(), "id": conn.id() }));
            if let Err(e) = conn.send_frame(&ready) {
                debug!(agent = %conn.name(), "Ready event not delivered: {}", e);
            }
        });
    }

    /// Remove `conn` if it still owns its name slot.
    ///
    /// Returns false when a newer connection already took the slot.
    pub fn unregister(&self, conn: &Connection) -> bool {
        let removed = {
            let mut connections = self.connections.write();
            match connections.get(conn.name()) {
                Some(current) if current.id() == conn.id() => {
                    connections.remove(conn.name());
                    true
                }
                _ => false,
            }
        };
        conn.close();

        if removed {
            info!(agent = %conn.name(), id = %conn.id(), "Agent disconnected");
            self.emit_disconnected(conn, "closed");
        } else {
            debug!(agent = %conn.name(), id = %conn.id(), "Stale connection left, slot already replaced");
        }
        removed
    }

    fn lookup(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(name).cloned()
    }

    fn lookup_id(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .find(|conn| conn.id() == id)
            .cloned()
    }

    /// Fire-and-forget send. Fails immediately with
    /// [`HubError::Backpressure`] when the agent's buffer is full.
    pub fn send_to(&self, name: &str, frame: &Frame) -> Result<(), HubError> {
        let text = encode(frame)?;
        let conn = self
            .lookup(name)
            .ok_or_else(|| HubError::NotFound(name.to_string()))?;
        conn.try_send(text)
    }

    /// Like [`Hub::send_to`] but addressed by connection id.
    ///
    /// Unknown ids fail unless `fallback_to_primary` is set, in which case
    /// the frame goes to the primary connection.
    pub fn send_to_id(&self, id: &str, frame: &Frame) -> Result<(), HubError> {
        let text = encode(frame)?;
        let conn = match self.lookup_id(id) {
            Some(conn) => conn,
            None if self.config.fallback_to_primary => {
                let primary = self
                    .lookup(&self.config.primary)
                    .ok_or_else(|| HubError::NotFound(id.to_string()))?;
                warn!(
                    id = %id,
                    primary = %primary.name(),
                    "Unknown connection id, falling back to primary"
                );
                primary
            }
            None => return Err(HubError::NotFound(id.to_string())),
        };
        conn.try_send(text)
    }

    /// Send to every live connection, skipping full buffers.
    /// Returns how many connections accepted the frame.
    pub fn broadcast(&self, frame: &Frame) -> Result<usize, HubError> {
        let text = encode(frame)?;
        let connections: Vec<Arc<Connection>> =
            self.connections.read().values().cloned().collect();

        let mut delivered = 0;
        for conn in connections {
            match conn.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(agent = %conn.name(), "Broadcast skipped: {}", e),
            }
        }
        Ok(delivered)
    }

    /// Synchronous call to the primary agent.
    pub async fn call_sync(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, HubError> {
        self.call_agent(&self.config.primary, cancel, method, params, timeout)
            .await
    }

    /// Send a `req` to `agent` and wait for the `res` with the same id.
    ///
    /// Gives up on `timeout` or when `cancel` fires. The pending entry is
    /// removed on every outcome, including the future being dropped.
    pub async fn call_agent(
        &self,
        agent: &str,
        cancel: &CancellationToken,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, HubError> {
        if cancel.is_cancelled() {
            return Err(HubError::Cancelled);
        }

        let id = new_correlation_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        self.send_to(agent, &Frame::request(id.as_str(), method, params))?;
        debug!(agent = %agent, method = %method, id = %id, "Sync call sent");

        let frame = tokio::select! {
            reply = rx => reply.map_err(|_| HubError::Closed(agent.to_string()))?,
            _ = cancel.cancelled() => return Err(HubError::Cancelled),
            _ = tokio::time::sleep(timeout) => {
                warn!(agent = %agent, method = %method, id = %id, "Sync call timed out");
                return Err(HubError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        Ok(frame.into_result()?)
    }

    /// Number of synchronous calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    /// Hand a reply to the call waiting on its id. Gives the frame back when
    /// nobody is waiting.
    fn complete_pending(&self, frame: Frame) -> Option<Frame> {
        let waiter = frame
            .id
            .as_deref()
            .and_then(|id| self.pending.lock().remove(id));
        match waiter {
            // The caller may have given up in the meantime; `send` never blocks.
            Some(tx) => {
                let _ = tx.send(frame);
                None
            }
            None => Some(frame),
        }
    }

    pub fn send_approval_response(
        &self,
        agent: &str,
        request_id: &str,
        response: ApprovalResponse,
    ) -> Result<(), HubError> {
        self.send_to(agent, &response.into_frame(request_id)?)
    }

    pub fn send_ask_response(
        &self,
        agent: &str,
        request_id: &str,
        response: AskResponse,
    ) -> Result<(), HubError> {
        self.send_to(agent, &response.into_frame(request_id)?)
    }

    /// Route one inbound message from `conn`.
    ///
    /// Only `res` frames complete a pending call. `stream` frames are partial
    /// progress and always go to the inbound handler, so a pending call ends
    /// on its final response and never on a chunk.
    ///
    /// Malformed messages are logged and dropped; the connection stays open.
    pub async fn dispatch(&self, conn: &Arc<Connection>, text: &str) {
        conn.touch();
        let frame = match decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(agent = %conn.name(), "Dropping inbound message: {}", e);
                return;
            }
        };

        match frame.kind {
            FrameType::Res => {
                if let Some(frame) = self.complete_pending(frame) {
                    self.unclaimed(conn.name(), frame).await;
                }
            }
            // Progress for a pending call, not its result.
            FrameType::Stream => self.unclaimed(conn.name(), frame).await,
            FrameType::Event => match AgentEvent::from_frame(&frame) {
                Ok(event) => match &self.handler {
                    Some(handler) => handler.on_event(conn.name(), event).await,
                    None => debug!(agent = %conn.name(), event = %event.event, "Agent event"),
                },
                Err(e) => warn!(agent = %conn.name(), "Event frame not decoded: {}", e),
            },
            FrameType::ApprovalRequest => match ApprovalRequest::from_frame(&frame) {
                Ok(request) => self.spawn_approval(conn.name(), request),
                Err(e) => warn!(agent = %conn.name(), "Bad approval request: {}", e),
            },
            FrameType::AskRequest => match AskRequest::from_frame(&frame) {
                Ok(request) => self.spawn_ask(conn.name(), request),
                Err(e) => warn!(agent = %conn.name(), "Bad ask request: {}", e),
            },
            FrameType::Req => {
                let reply = self.handle_request(conn, &frame);
                if let Err(e) = conn.send_frame(&reply) {
                    warn!(agent = %conn.name(), method = %frame.method(), "Reply not sent: {}", e);
                }
            }
            FrameType::ApprovalResponse | FrameType::AskResponse => {
                warn!(agent = %conn.name(), "Unexpected {} frame from agent", frame.kind);
            }
        }
    }

    async fn unclaimed(&self, agent: &str, frame: Frame) {
        match &self.handler {
            Some(handler) => handler.on_response(agent, frame).await,
            None => debug!(agent = %agent, id = ?frame.id, "Unclaimed {} frame dropped", frame.kind),
        }
    }

    fn spawn_approval(&self, agent: &str, request: ApprovalRequest) {
        let Some(handler) = self.handler.clone() else {
            warn!(agent = %agent, tool = %request.tool, "No approval handler registered");
            return;
        };
        let agent = agent.to_string();
        tokio::spawn(async move {
            handler.on_approval_request(&agent, request).await;
        });
    }

    fn spawn_ask(&self, agent: &str, request: AskRequest) {
        let Some(handler) = self.handler.clone() else {
            warn!(agent = %agent, "No ask handler registered");
            return;
        };
        let agent = agent.to_string();
        tokio::spawn(async move {
            handler.on_ask_request(&agent, request).await;
        });
    }

    /// Built-in methods an agent may call on the hub.
    fn handle_request(&self, conn: &Connection, frame: &Frame) -> Frame {
        let id = frame.id.clone().unwrap_or_default();
        match frame.method() {
            "ping" => Frame::response_ok(id, json!({ "pong": true })),
            "status" => Frame::response_ok(
                id,
                json!({
                    "name": conn.name(),
                    "id": conn.id(),
                    "uptime_secs": self.uptime().as_secs(),
                    "agents": self.connections.read().len(),
                    "pending_calls": self.pending_calls(),
                }),
            ),
            other => Frame::response_err(id, format!("unknown method: {}", other)),
        }
    }

    pub fn agents(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self
            .connections
            .read()
            .values()
            .map(|conn| conn.info())
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.connections.read().contains_key(name)
    }

    fn emit(&self, event: &str, payload: Value) {
        if let Some(events) = &self.events {
            events.emit(event, payload);
        }
    }

    fn emit_disconnected(&self, conn: &Connection, reason: &str) {
        self.emit(
            EVENT_AGENT_DISCONNECTED,
            json!({ "name": conn.name(), "id": conn.id(), "reason": reason }),
        );
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Removes a pending-call entry however the call ends.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> Frame {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no frame in time")
            .expect("queue closed");
        decode(&text).unwrap()
    }

    #[tokio::test]
    async fn test_register_pushes_ready_event() {
        let hub = Hub::default();
        let (conn, mut rx) = Connection::new("main", 8);
        hub.register(Arc::clone(&conn));

        let frame = next_frame(&mut rx).await;
        let event = AgentEvent::from_frame(&frame).unwrap();
        assert_eq!(event.event, EVENT_READY);
        assert_eq!(event.data["id"], conn.id());
        assert!(hub.is_connected("main"));
    }

    #[tokio::test]
    async fn test_ping_and_status_requests() {
        let hub = Hub::default();
        let (conn, mut rx) = Connection::new("main", 8);
        hub.register(Arc::clone(&conn));
        next_frame(&mut rx).await;

        hub.dispatch(&conn, r#"{"type":"req","id":"p1","method":"ping"}"#).await;
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply.id.as_deref(), Some("p1"));
        assert!(reply.is_ok());

        hub.dispatch(&conn, r#"{"type":"req","id":"s1","method":"status"}"#).await;
        let reply = next_frame(&mut rx).await;
        let payload = reply.into_result().unwrap();
        assert_eq!(payload["name"], "main");
        assert_eq!(payload["agents"], 1);
    }

    #[tokio::test]
    async fn test_unknown_method_yields_error_response() {
        let hub = Hub::default();
        let (conn, mut rx) = Connection::new("main", 8);
        hub.register(Arc::clone(&conn));
        next_frame(&mut rx).await;

        hub.dispatch(&conn, r#"{"type":"req","id":"x1","method":"reboot"}"#).await;
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply.kind, FrameType::Res);
        assert!(!reply.is_ok());
        assert!(reply.error.unwrap().contains("reboot"));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let hub = Hub::default();
        let (conn, mut rx) = Connection::new("main", 8);
        hub.register(Arc::clone(&conn));
        next_frame(&mut rx).await;

        hub.dispatch(&conn, "{not json").await;
        hub.dispatch(&conn, r#"{"type":"teleport"}"#).await;
        assert!(hub.is_connected("main"));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_send_to_id_fallback_is_opt_in() {
        let hub = Hub::default();
        let (conn, _rx) = Connection::new("main", 8);
        hub.register(Arc::clone(&conn));
        let frame = Frame::event("note", json!({}));

        assert!(hub.send_to_id(conn.id(), &frame).is_ok());
        assert!(matches!(
            hub.send_to_id("stale-id", &frame),
            Err(HubError::NotFound(_))
        ));

        let config = HubConfig {
            fallback_to_primary: true,
            ..HubConfig::default()
        };
        let hub = Hub::new(config);
        let (conn, mut rx) = Connection::new("main", 8);
        hub.register(Arc::clone(&conn));
        next_frame(&mut rx).await;
        hub.send_to_id("stale-id", &frame).unwrap();
        assert_eq!(next_frame(&mut rx).await, frame);
    }

    #[tokio::test]
    async fn test_send_to_unknown_agent() {
        let hub = Hub::default();
        let result = hub.send_to("ghost", &Frame::event("note", json!({})));
        assert!(matches!(result, Err(HubError::NotFound(name)) if name == "ghost"));
    }
}
