//! WebSocket transport: one read loop and one write loop per connection.

use crate::connection::Connection;
use crate::hub::Hub;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Query parameters of the agent endpoint.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default = "default_agent_name")]
    pub name: String,
}

fn default_agent_name() -> String {
    "main".to_string()
}

/// Router exposing only the agent endpoint at `/ws`.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(hub)
}

pub async fn ws_handler(
    State(hub): State<Arc<Hub>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(hub, ws, query.name)
}

/// Finish the handshake and serve the socket as agent `name`.
pub fn upgrade(hub: Arc<Hub>, ws: WebSocketUpgrade, name: String) -> Response {
    let max = hub.config().max_message_bytes;
    ws.max_message_size(max)
        .on_upgrade(move |socket| serve_socket(hub, socket, name))
}

/// Register a connection for `socket` and run it until either side ends it.
pub async fn serve_socket(hub: Arc<Hub>, socket: WebSocket, name: String) {
    let config = hub.config().clone();
    let (conn, outbound) = Connection::new(name, config.outbound_capacity);
    hub.register(Arc::clone(&conn));

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        Arc::clone(&conn),
        config.ping_interval(),
    ));

    let reason = read_loop(&hub, &conn, stream, config.idle_timeout()).await;
    info!(agent = %conn.name(), id = %conn.id(), reason, "Read loop ended");

    hub.unregister(&conn);
    if let Err(e) = writer.await {
        warn!(agent = %conn.name(), "Write loop failed: {}", e);
    }
}

async fn read_loop(
    hub: &Hub,
    conn: &Arc<Connection>,
    mut stream: SplitStream<WebSocket>,
    idle: Duration,
) -> &'static str {
    let idle_timer = tokio::time::sleep(idle);
    tokio::pin!(idle_timer);

    loop {
        tokio::select! {
            _ = conn.closed() => return "closed by hub",
            _ = &mut idle_timer => {
                warn!(agent = %conn.name(), "No traffic for {:?}, dropping connection", idle);
                return "idle timeout";
            }
            next = stream.next() => {
                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!(agent = %conn.name(), "Read error: {}", e);
                        return "read error";
                    }
                    None => return "remote closed",
                };
                idle_timer.as_mut().reset(Instant::now() + idle);

                match message {
                    Message::Text(text) => hub.dispatch(conn, &text).await,
                    Message::Pong(_) | Message::Ping(_) => conn.touch(),
                    Message::Binary(_) => {
                        warn!(agent = %conn.name(), "Binary message ignored");
                    }
                    Message::Close(_) => return "remote closed",
                }
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    conn: Arc<Connection>,
    ping_every: Duration,
) {
    let ping_every = ping_every.max(Duration::from_secs(1));
    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(text) = next else {
                    break;
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(agent = %conn.name(), "Write error: {}", e);
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    debug!(agent = %conn.name(), "Ping failed: {}", e);
                    break;
                }
            }
        }
    }

    // Stops the read loop too when the socket failed first.
    conn.close();
    let _ = sink.send(Message::Close(None)).await;
}
