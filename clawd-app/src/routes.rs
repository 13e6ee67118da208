//! HTTP surface: agent endpoint, status, lane control and the call proxy.

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use clawd_hub::transport::{self, ConnectQuery};
use clawd_hub::{AgentInfo, HubError};
use clawd_interfaces::CrashReport;
use clawd_lanes::{lanes, LaneError, LaneStats, SubmitOptions, TaskSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const STATUS_CRASHES: usize = 10;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(agent_socket))
        .route("/status", get(status))
        .route("/lanes", get(list_lanes))
        .route("/lanes/:lane/tasks", get(lane_tasks))
        .route("/lanes/:lane/concurrency", put(set_concurrency))
        .route("/lanes/:lane/cancel", post(cancel_lane))
        .route("/call", post(call))
        .with_state(state)
}

async fn agent_socket(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    transport::upgrade(Arc::clone(&state.hub), ws, query.name)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub agents: Vec<AgentInfo>,
    pub lanes: Vec<LaneStats>,
    pub queued_total: usize,
    pub active_total: usize,
    pub pending_calls: usize,
    pub counters: MetricsSnapshot,
    pub recent_crashes: Vec<CrashReport>,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let recent_crashes = state
        .crash_log
        .tail(STATUS_CRASHES)
        .unwrap_or_else(|e| {
            warn!("Crash log unreadable: {}", e);
            Vec::new()
        });
    Json(StatusResponse {
        uptime_secs: state.started.elapsed().as_secs(),
        agents: state.hub.agents(),
        lanes: state.lanes.all_stats(),
        queued_total: state.lanes.queued_total(),
        active_total: state.lanes.active_total(),
        pending_calls: state.hub.pending_calls(),
        counters: state.metrics.snapshot(),
        recent_crashes,
    })
}

async fn list_lanes(State(state): State<Arc<AppState>>) -> Json<Vec<LaneStats>> {
    Json(state.lanes.all_stats())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LaneTasksResponse {
    pub lane: String,
    pub tasks: Vec<TaskSnapshot>,
    pub recent: Vec<TaskSnapshot>,
}

async fn lane_tasks(
    State(state): State<Arc<AppState>>,
    Path(lane): Path<String>,
) -> Json<LaneTasksResponse> {
    Json(LaneTasksResponse {
        tasks: state.lanes.tasks(&lane),
        recent: state.lanes.recent(&lane),
        lane,
    })
}

#[derive(Debug, Deserialize)]
pub struct SetConcurrencyRequest {
    /// Negative means unlimited.
    pub max: i64,
}

async fn set_concurrency(
    State(state): State<Arc<AppState>>,
    Path(lane): Path<String>,
    Json(request): Json<SetConcurrencyRequest>,
) -> Json<Value> {
    let effective = state.lanes.set_concurrency(&lane, request.max);
    Json(json!({ "lane": lane, "requested": request.max, "effective": effective }))
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelResponse {
    pub cancelled_active: usize,
    pub cleared_queued: usize,
}

/// Full drain: clear the queue first so nothing queued slips into a slot
/// freed by the cancellation.
async fn cancel_lane(
    State(state): State<Arc<AppState>>,
    Path(lane): Path<String>,
) -> Json<CancelResponse> {
    let cleared_queued = state.lanes.clear_lane(&lane);
    let cancelled_active = state.lanes.cancel_active(&lane);
    Json(CancelResponse {
        cancelled_active,
        cleared_queued,
    })
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Defaults to the main lane.
    pub lane: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Proxy one request to the primary agent through a lane.
async fn call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CallRequest>,
) -> Result<Json<Value>, ApiError> {
    if state.lanes.is_shutdown() {
        return Err(LaneError::ShuttingDown.into());
    }
    let lane = request.lane.unwrap_or_else(|| lanes::MAIN.to_string());
    let timeout = request
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.hub.config().call_timeout());
    let hub = Arc::clone(&state.hub);
    let method = request.method;
    let params = request.params;
    state.metrics.inc_calls_proxied();

    // Hub errors travel as the task's value so their kind survives the lane.
    let cancel = state.shutdown.child_token();
    let outcome = state
        .lanes
        .submit(
            &cancel,
            &lane,
            SubmitOptions::new(format!("call {}", method)),
            move |token| async move {
                Ok(hub.call_sync(&token, &method, params, timeout).await)
            },
        )
        .await?;

    Ok(Json(outcome?))
}

/// Error body returned by the HTTP surface.
#[derive(Debug)]
pub enum ApiError {
    Hub(HubError),
    Lane(LaneError),
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        ApiError::Hub(e)
    }
}

impl From<LaneError> for ApiError {
    fn from(e: LaneError) -> Self {
        ApiError::Lane(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Hub(HubError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Hub(HubError::Backpressure(_)) | ApiError::Hub(HubError::Closed(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Hub(HubError::Timeout { .. }) | ApiError::Hub(HubError::Cancelled) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ApiError::Hub(HubError::Protocol(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Lane(LaneError::Cancelled) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Lane(LaneError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Lane(LaneError::Failed(_)) | ApiError::Lane(LaneError::Panicked(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Hub(e) => e.to_string(),
            ApiError::Lane(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            warn!(status = %status, "Call failed: {}", message);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
