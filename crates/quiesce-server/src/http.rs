//! HTTP surface: health probes and the streaming order endpoint.

use crate::ids;
use crate::orders::{self, OrderRequest};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use quiesce_agent::{Aborted, AgentError, AgentEvent, Message, SessionKey, SessionStore};
use quiesce_core::{
    HealthReport, InterruptedMarker, LifecycleController, ReadinessView, ShutdownGuard,
};
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
    pub store: Arc<dyn SessionStore>,
    /// Simulated backend latency of the order tools.
    pub tool_latency: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service is shutting down, not accepting new requests")]
    NotAccepting,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotAccepting => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/api/orders/process", post(process_order))
        .route("/api/orders/:session_id", get(session_status))
        .with_state(state)
}

/// Liveness probe: up for as long as the process answers at all.
async fn health(State(st): State<AppState>) -> Json<HealthReport> {
    Json(ReadinessView::new(st.controller.clone()).liveness())
}

/// Readiness probe: 503 the moment a drain starts, so the traffic router
/// takes this instance out of the rotation.
async fn ready(State(st): State<AppState>) -> Response {
    match ReadinessView::new(st.controller.clone()).readiness() {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(report) => (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response(),
    }
}

/// One event on the order SSE stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderEvent {
    session_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl OrderEvent {
    fn new(session_id: &str, status: &'static str) -> Self {
        Self {
            session_id: session_id.to_string(),
            status,
            message: None,
            data: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    fn interrupted(session_id: &str, aborted: &Aborted) -> Self {
        Self::new(session_id, "interrupted").with_message(format!(
            "{}. Retry with sessionId {} to resume.",
            aborted.reason, session_id
        ))
    }

    fn from_agent_event(session_id: &str, event: &AgentEvent) -> Self {
        match event {
            AgentEvent::RunStart { .. } => Self::new(session_id, "accepted").with_message(
                "Processing started. Keep this sessionId to resume if interrupted.",
            ),
            AgentEvent::StepStart { index } => {
                Self::new(session_id, "step").with_data(serde_json::json!({ "index": index }))
            }
            AgentEvent::Text { content } => {
                Self::new(session_id, "message").with_message(content.clone())
            }
            AgentEvent::ToolCallStart { id, name } => Self::new(session_id, "tool_started")
                .with_data(serde_json::json!({ "id": id, "name": name })),
            AgentEvent::ToolCallDone { id, result } => {
                Self::new(session_id, "tool_completed").with_data(serde_json::json!({
                    "id": id,
                    "tool": result.tool_name,
                    "result": result.data,
                }))
            }
            AgentEvent::RunFinish { .. } => {
                Self::new(session_id, "completed").with_message("Order processing finished.")
            }
        }
    }
}

fn sse_frame(event: &OrderEvent) -> Option<Bytes> {
    serde_json::to_string(event)
        .ok()
        .map(|json| Bytes::from(format!("data: {json}\n\n")))
}

/// Process an order, new or resumed, streaming progress as SSE.
///
/// A missing `sessionId` is synthesized and echoed in the first event. A
/// present one flows into the guard's resume path transparently; there is no
/// separate resume endpoint.
async fn process_order(
    State(st): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<Response, ApiError> {
    if request.order_id.trim().is_empty() {
        return Err(ApiError::BadRequest("orderId cannot be empty".to_string()));
    }
    if !st.controller.is_accepting() {
        return Err(ApiError::NotAccepting);
    }

    let session_id = request
        .session_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(ids::generate_session_id);
    let key = SessionKey::from(session_id.clone());

    info!(
        session = %key,
        order = %request.order_id,
        resume = request.session_id.is_some(),
        "processing order"
    );

    let guard = Arc::new(ShutdownGuard::new(
        st.store.clone(),
        key.clone(),
        st.controller.clone(),
    ));
    let agent = orders::build_order_agent(&request, guard.clone(), st.tool_latency)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    agent
        .restore_if_present(st.store.as_ref(), &key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // An interrupted predecessor changes the input message; the guard itself
    // injects the authoritative resume instruction at the first reasoning
    // step.
    let marker = InterruptedMarker::load(st.store.as_ref(), &key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let input = match marker {
        Some(marker) => Message::user(format!(
            "The previous processing was interrupted due to: {}. Please continue \
             from where you left off and complete any remaining steps.",
            marker.reason
        )),
        None => Message::user(orders::order_prompt(&request)),
    };

    let mut events = agent.spawn_run(key.clone(), input);
    let (tx, rx) = mpsc::channel::<Bytes>(64);
    let controller = st.controller.clone();

    tokio::spawn(async move {
        while let Some(item) = events.recv().await {
            match item {
                Ok(event) => {
                    let order_event = OrderEvent::from_agent_event(&session_id, &event);
                    if let Some(frame) = sse_frame(&order_event) {
                        // A closed channel means the client went away; keep
                        // draining so completion bookkeeping still runs.
                        let _ = tx.send(frame).await;
                    }
                }
                Err(AgentError::Aborted(aborted)) => {
                    if let Some(frame) = sse_frame(&OrderEvent::interrupted(&session_id, &aborted)) {
                        let _ = tx.send(frame).await;
                    }
                    // The abort path persisted marker and state; only the
                    // registration has to go.
                    controller.unregister(&key);
                    return;
                }
                Err(e) => {
                    warn!(session = %key, error = %e, "execution failed");
                    let failed = OrderEvent::new(&session_id, "failed").with_message(e.to_string());
                    if let Some(frame) = sse_frame(&failed) {
                        let _ = tx.send(frame).await;
                    }
                    controller.unregister(&key);
                    return;
                }
            }
        }
        guard.complete().await;
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatus {
    session_id: String,
    status: &'static str,
    message: String,
}

/// Report whether a session exists and whether it needs resumption.
async fn session_status(
    State(st): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    let key = SessionKey::from(session_id.clone());
    let exists = st
        .store
        .exists(&key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !exists {
        return Ok(Json(SessionStatus {
            session_id,
            status: "not_found",
            message: "Session not found".to_string(),
        }));
    }

    let marker = InterruptedMarker::load(st.store.as_ref(), &key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(match marker {
        Some(marker) => SessionStatus {
            session_id: session_id.clone(),
            status: "interrupted",
            message: format!(
                "Session interrupted at {}. Reason: {}. Include this sessionId \
                 in your next request to resume.",
                marker.interrupted_at, marker.reason
            ),
        },
        None => SessionStatus {
            session_id,
            status: "found",
            message: "Session exists".to_string(),
        },
    }))
}
