//! API route handlers for the gateway.

use axum::http::StatusCode;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::json;

use courier_core::error::CourierError;
use courier_core::types::{MessageStatus, ScheduleRequest, SendRequest};

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn success(data: serde_json::Value, message: Option<&str>, code: StatusCode) -> ApiResponse {
    let mut body = json!({ "status": "success", "data": data });
    if let Some(message) = message {
        body["message"] = json!(message);
    }
    (code, Json(body))
}

fn failure(error: &CourierError) -> ApiResponse {
    let code = match error {
        CourierError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CourierError::NotFound(_) => StatusCode::NOT_FOUND,
        CourierError::ChannelUnavailable(_) | CourierError::Shutdown(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(json!({
            "status": "error",
            "message": error.to_string(),
            "code": code.as_u16(),
        })),
    )
}

/// Liveness probe.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "courier-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Channel readiness and scheduling counters.
pub async fn service_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let messages = state.engine.get_all();
    let pending = messages
        .iter()
        .filter(|m| m.status == MessageStatus::Pending)
        .count();
    Json(json!({
        "channel": {
            "name": state.channel.name(),
            "ready": state.channel.is_ready(),
        },
        "messages": {
            "total": messages.len(),
            "pending": pending,
            "armed_timers": state.engine.armed_timers(),
        },
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Immediate send through the channel.
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> ApiResponse {
    match state.engine.send_now(&request.to, &request.message).await {
        Ok(()) => success(
            serde_json::Value::Null,
            Some("Message sent successfully"),
            StatusCode::OK,
        ),
        Err(e) => failure(&e),
    }
}

/// Schedule a message for future delivery.
pub async fn schedule_message(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> ApiResponse {
    match state.engine.schedule(request) {
        Ok(message) => success(
            json!(message),
            Some("Message scheduled successfully"),
            StatusCode::CREATED,
        ),
        Err(e) => failure(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkScheduleRequest {
    pub messages: Vec<ScheduleRequest>,
}

/// Schedule a batch; every item is attempted, failures are reported per
/// index so one bad entry does not discard the rest.
pub async fn schedule_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkScheduleRequest>,
) -> ApiResponse {
    let results = state.engine.schedule_bulk(request.messages);
    let mut scheduled = Vec::new();
    let mut errors = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(message) => scheduled.push(json!(message)),
            Err(e) => errors.push(json!({ "index": index, "message": e.to_string() })),
        }
    }

    let code = if errors.is_empty() {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_REQUEST
    };
    let status = if errors.is_empty() { "success" } else { "error" };
    (
        code,
        Json(json!({
            "status": status,
            "data": { "scheduled": scheduled, "errors": errors },
        })),
    )
}

/// Fetch one scheduled message.
pub async fn get_scheduled_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.get(&id) {
        Some(message) => success(json!(message), None, StatusCode::OK),
        None => failure(&CourierError::NotFound("Scheduled message not found".into())),
    }
}

/// List all scheduled messages.
pub async fn list_scheduled_messages(State(state): State<AppState>) -> ApiResponse {
    success(json!(state.engine.get_all()), None, StatusCode::OK)
}

/// Cancel a pending scheduled message. A no-op cancel (unknown id or already
/// terminal) reports 404, matching the lookup semantics of `get`.
pub async fn cancel_scheduled_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.cancel(&id) {
        Ok(true) => success(
            serde_json::Value::Null,
            Some("Message cancelled successfully"),
            StatusCode::OK,
        ),
        Ok(false) => failure(&CourierError::NotFound("Scheduled message not found".into())),
        Err(e) => failure(&e),
    }
}
