use crate::lark::dispatcher::{DispatchOutcome, EventDispatcher};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

pub const EVENT_PATH: &str = "/webhook/event";
pub const CARD_PATH: &str = "/webhook/card";

/// HTTP callback endpoints for events and card actions.
pub fn router(dispatcher: Arc<EventDispatcher>) -> Router {
    Router::new()
        .route(EVENT_PATH, post(handle_callback))
        .route(CARD_PATH, post(handle_callback))
        .with_state(dispatcher)
}

async fn handle_callback(
    State(dispatcher): State<Arc<EventDispatcher>>,
    body: Bytes,
) -> Response {
    match dispatcher.dispatch(&body).await {
        Ok(DispatchOutcome::Challenge(challenge)) => {
            Json(json!({ "challenge": challenge })).into_response()
        }
        Ok(DispatchOutcome::Handled(Some(body))) => Json(body).into_response(),
        Ok(DispatchOutcome::Handled(None)) | Ok(DispatchOutcome::Ignored) => {
            Json(json!({})).into_response()
        }
        Err(e) => {
            error!("Failed to handle callback: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "msg": e.to_string() })),
            )
                .into_response()
        }
    }
}
