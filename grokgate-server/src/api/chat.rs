//! `/v1/chat/completions` — the OpenAI-compatible chat surface.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use tracing::info;

use grokgate_core::dispatch::DispatchReply;
use grokgate_core::protocol::ChatRequest;

use super::{bearer_token, ApiError};
use crate::state::AppState;

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Ok(unauthorized("API key missing"));
    };

    // In custom-session mode the bearer value IS the caller's session
    // cookie; otherwise it must match the gateway key.
    let custom_session = if state.config().custom_sso {
        Some(token)
    } else {
        if token != state.config().api_key {
            return Ok(unauthorized("Unauthorized"));
        }
        None
    };

    info!(model = request.model, stream = request.stream, "chat request");
    match state.dispatcher().handle(request, custom_session).await? {
        DispatchReply::Completion(body) => Ok(Json(body).into_response()),
        DispatchReply::Stream(frames) => {
            let body = Body::from_stream(frames.map(Ok::<_, Infallible>));
            Ok((
                [(header::CONTENT_TYPE, "text/event-stream"), (header::CACHE_CONTROL, "no-cache")],
                body,
            )
                .into_response())
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": {"message": message, "type": "invalid_request_error"}})),
    )
        .into_response()
}
