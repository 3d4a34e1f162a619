//! Operator endpoints: session-token management and the Cloudflare
//! clearance cookie.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use grokgate_core::models::Tier;

use super::{bearer_token, ApiError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SsoBody {
    sso: String,
}

#[derive(Deserialize)]
pub struct CfClearanceBody {
    cf_clearance: String,
}

fn session_cookie(sso: &str) -> String {
    format!("sso-rw={sso};sso={sso}")
}

/// Pool management is unavailable in custom-session mode — there is no
/// pool to manage.
fn guard(state: &AppState, headers: &HeaderMap, reject_custom: bool) -> Option<Response> {
    if reject_custom && state.config().custom_sso {
        return Some(
            (
                StatusCode::FORBIDDEN,
                Json(json!({"error": "token management is disabled in custom session mode"})),
            )
                .into_response(),
        );
    }
    if bearer_token(headers).as_deref() != Some(state.config().api_key.as_str()) {
        return Some(
            (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response(),
        );
    }
    None
}

pub async fn get_tokens(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(rejection) = guard(&state, &headers, true) {
        return rejection;
    }
    Json(state.pool().status_snapshot()).into_response()
}

pub async fn add_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<SsoBody>>,
) -> Result<Response, ApiError> {
    if let Some(rejection) = guard(&state, &headers, true) {
        return Ok(rejection);
    }
    let Some(Json(body)) = body else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "sso value is required"})),
        )
            .into_response());
    };
    state.pool().enroll(&session_cookie(&body.sso), Tier::Normal, false)?;
    let snapshot = state.pool().status_snapshot();
    Ok(Json(snapshot.get(&body.sso).cloned().unwrap_or_default()).into_response())
}

pub async fn delete_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<SsoBody>>,
) -> Result<Response, ApiError> {
    if let Some(rejection) = guard(&state, &headers, true) {
        return Ok(rejection);
    }
    let Some(Json(body)) = body else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "sso value is required"})),
        )
            .into_response());
    };
    state.pool().remove(&session_cookie(&body.sso)).await?;
    Ok(Json(json!({"message": "session token removed"})).into_response())
}

pub async fn set_cf_clearance(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CfClearanceBody>>,
) -> Response {
    if let Some(rejection) = guard(&state, &headers, false) {
        return rejection;
    }
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "cf_clearance value is required"})),
        )
            .into_response();
    };
    state.client().set_cf_clearance(Some(body.cf_clearance)).await;
    Json(json!({"message": "cf_clearance updated"})).into_response()
}
