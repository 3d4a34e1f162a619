use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(api::chat::chat_completions))
        .route("/v1/models", get(api::models::list_models))
        .route("/get/tokens", get(api::tokens::get_tokens))
        .route("/add/token", post(api::tokens::add_token))
        .route("/delete/token", post(api::tokens::delete_token))
        .route("/set/cf_clearance", post(api::tokens::set_cf_clearance))
        .route("/health", get(health_check))
        .fallback(service_banner)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"})))
}

/// Any unmatched path answers with a liveness banner, so probes against
/// the root succeed.
async fn service_banner() -> impl IntoResponse {
    (StatusCode::OK, "grokgate is running")
}
