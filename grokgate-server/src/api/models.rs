//! `/v1/models` — the advertised model catalog.

use axum::response::IntoResponse;
use axum::Json;

use grokgate_core::protocol;

pub async fn list_models() -> impl IntoResponse {
    Json(protocol::models_list())
}
