//! OpenAI-compatible wire types and response builders.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Inbound chat-completion request. `content` is kept as raw JSON because
/// OpenAI allows both a plain string and a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

fn response_header() -> (String, i64) {
    (format!("chatcmpl-{}", Uuid::new_v4()), Utc::now().timestamp())
}

/// Non-streaming `chat.completion` object with a single choice.
pub fn completion_message(content: &str, model: &str) -> Value {
    let (id, created) = response_header();
    json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content,
            },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0,
        },
    })
}

/// Streaming `chat.completion.chunk` carrying one content delta.
pub fn completion_chunk(delta: &str, model: &str) -> Value {
    let (id, created) = response_header();
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": {
                "content": delta,
            },
        }],
    })
}

/// `/v1/models` catalog body.
pub fn models_list() -> Value {
    let created = Utc::now().timestamp();
    let data: Vec<Value> = crate::models::ADVERTISED
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "grok",
            })
        })
        .collect();
    json!({ "object": "list", "data": data })
}

/// One SSE frame: `data: <json>\n\n`.
pub fn sse_data(value: &Value) -> String {
    format!("data: {value}\n\n")
}

/// Stream terminator frame.
pub const SSE_DONE: &str = "data: [DONE]\n\n";
