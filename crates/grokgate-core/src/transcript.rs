//! Builds the upstream chat payload from an OpenAI message list.
//!
//! The upstream API takes a single prompt string per call, so the whole
//! conversation is flattened into `ROLE: text` lines. Oversized
//! transcripts are shipped as a text-file attachment instead.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::info;

use crate::models;
use crate::protocol::ChatRequest;
use crate::{AppError, AppResult};

/// Transcript length at which the conversation is uploaded as a file.
pub const TRANSCRIPT_FILE_THRESHOLD: usize = 40_000;
/// Upstream accepts at most four file attachments per message.
pub const MAX_ATTACHMENTS: usize = 4;

const IMAGE_PLACEHOLDER: &str = "[image]";
const FILE_INSTRUCTION: &str = "Reply based on the attached text file:";

/// Upload collaborator, bound to a credential by the caller. Text upload
/// failure aborts the request; image upload failure skips the attachment.
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    async fn upload_text(&self, content: &str) -> AppResult<String>;
    async fn upload_image(&self, data_url: &str) -> Option<String>;
}

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());
static INLINE_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[image\]\(data:.*?base64,.*?\)").unwrap());

/// Drops thinking markers from earlier assistant turns and replaces inline
/// base64 images, which upstream would reject by sheer size.
fn strip_markers(text: &str) -> String {
    let text = THINK_RE.replace_all(text, "");
    INLINE_IMAGE_RE.replace_all(text.trim(), IMAGE_PLACEHOLDER).into_owned()
}

fn part_to_text(part: &Value) -> Option<String> {
    match part.get("type").and_then(Value::as_str) {
        Some("image_url") => Some(IMAGE_PLACEHOLDER.to_string()),
        Some("text") => part.get("text").and_then(Value::as_str).map(strip_markers),
        _ => None,
    }
}

/// Normalizes string, part-list, or single-part content to plain text.
fn normalize_content(content: &Value) -> String {
    match content {
        Value::String(text) => strip_markers(text),
        Value::Array(parts) => {
            let texts: Vec<String> = parts.iter().filter_map(part_to_text).collect();
            texts.join("\n")
        }
        Value::Object(_) => part_to_text(content).unwrap_or_default(),
        _ => String::new(),
    }
}

fn part_url(part: &Value) -> Option<&str> {
    if part.get("type").and_then(Value::as_str) == Some("image_url") {
        part.get("image_url").and_then(|u| u.get("url")).and_then(Value::as_str)
    } else {
        None
    }
}

fn image_parts(content: &Value) -> Vec<&str> {
    match content {
        Value::Array(parts) => parts.iter().filter_map(part_url).collect(),
        Value::Object(_) => part_url(content).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// One rendered transcript line; consecutive same-role messages merge into
/// the line rather than opening a new one.
struct Line {
    role: &'static str,
    content: String,
}

fn render(lines: &[Line]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line.role);
        out.push_str(": ");
        out.push_str(&line.content);
        out.push('\n');
    }
    out
}

/// Builds the upstream conversation payload, uploading attachments through
/// `uploader` as needed.
pub async fn build_chat_payload(
    request: &ChatRequest,
    uploader: &dyn AttachmentUploader,
    temporary: bool,
) -> AppResult<Value> {
    let model = request.model.as_str();

    let mut messages: Vec<_> = request.messages.iter().collect();
    if models::single_turn(model) {
        let Some(last) = messages.last() else {
            return Err(AppError::InvalidRequest("message list is empty".into()));
        };
        if last.role != "user" {
            return Err(AppError::InvalidRequest(
                "this model requires the last message to be a user message".into(),
            ));
        }
        messages = vec![messages[messages.len() - 1]];
    }

    let mut attachments: Vec<String> = Vec::new();
    let mut lines: Vec<Line> = Vec::new();
    let mut overflowed = false;
    let mut overflow_tail = String::new();

    let last_index = messages.len().saturating_sub(1);
    for (index, message) in messages.iter().enumerate() {
        let is_last = index == last_index;
        let role = if message.role == "assistant" { "ASSISTANT" } else { "USER" };

        if is_last {
            for url in image_parts(&message.content) {
                if let Some(file_id) = uploader.upload_image(url).await {
                    attachments.push(file_id);
                }
            }
        }

        let text = normalize_content(&message.content);

        if is_last && overflowed {
            let shown = if text.is_empty() { IMAGE_PLACEHOLDER } else { &text };
            overflow_tail = format!("{role}: {shown}");
            continue;
        }

        if !text.is_empty() || (is_last && !attachments.is_empty()) {
            match lines.last_mut() {
                Some(last_line) if last_line.role == role && !text.is_empty() => {
                    last_line.content.push('\n');
                    last_line.content.push_str(&text);
                }
                _ => {
                    let content =
                        if text.is_empty() { IMAGE_PLACEHOLDER.to_string() } else { text };
                    lines.push(Line { role, content });
                }
            }
        }

        if render(&lines).len() >= TRANSCRIPT_FILE_THRESHOLD {
            overflowed = true;
        }
    }

    let mut message = if overflowed {
        let transcript = render(&lines);
        info!(len = transcript.len(), "transcript over threshold, uploading as file");
        let file_id = uploader.upload_text(&transcript).await?;
        attachments.insert(0, file_id);
        overflow_tail.trim().to_string()
    } else {
        render(&lines).trim().to_string()
    };

    if message.is_empty() {
        if overflowed {
            message = FILE_INSTRUCTION.to_string();
        } else {
            return Err(AppError::InvalidRequest("message content is empty".into()));
        }
    }

    attachments.truncate(MAX_ATTACHMENTS);
    let search = models::search_enabled(model);

    Ok(json!({
        "temporary": temporary,
        "modelName": models::upstream_name(model),
        "message": message,
        "fileAttachments": attachments,
        "imageAttachments": [],
        "disableSearch": false,
        "enableImageGeneration": true,
        "returnImageBytes": false,
        "returnRawGrokInXaiRequest": false,
        "enableImageStreaming": false,
        "imageGenerationCount": 1,
        "forceConcise": false,
        "toolOverrides": {
            "imageGen": models::is_image_gen(model),
            "webSearch": search,
            "xSearch": search,
            "xMediaSearch": search,
            "trendsSearch": search,
            "xPostAnalyze": search,
        },
        "enableSideBySide": true,
        "sendFinalMetadata": true,
        "customPersonality": "",
        "deepsearchPreset": models::deepsearch_preset(model).unwrap_or(""),
        "isReasoning": models::reasoning_enabled(model),
        "disableTextFollowUps": true,
    }))
}
