//! Drives an upstream response body through the translator, producing
//! either a collected completion or an SSE chunk stream.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{pin_mut, Stream, StreamExt};
use serde_json::Value;
use tracing::{error, warn};

use super::translator::{translate, ResponseContext, TranslatorOptions};
use crate::models::ResponseFamily;
use crate::protocol;
use crate::{AppError, AppResult};

/// Turns a generated-image asset path into user-facing markdown, fetching
/// the asset and re-hosting or inlining it.
#[async_trait]
pub trait ImageRenderer: Send + Sync {
    async fn render_image(&self, path: &str) -> AppResult<String>;
}

/// Splits complete newline-terminated lines out of the buffer, leaving any
/// partial trailing line for the next chunk.
fn drain_lines(buffer: &mut BytesMut) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line = buffer.split_to(pos + 1);
        if let Ok(text) = std::str::from_utf8(&line) {
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
    }
    lines
}

enum LineOutcome {
    Skip,
    Token(String),
    Image(String),
}

fn handle_line(
    line: &str,
    ctx: &mut ResponseContext,
    family: ResponseFamily,
    opts: TranslatorOptions,
) -> AppResult<LineOutcome> {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Ok(LineOutcome::Skip);
    };
    if let Some(err) = value.get("error") {
        error!(%err, "upstream embedded an error event in the stream");
        return Err(AppError::RateLimited);
    }
    let Some(event) = value.get("result").and_then(|r| r.get("response")) else {
        return Ok(LineOutcome::Skip);
    };
    let step = translate(ctx, family, event, opts);
    if let Some(path) = step.image_url {
        return Ok(LineOutcome::Image(path));
    }
    match step.token {
        Some(token) if !token.is_empty() => Ok(LineOutcome::Token(token)),
        _ => Ok(LineOutcome::Skip),
    }
}

/// Consumes the whole upstream body into one completion string. An image
/// generation short-circuits to the rendered artifact markdown.
pub async fn collect_completion<S, E>(
    body: S,
    family: ResponseFamily,
    opts: TranslatorOptions,
    renderer: &dyn ImageRenderer,
) -> AppResult<String>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<AppError>,
{
    pin_mut!(body);
    let mut ctx = ResponseContext::new();
    let mut buffer = BytesMut::new();
    let mut collected = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(Into::into)?;
        buffer.extend_from_slice(&chunk);
        for line in drain_lines(&mut buffer) {
            match handle_line(&line, &mut ctx, family, opts)? {
                LineOutcome::Skip => {}
                LineOutcome::Token(token) => collected.push_str(&token),
                LineOutcome::Image(path) => {
                    ctx.mark_image_emitted();
                    return renderer.render_image(&path).await;
                }
            }
        }
    }
    Ok(collected)
}

/// Converts the upstream body into OpenAI SSE frames. A mid-stream error
/// event yields a single error chunk and ends the stream without `[DONE]`.
pub fn sse_stream<S, E>(
    body: S,
    model: String,
    family: ResponseFamily,
    opts: TranslatorOptions,
    renderer: Arc<dyn ImageRenderer>,
) -> impl Stream<Item = String>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<AppError> + Send,
{
    async_stream::stream! {
        pin_mut!(body);
        let mut ctx = ResponseContext::new();
        let mut buffer = BytesMut::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let err: AppError = err.into();
                    warn!(%err, "upstream body failed mid-stream");
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);
            for line in drain_lines(&mut buffer) {
                match handle_line(&line, &mut ctx, family, opts) {
                    Err(err) => {
                        yield protocol::sse_data(&err.to_body());
                        return;
                    }
                    Ok(LineOutcome::Skip) => {}
                    Ok(LineOutcome::Token(token)) => {
                        yield protocol::sse_data(&protocol::completion_chunk(&token, &model));
                    }
                    Ok(LineOutcome::Image(path)) => {
                        ctx.mark_image_emitted();
                        match renderer.render_image(&path).await {
                            Ok(markdown) => {
                                yield protocol::sse_data(&protocol::completion_chunk(&markdown, &model));
                            }
                            Err(err) => {
                                warn!(%err, "failed to render generated image");
                                yield protocol::sse_data(&err.to_body());
                                return;
                            }
                        }
                    }
                }
            }
        }
        yield protocol::SSE_DONE.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OPTS: TranslatorOptions =
        TranslatorOptions { show_thinking: false, show_search_results: true };

    struct FakeRenderer;

    #[async_trait]
    impl ImageRenderer for FakeRenderer {
        async fn render_image(&self, path: &str) -> AppResult<String> {
            Ok(format!("![image](https://img.example/{path})"))
        }
    }

    fn body_from(chunks: Vec<&str>) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        let owned: Vec<Result<Bytes, std::io::Error>> =
            chunks.into_iter().map(|c| Ok(Bytes::copy_from_slice(c.as_bytes()))).collect();
        futures::stream::iter(owned)
    }

    fn token_line(token: &str) -> String {
        json!({"result": {"response": {"token": token}}}).to_string() + "\n"
    }

    #[tokio::test]
    async fn collects_tokens_across_chunk_boundaries() {
        let line = token_line("hello ");
        let (head, tail) = line.split_at(10);
        let second = token_line("world");
        let body = body_from(vec![head, tail, second.as_str()]);

        let content =
            collect_completion(body, ResponseFamily::Plain, OPTS, &FakeRenderer).await.unwrap();
        assert_eq!(content, "hello world");
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let lines = format!("not json\n{}\n\n{}", token_line("a"), token_line("b"));
        let body = body_from(vec![lines.as_str()]);
        let content =
            collect_completion(body, ResponseFamily::Plain, OPTS, &FakeRenderer).await.unwrap();
        assert_eq!(content, "ab");
    }

    #[tokio::test]
    async fn embedded_error_fails_the_collection() {
        let lines = format!("{}{}\n", token_line("partial"), json!({"error": {"code": 429}}));
        let body = body_from(vec![lines.as_str()]);
        let err = collect_completion(body, ResponseFamily::Plain, OPTS, &FakeRenderer)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited));
    }

    #[tokio::test]
    async fn image_generation_short_circuits_to_markdown() {
        let lines = format!(
            "{}\n{}\n",
            json!({"result": {"response": {"doImgGen": true, "token": "Generating image"}}}),
            json!({"result": {"response": {
                "cachedImageGenerationResponse": {"imageUrl": "generated/a.jpg"}
            }}}),
        );
        let body = body_from(vec![lines.as_str()]);
        let content =
            collect_completion(body, ResponseFamily::ImageGen, OPTS, &FakeRenderer).await.unwrap();
        assert_eq!(content, "![image](https://img.example/generated/a.jpg)");
    }

    #[tokio::test]
    async fn stream_yields_chunks_then_done() {
        let lines = format!("{}{}", token_line("a"), token_line("b"));
        let frames: Vec<String> = sse_stream(
            body_from(vec![lines.as_str()]),
            "grok-3".to_string(),
            ResponseFamily::Plain,
            OPTS,
            Arc::new(FakeRenderer),
        )
        .collect()
        .await;

        assert_eq!(frames.len(), 3);
        assert!(frames[0].starts_with("data: "));
        let first: Value = serde_json::from_str(frames[0].trim_start_matches("data: ")).unwrap();
        assert_eq!(first["choices"][0]["delta"]["content"], "a");
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(frames[2], protocol::SSE_DONE);
    }

    #[tokio::test]
    async fn stream_error_event_emits_one_chunk_and_stops() {
        let lines = format!("{}\n{}", json!({"error": "quota"}), token_line("never"));
        let frames: Vec<String> = sse_stream(
            body_from(vec![lines.as_str()]),
            "grok-3".to_string(),
            ResponseFamily::Plain,
            OPTS,
            Arc::new(FakeRenderer),
        )
        .collect()
        .await;

        assert_eq!(frames.len(), 1);
        let body: Value = serde_json::from_str(frames[0].trim_start_matches("data: ")).unwrap();
        assert_eq!(body["error"]["type"], "rate_limit_error");
    }

    #[tokio::test]
    async fn empty_body_yields_only_done() {
        let frames: Vec<String> = sse_stream(
            body_from(vec![]),
            "grok-3".to_string(),
            ResponseFamily::Plain,
            OPTS,
            Arc::new(FakeRenderer),
        )
        .collect()
        .await;
        assert_eq!(frames, vec![protocol::SSE_DONE.to_string()]);
    }
}
