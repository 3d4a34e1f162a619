//! Per-request failover loop: pick a credential, call upstream, retire
//! and retry on rejection until the pool runs dry.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::models::{self, Tier};
use crate::pool::CredentialPool;
use crate::protocol::{self, ChatRequest};
use crate::stream::{collect_completion, sse_stream, TranslatorOptions};
use crate::transcript;
use crate::upstream::{AssetRenderer, CredentialUploader, UpstreamClient};
use crate::{AppError, AppResult};

/// Outcome of one chat request.
pub enum DispatchReply {
    /// Complete `chat.completion` body.
    Completion(Value),
    /// SSE frames, already serialized.
    Stream(Pin<Box<dyn Stream<Item = String> + Send>>),
}

impl std::fmt::Debug for DispatchReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchReply::Completion(body) => f.debug_tuple("Completion").field(body).finish(),
            DispatchReply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

pub struct Dispatcher {
    pool: Arc<CredentialPool>,
    client: Arc<UpstreamClient>,
    config: Arc<AppConfig>,
}

impl Dispatcher {
    pub fn new(pool: Arc<CredentialPool>, client: Arc<UpstreamClient>, config: Arc<AppConfig>) -> Self {
        Self { pool, client, config }
    }

    /// Executes one validated chat request end to end.
    ///
    /// With `custom_session`, the caller's own session replaces the pool
    /// and upstream failures propagate immediately; there is nothing to
    /// fail over to.
    pub async fn handle(
        &self,
        request: ChatRequest,
        custom_session: Option<String>,
    ) -> AppResult<DispatchReply> {
        let model = request.model.clone();
        if models::quota_family(&model).is_none() {
            return Err(AppError::InvalidRequest(format!("unsupported model: {model}")));
        }
        if models::is_image_gen(&model) && request.stream && !self.config.has_image_host() {
            return Err(AppError::InvalidRequest(
                "streaming image generation requires a PicGo or Tumy hosting key".into(),
            ));
        }
        let custom = custom_session.is_some();
        if let Some(session) = custom_session {
            let token = format!("sso-rw={session};sso={session}");
            self.pool.replace(&token, Tier::Super).await?;
        }

        // The payload is built once; attachment uploads ride on a peeked
        // credential so they do not consume quota.
        let upload_token = self
            .pool
            .next(&model, true)
            .await
            .ok_or_else(|| AppError::PoolExhausted { model: model.clone() })?;
        let uploader = CredentialUploader {
            client: self.client.clone(),
            cookie: self.client.cookie_for(&upload_token).await,
        };
        let payload =
            transcript::build_chat_payload(&request, &uploader, self.config.temp_conversation)
                .await?;

        let opts = TranslatorOptions {
            show_thinking: self.config.show_thinking,
            show_search_results: self.config.show_search_results,
        };
        let family = models::response_family(&model);

        loop {
            let Some(token) = self.pool.next(&model, false).await else { break };
            let cookie = self.client.cookie_for(&token).await;
            match self.client.start_chat(&payload, &cookie).await {
                Ok(response) => {
                    info!(model, "upstream accepted the request");
                    let renderer =
                        Arc::new(AssetRenderer { client: self.client.clone(), cookie });
                    if request.stream {
                        let frames = sse_stream(
                            response.bytes_stream(),
                            model.clone(),
                            family,
                            opts,
                            renderer,
                        );
                        return Ok(DispatchReply::Stream(Box::pin(frames)));
                    }
                    let content =
                        collect_completion(response.bytes_stream(), family, opts, renderer.as_ref())
                            .await?;
                    return Ok(DispatchReply::Completion(protocol::completion_message(
                        &content, &model,
                    )));
                }
                Err(err) => {
                    if custom {
                        return Err(err);
                    }
                    warn!(model, %err, "credential rejected by upstream, failing over");
                    self.pool.retire(&model, &token, &err.to_string()).await;
                }
            }
        }
        Err(AppError::PoolExhausted { model })
    }
}
