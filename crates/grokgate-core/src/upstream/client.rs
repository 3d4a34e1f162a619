//! Client for the upstream chat service.
//!
//! Every call authenticates with a session cookie supplied per request;
//! the client itself only holds connection state, browser headers, and
//! the runtime-updatable Cloudflare clearance cookie.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::image_host;
use crate::config::AppConfig;
use crate::stream::ImageRenderer;
use crate::transcript::AttachmentUploader;
use crate::{AppError, AppResult};

const CHAT_PATH: &str = "/rest/app-chat/conversations/new";
const UPLOAD_PATH: &str = "/rest/app-chat/upload-file";
const RPC_PATH: &str = "/api/rpc";

const ASSET_FETCH_ATTEMPTS: u32 = 2;
const RETRY_BASE: Duration = Duration::from_secs(1);

static DATA_URL_MIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"data:([a-zA-Z0-9]+/[a-zA-Z0-9-.+]+);base64,").unwrap());

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Accept", HeaderValue::from_static("*/*"));
    headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert("Content-Type", HeaderValue::from_static("text/plain;charset=UTF-8"));
    headers.insert("Origin", HeaderValue::from_static("https://grok.com"));
    headers.insert("Priority", HeaderValue::from_static("u=1, i"));
    headers.insert(
        "User-Agent",
        HeaderValue::from_static(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
        ),
    );
    headers.insert(
        "Sec-Ch-Ua",
        HeaderValue::from_static(
            "\"Not(A:Brand\";v=\"99\", \"Google Chrome\";v=\"133\", \"Chromium\";v=\"133\"",
        ),
    );
    headers.insert("Sec-Ch-Ua-Mobile", HeaderValue::from_static("?0"));
    headers.insert("Sec-Ch-Ua-Platform", HeaderValue::from_static("\"macOS\""));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("empty"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("cors"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
    headers
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    assets_url: String,
    cf_clearance: RwLock<Option<String>>,
    picgo_key: Option<String>,
    tumy_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let mut builder = reqwest::Client::builder()
            .default_headers(browser_headers())
            .connect_timeout(Duration::from_secs(30));
        if let Some(proxy) = &config.proxy {
            info!(proxy, "routing upstream traffic through proxy");
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url.clone(),
            assets_url: config.assets_url.clone(),
            cf_clearance: RwLock::new(config.cf_clearance.clone()),
            picgo_key: config.picgo_key.clone(),
            tumy_key: config.tumy_key.clone(),
        })
    }

    pub async fn set_cf_clearance(&self, value: Option<String>) {
        *self.cf_clearance.write().await = value;
    }

    /// Full Cookie header value for a credential: the session cookie plus
    /// the Cloudflare clearance when one is set.
    pub async fn cookie_for(&self, token: &str) -> String {
        match self.cf_clearance.read().await.as_deref() {
            Some(clearance) if !clearance.is_empty() => format!("{token};{clearance}"),
            _ => token.to_string(),
        }
    }

    /// Opens a conversation and returns the streaming response. Any
    /// non-200 status is an upstream error the dispatcher handles by
    /// retiring the credential.
    pub async fn start_chat(&self, payload: &Value, cookie: &str) -> AppResult<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}{CHAT_PATH}", self.base_url))
            .header("Cookie", cookie)
            .body(payload.to_string())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!("upstream status {status}")));
        }
        Ok(response)
    }

    /// Uploads an overflowed transcript as `message.txt`, returning the
    /// file id to attach.
    pub async fn upload_text_file(&self, content: &str, cookie: &str) -> AppResult<String> {
        let payload = json!({
            "fileName": "message.txt",
            "fileMimeType": "text/plain",
            "content": BASE64.encode(content),
        });
        let response = self
            .http
            .post(format!("{}{UPLOAD_PATH}", self.base_url))
            .header("Cookie", cookie)
            .body(payload.to_string())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upload(format!("transcript upload failed with status {status}")));
        }
        let body: Value = response.json().await?;
        body.get("fileMetadataId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::Upload("upload response missing fileMetadataId".into()))
    }

    /// Uploads one base64 image attachment. Failures are logged and
    /// skipped rather than failing the whole request.
    pub async fn upload_image(&self, data_url: &str, cookie: &str) -> Option<String> {
        let content = data_url.split_once(',').map_or(data_url, |(_, rest)| rest);
        let mime = DATA_URL_MIME_RE
            .captures(data_url)
            .and_then(|c| c.get(1))
            .map_or("image/jpeg", |m| m.as_str());
        let extension = mime.split_once('/').map_or("jpg", |(_, ext)| ext);
        let payload = json!({
            "rpc": "uploadFile",
            "req": {
                "fileName": format!("image.{extension}"),
                "fileMimeType": mime,
                "content": content,
            }
        });

        let result = self
            .http
            .post(format!("{}{RPC_PATH}", self.base_url))
            .header("Cookie", cookie)
            .body(payload.to_string())
            .send()
            .await;
        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "image upload rejected");
                return None;
            }
            Err(err) => {
                warn!(%err, "image upload failed");
                return None;
            }
        };
        match response.json::<Value>().await {
            Ok(body) => body.get("fileMetadataId").and_then(Value::as_str).map(str::to_string),
            Err(err) => {
                warn!(%err, "image upload returned an unreadable body");
                None
            }
        }
    }

    /// Fetches a generated image from the asset host, with bounded retry
    /// and linear backoff. Returns the bytes and their content type.
    pub async fn fetch_asset(&self, path: &str, cookie: &str) -> AppResult<(Bytes, String)> {
        let url = format!("{}/{}", self.assets_url, path.trim_start_matches('/'));
        let mut last_error = String::new();
        for attempt in 1..=ASSET_FETCH_ATTEMPTS {
            match self.http.get(&url).header("Cookie", cookie).send().await {
                Ok(response) if response.status().is_success() => {
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("image/jpeg")
                        .to_string();
                    return Ok((response.bytes().await?, content_type));
                }
                Ok(response) => {
                    last_error = format!("asset fetch returned status {}", response.status());
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
            if attempt < ASSET_FETCH_ATTEMPTS {
                tokio::time::sleep(RETRY_BASE * attempt).await;
            }
        }
        Err(AppError::Image(last_error))
    }

    /// Pushes image bytes to the configured hosting provider, or inlines
    /// them as a data URL when none is configured.
    pub async fn host_image(&self, bytes: Bytes, content_type: &str) -> String {
        image_host::host_image(
            &self.http,
            self.picgo_key.as_deref(),
            self.tumy_key.as_deref(),
            bytes,
            content_type,
        )
        .await
    }
}

/// Attachment uploader bound to one credential's cookie.
pub struct CredentialUploader {
    pub client: Arc<UpstreamClient>,
    pub cookie: String,
}

#[async_trait]
impl AttachmentUploader for CredentialUploader {
    async fn upload_text(&self, content: &str) -> AppResult<String> {
        self.client.upload_text_file(content, &self.cookie).await
    }

    async fn upload_image(&self, data_url: &str) -> Option<String> {
        self.client.upload_image(data_url, &self.cookie).await
    }
}

/// Image renderer bound to one credential's cookie: fetch from the asset
/// host, then re-host.
pub struct AssetRenderer {
    pub client: Arc<UpstreamClient>,
    pub cookie: String,
}

#[async_trait]
impl ImageRenderer for AssetRenderer {
    async fn render_image(&self, path: &str) -> AppResult<String> {
        let (bytes, content_type) = self.client.fetch_asset(path, &self.cookie).await?;
        Ok(self.client.host_image(bytes, &content_type).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> AppConfig {
        AppConfig {
            api_key: "sk-test".into(),
            custom_sso: false,
            temp_conversation: true,
            show_thinking: false,
            show_search_results: true,
            picgo_key: None,
            tumy_key: None,
            proxy: None,
            cf_clearance: Some("cf_clearance=abc".into()),
            base_url: server.uri(),
            assets_url: server.uri(),
            port: 0,
            data_dir: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn cookie_includes_cf_clearance_when_set() {
        let server = MockServer::start().await;
        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        assert_eq!(client.cookie_for("sso=a").await, "sso=a;cf_clearance=abc");

        client.set_cf_clearance(None).await;
        assert_eq!(client.cookie_for("sso=a").await, "sso=a");
    }

    #[tokio::test]
    async fn start_chat_rejects_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/app-chat/conversations/new"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        let err = client.start_chat(&json!({}), "sso=a").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[tokio::test]
    async fn text_upload_returns_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/app-chat/upload-file"))
            .and(header("Cookie", "sso=a"))
            .and(body_string_contains("message.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"fileMetadataId": "file-1"})),
            )
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        let id = client.upload_text_file("USER: hi", "sso=a").await.unwrap();
        assert_eq!(id, "file-1");
    }

    #[tokio::test]
    async fn image_upload_failure_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/rpc"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        let id = client.upload_image("data:image/png;base64,aaaa", "sso=a").await;
        assert_eq!(id, None);
    }

    #[tokio::test]
    async fn asset_fetch_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/generated/a.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/generated/a.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(b"img".to_vec()),
            )
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        let (bytes, content_type) = client.fetch_asset("generated/a.jpg", "sso=a").await.unwrap();
        assert_eq!(&bytes[..], b"img");
        assert_eq!(content_type, "image/png");
    }

    #[tokio::test]
    async fn asset_fetch_gives_up_after_bounded_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/generated/b.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&config_for(&server)).unwrap();
        let err = client.fetch_asset("generated/b.jpg", "sso=a").await.unwrap_err();
        assert!(matches!(err, AppError::Image(_)));
    }
}
