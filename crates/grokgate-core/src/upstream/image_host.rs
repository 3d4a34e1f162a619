//! Image re-hosting: generated images are pushed to PicGo or Tumy so the
//! response can reference a stable URL. Without a hosting key the image
//! is inlined as a base64 data URL.
//!
//! Hosting failures surface as response text, not errors; by that point
//! the upstream call has already succeeded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{info, warn};

const PICGO_UPLOAD_URL: &str = "https://www.picgo.net/api/1/upload";
const TUMY_UPLOAD_URL: &str = "https://tu.my/api/v1/upload";

const PICGO_FAILURE: &str =
    "Image generation failed; check that the PicGo hosting key is set correctly";
const TUMY_FAILURE: &str =
    "Image generation failed; check that the Tumy hosting key is set correctly";

pub async fn host_image(
    http: &reqwest::Client,
    picgo_key: Option<&str>,
    tumy_key: Option<&str>,
    bytes: Bytes,
    content_type: &str,
) -> String {
    if let Some(key) = picgo_key {
        upload_picgo(http, PICGO_UPLOAD_URL, key, bytes).await
    } else if let Some(key) = tumy_key {
        upload_tumy(http, TUMY_UPLOAD_URL, key, bytes).await
    } else {
        format!("![image](data:{content_type};base64,{})", BASE64.encode(&bytes))
    }
}

fn jpeg_part(bytes: Bytes) -> Part {
    let part = Part::bytes(bytes.to_vec()).file_name("image.jpg");
    match part.mime_str("image/jpeg") {
        Ok(part) => part,
        Err(_) => Part::bytes(Vec::new()),
    }
}

async fn upload_picgo(http: &reqwest::Client, url: &str, key: &str, bytes: Bytes) -> String {
    let form = Form::new().part("source", jpeg_part(bytes));
    let response = http.post(url).header("X-API-Key", key).multipart(form).send().await;
    let url = match response {
        Ok(response) if response.status().is_success() => response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("image")
                    .and_then(|i| i.get("url"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
        Ok(response) => {
            warn!(status = %response.status(), "picgo upload rejected");
            None
        }
        Err(err) => {
            warn!(%err, "picgo upload failed");
            None
        }
    };
    match url {
        Some(url) => {
            info!("image hosted via picgo");
            format!("![image]({url})")
        }
        None => PICGO_FAILURE.to_string(),
    }
}

async fn upload_tumy(http: &reqwest::Client, url: &str, key: &str, bytes: Bytes) -> String {
    let form = Form::new().part("file", jpeg_part(bytes));
    let response = http
        .post(url)
        .header("Accept", "application/json")
        .bearer_auth(key)
        .multipart(form)
        .send()
        .await;
    let url = match response {
        Ok(response) if response.status().is_success() => response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("data")
                    .and_then(|d| d.get("links"))
                    .and_then(|l| l.get("url"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
        Ok(response) => {
            warn!(status = %response.status(), "tumy upload rejected");
            None
        }
        Err(err) => {
            warn!(%err, "tumy upload failed");
            None
        }
    };
    match url {
        Some(url) => {
            info!("image hosted via tumy");
            format!("![image]({url})")
        }
        None => TUMY_FAILURE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn no_key_inlines_a_data_url() {
        let http = reqwest::Client::new();
        let markdown =
            host_image(&http, None, None, Bytes::from_static(b"img"), "image/png").await;
        assert_eq!(markdown, format!("![image](data:image/png;base64,{})", BASE64.encode("img")));
    }

    #[tokio::test]
    async fn picgo_success_returns_hosted_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-API-Key", "pk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "image": {"url": "https://img.example/a.jpg"}
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let markdown = upload_picgo(&http, &server.uri(), "pk", Bytes::from_static(b"img")).await;
        assert_eq!(markdown, "![image](https://img.example/a.jpg)");
    }

    #[tokio::test]
    async fn picgo_failure_returns_readable_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let markdown = upload_picgo(&http, &server.uri(), "pk", Bytes::from_static(b"img")).await;
        assert_eq!(markdown, PICGO_FAILURE);
    }

    #[tokio::test]
    async fn tumy_success_returns_hosted_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"links": {"url": "https://tu.example/b.jpg"}}
            })))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let markdown = upload_tumy(&http, &server.uri(), "tk", Bytes::from_static(b"img")).await;
        assert_eq!(markdown, "![image](https://tu.example/b.jpg)");
    }
}
