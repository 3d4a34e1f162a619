//! Process configuration, read once from the environment at startup.

use serde::Serialize;
use std::path::{Path, PathBuf};

const DEFAULT_PORT: u16 = 5200;
const TOKEN_STATUS_FILE: &str = "token_status.json";

/// Gateway configuration. Immutable after startup; the only runtime-mutable
/// value (`cf_clearance`) lives on the upstream client.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    /// Bearer key clients must present (unless `custom_sso`).
    pub api_key: String,
    /// One-caller-one-session mode: the bearer value is the session cookie.
    pub custom_sso: bool,
    /// Ask upstream not to persist the conversation.
    pub temp_conversation: bool,
    /// Pass reasoning segments through, wrapped in `<think>` markers.
    pub show_thinking: bool,
    /// Render web-search results as a formatted block.
    pub show_search_results: bool,
    /// PicGo image-hosting API key.
    #[serde(skip_serializing)]
    pub picgo_key: Option<String>,
    /// Tumy image-hosting API key.
    #[serde(skip_serializing)]
    pub tumy_key: Option<String>,
    /// Outbound proxy URL (http or socks5).
    pub proxy: Option<String>,
    /// Initial Cloudflare clearance cookie value.
    #[serde(skip_serializing)]
    pub cf_clearance: Option<String>,
    /// Upstream service origin.
    pub base_url: String,
    /// Upstream asset host (generated images).
    pub assets_url: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("API_KEY").unwrap_or_else(|_| "sk-123456".to_string()),
            custom_sso: env_bool("IS_CUSTOM_SSO", false),
            temp_conversation: env_bool("IS_TEMP_CONVERSATION", true),
            show_thinking: env_bool("SHOW_THINKING", false),
            show_search_results: env_bool("SHOW_SEARCH_RESULTS", true),
            picgo_key: env_opt("PICGO_KEY"),
            tumy_key: env_opt("TUMY_KEY"),
            proxy: env_opt("PROXY"),
            cf_clearance: env_opt("CF_CLEARANCE"),
            base_url: std::env::var("GROKGATE_BASE_URL")
                .unwrap_or_else(|_| "https://grok.com".to_string()),
            assets_url: std::env::var("GROKGATE_ASSETS_URL")
                .unwrap_or_else(|_| "https://assets.grok.com".to_string()),
            port: std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(DEFAULT_PORT),
            data_dir: resolve_data_dir(),
        }
    }

    pub fn token_status_path(&self) -> PathBuf {
        self.data_dir.join(TOKEN_STATUS_FILE)
    }

    /// At least one image-hosting provider is configured.
    pub fn has_image_host(&self) -> bool {
        self.picgo_key.is_some() || self.tumy_key.is_some()
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GROKGATE_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("grokgate"))
        .unwrap_or_else(|| Path::new("./data").to_path_buf())
}
