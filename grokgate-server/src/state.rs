//! Shared application state: the credential pool, upstream client, and
//! dispatcher behind one cheaply-clonable handle.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use grokgate_core::config::AppConfig;
use grokgate_core::dispatch::Dispatcher;
use grokgate_core::models::Tier;
use grokgate_core::pool::CredentialPool;
use grokgate_core::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Arc<AppConfig>,
    pool: Arc<CredentialPool>,
    client: Arc<UpstreamClient>,
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let config = Arc::new(config);
        let pool = Arc::new(CredentialPool::new(config.token_status_path()));
        let client = Arc::new(UpstreamClient::new(&config)?);
        let dispatcher =
            Arc::new(Dispatcher::new(pool.clone(), client.clone(), config.clone()));
        Ok(Self { inner: Arc::new(AppStateInner { config, pool, client, dispatcher }) })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> Arc<CredentialPool> {
        self.inner.pool.clone()
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.inner.client
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Enrolls the session tokens named by the `SSO` and `SSO_SUPER`
    /// environment lists, persisting the status file once at the end.
    pub fn bootstrap_tokens(&self) {
        let mut normal = 0usize;
        let mut elevated = 0usize;
        for (var, tier) in [("SSO_SUPER", Tier::Super), ("SSO", Tier::Normal)] {
            let Ok(list) = std::env::var(var) else { continue };
            for value in list.split(',').map(str::trim).filter(|v| !v.is_empty()) {
                let token = format!("sso-rw={value};sso={value}");
                match self.inner.pool.enroll(&token, tier, true) {
                    Ok(()) => match tier {
                        Tier::Super => elevated += 1,
                        Tier::Normal => normal += 1,
                    },
                    Err(err) => tracing::warn!(%err, var, "skipping malformed bootstrap token"),
                }
            }
        }
        self.inner.pool.save();
        info!(normal, elevated, "bootstrap token enrollment complete");
    }
}
