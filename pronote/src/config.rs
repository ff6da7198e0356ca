use serde::Deserialize;
use std::time::Duration;

/// User-Agent the mobile application sends
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:73.0) Gecko/20100101 Firefox/73.0  PRONOTE Mobile APP";

/// Client tuning knobs. Every field has a protocol-compatible default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Redirect hops followed before giving up.
    pub max_redirects: usize,
    /// Login page fetches before the bootstrap is declared failed.
    pub page_attempts: usize,
    /// Idle time after which the keep-alive sends a navigation call.
    pub keepalive_idle_secs: u64,
    pub keepalive_poll_millis: u64,
    /// Per-request timeout applied by the HTTP transport.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 10,
            page_attempts: 3,
            keepalive_idle_secs: 110,
            keepalive_poll_millis: 1000,
            request_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `PRONOTE_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(user_agent) = std::env::var("PRONOTE_USER_AGENT") {
            if !user_agent.is_empty() {
                config.user_agent = user_agent;
            }
        }
        if let Some(v) = env_parse("PRONOTE_MAX_REDIRECTS") {
            config.max_redirects = v;
        }
        if let Some(v) = env_parse("PRONOTE_PAGE_ATTEMPTS") {
            config.page_attempts = v;
        }
        if let Some(v) = env_parse("PRONOTE_KEEPALIVE_IDLE_SECS") {
            config.keepalive_idle_secs = v;
        }
        if let Some(v) = env_parse("PRONOTE_TIMEOUT_SECS") {
            config.request_timeout_secs = Some(v);
        }

        tracing::debug!(
            "Client config: max_redirects={} page_attempts={} keepalive_idle={}s",
            config.max_redirects,
            config.page_attempts,
            config.keepalive_idle_secs
        );
        config
    }

    pub fn keepalive_idle(&self) -> Duration {
        Duration::from_secs(self.keepalive_idle_secs)
    }

    pub fn keepalive_poll(&self) -> Duration {
        Duration::from_millis(self.keepalive_poll_millis.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
