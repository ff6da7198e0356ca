use thiserror::Error;

pub type Result<T> = std::result::Result<T, PronoteError>;

/// Errors raised by the session transport and the login handshake.
///
/// Only [`PronoteError::is_recoverable`] errors are retried, and only by the
/// client's recovery path. Lower layers never retry on their own.
#[derive(Error, Debug)]
pub enum PronoteError {
    /// Base protocol error: bad HTTP status, unknown server error code,
    /// unusable login page.
    #[error("{message}")]
    Api {
        message: String,
        code: Option<i64>,
        title: Option<String>,
    },

    /// Server error 10.
    #[error("[ERROR 10] session has expired and could not be reinitialised ({title})")]
    SessionUnrecoverable { title: String },

    /// Server error 25.
    #[error("[ERROR 25] exceeded max authorization requests, wait before retrying ({title})")]
    RateLimited { title: String },

    /// Server error 22: the referenced object belongs to a previous session.
    #[error("[ERROR 22] the object was from a previous session ({title})")]
    ExpiredObject { title: String },

    /// Decryption or padding failure. Almost always wrong credentials or an
    /// expired one-time token.
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("two-factor authentication error: {0}")]
    Mfa(String),

    #[error("unexpected response shape at '{}': {message}", .path.join("."))]
    Parsing { message: String, path: Vec<String> },

    #[error("ENT login failed: {0}")]
    EntLogin(String),

    #[error("action not permitted: tab {tab} is not normally accessible")]
    PermissionDenied { tab: i64 },

    #[error("your IP address is suspended")]
    IpSuspended,

    #[error("too many redirects (limit {limit})")]
    TooManyRedirects { limit: usize },

    #[error("client is not logged in")]
    NotLoggedIn,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PronoteError {
    pub fn api(message: impl Into<String>) -> Self {
        PronoteError::Api {
            message: message.into(),
            code: None,
            title: None,
        }
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        PronoteError::Crypto(message.into())
    }

    pub fn parsing(message: impl Into<String>, path: &[&str]) -> Self {
        PronoteError::Parsing {
            message: message.into(),
            path: path.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Map an `Erreur` descriptor returned by the server.
    pub fn from_server(code: Option<i64>, title: Option<String>) -> Self {
        let text = title.clone().unwrap_or_default();
        match code {
            Some(22) => PronoteError::ExpiredObject { title: text },
            Some(10) => PronoteError::SessionUnrecoverable { title: text },
            Some(25) => PronoteError::RateLimited { title: text },
            _ => PronoteError::Api {
                message: format!(
                    "unknown error from pronote: {} | {}",
                    code.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
                    text
                ),
                code,
                title,
            },
        }
    }

    /// Numeric server error code, when the error came from an `Erreur` field.
    pub fn code(&self) -> Option<i64> {
        match self {
            PronoteError::Api { code, .. } => *code,
            PronoteError::SessionUnrecoverable { .. } => Some(10),
            PronoteError::RateLimited { .. } => Some(25),
            PronoteError::ExpiredObject { .. } => Some(22),
            _ => None,
        }
    }

    /// Whether the recovery path may bootstrap a fresh session and replay.
    ///
    /// Expired objects must reach the caller so stale handles get re-acquired.
    /// Permission and login-state errors are raised before any I/O and would
    /// fail identically after a refresh.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PronoteError::ExpiredObject { .. }
                | PronoteError::PermissionDenied { .. }
                | PronoteError::NotLoggedIn
        )
    }

    /// Log the error at a level matching its class
    pub fn log_event(&self) {
        match self {
            PronoteError::Crypto(_) => {
                tracing::warn!("Decryption failed - probably bad credentials or an expired token: {}", self);
            }
            PronoteError::IpSuspended => {
                tracing::error!("⚠️  Server reports this IP address as suspended");
            }
            PronoteError::RateLimited { .. } => {
                tracing::warn!("Rate limited by server: {}", self);
            }
            PronoteError::ExpiredObject { .. } => {
                tracing::debug!("Stale object reference: {}", self);
            }
            PronoteError::PermissionDenied { tab } => {
                tracing::warn!("Rejected call on tab {} outside permission scope", tab);
            }
            _ => {
                tracing::debug!("Protocol error: {}", self);
            }
        }
    }
}
