use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use zeroize::Zeroize;

use crate::error::{PronoteError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    #[default]
    Normal,
    Ent,
    QrCode,
    Token,
}

impl LoginMode {
    /// Modes in which the server may hand back a long-lived token
    pub fn uses_mobile_token(self) -> bool {
        matches!(self, LoginMode::QrCode | LoginMode::Token)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoginMode::Normal => "normal",
            LoginMode::Ent => "ent",
            LoginMode::QrCode => "qr_code",
            LoginMode::Token => "token",
        }
    }
}

impl FromStr for LoginMode {
    type Err = PronoteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "" => Ok(LoginMode::Normal),
            "ent" => Ok(LoginMode::Ent),
            "qr_code" | "qrcode" => Ok(LoginMode::QrCode),
            "token" => Ok(LoginMode::Token),
            other => Err(PronoteError::api(format!("unknown login mode: {other}"))),
        }
    }
}

/// Login material of one client.
///
/// In `qr_code` and `token` modes `password` is replaced by the token the
/// server rotates in after each login.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub mode: LoginMode,
    /// Install UUID announced in mobile-app modes
    pub uuid: String,
    pub account_pin: Option<String>,
    pub device_name: Option<String>,
    pub client_identifier: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            mode: LoginMode::Normal,
            uuid: String::new(),
            account_pin: None,
            device_name: None,
            client_identifier: None,
        }
    }

    pub fn mode(mut self, mode: LoginMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn account_pin(mut self, pin: impl Into<String>) -> Self {
        self.account_pin = Some(pin.into());
        self
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn client_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.client_identifier = Some(identifier.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.password.zeroize();
        self.account_pin.zeroize();
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mode", &self.mode)
            .field("uuid", &self.uuid)
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

/// Everything needed to resume a session with a token login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsExport {
    pub pronote_url: String,
    pub username: String,
    pub password: String,
    pub client_identifier: Option<String>,
    pub uuid: String,
}

impl CredentialsExport {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        tracing::info!("💾 Credentials exported to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Token-mode credentials for the exported account
    pub fn to_credentials(&self) -> Credentials {
        let mut credentials = Credentials::new(self.username.clone(), self.password.clone())
            .mode(LoginMode::Token)
            .uuid(self.uuid.clone());
        credentials.client_identifier = self.client_identifier.clone();
        credentials
    }
}
