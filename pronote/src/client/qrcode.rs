use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::client::crypto::{aes_decrypt, derive_key};
use crate::error::{PronoteError, Result};

const MOBILE_QUERY: &str = "fd=1&bydlg=A6ABB224-12DD-4E31-AD3E-8A39A1C2C335&login=true";

/// Content of the QR code shown by the web interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCodePayload {
    /// Hex, encrypted with the PIN chosen when the code was generated
    pub login: String,
    /// Hex, same encryption
    pub jeton: String,
    pub url: String,
}

/// Username and one-time token recovered from a QR code
#[derive(Debug, Clone)]
pub struct QrLogin {
    pub username: String,
    pub token: String,
    pub url: String,
}

impl QrCodePayload {
    /// Decrypt both fields with `derive_key(pin)` and the zero IV.
    ///
    /// A wrong PIN surfaces as a crypto error.
    pub fn decode(&self, pin: &str) -> Result<QrLogin> {
        let key = derive_key(pin.as_bytes());
        let iv = [0u8; 16];
        let open = |field: &str| -> Result<String> {
            let raw = hex::decode(field).map_err(|_| PronoteError::crypto("QR code field is not hex"))?;
            let decrypted = aes_decrypt(&key, &iv, &raw)?;
            String::from_utf8(decrypted).map_err(|_| PronoteError::crypto("QR code field is not valid utf-8"))
        };
        Ok(QrLogin {
            username: open(&self.login)?,
            token: open(&self.jeton)?,
            url: mobile_url(&self.url)?,
        })
    }
}

/// Point a page URL at its `mobile.` variant with the login query
pub fn mobile_url(url: &str) -> Result<String> {
    let mut parsed =
        Url::parse(url).map_err(|e| PronoteError::api(format!("invalid QR code url {url}: {e}")))?;
    let path = parsed.path().to_string();
    let (dir, page) = path.rsplit_once('/').unwrap_or(("", path.as_str()));
    if !page.starts_with("mobile.") {
        parsed.set_path(&format!("{dir}/mobile.{page}"));
    }
    parsed.set_query(Some(MOBILE_QUERY));
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}

/// Swap a trailing `/<name>.html` or `/mobile.<name>.html` for `/mobile.<name>.html`
pub fn mobile_page_url(url: &str) -> String {
    let Some((dir, page)) = url.rsplit_once('/') else {
        return url.to_string();
    };
    let Some(stem) = page.strip_suffix(".html") else {
        return url.to_string();
    };
    let stem = stem.strip_prefix("mobile.").unwrap_or(stem);
    if stem.is_empty() || !stem.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return url.to_string();
    }
    format!("{dir}/mobile.{stem}.html")
}
