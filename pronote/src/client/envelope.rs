use miniz_oxide::deflate::compress_to_vec;
use miniz_oxide::inflate::decompress_to_vec;
use serde::Serialize;
use serde_json::Value;

use crate::client::crypto::{AesIv, AesKey, CryptoState};
use crate::client::json;
use crate::error::{PronoteError, Result};

const DEFLATE_LEVEL: u8 = 6;

/// Compression/encryption flags negotiated at bootstrap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Negotiation {
    pub compress: bool,
    pub encrypt: bool,
}

/// Key material swapped in right after one response arrives, before its
/// payload is decoded.
#[derive(Debug, Clone, Default)]
pub struct DecryptionChange {
    pub iv: Option<AesIv>,
    pub key: Option<AesKey>,
}

impl DecryptionChange {
    pub fn iv(iv: AesIv) -> Self {
        Self { iv: Some(iv), key: None }
    }

    fn apply(&self, crypto: &mut CryptoState) {
        if let Some(iv) = self.iv {
            crypto.set_iv(iv);
        }
        if let Some(key) = self.key {
            crypto.set_key(key);
        }
    }
}

/// Per-request descriptor declaring the target tab and, for delegated
/// accounts, the acting subject.
#[derive(Debug, Clone, Serialize)]
pub struct Signature {
    pub onglet: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membre: Option<Value>,
}

/// Outer body of every `appelfonction` call
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope {
    pub session: i64,
    pub no: String,
    pub id: String,
    #[serde(rename = "dataSec")]
    pub data_sec: Value,
}

/// Build the `{Signature?, data?}` payload of a business call
pub fn build_payload(signature: Option<Signature>, data: Option<Value>) -> Result<Value> {
    let mut payload = serde_json::Map::new();
    if let Some(signature) = signature {
        payload.insert("Signature".into(), serde_json::to_value(signature)?);
    }
    if let Some(data) = data {
        payload.insert("data".into(), data);
    }
    Ok(Value::Object(payload))
}

/// Tab id declared by a payload's signature, if any
pub fn declared_tab(payload: &Value) -> Option<i64> {
    json::get(payload, &["Signature", "onglet"]).and_then(json::as_int)
}

/// Outbound pipeline: JSON, then hex + raw deflate, then AES + uppercase hex
pub fn encode_payload(payload: &Value, negotiation: Negotiation, crypto: &CryptoState) -> Result<Value> {
    let mut compressed = None;
    if negotiation.compress {
        let hexed = hex::encode(serde_json::to_string(payload)?);
        compressed = Some(compress_to_vec(hexed.as_bytes(), DEFLATE_LEVEL));
    }

    if negotiation.encrypt {
        let plain = match compressed {
            Some(bytes) => bytes,
            None => serde_json::to_vec(payload)?,
        };
        return Ok(Value::String(hex::encode_upper(crypto.encrypt(&plain))));
    }

    Ok(match compressed {
        Some(bytes) => Value::String(hex::encode_upper(bytes)),
        None => payload.clone(),
    })
}

/// Inbound pipeline. A server error stops decoding before the payload is touched.
///
/// Returns the whole response with `dataSec` replaced by the decoded JSON.
pub fn decode_response(
    body: &[u8],
    negotiation: Negotiation,
    crypto: &mut CryptoState,
    change: Option<&DecryptionChange>,
) -> Result<Value> {
    let mut response: Value = serde_json::from_slice(body)?;

    if let Some(error) = response.get("Erreur") {
        let code = error.get("G").and_then(json::as_int);
        let title = error.get("Titre").and_then(Value::as_str).map(str::to_owned);
        return Err(PronoteError::from_server(code, title));
    }

    if let Some(change) = change {
        tracing::debug!("Applying decryption change");
        change.apply(crypto);
    }

    if negotiation.encrypt || negotiation.compress {
        let raw = json::str_at(&response, &["dataSec"])?;
        let mut bytes = hex::decode(raw)?;
        if negotiation.encrypt {
            bytes = crypto.decrypt(&bytes)?;
        }
        if negotiation.compress {
            bytes = decompress_to_vec(&bytes)
                .map_err(|e| PronoteError::api(format!("failed to inflate payload: {e:?}")))?;
        }
        response["dataSec"] = serde_json::from_slice(&bytes)?;
    }

    Ok(response)
}
