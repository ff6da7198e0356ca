//! Challenge-response login.
//!
//! `Init → Identified → Challenged → Authenticated → (TwoFactor) → LoggedIn`,
//! with `LoginFailed` when the server withholds the session key material.
//! Every step talks to the session directly: a login never goes through the
//! recovery path.

use chrono::NaiveDateTime;
use serde_json::{json, Value};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::client::credentials::{Credentials, LoginMode};
use crate::client::crypto::{aes_decrypt, aes_encrypt, derive_key, sha256_hex_upper, AesIv, AesKey};
use crate::client::json;
use crate::client::periods;
use crate::client::session::{PermissionScope, SessionContext};
use crate::client::transport::Transport;
use crate::config::ClientConfig;
use crate::error::{PronoteError, Result};
use crate::logger::{lhandshake, truncated, LoggerHandle};

const CHALLENGE_ERROR: &str =
    "exception happened during login, probably bad username/password or expired qr code";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Init,
    Identified,
    Challenged,
    Authenticated,
    TwoFactor,
    LoggedIn,
    LoginFailed,
}

/// Transient material of one login attempt
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LoginHandshake {
    pub challenge: String,
    pub alea: String,
    pub fold_username: bool,
    pub fold_password: bool,
}

impl LoginHandshake {
    pub fn from_identification(response: &Value) -> Result<Self> {
        let data = json::data(response)?;
        Ok(Self {
            challenge: json::str_at(data, &["challenge"])?.to_string(),
            alea: json::str_opt(data, &["alea"]).unwrap_or_default().to_string(),
            fold_username: json::flag(data, &["modeCompLog"]),
            fold_password: json::flag(data, &["modeCompMdp"]),
        })
    }

    pub fn auth_key(&self, username: &str, password: &str, ent: bool) -> AesKey {
        derive_auth_key(
            username,
            password,
            &self.alea,
            self.fold_username,
            self.fold_password,
            ent,
        )
    }
}

/// AES key proving knowledge of the password.
///
/// ENT logins hash the password alone; other logins salt it with `alea` and
/// prefix the hash with the username.
pub fn derive_auth_key(
    username: &str,
    password: &str,
    alea: &str,
    fold_username: bool,
    fold_password: bool,
    ent: bool,
) -> AesKey {
    let username = if fold_username {
        username.to_lowercase()
    } else {
        username.to_string()
    };
    let mut password = if fold_password {
        password.to_lowercase()
    } else {
        password.to_string()
    };

    let mut hash = if ent {
        sha256_hex_upper(&password)
    } else {
        sha256_hex_upper(&format!("{alea}{password}"))
    };
    let key = if ent {
        derive_key(hash.as_bytes())
    } else {
        derive_key(format!("{username}{hash}").as_bytes())
    };
    password.zeroize();
    hash.zeroize();
    key
}

/// Keep the characters at even positions. Odd-length input is rejected.
pub fn strip_decoys(text: &str) -> Result<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() % 2 != 0 {
        return Err(PronoteError::crypto(format!(
            "challenge of odd length {}: {CHALLENGE_ERROR}",
            chars.len()
        )));
    }
    Ok(chars.into_iter().step_by(2).collect())
}

/// Decrypt the challenge, drop the decoys and re-encrypt, as lowercase hex
pub fn solve_challenge(challenge_hex: &str, key: &AesKey, iv: &AesIv) -> Result<String> {
    let encrypted = hex::decode(challenge_hex).map_err(|_| PronoteError::crypto(CHALLENGE_ERROR))?;
    let decrypted = aes_decrypt(key, iv, &encrypted)?;
    let text = String::from_utf8(decrypted).map_err(|_| PronoteError::crypto(CHALLENGE_ERROR))?;
    let solved = strip_decoys(&text)?;
    Ok(hex::encode(aes_encrypt(key, iv, solved.as_bytes())))
}

/// Session key from the `cle` field: a comma-separated byte list
pub fn session_key_from_material(cle_hex: &str, key: &AesKey, iv: &AesIv) -> Result<AesKey> {
    let encrypted = hex::decode(cle_hex)?;
    let decrypted = aes_decrypt(key, iv, &encrypted)?;
    let text = String::from_utf8(decrypted)
        .map_err(|_| PronoteError::crypto("session key material is not valid utf-8"))?;

    let bytes = text
        .split(',')
        .map(|part| part.trim().parse::<i32>().map(|n| n as u8))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|e| PronoteError::crypto(format!("malformed session key material: {e}")))?;
    Ok(derive_key(&bytes))
}

/// Steps the server asks for in `actionsDoubleAuth`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TwoFactorActions {
    pub verify_pin: bool,
    pub register_device: bool,
}

impl TwoFactorActions {
    const VERIFY_PIN: i64 = 3;
    const REGISTER_DEVICE: i64 = 5;

    /// `V` may be a JSON-encoded string or a literal array
    pub fn from_value(actions: &Value) -> Self {
        let codes: Vec<i64> = match json::get(actions, &["V"]) {
            Some(Value::String(raw)) => serde_json::from_str::<Vec<Value>>(raw)
                .map(|items| items.iter().filter_map(json::as_int).collect())
                .unwrap_or_default(),
            Some(Value::Array(items)) => items.iter().filter_map(json::as_int).collect(),
            _ => Vec::new(),
        };
        let verify_pin = codes.contains(&Self::VERIFY_PIN);
        Self {
            verify_pin,
            register_device: verify_pin || codes.contains(&Self::REGISTER_DEVICE),
        }
    }

    pub fn any(&self) -> bool {
        self.verify_pin || self.register_device
    }
}

/// Outcome of a successful login
#[derive(Debug, Clone, Default)]
pub struct LoginReport {
    pub last_connection: Option<NaiveDateTime>,
    /// The password was replaced by a server-issued token
    pub token_rotated: bool,
}

fn transition(state: &mut LoginState, next: LoginState) {
    tracing::trace!("Login state {:?} -> {:?}", state, next);
    *state = next;
}

/// Run the whole handshake on a freshly bootstrapped context.
///
/// `Ok(None)` is a refused login (bad credentials). Crypto, MFA and transport
/// failures are errors.
pub async fn login(
    ctx: &mut SessionContext,
    transport: &dyn Transport,
    config: &ClientConfig,
    logger: &LoggerHandle,
    credentials: &mut Credentials,
    ent: bool,
) -> Result<Option<LoginReport>> {
    let mut state = LoginState::Init;
    let mode = credentials.mode;

    let (username, mut password) = if ent {
        let e = ctx.attributes.get("e").cloned();
        let f = ctx.attributes.get("f").cloned();
        match (e, f) {
            (Some(e), Some(f)) => (e, f),
            _ => {
                return Err(PronoteError::EntLogin(
                    "login page did not carry ENT credentials".into(),
                ))
            }
        }
    } else {
        (credentials.username.clone(), credentials.password.clone())
    };

    let mobile = matches!(mode, LoginMode::QrCode);
    let uuid = if mode.uses_mobile_token() {
        credentials.uuid.as_str()
    } else {
        ""
    };
    let identification = json!({"data": {
        "genreConnexion": 0,
        "genreEspace": ctx.space_id,
        "identifiant": username,
        "pourENT": ent,
        "enConnexionAuto": false,
        "demandeConnexionAuto": false,
        "demandeConnexionAppliMobile": mobile,
        "demandeConnexionAppliMobileJeton": mobile,
        "enConnexionAppliMobile": mode == LoginMode::Token,
        "uuidAppliMobile": uuid,
        "loginTokenSAV": "",
    }});
    lhandshake!(logger, "identification as {} ({})", truncated(&username), mode.as_str());
    let response = ctx
        .exchange(transport, config, logger, "Identification", identification, None)
        .await?;
    let handshake = LoginHandshake::from_identification(&response)?;
    transition(&mut state, LoginState::Identified);

    let auth_key = handshake.auth_key(&username, &password, ent);
    password.zeroize();
    let iv = *ctx.crypto.iv();
    let solved = solve_challenge(&handshake.challenge, &auth_key, &iv)?;
    drop(handshake);
    transition(&mut state, LoginState::Challenged);

    let authentication = json!({"data": {
        "connexion": 0,
        "challenge": solved,
        "espace": ctx.space_id,
    }});
    logger.handshake("authentication");
    let response = ctx
        .exchange(transport, config, logger, "Authentification", authentication, None)
        .await?;
    let data = json::data(&response)?;

    let Some(cle) = json::str_opt(data, &["cle"]) else {
        transition(&mut state, LoginState::LoginFailed);
        tracing::info!("❌ Login failed for {}", truncated(&credentials.username));
        return Ok(None);
    };
    let session_key = session_key_from_material(cle, &auth_key, &iv)?;
    ctx.crypto.set_key(session_key);
    transition(&mut state, LoginState::Authenticated);

    if let Some(actions) = json::get(data, &["actionsDoubleAuth"]) {
        let actions = TwoFactorActions::from_value(actions);
        if actions.any() {
            transition(&mut state, LoginState::TwoFactor);
            two_factor(ctx, transport, config, logger, credentials, actions).await?;
        }
    }

    let last_connection = json::str_opt(data, &["derniereConnexion", "V"])
        .and_then(|raw| periods::parse_datetime(raw).ok());

    let mut token_rotated = false;
    if mode.uses_mobile_token() {
        if let Some(token) = json::str_opt(data, &["jetonConnexionAppliMobile"]) {
            tracing::info!("🔄 Mobile token rotated: {}...", truncated(token));
            credentials.password = token.to_string();
            token_rotated = true;
        }
    }

    let parameters = ctx
        .exchange(transport, config, logger, "ParametresUtilisateur", json!({}), None)
        .await?;
    let tabs = json::get(&parameters, &["dataSec", "data", "listeOnglets"])
        .map(json::flatten_tabs)
        .unwrap_or_default();
    ctx.scope = PermissionScope::from_tabs(tabs);
    ctx.user_parameters = parameters;
    transition(&mut state, LoginState::LoggedIn);

    tracing::info!(
        "✅ Logged in as {} ({} tabs authorized)",
        truncated(&credentials.username),
        ctx.scope.len()
    );
    Ok(Some(LoginReport {
        last_connection,
        token_rotated,
    }))
}

/// PIN verification and device registration. Both preconditions are checked
/// before the first request.
async fn two_factor(
    ctx: &mut SessionContext,
    transport: &dyn Transport,
    config: &ClientConfig,
    logger: &LoggerHandle,
    credentials: &Credentials,
    actions: TwoFactorActions,
) -> Result<()> {
    if actions.verify_pin && credentials.account_pin.is_none() {
        return Err(PronoteError::Mfa("PIN is required for this account".into()));
    }
    if actions.register_device && credentials.device_name.is_none() {
        return Err(PronoteError::Mfa(
            "a device identifier is required for this account".into(),
        ));
    }

    let mut encrypted_pin = None;
    if actions.verify_pin {
        if let Some(pin) = credentials.account_pin.as_deref() {
            let code = hex::encode(ctx.crypto.encrypt(pin.as_bytes()));
            logger.handshake("pin verification");
            let response = ctx
                .exchange(
                    transport,
                    config,
                    logger,
                    "SecurisationCompteDoubleAuth",
                    json!({"data": {"action": 0, "codePin": code}}),
                    None,
                )
                .await?;
            if !json::flag(&response, &["dataSec", "data", "result"]) {
                return Err(PronoteError::Mfa("invalid PIN".into()));
            }
            encrypted_pin = Some(code);
        }
    }

    if actions.register_device {
        if let Some(device) = credentials.device_name.as_deref() {
            let mut data = json!({
                "action": 3,
                "avecIdentification": true,
                "strIdentification": device,
            });
            if let Some(code) = encrypted_pin {
                data["codePin"] = Value::String(code);
            }
            lhandshake!(logger, "registering device {}", truncated(device));
            ctx.exchange(
                transport,
                config,
                logger,
                "SecurisationCompteDoubleAuth",
                json!({ "data": data }),
                None,
            )
            .await?;
        }
    }
    Ok(())
}
