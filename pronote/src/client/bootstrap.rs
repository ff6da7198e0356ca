use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::client::crypto::CryptoState;
use crate::client::envelope::{DecryptionChange, Negotiation};
use crate::client::json;
use crate::client::periods::PeriodRepository;
use crate::client::session::SessionContext;
use crate::client::transport::{self, CookieJar, Method, Transport};
use crate::config::ClientConfig;
use crate::error::{PronoteError, Result};
use crate::logger::{lhandshake, LoggerHandle};

/// Key/value pairs embedded in the login page's `Start({...})` callback
pub type Attributes = BTreeMap<String, String>;

/// Split a page URL at its last `/` into root and page name
pub fn split_root(url: &str) -> (String, String) {
    match url.rsplit_once('/') {
        Some((root, page)) => (root.to_string(), page.to_string()),
        None => (String::new(), url.to_string()),
    }
}

/// Body of the first `Start ({...})` call in the page
fn start_arguments(html: &str) -> Option<&str> {
    for (idx, _) in html.match_indices("Start") {
        let rest = html[idx + "Start".len()..].trim_start();
        let Some(rest) = rest.strip_prefix("({") else {
            continue;
        };
        let Some(end) = rest.find('}') else {
            continue;
        };
        if rest[end + 1..].starts_with(')') {
            return Some(&rest[..end]);
        }
    }
    None
}

/// `word` appearing with no alphanumeric character on either side
fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Extract the session attributes of a login page.
///
/// `Ok(None)` means the callback was found but carried no session id, which
/// the caller treats as a transient malformed page.
pub fn parse_login_page(html: &str) -> Result<Option<Attributes>> {
    let Some(arguments) = start_arguments(html) else {
        if contains_word(html, "IP") {
            return Err(PronoteError::IpSuspended);
        }
        return Err(PronoteError::api(
            "page html is different than expected, be sure the url points directly to a pronote page",
        ));
    };

    let mut attributes = Attributes::new();
    for part in arguments.split(',') {
        let mut split = part.split(':');
        if let (Some(key), Some(value)) = (split.next(), split.next()) {
            attributes.insert(key.trim().to_string(), value.replace('\'', "").trim().to_string());
        }
    }

    if attributes.contains_key("h") {
        Ok(Some(attributes))
    } else {
        Ok(None)
    }
}

fn int_attribute(attributes: &Attributes, key: &str) -> Result<i64> {
    attributes
        .get(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PronoteError::parsing("expected an integer page attribute", &[key]))
}

/// Fetch the login page, negotiate flags and run the first encrypted exchange.
///
/// The returned context has its options loaded and is ready for login.
pub async fn bootstrap(
    transport: &dyn Transport,
    config: &ClientConfig,
    logger: &LoggerHandle,
    url: &str,
    mut cookies: CookieJar,
    client_identifier: Option<&str>,
) -> Result<SessionContext> {
    let (root, page) = split_root(url);
    let page_url = format!("{root}/{page}");

    let mut attributes = None;
    for attempt in 1..=config.page_attempts {
        tracing::debug!("Requesting html: {} (attempt {})", page_url, attempt);
        let response = transport::fetch(
            transport,
            &mut cookies,
            Method::Get,
            &page_url,
            None,
            config.max_redirects,
        )
        .await?;

        match parse_login_page(&response.text())? {
            Some(found) => {
                attributes = Some(found);
                break;
            }
            None => tracing::warn!("Failed to parse login page, retrying..."),
        }
    }
    let attributes = attributes
        .ok_or_else(|| PronoteError::api("unable to connect to pronote, please try again later"))?;

    let session_id = int_attribute(&attributes, "h")?;
    let space_id = int_attribute(&attributes, "a")?;
    let use_rsa = attributes.contains_key("http");
    let negotiation = Negotiation {
        encrypt: attributes.contains_key("CrA"),
        compress: attributes.contains_key("CoA"),
    };
    lhandshake!(
        logger,
        "bootstrap session {} space {} (rsa={}, encrypt={}, compress={})",
        session_id,
        space_id,
        use_rsa,
        negotiation.encrypt,
        negotiation.compress
    );

    let crypto = CryptoState::new();
    let uuid = crypto.uuid_payload(use_rsa)?;
    let change = DecryptionChange::iv(crypto.bootstrap_iv());

    let mut context = SessionContext::new(
        root,
        page,
        space_id,
        session_id,
        cookies,
        negotiation,
        crypto,
        attributes,
    );

    let identifier = client_identifier.map_or(Value::Null, |id| Value::String(id.to_string()));
    let payload = json!({"data": {"Uuid": uuid, "identifiantNav": identifier}});
    let options = context
        .exchange(transport, config, logger, "FonctionParametres", payload, Some(change))
        .await?;

    context.periods = PeriodRepository::from_options(&options)?;
    if let Some(nav) = json::str_opt(&options, &["dataSec", "data", "identifiantNav"]) {
        tracing::debug!("Server assigned client identifier {}", crate::logger::truncated(nav));
    }
    context.options = options;
    tracing::info!("✅ Session {} bootstrapped", session_id);
    Ok(context)
}
