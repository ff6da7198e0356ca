use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ClientConfig;
use crate::error::{PronoteError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One HTTP hop. Redirects are never followed at this level.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub cookies: CookieJar,
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Raw `Set-Cookie` header values
    pub set_cookies: Vec<String>,
    pub location: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308) && self.location.is_some()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Session cookies keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar(BTreeMap<String, String>);

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn extend(&mut self, other: &CookieJar) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Store every cookie set by a response
    pub fn absorb(&mut self, response: &HttpResponse) {
        for header in &response.set_cookies {
            if let Some((name, value)) = parse_set_cookie(header) {
                self.0.insert(name, value);
            }
        }
    }

    /// `Cookie` request header, `None` when the jar is empty
    pub fn header_value(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CookieJar {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        CookieJar(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Name and value of a `Set-Cookie` header; attributes are dropped
pub fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Single-hop HTTP seam. Tests swap in scripted implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production transport over a shared reqwest client
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .gzip(true);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self
                .client
                .post(&request.url)
                .header(CONTENT_TYPE, "application/json"),
        };
        if let Some(cookie) = request.cookies.header_value() {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            body,
            set_cookies,
            location,
        })
    }
}

/// Send a request, following at most `max_redirects` redirects.
///
/// Every hop's cookies land in `jar` and are sent on the next hop. A
/// 301/302/303 turns the follow-up into a body-less GET.
pub async fn fetch(
    transport: &dyn Transport,
    jar: &mut CookieJar,
    method: Method,
    url: &str,
    body: Option<String>,
    max_redirects: usize,
) -> Result<HttpResponse> {
    let mut method = method;
    let mut url = url.to_string();
    let mut body = body;
    let mut hops = 0;

    loop {
        let response = transport
            .send(HttpRequest {
                method,
                url: url.clone(),
                body: body.clone(),
                cookies: jar.clone(),
            })
            .await?;
        jar.absorb(&response);

        if !response.is_redirect() {
            return Ok(response);
        }
        if hops >= max_redirects {
            return Err(PronoteError::TooManyRedirects { limit: max_redirects });
        }
        hops += 1;

        let location = response.location.as_deref().unwrap_or_default();
        let next = Url::parse(&url)
            .and_then(|base| base.join(location))
            .map_err(|e| PronoteError::api(format!("invalid redirect target {location}: {e}")))?;
        tracing::debug!("Following redirect {} -> {}", response.status, next);

        if matches!(response.status, 301 | 302 | 303) {
            method = Method::Get;
            body = None;
        }
        url = next.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned responses and records requests
    struct Scripted {
        responses: Mutex<Vec<HttpResponse>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(mut responses: Vec<HttpResponse>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| PronoteError::api("script exhausted"))
        }
    }

    fn redirect(to: &str, cookie: Option<&str>) -> HttpResponse {
        HttpResponse {
            status: 302,
            location: Some(to.to_string()),
            set_cookies: cookie.map(|c| vec![c.to_string()]).unwrap_or_default(),
            ..Default::default()
        }
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_set_cookie_parsing() {
        assert_eq!(
            parse_set_cookie("JSESSIONID=abc; Path=/; HttpOnly"),
            Some(("JSESSIONID".into(), "abc".into()))
        );
        assert_eq!(parse_set_cookie("a=b=c"), Some(("a".into(), "b=c".into())));
        assert_eq!(parse_set_cookie("novalue"), None);
        assert_eq!(parse_set_cookie("=x"), None);
    }

    #[test]
    fn test_cookie_header() {
        let mut jar: CookieJar = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(jar.header_value().as_deref(), Some("a=1; b=2"));
        jar.insert("a", "3");
        assert_eq!(jar.get("a"), Some("3"));
        assert!(CookieJar::new().header_value().is_none());
    }

    #[tokio::test]
    async fn test_fetch_follows_redirects_and_keeps_cookies() {
        let transport = Scripted::new(vec![
            redirect("/cas/login", Some("route=1; Path=/")),
            redirect("https://ent.example/done", Some("TGC=xyz")),
            ok("landing"),
        ]);
        let mut jar = CookieJar::new();
        let response = fetch(
            &transport,
            &mut jar,
            Method::Post,
            "https://school.example/pronote/eleve.html",
            Some("{}".into()),
            10,
        )
        .await
        .unwrap();

        assert_eq!(response.text(), "landing");
        assert_eq!(jar.get("route"), Some("1"));
        assert_eq!(jar.get("TGC"), Some("xyz"));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[1].url, "https://school.example/cas/login");
        assert_eq!(seen[1].method, Method::Get);
        assert!(seen[1].body.is_none());
        assert_eq!(seen[2].cookies.get("route"), Some("1"));
        assert_eq!(seen[2].url, "https://ent.example/done");
    }

    #[tokio::test]
    async fn test_fetch_redirect_limit() {
        let transport = Scripted::new((0..5).map(|_| redirect("/loop", None)).collect());
        let mut jar = CookieJar::new();
        let err = fetch(&transport, &mut jar, Method::Get, "https://x.example/", None, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, PronoteError::TooManyRedirects { limit: 3 }));
        assert_eq!(transport.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_preserves_method_on_307() {
        let transport = Scripted::new(vec![
            HttpResponse {
                status: 307,
                location: Some("/other".into()),
                ..Default::default()
            },
            ok("done"),
        ]);
        let mut jar = CookieJar::new();
        fetch(&transport, &mut jar, Method::Post, "https://x.example/a", Some("body".into()), 10)
            .await
            .unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[1].method, Method::Post);
        assert_eq!(seen[1].body.as_deref(), Some("body"));
    }
}
