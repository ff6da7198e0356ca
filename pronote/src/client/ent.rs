use async_trait::async_trait;

use crate::client::transport::CookieJar;
use crate::error::{PronoteError, Result};

/// External identity provider yielding the cookies that seed a session.
///
/// Invoked before every bootstrap, including the ones a recovery triggers.
#[async_trait]
pub trait CookieSource: Send + Sync {
    async fn cookies(&self, username: &str, password: &str, url: &str) -> Result<CookieJar>;
}

/// Fixed cookies, typically captured from a browser session
pub struct StaticCookies(pub CookieJar);

#[async_trait]
impl CookieSource for StaticCookies {
    async fn cookies(&self, _username: &str, _password: &str, _url: &str) -> Result<CookieJar> {
        Ok(self.0.clone())
    }
}

/// Adapter for a synchronous closure.
///
/// Any error the closure returns is reported as [`PronoteError::EntLogin`].
pub struct FnCookieSource<F>(pub F);

#[async_trait]
impl<F, E> CookieSource for FnCookieSource<F>
where
    F: Fn(&str, &str, &str) -> std::result::Result<CookieJar, E> + Send + Sync,
    E: std::fmt::Display,
{
    async fn cookies(&self, username: &str, password: &str, url: &str) -> Result<CookieJar> {
        (self.0)(username, password, url).map_err(|e| PronoteError::EntLogin(e.to_string()))
    }
}
