pub mod config;
pub mod error;
pub mod logger;

pub mod client {
    pub mod api;
    pub mod auth;
    pub mod bootstrap;
    pub mod credentials;
    pub mod crypto;
    pub mod ent;
    pub mod envelope;
    pub mod json;
    pub mod keepalive;
    pub mod periods;
    pub mod qrcode;
    pub mod session;
    pub mod transport;
}

pub use client::api::{Client, ClientBuilder, UserInfo};
pub use client::auth::LoginReport;
pub use client::credentials::{Credentials, CredentialsExport, LoginMode};
pub use client::ent::{CookieSource, FnCookieSource, StaticCookies};
pub use client::keepalive::KeepAlive;
pub use client::periods::{Period, PeriodRepository};
pub use client::qrcode::{QrCodePayload, QrLogin};
pub use client::session::PermissionScope;
pub use client::transport::{CookieJar, HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
pub use config::ClientConfig;
pub use error::{PronoteError, Result};
pub use logger::{LoggerHandle, ProtocolLogger};
