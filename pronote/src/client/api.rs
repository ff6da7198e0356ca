use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::client::auth::{self, LoginReport};
use crate::client::bootstrap::{self, Attributes};
use crate::client::credentials::{Credentials, CredentialsExport, LoginMode};
use crate::client::ent::CookieSource;
use crate::client::envelope::{self, Signature};
use crate::client::json;
use crate::client::keepalive::KeepAlive;
use crate::client::periods::{Period, PeriodRepository};
use crate::client::qrcode::{self, QrCodePayload};
use crate::client::session::{PermissionScope, SessionContext};
use crate::client::transport::{CookieJar, ReqwestTransport, Transport};
use crate::config::ClientConfig;
use crate::error::{PronoteError, Result};
use crate::logger::{truncated, LoggerHandle};

/// Navigation tab every account can reach
pub const HOME_TAB: i64 = 7;
const PERSONAL_INFO_TAB: i64 = 49;

/// Identity of the logged-in resource
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub class_name: Option<String>,
    pub establishment: Option<String>,
    pub raw: Value,
}

impl UserInfo {
    fn from_parameters(parameters: &Value) -> Result<Self> {
        let path = ["dataSec", "data", "ressource"];
        let ressource = json::at(parameters, &path)?;
        let id = match json::at(ressource, &["N"])? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(Self {
            id,
            name: json::str_at(ressource, &["L"])?.to_string(),
            class_name: json::str_opt(ressource, &["classeDEleve", "L"]).map(str::to_owned),
            establishment: json::str_opt(ressource, &["Etablissement", "V", "L"]).map(str::to_owned),
            raw: ressource.clone(),
        })
    }
}

#[derive(Clone)]
pub struct ClientBuilder {
    url: String,
    credentials: Credentials,
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    cookie_source: Option<Arc<dyn CookieSource>>,
    logger: LoggerHandle,
}

impl ClientBuilder {
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            config: ClientConfig::default(),
            transport: None,
            cookie_source: None,
            logger: LoggerHandle::default(),
        }
    }

    /// Token-mode builder resuming an exported session
    pub fn from_export(export: &CredentialsExport) -> Self {
        Self::new(export.pronote_url.clone(), export.to_credentials())
    }

    /// QR-code builder: decodes the payload with `pin` and targets the mobile page
    pub fn from_qr_code(qr_code: &QrCodePayload, pin: &str, uuid: impl Into<String>) -> Result<Self> {
        let decoded = qr_code.decode(pin)?;
        let credentials = Credentials::new(decoded.username, decoded.token)
            .mode(LoginMode::QrCode)
            .uuid(uuid);
        Ok(Self::new(decoded.url, credentials))
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Log in through an external identity provider
    pub fn ent(mut self, source: Arc<dyn CookieSource>) -> Self {
        self.cookie_source = Some(source);
        self.credentials.mode = LoginMode::Ent;
        self
    }

    pub fn logger(mut self, logger: LoggerHandle) -> Self {
        self.logger = logger;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Bootstrap and log in.
    ///
    /// A refused login still yields a client; check [`Client::logged_in`].
    pub async fn connect(self) -> Result<Client> {
        if self.credentials.is_empty() && self.cookie_source.is_none() {
            return Err(PronoteError::api(
                "please provide login credentials: no cookie source and empty username and password",
            ));
        }
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };

        let inner = ClientInner {
            url: self.url,
            config: self.config,
            transport,
            cookie_source: self.cookie_source,
            logger: self.logger,
        };
        let mut credentials = self.credentials;
        let (session, report) = inner.establish(&mut credentials).await?;

        let state = ClientState {
            logged_in: report.is_some(),
            last_connection: report.as_ref().and_then(|r| r.last_connection),
            session,
            credentials,
            stale: false,
            expired: false,
        };
        Ok(Client {
            inner: Arc::new(inner),
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// QR-code login. Unless `skip_2fa` is set, accounts with an active
    /// security mode are logged in again with the rotated token.
    pub async fn connect_qr_code(self, skip_2fa: bool) -> Result<Client> {
        let template = self.clone();
        let client = self.connect().await?;
        if skip_2fa || !client.logged_in().await {
            return Ok(client);
        }
        if !client.permission_scope().await.contains(PERSONAL_INFO_TAB) {
            tracing::debug!("Personal info tab not authorized, skipping security check");
            return Ok(client);
        }

        let response = client
            .post_raw("PageInfosPerso", Some(PERSONAL_INFO_TAB), None)
            .await?;
        let mode = json::get(&response, &["dataSec", "data", "securisation", "mode"])
            .and_then(json::as_int)
            .unwrap_or(0);
        if mode == 0 {
            return Ok(client);
        }

        tracing::info!("🔐 Account security mode {}, logging in again with token", mode);
        let mut credentials = client.credentials().await;
        credentials.mode = LoginMode::Token;
        let url = client.url().to_string();
        ClientBuilder {
            url,
            credentials,
            ..template
        }
        .connect()
        .await
    }
}

struct ClientInner {
    url: String,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    cookie_source: Option<Arc<dyn CookieSource>>,
    logger: LoggerHandle,
}

impl ClientInner {
    /// Cookie source, bootstrap and login against the configured URL
    async fn establish(
        &self,
        credentials: &mut Credentials,
    ) -> Result<(SessionContext, Option<LoginReport>)> {
        let cookies = match &self.cookie_source {
            Some(source) => {
                tracing::info!("Requesting ENT cookies for {}", truncated(&credentials.username));
                source
                    .cookies(&credentials.username, &credentials.password, &self.url)
                    .await?
            }
            None => CookieJar::new(),
        };

        let mut session = bootstrap::bootstrap(
            self.transport.as_ref(),
            &self.config,
            &self.logger,
            &self.url,
            cookies,
            credentials.client_identifier.as_deref(),
        )
        .await?;

        if credentials.client_identifier.is_none() {
            credentials.client_identifier = session.client_identifier().map(str::to_owned);
        }

        let report = auth::login(
            &mut session,
            self.transport.as_ref(),
            &self.config,
            &self.logger,
            credentials,
            self.cookie_source.is_some(),
        )
        .await?;
        Ok((session, report))
    }

    async fn send(&self, session: &mut SessionContext, function: &str, payload: Value) -> Result<Value> {
        session
            .exchange(
                self.transport.as_ref(),
                &self.config,
                &self.logger,
                function,
                payload,
                None,
            )
            .await
    }

    /// Build a brand-new session and swap it in.
    ///
    /// Nothing in `state` changes until the new session is fully established,
    /// so a refresh dropped mid-flight leaves the previous session in place.
    /// A refused login marks the state stale: the next call starts with a
    /// fresh cycle instead of failing with `NotLoggedIn`.
    async fn refresh(&self, state: &mut ClientState) -> Result<()> {
        let (session, report) = self.establish(&mut state.credentials).await?;
        state.session = session;
        state.expired = true;
        match report {
            Some(report) => {
                state.logged_in = true;
                state.stale = false;
                state.last_connection = report.last_connection;
                Ok(())
            }
            None => {
                state.logged_in = false;
                state.stale = true;
                Err(PronoteError::api("login refused while refreshing the session"))
            }
        }
    }

    /// Permission check on the current session, then one exchange
    async fn replay(
        &self,
        state: &mut ClientState,
        function: &str,
        tab: Option<i64>,
        payload: Value,
    ) -> Result<Value> {
        if let Some(tab) = tab {
            state.session.scope.check(tab)?;
        }
        self.send(&mut state.session, function, payload).await
    }
}

struct ClientState {
    session: SessionContext,
    credentials: Credentials,
    logged_in: bool,
    /// Last refresh was refused; the session must be rebuilt before use
    stale: bool,
    expired: bool,
    last_connection: Option<NaiveDateTime>,
}

/// Logged-in handle on one Pronote space.
///
/// Clones share the session. Calls are serialized: each one holds the session
/// lock for its whole exchange, including a recovery cycle.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
    state: Arc<Mutex<ClientState>>,
}

impl Client {
    pub fn builder(url: impl Into<String>, credentials: Credentials) -> ClientBuilder {
        ClientBuilder::new(url, credentials)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Business call on tab `tab`
    pub async fn post(&self, function: &str, tab: i64, data: Value) -> Result<Value> {
        self.call(function, Some(Signature { onglet: tab, membre: None }), Some(data))
            .await
    }

    /// Business call on behalf of another subject (e.g. a parent's child)
    pub async fn post_as(&self, function: &str, tab: i64, member: Value, data: Value) -> Result<Value> {
        self.call(
            function,
            Some(Signature {
                onglet: tab,
                membre: Some(member),
            }),
            Some(data),
        )
        .await
    }

    pub async fn post_raw(&self, function: &str, tab: Option<i64>, data: Option<Value>) -> Result<Value> {
        let signature = tab.map(|onglet| Signature { onglet, membre: None });
        self.call(function, signature, data).await
    }

    /// Recovery wrapper: one refresh and one replay on a recoverable error.
    ///
    /// The session lock is held across the refresh, so a refresh can never
    /// start inside another one.
    async fn call(&self, function: &str, signature: Option<Signature>, data: Option<Value>) -> Result<Value> {
        let payload = envelope::build_payload(signature, data)?;
        let tab = envelope::declared_tab(&payload);

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.stale {
            self.inner.logger.refresh("previous refresh was refused");
            self.inner.refresh(state).await?;
            return self.inner.replay(state, function, tab, payload).await;
        }
        if !state.logged_in {
            return Err(PronoteError::NotLoggedIn);
        }
        if let Some(tab) = tab {
            if let Err(e) = state.session.scope.check(tab) {
                e.log_event();
                return Err(e);
            }
        }

        let error = match self.inner.send(&mut state.session, function, payload.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        if !error.is_recoverable() {
            error.log_event();
            return Err(error);
        }

        self.inner.logger.refresh(&format!(
            "ERROR: {} | {}",
            error.code().map_or_else(|| "-".to_string(), |c| c.to_string()),
            error
        ));
        self.inner.refresh(state).await?;
        self.inner.replay(state, function, tab, payload).await
    }

    /// Replace the session with a freshly bootstrapped and logged-in one
    pub async fn refresh(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        self.inner.logger.refresh("requested by caller");
        self.inner.refresh(&mut guard).await
    }

    /// Navigation call; `true` when the session was refreshed since the last check
    pub async fn session_check(&self) -> Result<bool> {
        self.post_raw(
            "Navigation",
            Some(HOME_TAB),
            Some(json!({"onglet": HOME_TAB, "ongletPrec": HOME_TAB})),
        )
        .await?;
        let mut state = self.state.lock().await;
        Ok(std::mem::take(&mut state.expired))
    }

    /// Token and install data for the mobile app, plus its page URL
    pub async fn request_qr_code_data(&self, pin: &str) -> Result<Value> {
        let response = self
            .post_raw("JetonAppliMobile", Some(HOME_TAB), Some(json!({"code": pin})))
            .await?;
        let mut data = match json::data(&response)? {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        data.insert(
            "url".into(),
            Value::String(qrcode::mobile_page_url(&self.inner.url)),
        );
        Ok(Value::Object(data))
    }

    pub async fn logged_in(&self) -> bool {
        self.state.lock().await.logged_in
    }

    pub async fn export_credentials(&self) -> CredentialsExport {
        let state = self.state.lock().await;
        CredentialsExport {
            pronote_url: self.inner.url.clone(),
            username: state.credentials.username.clone(),
            password: state.credentials.password.clone(),
            client_identifier: state.credentials.client_identifier.clone(),
            uuid: state.credentials.uuid.clone(),
        }
    }

    pub(crate) async fn credentials(&self) -> Credentials {
        self.state.lock().await.credentials.clone()
    }

    pub async fn user_info(&self) -> Result<UserInfo> {
        let state = self.state.lock().await;
        UserInfo::from_parameters(state.session.user_parameters())
    }

    pub async fn last_connection(&self) -> Option<NaiveDateTime> {
        self.state.lock().await.last_connection
    }

    pub async fn periods(&self) -> PeriodRepository {
        self.state.lock().await.session.periods().clone()
    }

    pub async fn period(&self, id: &str) -> Option<Period> {
        self.state.lock().await.session.periods().get(id).cloned()
    }

    pub async fn attributes(&self) -> Attributes {
        self.state.lock().await.session.attributes().clone()
    }

    /// Parameters response of the current session's bootstrap
    pub async fn func_options(&self) -> Value {
        self.state.lock().await.session.options().clone()
    }

    pub async fn permission_scope(&self) -> PermissionScope {
        self.state.lock().await.session.scope().clone()
    }

    pub async fn request_counter(&self) -> u64 {
        self.state.lock().await.session.counter()
    }

    pub async fn idle_for(&self) -> Duration {
        self.state.lock().await.session.idle_for()
    }

    pub async fn get_week(&self, date: NaiveDate) -> Result<i64> {
        self.state.lock().await.session.get_week(date)
    }

    pub async fn current_week(&self) -> Result<i64> {
        self.get_week(chrono::Local::now().date_naive()).await
    }

    /// Background navigation calls while the session sits idle
    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive::spawn(self.clone())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("url", &self.inner.url).finish_non_exhaustive()
    }
}
