use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

use crate::client::bootstrap::Attributes;
use crate::client::crypto::CryptoState;
use crate::client::envelope::{self, DecryptionChange, Negotiation, OutboundEnvelope};
use crate::client::json;
use crate::client::periods::{self, PeriodRepository};
use crate::client::transport::{self, CookieJar, Method, Transport};
use crate::config::ClientConfig;
use crate::error::{PronoteError, Result};
use crate::logger::LoggerHandle;

/// Tab ids the logged-in identity may address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionScope(BTreeSet<i64>);

impl PermissionScope {
    pub fn from_tabs(tabs: impl IntoIterator<Item = i64>) -> Self {
        Self(tabs.into_iter().collect())
    }

    pub fn contains(&self, tab: i64) -> bool {
        self.0.contains(&tab)
    }

    pub fn check(&self, tab: i64) -> Result<()> {
        if self.contains(tab) {
            Ok(())
        } else {
            Err(PronoteError::PermissionDenied { tab })
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }
}

/// All mutable state of one bootstrapped session.
///
/// A refresh builds a new context from scratch and swaps it in; a context is
/// never repaired piecewise.
#[derive(Debug)]
pub struct SessionContext {
    pub(crate) root: String,
    pub(crate) page: String,
    pub(crate) space_id: i64,
    pub(crate) session_id: i64,
    pub(crate) counter: u64,
    pub(crate) cookies: CookieJar,
    pub(crate) scope: PermissionScope,
    pub(crate) negotiation: Negotiation,
    pub(crate) crypto: CryptoState,
    pub(crate) last_activity: Instant,
    pub(crate) attributes: Attributes,
    pub(crate) options: Value,
    pub(crate) user_parameters: Value,
    pub(crate) periods: PeriodRepository,
}

impl SessionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        root: String,
        page: String,
        space_id: i64,
        session_id: i64,
        cookies: CookieJar,
        negotiation: Negotiation,
        crypto: CryptoState,
        attributes: Attributes,
    ) -> Self {
        Self {
            root,
            page,
            space_id,
            session_id,
            counter: 1,
            cookies,
            scope: PermissionScope::default(),
            negotiation,
            crypto,
            last_activity: Instant::now(),
            attributes,
            options: Value::Null,
            user_parameters: Value::Null,
            periods: PeriodRepository::default(),
        }
    }

    /// One encrypted request/response round trip.
    ///
    /// The counter advances by two as soon as a response is received, whatever
    /// its status. `change` is applied after the response arrives and before its
    /// payload is decoded.
    pub(crate) async fn exchange(
        &mut self,
        transport: &dyn Transport,
        config: &ClientConfig,
        logger: &LoggerHandle,
        function: &str,
        payload: Value,
        change: Option<DecryptionChange>,
    ) -> Result<Value> {
        let no = hex::encode(self.crypto.encrypt(self.counter.to_string().as_bytes()));
        let data_sec = envelope::encode_payload(&payload, self.negotiation, &self.crypto)?;
        let body = serde_json::to_string(&OutboundEnvelope {
            session: self.session_id,
            no: no.clone(),
            id: function.to_string(),
            data_sec,
        })?;
        let url = format!(
            "{}/appelfonction/{}/{}/{}",
            self.root, self.space_id, self.session_id, no
        );

        logger.exchange(
            function,
            self.counter,
            self.negotiation.compress,
            self.negotiation.encrypt,
        );
        let response = transport::fetch(
            transport,
            &mut self.cookies,
            Method::Post,
            &url,
            Some(body),
            config.max_redirects,
        )
        .await?;

        self.counter += 2;
        self.last_activity = Instant::now();

        if !response.is_success() {
            return Err(PronoteError::api(format!(
                "status code: {} for {}",
                response.status, function
            )));
        }

        envelope::decode_response(&response.body, self.negotiation, &mut self.crypto, change.as_ref())
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    /// URL the session was bootstrapped from
    pub fn url(&self) -> String {
        format!("{}/{}", self.root, self.page)
    }

    pub fn space_id(&self) -> i64 {
        self.space_id
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn scope(&self) -> &PermissionScope {
        &self.scope
    }

    pub fn negotiation(&self) -> Negotiation {
        self.negotiation
    }

    pub fn crypto(&self) -> &CryptoState {
        &self.crypto
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Parameters response of the bootstrap negotiation
    pub fn options(&self) -> &Value {
        &self.options
    }

    /// `ParametresUtilisateur` response kept after login
    pub fn user_parameters(&self) -> &Value {
        &self.user_parameters
    }

    pub fn periods(&self) -> &PeriodRepository {
        &self.periods
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Identifier the server assigned to this browser, if any
    pub fn client_identifier(&self) -> Option<&str> {
        json::str_opt(&self.options, &["dataSec", "data", "identifiantNav"])
    }

    /// First Monday of the school year
    pub fn start_day(&self) -> Result<NaiveDate> {
        let raw = json::str_at(&self.options, &["dataSec", "data", "General", "PremierLundi", "V"])?;
        periods::parse_date(raw)
    }

    /// School week number of `date`, week 1 starting on the first Monday
    pub fn get_week(&self, date: NaiveDate) -> Result<i64> {
        let start = self.start_day()?;
        Ok(1 + (date - start).num_days() / 7)
    }
}
