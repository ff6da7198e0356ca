#![allow(dead_code)]

//! In-process Pronote server speaking the envelope protocol.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use miniz_oxide::deflate::compress_to_vec;
use miniz_oxide::inflate::decompress_to_vec;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pronote::client::auth::derive_auth_key;
use pronote::client::crypto::{aes_decrypt, aes_encrypt, derive_key, AesIv, AesKey};
use pronote::{
    ClientBuilder, ClientConfig, CookieJar, Credentials, HttpRequest, HttpResponse, LoggerHandle,
    Method, PronoteError, Transport,
};

pub const URL: &str = "https://demo.pronote.test/pronote/eleve.html";
pub const USERNAME: &str = "demouser";
pub const PASSWORD: &str = "pronotevs";
pub const CLIENT_IDENTIFIER: &str = "nav-fake";
pub const KEY_MATERIAL: &str = "12,34,56,78,90,-12,-34,100,1,2,3,4,5,6,7,8";

const CHALLENGE: &str = "pxrxoxnxoxtxex";
const SOLVED: &str = "pronote";

#[derive(Debug, Clone)]
pub struct FakeOptions {
    pub encrypt: bool,
    pub compress: bool,
    pub username: String,
    pub password: String,
    pub alea: String,
    pub fold_username: bool,
    pub fold_password: bool,
    /// `e`/`f` page attributes for ENT logins
    pub ent: Option<(String, String)>,
    /// `actionsDoubleAuth.V` sent after authentication
    pub double_auth: Option<Value>,
    pub pin: Option<String>,
    /// Token handed out to mobile-app logins
    pub mobile_token: Option<String>,
    pub refuse_login: bool,
    pub security_mode: i64,
    pub malformed_pages: usize,
    pub ip_suspended: bool,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            encrypt: true,
            compress: true,
            username: USERNAME.into(),
            password: PASSWORD.into(),
            alea: "s4lt".into(),
            fold_username: false,
            fold_password: false,
            ent: None,
            double_auth: None,
            pin: None,
            mobile_token: None,
            refuse_login: false,
            security_mode: 0,
            malformed_pages: 0,
            ip_suspended: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Erreur(i64),
    Status(u16),
}

/// One request as the server saw it
#[derive(Debug, Clone)]
pub struct Call {
    pub function: String,
    pub counter: Option<u64>,
    pub payload: Value,
    pub cookies: CookieJar,
}

struct ServerState {
    next_session: i64,
    session: i64,
    key: AesKey,
    iv: AesIv,
    auth_key: Option<AesKey>,
    expected_counter: u64,
    password: String,
    mobile_login: bool,
    pages_served: usize,
    calls: Vec<Call>,
    failures: VecDeque<(String, Failure)>,
    counter_mismatches: Vec<String>,
    registered_device: Option<String>,
    last_identifiant: Option<String>,
    /// Decoded `Uuid` length of every parameters call
    uuid_lengths: Vec<usize>,
    refusals: usize,
}

pub struct FakePronote {
    options: FakeOptions,
    state: Mutex<ServerState>,
    page_delay: Mutex<Duration>,
    down: AtomicBool,
    rejected: AtomicUsize,
}

impl FakePronote {
    pub fn new(options: FakeOptions) -> Arc<Self> {
        let password = options.password.clone();
        Arc::new(Self {
            options,
            state: Mutex::new(ServerState {
                next_session: 1000,
                session: 0,
                key: derive_key(&[]),
                iv: [0u8; 16],
                auth_key: None,
                expected_counter: 1,
                password,
                mobile_login: false,
                pages_served: 0,
                calls: Vec::new(),
                failures: VecDeque::new(),
                counter_mismatches: Vec::new(),
                registered_device: None,
                last_identifiant: None,
                uuid_lengths: Vec::new(),
                refusals: 0,
            }),
            page_delay: Mutex::new(Duration::ZERO),
            down: AtomicBool::new(false),
            rejected: AtomicUsize::new(0),
        })
    }

    pub fn default_server() -> Arc<Self> {
        Self::new(FakeOptions::default())
    }

    /// Fail the next call to `function`
    pub fn fail_next(&self, function: &str, failure: Failure) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push_back((function.to_string(), failure));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn functions(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.function).collect()
    }

    pub fn count(&self, function: &str) -> usize {
        self.calls().iter().filter(|c| c.function == function).count()
    }

    pub fn total_requests(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn counter_mismatches(&self) -> Vec<String> {
        self.state.lock().unwrap().counter_mismatches.clone()
    }

    pub fn registered_device(&self) -> Option<String> {
        self.state.lock().unwrap().registered_device.clone()
    }

    pub fn last_identifiant(&self) -> Option<String> {
        self.state.lock().unwrap().last_identifiant.clone()
    }

    pub fn current_session(&self) -> i64 {
        self.state.lock().unwrap().session
    }

    pub fn uuid_lengths(&self) -> Vec<usize> {
        self.state.lock().unwrap().uuid_lengths.clone()
    }

    /// Refuse the next login even with valid credentials
    pub fn refuse_next_login(&self) {
        self.state.lock().unwrap().refusals += 1;
    }

    /// Hold every login page response for `delay` before serving it
    pub fn delay_pages(&self, delay: Duration) {
        *self.page_delay.lock().unwrap() = delay;
    }

    /// Reject every request at the transport level while `down` is set
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Requests rejected while down
    pub fn rejected_requests(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn page(&self, request: &HttpRequest) -> HttpResponse {
        let mut state = self.state.lock().unwrap();
        state.pages_served += 1;
        state.calls.push(Call {
            function: "GET".into(),
            counter: None,
            payload: Value::String(request.url.clone()),
            cookies: request.cookies.clone(),
        });

        if self.options.ip_suspended {
            return html("<html><body><p>Votre adresse IP est provisoirement suspendue</p></body></html>");
        }
        if state.pages_served <= self.options.malformed_pages {
            return html(r#"<html><body id="id_body" onload="try { Start ({a:3,d:false}) } catch (e) {}"></body></html>"#);
        }

        state.session = state.next_session;
        state.next_session += 1;
        state.key = derive_key(&[]);
        state.iv = [0u8; 16];
        state.auth_key = None;
        state.expected_counter = 1;
        state.mobile_login = false;

        let mut attributes = format!("h:'{}',a:3,d:false", state.session);
        if self.options.encrypt {
            attributes.push_str(",CrA:true");
        }
        if self.options.compress {
            attributes.push_str(",CoA:true");
        }
        if let Some((e, f)) = &self.options.ent {
            attributes.push_str(&format!(",e:'{e}',f:'{f}'"));
        }
        let mut response = html(&format!(
            r#"<html><body id="id_body" onload="try {{ Start ({{{attributes}}}) }} catch (e) {{ messageErreur(e) }}"></body></html>"#
        ));
        response.set_cookies = vec![format!("JSESSIONID=s{}; Path=/; HttpOnly", state.session)];
        response
    }

    fn call(&self, request: &HttpRequest) -> pronote::Result<HttpResponse> {
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap_or("null"))?;
        let function = body["id"].as_str().unwrap_or_default().to_string();
        let no = body["no"].as_str().unwrap_or_default().to_string();

        let mut state = self.state.lock().unwrap();

        if !request.url.ends_with(&format!("/appelfonction/3/{}/{}", state.session, no)) {
            state.counter_mismatches.push(format!("{function}: bad url {}", request.url));
        }
        if body["session"].as_i64() != Some(state.session) {
            state.counter_mismatches.push(format!("{function}: bad session {}", body["session"]));
        }

        let counter = hex::decode(&no)
            .ok()
            .and_then(|raw| aes_decrypt(&state.key, &state.iv, &raw).ok())
            .and_then(|plain| String::from_utf8(plain).ok())
            .and_then(|text| text.parse::<u64>().ok());
        if counter != Some(state.expected_counter) {
            let expected = state.expected_counter;
            state
                .counter_mismatches
                .push(format!("{function}: counter {counter:?}, expected {expected}"));
        }
        state.expected_counter += 2;

        let payload = self.open_payload(&state, &body["dataSec"])?;
        state.calls.push(Call {
            function: function.clone(),
            counter,
            payload: payload.clone(),
            cookies: request.cookies.clone(),
        });

        if let Some(idx) = state.failures.iter().position(|(f, _)| *f == function) {
            if let Some((_, failure)) = state.failures.remove(idx) {
                return Ok(match failure {
                    Failure::Erreur(code) => json_response(
                        json!({"Erreur": {"G": code, "Titre": "injected failure"}}),
                    ),
                    Failure::Status(status) => HttpResponse {
                        status,
                        ..Default::default()
                    },
                });
            }
        }

        let data = &payload["data"];
        let mut next_key = None;
        let reply = match function.as_str() {
            "FonctionParametres" => {
                let uuid = data["Uuid"].as_str().unwrap_or_default();
                let iv_temp = BASE64.decode(uuid).map_err(|e| PronoteError::api(e.to_string()))?;
                state.uuid_lengths.push(iv_temp.len());
                state.iv = derive_key(&iv_temp);
                json!({
                    "identifiantNav": CLIENT_IDENTIFIER,
                    "General": {
                        "PremierLundi": {"_T": 7, "V": "02/09/2024"},
                        "ListePeriodes": [
                            {"N": "1A", "L": "Trimestre 1", "dateDebut": {"V": "02/09/2024"}, "dateFin": {"V": "30/11/2024"}},
                            {"N": "2A", "L": "Trimestre 2", "dateDebut": {"V": "01/12/2024"}, "dateFin": {"V": "28/02/2025"}}
                        ]
                    }
                })
            }
            "Identification" => {
                state.last_identifiant = data["identifiant"].as_str().map(str::to_owned);
                state.mobile_login = data["demandeConnexionAppliMobile"] == json!(true)
                    || data["enConnexionAppliMobile"] == json!(true);
                let auth_key = if data["pourENT"] == json!(true) {
                    let (_, f) = self.options.ent.clone().unwrap_or_default();
                    derive_auth_key("", &f, "", false, false, true)
                } else {
                    derive_auth_key(
                        &self.options.username,
                        &state.password,
                        &self.options.alea,
                        false,
                        false,
                        false,
                    )
                };
                state.auth_key = Some(auth_key);
                let challenge = hex::encode_upper(aes_encrypt(&auth_key, &state.iv, CHALLENGE.as_bytes()));
                json!({
                    "challenge": challenge,
                    "alea": self.options.alea,
                    "modeCompLog": self.options.fold_username,
                    "modeCompMdp": self.options.fold_password,
                })
            }
            "Authentification" => {
                let auth_key = state.auth_key.unwrap_or_default();
                let expected = hex::encode(aes_encrypt(&auth_key, &state.iv, SOLVED.as_bytes()));
                let refused_once = state.refusals > 0;
                if refused_once {
                    state.refusals -= 1;
                }
                if self.options.refuse_login
                    || refused_once
                    || data["challenge"].as_str() != Some(expected.as_str())
                {
                    json!({"Acces": 1})
                } else {
                    let cle = hex::encode(aes_encrypt(&auth_key, &state.iv, KEY_MATERIAL.as_bytes()));
                    let mut reply = json!({
                        "cle": cle,
                        "derniereConnexion": {"_T": 24, "V": "15/09/2024 08:30:00"},
                    });
                    if let Some(actions) = &self.options.double_auth {
                        reply["actionsDoubleAuth"] = json!({"_T": 26, "V": actions});
                    }
                    if state.mobile_login {
                        if let Some(token) = &self.options.mobile_token {
                            reply["jetonConnexionAppliMobile"] = json!(token);
                            state.password = token.clone();
                        }
                    }
                    next_key = Some(session_key());
                    reply
                }
            }
            "SecurisationCompteDoubleAuth" => match data["action"].as_i64() {
                Some(0) => {
                    let pin = data["codePin"]
                        .as_str()
                        .and_then(|code| hex::decode(code).ok())
                        .and_then(|raw| aes_decrypt(&state.key, &state.iv, &raw).ok())
                        .and_then(|plain| String::from_utf8(plain).ok());
                    json!({"result": pin.is_some() && pin == self.options.pin})
                }
                _ => {
                    state.registered_device = data["strIdentification"].as_str().map(str::to_owned);
                    json!({})
                }
            },
            "ParametresUtilisateur" => json!({
                "ressource": {"N": "42#fake", "L": "DEMO User", "classeDEleve": {"L": "3A"}},
                "listeOnglets": [{"G": 7, "Onglet": [{"G": 16}, {"G": 49}]}, {"G": 88}]
            }),
            "PageInfosPerso" => json!({"securisation": {"mode": self.options.security_mode}}),
            "JetonAppliMobile" => json!({"jeton": "qr-jeton", "login": "qr-login"}),
            other => json!({"echo": other}),
        };

        let sealed = self.seal(&state, &json!({ "data": reply }))?;
        if let Some(key) = next_key {
            state.key = key;
        }
        Ok(json_response(json!({"nom": function, "dataSec": sealed})))
    }

    fn open_payload(&self, state: &ServerState, data_sec: &Value) -> pronote::Result<Value> {
        if !self.options.encrypt && !self.options.compress {
            return Ok(data_sec.clone());
        }
        let mut bytes = hex::decode(data_sec.as_str().unwrap_or_default())?;
        if self.options.encrypt {
            bytes = aes_decrypt(&state.key, &state.iv, &bytes)?;
        }
        if self.options.compress {
            let hexed = decompress_to_vec(&bytes).map_err(|e| PronoteError::api(format!("{e:?}")))?;
            bytes = hex::decode(hexed)?;
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn seal(&self, state: &ServerState, payload: &Value) -> pronote::Result<Value> {
        if !self.options.encrypt && !self.options.compress {
            return Ok(payload.clone());
        }
        let mut bytes = serde_json::to_vec(payload)?;
        if self.options.compress {
            bytes = compress_to_vec(&bytes, 6);
        }
        if self.options.encrypt {
            bytes = aes_encrypt(&state.key, &state.iv, &bytes);
        }
        Ok(Value::String(hex::encode_upper(bytes)))
    }
}

#[async_trait]
impl Transport for FakePronote {
    async fn send(&self, request: HttpRequest) -> pronote::Result<HttpResponse> {
        if self.down.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(PronoteError::api("connection refused"));
        }
        if request.method == Method::Get {
            let delay = *self.page_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        match request.method {
            Method::Get => Ok(self.page(&request)),
            Method::Post => self.call(&request),
        }
    }
}

/// Key both sides derive from [`KEY_MATERIAL`]
pub fn session_key() -> AesKey {
    let bytes: Vec<u8> = KEY_MATERIAL
        .split(',')
        .map(|n| n.parse::<i32>().unwrap() as u8)
        .collect();
    derive_key(&bytes)
}

fn html(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        body: body.as_bytes().to_vec(),
        ..Default::default()
    }
}

fn json_response(value: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        body: value.to_string().into_bytes(),
        ..Default::default()
    }
}

/// Builder wired to `server`, with protocol traces silenced
pub fn builder(server: &Arc<FakePronote>, credentials: Credentials) -> ClientBuilder {
    ClientBuilder::new(URL, credentials)
        .config(ClientConfig::default())
        .transport(server.clone())
        .logger(LoggerHandle::null())
}

pub fn credentials() -> Credentials {
    Credentials::new(USERNAME, PASSWORD)
}
