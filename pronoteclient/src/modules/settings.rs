use pronote::{ClientConfig, Credentials, LoginMode};

/// Run settings read from the environment
pub struct Settings {
    pub url: String,
    pub credentials: Credentials,
    pub config: ClientConfig,
    pub export_path: Option<String>,
    pub keepalive_secs: u64,
}

fn required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(name).map_err(|_| format!("{name} is not set").into())
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn from_env() -> Result<Settings, Box<dyn std::error::Error>> {
    let url = required("PRONOTE_URL")?;
    let mode: LoginMode = optional("PRONOTE_MODE").unwrap_or_default().parse()?;

    let uuid = optional("PRONOTE_UUID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut credentials = Credentials::new(required("PRONOTE_USERNAME")?, required("PRONOTE_PASSWORD")?)
        .mode(mode)
        .uuid(uuid);
    if let Some(pin) = optional("PRONOTE_PIN") {
        credentials = credentials.account_pin(pin);
    }
    if let Some(device) = optional("PRONOTE_DEVICE") {
        credentials = credentials.device_name(device);
    }

    let keepalive_secs = optional("PRONOTE_KEEPALIVE_SECS")
        .map(|v| v.parse::<u64>())
        .transpose()?
        .unwrap_or(0);

    tracing::info!("Target: {} (mode {})", url, mode.as_str());
    Ok(Settings {
        url,
        credentials,
        config: ClientConfig::from_env(),
        export_path: optional("PRONOTE_EXPORT"),
        keepalive_secs,
    })
}
