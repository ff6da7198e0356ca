use std::time::Duration;

use pronote::Client;

/// Keep the session alive in the background for `secs` seconds
pub async fn hold(client: &Client, secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Holding the session for {}s...", secs);
    let keep_alive = client.keep_alive();
    tokio::time::sleep(Duration::from_secs(secs)).await;
    keep_alive.stop().await;

    let refreshed = client.session_check().await?;
    if refreshed {
        tracing::info!("🔄 Session was refreshed while idle");
    } else {
        tracing::info!("✅ Session still alive");
    }
    Ok(())
}

/// Save what a token login needs to resume this session
pub async fn export(client: &Client, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let export = client.export_credentials().await;
    export.save(path)?;
    if export.client_identifier.is_none() {
        tracing::warn!("Export has no client identifier; the next login will look like a new device");
    }
    Ok(())
}
