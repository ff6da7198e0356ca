use pronote::Client;

/// Log who we are and what the session exposes
pub async fn log_summary(client: &Client) -> Result<(), Box<dyn std::error::Error>> {
    let info = client.user_info().await?;
    tracing::info!("👤 {} ({})", info.name, info.id);
    if let Some(class_name) = &info.class_name {
        tracing::info!("   Class: {}", class_name);
    }
    if let Some(establishment) = &info.establishment {
        tracing::info!("   Establishment: {}", establishment);
    }
    if let Some(last) = client.last_connection().await {
        tracing::info!("   Last connection: {}", last.format("%Y-%m-%d %H:%M"));
    }

    let scope = client.permission_scope().await;
    let tabs: Vec<String> = scope.iter().map(|t| t.to_string()).collect();
    tracing::info!("🔑 {} authorized tabs: {}", scope.len(), tabs.join(", "));

    let now = chrono::Local::now().naive_local();
    let periods = client.periods().await;
    for period in periods.iter() {
        let marker = if period.contains(now) { "▶" } else { " " };
        tracing::info!(
            "{} {} [{}] {} → {}",
            marker,
            period.name,
            period.id,
            period.start.format("%d/%m/%Y"),
            period.end.format("%d/%m/%Y")
        );
    }

    match client.current_week().await {
        Ok(week) => tracing::info!("📅 School week {}", week),
        Err(e) => tracing::warn!("Could not compute the school week: {}", e),
    }
    tracing::info!("Request counter at {}", client.request_counter().await);
    Ok(())
}
