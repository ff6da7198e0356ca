mod modules {
    pub mod session;
    pub mod settings;
    pub mod summary;
}

use pronote::ClientBuilder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    let mut _guard = None;

    if std::env::var("CLIENT_LOG").unwrap_or_default() == "true" {
        let file_appender = tracing_appender::rolling::RollingFileAppender::new(
            tracing_appender::rolling::Rotation::DAILY,
            "./logs",
            "pronote-client.log"
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::writer::MakeWriterExt::and(non_blocking, std::io::stdout))
            .with_target(false)
            .with_env_filter("info")
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%dT%H:%M:%S".to_string()))
            .init();

        _guard = Some(guard);
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_env_filter("info")
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%dT%H:%M:%S".to_string()))
            .init();
    }

    tracing::info!("Starting pronote client\n");

    let settings = modules::settings::from_env()?;

    tracing::info!("Step 1: Bootstrapping and logging in...");
    let client = match ClientBuilder::new(settings.url.clone(), settings.credentials)
        .config(settings.config)
        .connect()
        .await
    {
        Ok(client) => client,
        Err(e) => {
            e.log_event();
            tracing::error!("❌ Connection failed: {}", e);
            return Err(e.into());
        }
    };

    if !client.logged_in().await {
        tracing::error!("❌ Login refused: check the username and password");
        return Err("login refused".into());
    }
    tracing::info!("");

    tracing::info!("Step 2: Session summary...");
    modules::summary::log_summary(&client).await?;
    tracing::info!("");

    if settings.keepalive_secs > 0 {
        tracing::info!("Step 3: Keep-alive...");
        modules::session::hold(&client, settings.keepalive_secs).await?;
        tracing::info!("");
    }

    if let Some(path) = settings.export_path.as_deref() {
        tracing::info!("Step 4: Exporting credentials...");
        modules::session::export(&client, path).await?;
        tracing::info!("");
    }

    tracing::info!("✅ Done");
    Ok(())
}
