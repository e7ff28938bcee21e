use dotenvy::dotenv;
use oxide_relay::config::Settings;
use oxide_relay::logging::init_logging;
use oxide_relay::relay::Relay;
use oxide_relay::server::{build_router, AppState};
use oxide_relay::telegram::{SessionStore, TelegramConnector};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    init_logging();

    info!("Starting Oxide relay...");

    let settings = init_settings();

    let store = SessionStore::new(settings.sessions_dir.clone());
    let connector = TelegramConnector::new(
        store,
        settings.telegram_api_url.as_deref(),
        settings.upload_timeout(),
    )?;
    let relay = Arc::new(Relay::new(Arc::new(connector), settings.relay_config()));

    let state = AppState::new(relay, settings.keep_uploads, settings.background_delivery);
    let app = build_router(state);

    let addr = settings.bind_address()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        max_file_size_mb = oxide_relay::utils::bytes_to_mb(settings.max_file_size_bytes),
        upload_dir = %settings.upload_dir.display(),
        "Relay is listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay stopped");
    Ok(())
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        // Keep serving; the process can still be killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining requests...");
}
