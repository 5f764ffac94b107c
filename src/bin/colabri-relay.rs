use colabri_session::config::Config;
use colabri_session::server;
use colabri_session::services::room_service::RoomRegistry;
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "colabri_session=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting relay...");

    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    if config.is_production() {
        warn!("The relay keeps rooms in memory only and is meant for development");
    }

    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind relay to {}: {}", config.server_address(), e);
            std::process::exit(1);
        }
    };

    info!("Health available at http://{}/api/health", config.server_address());
    if let Err(e) = server::serve(listener, Arc::new(RoomRegistry::new())).await {
        error!("Relay stopped: {}", e);
    }
}
