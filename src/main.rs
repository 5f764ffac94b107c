use clap::Parser;
use colabri_session::clients::{HttpMetadataSource, MetadataSource};
use colabri_session::config::Config;
use colabri_session::ws::WsConnector;
use colabri_session::{DocumentIdentity, Evaluation, SessionConfig, SessionManager, SessionState, UserIdentity};
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Mount a collaboration session for one document and follow it until Ctrl-C
#[derive(Parser, Debug)]
#[command(name = "colabri-session", version)]
struct Args {
    /// Organization owning the document
    org_id: String,
    /// Document id
    doc_id: String,
    /// User to participate as
    #[arg(long)]
    user: String,
    /// Display name shown to other participants
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "colabri_session=debug,info".into()))
        .init();

    let args = Args::parse();

    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let identity = DocumentIdentity::new(args.org_id, args.doc_id);
    let mut user = UserIdentity::new(args.user);
    if let Some(name) = args.name {
        user = user.with_name(name);
    }

    let metadata = match HttpMetadataSource::from_config(&config) {
        Ok(source) => match source.fetch(&identity).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("Failed to fetch metadata for {}: {}", identity.room_id(), e);
                None
            }
        },
        Err(e) => {
            error!("Metadata source unavailable: {}", e);
            None
        }
    };

    let session = SessionManager::new(
        SessionConfig::from(&config),
        Arc::new(WsConnector::from_config(&config)),
    );
    let mut context = session.subscribe();

    match session.evaluate(metadata.as_ref(), Some(&user), &identity.room_id()) {
        Evaluation::Started => info!("Connecting to {}", config.collab_ws_url),
        Evaluation::AlreadyStarted => {}
        Evaluation::Ineligible(reason) => {
            warn!("Document {} is not collaborative: {:?}", identity.room_id(), reason);
            return;
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted while connecting");
            session.teardown().await;
            return;
        }
        state = session.wait_settled() => {
            if let SessionState::Failed(e) = state {
                error!("Session failed: {}", e);
                return;
            }
        }
    }

    if let Some(document) = context.document() {
        info!(
            "Connected to '{}' ({}), {} other participant(s) present",
            document.metadata.name,
            document.metadata.kind,
            document.presence.peers().len()
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving the document");
                break;
            }
            alive = context.changed() => {
                if !alive || !context.is_connected() {
                    info!("Document view retracted");
                    break;
                }
            }
        }
    }

    session.teardown().await;
}
