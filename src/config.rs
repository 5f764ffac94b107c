use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::models::DocumentKind;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Relay host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Collaboration server endpoint used by sessions
    #[serde(default = "default_collab_ws_url")]
    pub collab_ws_url: String,

    /// Base URL of the document metadata API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token sent to the metadata API and on the WebSocket handshake
    pub auth_token: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_presence_timeout_ms")]
    pub presence_timeout_ms: u64,

    /// Comma separated document kinds that get a collaboration session
    #[serde(default = "default_collaborative_kinds")]
    pub collaborative_kinds: String,

    #[serde(default = "default_cleanup_rooms_on_teardown")]
    pub cleanup_rooms_on_teardown: bool,

    #[serde(default = "default_metadata_cache_ttl_secs")]
    pub metadata_cache_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full relay address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    /// Parse `collaborative_kinds`. Unknown entries are skipped with a warning.
    pub fn collaborative_kinds(&self) -> Vec<DocumentKind> {
        self.collaborative_kinds
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| match DocumentKind::parse(s) {
                DocumentKind::Other => {
                    warn!("Ignoring unknown collaborative kind '{}'", s);
                    None
                }
                kind => Some(kind),
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            collab_ws_url: default_collab_ws_url(),
            api_url: default_api_url(),
            auth_token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            presence_timeout_ms: default_presence_timeout_ms(),
            collaborative_kinds: default_collaborative_kinds(),
            cleanup_rooms_on_teardown: default_cleanup_rooms_on_teardown(),
            metadata_cache_ttl_secs: default_metadata_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_collab_ws_url() -> String {
    "ws://localhost:3001/ws".to_string()
}

fn default_api_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_join_timeout_ms() -> u64 {
    10_000
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_presence_timeout_ms() -> u64 {
    30_000
}

fn default_collaborative_kinds() -> String {
    "colab-statement".to_string()
}

fn default_cleanup_rooms_on_teardown() -> bool {
    true
}

fn default_metadata_cache_ttl_secs() -> u64 {
    60
}
