pub mod context;
pub mod eligibility;
pub mod manager;
pub mod teardown;

use std::time::Duration;

use crate::config::Config;
use crate::models::DocumentKind;

pub use context::SessionContext;
pub use eligibility::Ineligible;
pub use manager::{Evaluation, SessionManager, SessionState};
pub use teardown::{Teardown, TeardownReport};

/// Runtime settings of a session manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub join_timeout: Duration,
    pub presence_timeout_ms: u64,
    pub collaborative_kinds: Vec<DocumentKind>,
    /// Send room cleanup requests during teardown
    pub cleanup_rooms: bool,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
            presence_timeout_ms: 30_000,
            collaborative_kinds: vec![DocumentKind::ColabStatement],
            cleanup_rooms: true,
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.collab_ws_url.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
            presence_timeout_ms: config.presence_timeout_ms,
            collaborative_kinds: config.collaborative_kinds(),
            cleanup_rooms: config.cleanup_rooms_on_teardown,
        }
    }
}
