use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{ChannelKind, RoomId, SessionError};
use crate::ws::{ChannelHandle, Transport};

/// Failures collected while tearing down. Logged, never returned as errors.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub failures: Vec<SessionError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: &'static str, outcome: Result<(), SessionError>) {
        if let Err(e) = outcome {
            let failure = SessionError::TeardownFailure {
                step,
                reason: e.to_string(),
            };
            warn!("{}", failure);
            self.failures.push(failure);
        }
    }
}

/// Ordered release of everything one connect established.
///
/// Handles are optional because a connect can fail between the two joins;
/// leave and destroy only ever run for channels that were actually joined.
pub struct Teardown {
    room: RoomId,
    transport: Arc<dyn Transport>,
    cleanup_rooms: bool,
    pub(crate) persistent: Option<Box<dyn ChannelHandle>>,
    pub(crate) ephemeral: Option<Box<dyn ChannelHandle>>,
}

impl Teardown {
    pub fn new(room: RoomId, transport: Arc<dyn Transport>, cleanup_rooms: bool) -> Self {
        Self {
            room,
            transport,
            cleanup_rooms,
            persistent: None,
            ephemeral: None,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn joined(&self) -> Vec<ChannelKind> {
        let mut kinds = Vec::new();
        if self.persistent.is_some() {
            kinds.push(ChannelKind::Persistent);
        }
        if self.ephemeral.is_some() {
            kinds.push(ChannelKind::Ephemeral);
        }
        kinds
    }

    /// Every step is attempted even when an earlier one fails.
    pub async fn run(self) -> TeardownReport {
        let mut report = TeardownReport::default();
        info!("Tearing down session for room {}", self.room);

        // Presence first so peers stop seeing us right away
        if let Some(ephemeral) = &self.ephemeral {
            report.record("leave-ephemeral", ephemeral.leave().await);
        }
        if let Some(persistent) = &self.persistent {
            report.record("leave-persistent", persistent.leave().await);
        }
        if let Some(persistent) = &self.persistent {
            report.record("destroy-persistent-handle", persistent.destroy().await);
        }
        if let Some(ephemeral) = &self.ephemeral {
            report.record("destroy-ephemeral-handle", ephemeral.destroy().await);
        }

        // Only after both leaves have been sent
        if self.cleanup_rooms {
            report.record(
                "cleanup-persistent-room",
                self.transport.cleanup_room(&self.room, ChannelKind::Persistent).await,
            );
            report.record(
                "cleanup-ephemeral-room",
                self.transport.cleanup_room(&self.room, ChannelKind::Ephemeral).await,
            );
        }

        // The steps above need the connection alive
        report.record("destroy-connection", self.transport.destroy().await);

        if report.is_clean() {
            info!("Session for room {} torn down", self.room);
        } else {
            warn!(
                "Session for room {} torn down with {} failed step(s)",
                self.room,
                report.failures.len()
            );
        }
        report
    }
}
