use crate::config::RunSettings;
use crate::event::cancellation::CancellationToken;
use crate::notify::NotificationBuffer;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything a check needs to know about the run it is part of.
#[derive(Clone)]
pub struct RunContext {
    workspace: String,
    settings: RunSettings,
    cancellation: CancellationToken,
    notifications: Arc<NotificationBuffer>,
    started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(
        workspace: String,
        settings: RunSettings,
        cancellation: CancellationToken,
        notifications: Arc<NotificationBuffer>,
    ) -> Self {
        Self {
            workspace,
            settings,
            cancellation,
            notifications,
            started_at: Utc::now(),
        }
    }

    /// Name of the namespace the check works in.
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn debug(&self) -> bool {
        self.settings.debug
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    pub fn cluster_name(&self) -> &str {
        &self.settings.cluster_name
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn notifications(&self) -> &Arc<NotificationBuffer> {
        &self.notifications
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Logs the message and adds it to the run notification.
    pub fn notify(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{message}");
        self.notifications.add_message(message);
    }
}
