//! End-of-run notifications.
//!
//! Messages are buffered while a check runs and flushed as a single notification when it ends,
//! either normally or because it was interrupted.
pub mod chatwork;

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Tokyo;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("could not build the notification client: {0}")]
    Build(String),
    #[error("could not send the notification: {0}")]
    Send(String),
    #[error("notification rejected with status {0}")]
    Status(u16),
}

/// Delivers a notification message somewhere people look at.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationTransport: Send + Sync {
    fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Thread-safe accumulator of the messages of a run.
pub struct NotificationBuffer {
    messages: Mutex<String>,
    transport: Option<Box<dyn NotificationTransport>>,
}

impl NotificationBuffer {
    pub fn new(transport: Box<dyn NotificationTransport>) -> Self {
        Self {
            messages: Mutex::default(),
            transport: Some(transport),
        }
    }

    /// Buffer whose messages only end up in the logs.
    pub fn log_only() -> Self {
        Self {
            messages: Mutex::default(),
            transport: None,
        }
    }

    /// Appends a line to the buffer.
    pub fn add_message(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let mut messages = self.lock();
        messages.push_str(message);
        if !message.ends_with('\n') {
            messages.push('\n');
        }
    }

    pub fn contents(&self) -> String {
        self.lock().clone()
    }

    /// Sends the buffered messages and empties the buffer.
    ///
    /// Nothing is sent when the buffer is empty. Delivery failures are logged and do not change
    /// the outcome of the run.
    pub fn send(&self) {
        let message = std::mem::take(&mut *self.lock());
        if message.is_empty() {
            debug!("No messages to notify");
            return;
        }

        match &self.transport {
            None => info!("Notification not sent, no transport configured:\n{message}"),
            Some(transport) => match transport.send(&message) {
                Ok(()) => info!("Notification sent"),
                Err(err) => error!("Error sending notification: {err}"),
            },
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// First line of every notification.
pub fn start_message(cluster_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "kibertas start in {cluster_name} at {}",
        now.with_timezone(&Tokyo).format("%Y-%m-%d %H:%M:%S")
    )
}
