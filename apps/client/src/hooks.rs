#[cfg(test)]
use std::sync::Mutex;

use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Error,
}

/// Receives user-facing messages produced by the client. Rendering is the
/// sink's business; the client only decides what to say and when.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotificationLevel, message: &str);
}

/// Invoked after the token has been cleared on a 401, before the caller sees
/// `FetchError::AuthExpired`. Typically redirects to a login surface.
pub trait AuthExpiredHandler: Send + Sync {
    fn on_auth_expired(&self);
}

impl<F> AuthExpiredHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_auth_expired(&self) {
        self()
    }
}

/// Routes notifications into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Success => info!("{message}"),
            NotificationLevel::Error => error!("{message}"),
        }
    }
}

/// Keeps every notification in order so tests can assert on them.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    entries: Mutex<Vec<(NotificationLevel, String)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(NotificationLevel, String)> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((level, message.to_string()));
    }
}
