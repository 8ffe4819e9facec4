//! Loader audit trail
//!
//! Every apply, reload and unload is logged through `tracing` and broadcast
//! to subscribers as a [`LoaderEvent`]. Broadcasting is best-effort: having
//! no receivers, or a lagging one, never affects reconciliation.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::scope::ForkId;

/// Buffered events per subscriber before it starts lagging
const CHANNEL_CAPACITY: usize = 256;

/// A change to the set of live forks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoaderEvent {
    /// A fork was created for `key`
    Apply { key: String, fork: ForkId },
    /// The fork at `key` took a new configuration
    Reload { key: String, fork: ForkId },
    /// The fork at `key` was disposed
    Unload { key: String, fork: ForkId },
}

impl LoaderEvent {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Apply { key, .. } | Self::Reload { key, .. } | Self::Unload { key, .. } => key,
        }
    }

    #[must_use]
    pub const fn fork(&self) -> ForkId {
        match self {
            Self::Apply { fork, .. } | Self::Reload { fork, .. } | Self::Unload { fork, .. } => {
                *fork
            }
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Apply { .. } => "apply",
            Self::Reload { .. } => "reload",
            Self::Unload { .. } => "unload",
        }
    }
}

impl fmt::Display for LoaderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} plugin {}", self.as_str(), self.key())
    }
}

/// Fan-out of loader events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LoaderEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Receive every event emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.tx.subscribe()
    }

    /// Log `event` and hand it to current subscribers
    pub fn emit(&self, event: LoaderEvent, label: Option<&str>) {
        let key = event.key();
        let fork = event.fork();
        let label = label.unwrap_or_default();
        match &event {
            LoaderEvent::Apply { .. } => tracing::info!(key = %key, %fork, label, "apply plugin"),
            LoaderEvent::Reload { .. } => tracing::info!(key = %key, %fork, label, "reload plugin"),
            LoaderEvent::Unload { .. } => tracing::info!(key = %key, %fork, label, "unload plugin"),
        }
        let _ = self.tx.send(event);
    }
}
