//! Per-activation context handed to plugins

use serde_json::Value;
use tokio::sync::mpsc;

use crate::scope::{ForkId, ScopeId};

/// A configuration change reported by an instance about itself
#[derive(Debug, Clone, PartialEq)]
pub struct SelfUpdate {
    /// Fork whose instance reported the change
    pub fork: ForkId,
    /// The instance's new configuration
    pub config: Value,
}

/// Handle an instance uses to push its own configuration upward
///
/// Updates are queued and applied by the loader on its next
/// [`flush_self_updates`](crate::Loader::flush_self_updates) or
/// [`update_config`](crate::Loader::update_config).
#[derive(Debug, Clone)]
pub struct ForkUpdater {
    fork: ForkId,
    tx: mpsc::UnboundedSender<SelfUpdate>,
}

impl ForkUpdater {
    pub(crate) const fn new(fork: ForkId, tx: mpsc::UnboundedSender<SelfUpdate>) -> Self {
        Self { fork, tx }
    }

    /// Fork this handle reports for
    #[must_use]
    pub const fn fork(&self) -> ForkId {
        self.fork
    }

    /// Queue a self-update, returning false if the loader is gone
    pub fn update(&self, config: Value) -> bool {
        self.tx
            .send(SelfUpdate {
                fork: self.fork,
                config,
            })
            .is_ok()
    }
}

/// Where and as what a plugin instance is being activated
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub(crate) fork: ForkId,
    pub(crate) scope: ScopeId,
    pub(crate) key: String,
    pub(crate) alias: String,
    pub(crate) label: Option<String>,
    pub(crate) isolate: Vec<String>,
    pub(crate) updater: ForkUpdater,
}

impl PluginContext {
    /// Fork that will own the instance
    #[must_use]
    pub const fn fork(&self) -> ForkId {
        self.fork
    }

    /// Scope the instance is activated on
    #[must_use]
    pub const fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Configuration key of the entry
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Alias part of the key (`name:alias`), empty if none
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Nearest `$label` on this scope or its ancestors
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Names isolated on this scope (`$isolate`)
    #[must_use]
    pub fn isolated(&self) -> &[String] {
        &self.isolate
    }

    /// Handle for reporting configuration changes made by the instance
    #[must_use]
    pub fn updater(&self) -> ForkUpdater {
        self.updater.clone()
    }
}
