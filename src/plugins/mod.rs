//! Plugin contracts for the scope loader
//!
//! A [`Plugin`] is a stateless strategy: applying it to a scope with a
//! configuration produces a [`PluginInstance`], the live state owned by a
//! fork. Resolution from a configuration name to a plugin goes through a
//! [`PluginResolver`]; failure to resolve is an ordinary `None`.

pub mod context;
pub mod registry;

pub use context::{ForkUpdater, PluginContext, SelfUpdate};
pub use registry::{DEFAULT_PREFIX, PluginRegistry};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// A loadable plugin implementation
pub trait Plugin: Send + Sync {
    /// Canonical plugin name
    fn name(&self) -> &str;

    /// Validate `config` and fill in defaults before it is applied
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is not acceptable
    fn resolve_config(&self, config: Value) -> Result<Value> {
        Ok(config)
    }

    /// Strip default-valued fields before a config is persisted
    fn simplify(&self, config: &Value) -> Value {
        config.clone()
    }

    /// Start a new instance on the scope described by `ctx`
    ///
    /// # Errors
    ///
    /// Returns error if the instance cannot be started
    fn apply(&self, ctx: &PluginContext, config: &Value) -> Result<Box<dyn PluginInstance>>;
}

/// How an instance handled a configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The instance took the new configuration in place
    Applied,
    /// The instance must be disposed and re-applied
    Restart,
}

/// A running plugin instance owned by a fork
pub trait PluginInstance: Send {
    /// Accept a new effective configuration
    ///
    /// Instances that cannot reconfigure themselves keep the default, which
    /// asks the loader to restart them on the same fork.
    fn update(&mut self, config: &Value) -> UpdateOutcome {
        let _ = config;
        UpdateOutcome::Restart
    }

    /// Release resources; called exactly once
    fn dispose(&mut self) {}
}

/// Name-to-plugin resolution
#[async_trait]
pub trait PluginResolver: Send + Sync {
    /// Resolve a configuration name to a canonical plugin identifier
    async fn resolve(&self, name: &str) -> Option<String>;

    /// Resolve a configuration name to a plugin implementation
    async fn resolve_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>>;
}
