//! Loader orchestration
//!
//! The [`Loader`] owns the root configuration, the runtime [`ScopeTree`] and
//! the collaborators used to resolve plugins and persist configuration. The
//! whole plugin tree hangs off a single synthetic group entry, `group:entry`,
//! whose configuration is the root's `plugins` field.

mod group;
mod reconcile;
mod update;

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};

use crate::config::{AppConfig, ConfigStore, PLUGINS_KEY};
use crate::events::{EventBus, LoaderEvent};
use crate::interpolate::Interpolator;
use crate::plugins::{ForkUpdater, PluginContext, PluginResolver, SelfUpdate};
use crate::scope::{Fork, ForkId, ScopeId, ScopeTree};
use crate::{Error, Result};

/// Record key of the root group
pub const ENTRY_KEY: &str = "group:entry";

type FullReload = Box<dyn Fn() + Send + Sync>;

/// Reconciles a live plugin tree against a changing configuration
pub struct Loader {
    store: Arc<dyn ConfigStore>,
    resolver: Arc<dyn PluginResolver>,
    config: Value,
    tree: ScopeTree,
    interpolator: Interpolator,
    writable: bool,
    running: bool,
    entry: Option<ScopeId>,
    events: EventBus,
    updates_tx: mpsc::UnboundedSender<SelfUpdate>,
    updates_rx: mpsc::UnboundedReceiver<SelfUpdate>,
    full_reload: Option<FullReload>,
}

impl Loader {
    /// Create a loader reading its root configuration from `store`
    ///
    /// Interpolation is disabled when the store is not writable.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot be read or is not a mapping
    pub fn new(store: Arc<dyn ConfigStore>, resolver: Arc<dyn PluginResolver>) -> Result<Self> {
        let config = store.read_config()?;
        let app = AppConfig::from_value(&config)?;
        let writable = store.writable();
        tracing::debug!(
            name = app.name.as_deref().unwrap_or_default(),
            plugins = app.plugin_count(),
            writable,
            "loader configured"
        );

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Ok(Self {
            store,
            resolver,
            config,
            tree: ScopeTree::new(Value::Null),
            interpolator: Interpolator::new(writable),
            writable,
            running: false,
            entry: None,
            events: EventBus::new(),
            updates_tx,
            updates_rx,
            full_reload: None,
        })
    }

    /// Bind a top-level name for template expressions
    pub fn set_env(&mut self, name: impl Into<String>, value: Value) {
        self.interpolator.set(name, value);
    }

    /// Expose the process environment to templates as `env`
    pub fn with_process_env(&mut self) {
        let vars: Map<String, Value> = std::env::vars()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        self.set_env("env", Value::Object(vars));
    }

    /// Register the hook run after the root scope is disposed
    pub fn on_full_reload(&mut self, hook: impl Fn() + Send + Sync + 'static) {
        self.full_reload = Some(Box::new(hook));
    }

    /// Receive apply, reload and unload events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    /// Raw (uninterpolated) root configuration
    #[must_use]
    pub const fn config(&self) -> &Value {
        &self.config
    }

    #[must_use]
    pub const fn tree(&self) -> &ScopeTree {
        &self.tree
    }

    #[must_use]
    pub const fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    /// Whether [`create_app`](Self::create_app) has run and the root is live
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Scope of the root group, once bootstrapped
    #[must_use]
    pub const fn entry(&self) -> Option<ScopeId> {
        self.entry
    }

    /// Find a fork by its chain of keys below the root group
    #[must_use]
    pub fn lookup(&self, path: &[&str]) -> Option<ForkId> {
        let mut scope = self.entry?;
        let mut found = None;
        for key in path {
            let fork = self.tree.child(scope, key)?;
            scope = self.tree.fork(fork)?.scope();
            found = Some(fork);
        }
        found
    }

    /// Bootstrap the plugin tree from the root configuration
    ///
    /// Yields to the runtime once first so that surrounding setup finishes
    /// before the tree is built. Returns the entry scope.
    ///
    /// # Errors
    ///
    /// Returns error if the loader already runs, if a root field outside
    /// `plugins` fails to interpolate, or if any entry fails to reconcile
    pub async fn create_app(&mut self) -> Result<ScopeId> {
        tokio::task::yield_now().await;
        if self.running {
            return Err(Error::Bootstrap("application already created".to_string()));
        }

        let root_config = self.root_snapshot(&self.config)?;
        self.tree = ScopeTree::new(root_config);
        let root = self.tree.root();
        self.tree.seed_record(root);
        self.running = true;

        let plugins = self.plugins_config();
        let result = self.reload_plugin(root, ENTRY_KEY, plugins).await;
        self.sync_entry();
        result?;

        let entry = self
            .entry
            .ok_or_else(|| Error::Bootstrap(format!("{ENTRY_KEY} is inactive")))?;
        tracing::info!(forks = self.tree.fork_count(), "application created");
        Ok(entry)
    }

    /// Replace the root configuration and reconcile the plugin tree
    ///
    /// Before bootstrap the configuration is only stored. Afterwards the
    /// root scope snapshot is refreshed and, if the `plugins` field changed,
    /// the root group is reconciled against it. Self-updates queued before
    /// the call are applied afterwards, except for forks this pass updated.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is malformed, a root field
    /// outside `plugins` fails to interpolate, or some entries fail to
    /// reconcile
    pub async fn update_config(&mut self, config: Value) -> Result<()> {
        AppConfig::from_value(&config)?;
        if !self.running {
            self.config = config;
            return Ok(());
        }

        let root_config = self.root_snapshot(&config)?;
        let pending = self.take_self_updates();
        let changed = config.get(PLUGINS_KEY) != self.config.get(PLUGINS_KEY);
        self.config = config;
        let root = self.tree.root();
        self.tree.set_config(root, root_config);

        let result = if changed {
            let plugins = self.plugins_config();
            let result = self.reload_plugin(root, ENTRY_KEY, plugins).await;
            self.sync_entry();
            result.map(drop)
        } else {
            tracing::debug!("plugin configuration unchanged");
            Ok(())
        };
        self.apply_queued(pending)?;
        result
    }

    /// Re-read the store and apply its configuration
    ///
    /// # Errors
    ///
    /// See [`update_config`](Self::update_config)
    pub async fn reload_from_store(&mut self) -> Result<()> {
        let config = self.store.read_config()?;
        self.update_config(config).await
    }

    /// Write the raw root configuration back to the store
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] for read-only loaders, or the store error
    pub fn persist(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        self.store.write_config(&self.config)
    }

    /// Dispose the whole tree and run the full-reload hook
    ///
    /// Returns false if the application was not running.
    pub fn dispose(&mut self) -> bool {
        if !self.running {
            return false;
        }
        let root = self.tree.root();
        self.tree.dispose_scope(root);
        self.tree = ScopeTree::new(Value::Null);
        self.entry = None;
        self.running = false;
        tracing::info!("application disposed");

        if let Some(hook) = &self.full_reload {
            hook();
        }
        true
    }

    /// Interpolated root snapshot without the `plugins` field
    ///
    /// Plugin entries are interpolated one by one as they are reconciled.
    fn root_snapshot(&self, config: &Value) -> Result<Value> {
        let snapshot = match config {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(key, _)| key.as_str() != PLUGINS_KEY)
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        };
        self.interpolator.interpolate(&snapshot)
    }

    fn plugins_config(&self) -> Value {
        match self.config.get(PLUGINS_KEY) {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(plugins) => plugins.clone(),
        }
    }

    fn sync_entry(&mut self) {
        let root = self.tree.root();
        self.entry = self
            .tree
            .child(root, ENTRY_KEY)
            .and_then(|fork| self.tree.fork(fork))
            .map(Fork::scope);
    }

    fn plugin_context(&self, fork: ForkId, scope: ScopeId, key: &str, alias: &str) -> PluginContext {
        PluginContext {
            fork,
            scope,
            key: key.to_string(),
            alias: alias.to_string(),
            label: self.tree.label(scope).map(ToString::to_string),
            isolate: self
                .tree
                .scope(scope)
                .map(|scope| scope.options().isolate.clone())
                .unwrap_or_default(),
            updater: ForkUpdater::new(fork, self.updates_tx.clone()),
        }
    }

    fn label_of(&self, fork: ForkId) -> Option<String> {
        self.tree
            .fork(fork)
            .and_then(|fork| self.tree.label(fork.scope()))
            .map(ToString::to_string)
    }

    fn emit(&self, event: LoaderEvent) {
        let label = self.label_of(event.fork());
        self.events.emit(event, label.as_deref());
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("writable", &self.writable)
            .field("running", &self.running)
            .field("entry", &self.entry)
            .field("forks", &self.tree.fork_count())
            .finish_non_exhaustive()
    }
}
