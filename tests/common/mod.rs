//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use scope_loader::{
    ConfigStore, ForkUpdater, Loader, LoaderEvent, MemoryStore, Plugin, PluginContext,
    PluginInstance, PluginRegistry, UpdateOutcome,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;

/// One recorded activation
#[derive(Debug, Clone)]
pub struct Applied {
    pub key: String,
    pub alias: String,
    pub label: Option<String>,
    pub config: Value,
}

/// Everything the test plugins observed
#[derive(Debug, Default)]
pub struct Stats {
    applied: Mutex<Vec<Applied>>,
    updated: Mutex<Vec<(String, Value)>>,
    disposed: Mutex<Vec<String>>,
    updaters: Mutex<Vec<(String, ForkUpdater)>>,
}

impl Stats {
    pub fn applied(&self) -> Vec<Applied> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_keys(&self) -> Vec<String> {
        self.applied().into_iter().map(|a| a.key).collect()
    }

    pub fn updated(&self) -> Vec<(String, Value)> {
        self.updated.lock().unwrap().clone()
    }

    pub fn disposed(&self) -> Vec<String> {
        self.disposed.lock().unwrap().clone()
    }

    /// Updater handed to the most recent activation of `key`
    pub fn updater(&self, key: &str) -> ForkUpdater {
        self.updaters
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, updater)| updater.clone())
            .expect("no activation for key")
    }
}

/// Configurable plugin that records its lifecycle into [`Stats`]
pub struct Recording {
    name: &'static str,
    stats: Arc<Stats>,
    outcome: UpdateOutcome,
    fail: bool,
}

impl Plugin for Recording {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(
        &self,
        ctx: &PluginContext,
        config: &Value,
    ) -> scope_loader::Result<Box<dyn PluginInstance>> {
        if self.fail {
            return Err(scope_loader::Error::Plugin(format!("{} refused to start", self.name)));
        }
        self.stats.applied.lock().unwrap().push(Applied {
            key: ctx.key().to_string(),
            alias: ctx.alias().to_string(),
            label: ctx.label().map(ToString::to_string),
            config: config.clone(),
        });
        self.stats
            .updaters
            .lock()
            .unwrap()
            .push((ctx.key().to_string(), ctx.updater()));
        Ok(Box::new(Instance {
            key: ctx.key().to_string(),
            stats: Arc::clone(&self.stats),
            outcome: self.outcome,
        }))
    }
}

/// Plugin with a `port` default of 80 that is stripped again on save
pub struct WithDefaults(Arc<Stats>);

impl Plugin for WithDefaults {
    fn name(&self) -> &str {
        "server"
    }

    fn resolve_config(&self, config: Value) -> scope_loader::Result<Value> {
        let Value::Object(mut map) = config else {
            return Err(scope_loader::Error::Plugin("server config must be a mapping".into()));
        };
        map.entry("port").or_insert(json!(80));
        Ok(Value::Object(map))
    }

    fn simplify(&self, config: &Value) -> Value {
        let mut config = config.clone();
        if let Value::Object(map) = &mut config
            && map.get("port") == Some(&json!(80))
        {
            map.remove("port");
        }
        config
    }

    fn apply(
        &self,
        ctx: &PluginContext,
        config: &Value,
    ) -> scope_loader::Result<Box<dyn PluginInstance>> {
        Recording {
            name: "server",
            stats: Arc::clone(&self.0),
            outcome: UpdateOutcome::Applied,
            fail: false,
        }
        .apply(ctx, config)
    }
}

/// Restarting plugin that starts once and refuses every later start
pub struct Flaky {
    inner: Recording,
    started: AtomicBool,
}

impl Plugin for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn apply(
        &self,
        ctx: &PluginContext,
        config: &Value,
    ) -> scope_loader::Result<Box<dyn PluginInstance>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(scope_loader::Error::Plugin("flaky refused to restart".into()));
        }
        self.inner.apply(ctx, config)
    }
}

struct Instance {
    key: String,
    stats: Arc<Stats>,
    outcome: UpdateOutcome,
}

impl PluginInstance for Instance {
    fn update(&mut self, config: &Value) -> UpdateOutcome {
        if self.outcome == UpdateOutcome::Applied {
            self.stats
                .updated
                .lock()
                .unwrap()
                .push((self.key.clone(), config.clone()));
        }
        self.outcome
    }

    fn dispose(&mut self) {
        self.stats.disposed.lock().unwrap().push(self.key.clone());
    }
}

/// Registry with the test plugins:
/// - `echo` updates in place
/// - `restart` (registered with the default prefix) restarts on update
/// - `broken` fails to start
/// - `server` fills and strips a `port` default
/// - `flaky` restarts on update and fails to start a second time
pub fn registry(stats: &Arc<Stats>) -> PluginRegistry {
    let recording = |name, outcome, fail| {
        Arc::new(Recording {
            name,
            stats: Arc::clone(stats),
            outcome,
            fail,
        })
    };
    let mut registry = PluginRegistry::new();
    registry.register(recording("echo", UpdateOutcome::Applied, false));
    registry.register(recording(
        "scope-loader-plugin-restart",
        UpdateOutcome::Restart,
        false,
    ));
    registry.register(recording("broken", UpdateOutcome::Applied, true));
    registry.register(Arc::new(WithDefaults(Arc::clone(stats))));
    registry.register(Arc::new(Flaky {
        inner: Recording {
            name: "flaky",
            stats: Arc::clone(stats),
            outcome: UpdateOutcome::Restart,
            fail: false,
        },
        started: AtomicBool::new(false),
    }));
    registry
}

/// Loader over an in-memory store holding `config`
pub fn loader_with(store: MemoryStore) -> (Loader, Arc<Stats>, Arc<MemoryStore>) {
    let stats = Arc::new(Stats::default());
    let store = Arc::new(store);
    let loader = Loader::new(
        Arc::clone(&store) as Arc<dyn ConfigStore>,
        Arc::new(registry(&stats)),
    )
    .expect("valid root configuration");
    (loader, stats, store)
}

/// Writable loader with `plugins` as its plugin configuration
pub fn loader(plugins: Value) -> (Loader, Arc<Stats>, Arc<MemoryStore>) {
    loader_with(MemoryStore::new(json!({ "plugins": plugins })))
}

/// Root configuration with the given `plugins`
pub fn root(plugins: Value) -> Value {
    json!({ "plugins": plugins })
}

/// Drain every event received so far
pub fn drain(rx: &mut broadcast::Receiver<LoaderEvent>) -> Vec<LoaderEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Events rendered as `"<kind> <key>"`
pub fn describe(events: &[LoaderEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| format!("{} {}", e.as_str(), e.key()))
        .collect()
}

/// Keys of the fork record of the entry group
pub fn entry_keys(loader: &Loader) -> Vec<String> {
    let entry = loader.entry().expect("application is running");
    loader
        .tree()
        .children(entry)
        .map(|record| record.keys().cloned().collect())
        .unwrap_or_default()
}
