//! In-memory plugin registry and resolver

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Plugin, PluginResolver};

/// Prefix tried after the verbatim name
pub const DEFAULT_PREFIX: &str = "scope-loader-plugin-";

/// Registry of known plugins
///
/// Lookups try the configuration name verbatim, then each prefix in order.
/// Resolved names are memoised until the registry changes.
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    disabled: HashSet<String>,
    prefixes: Vec<String>,
    cache: RwLock<HashMap<String, String>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Create an empty registry with the default prefix
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefixes(vec![DEFAULT_PREFIX.to_string()])
    }

    /// Create an empty registry with custom lookup prefixes
    #[must_use]
    pub fn with_prefixes(prefixes: Vec<String>) -> Self {
        Self {
            plugins: HashMap::new(),
            disabled: HashSet::new(),
            prefixes,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register a plugin under its own name
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        self.register_as(name, plugin);
    }

    /// Register a plugin under an explicit canonical name
    pub fn register_as(&mut self, name: impl Into<String>, plugin: Arc<dyn Plugin>) {
        let name = name.into();
        tracing::debug!(plugin = %name, "registered plugin");
        self.plugins.insert(name, plugin);
        self.cache.get_mut().clear();
    }

    /// Make a plugin unresolvable, returning true if found
    pub fn disable(&mut self, name: &str) -> bool {
        if self.plugins.contains_key(name) {
            self.disabled.insert(name.to_string());
            self.cache.get_mut().clear();
            tracing::info!(plugin = %name, "plugin disabled");
            true
        } else {
            false
        }
    }

    /// Make a disabled plugin resolvable again, returning true if found
    pub fn enable(&mut self, name: &str) -> bool {
        if self.plugins.contains_key(name) {
            self.disabled.remove(name);
            tracing::info!(plugin = %name, "plugin enabled");
            true
        } else {
            false
        }
    }

    /// Canonical names of all registered plugins
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<String> {
        std::iter::once(name.to_string())
            .chain(self.prefixes.iter().map(|prefix| format!("{prefix}{name}")))
            .find(|candidate| {
                self.plugins.contains_key(candidate) && !self.disabled.contains(candidate)
            })
    }
}

#[async_trait]
impl PluginResolver for PluginRegistry {
    async fn resolve(&self, name: &str) -> Option<String> {
        if let Some(hit) = self.cache.read().await.get(name) {
            return Some(hit.clone());
        }

        let Some(found) = self.lookup(name) else {
            tracing::debug!(plugin = %name, "no registered plugin matches");
            return None;
        };
        self.cache
            .write()
            .await
            .insert(name.to_string(), found.clone());
        Some(found)
    }

    async fn resolve_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let canonical = self.resolve(name).await?;
        self.plugins.get(&canonical).cloned()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .field("disabled", &self.disabled)
            .field("prefixes", &self.prefixes)
            .finish_non_exhaustive()
    }
}
