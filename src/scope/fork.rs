use std::fmt;
use std::sync::Arc;

use super::{ForkId, ScopeId};
use crate::modifier::GROUP_NAME;
use crate::plugins::{Plugin, PluginInstance};

/// Re-entrancy state of a fork's update path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateState {
    #[default]
    Idle,
    /// The reconciler is pushing configuration down into the fork
    Reconciling,
    /// The instance reported its own configuration, pending a merge upward
    SelfPending,
}

/// What a fork runs
pub enum ForkRuntime {
    /// A group container; its children live in the fork's scope record
    Group,
    /// A resolved plugin and its live instance
    Plugin {
        plugin: Arc<dyn Plugin>,
        /// Absent only while a restart is in progress
        instance: Option<Box<dyn PluginInstance>>,
    },
}

impl fmt::Debug for ForkRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => f.write_str("Group"),
            Self::Plugin { plugin, instance } => f
                .debug_struct("Plugin")
                .field("plugin", &plugin.name())
                .field("running", &instance.is_some())
                .finish(),
        }
    }
}

/// The live instance for one configuration entry
#[derive(Debug)]
pub struct Fork {
    id: ForkId,
    key: String,
    alias: String,
    parent: ScopeId,
    scope: ScopeId,
    runtime: ForkRuntime,
    pub(crate) state: UpdateState,
    pub(crate) generation: u64,
}

impl Fork {
    pub(crate) fn group(id: ForkId, key: &str, alias: &str, parent: ScopeId, scope: ScopeId) -> Self {
        Self::new(id, key, alias, parent, scope, ForkRuntime::Group)
    }

    pub(crate) fn with_plugin(
        id: ForkId,
        key: &str,
        alias: &str,
        parent: ScopeId,
        scope: ScopeId,
        plugin: Arc<dyn Plugin>,
        instance: Box<dyn PluginInstance>,
    ) -> Self {
        let runtime = ForkRuntime::Plugin {
            plugin,
            instance: Some(instance),
        };
        Self::new(id, key, alias, parent, scope, runtime)
    }

    fn new(
        id: ForkId,
        key: &str,
        alias: &str,
        parent: ScopeId,
        scope: ScopeId,
        runtime: ForkRuntime,
    ) -> Self {
        Self {
            id,
            key: key.to_string(),
            alias: alias.to_string(),
            parent,
            scope,
            runtime,
            state: UpdateState::Idle,
            generation: 0,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ForkId {
        self.id
    }

    /// Key of the record entry that owns this fork
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Scope whose record holds this fork
    #[must_use]
    pub const fn parent(&self) -> ScopeId {
        self.parent
    }

    /// Scope the fork's instance lives on
    #[must_use]
    pub const fn scope(&self) -> ScopeId {
        self.scope
    }

    #[must_use]
    pub const fn runtime(&self) -> &ForkRuntime {
        &self.runtime
    }

    #[must_use]
    pub const fn state(&self) -> UpdateState {
        self.state
    }

    /// Number of reconciler-driven updates pushed into this fork
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self.runtime, ForkRuntime::Group)
    }

    /// The resolved plugin, `None` for groups
    #[must_use]
    pub fn plugin(&self) -> Option<&Arc<dyn Plugin>> {
        match &self.runtime {
            ForkRuntime::Group => None,
            ForkRuntime::Plugin { plugin, .. } => Some(plugin),
        }
    }

    #[must_use]
    pub fn plugin_name(&self) -> &str {
        self.plugin().map_or(GROUP_NAME, |plugin| plugin.name())
    }

    pub(crate) fn instance_mut(&mut self) -> Option<&mut Box<dyn PluginInstance>> {
        match &mut self.runtime {
            ForkRuntime::Group => None,
            ForkRuntime::Plugin { instance, .. } => instance.as_mut(),
        }
    }

    pub(crate) fn take_instance(&mut self) -> Option<Box<dyn PluginInstance>> {
        match &mut self.runtime {
            ForkRuntime::Group => None,
            ForkRuntime::Plugin { instance, .. } => instance.take(),
        }
    }

    pub(crate) fn set_instance(&mut self, next: Box<dyn PluginInstance>) {
        if let ForkRuntime::Plugin { instance, .. } = &mut self.runtime {
            *instance = Some(next);
        }
    }

    pub(crate) fn into_runtime(self) -> ForkRuntime {
        self.runtime
    }
}
