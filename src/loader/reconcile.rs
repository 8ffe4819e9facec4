//! Creating, updating and unloading single entries

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use super::Loader;
use crate::events::LoaderEvent;
use crate::modifier::{CONDITION_KEY, GROUP_NAME, parse_key, pick};
use crate::plugins::{Plugin, PluginInstance, UpdateOutcome};
use crate::scope::{Fork, ForkId, Scope, ScopeId, UpdateState};
use crate::Result;

impl Loader {
    /// Bring the entry at `key` in `parent`'s record in line with `config`
    ///
    /// Returns the fork now serving `key`, or `None` if the entry is
    /// inactive or its plugin could not be started.
    pub(crate) fn reload_plugin<'a>(
        &'a mut self,
        parent: ScopeId,
        key: &'a str,
        config: Value,
    ) -> BoxFuture<'a, Result<Option<ForkId>>> {
        async move {
            let active = self.interpolator.is_truthy_like(config.get(CONDITION_KEY))?;
            match self.tree.child(parent, key) {
                Some(_) if !active => {
                    self.unload_plugin(parent, key);
                    Ok(None)
                }
                Some(fork) => {
                    self.update_fork(fork, config).await?;
                    Ok(Some(fork))
                }
                None if !active => Ok(None),
                None => self.fork_plugin(parent, key, config).await,
            }
        }
        .boxed()
    }

    /// Dispose the fork at `key` in `scope`'s record
    ///
    /// Returns false if there was nothing to unload.
    pub fn unload_plugin(&mut self, scope: ScopeId, key: &str) -> bool {
        let Some(fork) = self.tree.child(scope, key) else {
            return false;
        };
        let label = self.label_of(fork);
        self.tree.dispose_fork(fork);
        self.events.emit(
            LoaderEvent::Unload {
                key: key.to_string(),
                fork,
            },
            label.as_deref(),
        );
        true
    }

    async fn fork_plugin(
        &mut self,
        parent: ScopeId,
        key: &str,
        config: Value,
    ) -> Result<Option<ForkId>> {
        let (name, alias) = parse_key(key);
        let scope = self.tree.extend(parent);
        self.tree.patch(scope, &config);

        if name == GROUP_NAME {
            let id = self.tree.reserve_fork_id();
            self.tree.attach(Fork::group(id, key, alias, parent, scope));
            self.emit(LoaderEvent::Apply {
                key: key.to_string(),
                fork: id,
            });
            self.apply_group(scope, config).await?;
            return Ok(Some(id));
        }

        let resolver = Arc::clone(&self.resolver);
        let Some(plugin) = resolver.resolve_plugin(name).await else {
            tracing::warn!(key = %key, plugin = %name, "plugin not found");
            self.tree.dispose_scope(scope);
            return Ok(None);
        };

        let config = match self.interpolator.interpolate(&pick(&config, false)) {
            Ok(config) => config,
            Err(e) => {
                self.tree.dispose_scope(scope);
                return Err(e);
            }
        };

        let id = self.tree.reserve_fork_id();
        let started = plugin
            .resolve_config(config)
            .and_then(|config| self.start(&plugin, id, scope, key, &config).map(|i| (config, i)));
        let (config, instance) = match started {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!(key = %key, plugin = %plugin.name(), error = %e, "failed to apply plugin");
                self.tree.dispose_scope(scope);
                return Ok(None);
            }
        };

        self.tree.set_config(scope, config);
        self.tree
            .attach(Fork::with_plugin(id, key, alias, parent, scope, plugin, instance));
        self.emit(LoaderEvent::Apply {
            key: key.to_string(),
            fork: id,
        });
        Ok(Some(id))
    }

    fn start(
        &self,
        plugin: &Arc<dyn Plugin>,
        id: ForkId,
        scope: ScopeId,
        key: &str,
        config: &Value,
    ) -> Result<Box<dyn PluginInstance>> {
        let (_, alias) = parse_key(key);
        let ctx = self.plugin_context(id, scope, key, alias);
        plugin.apply(&ctx, config)
    }

    /// Push a new configuration into an existing fork
    async fn update_fork(&mut self, id: ForkId, config: Value) -> Result<()> {
        let Some(fork) = self.tree.fork(id) else {
            return Ok(());
        };
        let scope = fork.scope();
        let plugin = fork.plugin().cloned();
        self.tree.patch(scope, &config);

        let Some(plugin) = plugin else {
            return self.update_group(id, config).await;
        };

        let effective = self.interpolator.interpolate(&pick(&config, false))?;
        let effective = plugin.resolve_config(effective)?;
        if self.tree.scope(scope).map(Scope::config) == Some(&effective) {
            return Ok(());
        }

        self.mark_reconciling(id);
        self.before_update(id, &effective);
        self.tree.set_config(scope, effective.clone());

        let outcome = self
            .tree
            .fork_mut(id)
            .and_then(Fork::instance_mut)
            .map_or(UpdateOutcome::Restart, |instance| instance.update(&effective));
        if outcome == UpdateOutcome::Restart {
            self.restart(id, &plugin, &effective)?;
        }

        self.emit_reload(id);
        Ok(())
    }

    /// Replace a fork's instance with a fresh one on the same fork
    ///
    /// If the new instance fails to start the fork is unloaded.
    fn restart(&mut self, id: ForkId, plugin: &Arc<dyn Plugin>, config: &Value) -> Result<()> {
        let Some(fork) = self.tree.fork_mut(id) else {
            return Ok(());
        };
        let (scope, key, parent) = (fork.scope(), fork.key().to_string(), fork.parent());
        if let Some(mut old) = fork.take_instance() {
            old.dispose();
        }

        match self.start(plugin, id, scope, &key, config) {
            Ok(instance) => {
                if let Some(fork) = self.tree.fork_mut(id) {
                    fork.set_instance(instance);
                }
                tracing::debug!(key = %key, %id, "restarted plugin");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to restart plugin");
                self.unload_plugin(parent, &key);
                Err(e)
            }
        }
    }

    pub(super) fn mark_reconciling(&mut self, id: ForkId) {
        if let Some(fork) = self.tree.fork_mut(id) {
            fork.state = UpdateState::Reconciling;
            fork.generation += 1;
        }
    }
}
