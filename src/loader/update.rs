//! Configuration changes reported by plugin instances themselves
//!
//! A reconciler-driven update marks the fork `Reconciling` before touching
//! it, so the merge step below is skipped. An instance-driven update leaves
//! the fork `SelfPending` and its configuration is merged back into the
//! parent's stored snapshot, then into every enclosing group up to the
//! root `plugins` field.

use serde_json::{Map, Value};

use super::{ENTRY_KEY, Loader};
use crate::config::PLUGINS_KEY;
use crate::events::LoaderEvent;
use crate::modifier::pick;
use crate::plugins::SelfUpdate;
use crate::scope::{Fork, ForkId, Scope, ScopeId, UpdateState};
use crate::Result;

impl Loader {
    /// Apply a configuration reported by the instance of `fork`
    ///
    /// The configuration is merged into the stored snapshot and persisted
    /// when the loader is writable. It is not pushed back into the instance.
    /// Returns false if the update was dropped because the fork is gone, is
    /// a group, or no longer owns its record entry.
    ///
    /// # Errors
    ///
    /// Returns error if persisting the merged configuration fails
    pub fn self_update(&mut self, fork: ForkId, config: Value) -> Result<bool> {
        let applied = self.apply_self_update(fork, config);
        if applied && self.writable {
            self.persist()?;
        }
        Ok(applied)
    }

    /// Apply every queued [`ForkUpdater`](crate::plugins::ForkUpdater) update
    ///
    /// Returns how many were applied. The configuration is persisted once.
    ///
    /// # Errors
    ///
    /// Returns error if persisting the merged configuration fails
    pub fn flush_self_updates(&mut self) -> Result<usize> {
        let pending = self.take_self_updates();
        self.apply_queued(pending)
    }

    /// Drain the queue, stamping each update with its fork's generation
    pub(super) fn take_self_updates(&mut self) -> Vec<(SelfUpdate, Option<u64>)> {
        let mut pending = Vec::new();
        while let Ok(update) = self.updates_rx.try_recv() {
            let generation = self.tree.fork(update.fork).map(Fork::generation);
            pending.push((update, generation));
        }
        pending
    }

    /// Apply drained updates whose fork was not reconciled since, then
    /// persist once
    pub(super) fn apply_queued(&mut self, pending: Vec<(SelfUpdate, Option<u64>)>) -> Result<usize> {
        let mut applied = 0;
        for (update, generation) in pending {
            if self.tree.fork(update.fork).map(Fork::generation) != generation {
                tracing::debug!(fork = %update.fork, "dropping update superseded by reconciliation");
                continue;
            }
            if self.apply_self_update(update.fork, update.config) {
                applied += 1;
            }
        }
        if applied > 0 && self.writable {
            self.persist()?;
        }
        Ok(applied)
    }

    fn apply_self_update(&mut self, id: ForkId, config: Value) -> bool {
        let Some(fork) = self.tree.fork(id) else {
            tracing::debug!(fork = %id, "dropping update from disposed fork");
            return false;
        };
        if fork.is_group() {
            tracing::warn!(key = %fork.key(), "groups cannot report their own configuration");
            return false;
        }
        let (scope, parent, key) = (fork.scope(), fork.parent(), fork.key().to_string());
        if self.tree.child(parent, &key) != Some(id) {
            tracing::debug!(key = %key, fork = %id, "fork no longer owns its entry");
            return false;
        }
        if let Some(fork) = self.tree.fork_mut(id) {
            fork.state = UpdateState::SelfPending;
        }

        self.before_update(id, &config);
        self.tree.set_config(scope, config);
        self.emit_reload(id);
        true
    }

    /// Consume the fork's update state, merging upward unless the
    /// reconciler started this update
    pub(super) fn before_update(&mut self, id: ForkId, config: &Value) {
        let Some(fork) = self.tree.fork_mut(id) else {
            return;
        };
        let state = std::mem::take(&mut fork.state);
        match state {
            UpdateState::Reconciling => {}
            UpdateState::SelfPending | UpdateState::Idle => self.merge_into_parent(id, config),
        }
    }

    fn merge_into_parent(&mut self, id: ForkId, config: &Value) {
        let Some(fork) = self.tree.fork(id) else {
            return;
        };
        let (parent, key) = (fork.parent(), fork.key().to_string());
        if self.tree.child(parent, &key) != Some(id) {
            tracing::debug!(key = %key, fork = %id, "fork no longer owns its entry");
            return;
        }
        let simplified = fork
            .plugin()
            .map_or_else(|| config.clone(), |plugin| plugin.simplify(config));

        let Some(scope) = self.tree.scope_mut(parent) else {
            return;
        };
        let snapshot = scope.config_mut();
        let merged = merge(&pick(snapshot.get(&key).unwrap_or(&Value::Null), true), simplified);
        if !snapshot.is_object() {
            *snapshot = Value::Object(Map::new());
        }
        if let Value::Object(entries) = snapshot {
            entries.insert(key, merged);
        }
        self.sync_ancestors(parent);
    }

    /// Copy a changed group snapshot into each enclosing group and finally
    /// into the root `plugins` field
    fn sync_ancestors(&mut self, mut scope: ScopeId) {
        let root = self.tree.root();
        while let Some(owner) = self.tree.scope(scope).and_then(Scope::owner) {
            let Some(fork) = self.tree.fork(owner) else {
                return;
            };
            let (parent, key) = (fork.parent(), fork.key().to_string());
            let Some(snapshot) = self.tree.scope(scope).map(|scope| scope.config().clone()) else {
                return;
            };

            if parent == root {
                if key == ENTRY_KEY
                    && let Value::Object(root_config) = &mut self.config
                {
                    root_config.insert(PLUGINS_KEY.to_string(), snapshot);
                }
                return;
            }

            if let Some(Value::Object(entries)) = self.tree.scope_mut(parent).map(Scope::config_mut) {
                entries.insert(key, snapshot);
            }
            scope = parent;
        }
    }

    pub(super) fn emit_reload(&self, id: ForkId) {
        let Some(fork) = self.tree.fork(id) else {
            return;
        };
        self.emit(LoaderEvent::Reload {
            key: fork.key().to_string(),
            fork: id,
        });
    }
}

/// `{ ...reserved, ...simplified }`; a non-mapping config replaces the entry
fn merge(reserved: &Value, simplified: Value) -> Value {
    match (reserved, simplified) {
        (Value::Object(reserved), Value::Object(own)) => {
            let mut merged = reserved.clone();
            merged.extend(own);
            Value::Object(merged)
        }
        (_, other) => other,
    }
}
