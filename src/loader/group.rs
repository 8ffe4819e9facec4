//! The group container: a plugin whose configuration is a set of entries

use indexmap::IndexSet;
use serde_json::{Map, Value};

use super::Loader;
use crate::error::EntryFailure;
use crate::modifier::is_metadata;
use crate::scope::{Fork, ForkId, ScopeId};
use crate::{Error, Result};

impl Loader {
    /// Activate a group on `scope`, creating a child per entry of `config`
    pub(super) async fn apply_group(&mut self, scope: ScopeId, config: Value) -> Result<()> {
        self.tree.seed_record(scope);
        self.tree.set_config(scope, config.clone());

        let mut failures = Vec::new();
        for (key, value) in entries(&config) {
            if let Err(e) = self.reload_plugin(scope, key, entry_config(value)).await {
                tracing::error!(key = %key, error = %e, "failed to apply entry");
                failures.push(EntryFailure::new(key, e));
            }
        }
        into_result(failures)
    }

    /// Replace a live group's configuration and diff its entries
    pub(super) async fn update_group(&mut self, id: ForkId, config: Value) -> Result<()> {
        let Some(scope) = self.tree.fork(id).map(Fork::scope) else {
            return Ok(());
        };
        let previous = self
            .tree
            .scope(scope)
            .map(|scope| scope.config().clone())
            .unwrap_or_default();
        if previous == config {
            return Ok(());
        }

        self.mark_reconciling(id);
        self.before_update(id, &config);
        self.tree.set_config(scope, config.clone());
        self.emit_reload(id);
        self.reconcile_group(scope, &previous, &config).await
    }

    /// Diff `previous` against `next` key by key
    ///
    /// Keys are visited in union order. A key with no fork is created, a
    /// key absent from `next` is unloaded, anything else is updated. A null
    /// value counts as present with an empty configuration.
    pub(super) async fn reconcile_group(
        &mut self,
        scope: ScopeId,
        previous: &Value,
        next: &Value,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for key in union_keys(previous, next) {
            let result = match next.get(key.as_str()) {
                Some(value) => self
                    .reload_plugin(scope, &key, entry_config(value))
                    .await
                    .map(drop),
                None => {
                    self.unload_plugin(scope, &key);
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::error!(key = %key, error = %e, "failed to reconcile entry");
                failures.push(EntryFailure::new(key, e));
            }
        }
        into_result(failures)
    }
}

/// Plugin entries of a configuration node, skipping metadata keys
fn entries(config: &Value) -> impl Iterator<Item = (&str, &Value)> {
    config
        .as_object()
        .into_iter()
        .flat_map(Map::iter)
        .filter(|(key, _)| !is_metadata(key))
        .map(|(key, value)| (key.as_str(), value))
}

fn entry_config(value: &Value) -> Value {
    if value.is_null() {
        Value::Object(Map::new())
    } else {
        value.clone()
    }
}

/// Entry keys of `previous` followed by those only in `next`
fn union_keys(previous: &Value, next: &Value) -> IndexSet<String> {
    entries(previous)
        .chain(entries(next))
        .map(|(key, _)| key.to_string())
        .collect()
}

fn into_result(failures: Vec<EntryFailure>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Reconcile(failures))
    }
}
