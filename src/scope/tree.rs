use std::collections::HashMap;

use serde_json::Value;

use super::{Fork, ForkId, ForkRecord, ForkRuntime, Scope, ScopeId};
use crate::modifier::ScopeOptions;

/// Arena owning every scope and fork of one loader
#[derive(Debug)]
pub struct ScopeTree {
    scopes: HashMap<ScopeId, Scope>,
    forks: HashMap<ForkId, Fork>,
    next_id: u64,
    root: ScopeId,
}

impl ScopeTree {
    /// Create a tree holding only a root scope with `config`
    #[must_use]
    pub fn new(config: Value) -> Self {
        let root = ScopeId(0);
        let mut scopes = HashMap::new();
        scopes.insert(root, Scope::new(root, None, config));
        Self {
            scopes,
            forks: HashMap::new(),
            next_id: 1,
            root,
        }
    }

    #[must_use]
    pub const fn root(&self) -> ScopeId {
        self.root
    }

    #[must_use]
    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(&id)
    }

    #[must_use]
    pub fn fork(&self, id: ForkId) -> Option<&Fork> {
        self.forks.get(&id)
    }

    pub(crate) fn fork_mut(&mut self, id: ForkId) -> Option<&mut Fork> {
        self.forks.get_mut(&id)
    }

    /// Whether `id` refers to a live fork
    #[must_use]
    pub fn contains_fork(&self, id: ForkId) -> bool {
        self.forks.contains_key(&id)
    }

    /// Number of live forks across the whole tree
    #[must_use]
    pub fn fork_count(&self) -> usize {
        self.forks.len()
    }

    /// Fork record of `scope`, if it has one
    #[must_use]
    pub fn children(&self, scope: ScopeId) -> Option<&ForkRecord> {
        self.scopes.get(&scope).and_then(Scope::record)
    }

    /// Fork at `key` in the record of `scope`
    #[must_use]
    pub fn child(&self, scope: ScopeId, key: &str) -> Option<ForkId> {
        self.children(scope).and_then(|record| record.get(key).copied())
    }

    /// Give `scope` an empty fork record
    pub(crate) fn seed_record(&mut self, scope: ScopeId) {
        if let Some(scope) = self.scopes.get_mut(&scope) {
            scope.record = Some(ForkRecord::new());
        }
    }

    /// Create a fresh child scope of `parent`, not yet owned by any fork
    pub(crate) fn extend(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.bump());
        self.scopes
            .insert(id, Scope::new(id, Some(parent), Value::Null));
        id
    }

    pub(crate) fn reserve_fork_id(&mut self) -> ForkId {
        ForkId(self.bump())
    }

    const fn bump(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Insert `fork` into the arena and into its parent's record
    pub(crate) fn attach(&mut self, fork: Fork) -> ForkId {
        let id = fork.id();
        if let Some(scope) = self.scopes.get_mut(&fork.scope()) {
            scope.owner = Some(id);
        }
        if let Some(record) = self
            .scopes
            .get_mut(&fork.parent())
            .and_then(|scope| scope.record.as_mut())
        {
            record.insert(fork.key().to_string(), id);
        }
        self.forks.insert(id, fork);
        id
    }

    /// Replace the configuration snapshot of `scope`
    pub(crate) fn set_config(&mut self, scope: ScopeId, config: Value) {
        if let Some(scope) = self.scopes.get_mut(&scope) {
            scope.config = config;
        }
    }

    /// Apply scope-level options read from the reserved keys of `config`
    pub(crate) fn patch(&mut self, scope: ScopeId, config: &Value) {
        if let Some(scope) = self.scopes.get_mut(&scope) {
            scope.options = ScopeOptions::from_config(config);
        }
    }

    /// Nearest label on `scope` or one of its ancestors
    #[must_use]
    pub fn label(&self, scope: ScopeId) -> Option<&str> {
        let mut current = self.scopes.get(&scope);
        while let Some(scope) = current {
            if let Some(label) = scope.options().label.as_deref() {
                return Some(label);
            }
            current = scope.parent().and_then(|parent| self.scopes.get(&parent));
        }
        None
    }

    /// Dispose a fork, its scope, and everything below it
    ///
    /// The fork's record entry is removed if it still points at this fork.
    /// Returns false if the fork was already disposed.
    pub(crate) fn dispose_fork(&mut self, id: ForkId) -> bool {
        let Some(fork) = self.forks.remove(&id) else {
            return false;
        };

        if let Some(record) = self
            .scopes
            .get_mut(&fork.parent())
            .and_then(|scope| scope.record.as_mut())
            && record.get(fork.key()) == Some(&id)
        {
            record.shift_remove(fork.key());
        }

        self.dispose_scope(fork.scope());
        if let ForkRuntime::Plugin {
            instance: Some(mut instance),
            ..
        } = fork.into_runtime()
        {
            instance.dispose();
        }
        true
    }

    /// Dispose a scope and, depth-first, every fork in its record
    ///
    /// Children go in reverse creation order.
    pub(crate) fn dispose_scope(&mut self, id: ScopeId) -> bool {
        let Some(scope) = self.scopes.remove(&id) else {
            return false;
        };
        if let Some(record) = scope.record {
            for child in record.values().rev() {
                self.dispose_fork(*child);
            }
        }
        true
    }

    /// Indented listing of every fork below `scope`
    #[must_use]
    pub fn render(&self, scope: ScopeId) -> String {
        let mut out = String::new();
        self.render_into(scope, 0, &mut out);
        out
    }

    fn render_into(&self, scope: ScopeId, depth: usize, out: &mut String) {
        let Some(record) = self.children(scope) else {
            return;
        };
        for (key, id) in record {
            let Some(fork) = self.forks.get(id) else {
                continue;
            };
            out.push_str(&format!(
                "{:indent$}{key} [{}]\n",
                "",
                fork.plugin_name(),
                indent = depth * 2
            ));
            if fork.is_group() {
                self.render_into(fork.scope(), depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::plugins::{Plugin, PluginContext, PluginInstance};

    struct Counted(Arc<AtomicUsize>);

    impl PluginInstance for Counted {
        fn dispose(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Stub;

    impl Plugin for Stub {
        fn name(&self) -> &str {
            "stub"
        }

        fn apply(
            &self,
            _ctx: &PluginContext,
            _config: &Value,
        ) -> crate::Result<Box<dyn PluginInstance>> {
            unreachable!("instances are built directly in these tests")
        }
    }

    fn add_plugin(tree: &mut ScopeTree, parent: ScopeId, key: &str, disposed: &Arc<AtomicUsize>) -> ForkId {
        let scope = tree.extend(parent);
        let id = tree.reserve_fork_id();
        let instance = Box::new(Counted(Arc::clone(disposed)));
        tree.attach(Fork::with_plugin(id, key, "", parent, scope, Arc::new(Stub), instance))
    }

    fn add_group(tree: &mut ScopeTree, parent: ScopeId, key: &str) -> ForkId {
        let scope = tree.extend(parent);
        tree.seed_record(scope);
        let id = tree.reserve_fork_id();
        tree.attach(Fork::group(id, key, "", parent, scope))
    }

    #[test]
    fn attach_inserts_into_parent_record() {
        let mut tree = ScopeTree::new(json!({}));
        let root = tree.root();
        tree.seed_record(root);
        let disposed = Arc::new(AtomicUsize::new(0));
        let id = add_plugin(&mut tree, root, "echo", &disposed);

        assert_eq!(tree.child(root, "echo"), Some(id));
        let fork = tree.fork(id).unwrap();
        assert_eq!(tree.scope(fork.scope()).unwrap().owner(), Some(id));
        assert_eq!(fork.plugin_name(), "stub");
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut tree = ScopeTree::new(json!({}));
        let root = tree.root();
        tree.seed_record(root);
        let disposed = Arc::new(AtomicUsize::new(0));
        let id = add_plugin(&mut tree, root, "echo", &disposed);

        assert!(tree.dispose_fork(id));
        assert!(!tree.dispose_fork(id));
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(tree.children(root).unwrap().is_empty());
    }

    #[test]
    fn disposing_a_group_cascades() {
        let mut tree = ScopeTree::new(json!({}));
        let root = tree.root();
        tree.seed_record(root);
        let disposed = Arc::new(AtomicUsize::new(0));
        let outer = add_group(&mut tree, root, "group:outer");
        let outer_scope = tree.fork(outer).unwrap().scope();
        let inner = add_group(&mut tree, outer_scope, "group:inner");
        let inner_scope = tree.fork(inner).unwrap().scope();
        add_plugin(&mut tree, outer_scope, "a", &disposed);
        add_plugin(&mut tree, inner_scope, "b", &disposed);
        assert_eq!(tree.fork_count(), 4);

        assert!(tree.dispose_fork(outer));
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert_eq!(tree.fork_count(), 0);
        assert!(tree.scope(inner_scope).is_none());
    }

    #[test]
    fn stale_record_entries_are_left_alone() {
        let mut tree = ScopeTree::new(json!({}));
        let root = tree.root();
        tree.seed_record(root);
        let disposed = Arc::new(AtomicUsize::new(0));
        let first = add_plugin(&mut tree, root, "echo", &disposed);
        let second = add_plugin(&mut tree, root, "echo", &disposed);

        assert!(tree.dispose_fork(first));
        assert_eq!(tree.child(root, "echo"), Some(second));
    }

    #[test]
    fn labels_are_inherited() {
        let mut tree = ScopeTree::new(json!({}));
        let root = tree.root();
        tree.seed_record(root);
        let group = add_group(&mut tree, root, "group:g");
        let group_scope = tree.fork(group).unwrap().scope();
        tree.patch(group_scope, &json!({ "$label": "primary" }));
        let leaf = tree.extend(group_scope);

        assert_eq!(tree.label(leaf), Some("primary"));
        assert_eq!(tree.label(root), None);
    }

    #[test]
    fn renders_nested_groups() {
        let mut tree = ScopeTree::new(json!({}));
        let root = tree.root();
        tree.seed_record(root);
        let disposed = Arc::new(AtomicUsize::new(0));
        let group = add_group(&mut tree, root, "group:entry");
        let scope = tree.fork(group).unwrap().scope();
        add_plugin(&mut tree, scope, "echo", &disposed);

        assert_eq!(tree.render(root), "group:entry [group]\n  echo [stub]\n");
    }
}
