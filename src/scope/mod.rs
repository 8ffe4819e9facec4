//! Runtime tree of scopes and forks
//!
//! Scopes and forks live in a [`ScopeTree`] arena and refer to each other by
//! id. Each scope optionally carries a [`ForkRecord`], the mapping from
//! configuration key to the fork that key produced. Only scopes hosting a
//! group (and the root) have one.

mod fork;
mod tree;

pub use fork::{Fork, ForkRuntime, UpdateState};
pub use tree::ScopeTree;

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::modifier::ScopeOptions;

/// Identifier of a scope in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScopeId(pub(crate) u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Identifier of a fork in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ForkId(pub(crate) u64);

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fork#{}", self.0)
    }
}

/// Configuration key to owned fork, in insertion order
pub type ForkRecord = IndexMap<String, ForkId>;

/// A node in the runtime tree
#[derive(Debug, Clone)]
pub struct Scope {
    id: ScopeId,
    parent: Option<ScopeId>,
    owner: Option<ForkId>,
    config: Value,
    options: ScopeOptions,
    record: Option<ForkRecord>,
}

impl Scope {
    pub(crate) const fn new(id: ScopeId, parent: Option<ScopeId>, config: Value) -> Self {
        Self {
            id,
            parent,
            owner: None,
            config,
            options: ScopeOptions {
                label: None,
                isolate: Vec::new(),
            },
            record: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ScopeId {
        self.id
    }

    /// Scope this one was extended from; `None` for the root
    #[must_use]
    pub const fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Fork whose instance lives on this scope
    #[must_use]
    pub const fn owner(&self) -> Option<ForkId> {
        self.owner
    }

    /// Current configuration snapshot
    #[must_use]
    pub const fn config(&self) -> &Value {
        &self.config
    }

    #[must_use]
    pub const fn options(&self) -> &ScopeOptions {
        &self.options
    }

    /// Fork record, if this scope hosts child entries
    #[must_use]
    pub const fn record(&self) -> Option<&ForkRecord> {
        self.record.as_ref()
    }

    pub(crate) const fn config_mut(&mut self) -> &mut Value {
        &mut self.config
    }
}
