//! Scope Loader - incremental reconciler for hierarchical plugin trees
//!
//! A [`Loader`] keeps a live tree of plugin instances in step with a nested,
//! mutable configuration tree:
//! - Entries are created, updated in place, or disposed as keys come and go
//! - `group` entries nest further entries, to any depth
//! - `$if` conditions and `${{ expr }}` templates are evaluated per entry
//! - Instances can report their own configuration back for persistence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        ConfigStore (file / memory)                   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ root config
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Loader                           │
//! │  Reconciler │ Group diff │ Interpolator │ EventBus  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ apply / update / dispose
//! ┌────────────────────▼────────────────────────────────┐
//! │     ScopeTree: scopes, forks and fork records        │
//! │     PluginResolver → Plugin → PluginInstance         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod interpolate;
pub mod loader;
pub mod modifier;
pub mod plugins;
pub mod scope;

pub use config::{AppConfig, ConfigStore, FileStore, MemoryStore};
pub use error::{EntryFailure, Error, Result};
pub use events::{EventBus, LoaderEvent};
pub use interpolate::{ExprError, Interpolator};
pub use loader::{ENTRY_KEY, Loader};
pub use plugins::{
    ForkUpdater, Plugin, PluginContext, PluginInstance, PluginRegistry, PluginResolver,
    SelfUpdate, UpdateOutcome,
};
pub use scope::{Fork, ForkId, ForkRecord, Scope, ScopeId, ScopeTree, UpdateState};
