//! Root configuration storage
//!
//! The loader reads and writes its root configuration through a
//! [`ConfigStore`]. The root is a mapping whose `plugins` field holds the
//! top-level configuration node; every other field is scope-level
//! configuration of the root itself.

pub mod file;
pub mod memory;

pub use file::{CONFIG_FILENAMES, ConfigFormat, FileStore};
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Field of the root configuration holding plugin entries
pub const PLUGINS_KEY: &str = "plugins";

/// Persistence of the root configuration
pub trait ConfigStore: Send + Sync {
    /// Read the current root configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot be read or parsed
    fn read_config(&self) -> Result<Value>;

    /// Replace the stored root configuration
    ///
    /// # Errors
    ///
    /// Returns error if the store is read-only or the write fails
    fn write_config(&self, config: &Value) -> Result<()>;

    /// Whether [`write_config`](Self::write_config) is supported
    fn writable(&self) -> bool;
}

/// Shape of the root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Top-level plugin entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Map<String, Value>>,

    /// Remaining root-scope configuration
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppConfig {
    /// Validate the shape of a raw root configuration
    ///
    /// # Errors
    ///
    /// Returns error if the root or its `plugins` field is not a mapping
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Config(
                "root configuration must be a mapping".to_string(),
            ));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("invalid root configuration: {e}")))
    }

    /// Number of top-level plugin entries
    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.plugins.as_ref().map_or(0, Map::len)
    }
}
