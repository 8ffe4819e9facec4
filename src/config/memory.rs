use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use super::ConfigStore;
use crate::{Error, Result};

/// Configuration held in memory
#[derive(Debug)]
pub struct MemoryStore {
    config: Mutex<Value>,
    writable: bool,
    writes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub const fn new(config: Value) -> Self {
        Self {
            config: Mutex::new(config),
            writable: true,
            writes: AtomicUsize::new(0),
        }
    }

    /// A store that refuses writes; loaders built on it skip interpolation
    #[must_use]
    pub const fn read_only(config: Value) -> Self {
        Self {
            config: Mutex::new(config),
            writable: false,
            writes: AtomicUsize::new(0),
        }
    }

    /// Replace the stored configuration without counting a write
    pub fn replace(&self, config: Value) {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Snapshot of the stored configuration
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful [`write_config`](ConfigStore::write_config) calls
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ConfigStore for MemoryStore {
    fn read_config(&self) -> Result<Value> {
        Ok(self.snapshot())
    }

    fn write_config(&self, config: &Value) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        self.replace(config.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn writable(&self) -> bool {
        self.writable
    }
}
