//! Error types for the scope loader

use thiserror::Error;

use crate::interpolate::ExprError;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading and reconciling the plugin tree
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration shape error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("toml error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Template expression failed to parse or evaluate
    #[error("expression error: {0}")]
    Expression(#[from] ExprError),

    /// Plugin rejected its configuration or failed to start
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Root bootstrap could not produce the entry group
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    /// Write attempted against a read-only store
    #[error("configuration store is read-only")]
    ReadOnly,

    /// One or more entries of a reconciliation pass failed
    #[error("{} plugin entries failed to reconcile: {}", .0.len(), format_failures(.0))]
    Reconcile(Vec<EntryFailure>),
}

/// A single configuration key that failed during a reconciliation pass
#[derive(Debug)]
pub struct EntryFailure {
    /// Configuration key of the failed entry
    pub key: String,
    /// What went wrong
    pub error: Box<Error>,
}

impl EntryFailure {
    /// Create a failure record for `key`
    #[must_use]
    pub fn new(key: impl Into<String>, error: Error) -> Self {
        Self {
            key: key.into(),
            error: Box::new(error),
        }
    }
}

impl std::fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.error)
    }
}

fn format_failures(failures: &[EntryFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Keys of every failed entry, including those nested in inner groups
    #[must_use]
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            Self::Reconcile(failures) => failures
                .iter()
                .flat_map(|f| {
                    let mut keys = vec![f.key.as_str()];
                    keys.extend(f.error.failed_keys());
                    keys
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
