//! File-backed configuration store
//!
//! The format is picked from the file extension: TOML, YAML or JSON. All
//! three are converted to and from a JSON value tree.

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::ConfigStore;
use crate::{Error, Result};

/// File names looked for during discovery, in priority order
pub const CONFIG_FILENAMES: &[&str] = &[
    "scope-loader.toml",
    "scope-loader.yaml",
    "scope-loader.yml",
    "scope-loader.json",
];

/// On-disk configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect the format from a path's extension
    ///
    /// # Errors
    ///
    /// Returns error if the extension is missing or unsupported
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            Some(ext) => Err(Error::Config(format!("unsupported config format: .{ext}"))),
            None => Err(Error::Config(format!(
                "cannot infer config format of {}",
                path.display()
            ))),
        }
    }

    /// Parse `raw` into a value tree
    ///
    /// # Errors
    ///
    /// Returns error if `raw` is not valid in this format
    pub fn parse(self, raw: &str) -> Result<Value> {
        match self {
            Self::Toml => {
                let value: toml::Value = toml::from_str(raw)?;
                Ok(serde_json::to_value(value)?)
            }
            Self::Yaml => {
                let value: serde_yaml::Value = serde_yaml::from_str(raw)?;
                Ok(serde_json::to_value(value)?)
            }
            Self::Json => Ok(serde_json::from_str(raw)?),
        }
    }

    /// Serialize a value tree in this format
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented (e.g. null in TOML)
    pub fn render(self, value: &Value) -> Result<String> {
        match self {
            Self::Toml => Ok(toml::to_string_pretty(value)?),
            Self::Yaml => Ok(serde_yaml::to_string(value)?),
            Self::Json => {
                let mut out = serde_json::to_string_pretty(value)?;
                out.push('\n');
                Ok(out)
            }
        }
    }
}

/// Configuration stored in a single file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    format: ConfigFormat,
}

impl FileStore {
    /// Open a store for `path`
    ///
    /// The file does not need to exist until it is read.
    ///
    /// # Errors
    ///
    /// Returns error if the format cannot be inferred from the extension
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path)?;
        Ok(Self { path, format })
    }

    /// Find a configuration file in the working directory, then in the
    /// user configuration directory
    #[must_use]
    pub fn discover() -> Option<Self> {
        let cwd = std::env::current_dir().ok();
        let user = config_dir();
        [cwd, user]
            .into_iter()
            .flatten()
            .find_map(|dir| Self::discover_in(&dir))
    }

    /// Find a configuration file directly inside `dir`
    #[must_use]
    pub fn discover_in(dir: &Path) -> Option<Self> {
        CONFIG_FILENAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .and_then(|path| Self::open(path).ok())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn format(&self) -> ConfigFormat {
        self.format
    }
}

impl ConfigStore for FileStore {
    fn read_config(&self) -> Result<Value> {
        let raw = std::fs::read_to_string(&self.path)?;
        let value = self.format.parse(&raw)?;
        tracing::debug!(path = %self.path.display(), "loaded config file");
        Ok(value)
    }

    fn write_config(&self, config: &Value) -> Result<()> {
        if !self.writable() {
            return Err(Error::ReadOnly);
        }
        let rendered = self.format.render(config)?;
        std::fs::write(&self.path, rendered)?;
        tracing::debug!(path = %self.path.display(), "wrote config file");
        Ok(())
    }

    fn writable(&self) -> bool {
        std::fs::metadata(&self.path).map_or(true, |meta| !meta.permissions().readonly())
    }
}

/// User configuration directory for this application
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "omni", "scope-loader")
        .map(|dirs| dirs.config_dir().to_path_buf())
}
