//! Build configuration loaded from `depcache.toml`

use depcache_core::CacheOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file looked up at the project root.
pub const CONFIG_FILE: &str = "depcache.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Main configuration for a build round driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakeConfig {
    /// Root of persisted cache state, relative to the project root
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Where compiled class files live, relative to the project root
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub propagation: PropagationConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Knobs of the dependency propagation rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Attribute member references to the class that actually declares the
    /// member when the bytecode names a subclass that only inherits it.
    #[serde(default = "default_true")]
    pub resolve_inherited_member_refs: bool,

    /// Marker interface of remote (RMI) classes
    #[serde(default = "default_remote_marker")]
    pub remote_marker: String,

    /// Root of the class hierarchy
    #[serde(default = "default_root_class")]
    pub root_class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Referencer-set keys buffered before an eviction flush
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(depcache_core::layout::CACHE_DIR)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_true() -> bool {
    true
}

fn default_remote_marker() -> String {
    "java.rmi.Remote".to_string()
}

fn default_root_class() -> String {
    "java.lang.Object".to_string()
}

fn default_pending_limit() -> usize {
    depcache_core::ReferencerSets::DEFAULT_PENDING_LIMIT
}

impl Default for MakeConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            output_dir: default_output_dir(),
            propagation: PropagationConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            resolve_inherited_member_refs: true,
            remote_marker: default_remote_marker(),
            root_class: default_root_class(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pending_limit: default_pending_limit(),
        }
    }
}

impl MakeConfig {
    /// Load `depcache.toml` from `root`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE, root.display());
            return Ok(Self::default());
        }
        Self::read_toml_file(&path)
    }

    /// Read TOML config file
    pub fn read_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: MakeConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pending_limit == 0 {
            return Err(ConfigError::Validation(
                "store.pending_limit must be at least 1".to_string(),
            ));
        }
        if self.propagation.root_class.is_empty() {
            return Err(ConfigError::Validation(
                "propagation.root_class must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            pending_limit: self.store.pending_limit,
        }
    }

    /// Cache directory resolved against the project root.
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        root.join(&self.cache_dir)
    }

    /// Class output directory resolved against the project root.
    pub fn output_path(&self, root: &Path) -> PathBuf {
        root.join(&self.output_dir)
    }
}
