//! Key/value configuration sources.

use crate::config::ConfigError;

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Prefix applied to every key when reading the process environment.
pub const ENV_PREFIX: &str = "TRANSFERSCAN_";

/// A read-only source of configuration values, addressed by upper-case key.
pub trait ConfigSource: Send + Sync + Debug {
    /// Returns the value for `key`, if the source defines it.
    fn get(&self, key: &str) -> Option<String>;

    /// Re-reads the backing store. Sources without one do nothing.
    fn reload(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Reads `TRANSFERSCAN_<KEY>` from the process environment on every lookup.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    /// Creates a source using [`ENV_PREFIX`].
    pub fn new() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }

    /// Creates a source with a custom key prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, key))
            .ok()
            .filter(|value| !value.is_empty())
    }
}

/// Values from a TOML file.
///
/// Nested tables are flattened with `_` and keys are upper-cased, so
///
/// ```toml
/// [scan_completed_topic]
/// uri = "https://..."
/// ```
///
/// answers the key `SCAN_COMPLETED_TOPIC_URI`.
#[derive(Debug)]
pub struct TomlFileSource {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl TomlFileSource {
    /// Loads the file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = read_toml(&path)?;
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for TomlFileSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn reload(&self) -> Result<(), ConfigError> {
        let values = read_toml(&self.path)?;
        *self
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = values;
        tracing::debug!(path = %self.path.display(), "Reloaded configuration file");
        Ok(())
    }
}

fn read_toml(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut values = HashMap::new();
    flatten("", &table, &mut values);
    Ok(values)
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key.to_ascii_uppercase()
        } else {
            format!("{prefix}_{}", key.to_ascii_uppercase())
        };
        match value {
            toml::Value::Table(nested) => flatten(&key, nested, out),
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}

/// In-memory values, mainly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Consults sources in order; the first one defining a key wins.
#[derive(Debug, Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredSource {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a lower-priority layer.
    pub fn with_layer(mut self, layer: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }
}

impl ConfigSource for LayeredSource {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }

    fn reload(&self) -> Result<(), ConfigError> {
        self.layers.iter().try_for_each(|layer| layer.reload())
    }
}
