//! Service configuration.
//!
//! Settings are resolved once at startup into an immutable [`Settings`]
//! snapshot and handed to the pipeline by reference. A [`SettingsHandle`]
//! can refresh the snapshot on an explicit schedule; nothing re-reads
//! configuration per request.
//!
//! Values come from a [`ConfigSource`]. The binary layers the process
//! environment (`TRANSFERSCAN_*`, optionally seeded from a `.env` file) over
//! an optional TOML file.

mod settings;
mod sources;

pub use settings::{
    ClamAvSettings, Settings, SettingsHandle, StorageSettings, TlsPaths, TopicSettings,
    DEFAULT_CLAMAV_SOCKET, DEFAULT_STORAGE_HOST,
};
pub use sources::{ConfigSource, EnvSource, LayeredSource, MapSource, TomlFileSource, ENV_PREFIX};

use std::path::PathBuf;
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key has no value.
    #[error("missing required configuration key '{key}'")]
    Missing {
        /// The key that was not found.
        key: String,
    },

    /// A value could not be interpreted.
    #[error("invalid value '{value}' for '{key}': {reason}")]
    Invalid {
        /// The offending key.
        key: String,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("cannot read configuration file '{}': {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid TOML.
    #[error("invalid TOML in '{}': {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    /// Creates a `Missing` error.
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing { key: key.into() }
    }

    /// Creates an `Invalid` error.
    pub fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
pub(crate) use settings::tests::required_values;
