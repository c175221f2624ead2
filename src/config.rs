use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::weaver::KeyStrategy;

/// Default configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "cacheweave.toml";
/// Overrides the default configuration path.
pub const CONFIG_ENV: &str = "CACHEWEAVE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "toml-config")]
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config files are not supported in this build (enable the `toml-config` feature)")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    /// Property that yields the cache provider.
    pub accessor_name: String,
    pub cache_marker: String,
    pub no_cache_marker: String,
    pub key_strategy: KeyStrategy,
    /// Emit debug trace calls around key creation, loads and stores.
    pub trace_keys: bool,
    /// Treat every warning as fatal.
    pub fail_on_warnings: bool,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            accessor_name: "Cache".into(),
            cache_marker: crate::module::CACHE_MARKER.into(),
            no_cache_marker: crate::module::NO_CACHE_MARKER.into(),
            key_strategy: KeyStrategy::default(),
            trace_keys: false,
            fail_on_warnings: false,
        }
    }
}

impl WeaveConfig {
    /// Load `explicit`, or the path named by `CACHEWEAVE_CONFIG`, or
    /// `cacheweave.toml` when present. Missing default files yield defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        let default = Path::new(CONFIG_FILE);
        if default.is_file() {
            Self::load(default)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|error| match error {
            #[cfg(feature = "toml-config")]
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    #[cfg(not(feature = "toml-config"))]
    pub fn from_toml(_text: &str) -> Result<Self, ConfigError> {
        Err(ConfigError::Unsupported)
    }
}

#[cfg(all(test, feature = "toml-config"))]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config = WeaveConfig::from_toml("key_strategy = \"signature\"\ntrace_keys = true\n").unwrap();
        assert_eq!(config.key_strategy, KeyStrategy::Signature);
        assert!(config.trace_keys);
        assert_eq!(config.accessor_name, "Cache");
        assert!(!config.fail_on_warnings);
    }

    #[test]
    fn loads_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weave.toml");
        std::fs::write(&path, "accessor_name = \"Store\"\n").unwrap();
        let config = WeaveConfig::discover(Some(&path)).unwrap();
        assert_eq!(config.accessor_name, "Store");

        let missing = dir.path().join("missing.toml");
        assert!(matches!(WeaveConfig::load(&missing), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn rejects_unknown_strategy() {
        assert!(matches!(
            WeaveConfig::from_toml("key_strategy = \"random\""),
            Err(ConfigError::Parse { .. })
        ));
    }
}
