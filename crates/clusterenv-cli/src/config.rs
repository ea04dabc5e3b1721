//! User configuration.
//!
//! Read from `$XDG_CONFIG_HOME/clusterenv/config.json` (or
//! `~/.config/clusterenv/config.json`) unless `--config` names another file.
//! Every field is optional:
//!
//! ```json
//! {
//!   "default_env": "torchpy311",
//!   "conda_root": "~/miniconda3",
//!   "bootstrap": false,
//!   "cluster": { "gpu_partition": "gpu-a100", "max_time": "2-00:00:00" },
//!   "environments": [
//!     { "name": "jaxpy311", "python": "3.11", "pip_packages": ["jax[cuda12]"] }
//!   ]
//! }
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use clusterenv_conda::{
    BootstrapPolicy, CatalogError, DEFAULT_ENVIRONMENT, EnvironmentCatalog, EnvironmentSpec,
};
use clusterenv_slurm::ClusterLimits;
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration in {path}: {source}")]
    Json {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Environment used when a command names none
    pub default_env: Option<String>,

    /// Environment catalog; replaces the built-in one when non-empty
    pub environments: Vec<EnvironmentSpec>,

    /// Conda installation searched before the standard locations
    pub conda_root: Option<Utf8PathBuf>,

    /// Install Miniconda automatically when no conda is found
    pub bootstrap: bool,

    pub cluster: ClusterLimits,
}

impl Config {
    /// Default configuration path for the current user.
    pub fn default_path() -> Option<Utf8PathBuf> {
        let config_dir = dirs::config_dir().and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())?;
        Some(Self::default_path_in(&config_dir))
    }

    /// Configuration path under a user config directory.
    pub fn default_path_in(config_dir: &Utf8Path) -> Utf8PathBuf {
        config_dir.join("clusterenv").join("config.json")
    }

    /// Load configuration from `path`.
    ///
    /// Returns the defaults if the file doesn't exist.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("no configuration at {}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_owned(),
            source,
        })
    }

    /// The environment catalog: configured environments, or the built-ins.
    pub fn catalog(&self) -> Result<EnvironmentCatalog, CatalogError> {
        if self.environments.is_empty() {
            Ok(EnvironmentCatalog::builtin())
        } else {
            EnvironmentCatalog::from_specs(self.environments.clone())
        }
    }

    /// Environment to use: `explicit`, then `default_env`, then the built-in default.
    pub fn env_name<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit
            .or(self.default_env.as_deref())
            .unwrap_or(DEFAULT_ENVIRONMENT)
    }

    pub fn bootstrap_policy(&self) -> BootstrapPolicy {
        if self.bootstrap {
            BootstrapPolicy::Auto
        } else {
            BootstrapPolicy::Never
        }
    }
}
