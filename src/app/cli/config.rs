//! Configuration file discovery and logging resolution
//!
//! An explicit `--config-file` must exist. Without one the default
//! `<config dir>/Routemq/routemq.toml` is used when present, otherwise the
//! broker starts with defaults and an empty topology.

use super::args::Args;
use crate::broker::{BrokerConfig, BrokerError, BrokerResult};
use crate::broker::config::LoggingConfig;
use crate::core::logging::level_for_verbosity;
use std::path::{Path, PathBuf};

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Routemq").join("routemq.toml"))
}

/// Load the configuration named on the command line, or the default one
pub fn load_config(config_file: Option<&Path>) -> BrokerResult<BrokerConfig> {
    let path = match config_file {
        Some(path) if !path.exists() => {
            return Err(BrokerError::Config {
                message: format!(
                    "the specified configuration file does not exist: {}",
                    path.display()
                ),
            });
        }
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|path| path.exists()),
    };

    match path {
        Some(path) => {
            let config = BrokerConfig::from_file(&path)?;
            log::debug!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(BrokerConfig::default()),
    }
}

/// Effective logging settings after applying command-line overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: Option<String>,
    pub file: Option<String>,
}

impl LogSettings {
    /// `--log-level` wins, then a non-zero `-v`/`-q`, then the config file
    pub fn resolve(args: &Args, config: &LoggingConfig) -> Self {
        let verbosity = args.verbosity();
        let level = match (&args.log_level, verbosity, &config.level) {
            (Some(level), _, _) => level.clone(),
            (None, v, _) if v != 0 => level_for_verbosity(v).to_string(),
            (None, _, Some(level)) => level.clone(),
            (None, _, None) => level_for_verbosity(0).to_string(),
        };

        // "none" and "-" disable a file configured elsewhere
        let file = args
            .log_file
            .clone()
            .or_else(|| config.file.clone())
            .filter(|f| !(f.eq_ignore_ascii_case("none") || f == "-"));

        Self {
            level,
            format: args.log_format.clone().or_else(|| config.format.clone()),
            file,
        }
    }
}
