//! Configuration Loader
//!
//! Environment-aware configuration loading: defaults, an optional TOML file and
//! `TASK_QUEUE__` prefixed environment variables are merged in that order.

use super::error::{ConfigResult, ConfigurationError};
use super::TaskQueueConfig;
use crate::constants::ENVIRONMENT_VAR;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Default location of the configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config/task-queue.toml";

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: TaskQueueConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load(config_file: Option<&Path>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_with_env(config_file, &environment)
    }

    /// Load configuration with an explicit environment name.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load_with_env(
        config_file: Option<&Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let (path, required) = match config_file {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if required && !path.exists() {
            return Err(ConfigurationError::file_not_found(path.display().to_string()));
        }

        debug!(
            environment = %environment,
            config_file = %path.display(),
            "Loading configuration"
        );

        let defaults = config::Config::try_from(&TaskQueueConfig::default())?;
        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                config::Environment::with_prefix("TASK_QUEUE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TaskQueueConfig = settings.try_deserialize()?;
        config.validate()?;

        let source = path.exists().then_some(path);

        tracing::info!(
            environment = %environment,
            config_file = ?source,
            broker = %config.broker.url_redacted(),
            min_workers = config.pool.min_workers,
            max_workers = config.pool.max_workers,
            "⚙️ CONFIG: Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            source,
        }))
    }

    /// Wrap an already built configuration (tests, embedding)
    pub fn from_config(config: TaskQueueConfig, environment: &str) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            environment: environment.to_string(),
            source: None,
        }))
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Detect the environment from `TASK_QUEUE_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string())
    }
}
