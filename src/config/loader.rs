//! Configuration Loader
//!
//! Environment-aware layered loading. Later layers override earlier ones:
//!
//! 1. compiled defaults ([`CourierConfig::default`])
//! 2. `<dir>/courier.{toml,yaml,json}`
//! 3. `<dir>/courier.<environment>.{toml,yaml,json}`
//! 4. environment variables prefixed `COURIER_`, sections separated by `__`
//!    (`COURIER_BROKER__URL`, `COURIER_CONSUMER__MAX_CONCURRENCY`)
//!
//! Files are optional. The merged result is validated before it is returned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File};
use tracing::debug;

use super::error::ConfigResult;
use super::CourierConfig;
use crate::logging::get_environment;

const CONFIG_FILE_STEM: &str = "courier";
const ENV_PREFIX: &str = "COURIER";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    directory: PathBuf,
    environment: String,
    /// Replaces the process environment; used to keep tests hermetic
    env_vars: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Loader for `directory`, with the environment taken from `COURIER_ENV`/`APP_ENV`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            environment: get_environment(),
            env_vars: None,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Read overrides from `vars` instead of the process environment
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn load(&self) -> ConfigResult<CourierConfig> {
        let base = self.directory.join(CONFIG_FILE_STEM);
        let overlay = self
            .directory
            .join(format!("{CONFIG_FILE_STEM}.{}", self.environment));

        debug!(
            directory = %self.directory.display(),
            environment = %self.environment,
            "Loading configuration"
        );

        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .try_parsing(true);
        if let Some(vars) = &self.env_vars {
            environment = environment.source(Some(vars.clone().into_iter().collect()));
        }

        let config: CourierConfig = Config::builder()
            .add_source(Config::try_from(&CourierConfig::default())?)
            .add_source(File::with_name(&base.to_string_lossy()).required(false))
            .add_source(File::with_name(&overlay.to_string_lossy()).required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;

        debug!(
            environment = %self.environment,
            task_queue = %config.task_queue_name,
            max_concurrency = config.consumer.max_concurrency,
            "Configuration loaded"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationError;
    use crate::database::IsolationLevel;
    use std::fs;
    use tempfile::TempDir;

    fn loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new(dir.path())
            .with_environment("test")
            .with_env_vars(Vec::<(String, String)>::new())
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let config = loader(&dir).load().unwrap();
        assert_eq!(config, CourierConfig::default());
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("courier.toml"),
            r#"
task_queue_name = "jobs"

[broker]
url = "amqp://base:5672/%2F"
prefetch_count = 20

[consumer]
max_concurrency = 4
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("courier.test.yaml"),
            "broker:\n  url: amqp://test:5672/%2F\ndatabase:\n  default_isolation: repeatable_read\n",
        )
        .unwrap();

        let config = loader(&dir).load().unwrap();

        assert_eq!(config.task_queue_name, "jobs");
        assert_eq!(config.broker.url, "amqp://test:5672/%2F");
        assert_eq!(config.broker.prefetch_count, 20);
        assert_eq!(config.consumer.max_concurrency, 4);
        assert_eq!(config.database.default_isolation, IsolationLevel::RepeatableRead);
    }

    #[test]
    fn test_env_vars_override_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("courier.toml"),
            "[consumer]\nmax_concurrency = 4\n",
        )
        .unwrap();

        let config = loader(&dir)
            .with_env_vars([
                ("COURIER_CONSUMER__MAX_CONCURRENCY", "8"),
                ("COURIER_BROKER__CONNECTION_NAME", "billing"),
            ])
            .load()
            .unwrap();

        assert_eq!(config.consumer.max_concurrency, 8);
        assert_eq!(config.broker.connection_name, "billing");
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("courier.toml"), "[consumer]\nmax_queue_size = 0\n").unwrap();

        let err = loader(&dir).load().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_malformed_file_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("courier.toml"), "[broker\nurl = ").unwrap();

        let err = loader(&dir).load().unwrap_err();
        assert!(matches!(err, ConfigurationError::Load(_)));
    }
}
