//! Configuration parser for loading stack files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, StackformError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::StackConfig;

/// Environment variable holding the provider API token.
pub const PROVIDER_TOKEN_VAR: &str = "STACKFORM_PROVIDER_TOKEN";

/// Configuration parser for loading stack configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(StackformError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StackformError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing YAML configuration");

        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StackformError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed stack {} with {} resources",
            config.stack.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `STACKFORM_<SECTION>_<KEY>` (e.g., `STACKFORM_STACK_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;
        apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StackformError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provider API token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn provider_token() -> Result<String> {
        std::env::var(PROVIDER_TOKEN_VAR).map_err(|_| {
            StackformError::Config(ConfigError::MissingEnvVar {
                name: String::from(PROVIDER_TOKEN_VAR),
            })
        })
    }
}

/// Applies `STACKFORM_*` overrides, reading variables through `lookup`.
pub fn apply_env_overrides(config: &mut StackConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(name) = lookup("STACKFORM_STACK_NAME") {
        debug!("Overriding stack.name from environment");
        config.stack.name = name;
    }

    if let Some(env) = lookup("STACKFORM_STACK_ENVIRONMENT") {
        debug!("Overriding stack.environment from environment");
        config.stack.environment = env;
    }

    if let Some(region) = lookup("STACKFORM_STACK_REGION") {
        debug!("Overriding stack.region from environment");
        config.stack.region = Some(region);
    }

    if let Some(bucket) = lookup("STACKFORM_STATE_BUCKET") {
        debug!("Overriding state.bucket from environment");
        config.state.bucket = Some(bucket);
    }

    if let Some(prefix) = lookup("STACKFORM_STATE_PREFIX") {
        debug!("Overriding state.prefix from environment");
        config.state.prefix = Some(prefix);
    }

    if let Some(endpoint) = lookup("STACKFORM_PROVIDER_ENDPOINT") {
        debug!("Overriding provider.endpoint from environment");
        config.provider.endpoint = Some(endpoint);
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "stackform.yaml",
    "stackform.yml",
    "stack.yaml",
    "stack.yml",
];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StackformError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateBackend;
    use crate::model::PropertyValue;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
stack:
  name: web
state:
  backend: local
resources: []
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(config.stack.name, "web");
        assert_eq!(config.stack.environment, "dev");
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
stack:
  name: web
  environment: prod
  account: "983245592084"
  region: us-east-1

state:
  backend: s3
  bucket: stackform-state
  prefix: web/prod

provider:
  endpoint: https://provider.internal
  max_retries: 5

executor:
  concurrency: 8

resources:
  - id: vpc
    type: ec2:vpc
    properties:
      cidr_block: 10.0.0.0/16
  - id: sg
    type: ec2:security-group
    properties:
      vpc_id: { ref: vpc }
      name: web
  - id: lb
    type: elbv2:load-balancer
    depends_on: [sg]
    properties:
      security_groups:
        - { ref: sg, output: group_id }
"#;
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).unwrap();

        assert_eq!(config.stack_id(), "web-prod");
        assert_eq!(config.state.backend, StateBackend::S3);
        assert_eq!(config.executor.concurrency, 8);
        assert_eq!(config.provider.max_retries, 5);
        assert_eq!(config.resource_ids(), vec!["vpc", "sg", "lb"]);

        let sg = &config.resources[1];
        assert!(matches!(sg.properties.get("vpc_id"), Some(PropertyValue::Ref(_))));
        assert!(sg.dependency_ids().contains("vpc"));
        assert!(config.resources[2].depends_on.contains("sg"));
    }

    #[test]
    fn test_parse_error_has_location() {
        let parser = ConfigParser::new();
        let err = parser
            .parse_yaml("stack: [", Some(Path::new("stackform.yaml")))
            .unwrap_err();
        assert!(matches!(
            err,
            StackformError::Config(ConfigError::ParseError { location: Some(ref l), .. })
                if l == "stackform.yaml"
        ));
    }

    #[test]
    fn test_env_overrides() {
        let parser = ConfigParser::new();
        let mut config = parser.parse_yaml("stack:\n  name: web\n", None).unwrap();

        let vars: BTreeMap<&str, &str> = [
            ("STACKFORM_STACK_ENVIRONMENT", "prod"),
            ("STACKFORM_STATE_BUCKET", "shared-state"),
            ("STACKFORM_PROVIDER_ENDPOINT", "http://localhost:9000"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut config, |name| vars.get(name).map(|v| (*v).to_string()));

        assert_eq!(config.stack.name, "web");
        assert_eq!(config.stack_id(), "web-prod");
        assert_eq!(config.state.bucket.as_deref(), Some("shared-state"));
        assert_eq!(
            config.provider.endpoint.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("stackform.yaml"), "stack:\n  name: web\n").unwrap();
        let nested = temp.path().join("modules").join("network");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, temp.path().join("stackform.yaml"));
    }
}
