//! Configuration validation for stack files.
//!
//! Checks settings that the graph builder does not: naming, backend
//! requirements, provider and executor limits. Structural problems in the
//! resource declarations (duplicates, unknown references, cycles) are left
//! to the declaration session and the graph builder.

use crate::error::{ConfigError, Result, StackformError};
use tracing::debug;

use super::spec::{ExecutorConfig, ProviderConfig, StackConfig, StackMetadata, StateBackend, StateConfig};

/// Largest concurrency the executor accepts.
const MAX_CONCURRENCY: usize = 64;

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StackformError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Runs every check and collects errors and warnings without failing.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_stack(&config.stack, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_executor(config.executor, &mut result);
        Self::validate_resources(config, &mut result);

        result
    }

    /// Validates stack metadata.
    fn validate_stack(stack: &StackMetadata, result: &mut ValidationResult) {
        if stack.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("stack.name"),
                message: String::from("Stack name cannot be empty"),
            });
        } else if !is_valid_name(&stack.name) {
            result.errors.push(ValidationError {
                field: String::from("stack.name"),
                message: format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    stack.name
                ),
            });
        }

        if stack.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("stack.environment"),
                message: String::from("Environment cannot be empty"),
            });
        } else if !is_valid_name(&stack.environment) {
            result.errors.push(ValidationError {
                field: String::from("stack.environment"),
                message: format!(
                    "Environment '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    stack.environment
                ),
            });
        }

        if let Some(account) = &stack.account
            && (account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()))
        {
            result
                .warnings
                .push(format!("stack.account: '{account}' does not look like a 12-digit account id"));
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        match &provider.endpoint {
            Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
                result.errors.push(ValidationError {
                    field: String::from("provider.endpoint"),
                    message: format!("Provider endpoint must be an http(s) URL: {endpoint}"),
                });
            }
            Some(_) => {}
            None => result.warnings.push(String::from(
                "provider.endpoint is not set; only --simulate runs are possible",
            )),
        }

        if provider.max_retries == 0 {
            result.errors.push(ValidationError {
                field: String::from("provider.max_retries"),
                message: String::from("max_retries must be at least 1"),
            });
        }

        if provider.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("provider.timeout_secs"),
                message: String::from("timeout_secs must be at least 1"),
            });
        }
    }

    /// Validates executor configuration.
    fn validate_executor(executor: ExecutorConfig, result: &mut ValidationResult) {
        if executor.concurrency == 0 || executor.concurrency > MAX_CONCURRENCY {
            result.errors.push(ValidationError {
                field: String::from("executor.concurrency"),
                message: format!(
                    "Concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                    executor.concurrency
                ),
            });
        }
    }

    /// Validates resource declarations against the type registry.
    fn validate_resources(config: &StackConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        let registry = config.registry();

        for (i, resource) in config.resources.iter().enumerate() {
            if resource.resource_type.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("resources[{i}].type"),
                    message: format!("Resource '{}' has no type", resource.id),
                });
            } else if !registry.is_registered(&resource.resource_type) {
                result.warnings.push(format!(
                    "resources[{i}].type: '{}' has no replacement triggers; every change is applied in place",
                    resource.resource_type
                ));
            }
        }

        for (resource_type, fields) in &config.replace_on {
            if fields.is_empty() {
                result
                    .warnings
                    .push(format!("replace_on.{resource_type}: empty field list"));
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> StackConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("web-tier-2"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web")); // uppercase
        assert!(!is_valid_name("2web")); // starts with number
        assert!(!is_valid_name("web_tier")); // underscore
        assert!(!is_valid_name("web-")); // ends with hyphen
        assert!(!is_valid_name("web--tier")); // consecutive hyphens
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = parse("stack:\n  name: web\nstate:\n  backend: s3\n");
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(matches!(
            err,
            StackformError::Config(ConfigError::ValidationError { field: Some(ref f), .. })
                if f == "state.bucket"
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = parse("stack:\n  name: web\nexecutor:\n  concurrency: 0\n");
        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "executor.concurrency");
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let config = parse(
            r"
stack:
  name: web
  account: abc
resources:
  - id: queue
    type: custom:queue
",
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
        // account shape, missing endpoint, unregistered type
        assert_eq!(result.warning_count(), 3);
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let config = parse("stack:\n  name: web\nprovider:\n  endpoint: ftp://x\n");
        let result = ConfigValidator::new().check(&config);
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].field, "provider.endpoint");
    }
}
