//! Configuration types for stack files.
//!
//! This module defines the structs that map to `stackform.yaml`. A stack
//! file names the stack, says where its state lives, how to reach the
//! resource provider, and declares the resources themselves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::GraphError;
use crate::model::{DeclarationContext, ResourceNode, ResourceTypeRegistry};

/// The root configuration structure of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Stack metadata.
    pub stack: StackMetadata,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Resource provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Executor configuration.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Extra replacement triggers keyed by resource type.
    #[serde(default)]
    pub replace_on: BTreeMap<String, Vec<String>>,
    /// Declared resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceNode>,
}

/// Stack-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackMetadata {
    /// Stack name.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Target cloud account.
    #[serde(default)]
    pub account: Option<String>,
    /// Target region.
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Resource provider configuration.
///
/// Without an endpoint, only simulated runs are possible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// REST endpoint base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per provider call, first try included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff between attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Executor configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of provider calls in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

// Default value functions

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

const fn default_concurrency() -> usize {
    4
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl StackConfig {
    /// Returns the stack identifier: `<name>-<environment>`.
    #[must_use]
    pub fn stack_id(&self) -> String {
        format!("{}-{}", self.stack.name, self.stack.environment)
    }

    /// Returns resource ids in declaration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }

    /// Runs every declared resource through a fresh declaration session.
    ///
    /// # Errors
    ///
    /// Returns the first declaration error (duplicate id, malformed id or
    /// self-reference).
    pub fn declare(&self) -> Result<Vec<ResourceNode>, GraphError> {
        let mut ctx = DeclarationContext::new();
        for resource in &self.resources {
            ctx.declare_node(resource.clone())?;
        }
        Ok(ctx.finish())
    }

    /// Returns the built-in replacement triggers extended with this file's.
    #[must_use]
    pub fn registry(&self) -> ResourceTypeRegistry {
        ResourceTypeRegistry::builtin().with_overrides(&self.replace_on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let yaml = "stack:\n  name: web\n";
        let config: StackConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.stack_id(), "web-dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.executor.concurrency, 4);
        assert_eq!(config.provider.max_retries, 3);
        assert!(config.provider.endpoint.is_none());
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_declare_rejects_duplicates() {
        let yaml = r"
stack:
  name: web
resources:
  - id: vpc
    type: ec2:vpc
  - id: vpc
    type: ec2:vpc
";
        let config: StackConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.declare(),
            Err(GraphError::DuplicateId { id }) if id == "vpc"
        ));
    }

    #[test]
    fn test_registry_includes_overrides() {
        let yaml = r"
stack:
  name: web
replace_on:
  custom:queue: [fifo]
";
        let config: StackConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = config.registry();
        assert!(registry.is_replace_on("custom:queue", "fifo"));
        assert!(registry.is_replace_on("ec2:vpc", "cidr_block"));
    }
}
