//! Configuration module for stackform.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stackform.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    ExecutorConfig, ProviderConfig, StackConfig, StackMetadata, StateBackend, StateConfig,
};
pub use parser::{
    apply_env_overrides, find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
