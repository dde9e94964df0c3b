//! Resource provider interface.
//!
//! The executor never talks to a cloud directly: it hands resolved
//! properties to a [`ResourceProvider`] and records what comes back.
//! Retry policy lives in the provider implementations.

mod http;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::ResolvedProperties;

pub use http::{HttpProvider, HttpProviderOptions};
pub use memory::{MemoryProvider, ProviderCall, ProviderOperation};

/// Outputs reported by a provider for one resource.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// What a provider returns after creating a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    /// Identifier assigned by the provider.
    #[serde(rename = "id")]
    pub provider_id: String,
    /// Outputs of the new resource.
    #[serde(default)]
    pub outputs: Outputs,
}

/// Operations the executor needs from an infrastructure backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Creates a resource of `resource_type` with fully resolved properties.
    async fn create(
        &self,
        resource_type: &str,
        properties: &ResolvedProperties,
    ) -> Result<CreatedResource>;

    /// Applies changed properties to an existing resource.
    ///
    /// `diff` holds only changed keys; a removed property is sent as null.
    /// The returned outputs are merged over the recorded ones.
    async fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        diff: &ResolvedProperties,
    ) -> Result<Outputs>;

    /// Deletes a resource. Implementations report a missing resource as
    /// `ProviderError::NotFound`.
    async fn delete(&self, resource_type: &str, provider_id: &str) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
