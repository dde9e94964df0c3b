//! In-process resource provider.
//!
//! Keeps resources in memory and journals every call. Used for
//! `--simulate` runs and as a test double.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ProviderError, Result};
use crate::model::{ResolvedProperties, ID_OUTPUT};
use crate::state::StateSnapshot;

use super::{CreatedResource, Outputs, ResourceProvider};

/// Kind of provider call recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOperation {
    /// A create call.
    Create,
    /// An update call.
    Update,
    /// A delete call.
    Delete,
}

/// One journaled provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// Operation performed.
    pub operation: ProviderOperation,
    /// Resource type passed by the caller.
    pub resource_type: String,
    /// Provider id acted on (assigned id for creates).
    pub provider_id: String,
}

#[derive(Debug, Clone)]
struct StoredResource {
    resource_type: String,
    properties: ResolvedProperties,
}

/// In-memory provider.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    resources: Mutex<BTreeMap<String, StoredResource>>,
    journal: Mutex<Vec<ProviderCall>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Builds the provider id prefix from the last segment of a type tag.
fn id_prefix(resource_type: &str) -> &str {
    resource_type
        .rsplit(':')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("resource")
}

fn outputs_for(resource_type: &str, provider_id: &str, properties: &ResolvedProperties) -> Outputs {
    let mut outputs: Outputs = properties.clone();
    outputs.insert(
        String::from(ID_OUTPUT),
        serde_json::Value::String(provider_id.to_string()),
    );
    outputs.insert(
        String::from("arn"),
        serde_json::Value::String(format!("arn:stackform:{resource_type}:{provider_id}")),
    );
    if resource_type == "elbv2:load-balancer" {
        outputs.insert(
            String::from("dns_name"),
            serde_json::Value::String(format!("{provider_id}.elb.simulated")),
        );
        outputs.insert(
            String::from("canonical_hosted_zone_id"),
            serde_json::Value::String(String::from("ZSIMULATED")),
        );
    }
    outputs
}

/// Decrements the in-flight counter when a call finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider that already holds every resource in `snapshot`,
    /// deposed instances included.
    #[must_use]
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        let mut resources = BTreeMap::new();
        for record in snapshot.resources.values() {
            resources.insert(
                record.provider_id.clone(),
                StoredResource {
                    resource_type: record.resource_type.clone(),
                    properties: record.resolved.clone(),
                },
            );
        }
        for deposed in &snapshot.deposed {
            resources.insert(
                deposed.provider_id.clone(),
                StoredResource {
                    resource_type: deposed.resource_type.clone(),
                    properties: ResolvedProperties::new(),
                },
            );
        }

        Self {
            resources: Mutex::new(resources),
            ..Self::default()
        }
    }

    /// Makes every call wait for `latency` before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the recorded calls in the order they completed.
    pub async fn journal(&self) -> Vec<ProviderCall> {
        self.journal.lock().await.clone()
    }

    /// Returns the number of live resources.
    pub async fn resource_count(&self) -> usize {
        self.resources.lock().await.len()
    }

    /// Returns true if a resource with `provider_id` is live.
    pub async fn contains(&self, provider_id: &str) -> bool {
        self.resources.lock().await.contains_key(provider_id)
    }

    /// Returns the stored properties of a live resource.
    pub async fn properties(&self, provider_id: &str) -> Option<ResolvedProperties> {
        self.resources
            .lock()
            .await
            .get(provider_id)
            .map(|r| r.properties.clone())
    }

    /// Highest number of calls that were in progress at the same time.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    async fn record(&self, operation: ProviderOperation, resource_type: &str, provider_id: &str) {
        self.journal.lock().await.push(ProviderCall {
            operation,
            resource_type: resource_type.to_string(),
            provider_id: provider_id.to_string(),
        });
    }
}

#[async_trait]
impl ResourceProvider for MemoryProvider {
    async fn create(
        &self,
        resource_type: &str,
        properties: &ResolvedProperties,
    ) -> Result<CreatedResource> {
        let _guard = self.enter().await;

        let suffix = Uuid::new_v4().simple().to_string();
        let provider_id = format!("{}-{}", id_prefix(resource_type), &suffix[..8]);

        self.resources.lock().await.insert(
            provider_id.clone(),
            StoredResource {
                resource_type: resource_type.to_string(),
                properties: properties.clone(),
            },
        );
        self.record(ProviderOperation::Create, resource_type, &provider_id)
            .await;
        debug!("Simulated create of {resource_type} as {provider_id}");

        Ok(CreatedResource {
            outputs: outputs_for(resource_type, &provider_id, properties),
            provider_id,
        })
    }

    async fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        diff: &ResolvedProperties,
    ) -> Result<Outputs> {
        let _guard = self.enter().await;

        let outputs = {
            let mut resources = self.resources.lock().await;
            let stored = resources
                .get_mut(provider_id)
                .ok_or_else(|| ProviderError::NotFound {
                    provider_id: provider_id.to_string(),
                })?;

            if stored.resource_type != resource_type {
                return Err(ProviderError::Rejected {
                    operation: String::from("update"),
                    resource_type: resource_type.to_string(),
                    message: format!(
                        "{provider_id} is a {}, not a {resource_type}",
                        stored.resource_type
                    ),
                }
                .into());
            }

            for (key, value) in diff {
                if value.is_null() {
                    stored.properties.remove(key);
                } else {
                    stored.properties.insert(key.clone(), value.clone());
                }
            }
            outputs_for(resource_type, provider_id, &stored.properties)
        };

        self.record(ProviderOperation::Update, resource_type, provider_id)
            .await;
        debug!("Simulated update of {provider_id}");
        Ok(outputs)
    }

    async fn delete(&self, resource_type: &str, provider_id: &str) -> Result<()> {
        let _guard = self.enter().await;

        if self.resources.lock().await.remove(provider_id).is_none() {
            return Err(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            }
            .into());
        }

        self.record(ProviderOperation::Delete, resource_type, provider_id)
            .await;
        debug!("Simulated delete of {provider_id}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
