//! REST resource provider.
//!
//! Talks JSON to a provisioning endpoint:
//!
//! - `POST /resources` with `{ "type", "properties" }` returns `{ "id", "outputs" }`
//! - `PATCH /resources/{id}` with `{ "type", "properties" }` returns `{ "outputs" }`
//! - `DELETE /resources/{id}?type=...` returns any 2xx
//!
//! Rate limiting is retried with linear backoff for every call. Network
//! failures are retried only for `PATCH` and `DELETE`: a `POST` that timed
//! out may still have created the resource. Other statuses are not retried.

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, Result, StackformError};
use crate::model::ResolvedProperties;

use super::{CreatedResource, Outputs, ResourceProvider};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum number of attempts per operation.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between attempts in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Upper bound on a single backoff, whatever the server asks for.
const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Tunables for [`HttpProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpProviderOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per operation, first try included.
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `n * retry_delay`.
    pub retry_delay: Duration,
    /// Cap applied to any single backoff.
    pub max_retry_delay: Duration,
}

impl Default for HttpProviderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_retry_delay: Duration::from_millis(DEFAULT_MAX_RETRY_DELAY_MS),
        }
    }
}

/// JSON REST provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Endpoint base URL without trailing slash.
    endpoint: String,
    /// Bearer token.
    token: String,
    /// Retry settings.
    options: HttpProviderOptions,
}

/// Body of create and update requests.
#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    #[serde(rename = "type")]
    resource_type: &'a str,
    properties: &'a ResolvedProperties,
}

/// Body of update responses.
#[derive(Debug, Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    outputs: Outputs,
}

/// Error body the endpoint may send.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "error")]
    message: String,
}

impl HttpProvider {
    /// Creates a provider with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: &str) -> Result<Self> {
        Self::with_options(endpoint, token, HttpProviderOptions::default())
    }

    /// Creates a provider with custom timeout and retry settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_options(endpoint: &str, token: &str, options: HttpProviderOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            options,
        })
    }

    /// Endpoint base URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(header::ACCEPT, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
    }

    /// Backoff before attempt `attempt` (1-based retry count).
    fn backoff(&self, attempt: u32, error: &StackformError) -> Duration {
        let linear = self.options.retry_delay * attempt;
        let requested = error
            .retry_delay_secs()
            .filter(|_| matches!(error, StackformError::Provider(ProviderError::RateLimited { .. })))
            .map_or(Duration::ZERO, Duration::from_secs);
        linear.max(requested).min(self.options.max_retry_delay)
    }

    /// Runs `call` until it succeeds, fails permanently or retries run out.
    ///
    /// With `idempotent` false only rate limiting is retried.
    async fn with_retries<T, F, Fut>(&self, operation: &str, idempotent: bool, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: Send,
    {
        let attempts = self.options.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if retry_allowed(&e, idempotent) && attempt + 1 < attempts => {
                    attempt += 1;
                    let delay = self.backoff(attempt, &e);
                    warn!(
                        "{operation} failed ({e}), retry {attempt} of {} in {}ms",
                        attempts - 1,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends a request and maps transport errors.
    async fn send(builder: RequestBuilder) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")).into())
    }

    /// Maps non-success statuses to provider errors.
    async fn check_status(
        response: Response,
        operation: &str,
        resource_type: &str,
        provider_id: Option<&str>,
    ) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            }
            .into());
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthenticationFailed {
                message: String::from("Invalid provider token"),
            }
            .into());
        }

        if status == StatusCode::NOT_FOUND
            && let Some(id) = provider_id
        {
            return Err(ProviderError::NotFound {
                provider_id: id.to_string(),
            }
            .into());
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ProviderError::Rejected {
                operation: operation.to_string(),
                resource_type: resource_type.to_string(),
                message,
            }
            .into());
        }

        Err(ProviderError::api_error(status.as_u16(), message).into())
    }

    async fn create_once(
        &self,
        resource_type: &str,
        properties: &ResolvedProperties,
    ) -> Result<CreatedResource> {
        let body = ResourceRequest {
            resource_type,
            properties,
        };
        trace!("POST /resources for {resource_type}");

        let response = Self::send(self.request(Method::POST, "/resources").json(&body)).await?;
        let response = Self::check_status(response, "create", resource_type, None).await?;

        let created: CreatedResource = response.json().await.map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse create response: {e}"),
        })?;

        if created.provider_id.is_empty() {
            return Err(ProviderError::InvalidResponse {
                message: String::from("Create response carries an empty id"),
            }
            .into());
        }

        Ok(created)
    }

    async fn update_once(
        &self,
        resource_type: &str,
        provider_id: &str,
        diff: &ResolvedProperties,
    ) -> Result<Outputs> {
        let body = ResourceRequest {
            resource_type,
            properties: diff,
        };
        trace!("PATCH /resources/{provider_id}");

        let path = format!("/resources/{provider_id}");
        let response = Self::send(self.request(Method::PATCH, &path).json(&body)).await?;
        let response = Self::check_status(response, "update", resource_type, Some(provider_id)).await?;

        let updated: UpdateResponse = response.json().await.map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse update response: {e}"),
        })?;

        Ok(updated.outputs)
    }

    async fn delete_once(&self, resource_type: &str, provider_id: &str) -> Result<()> {
        trace!("DELETE /resources/{provider_id}");

        let path = format!("/resources/{provider_id}");
        let builder = self
            .request(Method::DELETE, &path)
            .query(&[("type", resource_type)]);
        let response = Self::send(builder).await?;
        Self::check_status(response, "delete", resource_type, Some(provider_id)).await?;
        Ok(())
    }
}

fn retry_allowed(error: &StackformError, idempotent: bool) -> bool {
    match error {
        StackformError::Provider(ProviderError::RateLimited { .. }) => true,
        _ => idempotent && error.is_retryable(),
    }
}

#[async_trait]
impl ResourceProvider for HttpProvider {
    async fn create(
        &self,
        resource_type: &str,
        properties: &ResolvedProperties,
    ) -> Result<CreatedResource> {
        let created = self
            .with_retries("create", false, || self.create_once(resource_type, properties))
            .await?;
        debug!("Created {resource_type} as {}", created.provider_id);
        Ok(created)
    }

    async fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        diff: &ResolvedProperties,
    ) -> Result<Outputs> {
        let outputs = self
            .with_retries("update", true, || self.update_once(resource_type, provider_id, diff))
            .await?;
        debug!("Updated {resource_type} {provider_id} ({} properties)", diff.len());
        Ok(outputs)
    }

    async fn delete(&self, resource_type: &str, provider_id: &str) -> Result<()> {
        self.with_retries("delete", true, || self.delete_once(resource_type, provider_id))
            .await?;
        debug!("Deleted {resource_type} {provider_id}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
