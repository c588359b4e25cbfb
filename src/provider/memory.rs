//! In-memory provider.
//!
//! Backs local development and the executor test suite. Resources live in a
//! mutex-guarded map, identifiers are generated UUIDs, and create calls are
//! deduplicated by request token. Failure and latency injection hooks let
//! tests exercise the retry and cancellation paths.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::Value;
use crate::error::{ProviderError, Result, TerraplaneError};

use super::capability::Provider;
use super::schema::builtin_schema;
use super::types::{CreateResponse, KindSchema, RetryPolicy};

/// A resource held by the in-memory provider.
#[derive(Debug, Clone)]
struct StoredResource {
    kind: String,
    attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Live resources keyed by provider identifier.
    resources: BTreeMap<String, StoredResource>,
    /// Request-token dedup cache for create calls.
    tokens: BTreeMap<String, CreateResponse>,
    /// Pending transient failures per kind, consumed one per call.
    transient_failures: BTreeMap<String, u32>,
}

/// In-memory provider for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    /// Artificial latency applied to every call.
    latency: Option<Duration>,
    /// Retry policy reported to the executor.
    retry_policy: RetryPolicy,
}

impl MemoryProvider {
    /// Creates a new empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies artificial latency to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Arranges for the next `count` calls touching `kind` to fail with a
    /// transient error.
    pub async fn inject_transient_failures(&self, kind: &str, count: u32) {
        let mut inner = self.inner.lock().await;
        inner.transient_failures.insert(kind.to_string(), count);
    }

    /// Returns the number of live resources.
    pub async fn resource_count(&self) -> usize {
        self.inner.lock().await.resources.len()
    }

    /// Returns the kind and attributes for a provider id, for assertions.
    pub async fn get_resource(&self, provider_id: &str) -> Option<(String, BTreeMap<String, Value>)> {
        self.inner
            .lock()
            .await
            .resources
            .get(provider_id)
            .map(|r| (r.kind.clone(), r.attributes.clone()))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_transient_failure(inner: &mut Inner, kind: &str) -> Option<TerraplaneError> {
        let remaining = inner.transient_failures.get_mut(kind)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(TerraplaneError::Provider(ProviderError::transient(format!(
            "injected transient failure for kind '{kind}'"
        ))))
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn schema(&self, kind: &str) -> Result<KindSchema> {
        builtin_schema(kind).ok_or_else(|| {
            TerraplaneError::Provider(ProviderError::UnsupportedKind {
                kind: kind.to_string(),
            })
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    async fn create(
        &self,
        kind: &str,
        attributes: &BTreeMap<String, Value>,
        request_token: &str,
    ) -> Result<CreateResponse> {
        self.schema(kind)?;
        self.simulate_latency().await;

        let mut inner = self.inner.lock().await;

        // A repeated token returns the original result, never a duplicate
        if let Some(previous) = inner.tokens.get(request_token) {
            debug!("Deduplicated create for token {request_token}");
            return Ok(previous.clone());
        }

        if let Some(err) = Self::take_transient_failure(&mut inner, kind) {
            return Err(err);
        }

        let provider_id = format!("{kind}-{}", &Uuid::new_v4().to_string()[..8]);

        let mut observed = attributes.clone();
        observed.insert(String::from("id"), Value::String(provider_id.clone()));

        inner.resources.insert(
            provider_id.clone(),
            StoredResource {
                kind: kind.to_string(),
                attributes: observed.clone(),
            },
        );

        let response = CreateResponse {
            provider_id: provider_id.clone(),
            attributes: observed,
        };
        inner
            .tokens
            .insert(request_token.to_string(), response.clone());

        debug!("Created {kind} resource: {provider_id}");
        Ok(response)
    }

    async fn read(
        &self,
        kind: &str,
        provider_id: &str,
    ) -> Result<Option<BTreeMap<String, Value>>> {
        self.schema(kind)?;
        self.simulate_latency().await;

        let inner = self.inner.lock().await;
        Ok(inner
            .resources
            .get(provider_id)
            .filter(|r| r.kind == kind)
            .map(|r| r.attributes.clone()))
    }

    async fn update(
        &self,
        kind: &str,
        provider_id: &str,
        attributes: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>> {
        self.schema(kind)?;
        self.simulate_latency().await;

        let mut inner = self.inner.lock().await;

        if let Some(err) = Self::take_transient_failure(&mut inner, kind) {
            return Err(err);
        }

        let resource = inner.resources.get_mut(provider_id).ok_or_else(|| {
            TerraplaneError::Provider(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            })
        })?;

        let mut observed = attributes.clone();
        observed.insert(String::from("id"), Value::String(provider_id.to_string()));
        resource.attributes = observed.clone();

        debug!("Updated {kind} resource: {provider_id}");
        Ok(observed)
    }

    async fn destroy(&self, kind: &str, provider_id: &str) -> Result<()> {
        self.schema(kind)?;
        self.simulate_latency().await;

        let mut inner = self.inner.lock().await;

        if let Some(err) = Self::take_transient_failure(&mut inner, kind) {
            return Err(err);
        }

        // Destroy of an already-gone resource is a success
        if inner.resources.remove(provider_id).is_some() {
            debug!("Destroyed {kind} resource: {provider_id}");
        } else {
            debug!("Destroy of missing {kind} resource {provider_id} treated as success");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_create_assigns_id() {
        let provider = MemoryProvider::new();
        let response = provider
            .create("network", &attrs(&[("cidr_block", "10.0.0.0/16")]), "tok-1")
            .await
            .expect("create succeeds");

        assert!(response.provider_id.starts_with("network-"));
        assert_eq!(
            response.attributes.get("id"),
            Some(&Value::String(response.provider_id.clone()))
        );
    }

    #[tokio::test]
    async fn test_create_deduplicates_by_token() {
        let provider = MemoryProvider::new();
        let first = provider
            .create("network", &attrs(&[]), "tok-1")
            .await
            .expect("create succeeds");
        let second = provider
            .create("network", &attrs(&[]), "tok-1")
            .await
            .expect("repeat succeeds");

        assert_eq!(first.provider_id, second.provider_id);
        assert_eq!(provider.resource_count().await, 1);
    }

    #[tokio::test]
    async fn test_read_after_destroy_returns_none() {
        let provider = MemoryProvider::new();
        let response = provider
            .create("network", &attrs(&[]), "tok-1")
            .await
            .expect("create succeeds");

        provider
            .destroy("network", &response.provider_id)
            .await
            .expect("destroy succeeds");

        let read = provider
            .read("network", &response.provider_id)
            .await
            .expect("read succeeds");
        assert!(read.is_none());

        // Destroy again: still a success
        provider
            .destroy("network", &response.provider_id)
            .await
            .expect("repeat destroy succeeds");
    }

    #[tokio::test]
    async fn test_update_of_unknown_id_is_not_found() {
        let provider = MemoryProvider::new();
        let result = provider.update("network", "network-missing", &attrs(&[])).await;
        assert!(matches!(
            result,
            Err(TerraplaneError::Provider(ProviderError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let provider = MemoryProvider::new();
        let result = provider.create("flux_capacitor", &attrs(&[]), "tok-1").await;
        assert!(matches!(
            result,
            Err(TerraplaneError::Provider(ProviderError::UnsupportedKind { .. }))
        ));
    }

    #[tokio::test]
    async fn test_transient_failure_injection() {
        let provider = MemoryProvider::new();
        provider.inject_transient_failures("network", 1).await;

        let first = provider.create("network", &attrs(&[]), "tok-1").await;
        assert!(first.expect_err("injected failure").is_retryable());

        let second = provider.create("network", &attrs(&[]), "tok-1").await;
        assert!(second.is_ok());
    }
}
