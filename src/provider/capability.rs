//! The provider capability trait.
//!
//! Providers are the only component that talks to the outside world. The
//! engine never constructs provider identifiers itself; it records what the
//! provider returns.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::Value;
use crate::error::Result;

use super::types::{CreateResponse, KindSchema, RetryPolicy};

/// Capability interface implemented by resource providers.
///
/// All mutating calls receive fully resolved attributes; reference values
/// never reach a provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name for logs and reports.
    fn name(&self) -> &str;

    /// Returns the schema for a kind.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedKind` if the provider does not handle `kind`.
    fn schema(&self, kind: &str) -> Result<KindSchema>;

    /// Returns the retry policy for transient failures.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Creates a resource.
    ///
    /// `request_token` is stable across retries of the same logical create;
    /// providers that declare `supports_request_tokens` must return the
    /// original result for a repeated token instead of creating a duplicate.
    async fn create(
        &self,
        kind: &str,
        attributes: &BTreeMap<String, Value>,
        request_token: &str,
    ) -> Result<CreateResponse>;

    /// Reads the current attributes of a resource.
    ///
    /// Returns `None` if the resource no longer exists.
    async fn read(
        &self,
        kind: &str,
        provider_id: &str,
    ) -> Result<Option<BTreeMap<String, Value>>>;

    /// Updates a resource in place and returns the resulting attributes.
    async fn update(
        &self,
        kind: &str,
        provider_id: &str,
        attributes: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>>;

    /// Destroys a resource. Destroying an already-gone resource succeeds.
    async fn destroy(&self, kind: &str, provider_id: &str) -> Result<()>;
}

#[async_trait]
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn schema(&self, kind: &str) -> Result<KindSchema> {
        (**self).schema(kind)
    }

    fn retry_policy(&self) -> RetryPolicy {
        (**self).retry_policy()
    }

    async fn create(
        &self,
        kind: &str,
        attributes: &BTreeMap<String, Value>,
        request_token: &str,
    ) -> Result<CreateResponse> {
        (**self).create(kind, attributes, request_token).await
    }

    async fn read(
        &self,
        kind: &str,
        provider_id: &str,
    ) -> Result<Option<BTreeMap<String, Value>>> {
        (**self).read(kind, provider_id).await
    }

    async fn update(
        &self,
        kind: &str,
        provider_id: &str,
        attributes: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>> {
        (**self).update(kind, provider_id, attributes).await
    }

    async fn destroy(&self, kind: &str, provider_id: &str) -> Result<()> {
        (**self).destroy(kind, provider_id).await
    }
}
