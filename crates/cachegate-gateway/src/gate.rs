//! Authorization gate
//!
//! Every method of the surface asks an [`Authorizer`] before dispatching.
//! [`OpenGate`] allows everything, for deployments that authorize
//! upstream. [`PolicyGate`] performs exactly one bounded lookup against a
//! [`PolicyStore`] per call, without caching and without retrying.

use async_trait::async_trait;
use cachegate_core::{AuthorizationRequest, Error, MethodId, PolicyStore, Result, Tenant};
use cachegate_observability::DispatchMetrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Connection name reported when the policy store itself fails
pub const POLICY_STORE: &str = "policy-store";

/// Default bound on a single policy lookup
pub const DEFAULT_POLICY_TIMEOUT: Duration = Duration::from_millis(500);

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Allow or deny `method` for `api_key` within `tenant` at time `at`
    async fn authorize(
        &self,
        method: &MethodId,
        tenant: &Tenant,
        api_key: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Gate used when no policy engine is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

#[async_trait]
impl Authorizer for OpenGate {
    async fn authorize(
        &self,
        _method: &MethodId,
        _tenant: &Tenant,
        _api_key: &str,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Gate backed by a policy store
pub struct PolicyGate {
    store: Arc<dyn PolicyStore>,
    timeout: Duration,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl PolicyGate {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_POLICY_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn denied(&self, method: &MethodId, tenant: &Tenant) -> Error {
        tracing::warn!(tenant = %tenant, method = %method, "Authorization denied");
        if let Some(metrics) = &self.metrics {
            metrics.record_denied(tenant.as_str(), method.as_str());
        }
        Error::Unauthorized {
            method: method.to_string(),
            tenant: tenant.to_string(),
        }
    }
}

#[async_trait]
impl Authorizer for PolicyGate {
    async fn authorize(
        &self,
        method: &MethodId,
        tenant: &Tenant,
        api_key: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if method.as_str().is_empty() {
            return Err(Error::InvalidRequest("empty method identifier".to_string()));
        }

        let request = AuthorizationRequest {
            method: method.clone(),
            tenant: tenant.clone(),
            api_key: api_key.to_string(),
            timestamp: at,
        };

        match tokio::time::timeout(self.timeout, self.store.is_allowed(&request)).await {
            Ok(Ok(true)) => {
                tracing::debug!(tenant = %tenant, method = %method, "Authorization granted");
                Ok(())
            }
            Ok(Ok(false)) => Err(self.denied(method, tenant)),
            Ok(Err(err)) => {
                tracing::warn!(tenant = %tenant, method = %method, error = %err, "Policy lookup failed");
                Err(Error::TransportFailure {
                    connection: POLICY_STORE.to_string(),
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(
                    tenant = %tenant,
                    method = %method,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Policy lookup timed out"
                );
                Err(Error::TransportFailure {
                    connection: POLICY_STORE.to_string(),
                    reason: format!("policy lookup timed out after {}ms", self.timeout.as_millis()),
                })
            }
        }
    }
}
