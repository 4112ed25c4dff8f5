//! In-memory policy store
//!
//! Per tenant, a list of API keys and the methods each may call. An entry
//! with an empty key is the anonymous credential; without one, calls with
//! an empty key are denied. Keys may carry an expiry instant, after which
//! they no longer authorize anything.

use async_trait::async_trait;
use cachegate_core::{AuthorizationRequest, MethodId, PolicyError, PolicyStore, Tenant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Method list entry granting every method
pub const ANY_METHOD: &str = "*";

/// Methods one API key may call within a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyPolicy {
    /// Credential value; `$VAR` / `${VAR}` references are resolved at load
    #[serde(default)]
    pub api_key: String,

    /// Method identifiers, or `*` for all
    pub methods: Vec<String>,

    /// Instant at which the key stops being valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKeyPolicy {
    pub fn new<I, S>(api_key: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            api_key: api_key.into(),
            methods: methods.into_iter().map(Into::into).collect(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.api_key.is_empty()
    }

    pub fn allows(&self, method: &MethodId) -> bool {
        self.methods
            .iter()
            .any(|allowed| allowed == ANY_METHOD || allowed == method.as_str())
    }

    /// Valid strictly before its expiry instant
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| at < expires_at)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticPolicyStore {
    tenants: HashMap<Tenant, Vec<ApiKeyPolicy>>,
}

impl StaticPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant: Tenant, policies: Vec<ApiKeyPolicy>) -> Self {
        self.insert(tenant, policies);
        self
    }

    pub fn insert(&mut self, tenant: Tenant, policies: Vec<ApiKeyPolicy>) {
        self.tenants.insert(tenant, policies);
    }

    pub fn tenants(&self) -> impl Iterator<Item = (&Tenant, &[ApiKeyPolicy])> {
        self.tenants
            .iter()
            .map(|(tenant, policies)| (tenant, policies.as_slice()))
    }

    fn decide(&self, request: &AuthorizationRequest) -> bool {
        let Some(policies) = self.tenants.get(&request.tenant) else {
            return false;
        };

        policies
            .iter()
            .filter(|policy| policy.api_key == request.api_key)
            .any(|policy| policy.is_valid_at(request.timestamp) && policy.allows(&request.method))
    }
}

#[async_trait]
impl PolicyStore for StaticPolicyStore {
    async fn is_allowed(&self, request: &AuthorizationRequest) -> Result<bool, PolicyError> {
        Ok(self.decide(request))
    }
}
