//! Credential/policy store trait
//!
//! The policy store is the external capability the authorization gate asks
//! for an allow/deny decision. Implementations may be remote, so the lookup
//! is async and may fail independently of the decision itself.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::method::MethodId;
use crate::tenant::Tenant;

/// Everything a policy store needs to decide on one call
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub method: MethodId,
    pub tenant: Tenant,
    pub api_key: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// Return `Ok(true)` when the credential may invoke the method
    async fn is_allowed(&self, request: &AuthorizationRequest) -> Result<bool, PolicyError>;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyError {
    #[error("policy store unavailable: {0}")]
    Unavailable(String),

    #[error("policy store error: {0}")]
    Backend(String),
}
