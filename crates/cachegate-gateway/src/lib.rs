//! CacheGate Gateway
//!
//! This crate assembles the client-facing side of CacheGate:
//! - Authorization gate (open or policy-store backed)
//! - Static per-tenant API key policy store
//! - The cache method surface and its payloads
//! - Gateway configuration loading

pub mod config;
pub mod gate;
pub mod payload;
pub mod policy_store;
pub mod service;

pub use config::{AuthorizationConfig, GatewayConfig, GatewayConfigError, TimeoutSettings};
pub use gate::{Authorizer, DEFAULT_POLICY_TIMEOUT, OpenGate, POLICY_STORE, PolicyGate};
pub use payload::{CacheIds, CacheItemIdsQuery, CacheItemQuery, CacheStats, GroupQuery, ReloadSpec};
pub use policy_store::{ANY_METHOD, ApiKeyPolicy, StaticPolicyStore};
pub use service::CacheService;
