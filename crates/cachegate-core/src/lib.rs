//! CacheGate Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout CacheGate:
//! - Tenant, event and routing argument types
//! - Method identifiers and the request envelope
//! - Connection and policy store trait abstractions
//! - Core error types

pub mod connection;
pub mod context;
pub mod error;
pub mod method;
pub mod policy;
pub mod route;
pub mod tenant;

pub use connection::{Connection, ConnectionError};
pub use context::CallContext;
pub use error::{Error, ErrorCategory, FailedConnection, Result};
pub use method::MethodId;
pub use policy::{AuthorizationRequest, PolicyError, PolicyStore};
pub use route::{Envelope, RouteArgument, Subsystem};
pub use tenant::{Event, Tenant};
