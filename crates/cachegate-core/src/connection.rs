//! Backend connection trait definitions

use crate::method::MethodId;
use serde_json::Value;
use thiserror::Error;

/// One reachable backend service instance.
///
/// Requests and responses are opaque JSON values; the wire encoding is the
/// implementation's concern.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Invoke `method` with `request` on this backend
    async fn call(&self, method: &MethodId, request: Value) -> Result<Value, ConnectionError>;
}

/// Failure reported by a [`Connection`].
///
/// Only [`ConnectionError::Remote`] means the backend actually processed the
/// call; every other variant is a transport-level failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("connection unreachable: {0}")]
    Unreachable(String),

    #[error("connection closed before reply: {0}")]
    Closed(String),

    #[error("call timed out after {0}ms")]
    Timeout(u64),

    /// Business-logic error returned by the backend itself
    #[error("{0}")]
    Remote(String),
}

impl ConnectionError {
    pub fn is_transport(&self) -> bool {
        !matches!(self, ConnectionError::Remote(_))
    }
}
