//! Error types for CacheGate Core

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Coarse classification of an [`Error`], stable across variants so callers
/// can decide whether to retry at a higher level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    MandatoryArgumentMissing,
    Unauthorized,
    NoRoutePool,
    RouteNotFound,
    NoReachableConnection,
    TransportFailure,
    RemoteApplicationError,
    PartialExecution,
    Cancelled,
    InvalidRequest,
    Serialization,
    Config,
}

impl ErrorCategory {
    /// Label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::MandatoryArgumentMissing => "mandatory_argument_missing",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::NoRoutePool => "no_route_pool",
            ErrorCategory::RouteNotFound => "route_not_found",
            ErrorCategory::NoReachableConnection => "no_reachable_connection",
            ErrorCategory::TransportFailure => "transport_failure",
            ErrorCategory::RemoteApplicationError => "remote_application_error",
            ErrorCategory::PartialExecution => "partial_execution",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Config => "config",
        }
    }
}

/// A single connection that did not complete during a broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct FailedConnection {
    pub connection: String,
    pub reason: String,
}

fn join_failed(failed: &[FailedConnection]) -> String {
    failed
        .iter()
        .map(|f| f.connection.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("MANDATORY_IE_MISSING: [{0}]")]
    MandatoryArgumentMissing(String),

    #[error("UNAUTHORIZED_API: method '{method}' not allowed for tenant '{tenant}'")]
    Unauthorized { method: String, tenant: String },

    #[error("No route pool configured for tenant '{tenant}' and subsystem '{subsystem}'")]
    NoRoutePool { tenant: String, subsystem: String },

    #[error("Route '{route_id}' not found in pool for tenant '{tenant}'")]
    RouteNotFound { tenant: String, route_id: String },

    #[error("No reachable connection for tenant '{tenant}' and subsystem '{subsystem}'")]
    NoReachableConnection { tenant: String, subsystem: String },

    #[error("Transport failure on '{connection}': {reason}")]
    TransportFailure { connection: String, reason: String },

    #[error("{message}")]
    RemoteApplication { connection: String, message: String },

    #[error("PARTIALLY_EXECUTED: failed connections [{}]", join_failed(.failed))]
    PartialExecution {
        failed: Vec<FailedConnection>,
        /// Responses from the connections that did succeed, keyed by connection id
        responses: BTreeMap<String, Value>,
    },

    #[error("Call cancelled by caller")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MandatoryArgumentMissing(_) => ErrorCategory::MandatoryArgumentMissing,
            Error::Unauthorized { .. } => ErrorCategory::Unauthorized,
            Error::NoRoutePool { .. } => ErrorCategory::NoRoutePool,
            Error::RouteNotFound { .. } => ErrorCategory::RouteNotFound,
            Error::NoReachableConnection { .. } => ErrorCategory::NoReachableConnection,
            Error::TransportFailure { .. } => ErrorCategory::TransportFailure,
            Error::RemoteApplication { .. } => ErrorCategory::RemoteApplicationError,
            Error::PartialExecution { .. } => ErrorCategory::PartialExecution,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            Error::Serialization(_) => ErrorCategory::Serialization,
            Error::Config(_) => ErrorCategory::Config,
        }
    }

    /// Whether a caller may reasonably retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransportFailure | ErrorCategory::NoReachableConnection
        )
    }

    /// Missing mandatory field error, named after the field
    pub fn mandatory(field: impl Into<String>) -> Self {
        Error::MandatoryArgumentMissing(field.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mandatory_message_matches_legacy_wording() {
        let err = Error::mandatory("RouteArgument");
        assert_eq!(err.to_string(), "MANDATORY_IE_MISSING: [RouteArgument]");
        assert_eq!(err.category(), ErrorCategory::MandatoryArgumentMissing);
    }

    #[test]
    fn test_partial_execution_names_failed_connections() {
        let err = Error::PartialExecution {
            failed: vec![
                FailedConnection {
                    connection: "b".to_string(),
                    reason: "refused".to_string(),
                },
                FailedConnection {
                    connection: "c".to_string(),
                    reason: "timeout".to_string(),
                },
            ],
            responses: BTreeMap::new(),
        };
        assert_eq!(err.to_string(), "PARTIALLY_EXECUTED: failed connections [b, c]");
        assert_eq!(err.category(), ErrorCategory::PartialExecution);
    }

    #[test]
    fn test_retryable_categories() {
        assert!(
            Error::TransportFailure {
                connection: "a".to_string(),
                reason: "reset".to_string()
            }
            .is_retryable()
        );
        assert!(
            !Error::Unauthorized {
                method: "CacheSv1.Clear".to_string(),
                tenant: "t".to_string()
            }
            .is_retryable()
        );
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_remote_error_passes_message_through() {
        let err = Error::RemoteApplication {
            connection: "a".to_string(),
            message: "NOT_FOUND".to_string(),
        };
        assert_eq!(err.to_string(), "NOT_FOUND");
    }
}
