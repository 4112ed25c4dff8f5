//! CacheGate Observability
//!
//! This crate provides observability features:
//! - Dispatch metrics collection (Prometheus)
//! - Structured logging setup

pub mod logging;
pub mod metrics;

pub use logging::{LoggingConfig, LoggingError, init_logging};
pub use metrics::{DispatchMetrics, DispatchOutcome};
