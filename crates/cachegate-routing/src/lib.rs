//! CacheGate Routing Engine
//!
//! This crate provides the routing logic for CacheGate:
//! - Route pools with atomic per-connection liveness
//! - Selection strategies and failover policy
//! - The dispatcher, with pinned routes, failover and broadcast
//! - Pool configuration and construction

pub mod config;
pub mod dispatcher;
pub mod health;
pub mod pool;
pub mod strategy;

// Re-export commonly used types
pub use config::{
    ConfigError, ConnectionConfig, ConnectionFactory, DispatchSettings, PoolConfig, build_pools,
};
pub use dispatcher::{DEFAULT_CALL_TIMEOUT, Dispatcher, DispatcherConfig};
pub use health::{ConnectionHealth, HealthSnapshot};
pub use pool::{ConnectionRecord, PoolError, PoolKey, RoutePool, RoutePools};
pub use strategy::{FailoverPolicy, SelectionStrategy, StrategyError, StrategyState};
