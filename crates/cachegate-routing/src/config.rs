//! Route pool configuration
//!
//! Pool entries name connection identities only. The concrete
//! [`Connection`] objects come from a [`ConnectionFactory`] supplied by the
//! embedding application.

use cachegate_core::{Connection, Subsystem, Tenant};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::dispatcher::DispatcherConfig;
use crate::pool::{ConnectionRecord, PoolError, PoolKey, RoutePool, RoutePools};
use crate::strategy::{FailoverPolicy, SelectionStrategy, StrategyError};

/// One route pool as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub tenant: Tenant,

    /// Subsystem name; a missing `*` prefix is added (`caches` -> `*caches`)
    #[serde(default = "default_subsystem")]
    pub subsystem: String,

    #[serde(default)]
    pub strategy: SelectionStrategy,

    #[serde(default)]
    pub failover: FailoverPolicy,

    pub connections: Vec<ConnectionConfig>,
}

fn default_subsystem() -> String {
    Subsystem::caches().as_str().to_string()
}

impl PoolConfig {
    pub fn subsystem(&self) -> Subsystem {
        let name = self.subsystem.trim();
        if name.starts_with('*') {
            Subsystem::new(name)
        } else {
            Subsystem::new(format!("*{name}"))
        }
    }

    pub fn key(&self) -> PoolKey {
        PoolKey::new(self.tenant.clone(), self.subsystem())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pool = self.key().to_string();

        if self.subsystem.trim().trim_start_matches('*').is_empty() {
            return Err(ConfigError::EmptySubsystem { pool });
        }

        let mut seen = HashSet::new();
        for connection in &self.connections {
            if connection.id.trim().is_empty() {
                return Err(ConfigError::EmptyConnectionId { pool });
            }
            if !seen.insert(connection.id.as_str()) {
                return Err(ConfigError::DuplicateConnection {
                    pool,
                    connection: connection.id.clone(),
                });
            }
        }

        let weights: Vec<u32> = self.connections.iter().map(|c| c.weight).collect();
        self.strategy
            .validate(&weights)
            .map_err(|source| ConfigError::Strategy {
                pool: pool.clone(),
                source,
            })?;
        self.failover
            .validate()
            .map_err(|source| ConfigError::Strategy { pool, source })?;

        Ok(())
    }

    /// Build the pool, asking `factory` for each connection
    pub fn build(&self, factory: &dyn ConnectionFactory) -> Result<RoutePool, ConfigError> {
        self.validate()?;

        let key = self.key();
        let pool = RoutePool::new(key.clone(), self.strategy, self.failover.clone());

        for connection_config in &self.connections {
            let connection = factory.connect(&key, connection_config).map_err(|reason| {
                ConfigError::ConnectionFactory {
                    pool: key.to_string(),
                    connection: connection_config.id.clone(),
                    reason,
                }
            })?;

            let mut record = ConnectionRecord::new(connection_config.id.clone(), connection)
                .with_weight(connection_config.weight);
            if !connection_config.reachable {
                record = record.failed();
            }
            pool.add_connection(record)?;
        }

        Ok(pool)
    }
}

/// One backend connection entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Backend address, passed through to the connection factory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Initial liveness
    #[serde(default = "default_reachable")]
    pub reachable: bool,
}

impl ConnectionConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: default_weight(),
            address: None,
            reachable: default_reachable(),
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_reachable() -> bool {
    true
}

/// Dispatch timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

fn default_call_timeout_ms() -> u64 {
    2000
}

impl DispatchSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("call_timeout_ms"));
        }
        Ok(())
    }
}

impl From<&DispatchSettings> for DispatcherConfig {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
        }
    }
}

/// Supplies concrete connections for configured pool entries
pub trait ConnectionFactory: Send + Sync {
    fn connect(
        &self,
        pool: &PoolKey,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn Connection>, String>;
}

impl<F> ConnectionFactory for F
where
    F: Fn(&PoolKey, &ConnectionConfig) -> Result<Arc<dyn Connection>, String> + Send + Sync,
{
    fn connect(
        &self,
        pool: &PoolKey,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn Connection>, String> {
        self(pool, config)
    }
}

/// Build the pool registry from configuration; a pool key may appear only once
pub fn build_pools(
    configs: &[PoolConfig],
    factory: &dyn ConnectionFactory,
) -> Result<RoutePools, ConfigError> {
    let pools = RoutePools::new();

    for config in configs {
        let pool = config.build(factory)?;
        let key = pool.key().clone();
        if pools.insert(pool).is_some() {
            return Err(ConfigError::DuplicatePool(key.to_string()));
        }
        tracing::debug!(
            pool = %key,
            strategy = config.strategy.as_str(),
            connections = config.connections.len(),
            "Configured route pool"
        );
    }

    Ok(pools)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Pool '{0}' configured more than once")]
    DuplicatePool(String),

    #[error("Pool '{pool}' has an empty subsystem name")]
    EmptySubsystem { pool: String },

    #[error("Pool '{pool}' has a connection with an empty id")]
    EmptyConnectionId { pool: String },

    #[error("Pool '{pool}' lists connection '{connection}' more than once")]
    DuplicateConnection { pool: String, connection: String },

    #[error("Pool '{pool}': {source}")]
    Strategy {
        pool: String,
        #[source]
        source: StrategyError,
    },

    #[error("Failed to create connection '{connection}' for pool '{pool}': {reason}")]
    ConnectionFactory {
        pool: String,
        connection: String,
        reason: String,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{0} must be greater than 0")]
    ZeroTimeout(&'static str),
}
