//! Route pools
//!
//! A [`RoutePool`] is the ordered set of backend connections serving one
//! (tenant, subsystem) pair. Connections live in an arena of
//! [`ConnectionRecord`]s indexed by identity. Membership changes take the
//! pool's write lock; liveness is an atomic flag on each record, so
//! selection works on a consistent snapshot while failed dispatches mark
//! connections concurrently.

use cachegate_core::{Connection, Subsystem, Tenant};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::health::{ConnectionHealth, HealthSnapshot};
use crate::strategy::{FailoverPolicy, SelectionStrategy, StrategyState};

/// Identity of a route pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    pub tenant: Tenant,
    pub subsystem: Subsystem,
}

impl PoolKey {
    pub fn new(tenant: Tenant, subsystem: Subsystem) -> Self {
        Self { tenant, subsystem }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.subsystem)
    }
}

/// One backend connection and its liveness state
pub struct ConnectionRecord {
    id: String,
    weight: u32,
    connection: Arc<dyn Connection>,
    reachable: AtomicBool,
    health: ConnectionHealth,
}

impl ConnectionRecord {
    pub fn new(id: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        Self {
            id: id.into(),
            weight: 1,
            connection,
            reachable: AtomicBool::new(true),
            health: ConnectionHealth::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Start the record in the failed state
    pub fn failed(self) -> Self {
        self.reachable.store(false, Ordering::Release);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    /// Set liveness, returning the previous value
    fn set_reachable(&self, reachable: bool) -> bool {
        self.reachable.swap(reachable, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            connection: self.id.clone(),
            reachable: self.is_reachable(),
            successes: self.health.successes(),
            transport_failures: self.health.transport_failures(),
            remote_errors: self.health.remote_errors(),
            success_rate: self.health.success_rate(),
            time_since_last_success: self.health.time_since_last_success(),
            time_since_last_failure: self.health.time_since_last_failure(),
        }
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

#[derive(Default)]
struct PoolArena {
    records: Vec<Arc<ConnectionRecord>>,
    index: HashMap<String, usize>,
}

impl PoolArena {
    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id.clone(), position))
            .collect();
    }
}

/// Ordered connections for one (tenant, subsystem) pair
pub struct RoutePool {
    key: PoolKey,
    strategy: SelectionStrategy,
    failover: FailoverPolicy,
    state: StrategyState,
    arena: RwLock<PoolArena>,
}

impl RoutePool {
    pub fn new(key: PoolKey, strategy: SelectionStrategy, failover: FailoverPolicy) -> Self {
        Self {
            key,
            strategy,
            failover,
            state: StrategyState::new(),
            arena: RwLock::new(PoolArena::default()),
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn tenant(&self) -> &Tenant {
        &self.key.tenant
    }

    pub fn subsystem(&self) -> &Subsystem {
        &self.key.subsystem
    }

    pub fn strategy(&self) -> &SelectionStrategy {
        &self.strategy
    }

    pub fn failover(&self) -> &FailoverPolicy {
        &self.failover
    }

    pub(crate) fn strategy_state(&self) -> &StrategyState {
        &self.state
    }

    /// Append a connection at the end of the pool order
    pub fn add_connection(&self, record: ConnectionRecord) -> Result<(), PoolError> {
        let mut arena = self
            .arena
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if arena.index.contains_key(&record.id) {
            return Err(PoolError::DuplicateConnection {
                pool: self.key.to_string(),
                connection: record.id,
            });
        }

        let position = arena.records.len();
        arena.index.insert(record.id.clone(), position);
        tracing::debug!(pool = %self.key, connection = %record.id, "Added connection to route pool");
        arena.records.push(Arc::new(record));
        Ok(())
    }

    /// Remove a connection, keeping the relative order of the others
    pub fn remove_connection(&self, id: &str) -> Option<Arc<ConnectionRecord>> {
        let mut arena = self
            .arena
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let position = arena.index.get(id).copied()?;
        let removed = arena.records.remove(position);
        arena.reindex();
        tracing::debug!(pool = %self.key, connection = id, "Removed connection from route pool");
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ConnectionRecord>> {
        let arena = self
            .arena
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        arena
            .index
            .get(id)
            .and_then(|position| arena.records.get(*position))
            .cloned()
    }

    /// All connections in pool order
    pub fn snapshot(&self) -> Vec<Arc<ConnectionRecord>> {
        self.arena
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .records
            .clone()
    }

    /// Connections currently marked reachable, in pool order
    pub fn reachable(&self) -> Vec<Arc<ConnectionRecord>> {
        self.arena
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .records
            .iter()
            .filter(|record| record.is_reachable())
            .cloned()
            .collect()
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|record| record.id.clone())
            .collect()
    }

    /// Mark a connection failed. Returns true if it was reachable before.
    pub fn mark_failed(&self, id: &str) -> bool {
        match self.get(id) {
            Some(record) => {
                let was_reachable = record.set_reachable(false);
                if was_reachable {
                    tracing::warn!(pool = %self.key, connection = id, "Connection marked as failed");
                }
                was_reachable
            }
            None => false,
        }
    }

    /// Mark a connection reachable again. Returns true if it was failed before.
    pub fn mark_reachable(&self, id: &str) -> bool {
        match self.get(id) {
            Some(record) => {
                let was_reachable = record.set_reachable(true);
                if !was_reachable {
                    tracing::info!(pool = %self.key, connection = id, "Connection marked as reachable");
                }
                !was_reachable
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.arena
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn health(&self) -> Vec<HealthSnapshot> {
        self.snapshot()
            .iter()
            .map(|record| record.snapshot())
            .collect()
    }
}

impl fmt::Debug for RoutePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutePool")
            .field("key", &self.key)
            .field("strategy", &self.strategy)
            .field("failover", &self.failover)
            .field("connections", &self.snapshot())
            .finish()
    }
}

/// Registry of route pools keyed by (tenant, subsystem).
///
/// Each pool carries its own lock; there is no lock spanning pools.
#[derive(Default, Debug)]
pub struct RoutePools {
    pools: DashMap<PoolKey, Arc<RoutePool>>,
}

impl RoutePools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool, returning the one it replaced
    pub fn insert(&self, pool: RoutePool) -> Option<Arc<RoutePool>> {
        self.pools.insert(pool.key.clone(), Arc::new(pool))
    }

    pub fn remove(&self, key: &PoolKey) -> Option<Arc<RoutePool>> {
        self.pools.remove(key).map(|(_, pool)| pool)
    }

    pub fn get(&self, tenant: &Tenant, subsystem: &Subsystem) -> Option<Arc<RoutePool>> {
        let key = PoolKey::new(tenant.clone(), subsystem.clone());
        self.pools.get(&key).map(|entry| entry.value().clone())
    }

    /// All registered pools, sorted by key
    pub fn pools(&self) -> Vec<Arc<RoutePool>> {
        let mut pools: Vec<Arc<RoutePool>> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();
        pools.sort_by(|a, b| a.key.cmp(&b.key));
        pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PoolError {
    #[error("Connection '{connection}' already present in pool '{pool}'")]
    DuplicateConnection { pool: String, connection: String },
}
