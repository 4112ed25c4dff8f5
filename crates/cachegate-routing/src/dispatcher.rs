//! Dispatcher that forwards calls to backend connections
//!
//! The Dispatcher resolves the route pool for a (tenant, subsystem) pair,
//! picks a connection either by explicit route identifier or by the pool's
//! selection strategy, and invokes the method on it:
//! - Pinned routes are attempted exactly once, whatever their liveness
//! - Strategy-selected calls fail over across reachable connections
//! - Broadcast pools fan out to every reachable connection
//!
//! Transport failures (unreachable, closed, timed out) mark the connection
//! failed. Remote application errors and caller cancellation never do.

use cachegate_core::{
    CallContext, ConnectionError, Error, ErrorCategory, Event, FailedConnection, MethodId,
    Result, Subsystem,
};
use cachegate_observability::{DispatchMetrics, DispatchOutcome};
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pool::{ConnectionRecord, RoutePool, RoutePools};

/// Default per-call backend timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on a single backend call; expiry counts as a transport failure
    pub call_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Routes calls onto the connections of the registered route pools
pub struct Dispatcher {
    pools: Arc<RoutePools>,
    config: DispatcherConfig,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl Dispatcher {
    pub fn new(pools: Arc<RoutePools>, config: DispatcherConfig) -> Self {
        Self {
            pools,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pools(&self) -> &Arc<RoutePools> {
        &self.pools
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Forward `method` with `request` to a connection of the pool serving
    /// the event's tenant and `subsystem`.
    ///
    /// An empty or absent `route_id` means strategy selection. For broadcast
    /// pools the reply of the first connection in pool order is returned when
    /// every connection succeeded.
    pub async fn dispatch(
        &self,
        ctx: &CallContext,
        event: &Event,
        subsystem: &Subsystem,
        route_id: Option<&str>,
        method: &MethodId,
        request: Value,
    ) -> Result<Value> {
        let start = Instant::now();
        let result = self
            .route(ctx, event, subsystem, route_id, method, request)
            .await;
        self.record_outcome(subsystem, method, result.as_ref().err(), start);
        result
    }

    /// Typed variant of [`Dispatcher::dispatch`]: the request is encoded and
    /// the reply decoded with `serde_json`. Nothing is decoded on failure.
    pub async fn dispatch_typed<Req, Resp>(
        &self,
        ctx: &CallContext,
        event: &Event,
        subsystem: &Subsystem,
        route_id: Option<&str>,
        method: &MethodId,
        request: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let request = serde_json::to_value(request)?;
        let response = self
            .dispatch(ctx, event, subsystem, route_id, method, request)
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Invoke `method` on every reachable connection of the pool, whatever
    /// its configured strategy, returning each connection's reply.
    pub async fn broadcast(
        &self,
        ctx: &CallContext,
        event: &Event,
        subsystem: &Subsystem,
        method: &MethodId,
        request: Value,
    ) -> Result<BTreeMap<String, Value>> {
        let start = Instant::now();
        let result = match self.resolve_pool(event, subsystem) {
            Ok(pool) => self
                .fan_out(ctx, &pool, method, request)
                .await
                .map(|responses| responses.into_iter().collect()),
            Err(err) => Err(err),
        };
        self.record_outcome(subsystem, method, result.as_ref().err(), start);
        result
    }

    async fn route(
        &self,
        ctx: &CallContext,
        event: &Event,
        subsystem: &Subsystem,
        route_id: Option<&str>,
        method: &MethodId,
        request: Value,
    ) -> Result<Value> {
        let pool = self.resolve_pool(event, subsystem)?;

        if let Some(route_id) = route_id.filter(|id| !id.is_empty()) {
            let record = pool.get(route_id).ok_or_else(|| Error::RouteNotFound {
                tenant: event.tenant.to_string(),
                route_id: route_id.to_string(),
            })?;

            tracing::debug!(
                tenant = %event.tenant,
                subsystem = %subsystem,
                method = %method,
                connection = route_id,
                reachable = record.is_reachable(),
                "Dispatching on pinned route"
            );

            return self.attempt(ctx, &pool, &record, method, request).await;
        }

        if pool.strategy().is_broadcast() {
            let responses = self.fan_out(ctx, &pool, method, request).await?;
            return responses
                .into_iter()
                .next()
                .map(|(_, response)| response)
                .ok_or_else(|| no_reachable(&pool));
        }

        self.select_with_failover(ctx, &pool, method, request).await
    }

    fn resolve_pool(&self, event: &Event, subsystem: &Subsystem) -> Result<Arc<RoutePool>> {
        self.pools
            .get(&event.tenant, subsystem)
            .ok_or_else(|| Error::NoRoutePool {
                tenant: event.tenant.to_string(),
                subsystem: subsystem.to_string(),
            })
    }

    /// Walk the strategy's candidate order until one connection answers
    async fn select_with_failover(
        &self,
        ctx: &CallContext,
        pool: &RoutePool,
        method: &MethodId,
        request: Value,
    ) -> Result<Value> {
        let candidates = pool.reachable();
        if candidates.is_empty() {
            return Err(no_reachable(pool));
        }

        let ordered = pool
            .strategy_state()
            .order(pool.strategy(), candidates, |record| record.weight());
        let attempts = pool.failover().attempts_for(method, ordered.len());

        let mut last_error = None;
        let mut tried = 0;
        for record in &ordered {
            if tried == attempts {
                break;
            }
            if tried > 0 {
                // Marked failed by a concurrent dispatch since the snapshot;
                // skipping it does not consume an attempt
                if !record.is_reachable() {
                    continue;
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_failover(pool.tenant().as_str(), pool.subsystem().as_str());
                }
            }
            tried += 1;

            tracing::debug!(
                pool = %pool.key(),
                method = %method,
                connection = record.id(),
                attempt = tried,
                max_attempts = attempts,
                "Attempting call on connection"
            );

            match self.attempt(ctx, pool, record, method, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.category() == ErrorCategory::TransportFailure => {
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| no_reachable(pool)))
    }

    /// Call every reachable connection concurrently and join all of them.
    ///
    /// Returns the replies in pool order when all succeeded.
    async fn fan_out(
        &self,
        ctx: &CallContext,
        pool: &RoutePool,
        method: &MethodId,
        request: Value,
    ) -> Result<Vec<(String, Value)>> {
        let targets = pool.reachable();
        if targets.is_empty() {
            return Err(no_reachable(pool));
        }

        tracing::debug!(
            pool = %pool.key(),
            method = %method,
            connections = targets.len(),
            "Broadcasting call"
        );

        let calls = targets
            .iter()
            .map(|record| self.attempt(ctx, pool, record, method, request.clone()));
        let outcomes = join_all(calls).await;

        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut responses = Vec::with_capacity(outcomes.len());
        let mut failed = Vec::new();
        for (record, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(response) => responses.push((record.id().to_string(), response)),
                Err(err) => failed.push(FailedConnection {
                    connection: record.id().to_string(),
                    reason: err.to_string(),
                }),
            }
        }

        if failed.is_empty() {
            return Ok(responses);
        }

        tracing::warn!(
            pool = %pool.key(),
            method = %method,
            failed = failed.len(),
            succeeded = responses.len(),
            "Broadcast partially executed"
        );

        Err(Error::PartialExecution {
            failed,
            responses: responses.into_iter().collect(),
        })
    }

    /// One bounded call on one connection
    async fn attempt(
        &self,
        ctx: &CallContext,
        pool: &RoutePool,
        record: &ConnectionRecord,
        method: &MethodId,
        request: Value,
    ) -> Result<Value> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let call = tokio::time::timeout(
            self.config.call_timeout,
            record.connection().call(method, request),
        );

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => {
                tracing::debug!(
                    pool = %pool.key(),
                    connection = record.id(),
                    "Caller cancelled while waiting on backend"
                );
                return Err(Error::Cancelled);
            }
            outcome = call => outcome,
        };

        match outcome {
            Ok(Ok(response)) => {
                record.health().record_success();
                Ok(response)
            }
            Ok(Err(ConnectionError::Remote(message))) => {
                record.health().record_remote_error();
                tracing::debug!(
                    pool = %pool.key(),
                    connection = record.id(),
                    error = %message,
                    "Backend returned application error"
                );
                Err(Error::RemoteApplication {
                    connection: record.id().to_string(),
                    message,
                })
            }
            Ok(Err(err)) => Err(self.transport_failure(pool, record, err.to_string())),
            Err(_) => Err(self.transport_failure(
                pool,
                record,
                ConnectionError::Timeout(self.config.call_timeout.as_millis() as u64).to_string(),
            )),
        }
    }

    fn transport_failure(&self, pool: &RoutePool, record: &ConnectionRecord, reason: String) -> Error {
        record.health().record_transport_failure();
        let transitioned = pool.mark_failed(record.id());

        tracing::warn!(
            pool = %pool.key(),
            connection = record.id(),
            error = %reason,
            "Transport failure on connection"
        );

        if let Some(metrics) = &self.metrics {
            let tenant = pool.tenant().as_str();
            let subsystem = pool.subsystem().as_str();
            metrics.record_transport_failure(tenant, subsystem, record.id());
            if transitioned {
                metrics.set_connection_reachable(tenant, subsystem, record.id(), false);
            }
        }

        Error::TransportFailure {
            connection: record.id().to_string(),
            reason,
        }
    }

    fn record_outcome(
        &self,
        subsystem: &Subsystem,
        method: &MethodId,
        error: Option<&Error>,
        start: Instant,
    ) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let outcome = match error.map(Error::category) {
            None => DispatchOutcome::Success,
            Some(ErrorCategory::PartialExecution) => DispatchOutcome::Partial,
            Some(ErrorCategory::Cancelled) => DispatchOutcome::Cancelled,
            Some(_) => DispatchOutcome::Failed,
        };
        metrics.record_dispatch(
            subsystem.as_str(),
            method.as_str(),
            outcome,
            start.elapsed().as_secs_f64(),
        );
    }
}

fn no_reachable(pool: &RoutePool) -> Error {
    Error::NoReachableConnection {
        tenant: pool.tenant().to_string(),
        subsystem: pool.subsystem().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolKey;
    use crate::strategy::{FailoverPolicy, SelectionStrategy};
    use async_trait::async_trait;
    use cachegate_core::{Connection, Tenant};
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Backend {}

        #[async_trait]
        impl Connection for Backend {
            async fn call(&self, method: &MethodId, request: Value) -> std::result::Result<Value, ConnectionError>;
        }
    }

    fn tenant() -> Tenant {
        Tenant::new("cgrates.org").unwrap()
    }

    fn event() -> Event {
        Event::for_tenant(tenant())
    }

    fn dispatcher_with(
        strategy: SelectionStrategy,
        failover: FailoverPolicy,
        backends: Vec<(&str, MockBackend)>,
    ) -> (Dispatcher, Arc<RoutePool>) {
        let pools = Arc::new(RoutePools::new());
        let pool = RoutePool::new(PoolKey::new(tenant(), Subsystem::caches()), strategy, failover);
        for (id, backend) in backends {
            pool.add_connection(ConnectionRecord::new(id, Arc::new(backend)))
                .unwrap();
        }
        pools.insert(pool);
        let pool = pools.get(&tenant(), &Subsystem::caches()).unwrap();
        (Dispatcher::new(pools, DispatcherConfig::default()), pool)
    }

    fn answering(reply: Value) -> MockBackend {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .returning(move |_, _| Ok(reply.clone()));
        backend
    }

    fn unreachable_once() -> MockBackend {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .times(1)
            .returning(|_, _| Err(ConnectionError::Unreachable("connection refused".into())));
        backend
    }

    #[tokio::test]
    async fn test_request_forwarded_verbatim() {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .withf(|method, request| {
                method == &MethodId::CACHE_HAS_ITEM
                    && request == &json!({"CacheID": "*resources", "ItemID": "r1"})
            })
            .times(1)
            .returning(|_, _| Ok(json!(true)));

        let (dispatcher, _) =
            dispatcher_with(SelectionStrategy::FirstAvailable, FailoverPolicy::default(), vec![("a", backend)]);

        let reply = dispatcher
            .dispatch(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                None,
                &MethodId::CACHE_HAS_ITEM,
                json!({"CacheID": "*resources", "ItemID": "r1"}),
            )
            .await
            .unwrap();
        assert_eq!(reply, json!(true));
    }

    #[tokio::test]
    async fn test_failover_marks_and_moves_on() {
        let (dispatcher, pool) = dispatcher_with(
            SelectionStrategy::FirstAvailable,
            FailoverPolicy::default(),
            vec![("a", unreachable_once()), ("b", answering(json!("OK")))],
        );

        let reply = dispatcher
            .dispatch(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                None,
                &MethodId::CACHE_GET_CACHE_STATS,
                json!({}),
            )
            .await
            .unwrap();

        assert_eq!(reply, json!("OK"));
        assert!(!pool.get("a").unwrap().is_reachable());
        assert!(pool.get("b").unwrap().is_reachable());
        assert_eq!(pool.get("a").unwrap().health().transport_failures(), 1);
    }

    #[tokio::test]
    async fn test_remote_error_is_not_a_connection_failure() {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .times(1)
            .returning(|_, _| Err(ConnectionError::Remote("NOT_FOUND".into())));
        let mut spare = MockBackend::new();
        spare.expect_call().never();

        let (dispatcher, pool) = dispatcher_with(
            SelectionStrategy::FirstAvailable,
            FailoverPolicy::default(),
            vec![("a", backend), ("b", spare)],
        );

        let err = dispatcher
            .dispatch(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                None,
                &MethodId::CACHE_GET_ITEM_EXPIRY_TIME,
                json!({}),
            )
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::RemoteApplicationError);
        assert_eq!(err.to_string(), "NOT_FOUND");
        assert!(pool.get("a").unwrap().is_reachable());
        assert_eq!(pool.get("a").unwrap().health().remote_errors(), 1);
    }

    #[tokio::test]
    async fn test_mutation_not_retried_by_default() {
        let mut spare = MockBackend::new();
        spare.expect_call().never();

        let (dispatcher, _) = dispatcher_with(
            SelectionStrategy::FirstAvailable,
            FailoverPolicy::default(),
            vec![("a", unreachable_once()), ("b", spare)],
        );

        let err = dispatcher
            .dispatch(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                None,
                &MethodId::CACHE_FLUSH_CACHE,
                json!({}),
            )
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::TransportFailure);
    }

    #[tokio::test]
    async fn test_mutation_retried_when_allowed() {
        let (dispatcher, _) = dispatcher_with(
            SelectionStrategy::FirstAvailable,
            FailoverPolicy {
                max_attempts: None,
                retry_mutations: true,
            },
            vec![("a", unreachable_once()), ("b", answering(json!("OK")))],
        );

        let reply = dispatcher
            .dispatch(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                None,
                &MethodId::CACHE_RELOAD_CACHE,
                json!({}),
            )
            .await
            .unwrap();
        assert_eq!(reply, json!("OK"));
    }

    #[tokio::test]
    async fn test_max_attempts_bounds_failover() {
        let mut third = MockBackend::new();
        third.expect_call().never();

        let (dispatcher, _) = dispatcher_with(
            SelectionStrategy::FirstAvailable,
            FailoverPolicy {
                max_attempts: Some(2),
                retry_mutations: false,
            },
            vec![("a", unreachable_once()), ("b", unreachable_once()), ("c", third)],
        );

        let err = dispatcher
            .dispatch(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                None,
                &MethodId::CACHE_PING,
                json!({}),
            )
            .await
            .unwrap_err();

        match err {
            Error::TransportFailure { connection, .. } => assert_eq!(connection, "b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_typed_dispatch_decodes_reply() {
        let (dispatcher, _) = dispatcher_with(
            SelectionStrategy::FirstAvailable,
            FailoverPolicy::default(),
            vec![("a", answering(json!(["item1", "item2"])))],
        );

        let ids: Vec<String> = dispatcher
            .dispatch_typed(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                Some(""),
                &MethodId::CACHE_GET_ITEM_IDS,
                &json!({"CacheID": "*resources"}),
            )
            .await
            .unwrap();
        assert_eq!(ids, vec!["item1", "item2"]);
    }

    #[tokio::test]
    async fn test_typed_dispatch_reports_undecodable_reply() {
        let (dispatcher, _) = dispatcher_with(
            SelectionStrategy::FirstAvailable,
            FailoverPolicy::default(),
            vec![("a", answering(json!("not-a-bool")))],
        );

        let err = dispatcher
            .dispatch_typed::<_, bool>(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                None,
                &MethodId::CACHE_HAS_GROUP,
                &json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Serialization);
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let metrics = Arc::new(DispatchMetrics::new().unwrap());
        let (dispatcher, _) = dispatcher_with(
            SelectionStrategy::FirstAvailable,
            FailoverPolicy::default(),
            vec![("a", unreachable_once()), ("b", answering(json!("OK")))],
        );
        let dispatcher = dispatcher.with_metrics(metrics.clone());

        dispatcher
            .dispatch(
                &CallContext::new(),
                &event(),
                &Subsystem::caches(),
                None,
                &MethodId::CACHE_PING,
                json!({}),
            )
            .await
            .unwrap();

        let success = metrics
            .dispatch_total
            .with_label_values(&["*caches", "CacheSv1.Ping", "success"])
            .get();
        let failovers = metrics
            .failover_total
            .with_label_values(&["cgrates.org", "*caches"])
            .get();
        let reachable = metrics
            .connection_reachable
            .with_label_values(&["cgrates.org", "*caches", "a"])
            .get();
        assert_eq!(success, 1.0);
        assert_eq!(failovers, 1.0);
        assert_eq!(reachable, 0.0);
    }
}
