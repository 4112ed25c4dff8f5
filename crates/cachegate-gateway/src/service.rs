//! Cache method surface
//!
//! Each operation checks the routing argument, asks the authorizer with
//! its own method identifier, then dispatches to the cache subsystem. A
//! missing routing argument is rejected before any authorization or
//! backend work happens.

use cachegate_core::{
    CallContext, Envelope, Error, Event, MethodId, Result, RouteArgument, Subsystem, Tenant,
};
use cachegate_routing::Dispatcher;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::gate::Authorizer;
use crate::payload::{CacheIds, CacheItemIdsQuery, CacheItemQuery, CacheStats, GroupQuery, ReloadSpec};

pub struct CacheService {
    authorizer: Arc<dyn Authorizer>,
    dispatcher: Arc<Dispatcher>,
    subsystem: Subsystem,
}

impl CacheService {
    pub fn new(authorizer: Arc<dyn Authorizer>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            authorizer,
            dispatcher,
            subsystem: Subsystem::caches(),
        }
    }

    pub fn authorizer(&self) -> &Arc<dyn Authorizer> {
        &self.authorizer
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn subsystem(&self) -> &Subsystem {
        &self.subsystem
    }

    /// Liveness probe forwarded with the caller's event. Authorized at the
    /// event's own time when it carries one.
    ///
    /// The envelope tenant must match the event tenant; a mismatch is an
    /// invalid request and is rejected before authorization.
    pub async fn ping(&self, ctx: &CallContext, args: Envelope<Event>) -> Result<String> {
        let (tenant, route, event) = args.into_parts()?;
        if tenant != event.tenant {
            return Err(Error::InvalidRequest(format!(
                "envelope tenant '{tenant}' does not match event tenant '{}'",
                event.tenant
            )));
        }
        let method = MethodId::CACHE_PING;

        self.authorizer
            .authorize(&method, &event.tenant, &route.api_key, event.time_or_now())
            .await?;

        self.dispatcher
            .dispatch_typed(ctx, &event, &self.subsystem, route.pinned_route(), &method, &event)
            .await
    }

    pub async fn get_item_ids(
        &self,
        ctx: &CallContext,
        args: Envelope<CacheItemIdsQuery>,
    ) -> Result<Vec<String>> {
        self.call(ctx, MethodId::CACHE_GET_ITEM_IDS, args).await
    }

    pub async fn has_item(&self, ctx: &CallContext, args: Envelope<CacheItemQuery>) -> Result<bool> {
        self.call(ctx, MethodId::CACHE_HAS_ITEM, args).await
    }

    /// `None` when the item never expires
    pub async fn get_item_expiry_time(
        &self,
        ctx: &CallContext,
        args: Envelope<CacheItemQuery>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.call(ctx, MethodId::CACHE_GET_ITEM_EXPIRY_TIME, args).await
    }

    pub async fn remove_item(&self, ctx: &CallContext, args: Envelope<CacheItemQuery>) -> Result<String> {
        self.call(ctx, MethodId::CACHE_REMOVE_ITEM, args).await
    }

    pub async fn clear(&self, ctx: &CallContext, args: Envelope<CacheIds>) -> Result<String> {
        self.call(ctx, MethodId::CACHE_CLEAR, args).await
    }

    pub async fn flush_cache(&self, ctx: &CallContext, args: Envelope<ReloadSpec>) -> Result<String> {
        self.call(ctx, MethodId::CACHE_FLUSH_CACHE, args).await
    }

    pub async fn get_cache_stats(
        &self,
        ctx: &CallContext,
        args: Envelope<CacheIds>,
    ) -> Result<HashMap<String, CacheStats>> {
        self.call(ctx, MethodId::CACHE_GET_CACHE_STATS, args).await
    }

    pub async fn precache_status(
        &self,
        ctx: &CallContext,
        args: Envelope<CacheIds>,
    ) -> Result<BTreeMap<String, String>> {
        self.call(ctx, MethodId::CACHE_PRECACHE_STATUS, args).await
    }

    pub async fn has_group(&self, ctx: &CallContext, args: Envelope<GroupQuery>) -> Result<bool> {
        self.call(ctx, MethodId::CACHE_HAS_GROUP, args).await
    }

    pub async fn get_group_item_ids(
        &self,
        ctx: &CallContext,
        args: Envelope<GroupQuery>,
    ) -> Result<Vec<String>> {
        self.call(ctx, MethodId::CACHE_GET_GROUP_ITEM_IDS, args).await
    }

    pub async fn remove_group(&self, ctx: &CallContext, args: Envelope<GroupQuery>) -> Result<String> {
        self.call(ctx, MethodId::CACHE_REMOVE_GROUP, args).await
    }

    pub async fn reload_cache(&self, ctx: &CallContext, args: Envelope<ReloadSpec>) -> Result<String> {
        self.call(ctx, MethodId::CACHE_RELOAD_CACHE, args).await
    }

    pub async fn load_cache(&self, ctx: &CallContext, args: Envelope<ReloadSpec>) -> Result<String> {
        self.call(ctx, MethodId::CACHE_LOAD_CACHE, args).await
    }

    /// Routing-only call: the dispatch event carries nothing but the tenant
    async fn call<P, R>(&self, ctx: &CallContext, method: MethodId, args: Envelope<P>) -> Result<R>
    where
        P: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let (tenant, route, payload) = args.into_parts()?;
        self.authorize(&method, &tenant, &route).await?;

        let event = Event::for_tenant(tenant);
        self.dispatcher
            .dispatch_typed(ctx, &event, &self.subsystem, route.pinned_route(), &method, &payload)
            .await
    }

    async fn authorize(&self, method: &MethodId, tenant: &Tenant, route: &RouteArgument) -> Result<()> {
        self.authorizer
            .authorize(method, tenant, &route.api_key, Utc::now())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::OpenGate;
    use cachegate_core::{Connection, ConnectionError, ErrorCategory};
    use cachegate_routing::{
        ConnectionRecord, DispatcherConfig, FailoverPolicy, PoolKey, RoutePool, RoutePools,
        SelectionStrategy,
    };
    use serde_json::{Value, json};

    struct EchoConnection;

    #[async_trait::async_trait]
    impl Connection for EchoConnection {
        async fn call(&self, method: &MethodId, request: Value) -> std::result::Result<Value, ConnectionError> {
            Ok(match method.as_str() {
                "CacheSv1.Ping" => json!("Pong"),
                "CacheSv1.HasItem" => json!(request["ItemID"] == "r1"),
                "CacheSv1.GetItemExpiryTime" => json!("2030-01-01T00:00:00Z"),
                _ => json!("OK"),
            })
        }
    }

    fn tenant() -> Tenant {
        Tenant::new("cgrates.org").unwrap()
    }

    fn service() -> CacheService {
        let pools = Arc::new(RoutePools::new());
        let pool = RoutePool::new(
            PoolKey::new(tenant(), Subsystem::caches()),
            SelectionStrategy::FirstAvailable,
            FailoverPolicy::default(),
        );
        pool.add_connection(ConnectionRecord::new("cache1", Arc::new(EchoConnection)))
            .unwrap();
        pools.insert(pool);
        let dispatcher = Arc::new(Dispatcher::new(pools, DispatcherConfig::default()));
        CacheService::new(Arc::new(OpenGate), dispatcher)
    }

    fn item(item_id: &str) -> CacheItemQuery {
        CacheItemQuery {
            cache_id: "*resources".into(),
            item_id: item_id.into(),
        }
    }

    #[tokio::test]
    async fn test_ping_forwards_event() {
        let service = service();
        let event = Event::for_tenant(tenant()).with_id("ev1");
        let reply = service
            .ping(&CallContext::new(), Envelope::for_event(event, Some(RouteArgument::new("key"))))
            .await
            .unwrap();
        assert_eq!(reply, "Pong");
    }

    #[tokio::test]
    async fn test_typed_replies() {
        let service = service();
        let ctx = CallContext::new();
        let route = RouteArgument::new("key");

        assert!(service
            .has_item(&ctx, Envelope::new(tenant(), route.clone(), item("r1")))
            .await
            .unwrap());
        assert!(!service
            .has_item(&ctx, Envelope::new(tenant(), route.clone(), item("r2")))
            .await
            .unwrap());

        let expiry = service
            .get_item_expiry_time(&ctx, Envelope::new(tenant(), route.clone(), item("r1")))
            .await
            .unwrap();
        assert_eq!(expiry.unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");

        let status = service
            .clear(&ctx, Envelope::new(tenant(), route, CacheIds::all()))
            .await
            .unwrap();
        assert_eq!(status, crate::payload::OK);
    }

    #[tokio::test]
    async fn test_missing_route_argument() {
        let service = service();
        let err = service
            .get_item_ids(
                &CallContext::new(),
                Envelope::unrouted(tenant(), CacheItemIdsQuery::default()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::MandatoryArgumentMissing);
        assert_eq!(err.to_string(), "MANDATORY_IE_MISSING: [RouteArgument]");
    }
}
