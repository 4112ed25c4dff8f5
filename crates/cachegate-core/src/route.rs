//! Routing arguments and the request envelope

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tenant::{Event, Tenant};
use crate::{Error, Result};

/// Named backend service category owning its own route pools
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subsystem(String);

impl Subsystem {
    /// The cache management service
    pub fn caches() -> Self {
        Self("*caches".to_string())
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credential reference plus optional pinned route.
///
/// An empty `route_id` is legal and means "let the pool strategy choose".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteArgument {
    #[serde(default)]
    pub api_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
}

impl RouteArgument {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            route_id: None,
        }
    }

    pub fn with_route(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }

    /// The pinned route, treating an empty identifier as absent
    pub fn pinned_route(&self) -> Option<&str> {
        self.route_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Generic request wrapper decoded once at the method boundary.
///
/// `route` stays optional so that an absent routing argument survives
/// decoding and can be rejected explicitly before any other work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub tenant: Tenant,

    #[serde(default)]
    pub route: Option<RouteArgument>,

    pub payload: P,
}

impl<P> Envelope<P> {
    pub fn new(tenant: Tenant, route: RouteArgument, payload: P) -> Self {
        Self {
            tenant,
            route: Some(route),
            payload,
        }
    }

    /// An envelope whose routing argument is absent
    pub fn unrouted(tenant: Tenant, payload: P) -> Self {
        Self {
            tenant,
            route: None,
            payload,
        }
    }

    /// Split into tenant, routing argument and payload, failing when the
    /// routing argument is absent
    pub fn into_parts(self) -> Result<(Tenant, RouteArgument, P)> {
        let route = self.route.ok_or_else(|| Error::mandatory("RouteArgument"))?;
        Ok((self.tenant, route, self.payload))
    }
}

impl Envelope<Event> {
    /// Wrap an event, taking the tenant from the event itself
    pub fn for_event(event: Event, route: Option<RouteArgument>) -> Self {
        Self {
            tenant: event.tenant.clone(),
            route,
            payload: event,
        }
    }
}
