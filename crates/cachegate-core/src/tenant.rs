//! Tenant and event types for multi-tenancy support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Identifier scoping both authorization policy and routing.
///
/// Every request carries exactly one tenant. Tenants are opaque,
/// non-empty strings (for example `cgrates.org`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tenant(String);

impl Tenant {
    /// Create a tenant, rejecting empty or whitespace-only identifiers
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "tenant identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tenant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Tenant {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Tenant> for String {
    fn from(tenant: Tenant) -> Self {
        tenant.0
    }
}

impl AsRef<str> for Tenant {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Authorization and dispatch context for a call.
///
/// An event is immutable once built. Routing-only calls synthesize one
/// with just the tenant populated via [`Event::for_tenant`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tenant: Tenant,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Event time; `None` means "now" for time-bounded decisions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Event {
    /// Build a routing-only event carrying nothing but the tenant
    pub fn for_tenant(tenant: Tenant) -> Self {
        Self {
            tenant,
            id: String::new(),
            time: None,
            fields: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Event time, falling back to the current instant
    pub fn time_or_now(&self) -> DateTime<Utc> {
        self.time.unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tenant_rejects_empty() {
        assert!(Tenant::new("").is_err());
        assert!(Tenant::new("   ").is_err());
        assert_eq!(Tenant::new("cgrates.org").unwrap().as_str(), "cgrates.org");
    }

    #[test]
    fn test_tenant_from_str_and_display() {
        let tenant: Tenant = "itsyscom.com".parse().unwrap();
        assert_eq!(tenant.to_string(), "itsyscom.com");
    }

    #[test]
    fn test_tenant_serializes_as_plain_string() {
        let tenant = Tenant::new("cgrates.org").unwrap();
        assert_eq!(serde_json::to_string(&tenant).unwrap(), "\"cgrates.org\"");
    }

    #[test]
    fn test_tenant_deserialize_rejects_empty() {
        assert!(serde_json::from_str::<Tenant>("\"\"").is_err());
    }

    #[test]
    fn test_routing_only_event() {
        let event = Event::for_tenant(Tenant::new("cgrates.org").unwrap());
        assert!(event.id.is_empty());
        assert!(event.time.is_none());
        assert!(event.fields.is_empty());
    }

    #[test]
    fn test_event_time_prefers_own_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let event = Event::for_tenant(Tenant::new("t").unwrap()).with_time(at);
        assert_eq!(event.time_or_now(), at);
    }

    #[test]
    fn test_event_deserialize_minimal() {
        let event: Event = serde_json::from_str(r#"{"tenant":"cgrates.org"}"#).unwrap();
        assert_eq!(event.tenant.as_str(), "cgrates.org");
        assert!(event.fields.is_empty());
    }
}
