//! Remote method identifiers
//!
//! A [`MethodId`] names a remote operation. The same name is the subject of
//! authorization and the selector used when invoking a backend connection.
//! Each identifier also records whether the operation mutates backend
//! state, which the dispatcher consults before retrying on another
//! connection.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Stable identifier of a remote operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    name: Cow<'static, str>,
    #[serde(default)]
    mutating: bool,
}

impl MethodId {
    pub const CACHE_PING: MethodId = MethodId::read_only("CacheSv1.Ping");
    pub const CACHE_GET_ITEM_IDS: MethodId = MethodId::read_only("CacheSv1.GetItemIDs");
    pub const CACHE_HAS_ITEM: MethodId = MethodId::read_only("CacheSv1.HasItem");
    pub const CACHE_GET_ITEM_EXPIRY_TIME: MethodId =
        MethodId::read_only("CacheSv1.GetItemExpiryTime");
    pub const CACHE_REMOVE_ITEM: MethodId = MethodId::mutation("CacheSv1.RemoveItem");
    pub const CACHE_CLEAR: MethodId = MethodId::mutation("CacheSv1.Clear");
    pub const CACHE_FLUSH_CACHE: MethodId = MethodId::mutation("CacheSv1.FlushCache");
    pub const CACHE_GET_CACHE_STATS: MethodId = MethodId::read_only("CacheSv1.GetCacheStats");
    pub const CACHE_PRECACHE_STATUS: MethodId = MethodId::read_only("CacheSv1.PrecacheStatus");
    pub const CACHE_HAS_GROUP: MethodId = MethodId::read_only("CacheSv1.HasGroup");
    pub const CACHE_GET_GROUP_ITEM_IDS: MethodId =
        MethodId::read_only("CacheSv1.GetGroupItemIDs");
    pub const CACHE_REMOVE_GROUP: MethodId = MethodId::mutation("CacheSv1.RemoveGroup");
    pub const CACHE_RELOAD_CACHE: MethodId = MethodId::mutation("CacheSv1.ReloadCache");
    pub const CACHE_LOAD_CACHE: MethodId = MethodId::mutation("CacheSv1.LoadCache");

    /// All methods exposed by the cache subsystem
    pub const CACHE_METHODS: [MethodId; 14] = [
        Self::CACHE_PING,
        Self::CACHE_GET_ITEM_IDS,
        Self::CACHE_HAS_ITEM,
        Self::CACHE_GET_ITEM_EXPIRY_TIME,
        Self::CACHE_REMOVE_ITEM,
        Self::CACHE_CLEAR,
        Self::CACHE_FLUSH_CACHE,
        Self::CACHE_GET_CACHE_STATS,
        Self::CACHE_PRECACHE_STATUS,
        Self::CACHE_HAS_GROUP,
        Self::CACHE_GET_GROUP_ITEM_IDS,
        Self::CACHE_REMOVE_GROUP,
        Self::CACHE_RELOAD_CACHE,
        Self::CACHE_LOAD_CACHE,
    ];

    pub const fn read_only(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            mutating: false,
        }
    }

    pub const fn mutation(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            mutating: true,
        }
    }

    /// Build an identifier for a method only known at runtime
    pub fn dynamic(name: impl Into<String>, mutating: bool) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            mutating,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether a second attempt on another connection could double-apply
    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    /// Look up a cache method by its wire name
    pub fn cache_method(name: &str) -> Option<MethodId> {
        Self::CACHE_METHODS.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cache_method_names_are_unique() {
        let all = MethodId::CACHE_METHODS;
        let names: HashSet<&str> = all.iter().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), 14);
    }

    #[test]
    fn test_mutating_classification() {
        let all = MethodId::CACHE_METHODS;
        let mutating: Vec<&str> = all
            .iter()
            .filter(|m| m.is_mutating())
            .map(|m| m.as_str())
            .collect();
        assert_eq!(
            mutating,
            vec![
                "CacheSv1.RemoveItem",
                "CacheSv1.Clear",
                "CacheSv1.FlushCache",
                "CacheSv1.RemoveGroup",
                "CacheSv1.ReloadCache",
                "CacheSv1.LoadCache",
            ]
        );
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(
            MethodId::cache_method("CacheSv1.HasGroup"),
            Some(MethodId::CACHE_HAS_GROUP)
        );
        assert!(MethodId::cache_method("CacheSv1.Nope").is_none());
    }

    #[test]
    fn test_dynamic_equals_static_with_same_name() {
        assert_eq!(
            MethodId::dynamic("CacheSv1.Clear", true),
            MethodId::CACHE_CLEAR
        );
    }
}
