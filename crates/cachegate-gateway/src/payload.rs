//! Request and reply payloads of the cache methods
//!
//! Field names follow the backend's wire naming.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Item IDs of one cache partition, optionally filtered by prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheItemIdsQuery {
    #[serde(rename = "CacheID")]
    pub cache_id: String,

    #[serde(rename = "ItemIDPrefix", default)]
    pub item_id_prefix: String,
}

/// One item of one cache partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheItemQuery {
    #[serde(rename = "CacheID")]
    pub cache_id: String,

    #[serde(rename = "ItemID")]
    pub item_id: String,
}

/// One group of one cache partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupQuery {
    #[serde(rename = "CacheID")]
    pub cache_id: String,

    #[serde(rename = "GroupID")]
    pub group_id: String,
}

/// Selection of cache partitions: `None` selects all, an empty list none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheIds(pub Option<Vec<String>>);

impl CacheIds {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn none() -> Self {
        Self(Some(Vec::new()))
    }

    pub fn of<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Some(ids.into_iter().map(Into::into).collect()))
    }

    pub fn is_all(&self) -> bool {
        self.0.is_none()
    }
}

/// Which cached objects to flush, reload or load.
///
/// `ids` maps a cache partition to the object IDs to process; an empty
/// list for a partition means every object in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadSpec {
    #[serde(rename = "FlushAll", default)]
    pub flush_all: bool,

    #[serde(rename = "ArgsCache", default)]
    pub ids: BTreeMap<String, Vec<String>>,
}

impl ReloadSpec {
    pub fn flush_all() -> Self {
        Self {
            flush_all: true,
            ids: BTreeMap::new(),
        }
    }

    pub fn with_ids<I, S>(mut self, cache_id: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids
            .insert(cache_id.into(), ids.into_iter().map(Into::into).collect());
        self
    }
}

/// Size of one cache partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    #[serde(rename = "Items")]
    pub items: u64,

    #[serde(rename = "Groups")]
    pub groups: u64,
}

/// Status string the backend returns for successful mutations
pub const OK: &str = "OK";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_ids_nil_versus_empty() {
        assert_eq!(serde_json::to_value(CacheIds::all()).unwrap(), json!(null));
        assert_eq!(serde_json::to_value(CacheIds::none()).unwrap(), json!([]));

        let ids: CacheIds = serde_json::from_value(json!(["*resources"])).unwrap();
        assert_eq!(ids, CacheIds::of(["*resources"]));
        assert!(!ids.is_all());
    }

    #[test]
    fn test_wire_names() {
        let query = CacheItemQuery {
            cache_id: "*resources".into(),
            item_id: "cgrates.org:r1".into(),
        };
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({"CacheID": "*resources", "ItemID": "cgrates.org:r1"})
        );

        let spec: ReloadSpec =
            serde_json::from_value(json!({"ArgsCache": {"*resources": ["r1"]}})).unwrap();
        assert!(!spec.flush_all);
        assert_eq!(spec.ids["*resources"], vec!["r1"]);
    }
}
