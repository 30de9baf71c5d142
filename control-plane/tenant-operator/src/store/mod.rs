//! Typed access to the cluster resource store.
//!
//! Reconcilers talk to the store only through [`ResourceStore`], so the same
//! tier logic runs against the API server ([`KubeStore`]) and against the
//! in-memory store the integration tests use ([`MemoryStore`]).

mod error;
mod kube_store;
mod memory;

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use error::{StoreError, StoreResult};
pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Any typed object the store can persist.
pub trait StoreObject:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ResourceStore: Clone + Send + Sync + 'static {
    /// Fetch one object; `ns` is `None` for cluster-scoped kinds.
    async fn get<K: StoreObject>(
        &self,
        ns: Option<&str>,
        name: &str,
    ) -> StoreResult<Option<K>>;

    /// List objects matching an equality label selector (`k=v,k2=v2`).
    /// `ns = None` lists across all namespaces.
    async fn list<K: StoreObject>(
        &self,
        ns: Option<&str>,
        selector: &str,
    ) -> StoreResult<Vec<K>>;

    async fn create<K: StoreObject>(&self, obj: &K) -> StoreResult<K>;

    /// Conditional update: fails with [`StoreError::Conflict`] when the
    /// object's resourceVersion is no longer current.
    async fn replace<K: StoreObject>(&self, obj: &K) -> StoreResult<K>;

    async fn replace_status<K: StoreObject>(&self, obj: &K) -> StoreResult<K>;

    /// Request deletion with background propagation. Returns `false` when
    /// the object was already gone.
    async fn delete<K: StoreObject>(
        &self,
        ns: Option<&str>,
        name: &str,
    ) -> StoreResult<bool>;
}

pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn object_name<K: Resource>(obj: &K) -> StoreResult<String> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::Invalid("object has no name".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_sorted_and_comma_joined() {
        let labels = BTreeMap::from([
            ("webhost.io/site-id".to_string(), "s1".to_string()),
            ("type".to_string(), "cron".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "type=cron,webhost.io/site-id=s1");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }
}
