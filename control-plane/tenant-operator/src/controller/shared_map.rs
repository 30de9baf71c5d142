//! Per-namespace aggregate objects that every Site writes its own key into.
//!
//! The routing map (ConfigMap) and the credentials map (Secret) both hold a
//! single JSON document under [`MAP_PAYLOAD_KEY`], keyed by site identity.
//! Writers only ever touch their own key and rely on resourceVersion checks
//! to avoid lost updates.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ReconcileErr;
use crate::store::{ResourceStore, StoreError, StoreObject};

pub const DOMAIN_MAP_NAME: &str = "domain-map";
pub const MAP_PAYLOAD_KEY: &str = "dbconfig.json";

/// Accessors for the JSON payload of an aggregate object.
pub trait AggregatePayload: StoreObject {
    fn payload(&self) -> Option<String>;
    fn set_payload(&mut self, json: String);
}

impl AggregatePayload for ConfigMap {
    fn payload(&self) -> Option<String> {
        self.data.as_ref()?.get(MAP_PAYLOAD_KEY).cloned()
    }

    fn set_payload(&mut self, json: String) {
        self.data
            .get_or_insert_with(BTreeMap::new)
            .insert(MAP_PAYLOAD_KEY.to_string(), json);
    }
}

impl AggregatePayload for Secret {
    fn payload(&self) -> Option<String> {
        if let Some(ByteString(bytes)) =
            self.data.as_ref().and_then(|d| d.get(MAP_PAYLOAD_KEY))
        {
            return Some(String::from_utf8_lossy(bytes).into_owned());
        }
        self.string_data.as_ref()?.get(MAP_PAYLOAD_KEY).cloned()
    }

    fn set_payload(&mut self, json: String) {
        if let Some(sd) = self.string_data.as_mut() {
            sd.remove(MAP_PAYLOAD_KEY);
        }
        self.data
            .get_or_insert_with(BTreeMap::new)
            .insert(MAP_PAYLOAD_KEY.to_string(), ByteString(json.into_bytes()));
    }
}

/// Credentials entry a site publishes for its web tier.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DbCredentials {
    pub host: String,
    pub port: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl DbCredentials {
    pub fn via_proxy(database: String, user: String, password: String) -> Self {
        Self {
            host: "proxysql".to_string(),
            port: "6033".to_string(),
            database,
            user,
            password,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapWrite {
    Unchanged,
    Written,
    /// The aggregate object does not exist (yet, or any more).
    Missing,
}

type Payload = BTreeMap<String, Value>;

fn decode(raw: Option<String>) -> Result<Payload, ReconcileErr> {
    match raw {
        Some(s) if !s.trim().is_empty() => Ok(serde_json::from_str(&s)?),
        _ => Ok(Payload::new()),
    }
}

/// Make `map[key] == value`, leaving every other key untouched.
pub async fn set_key<S, K, V>(
    store: &S,
    ns: &str,
    name: &str,
    key: &str,
    value: &V,
    attempts: u32,
) -> Result<MapWrite, ReconcileErr>
where
    S: ResourceStore,
    K: AggregatePayload,
    V: Serialize + Sync,
{
    let wanted = serde_json::to_value(value)?;
    update_until_stable::<S, K, _>(store, ns, name, attempts, |map| {
        if map.get(key) == Some(&wanted) {
            return false;
        }
        map.insert(key.to_string(), wanted.clone());
        true
    })
    .await
}

/// Drop `key` from the map. An absent key or absent aggregate is success.
pub async fn remove_key<S, K>(
    store: &S,
    ns: &str,
    name: &str,
    key: &str,
    attempts: u32,
) -> Result<MapWrite, ReconcileErr>
where
    S: ResourceStore,
    K: AggregatePayload,
{
    update_until_stable::<S, K, _>(store, ns, name, attempts, |map| {
        map.remove(key).is_some()
    })
    .await
}

/// Read-modify-write loop with bounded retries. `mutate` returns whether it
/// changed the map; every attempt starts from a fresh read.
async fn update_until_stable<S, K, F>(
    store: &S,
    ns: &str,
    name: &str,
    attempts: u32,
    mutate: F,
) -> Result<MapWrite, ReconcileErr>
where
    S: ResourceStore,
    K: AggregatePayload,
    F: Fn(&mut Payload) -> bool,
{
    for attempt in 1..=attempts.max(1) {
        let Some(mut obj) = store.get::<K>(Some(ns), name).await? else {
            return Ok(MapWrite::Missing);
        };
        let mut map = decode(obj.payload())?;
        if !mutate(&mut map) {
            return Ok(MapWrite::Unchanged);
        }
        obj.set_payload(serde_json::to_string(&map)?);
        match store.replace(&obj).await {
            Ok(_) => return Ok(MapWrite::Written),
            Err(StoreError::NotFound(_)) => return Ok(MapWrite::Missing),
            Err(e) if e.is_conflict() => {
                debug!(kind = %K::kind(&()), %ns, %name, attempt, "map update conflicted; re-reading");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(StoreError::Conflict(format!(
        "{} {ns}/{name}: gave up after {attempts} conflicting updates",
        K::kind(&())
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use kube::api::ObjectMeta;

    fn routing_map(payload: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(DOMAIN_MAP_NAME.into()),
                namespace: Some("tenant".into()),
                ..Default::default()
            },
            data: payload.map(|p| {
                BTreeMap::from([(MAP_PAYLOAD_KEY.to_string(), p.to_string())])
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn set_keeps_foreign_keys_and_is_idempotent() {
        let store = MemoryStore::new();
        store
            .create(&routing_map(Some(r#"{"other":{"x.com":"x"}}"#)))
            .await
            .unwrap();
        let value = BTreeMap::from([("a.com", "a")]);

        let first = set_key::<_, ConfigMap, _>(&store, "tenant", DOMAIN_MAP_NAME, "s1", &value, 3)
            .await
            .unwrap();
        assert_eq!(first, MapWrite::Written);
        let second = set_key::<_, ConfigMap, _>(&store, "tenant", DOMAIN_MAP_NAME, "s1", &value, 3)
            .await
            .unwrap();
        assert_eq!(second, MapWrite::Unchanged);

        let cm: ConfigMap = store.get(Some("tenant"), DOMAIN_MAP_NAME).await.unwrap().unwrap();
        let map = decode(cm.payload()).unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("other"));
    }

    #[tokio::test]
    async fn conflicts_are_retried_until_attempts_run_out() {
        let store = MemoryStore::new();
        store.create(&routing_map(None)).await.unwrap();

        store.inject_conflicts(2).await;
        let done = set_key::<_, ConfigMap, _>(&store, "tenant", DOMAIN_MAP_NAME, "s1", &"v", 3)
            .await
            .unwrap();
        assert_eq!(done, MapWrite::Written);

        store.inject_conflicts(5).await;
        let err = set_key::<_, ConfigMap, _>(&store, "tenant", DOMAIN_MAP_NAME, "s2", &"v", 3)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn missing_aggregate_is_reported_not_created() {
        let store = MemoryStore::new();
        let set = set_key::<_, Secret, _>(&store, "tenant", DOMAIN_MAP_NAME, "s1", &"v", 3)
            .await
            .unwrap();
        assert_eq!(set, MapWrite::Missing);
        let removed = remove_key::<_, Secret>(&store, "tenant", DOMAIN_MAP_NAME, "s1", 3)
            .await
            .unwrap();
        assert_eq!(removed, MapWrite::Missing);
    }

    #[test]
    fn secret_payload_prefers_data_over_string_data() {
        let mut secret = Secret::default();
        secret.string_data = Some(BTreeMap::from([(
            MAP_PAYLOAD_KEY.to_string(),
            "{}".to_string(),
        )]));
        assert_eq!(secret.payload().as_deref(), Some("{}"));
        secret.set_payload(r#"{"a":1}"#.into());
        assert_eq!(secret.payload().as_deref(), Some(r#"{"a":1}"#));
        assert!(secret.string_data.unwrap().is_empty());
    }
}
