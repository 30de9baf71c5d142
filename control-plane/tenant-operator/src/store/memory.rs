use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ResourceStore, StoreError, StoreObject, StoreResult, object_name,
};

/// (kind, namespace, name); cluster-scoped objects use an empty namespace.
type ObjectKey = (String, String, String);

const SERVER_OWNED_META: [&str; 4] =
    ["uid", "creationTimestamp", "deletionTimestamp", "generation"];

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    version: u64,
    writes: u64,
    pending_conflicts: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-memory [`ResourceStore`] with API-server semantics for the parts the
/// reconcilers depend on: resourceVersion checks, AlreadyExists on create,
/// and finalizer-gated deletion.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutations since creation.
    pub async fn writes(&self) -> u64 {
        self.state.lock().await.writes
    }

    /// Make the next `n` conditional updates fail as if another writer had
    /// bumped the object first.
    pub async fn inject_conflicts(&self, n: usize) {
        self.state.lock().await.pending_conflicts = n;
    }
}

fn kind_of<K: StoreObject>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

fn key_of<K: StoreObject>(ns: Option<&str>, name: &str) -> ObjectKey {
    (kind_of::<K>(), ns.unwrap_or_default().to_string(), name.to_string())
}

fn describe(key: &ObjectKey) -> String {
    if key.1.is_empty() {
        format!("{} {}", key.0, key.2)
    } else {
        format!("{} {}/{}", key.0, key.1, key.2)
    }
}

fn meta_str<'a>(obj: &'a Value, field: &str) -> Option<&'a str> {
    obj.get("metadata")?.get(field)?.as_str()
}

fn has_finalizers(obj: &Value) -> bool {
    obj.get("metadata")
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn set_meta(obj: &mut Value, field: &str, value: Option<Value>) {
    if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut)
    {
        match value {
            Some(v) => {
                meta.insert(field.to_string(), v);
            }
            None => {
                meta.remove(field);
            }
        }
    }
}

fn set_status(obj: &mut Value, status: Option<&Value>) {
    if let Some(map) = obj.as_object_mut() {
        match status {
            Some(s) => {
                map.insert("status".to_string(), s.clone());
            }
            None => {
                map.remove("status");
            }
        }
    }
}

fn parse_selector(selector: &str) -> StoreResult<Vec<(String, String)>> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|req| {
            let (k, v) = req.split_once('=').ok_or_else(|| {
                StoreError::Invalid(format!("unsupported selector: {req}"))
            })?;
            Ok((k.trim().to_string(), v.trim_start_matches('=').trim().into()))
        })
        .collect()
}

fn matches_selector(obj: &Value, reqs: &[(String, String)]) -> bool {
    let labels = obj.get("metadata").and_then(|m| m.get("labels"));
    reqs.iter().all(|(k, v)| {
        labels
            .and_then(|l| l.get(k))
            .and_then(Value::as_str)
            .is_some_and(|actual| actual == v)
    })
}

/// Rejects a stale write: a set resourceVersion must match the stored one.
fn check_version<K: StoreObject>(
    obj: &K,
    current: &Value,
    key: &ObjectKey,
) -> StoreResult<()> {
    match obj.meta().resource_version.as_deref() {
        Some(rv) if Some(rv) != meta_str(current, "resourceVersion") => {
            Err(StoreError::Conflict(format!(
                "{}: resourceVersion {rv} is stale",
                describe(key)
            )))
        }
        _ => Ok(()),
    }
}

impl State {
    fn take_injected_conflict(&mut self, key: &ObjectKey) -> StoreResult<()> {
        if self.pending_conflicts == 0 {
            return Ok(());
        }
        self.pending_conflicts -= 1;
        let version = self.next_version();
        if let Some(stored) = self.objects.get_mut(key) {
            set_meta(stored, "resourceVersion", Some(Value::String(version)));
        }
        Err(StoreError::Conflict(format!(
            "{}: concurrent modification",
            describe(key)
        )))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get<K: StoreObject>(
        &self,
        ns: Option<&str>,
        name: &str,
    ) -> StoreResult<Option<K>> {
        let state = self.state.lock().await;
        state
            .objects
            .get(&key_of::<K>(ns, name))
            .map(|v| serde_json::from_value(v.clone()).map_err(Into::into))
            .transpose()
    }

    async fn list<K: StoreObject>(
        &self,
        ns: Option<&str>,
        selector: &str,
    ) -> StoreResult<Vec<K>> {
        let reqs = parse_selector(selector)?;
        let kind = kind_of::<K>();
        let state = self.state.lock().await;
        state
            .objects
            .iter()
            .filter(|((k, n, _), _)| {
                *k == kind && ns.is_none_or(|ns| ns == n.as_str())
            })
            .filter(|(_, v)| matches_selector(v, &reqs))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Into::into))
            .collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> StoreResult<K> {
        let name = object_name(obj)?;
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let mut state = self.state.lock().await;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(describe(&key)));
        }
        let mut created = obj.clone();
        let version = state.next_version();
        let meta = created.meta_mut();
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(version);
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.generation = Some(1);
        meta.deletion_timestamp = None;
        state.objects.insert(key, serde_json::to_value(&created)?);
        state.writes += 1;
        Ok(created)
    }

    async fn replace<K: StoreObject>(&self, obj: &K) -> StoreResult<K> {
        let name = object_name(obj)?;
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let mut state = self.state.lock().await;
        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(StoreError::NotFound(describe(&key)));
        };
        state.take_injected_conflict(&key)?;
        check_version(obj, &current, &key)?;

        let mut next = serde_json::to_value(obj)?;
        for field in SERVER_OWNED_META {
            let kept = current.get("metadata").and_then(|m| m.get(field));
            set_meta(&mut next, field, kept.cloned());
        }
        set_status(&mut next, current.get("status"));
        if current.get("spec") != next.get("spec") {
            let generation = current
                .get("metadata")
                .and_then(|m| m.get("generation"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            set_meta(&mut next, "generation", Some((generation + 1).into()));
        }
        let version = state.next_version();
        set_meta(&mut next, "resourceVersion", Some(Value::String(version)));

        let deleting = meta_str(&next, "deletionTimestamp").is_some();
        if deleting && !has_finalizers(&next) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, next.clone());
        }
        state.writes += 1;
        Ok(serde_json::from_value(next)?)
    }

    async fn replace_status<K: StoreObject>(&self, obj: &K) -> StoreResult<K> {
        let name = object_name(obj)?;
        let key = key_of::<K>(obj.meta().namespace.as_deref(), &name);
        let mut state = self.state.lock().await;
        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(StoreError::NotFound(describe(&key)));
        };
        state.take_injected_conflict(&key)?;
        check_version(obj, &current, &key)?;

        let incoming = serde_json::to_value(obj)?;
        let mut next = current;
        set_status(&mut next, incoming.get("status"));
        let version = state.next_version();
        set_meta(&mut next, "resourceVersion", Some(Value::String(version)));
        state.objects.insert(key, next.clone());
        state.writes += 1;
        Ok(serde_json::from_value(next)?)
    }

    async fn delete<K: StoreObject>(
        &self,
        ns: Option<&str>,
        name: &str,
    ) -> StoreResult<bool> {
        let key = key_of::<K>(ns, name);
        let mut state = self.state.lock().await;
        let Some(current) = state.objects.get(&key).cloned() else {
            return Ok(false);
        };
        if !has_finalizers(&current) {
            state.objects.remove(&key);
            state.writes += 1;
            return Ok(true);
        }
        if meta_str(&current, "deletionTimestamp").is_none() {
            let mut marked = current;
            let now = serde_json::to_value(Time(Utc::now()))?;
            set_meta(&mut marked, "deletionTimestamp", Some(now));
            let version = state.next_version();
            set_meta(&mut marked, "resourceVersion", Some(Value::String(version)));
            state.objects.insert(key, marked);
            state.writes += 1;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("tenant".into()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_assigns_server_fields_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("a", &[])).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        let err = store.create(&config_map("a", &[])).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn stale_replace_is_a_conflict() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("a", &[])).await.unwrap();
        let mut first = created.clone();
        first.data = Some(BTreeMap::from([("k".into(), "1".into())]));
        store.replace(&first).await.unwrap();

        let mut stale = created;
        stale.data = Some(BTreeMap::from([("k".into(), "2".into())]));
        assert!(store.replace(&stale).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn finalizers_gate_physical_removal() {
        let store = MemoryStore::new();
        let mut cm = config_map("a", &[]);
        cm.metadata.finalizers = Some(vec!["test/cleanup".into()]);
        store.create(&cm).await.unwrap();

        assert!(store.delete::<ConfigMap>(Some("tenant"), "a").await.unwrap());
        let marked: ConfigMap =
            store.get(Some("tenant"), "a").await.unwrap().unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        let mut cleared = marked;
        cleared.metadata.finalizers = Some(vec![]);
        store.replace(&cleared).await.unwrap();
        let gone: Option<ConfigMap> =
            store.get(Some("tenant"), "a").await.unwrap();
        assert!(gone.is_none());
        assert!(!store.delete::<ConfigMap>(Some("tenant"), "a").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        store.create(&config_map("a", &[("app", "x")])).await.unwrap();
        store.create(&config_map("b", &[("app", "y")])).await.unwrap();

        let hits: Vec<ConfigMap> =
            store.list(Some("tenant"), "app=x").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.name.as_deref(), Some("a"));
        let all: Vec<ConfigMap> = store.list(None, "").await.unwrap();
        assert_eq!(all.len(), 2);
        let none: Vec<ConfigMap> =
            store.list(Some("other"), "").await.unwrap();
        assert!(none.is_empty());
    }
}
