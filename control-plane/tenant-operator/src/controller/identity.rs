use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Requeue, Step};
use crate::crd::Tenant;
use crate::store::{ResourceStore, StoreObject};

/// Hex characters kept from a SHA-256 digest for content-hash labels.
pub const HASH_LABEL_LEN: usize = 32;

/// Truncated SHA-256 of `input`, short enough to be a label value.
pub fn content_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(HASH_LABEL_LEN);
    hex
}

/// Set `key=value` on the object's labels. Returns true when it changed.
pub fn set_label<K: Resource>(obj: &mut K, key: &str, value: &str) -> bool {
    let labels = obj.meta_mut().labels.get_or_insert_with(Default::default);
    if labels.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    labels.insert(key.to_string(), value.to_string());
    true
}

/// Give the object a fresh identity unless it already has one.
pub fn assign_identity<K: Tenant>(obj: &mut K) -> bool {
    if obj.id().is_some_and(|id| !id.is_empty()) {
        return false;
    }
    set_label(obj, K::ID_LABEL, &Uuid::new_v4().to_string())
}

/// Persist a new identity and end the pass; nothing downstream may run
/// until the identity is confirmed by the store.
pub async fn ensure_identity<S, K>(store: &S, obj: &K) -> Step
where
    S: ResourceStore,
    K: Tenant,
{
    let mut next = obj.clone();
    if !assign_identity(&mut next) {
        return Ok(None);
    }
    store.replace(&next).await?;
    info!(
        kind = %K::kind(&()),
        name = %obj.name_any(),
        id = next.id().unwrap_or_default(),
        "assigned identity"
    );
    Ok(Some(Requeue::Now))
}

/// Keep a content-hash label (git repo, git ref) in step with its source
/// field, with the same write-then-retry discipline as identity.
pub async fn ensure_hash_label<S, K>(
    store: &S,
    obj: &K,
    key: &str,
    source: &str,
) -> Step
where
    S: ResourceStore,
    K: StoreObject,
{
    let mut next = obj.clone();
    if !set_label(&mut next, key, &content_hash(source)) {
        return Ok(None);
    }
    store.replace(&next).await?;
    debug!(kind = %K::kind(&()), name = %obj.name_any(), %key, "updated hash label");
    Ok(Some(Requeue::Now))
}
