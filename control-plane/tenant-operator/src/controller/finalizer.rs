use std::future::Future;

use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use super::{ReconcileErr, Requeue, Step};
use crate::store::{ResourceStore, StoreObject};

/// Where an object stands in the two-phase deletion protocol for one
/// finalizer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not being deleted; the token must be present.
    Active,
    /// Deletion requested and our token still blocks it: run cleanups.
    Finalizing,
    /// Deletion requested and our token is gone; the store finishes.
    Cleared,
}

pub fn phase<K: Resource>(obj: &K, token: &str) -> Phase {
    if obj.meta().deletion_timestamp.is_none() {
        Phase::Active
    } else if has_finalizer(obj.meta(), token) {
        Phase::Finalizing
    } else {
        Phase::Cleared
    }
}

pub fn has_finalizer(meta: &ObjectMeta, token: &str) -> bool {
    meta.finalizers.iter().flatten().any(|f| f == token)
}

pub fn add_finalizer(meta: &mut ObjectMeta, token: &str) -> bool {
    if has_finalizer(meta, token) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(token.to_string());
    true
}

pub fn remove_finalizer(meta: &mut ObjectMeta, token: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != token);
    before != finalizers.len()
}

/// Active phase: make sure the token is on the object before anything
/// with external side effects runs.
pub async fn ensure_finalizer<S, K>(store: &S, obj: &K, token: &str) -> Step
where
    S: ResourceStore,
    K: StoreObject,
{
    let mut next = obj.clone();
    if !add_finalizer(next.meta_mut(), token) {
        return Ok(None);
    }
    store.replace(&next).await?;
    debug!(kind = %K::kind(&()), name = %obj.name_any(), %token, "added finalizer");
    Ok(Some(Requeue::Now))
}

/// Finalizing phase. `cleanup` runs the registered cleanups in order and
/// yields `Some` while one of them is still waiting on a dependency. The
/// token is released only after every cleanup reported success; an error
/// or a pending cleanup leaves it in place.
pub async fn finalize<S, K, F>(
    store: &S,
    obj: &K,
    token: &str,
    cleanup: F,
) -> Result<Requeue, ReconcileErr>
where
    S: ResourceStore,
    K: StoreObject,
    F: Future<Output = Step>,
{
    if let Some(pending) = cleanup.await? {
        debug!(
            kind = %K::kind(&()),
            name = %obj.name_any(),
            "cleanup pending; keeping finalizer"
        );
        return Ok(pending);
    }
    let mut next = obj.clone();
    if remove_finalizer(next.meta_mut(), token) {
        store.replace(&next).await?;
        info!(kind = %K::kind(&()), name = %obj.name_any(), %token, "released finalizer");
    }
    Ok(Requeue::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    const TOKEN: &str = "example.io/cleanup";

    #[test]
    fn add_and_remove_are_idempotent() {
        let mut meta = ObjectMeta::default();
        assert!(add_finalizer(&mut meta, TOKEN));
        assert!(!add_finalizer(&mut meta, TOKEN));
        assert_eq!(meta.finalizers.as_ref().map(Vec::len), Some(1));
        assert!(remove_finalizer(&mut meta, TOKEN));
        assert!(!remove_finalizer(&mut meta, TOKEN));
    }

    #[test]
    fn phase_follows_deletion_marker_and_token() {
        let mut cm = ConfigMap::default();
        assert_eq!(phase(&cm, TOKEN), Phase::Active);
        cm.metadata.deletion_timestamp = Some(Time(Utc::now()));
        assert_eq!(phase(&cm, TOKEN), Phase::Cleared);
        add_finalizer(&mut cm.metadata, TOKEN);
        assert_eq!(phase(&cm, TOKEN), Phase::Finalizing);
    }
}
