use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::info;

use super::{ReconcileErr, Requeue, Step};
use crate::crd::Tenant;
use crate::store::{ResourceStore, StoreObject};

pub fn is_controlled_by<P: Resource, C: Resource>(parent: &P, child: &C) -> bool {
    let Some(uid) = parent.meta().uid.as_deref() else {
        return false;
    };
    child
        .meta()
        .owner_references
        .iter()
        .flatten()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}

/// Copy `inherited` into `child` where missing or different. Other labels
/// are left alone.
pub fn sync_labels(
    inherited: &BTreeMap<String, String>,
    child: &mut BTreeMap<String, String>,
) -> bool {
    let mut changed = false;
    for (k, v) in inherited {
        if child.get(k) != Some(v) {
            child.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed
}

/// Controller owner reference to `parent`, for children built from it.
pub fn owner_reference<P: StoreObject>(
    parent: &P,
) -> Result<OwnerReference, ReconcileErr> {
    parent.controller_owner_ref(&()).ok_or_else(|| {
        ReconcileErr::Internal(format!(
            "{} {} has no uid yet",
            P::kind(&()),
            parent.name_any()
        ))
    })
}

/// Propagate the parent's identity labels and make it the child's
/// controller. A controller reference left by an earlier incarnation of
/// the parent is replaced.
pub fn link_to_owner<P, C>(parent: &P, child: &mut C) -> Result<bool, ReconcileErr>
where
    P: Tenant,
    C: Resource,
{
    let inherited = parent.child_labels();
    let mut changed = !inherited.is_empty()
        && sync_labels(
            &inherited,
            child.meta_mut().labels.get_or_insert_with(BTreeMap::new),
        );
    if !is_controlled_by(parent, child) {
        let owner = owner_reference(parent)?;
        let refs = child.meta_mut().owner_references.get_or_insert_with(Vec::new);
        refs.retain(|r| r.controller != Some(true));
        refs.push(owner);
        changed = true;
    }
    Ok(changed)
}

/// Link `child` to `parent` and persist; a write ends the pass so the next
/// one works from the linked object.
pub async fn ensure_linked<S, P, C>(store: &S, parent: &P, child: &C) -> Step
where
    S: ResourceStore,
    P: Tenant,
    C: StoreObject,
{
    let mut next = child.clone();
    if !link_to_owner(parent, &mut next)? {
        return Ok(None);
    }
    store.replace(&next).await?;
    info!(
        kind = %C::kind(&()),
        name = %child.name_any(),
        owner = %parent.name_any(),
        "linked to owner"
    );
    Ok(Some(Requeue::Now))
}
