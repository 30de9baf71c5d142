use kube::ResourceExt;
use tracing::{info, trace};

use super::{ReconcileErr, Requeue, Step};
use crate::store::{ResourceStore, StoreObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converged {
    Created,
    Updated,
    Unchanged,
}

/// Create `desired` when absent; otherwise let `sync` copy the fields this
/// operator is authoritative for onto the observed object and write only
/// if that produced a structural difference.
///
/// `desired` carries its own owner reference when it should be owned.
pub async fn create_or_update<S, K, F>(
    store: &S,
    desired: K,
    sync: F,
) -> Result<Converged, ReconcileErr>
where
    S: ResourceStore,
    K: StoreObject + PartialEq,
    F: FnOnce(&mut K, &K),
{
    let name = desired.meta().name.clone().ok_or_else(|| {
        ReconcileErr::Internal(format!("desired {} has no name", K::kind(&())))
    })?;
    let ns = desired.meta().namespace.clone();
    match store.get::<K>(ns.as_deref(), &name).await? {
        None => {
            store.create(&desired).await?;
            Ok(Converged::Created)
        }
        Some(existing) => {
            let mut next = existing.clone();
            sync(&mut next, &desired);
            if next == existing {
                Ok(Converged::Unchanged)
            } else {
                store.replace(&next).await?;
                Ok(Converged::Updated)
            }
        }
    }
}

/// [`create_or_update`] as a pass step: any write ends the pass with an
/// immediate retry.
pub async fn apply<S, K, F>(store: &S, desired: K, sync: F) -> Step
where
    S: ResourceStore,
    K: StoreObject + PartialEq,
    F: FnOnce(&mut K, &K),
{
    let name = desired.name_any();
    match create_or_update(store, desired, sync).await? {
        Converged::Unchanged => {
            trace!(kind = %K::kind(&()), %name, "up to date");
            Ok(None)
        }
        op => {
            info!(kind = %K::kind(&()), %name, ?op, "reconciled child");
            Ok(Some(Requeue::Now))
        }
    }
}
