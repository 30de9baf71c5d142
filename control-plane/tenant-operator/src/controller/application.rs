use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, instrument};

use super::identity::{ensure_hash_label, ensure_identity};
use super::status::{application_status, write_if_changed};
use super::{Context, ReconcileErr, Requeue, finish};
use crate::crd::{
    APPLICATION_ID_LABEL, Application, ApplicationStatus, Environment,
    GIT_REPO_LABEL, Tenant,
};
use crate::store::{ResourceStore, label_selector};

fn status_slot(app: &mut Application) -> &mut Option<ApplicationStatus> {
    &mut app.status
}

/// One pass over an Application: identity, repository hash, and a status
/// listing every Environment that carries its identity.
pub async fn reconcile_application<S: ResourceStore>(
    ctx: &Context<S>,
    app: &Application,
) -> Result<Requeue, ReconcileErr> {
    let store = &ctx.store;
    step!(ensure_identity(store, app));
    step!(ensure_hash_label(store, app, GIT_REPO_LABEL, &app.spec.git_repo));

    let id = app.id().unwrap_or_default().to_string();
    let selector =
        label_selector(&BTreeMap::from([(APPLICATION_ID_LABEL.to_string(), id)]));
    let envs: Vec<Environment> = store.list(None, &selector).await?;
    debug!(environments = envs.len(), "observed environments");
    step!(write_if_changed(store, app, application_status(&envs), status_slot));
    Ok(Requeue::Done)
}

#[instrument(skip_all, fields(name = %obj.name_any()))]
pub async fn reconcile<S: ResourceStore>(
    obj: Arc<Application>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ReconcileErr> {
    let outcome = reconcile_application(&ctx, &obj).await;
    finish(&ctx, obj.as_ref(), outcome)
}
