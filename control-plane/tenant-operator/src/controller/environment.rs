use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::PersistentVolume;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument};

use super::converge::apply;
use super::finalizer::{Phase, ensure_finalizer, finalize, phase};
use super::identity::{ensure_hash_label, ensure_identity};
use super::owner::ensure_linked;
use super::status::{environment_status, write_if_changed};
use super::{
    Context, ReconcileErr, Requeue, Step, finish, sync, unreachable_as_delay,
};
use crate::crd::{
    Application, ENVIRONMENT_ID_LABEL, Environment, EnvironmentStatus,
    GIT_REF_LABEL, Site, Tenant,
};
use crate::external::{primary_endpoint, provision, proxy_admin_endpoint};
use crate::manifests::EnvironmentManifests;
use crate::manifests::customer::files_volume_name;
use crate::store::{ResourceStore, label_selector};

pub const ENV_FINALIZER: &str = "environments.webhost.io/cleanup";

fn status_slot(env: &mut Environment) -> &mut Option<EnvironmentStatus> {
    &mut env.status
}

/// Remove the statically provisioned files volume. A volume that is gone
/// or already terminating counts as released.
async fn release_files_volume<S: ResourceStore>(
    ctx: &Context<S>,
    env: &Environment,
) -> Step {
    if ctx.cfg.dynamic_provisioning {
        return Ok(None);
    }
    let Some(id) = env.id() else {
        return Ok(None);
    };
    let name = files_volume_name(id);
    match ctx.store.get::<PersistentVolume>(None, &name).await? {
        Some(pv) if pv.metadata.deletion_timestamp.is_none() => {
            ctx.store.delete::<PersistentVolume>(None, &name).await?;
            info!(volume = %name, "deleted files volume");
            Ok(Some(Requeue::Now))
        }
        _ => Ok(None),
    }
}

/// Register the primary with the namespace's proxy and keep its monitor
/// settings current.
async fn bootstrap_proxy<S: ResourceStore>(ctx: &Context<S>, ns: &str) -> Step {
    let delay = ctx.cfg.retry.unreachable_retry();
    let Some(proxy) = proxy_admin_endpoint(&ctx.store, ns, &ctx.cfg.proxy).await?
    else {
        info!(%ns, "proxy admin not available yet");
        return Ok(Some(Requeue::After(delay)));
    };
    let primary = primary_endpoint(&ctx.store, &ctx.cfg.database).await?;
    let result = provision::bootstrap(ctx.sql.as_ref(), &proxy, &primary).await;
    unreachable_as_delay(result, delay, "proxy admin")
}

/// One pass over an Environment. Children are converged in dependency
/// order and every write ends the pass.
pub async fn reconcile_environment<S: ResourceStore>(
    ctx: &Context<S>,
    env: &Environment,
) -> Result<Requeue, ReconcileErr> {
    let store = &ctx.store;
    step!(ensure_identity(store, env));
    match phase(env, ENV_FINALIZER) {
        Phase::Cleared => return Ok(Requeue::Done),
        Phase::Finalizing => {
            return finalize(store, env, ENV_FINALIZER, release_files_volume(ctx, env))
                .await;
        }
        Phase::Active => step!(ensure_finalizer(store, env, ENV_FINALIZER)),
    }
    step!(ensure_hash_label(store, env, GIT_REF_LABEL, &env.spec.git_ref));

    let ns = env
        .namespace()
        .ok_or_else(|| ReconcileErr::Internal("environment has no namespace".into()))?;
    let app = match store.get::<Application>(None, &env.spec.application).await? {
        Some(app) if app.id().is_some() => app,
        _ => {
            info!(application = %env.spec.application, "application not ready; retrying later");
            return Ok(Requeue::After(ctx.cfg.retry.parent_retry()));
        }
    };
    step!(ensure_linked(store, &app, env));

    let m = EnvironmentManifests::new(&app, env, &ctx.cfg)?;
    step!(apply(store, m.routing_map_seed(), sync::create_only));
    step!(apply(store, m.credentials_map_seed(), sync::create_only));
    step!(apply(store, m.php_config(), sync::config_map_data));
    step!(apply(store, m.phpfpm_config(), sync::config_map_data));
    if !ctx.cfg.dynamic_provisioning {
        step!(apply(store, m.files_volume(), sync::files_volume));
    }
    step!(apply(store, m.files_claim(), sync::create_only));
    step!(apply(store, m.web_deployment(), sync::web_deployment));
    step!(apply(store, m.proxy_claim(), sync::create_only));
    step!(apply(store, m.proxy_config(), sync::config_map_data));
    step!(apply(store, m.proxy_deployment(), sync::proxy_deployment));
    step!(apply(store, m.web_service(), sync::create_only));
    step!(apply(store, m.proxy_service(), sync::proxy_service));
    step!(bootstrap_proxy(ctx, &ns));
    step!(apply(store, m.autoscaler(), sync::autoscaler));

    let id = env.id().unwrap_or_default().to_string();
    let selector =
        label_selector(&BTreeMap::from([(ENVIRONMENT_ID_LABEL.to_string(), id)]));
    let sites: Vec<Site> = store.list(Some(&ns), &selector).await?;
    debug!(sites = sites.len(), "observed sites");
    step!(write_if_changed(store, env, environment_status(&sites), status_slot));
    Ok(Requeue::Done)
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_default(), name = %obj.name_any()))]
pub async fn reconcile<S: ResourceStore>(
    obj: Arc<Environment>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ReconcileErr> {
    let outcome = reconcile_environment(&ctx, &obj).await;
    finish(&ctx, obj.as_ref(), outcome)
}
