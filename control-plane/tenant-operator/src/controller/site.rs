use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{info, instrument};

use super::converge::apply;
use super::finalizer::{
    Phase, add_finalizer, ensure_finalizer, finalize, has_finalizer, phase,
    remove_finalizer,
};
use super::identity::ensure_identity;
use super::owner::ensure_linked;
use super::shared_map::{DOMAIN_MAP_NAME, DbCredentials, MapWrite, remove_key, set_key};
use super::status::{site_status, write_if_changed};
use super::{
    Context, ReconcileErr, Requeue, Step, finish, sync, unreachable_as_delay,
};
use crate::crd::{Application, Environment, Site, SiteStatus, Tenant};
use crate::external::provision::{self, SiteDatabase};
use crate::external::{primary_endpoint, proxy_admin_endpoint};
use crate::jobs::{cron, oneshot};
use crate::manifests::site::{PASSWORD_FINALIZER, generate_password, stored_password};
use crate::manifests::{CustomerScope, SiteManifests};
use crate::store::ResourceStore;

pub const SITE_FINALIZER: &str = "sites.webhost.io/cleanup";

fn status_slot(site: &mut Site) -> &mut Option<SiteStatus> {
    &mut site.status
}

fn namespace_of(site: &Site) -> Result<String, ReconcileErr> {
    site.namespace()
        .ok_or_else(|| ReconcileErr::Internal("site has no namespace".into()))
}

fn site_database(site: &Site, password: String) -> SiteDatabase {
    SiteDatabase {
        name: site.database_name(),
        user: site.database_user(),
        password,
    }
}

fn map_step(write: MapWrite, missing_delay: Duration, map: &str) -> Option<Requeue> {
    match write {
        MapWrite::Unchanged => None,
        MapWrite::Written => Some(Requeue::Now),
        MapWrite::Missing => {
            info!(%map, "domain map not seeded yet; retrying later");
            Some(Requeue::After(missing_delay))
        }
    }
}

/// Cleanups run in order; the first failure stops the sequence and keeps
/// the Site's finalizer in place. An unreachable database is waited for.
async fn cleanup_site<S: ResourceStore>(ctx: &Context<S>, site: &Site) -> Step {
    let store = &ctx.store;
    let ns = namespace_of(site)?;
    let attempts = ctx.cfg.retry.map_conflict_retries;
    if let Some(id) = site.id() {
        remove_key::<S, Secret>(store, &ns, DOMAIN_MAP_NAME, id, attempts).await?;
        remove_key::<S, ConfigMap>(store, &ns, DOMAIN_MAP_NAME, id, attempts).await?;
    }

    let primary = primary_endpoint(store, &ctx.cfg.database).await?;
    let proxy = proxy_admin_endpoint(store, &ns, &ctx.cfg.proxy).await?;
    let db = site_database(site, String::new());
    let result =
        provision::teardown_site(ctx.sql.as_ref(), &primary, proxy.as_ref(), &db).await;
    if let Some(pending) =
        unreachable_as_delay(result, ctx.cfg.retry.unreachable_retry(), "database")?
    {
        return Ok(Some(pending));
    }

    let secret = store
        .get::<Secret>(Some(&ns), &site.password_secret_name())
        .await?;
    if let Some(mut secret) = secret {
        if remove_finalizer(&mut secret.metadata, PASSWORD_FINALIZER) {
            store.replace(&secret).await?;
            info!(secret = %secret.name_any(), "released password secret");
        }
    }
    Ok(None)
}

/// The Site's database password, created on first use. `None` means the
/// password Secret was just written and the pass should end. The Secret
/// carries its own finalizer so it outlives the Site until cleanup has run.
async fn ensure_password<S: ResourceStore>(
    store: &S,
    site: &Site,
    manifests: &SiteManifests<'_>,
) -> Result<Option<String>, ReconcileErr> {
    let ns = namespace_of(site)?;
    let name = site.password_secret_name();
    let Some(mut secret) = store.get::<Secret>(Some(&ns), &name).await? else {
        store
            .create(&manifests.password_secret(generate_password()))
            .await?;
        info!(secret = %name, "created password secret");
        return Ok(None);
    };
    match stored_password(&secret) {
        None => {
            secret.string_data = manifests.password_secret(generate_password()).string_data;
            add_finalizer(&mut secret.metadata, PASSWORD_FINALIZER);
            store.replace(&secret).await?;
            info!(secret = %name, "regenerated missing password");
            Ok(None)
        }
        Some(_)
            if !has_finalizer(&secret.metadata, PASSWORD_FINALIZER)
                && secret.metadata.deletion_timestamp.is_none() =>
        {
            add_finalizer(&mut secret.metadata, PASSWORD_FINALIZER);
            store.replace(&secret).await?;
            Ok(None)
        }
        Some(password) => Ok(Some(password)),
    }
}

async fn provision_database<S: ResourceStore>(
    ctx: &Context<S>,
    ns: &str,
    site: &Site,
    password: String,
) -> Step {
    let delay = ctx.cfg.retry.unreachable_retry();
    let Some(proxy) = proxy_admin_endpoint(&ctx.store, ns, &ctx.cfg.proxy).await?
    else {
        info!(%ns, "proxy admin not available yet");
        return Ok(Some(Requeue::After(delay)));
    };
    let primary = primary_endpoint(&ctx.store, &ctx.cfg.database).await?;
    let db = site_database(site, password);
    let result =
        provision::provision_site(ctx.sql.as_ref(), &primary, &proxy, &db).await;
    unreachable_as_delay(result, delay, "database")
}

/// One pass over a Site: domain map entries, database, crons, pending
/// jobs and the Ingress, in that order.
pub async fn reconcile_site<S: ResourceStore>(
    ctx: &Context<S>,
    site: &Site,
) -> Result<Requeue, ReconcileErr> {
    let store = &ctx.store;
    step!(ensure_identity(store, site));
    match phase(site, SITE_FINALIZER) {
        Phase::Cleared => return Ok(Requeue::Done),
        Phase::Finalizing => {
            return finalize(store, site, SITE_FINALIZER, cleanup_site(ctx, site)).await;
        }
        Phase::Active => step!(ensure_finalizer(store, site, SITE_FINALIZER)),
    }

    let ns = namespace_of(site)?;
    let parent_retry = ctx.cfg.retry.parent_retry();
    let env = match store.get::<Environment>(Some(&ns), &site.spec.environment).await? {
        Some(env) if env.id().is_some() => env,
        _ => {
            info!(environment = %site.spec.environment, "environment not ready; retrying later");
            return Ok(Requeue::After(parent_retry));
        }
    };
    let Some(app) = store.get::<Application>(None, &env.spec.application).await? else {
        info!(application = %env.spec.application, "application not found; retrying later");
        return Ok(Requeue::After(parent_retry));
    };
    step!(ensure_linked(store, &env, site));

    let scope = CustomerScope::new(&app, &env, &ctx.cfg.image_registry)?;
    let manifests = SiteManifests::new(site)?;
    let Some(password) = ensure_password(store, site, &manifests).await? else {
        return Ok(Requeue::Now);
    };

    let id = site.id().unwrap_or_default();
    let attempts = ctx.cfg.retry.map_conflict_retries;
    let routing = set_key::<S, ConfigMap, _>(
        store,
        &ns,
        DOMAIN_MAP_NAME,
        id,
        &site.domain_map(),
        attempts,
    )
    .await?;
    if let Some(requeue) = map_step(routing, parent_retry, "routing") {
        return Ok(requeue);
    }
    let credentials = DbCredentials::via_proxy(
        site.database_name(),
        site.database_user(),
        password.clone(),
    );
    let written =
        set_key::<S, Secret, _>(store, &ns, DOMAIN_MAP_NAME, id, &credentials, attempts)
            .await?;
    if let Some(requeue) = map_step(written, parent_retry, "credentials") {
        return Ok(requeue);
    }

    step!(provision_database(ctx, &ns, site, password));
    step!(cron::reconcile_crons(store, site, &scope, &manifests));
    step!(oneshot::dispatch(store, site, &scope, &manifests));
    step!(apply(store, manifests.ingress(), sync::ingress));

    let crons = cron::observed(store, site).await?;
    step!(write_if_changed(store, site, site_status(site, &crons), status_slot));
    Ok(Requeue::Done)
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_default(), name = %obj.name_any()))]
pub async fn reconcile<S: ResourceStore>(
    obj: Arc<Site>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ReconcileErr> {
    let outcome = reconcile_site(&ctx, &obj).await;
    finish(&ctx, obj.as_ref(), outcome)
}
