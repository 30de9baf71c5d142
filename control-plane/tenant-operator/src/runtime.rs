use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Api, Client, Resource, ResourceExt};
use tokio::{task::JoinHandle, try_join};
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::controller::{Context, application, environment, error_policy, site};
use crate::crd::{Application, Environment, Site};
use crate::external::{MySqlConnector, SqlConnector};
use crate::store::KubeStore;
use crate::web::run_http_server;

type Ctx = Arc<Context<KubeStore>>;

pub fn compute_http_addr(cfg: &OperatorConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

fn log_outcome<K, E>(
    kind: &'static str,
    res: Result<(ObjectRef<K>, controller::Action), E>,
) where
    K: Resource,
    E: std::fmt::Display,
{
    match res {
        Ok((obj, action)) => debug!(%kind, object = %obj.name, ?action, "reconciled"),
        Err(e) => warn!(%kind, error = %e, "controller error"),
    }
}

/// Applications are cluster scoped, so their Environments are mapped back
/// by `spec.application` rather than through owner references.
pub fn spawn_application_controller(
    client: Client,
    ctx: Ctx,
) -> JoinHandle<anyhow::Result<()>> {
    let workers = ctx.cfg.workers.application;
    tokio::spawn(async move {
        Controller::new(Api::<Application>::all(client.clone()), Config::default())
            .watches(
                Api::<Environment>::all(client),
                Config::default(),
                |env| Some(ObjectRef::new(&env.spec.application)),
            )
            .with_config(controller::Config::default().concurrency(workers))
            .shutdown_on_signal()
            .run(
                application::reconcile::<KubeStore>,
                error_policy::<Application, KubeStore>,
                ctx,
            )
            .for_each(|res| async move { log_outcome("Application", res) })
            .await;
        Ok(())
    })
}

pub fn spawn_environment_controller(
    client: Client,
    ctx: Ctx,
) -> JoinHandle<anyhow::Result<()>> {
    let workers = ctx.cfg.workers.environment;
    tokio::spawn(async move {
        Controller::new(Api::<Environment>::all(client.clone()), Config::default())
            .owns(Api::<Deployment>::all(client.clone()), Config::default())
            .owns(Api::<Service>::all(client.clone()), Config::default())
            .owns(Api::<ConfigMap>::all(client.clone()), Config::default())
            .owns(
                Api::<PersistentVolumeClaim>::all(client.clone()),
                Config::default(),
            )
            .owns(
                Api::<HorizontalPodAutoscaler>::all(client.clone()),
                Config::default(),
            )
            .watches(Api::<Site>::all(client), Config::default(), |site| {
                let ns = site.namespace()?;
                Some(ObjectRef::new(&site.spec.environment).within(&ns))
            })
            .with_config(controller::Config::default().concurrency(workers))
            .shutdown_on_signal()
            .run(
                environment::reconcile::<KubeStore>,
                error_policy::<Environment, KubeStore>,
                ctx,
            )
            .for_each(|res| async move { log_outcome("Environment", res) })
            .await;
        Ok(())
    })
}

pub fn spawn_site_controller(
    client: Client,
    ctx: Ctx,
) -> JoinHandle<anyhow::Result<()>> {
    let workers = ctx.cfg.workers.site;
    tokio::spawn(async move {
        Controller::new(Api::<Site>::all(client.clone()), Config::default())
            .owns(Api::<CronJob>::all(client.clone()), Config::default())
            .owns(Api::<Job>::all(client.clone()), Config::default())
            .owns(Api::<Ingress>::all(client.clone()), Config::default())
            .owns(Api::<Secret>::all(client), Config::default())
            .with_config(controller::Config::default().concurrency(workers))
            .shutdown_on_signal()
            .run(
                site::reconcile::<KubeStore>,
                error_policy::<Site, KubeStore>,
                ctx,
            )
            .for_each(|res| async move { log_outcome("Site", res) })
            .await;
        Ok(())
    })
}

pub fn spawn_http(addr: SocketAddr) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr).await })
}

/// Start the three tier controllers and the probe server, and wait until
/// one of them stops.
pub async fn run_all(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let http_addr = compute_http_addr(&cfg);
    let sql: Arc<dyn SqlConnector> = Arc::new(MySqlConnector::new(
        Duration::from_secs(cfg.database.connect_timeout_secs),
    ));
    let ctx = Arc::new(Context::new(KubeStore::new(client.clone()), sql, cfg));
    info!("starting tier controllers");

    let apps = spawn_application_controller(client.clone(), ctx.clone());
    let envs = spawn_environment_controller(client.clone(), ctx.clone());
    let sites = spawn_site_controller(client, ctx);
    let http = spawn_http(http_addr);

    let (a, e, s, h) = try_join!(apps, envs, sites, http)?;
    a?;
    e?;
    s?;
    h?;
    Ok(())
}
