use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::info;

use super::labels_with_type;
use crate::controller::converge::apply;
use crate::controller::{ReconcileErr, Requeue, Step, sync};
use crate::crd::site::CronSpec;
use crate::crd::{SITE_ID_LABEL, Site, Tenant};
use crate::manifests::{CustomerScope, SiteManifests};
use crate::store::{ResourceStore, label_selector};

const FAILED_HISTORY: i32 = 1;
const SUCCESSFUL_HISTORY: i32 = 3;
const STARTING_DEADLINE_SECS: i64 = 900;

/// CronJobs share the Environment's namespace, so the Site name scopes them.
pub fn cron_job_name(site: &str, cron: &str) -> String {
    format!("{site}-{cron}")
}

pub fn build_cron_job(
    cron: &CronSpec,
    scope: &CustomerScope<'_>,
    site: &SiteManifests<'_>,
) -> CronJob {
    let labels = labels_with_type(site.labels().clone(), "cron");
    CronJob {
        metadata: site.owned(
            &cron_job_name(&site.site().name_any(), &cron.name),
            labels.clone(),
        ),
        spec: Some(CronJobSpec {
            schedule: cron.schedule.clone(),
            suspend: Some(cron.suspend),
            concurrency_policy: Some(
                cron.concurrency_policy.unwrap_or_default().as_str().to_string(),
            ),
            starting_deadline_seconds: Some(STARTING_DEADLINE_SECS),
            failed_jobs_history_limit: Some(FAILED_HISTORY),
            successful_jobs_history_limit: Some(SUCCESSFUL_HISTORY),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(scope.job_spec(cron.command.clone(), site.labels().clone())),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Observed crons that are no longer declared on the Site.
pub fn unwanted<'c>(
    site: &str,
    declared: &[CronSpec],
    observed: &'c [CronJob],
) -> Vec<&'c CronJob> {
    let wanted: BTreeSet<String> =
        declared.iter().map(|c| cron_job_name(site, &c.name)).collect();
    observed
        .iter()
        .filter(|c| c.metadata.deletion_timestamp.is_none())
        .filter(|c| !wanted.contains(&c.name_any()))
        .collect()
}

/// CronJobs carrying this Site's identity.
pub async fn observed<S: ResourceStore>(
    store: &S,
    site: &Site,
) -> Result<Vec<CronJob>, ReconcileErr> {
    let id = site.id().unwrap_or_default().to_string();
    let selector = label_selector(&BTreeMap::from([(SITE_ID_LABEL.to_string(), id)]));
    Ok(store.list(site.namespace().as_deref(), &selector).await?)
}

/// Delete every cron the Site no longer declares, then converge the
/// declared ones.
pub async fn reconcile_crons<S: ResourceStore>(
    store: &S,
    site: &Site,
    scope: &CustomerScope<'_>,
    manifests: &SiteManifests<'_>,
) -> Step {
    let ns = site.namespace();
    let existing = observed(store, site).await?;
    let stale = unwanted(&site.name_any(), &site.spec.crons, &existing);
    for cron in &stale {
        store.delete::<CronJob>(ns.as_deref(), &cron.name_any()).await?;
        info!(site = %site.name_any(), cron = %cron.name_any(), "deleted unwanted cron");
    }
    if !stale.is_empty() {
        return Ok(Some(Requeue::Now));
    }

    for cron in &site.spec.crons {
        let desired = build_cron_job(cron, scope, manifests);
        if let Some(requeue) = apply(store, desired, sync::cron_job).await? {
            return Ok(Some(requeue));
        }
    }
    Ok(None)
}
