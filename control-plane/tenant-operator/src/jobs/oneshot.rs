use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PodSecurityContext;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::{JobKind, job_name, labels_with_type, parse_command, pending_request};
use crate::controller::{Requeue, Step};
use crate::crd::{Site, Tenant};
use crate::manifests::{CustomerScope, SiteManifests};
use crate::store::{ResourceStore, StoreError};

const FINISHED_TTL_SECS: i32 = 10;
const ROOT_JOB_DEADLINE_SECS: i64 = 86_400;
const ROOT_JOB_BACKOFF_LIMIT: i32 = 20;

pub fn build_job(
    kind: JobKind,
    command: Vec<String>,
    scope: &CustomerScope<'_>,
    site: &SiteManifests<'_>,
) -> Job {
    let labels = labels_with_type(site.labels().clone(), "on-demand");
    let name = job_name(kind, site.site().id().unwrap_or_default(), &command);
    let mut metadata = site.owned(&name, labels.clone());
    metadata.annotations = Some(BTreeMap::from([(
        "executable".to_string(),
        command.first().cloned().unwrap_or_default(),
    )]));

    let mut spec = scope.job_spec(command, site.labels().clone());
    spec.ttl_seconds_after_finished = Some(FINISHED_TTL_SECS);
    if kind == JobKind::Root {
        spec.active_deadline_seconds = Some(ROOT_JOB_DEADLINE_SECS);
        spec.backoff_limit = Some(ROOT_JOB_BACKOFF_LIMIT);
        if let Some(pod) = spec.template.spec.as_mut() {
            pod.security_context = Some(PodSecurityContext {
                run_as_user: Some(0),
                ..Default::default()
            });
        }
    }
    Job {
        metadata,
        spec: Some(spec),
        ..Default::default()
    }
}

/// Turn the first pending job annotation into a Job, then clear the
/// annotation. A Job that already exists under the same name counts as
/// dispatched.
#[instrument(skip_all, fields(site = %site.name_any()))]
pub async fn dispatch<S: ResourceStore>(
    store: &S,
    site: &Site,
    scope: &CustomerScope<'_>,
    manifests: &SiteManifests<'_>,
) -> Step {
    let Some((kind, raw)) = pending_request(site) else {
        return Ok(None);
    };
    let command = parse_command(&raw)?;
    let job = build_job(kind, command, scope, manifests);
    let name = job.name_any();
    match store.create(&job).await {
        Ok(_) => info!(%name, ?kind, "dispatched job"),
        Err(StoreError::AlreadyExists(_)) => {
            debug!(%name, "job already dispatched")
        }
        Err(e) => return Err(e.into()),
    }

    let mut next = site.clone();
    if let Some(annotations) = next.metadata.annotations.as_mut() {
        annotations.remove(kind.annotation());
    }
    store.replace(&next).await?;
    Ok(Some(Requeue::Now))
}
