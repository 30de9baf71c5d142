//! Status is a fold over live children, sorted so that the result does not
//! depend on list order.

use k8s_openapi::api::batch::v1::CronJob;
use kube::ResourceExt;
use tracing::debug;

use super::Step;
use crate::crd::application::EnvironmentRef;
use crate::crd::environment::SiteRef;
use crate::crd::{
    ApplicationStatus, Environment, EnvironmentStatus, Site, SiteStatus, Tenant,
};
use crate::store::{ResourceStore, StoreObject};

pub fn application_status(envs: &[Environment]) -> ApplicationStatus {
    let mut environments: Vec<EnvironmentRef> = envs
        .iter()
        .filter(|e| e.metadata.deletion_timestamp.is_none())
        .map(|e| EnvironmentRef {
            name: e.name_any(),
            namespace: e.namespace().unwrap_or_default(),
            environment_id: e.id().map(str::to_string),
            uid: e.uid().unwrap_or_default(),
        })
        .collect();
    environments.sort();
    ApplicationStatus {
        num_environments: environments.len() as i32,
        environments,
    }
}

pub fn environment_status(sites: &[Site]) -> EnvironmentStatus {
    let mut refs: Vec<SiteRef> = sites
        .iter()
        .filter(|s| s.metadata.deletion_timestamp.is_none())
        .map(|s| SiteRef {
            name: s.name_any(),
            site_id: s.id().map(str::to_string),
        })
        .collect();
    refs.sort();
    EnvironmentStatus {
        num_sites: refs.len() as i32,
        sites: refs,
    }
}

pub fn site_status(site: &Site, crons: &[CronJob]) -> SiteStatus {
    let mut cron_jobs: Vec<String> = crons
        .iter()
        .filter(|c| c.metadata.deletion_timestamp.is_none())
        .map(ResourceExt::name_any)
        .collect();
    cron_jobs.sort();
    SiteStatus {
        database: Some(site.database_name()),
        cron_jobs,
    }
}

/// Write `status` through the status subresource when it differs from what
/// the object already reports. `slot` selects the status field.
pub async fn write_if_changed<S, K, T>(
    store: &S,
    obj: &K,
    status: T,
    slot: fn(&mut K) -> &mut Option<T>,
) -> Step
where
    S: ResourceStore,
    K: StoreObject,
    T: PartialEq,
{
    let mut next = obj.clone();
    let current = slot(&mut next);
    if current.as_ref() == Some(&status) {
        return Ok(None);
    }
    *current = Some(status);
    store.replace_status(&next).await?;
    debug!(kind = %K::kind(&()), name = %obj.name_any(), "status updated");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SITE_ID_LABEL, SiteSpec};
    use std::collections::BTreeMap;

    fn site(name: &str, id: &str) -> Site {
        let mut s = Site::new(name, SiteSpec::default());
        s.metadata.labels =
            Some(BTreeMap::from([(SITE_ID_LABEL.to_string(), id.to_string())]));
        s
    }

    #[test]
    fn environment_status_ignores_list_order() {
        let a = vec![site("b", "2"), site("a", "1"), site("c", "3")];
        let mut b = a.clone();
        b.reverse();
        let sa = environment_status(&a);
        assert_eq!(sa, environment_status(&b));
        assert_eq!(sa.num_sites, 3);
        assert_eq!(sa.sites[0].name, "a");
    }

    #[test]
    fn site_status_sorts_cron_names() {
        let s = site("blog", "1");
        let crons: Vec<CronJob> = ["z", "a"]
            .iter()
            .map(|n| {
                let mut c = CronJob::default();
                c.metadata.name = Some(n.to_string());
                c
            })
            .collect();
        let status = site_status(&s, &crons);
        assert_eq!(status.cron_jobs, vec!["a", "z"]);
        assert_eq!(status.database.as_deref(), Some("blog"));
    }
}
