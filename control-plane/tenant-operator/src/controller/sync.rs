//! Per-kind allow-lists for selective sync.
//!
//! Each function copies only the fields this operator owns from the desired
//! object onto the observed one. Anything else on the observed object
//! (replicas owned by an autoscaler, defaults filled in by the API server,
//! fields other controllers manage) is left as found.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PersistentVolume, ResourceRequirements, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Created once, never updated (PVCs, the web Service, seeded maps).
pub fn create_only<K>(_existing: &mut K, _desired: &K) {}

pub fn config_map_data(existing: &mut ConfigMap, desired: &ConfigMap) {
    existing.data = desired.data.clone();
}

/// Statically provisioned files volume: only the backing filesystem id.
pub fn files_volume(existing: &mut PersistentVolume, desired: &PersistentVolume) {
    let handle = desired
        .spec
        .as_ref()
        .and_then(|s| s.csi.as_ref())
        .map(|c| c.volume_handle.clone());
    if let (Some(csi), Some(handle)) = (
        existing.spec.as_mut().and_then(|s| s.csi.as_mut()),
        handle,
    ) {
        csi.volume_handle = handle;
    }
}

/// Web tier: rollout strategy plus image, pull policy, resources and
/// probes per container, matched by name. Replicas belong to the HPA.
pub fn web_deployment(existing: &mut Deployment, desired: &Deployment) {
    let (Some(spec), Some(want)) = (existing.spec.as_mut(), desired.spec.as_ref())
    else {
        return;
    };
    spec.strategy = want.strategy.clone();
    let (Some(pod), Some(want_pod)) =
        (spec.template.spec.as_mut(), want.template.spec.as_ref())
    else {
        return;
    };
    sync_named(&mut pod.containers, &want_pod.containers, true);
    if let (Some(init), Some(want_init)) = (
        pod.init_containers.as_mut(),
        want_pod.init_containers.as_ref(),
    ) {
        sync_named(init, want_init, false);
    }
}

/// SQL proxy: replicas, pod volumes, and the first container's image,
/// resources and mounts.
pub fn proxy_deployment(existing: &mut Deployment, desired: &Deployment) {
    let (Some(spec), Some(want)) = (existing.spec.as_mut(), desired.spec.as_ref())
    else {
        return;
    };
    spec.replicas = want.replicas;
    let (Some(pod), Some(want_pod)) =
        (spec.template.spec.as_mut(), want.template.spec.as_ref())
    else {
        return;
    };
    pod.volumes = want_pod.volumes.clone();
    if let (Some(c), Some(d)) =
        (pod.containers.first_mut(), want_pod.containers.first())
    {
        c.image = d.image.clone();
        sync_resources(&mut c.resources, &d.resources);
        c.volume_mounts = d.volume_mounts.clone();
    }
}

pub fn proxy_service(existing: &mut Service, desired: &Service) {
    let (Some(spec), Some(want)) = (existing.spec.as_mut(), desired.spec.as_ref())
    else {
        return;
    };
    spec.ports = want.ports.clone();
    spec.selector = want.selector.clone();
}

pub fn autoscaler(
    existing: &mut HorizontalPodAutoscaler,
    desired: &HorizontalPodAutoscaler,
) {
    let (Some(spec), Some(want)) = (existing.spec.as_mut(), desired.spec.as_ref())
    else {
        existing.spec = desired.spec.clone();
        return;
    };
    spec.scale_target_ref = want.scale_target_ref.clone();
    spec.min_replicas = want.min_replicas;
    spec.max_replicas = want.max_replicas;
    spec.metrics = want.metrics.clone();
}

/// Rules, TLS and the annotations this operator manages. Foreign
/// annotations stay.
pub fn ingress(existing: &mut Ingress, desired: &Ingress) {
    merge_map(&mut existing.metadata.annotations, &desired.metadata.annotations);
    let want = desired.spec.clone().unwrap_or_default();
    let spec = existing.spec.get_or_insert_with(Default::default);
    spec.rules = want.rules;
    spec.tls = want.tls;
}

/// Labels, schedule, suspension, concurrency policy, starting deadline
/// and the job container's command.
pub fn cron_job(existing: &mut CronJob, desired: &CronJob) {
    merge_map(&mut existing.metadata.labels, &desired.metadata.labels);
    let (Some(spec), Some(want)) = (existing.spec.as_mut(), desired.spec.as_ref())
    else {
        return;
    };
    spec.schedule = want.schedule.clone();
    spec.suspend = want.suspend;
    spec.concurrency_policy = want.concurrency_policy.clone();
    spec.starting_deadline_seconds = want.starting_deadline_seconds;

    let command = want
        .job_template
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.command.clone());
    if let Some(container) = spec
        .job_template
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|p| p.containers.first_mut())
    {
        container.command = command;
    }
}

fn merge_map(
    existing: &mut Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) {
    let Some(desired) = desired else {
        return;
    };
    let target = existing.get_or_insert_with(BTreeMap::new);
    for (k, v) in desired {
        if target.get(k) != Some(v) {
            target.insert(k.clone(), v.clone());
        }
    }
}

fn sync_named(existing: &mut [Container], desired: &[Container], probes: bool) {
    for c in existing.iter_mut() {
        let Some(d) = desired.iter().find(|d| d.name == c.name) else {
            continue;
        };
        c.image = d.image.clone();
        c.image_pull_policy = d.image_pull_policy.clone();
        sync_resources(&mut c.resources, &d.resources);
        if probes {
            c.liveness_probe = d.liveness_probe.clone();
            c.readiness_probe = d.readiness_probe.clone();
        }
    }
}

/// Overwrite requests and limits only when they differ in value; `500m`
/// and `0.5` are the same CPU and must not cause a write.
fn sync_resources(
    existing: &mut Option<ResourceRequirements>,
    desired: &Option<ResourceRequirements>,
) {
    let empty = ResourceRequirements::default();
    let have = existing.as_ref().unwrap_or(&empty);
    let want = desired.as_ref().unwrap_or(&empty);
    let limits_same = same_quantities(have.limits.as_ref(), want.limits.as_ref());
    let requests_same =
        same_quantities(have.requests.as_ref(), want.requests.as_ref());
    if limits_same && requests_same {
        return;
    }
    let mut next = existing.clone().unwrap_or_default();
    if !limits_same {
        next.limits = want.limits.clone();
    }
    if !requests_same {
        next.requests = want.requests.clone();
    }
    *existing = Some(next);
}

fn same_quantities(
    a: Option<&BTreeMap<String, Quantity>>,
    b: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let (a, b) = (a.unwrap_or(&empty), b.unwrap_or(&empty));
    a.len() == b.len()
        && a.iter()
            .all(|(k, q)| b.get(k).is_some_and(|other| quantity_eq(q, other)))
}

fn quantity_eq(a: &Quantity, b: &Quantity) -> bool {
    if a.0 == b.0 {
        return true;
    }
    match (parse_quantity(&a.0), parse_quantity(&b.0)) {
        (Some(x), Some(y)) => (x - y).abs() <= 1e-9 * x.abs().max(y.abs()).max(1.0),
        _ => false,
    }
}

const QUANTITY_SUFFIXES: [(&str, f64); 15] = [
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Numeric value of a Kubernetes quantity string, or `None` if it does not
/// parse.
pub fn parse_quantity(s: &str) -> Option<f64> {
    let s = s.trim();
    for (suffix, factor) in QUANTITY_SUFFIXES {
        if let Some(num) = s.strip_suffix(suffix) {
            return num.parse::<f64>().ok().map(|n| n * factor);
        }
    }
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};

    fn container(name: &str, image: &str) -> Container {
        Container {
            name: name.into(),
            image: Some(image.into()),
            ..Default::default()
        }
    }

    fn deployment(replicas: i32, containers: Vec<Container>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn requirements(cpu: &str) -> Option<ResourceRequirements> {
        Some(ResourceRequirements {
            requests: Some(BTreeMap::from([(
                "cpu".to_string(),
                Quantity(cpu.into()),
            )])),
            ..Default::default()
        })
    }

    #[test]
    fn web_sync_leaves_autoscaled_replicas_alone() {
        let mut observed = deployment(5, vec![container("apache", "apache:1")]);
        let desired = deployment(2, vec![container("apache", "apache:2")]);
        web_deployment(&mut observed, &desired);
        let spec = observed.spec.unwrap();
        assert_eq!(spec.replicas, Some(5));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("apache:2"));
    }

    #[test]
    fn containers_match_by_name_not_position() {
        let mut observed = deployment(
            1,
            vec![container("php-fpm", "php:1"), container("apache", "apache:1")],
        );
        let desired = deployment(
            1,
            vec![container("apache", "apache:2"), container("php-fpm", "php:2")],
        );
        web_deployment(&mut observed, &desired);
        let pod = observed.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].name, "php-fpm");
        assert_eq!(pod.containers[0].image.as_deref(), Some("php:2"));
        assert_eq!(pod.containers[1].image.as_deref(), Some("apache:2"));
    }

    #[test]
    fn proxy_sync_owns_replicas() {
        let mut observed = deployment(5, vec![container("proxysql", "p:1")]);
        let desired = deployment(2, vec![container("proxysql", "p:2")]);
        proxy_deployment(&mut observed, &desired);
        assert_eq!(observed.spec.unwrap().replicas, Some(2));
    }

    #[test]
    fn equal_quantities_in_other_notation_are_not_rewritten() {
        let mut have = requirements("500m");
        sync_resources(&mut have, &requirements("0.5"));
        assert_eq!(have, requirements("500m"));
        sync_resources(&mut have, &requirements("1"));
        assert_eq!(have, requirements("1"));
    }

    #[test]
    fn parses_binary_and_decimal_suffixes() {
        assert_eq!(parse_quantity("128Mi"), Some(134_217_728.0));
        assert_eq!(parse_quantity("250m"), Some(0.25));
        assert_eq!(parse_quantity("2"), Some(2.0));
        assert_eq!(parse_quantity("1G"), Some(1e9));
        assert_eq!(parse_quantity("lots"), None);
    }

    #[test]
    fn ingress_sync_keeps_foreign_annotations() {
        let mut observed = Ingress::default();
        observed.metadata.annotations =
            Some(BTreeMap::from([("other".to_string(), "x".to_string())]));
        let mut desired = Ingress::default();
        desired.metadata.annotations =
            Some(BTreeMap::from([("managed".to_string(), "y".to_string())]));
        ingress(&mut observed, &desired);
        let annotations = observed.metadata.annotations.unwrap();
        assert_eq!(annotations.len(), 2);
    }
}
