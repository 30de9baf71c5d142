//! Desired state of every child object, built from the parent resources.
//! Builders are pure; the reconcilers decide when to create or sync.

pub mod customer;
pub mod environment;
pub mod site;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::crd::environment::Resources;

pub use customer::CustomerScope;
pub use environment::EnvironmentManifests;
pub use site::SiteManifests;

pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Node pool every tenant workload is scheduled onto.
pub fn worker_node_selector() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from([("function".to_string(), "workers".to_string())]))
}

pub fn pull_policy(policy: &str) -> Option<String> {
    if policy.is_empty() {
        Some(DEFAULT_PULL_POLICY.to_string())
    } else {
        Some(policy.to_string())
    }
}

pub(crate) fn meta(
    name: &str,
    ns: Option<&str>,
    labels: BTreeMap<String, String>,
    owner: Option<&OwnerReference>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: ns.map(str::to_string),
        labels: Some(labels),
        owner_references: owner.map(|o| vec![o.clone()]),
        ..Default::default()
    }
}

pub(crate) fn with_label(
    mut labels: BTreeMap<String, String>,
    key: &str,
    value: &str,
) -> BTreeMap<String, String> {
    labels.insert(key.to_string(), value.to_string());
    labels
}

pub(crate) fn quantities(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, Quantity>> {
    let map: BTreeMap<String, Quantity> = pairs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect();
    (!map.is_empty()).then_some(map)
}

/// Requests and limits from the CPU and memory pairs of a resource spec.
pub(crate) fn requirements(cpu: &Resources, memory: &Resources) -> ResourceRequirements {
    ResourceRequirements {
        requests: quantities(&[
            ("cpu", cpu.request.as_str()),
            ("memory", memory.request.as_str()),
        ]),
        limits: quantities(&[
            ("cpu", cpu.limit.as_str()),
            ("memory", memory.limit.as_str()),
        ]),
        ..Default::default()
    }
}

pub(crate) fn fixed_requirements(
    cpu: (&str, &str),
    memory: (&str, &str),
) -> ResourceRequirements {
    ResourceRequirements {
        requests: quantities(&[("cpu", cpu.0), ("memory", memory.0)]),
        limits: quantities(&[("cpu", cpu.1), ("memory", memory.1)]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_quantities_are_left_out() {
        let cpu = Resources {
            request: "100m".into(),
            limit: String::new(),
        };
        let reqs = requirements(&cpu, &Resources::default());
        assert_eq!(reqs.requests.unwrap().len(), 1);
        assert!(reqs.limits.is_none());
    }

    #[test]
    fn pull_policy_defaults_like_the_api_server() {
        assert_eq!(pull_policy("").as_deref(), Some("IfNotPresent"));
        assert_eq!(pull_policy("Always").as_deref(), Some("Always"));
    }
}
