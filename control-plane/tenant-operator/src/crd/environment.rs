use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One deployed instance (prod, stage, dev...) of an Application. Owns the
/// web tier, the SQL proxy and the two shared domain maps of its namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "webhost.io",
    version = "v1alpha1",
    kind = "Environment",
    plural = "environments",
    shortname = "env",
    namespaced,
    status = "EnvironmentStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Application","type":"string","jsonPath":".spec.application"}"#,
    printcolumn = r#"{"name":"Sites","type":"integer","jsonPath":".status.numSites"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// Name of the owning Application.
    pub application: String,
    #[serde(default)]
    pub production: bool,
    /// Shared filesystem id backing the files volume.
    #[serde(default)]
    pub efsid: String,
    pub git_ref: String,
    pub drupal: DrupalSpec,
    pub apache: ApacheSpec,
    pub phpfpm: PhpFpmSpec,
    #[serde(rename = "proxySQL")]
    pub proxy_sql: ProxySqlSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DrupalSpec {
    pub tag: String,
    #[serde(default)]
    pub pull_policy: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
    #[serde(
        rename = "targetCPUUtilizationPercentage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_cpu_utilization_percentage: Option<i32>,
    #[serde(default)]
    pub liveness_probe: HttpProbe,
    #[serde(default)]
    pub readiness_probe: HttpProbe,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApacheSpec {
    pub tag: String,
    #[serde(default)]
    pub web_root: String,
    pub cpu: Resources,
    pub memory: Resources,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhpFpmSpec {
    pub tag: String,
    pub procs: i32,
    #[serde(rename = "procMemoryLimitMiB")]
    pub proc_memory_limit_mib: i32,
    #[serde(rename = "opcacheMemoryLimitMiB")]
    pub opcache_memory_limit_mib: i32,
    #[serde(rename = "apcMemoryLimitMiB")]
    pub apc_memory_limit_mib: i32,
    pub cpu: Resources,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxySqlSpec {
    pub replicas: i32,
    pub cpu: Resources,
    pub memory: Resources,
    pub tag: String,
}

/// Request and limit for one resource, as Kubernetes quantity strings.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Resources {
    pub request: String,
    pub limit: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpProbe {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "httpPath", default)]
    pub http_path: String,
    #[serde(default)]
    pub timeout_seconds: i32,
    #[serde(default)]
    pub failure_threshold: i32,
    #[serde(default)]
    pub success_threshold: i32,
    #[serde(default)]
    pub period_seconds: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    #[serde(default)]
    pub num_sites: i32,
    #[serde(default)]
    pub sites: Vec<SiteRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}
