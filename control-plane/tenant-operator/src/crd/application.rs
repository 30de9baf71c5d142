use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A customer codebase. Cluster scoped; Environments reference it by name.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "webhost.io",
    version = "v1alpha1",
    kind = "Application",
    plural = "applications",
    shortname = "app",
    status = "ApplicationStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Environments","type":"integer","jsonPath":".status.numEnvironments"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub git_repo: String,
    /// Image repository holding the built customer code. When unset the
    /// repository is derived from the platform registry and `gitRepo`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repo: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub num_environments: i32,
    #[serde(default)]
    pub environments: Vec<EnvironmentRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRef {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub uid: String,
}
