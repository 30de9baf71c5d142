use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INGRESS_CLASS: &str = "nginx";
pub const DEFAULT_CERT_ISSUER: &str = "letsencrypt-staging";

/// A hosted website inside an Environment: its domains, database, crons
/// and administrative jobs.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "webhost.io",
    version = "v1alpha1",
    kind = "Site",
    plural = "sites",
    namespaced,
    status = "SiteStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Environment","type":"string","jsonPath":".spec.environment"}"#,
    printcolumn = r#"{"name":"Database","type":"string","jsonPath":".status.database"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SiteSpec {
    #[serde(default)]
    pub domains: Vec<String>,
    /// Name of the owning Environment, in the Site's namespace.
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallSpec>,
    #[serde(default)]
    pub crons: Vec<CronSpec>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_issuer: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstallSpec {
    pub install_profile: String,
    pub admin_username: String,
    pub admin_email: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CronSpec {
    pub name: String,
    pub command: Vec<String>,
    pub schedule: String,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_policy: Option<ConcurrencyPolicy>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConcurrencyPolicy {
    Allow,
    #[default]
    Forbid,
    Replace,
}

impl ConcurrencyPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConcurrencyPolicy::Allow => "Allow",
            ConcurrencyPolicy::Forbid => "Forbid",
            ConcurrencyPolicy::Replace => "Replace",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub cron_jobs: Vec<String>,
}

/// Strip characters that are not safe inside a quoted SQL identifier.
fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '\'' | '"' | '.'))
        .collect()
}

impl Site {
    pub fn database_name(&self) -> String {
        sanitize(&self.name_any())
    }

    pub fn database_user(&self) -> String {
        sanitize(&self.name_any())
    }

    /// Routing entry for this site: every domain points at its database.
    pub fn domain_map(&self) -> BTreeMap<String, String> {
        let db = self.database_name();
        self.spec
            .domains
            .iter()
            .map(|d| (d.clone(), db.clone()))
            .collect()
    }

    pub fn ingress_class(&self) -> &str {
        self.spec
            .ingress_class
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_INGRESS_CLASS)
    }

    pub fn cert_issuer(&self) -> &str {
        self.spec
            .cert_issuer
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CERT_ISSUER)
    }

    pub fn password_secret_name(&self) -> String {
        format!("{}-password", self.name_any())
    }

    pub fn tls_secret_name(&self) -> String {
        format!("{}-tls-secret", self.name_any())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_identifiers_drop_unsafe_characters() {
        let site = Site::new("my-blog.v2", SiteSpec::default());
        assert_eq!(site.database_name(), "myblogv2");
        assert_eq!(site.database_user(), "myblogv2");
    }

    #[test]
    fn domain_map_points_every_domain_at_the_database() {
        let site = Site::new(
            "shop",
            SiteSpec {
                domains: vec!["a.example.com".into(), "b.example.com".into()],
                ..Default::default()
            },
        );
        let map = site.domain_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a.example.com"], "shop");
    }

    #[test]
    fn ingress_defaults_apply_to_unset_or_empty_values() {
        let mut site = Site::new("shop", SiteSpec::default());
        assert_eq!(site.ingress_class(), DEFAULT_INGRESS_CLASS);
        site.spec.ingress_class = Some(String::new());
        assert_eq!(site.ingress_class(), DEFAULT_INGRESS_CLASS);
        site.spec.cert_issuer = Some("letsencrypt-prod".into());
        assert_eq!(site.cert_issuer(), "letsencrypt-prod");
    }
}
