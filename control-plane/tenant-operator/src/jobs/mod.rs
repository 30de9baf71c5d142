//! Scheduled and one-shot workloads run on behalf of a Site.

pub mod cron;
pub mod oneshot;

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::controller::ReconcileErr;
use crate::crd::Site;

pub const JOB_TYPE_LABEL: &str = "type";

/// Administrative job kinds a Site can request through an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Runs customer code with the customer's privileges.
    Customer,
    /// Runs as root; reserved for trusted internal workflows.
    Root,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Customer, JobKind::Root];

    pub fn annotation(self) -> &'static str {
        match self {
            JobKind::Customer => "webhost.io/runJob",
            JobKind::Root => "webhost.io/runRootJob",
        }
    }

    pub fn name_prefix(self) -> &'static str {
        match self {
            JobKind::Customer => "customer-job",
            JobKind::Root => "root-job",
        }
    }
}

/// First job request found on the Site, in [`JobKind::ALL`] order.
pub fn pending_request(site: &Site) -> Option<(JobKind, String)> {
    let annotations = site.metadata.annotations.as_ref()?;
    JobKind::ALL
        .into_iter()
        .find_map(|kind| annotations.get(kind.annotation()).map(|v| (kind, v.clone())))
}

/// Parse an argument vector given as a YAML (or JSON) sequence of strings.
pub fn parse_command(raw: &str) -> Result<Vec<String>, ReconcileErr> {
    let command: Vec<String> = serde_yaml::from_str(raw)
        .map_err(|e| ReconcileErr::Command(format!("'{raw}': {e}")))?;
    if command.first().is_none_or(|c| c.is_empty()) {
        return Err(ReconcileErr::Command(format!("'{raw}': empty command")));
    }
    Ok(command)
}

/// Same Site and command, same name: a second dispatch of an identical
/// request collides with the first instead of creating a duplicate. Sites
/// sharing a namespace never collide with each other.
pub fn job_name(kind: JobKind, site_id: &str, command: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(command.join(" ").as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("{}-{}", kind.name_prefix(), &hex[..10])
}

pub(crate) fn labels_with_type(
    mut labels: BTreeMap<String, String>,
    job_type: &str,
) -> BTreeMap<String, String> {
    labels.insert(JOB_TYPE_LABEL.to_string(), job_type.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SiteSpec;

    #[test]
    fn accepts_yaml_and_json_argument_vectors() {
        assert_eq!(
            parse_command("[drush, cr]").unwrap(),
            vec!["drush".to_string(), "cr".to_string()]
        );
        assert_eq!(
            parse_command(r#"["drush", "updb", "-y"]"#).unwrap().len(),
            3
        );
        assert_eq!(parse_command("- drush\n- cr\n").unwrap()[1], "cr");
    }

    #[test]
    fn rejects_malformed_or_empty_commands() {
        assert!(matches!(parse_command("{not: a list}"), Err(ReconcileErr::Command(_))));
        assert!(matches!(parse_command("[]"), Err(ReconcileErr::Command(_))));
    }

    #[test]
    fn job_names_are_stable_per_site_and_command() {
        let cmd = vec!["drush".to_string(), "cr".to_string()];
        let name = job_name(JobKind::Customer, "site-1", &cmd);
        assert!(name.starts_with("customer-job-"));
        assert_eq!(name.len(), "customer-job-".len() + 10);
        assert_eq!(name, job_name(JobKind::Customer, "site-1", &cmd));
        assert_ne!(name, job_name(JobKind::Customer, "site-1", &["drush".to_string()]));
        assert_ne!(name, job_name(JobKind::Customer, "site-2", &cmd));
        assert!(job_name(JobKind::Root, "site-1", &cmd).starts_with("root-job-"));
    }

    #[test]
    fn customer_requests_are_served_before_root_requests() {
        let mut site = Site::new("blog", SiteSpec::default());
        assert!(pending_request(&site).is_none());
        site.metadata.annotations = Some(BTreeMap::from([
            (JobKind::Root.annotation().to_string(), "[id]".to_string()),
            (JobKind::Customer.annotation().to_string(), "[ls]".to_string()),
        ]));
        let (kind, raw) = pending_request(&site).unwrap();
        assert_eq!(kind, JobKind::Customer);
        assert_eq!(raw, "[ls]");
    }
}
