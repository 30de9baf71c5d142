pub mod application;
pub mod environment;
pub mod site;

use std::collections::BTreeMap;

use crate::store::StoreObject;

pub use application::{Application, ApplicationSpec, ApplicationStatus};
pub use environment::{Environment, EnvironmentSpec, EnvironmentStatus};
pub use site::{Site, SiteSpec, SiteStatus};

pub const GROUP: &str = "webhost.io";

pub const APPLICATION_ID_LABEL: &str = "webhost.io/application-id";
pub const ENVIRONMENT_ID_LABEL: &str = "webhost.io/environment-id";
pub const SITE_ID_LABEL: &str = "webhost.io/site-id";
pub const GIT_REPO_LABEL: &str = "webhost.io/git-repo";
pub const GIT_REF_LABEL: &str = "webhost.io/git-ref";

/// A tier of the tenant hierarchy. Each tier owns one identity label and
/// hands a fixed set of identity labels down to the objects it owns.
pub trait Tenant: StoreObject {
    const ID_LABEL: &'static str;
    const CHILD_LABELS: &'static [&'static str];

    fn id(&self) -> Option<&str> {
        self.meta()
            .labels
            .as_ref()?
            .get(Self::ID_LABEL)
            .map(String::as_str)
    }

    /// Identity labels for owned children. Labels not yet assigned are
    /// left out.
    fn child_labels(&self) -> BTreeMap<String, String> {
        let labels = self.meta().labels.as_ref();
        Self::CHILD_LABELS
            .iter()
            .filter_map(|key| {
                labels?.get(*key).map(|v| (key.to_string(), v.clone()))
            })
            .collect()
    }
}

impl Tenant for Application {
    const ID_LABEL: &'static str = APPLICATION_ID_LABEL;
    const CHILD_LABELS: &'static [&'static str] = &[APPLICATION_ID_LABEL];
}

impl Tenant for Environment {
    const ID_LABEL: &'static str = ENVIRONMENT_ID_LABEL;
    const CHILD_LABELS: &'static [&'static str] =
        &[APPLICATION_ID_LABEL, ENVIRONMENT_ID_LABEL];
}

impl Tenant for Site {
    const ID_LABEL: &'static str = SITE_ID_LABEL;
    const CHILD_LABELS: &'static [&'static str] =
        &[APPLICATION_ID_LABEL, ENVIRONMENT_ID_LABEL, SITE_ID_LABEL];
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    #[test]
    fn child_labels_skip_unassigned_ids() {
        let mut site = Site::new("blog", SiteSpec::default());
        site.metadata = ObjectMeta {
            labels: Some(BTreeMap::from([
                (APPLICATION_ID_LABEL.to_string(), "app-1".to_string()),
                (SITE_ID_LABEL.to_string(), "site-1".to_string()),
                ("unrelated".to_string(), "x".to_string()),
            ])),
            ..site.metadata
        };
        assert_eq!(site.id(), Some("site-1"));
        let labels = site.child_labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[APPLICATION_ID_LABEL], "app-1");
        assert!(!labels.contains_key(ENVIRONMENT_ID_LABEL));
    }
}
