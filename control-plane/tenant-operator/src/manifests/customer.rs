use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::JobSpec;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{fixed_requirements, pull_policy, worker_node_selector};
use crate::controller::ReconcileErr;
use crate::controller::shared_map::DOMAIN_MAP_NAME;
use crate::crd::{Application, Environment, Tenant};

pub const SHARED_FILES_VOLUME: &str = "shared-files";
pub const PHP_CONFIG_NAME: &str = "php-config";
pub const ENV_CONFIG_VOLUME: &str = "env-config";

const CUSTOMER_JOB_DEADLINE_SECS: i64 = 3600;
const TERMINATION_GRACE_SECS: i64 = 30;

/// Everything needed to run customer code for one Environment: the image
/// built from the Application and the volumes of the Environment.
#[derive(Clone, Debug)]
pub struct CustomerScope<'a> {
    pub app: &'a Application,
    pub env: &'a Environment,
    pub registry: &'a str,
    env_id: String,
}

impl<'a> CustomerScope<'a> {
    pub fn new(
        app: &'a Application,
        env: &'a Environment,
        registry: &'a str,
    ) -> Result<Self, ReconcileErr> {
        let env_id = env
            .id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReconcileErr::Internal("environment has no identity".into()))?
            .to_string();
        Ok(Self {
            app,
            env,
            registry,
            env_id,
        })
    }

    pub fn env_id(&self) -> &str {
        &self.env_id
    }

    /// `<envid>-files`, shared by the files PV and PVC.
    pub fn files_claim_name(&self) -> String {
        files_volume_name(&self.env_id)
    }

    pub fn image(&self) -> String {
        let tag = &self.env.spec.drupal.tag;
        match self.app.spec.image_repo.as_deref().filter(|r| !r.is_empty()) {
            Some(repo) => format!("{repo}:{tag}"),
            None => format!(
                "{}/customer/{}:{tag}",
                self.registry.trim_end_matches('/'),
                self.app.spec.git_repo
            ),
        }
    }

    pub fn pull_policy(&self) -> Option<String> {
        pull_policy(&self.env.spec.drupal.pull_policy)
    }

    pub fn files_volume(&self) -> Volume {
        Volume {
            name: SHARED_FILES_VOLUME.into(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: self.files_claim_name(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn files_mount(&self) -> VolumeMount {
        VolumeMount {
            name: SHARED_FILES_VOLUME.into(),
            mount_path: "/var/www/html/docroot/sites/default/files".into(),
            sub_path: Some(format!("{}-drupal-files", self.env_id)),
            ..Default::default()
        }
    }

    pub fn shared_mount(&self) -> VolumeMount {
        VolumeMount {
            name: SHARED_FILES_VOLUME.into(),
            mount_path: "/shared".into(),
            sub_path: Some(format!("{}-shared", self.env_id)),
            ..Default::default()
        }
    }

    /// Base container running customer code with the shared files, PHP
    /// configuration and the namespace's domain map mounted.
    pub fn container(&self) -> Container {
        Container {
            image: Some(self.image()),
            image_pull_policy: self.pull_policy(),
            resources: Some(fixed_requirements(("200m", "500m"), ("375Mi", "512Mi"))),
            volume_mounts: Some(vec![
                self.files_mount(),
                self.shared_mount(),
                VolumeMount {
                    name: PHP_CONFIG_NAME.into(),
                    mount_path: "/usr/local/etc/php/conf.d/".into(),
                    read_only: Some(true),
                    ..Default::default()
                },
                VolumeMount {
                    name: ENV_CONFIG_VOLUME.into(),
                    mount_path: "/env-config/".into(),
                    read_only: Some(true),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }
    }

    /// Job template shared by crons and one-shot jobs.
    pub fn job_spec(&self, command: Vec<String>, labels: BTreeMap<String, String>) -> JobSpec {
        let container = Container {
            name: "main".into(),
            command: Some(command),
            ..self.container()
        };
        JobSpec {
            completions: Some(1),
            active_deadline_seconds: Some(CUSTOMER_JOB_DEADLINE_SECS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".into()),
                    containers: vec![container],
                    node_selector: worker_node_selector(),
                    volumes: Some(vec![
                        php_config_volume(),
                        domain_map_volume(),
                        self.files_volume(),
                    ]),
                    termination_grace_period_seconds: Some(TERMINATION_GRACE_SECS),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }
    }
}

/// Name of an Environment's files PV and PVC.
pub fn files_volume_name(env_id: &str) -> String {
    format!("{env_id}-files")
}

pub fn php_config_volume() -> Volume {
    Volume {
        name: PHP_CONFIG_NAME.into(),
        config_map: Some(ConfigMapVolumeSource {
            name: PHP_CONFIG_NAME.into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The credentials aggregate, mounted read-only into customer pods.
pub fn domain_map_volume() -> Volume {
    Volume {
        name: ENV_CONFIG_VOLUME.into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(DOMAIN_MAP_NAME.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
