use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, ConfigMap, ConfigMapVolumeSource, Container,
    ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction,
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Secret, SecurityContext,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::customer::{CustomerScope, domain_map_volume, php_config_volume};
use super::{
    fixed_requirements, meta, pull_policy, quantities, requirements, with_label,
    worker_node_selector,
};
use crate::config::{OperatorConfig, ProxyAdminConfig};
use crate::controller::ReconcileErr;
use crate::controller::owner::owner_reference;
use crate::controller::shared_map::DOMAIN_MAP_NAME;
use crate::crd::environment::HttpProbe;
use crate::crd::{Application, Environment, Tenant};
use crate::external::endpoints::PROXY_SERVICE_NAME;

pub const WEB_NAME: &str = "drupal";
pub const PHPFPM_CONFIG_NAME: &str = "phpfpm-config";
pub const PROXY_CONFIG_NAME: &str = "proxysql-cnf";
pub const PROXY_DATA_CLAIM: &str = "proxysql-data";
pub const PROXY_MYSQL_PORT: i32 = 6033;

const FILES_STORAGE_CLASS: &str = "efs";
const FILES_CSI_DRIVER: &str = "efs.csi.aws.com";
const PROXY_STORAGE_CLASS: &str = "gp2";
const SMALL_VOLUME: &str = "128Mi";
const INITIAL_WEB_REPLICAS: i32 = 2;
const DEFAULT_TARGET_CPU: i32 = 50;
const DRUPAL_CODE_VOLUME: &str = "drupal-code";
const MIB: i64 = 1024 * 1024;

/// Desired children of one Environment.
pub struct EnvironmentManifests<'a> {
    scope: CustomerScope<'a>,
    cfg: &'a OperatorConfig,
    ns: String,
    labels: BTreeMap<String, String>,
    owner: OwnerReference,
}

impl<'a> EnvironmentManifests<'a> {
    pub fn new(
        app: &'a Application,
        env: &'a Environment,
        cfg: &'a OperatorConfig,
    ) -> Result<Self, ReconcileErr> {
        let ns = env.metadata.namespace.clone().ok_or_else(|| {
            ReconcileErr::Internal("environment has no namespace".into())
        })?;
        Ok(Self {
            scope: CustomerScope::new(app, env, &cfg.image_registry)?,
            cfg,
            ns,
            labels: env.child_labels(),
            owner: owner_reference(env)?,
        })
    }

    fn env(&self) -> &Environment {
        self.scope.env
    }

    fn owned(&self, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
        meta(name, Some(&self.ns), labels, Some(&self.owner))
    }

    fn web_labels(&self) -> BTreeMap<String, String> {
        with_label(self.labels.clone(), "app", WEB_NAME)
    }

    fn proxy_labels(&self) -> BTreeMap<String, String> {
        with_label(self.labels.clone(), "app", PROXY_SERVICE_NAME)
    }

    /// Empty routing aggregate; Sites fill it in.
    pub fn routing_map_seed(&self) -> ConfigMap {
        ConfigMap {
            metadata: self.owned(DOMAIN_MAP_NAME, self.labels.clone()),
            data: Some(BTreeMap::new()),
            ..Default::default()
        }
    }

    /// Empty credentials aggregate; Sites fill it in.
    pub fn credentials_map_seed(&self) -> Secret {
        Secret {
            metadata: self.owned(DOMAIN_MAP_NAME, self.labels.clone()),
            data: Some(BTreeMap::new()),
            type_: Some("Opaque".into()),
            ..Default::default()
        }
    }

    fn config_map(&self, name: &str, key: &str, body: String) -> ConfigMap {
        ConfigMap {
            metadata: self.owned(name, self.labels.clone()),
            data: Some(BTreeMap::from([(key.to_string(), body)])),
            ..Default::default()
        }
    }

    pub fn php_config(&self) -> ConfigMap {
        let php = &self.env().spec.phpfpm;
        self.config_map(
            super::customer::PHP_CONFIG_NAME,
            "drupalcontroller.ini",
            php_ini(
                php.proc_memory_limit_mib,
                php.apc_memory_limit_mib,
                php.opcache_memory_limit_mib,
            ),
        )
    }

    pub fn phpfpm_config(&self) -> ConfigMap {
        self.config_map(
            PHPFPM_CONFIG_NAME,
            "drupalcontroller.conf",
            phpfpm_conf(self.env().spec.phpfpm.procs),
        )
    }

    pub fn proxy_config(&self) -> ConfigMap {
        self.config_map(PROXY_CONFIG_NAME, "proxysql.cnf", proxysql_cnf(&self.cfg.proxy))
    }

    /// Statically provisioned files volume. Cluster scoped and not owned;
    /// the Environment finalizer removes it.
    pub fn files_volume(&self) -> PersistentVolume {
        PersistentVolume {
            metadata: meta(&self.scope.files_claim_name(), None, self.labels.clone(), None),
            spec: Some(PersistentVolumeSpec {
                storage_class_name: Some(FILES_STORAGE_CLASS.into()),
                access_modes: Some(vec!["ReadWriteMany".into()]),
                capacity: quantities(&[("storage", SMALL_VOLUME)]),
                volume_mode: Some("Filesystem".into()),
                csi: Some(CSIPersistentVolumeSource {
                    driver: FILES_CSI_DRIVER.into(),
                    volume_handle: self.env().spec.efsid.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Claim for the files volume. With static provisioning it binds to the
    /// Environment's own PV through the identity labels.
    pub fn files_claim(&self) -> PersistentVolumeClaim {
        let static_pv = !self.cfg.dynamic_provisioning;
        PersistentVolumeClaim {
            metadata: self.owned(&self.scope.files_claim_name(), self.labels.clone()),
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: Some(FILES_STORAGE_CLASS.into()),
                access_modes: Some(vec![if static_pv {
                    "ReadWriteMany".into()
                } else {
                    "ReadWriteOnce".into()
                }]),
                selector: static_pv.then(|| LabelSelector {
                    match_labels: Some(self.labels.clone()),
                    ..Default::default()
                }),
                resources: Some(VolumeResourceRequirements {
                    requests: quantities(&[("storage", SMALL_VOLUME)]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn apache_container(&self) -> Container {
        let env = self.env();
        let drupal = &env.spec.drupal;
        Container {
            name: "apache".into(),
            image: Some(format!(
                "{}/apache/default:{}",
                self.registry(),
                env.spec.apache.tag
            )),
            image_pull_policy: pull_policy(&drupal.pull_policy),
            ports: Some(vec![ContainerPort {
                container_port: 8080,
                name: Some("http".into()),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            resources: Some(requirements(&env.spec.apache.cpu, &env.spec.apache.memory)),
            env: Some(vec![EnvVar {
                name: "DOCROOT".into(),
                value: Some(format!("/var/www/html/{}", env.spec.apache.web_root)),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![code_mount("/var/www"), self.scope.files_mount()]),
            liveness_probe: http_probe(&drupal.liveness_probe),
            readiness_probe: http_probe(&drupal.readiness_probe),
            ..Default::default()
        }
    }

    fn phpfpm_container(&self) -> Container {
        let php = &self.env().spec.phpfpm;
        let limit_mib = i64::from(php.procs) * i64::from(php.proc_memory_limit_mib)
            + i64::from(php.opcache_memory_limit_mib)
            + i64::from(php.apc_memory_limit_mib);
        let limit = format!("{limit_mib}Mi");
        let request = (limit_mib * MIB / 3).to_string();
        let base = self.scope.container();
        let mut mounts = base.volume_mounts.clone().unwrap_or_default();
        mounts.push(VolumeMount {
            name: PHPFPM_CONFIG_NAME.into(),
            mount_path: "/usr/local/etc/php-fpm.d/".into(),
            read_only: Some(true),
            ..Default::default()
        });
        mounts.push(code_mount("/var/www"));
        Container {
            name: "php-fpm".into(),
            image: Some(format!("{}/php-fpm/default:{}", self.registry(), php.tag)),
            resources: Some(ResourceRequirements {
                requests: quantities(&[
                    ("cpu", php.cpu.request.as_str()),
                    ("memory", request.as_str()),
                ]),
                limits: quantities(&[
                    ("cpu", php.cpu.limit.as_str()),
                    ("memory", limit.as_str()),
                ]),
                ..Default::default()
            }),
            volume_mounts: Some(mounts),
            ..base
        }
    }

    fn init_containers(&self) -> Vec<Container> {
        let init = |name: &str, command: Vec<&str>, mount: VolumeMount| Container {
            name: name.into(),
            image: Some(self.scope.image()),
            image_pull_policy: self.scope.pull_policy(),
            command: Some(command.into_iter().map(str::to_string).collect()),
            volume_mounts: Some(vec![mount]),
            resources: Some(fixed_requirements(("100m", "500m"), ("128Mi", "256Mi"))),
            ..Default::default()
        };
        let code_copy = init(
            "code-copy",
            vec!["rsync", "--verbose", "--archive", "/var/www/html", "/drupal-code"],
            code_mount("/drupal-code"),
        );
        let shared_setup = Container {
            security_context: Some(SecurityContext {
                run_as_user: Some(0),
                ..Default::default()
            }),
            ..init(
                "shared-setup",
                vec![
                    "/bin/sh",
                    "-c",
                    "mkdir -p /shared/php_sessions && mkdir -p /shared/tmp && chown www-data:www-data /shared/* ",
                ],
                self.scope.shared_mount(),
            )
        };
        vec![code_copy, shared_setup]
    }

    /// Web tier. Replicas are only an initial value; the autoscaler owns
    /// them afterwards.
    pub fn web_deployment(&self) -> Deployment {
        let labels = self.web_labels();
        Deployment {
            metadata: self.owned(WEB_NAME, self.labels.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(INITIAL_WEB_REPLICAS),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                strategy: Some(rolling_update()),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        init_containers: Some(self.init_containers()),
                        containers: vec![self.apache_container(), self.phpfpm_container()],
                        node_selector: worker_node_selector(),
                        volumes: Some(vec![
                            self.scope.files_volume(),
                            Volume {
                                name: DRUPAL_CODE_VOLUME.into(),
                                empty_dir: Some(EmptyDirVolumeSource::default()),
                                ..Default::default()
                            },
                            Volume {
                                name: PHPFPM_CONFIG_NAME.into(),
                                config_map: Some(ConfigMapVolumeSource {
                                    name: PHPFPM_CONFIG_NAME.into(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            },
                            php_config_volume(),
                            domain_map_volume(),
                        ]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn web_service(&self) -> Service {
        Service {
            metadata: self.owned(WEB_NAME, self.labels.clone()),
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".into()),
                    port: 80,
                    target_port: Some(IntOrString::String("http".into())),
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                selector: Some(self.web_labels()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn proxy_claim(&self) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: self.owned(PROXY_DATA_CLAIM, self.labels.clone()),
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: Some(PROXY_STORAGE_CLASS.into()),
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                resources: Some(VolumeResourceRequirements {
                    requests: quantities(&[("storage", SMALL_VOLUME)]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn proxy_deployment(&self) -> Deployment {
        let proxy = &self.env().spec.proxy_sql;
        let labels = self.proxy_labels();
        let container = Container {
            name: PROXY_SERVICE_NAME.into(),
            image: Some(format!("severalnines/proxysql:{}", proxy.tag)),
            image_pull_policy: pull_policy(""),
            ports: Some(vec![
                ContainerPort {
                    container_port: PROXY_MYSQL_PORT,
                    name: Some("proxysql-mysql".into()),
                    protocol: Some("TCP".into()),
                    ..Default::default()
                },
                ContainerPort {
                    container_port: i32::from(self.cfg.proxy.port),
                    name: Some("proxysql-admin".into()),
                    protocol: Some("TCP".into()),
                    ..Default::default()
                },
            ]),
            resources: Some(requirements(&proxy.cpu, &proxy.memory)),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: "proxysql-config".into(),
                    mount_path: "/etc/proxysql.cnf".into(),
                    sub_path: Some("proxysql.cnf".into()),
                    ..Default::default()
                },
                VolumeMount {
                    name: "proxysql-disk".into(),
                    mount_path: "/var/lib/proxysql".into(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        Deployment {
            metadata: self.owned(PROXY_SERVICE_NAME, labels.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(proxy.replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                strategy: Some(rolling_update()),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        node_selector: worker_node_selector(),
                        containers: vec![container],
                        volumes: Some(vec![
                            Volume {
                                name: "proxysql-config".into(),
                                config_map: Some(ConfigMapVolumeSource {
                                    name: PROXY_CONFIG_NAME.into(),
                                    default_mode: Some(0o644),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            },
                            Volume {
                                name: "proxysql-disk".into(),
                                persistent_volume_claim: Some(
                                    PersistentVolumeClaimVolumeSource {
                                        claim_name: PROXY_DATA_CLAIM.into(),
                                        ..Default::default()
                                    },
                                ),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn proxy_service(&self) -> Service {
        let port = |name: &str, port: i32| ServicePort {
            name: Some(name.into()),
            port,
            target_port: Some(IntOrString::Int(port)),
            protocol: Some("TCP".into()),
            ..Default::default()
        };
        Service {
            metadata: self.owned(PROXY_SERVICE_NAME, self.labels.clone()),
            spec: Some(ServiceSpec {
                ports: Some(vec![
                    port("proxysql-mysql", PROXY_MYSQL_PORT),
                    port("proxysql-admin", i32::from(self.cfg.proxy.port)),
                ]),
                selector: Some(self.proxy_labels()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn autoscaler(&self) -> HorizontalPodAutoscaler {
        let drupal = &self.env().spec.drupal;
        HorizontalPodAutoscaler {
            metadata: self.owned(WEB_NAME, self.labels.clone()),
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some("apps/v1".into()),
                    kind: "Deployment".into(),
                    name: WEB_NAME.into(),
                },
                min_replicas: Some(drupal.min_replicas),
                max_replicas: drupal.max_replicas,
                metrics: Some(vec![MetricSpec {
                    type_: "Resource".into(),
                    resource: Some(ResourceMetricSource {
                        name: "cpu".into(),
                        target: MetricTarget {
                            type_: "Utilization".into(),
                            average_utilization: Some(
                                drupal
                                    .target_cpu_utilization_percentage
                                    .unwrap_or(DEFAULT_TARGET_CPU),
                            ),
                            ..Default::default()
                        },
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn registry(&self) -> &str {
        self.scope.registry.trim_end_matches('/')
    }
}

fn code_mount(path: &str) -> VolumeMount {
    VolumeMount {
        name: DRUPAL_CODE_VOLUME.into(),
        mount_path: path.into(),
        ..Default::default()
    }
}

fn rolling_update() -> DeploymentStrategy {
    DeploymentStrategy {
        type_: Some("RollingUpdate".into()),
        rolling_update: Some(RollingUpdateDeployment {
            max_surge: Some(IntOrString::String("25%".into())),
            max_unavailable: Some(IntOrString::String("25%".into())),
        }),
    }
}

fn or_default(value: i32, default: i32) -> Option<i32> {
    Some(if value > 0 { value } else { default })
}

/// HTTP probe against the `http` port, with unset thresholds filled in the
/// way the API server would.
fn http_probe(probe: &HttpProbe) -> Option<Probe> {
    if !probe.enabled {
        return None;
    }
    Some(Probe {
        http_get: Some(HTTPGetAction {
            path: Some(probe.http_path.clone()),
            port: IntOrString::String("http".into()),
            scheme: Some("HTTP".into()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(1),
        timeout_seconds: or_default(probe.timeout_seconds, 1),
        period_seconds: or_default(probe.period_seconds, 10),
        success_threshold: or_default(probe.success_threshold, 1),
        failure_threshold: or_default(probe.failure_threshold, 3),
        ..Default::default()
    })
}

const PHP_EXTENSIONS: &[&str] = &[
    "apcu", "bcmath", "bz2", "calendar", "dba", "exif", "gd", "gettext", "gmp",
    "gnupg", "igbinary", "imagick", "imap", "krb5", "ldap", "memcached",
    "mysqli", "oauth", "pcntl", "pdo_dblib", "pdo_mysql", "pdo_pgsql", "pgsql",
    "pspell", "shmop", "soap", "sockets", "sodium", "sysvmsg", "sysvsem",
    "sysvshm", "tidy", "wddx", "xmlrpc", "xsl", "yaml", "zip", "raphf",
    "propro", "http",
];

fn php_ini(memory_mib: i32, apc_mib: i32, opcache_mib: i32) -> String {
    let mut ini = String::from("\n");
    for ext in PHP_EXTENSIONS {
        ini.push_str(&format!("extension={ext}.so\n"));
    }
    ini.push_str(
        "zend_extension=/usr/local/lib/php/extensions/no-debug-non-zts-20180731/opcache.so\n\n",
    );
    ini.push_str(&format!(
        "memory_limit = {memory_mib}M\napc.shm_size = {apc_mib}M\nopcache.memory_consumption = {opcache_mib}"
    ));
    ini
}

fn phpfpm_conf(procs: i32) -> String {
    format!(
        "
[global]
error_log = /proc/self/fd/2
daemonize = no
emergency_restart_threshold = 10
emergency_restart_interval = 1m
process_control_timeout = 10s

[www]
access.log = /proc/self/fd/2
listen = /var/www/php-fpm.sock
pm = static
pm.max_children = {procs}
pm.max_requests = 500
clear_env = no
catch_workers_output = yes"
    )
}

fn proxysql_cnf(admin: &ProxyAdminConfig) -> String {
    format!(
        r#"datadir="/var/lib/proxysql"
admin_variables=
{{
        admin_credentials="{user}:{password}"
        mysql_ifaces="0.0.0.0:{port}"
        refresh_interval=2000
}}
mysql_variables=
{{
        threads=4
        max_connections=2048
        default_query_delay=0
        default_query_timeout=36000000
        have_compress=true
        poll_timeout=2000
        interfaces="0.0.0.0:{mysql_port};/tmp/proxysql.sock"
        default_schema="information_schema"
        stacksize=1048576
        server_version="5.1.30"
        connect_timeout_server=10000
        monitor_history=60000
        monitor_connect_interval=2000
        monitor_ping_interval=2000
        ping_interval_server_msec=10000
        ping_timeout_server=200
        commands_stats=true
        sessions_sort=true
}}"#,
        user = admin.user,
        password = admin.password,
        port = admin.port,
        mysql_port = PROXY_MYSQL_PORT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ApplicationSpec, ENVIRONMENT_ID_LABEL, EnvironmentSpec};
    use envconfig::Envconfig;
    use std::collections::HashMap;

    fn fixtures() -> (Application, Environment, OperatorConfig) {
        let app = Application::new(
            "shop",
            ApplicationSpec {
                git_repo: "acme/shop".into(),
                image_repo: None,
            },
        );
        let mut env = Environment::new("prod", EnvironmentSpec::default());
        env.metadata.namespace = Some("tenant".into());
        env.metadata.uid = Some("env-uid".into());
        env.metadata.labels = Some(BTreeMap::from([(
            ENVIRONMENT_ID_LABEL.to_string(),
            "e1".to_string(),
        )]));
        env.spec.phpfpm.procs = 4;
        env.spec.phpfpm.proc_memory_limit_mib = 128;
        env.spec.phpfpm.opcache_memory_limit_mib = 96;
        env.spec.phpfpm.apc_memory_limit_mib = 32;
        env.spec.drupal.min_replicas = 2;
        env.spec.drupal.max_replicas = 6;
        let cfg = OperatorConfig::init_from_hashmap(&HashMap::new()).unwrap();
        (app, env, cfg)
    }

    #[test]
    fn phpfpm_memory_is_sized_from_process_budget() {
        let (app, env, cfg) = fixtures();
        let m = EnvironmentManifests::new(&app, &env, &cfg).unwrap();
        let php = m.phpfpm_container();
        let res = php.resources.unwrap();
        assert_eq!(res.limits.unwrap()["memory"].0, "640Mi");
        assert_eq!(res.requests.unwrap()["memory"].0, (640 * MIB / 3).to_string());
    }

    #[test]
    fn static_provisioning_binds_claim_by_labels() {
        let (app, env, mut cfg) = fixtures();
        let claim = EnvironmentManifests::new(&app, &env, &cfg).unwrap().files_claim();
        let spec = claim.spec.unwrap();
        assert!(spec.selector.is_some());
        assert_eq!(spec.access_modes.unwrap(), vec!["ReadWriteMany"]);

        cfg.dynamic_provisioning = true;
        let claim = EnvironmentManifests::new(&app, &env, &cfg).unwrap().files_claim();
        assert!(claim.spec.unwrap().selector.is_none());
    }

    #[test]
    fn files_volume_is_not_owned() {
        let (app, env, cfg) = fixtures();
        let m = EnvironmentManifests::new(&app, &env, &cfg).unwrap();
        let pv = m.files_volume();
        assert!(pv.metadata.owner_references.is_none());
        assert_eq!(pv.metadata.name.as_deref(), Some("e1-files"));
        assert!(m.web_deployment().metadata.owner_references.is_some());
    }

    #[test]
    fn autoscaler_defaults_cpu_target() {
        let (app, env, cfg) = fixtures();
        let hpa = EnvironmentManifests::new(&app, &env, &cfg).unwrap().autoscaler();
        let spec = hpa.spec.unwrap();
        assert_eq!(spec.max_replicas, 6);
        let metrics = spec.metrics.unwrap();
        let target = &metrics[0].resource.as_ref().unwrap().target;
        assert_eq!(target.average_utilization, Some(DEFAULT_TARGET_CPU));
    }

    #[test]
    fn disabled_probe_is_omitted_and_enabled_one_is_defaulted() {
        assert!(http_probe(&HttpProbe::default()).is_none());
        let probe = http_probe(&HttpProbe {
            enabled: true,
            http_path: "/health".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(probe.period_seconds, Some(10));
        assert_eq!(probe.failure_threshold, Some(3));
    }

    #[test]
    fn proxy_config_carries_admin_credentials() {
        let (_, _, cfg) = fixtures();
        let cnf = proxysql_cnf(&cfg.proxy);
        assert!(cnf.contains(r#"admin_credentials="proxysql-admin:adminpassw0rd""#));
        assert!(cnf.contains("0.0.0.0:6032"));
    }
}
