#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use envconfig::Envconfig;
use k8s_openapi::api::core::v1::Service;
use tenant_operator::config::OperatorConfig;
use tenant_operator::controller::application::reconcile_application;
use tenant_operator::controller::environment::reconcile_environment;
use tenant_operator::controller::site::reconcile_site;
use tenant_operator::controller::{Context, ReconcileErr, Requeue};
use tenant_operator::crd::environment::{
    ApacheSpec, DrupalSpec, HttpProbe, PhpFpmSpec, ProxySqlSpec, Resources,
};
use tenant_operator::crd::site::CronSpec;
use tenant_operator::crd::{
    Application, ApplicationSpec, Environment, EnvironmentSpec, Site, SiteSpec,
};
use tenant_operator::external::endpoints::PROXY_SERVICE_NAME;
use tenant_operator::external::{DbEndpoint, SqlConnector, SqlError, SqlExecutor};
use tenant_operator::store::{MemoryStore, ResourceStore};

pub const NS: &str = "tenant-a";
pub const APP: &str = "shop";
pub const ENV: &str = "prod";
pub const PRIMARY_HOST: &str = "mysql.example";
pub const PROXY_IP: &str = "10.0.0.10";

const MAX_PASSES: usize = 64;

/// SQL connector that records every statement per host and can be told to
/// be unreachable or to fail statements with a server error code.
#[derive(Clone, Default)]
pub struct FakeSql {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    log: Vec<(String, String)>,
    unreachable: bool,
    failures: Vec<(String, u16)>,
    known_servers: i64,
}

impl FakeSql {
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Fail statements starting with `prefix` with MySQL error `code`.
    pub fn fail_on(&self, prefix: &str, code: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_string(), code));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn statements(&self, host: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }
}

struct FakeSession {
    host: String,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl SqlExecutor for FakeSession {
    async fn ping(&mut self) -> Result<(), SqlError> {
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<(), SqlError> {
        let mut state = self.state.lock().unwrap();
        state.log.push((self.host.clone(), sql.to_string()));
        if let Some((_, code)) =
            state.failures.iter().find(|(p, _)| sql.starts_with(p.as_str()))
        {
            return Err(SqlError::Server {
                code: *code,
                message: "injected".into(),
            });
        }
        if sql.starts_with("INSERT INTO mysql_servers") {
            state.known_servers += 1;
        }
        Ok(())
    }

    async fn query_count(&mut self, sql: &str) -> Result<i64, SqlError> {
        let mut state = self.state.lock().unwrap();
        state.log.push((self.host.clone(), sql.to_string()));
        Ok(state.known_servers)
    }
}

#[async_trait]
impl SqlConnector for FakeSql {
    async fn connect(
        &self,
        endpoint: &DbEndpoint,
    ) -> Result<Box<dyn SqlExecutor>, SqlError> {
        if self.state.lock().unwrap().unreachable {
            return Err(SqlError::Unreachable(format!(
                "{}:{} refused",
                endpoint.host, endpoint.port
            )));
        }
        Ok(Box::new(FakeSession {
            host: endpoint.host.clone(),
            state: self.state.clone(),
        }))
    }
}

pub fn test_config(extra: &[(&str, &str)]) -> OperatorConfig {
    let mut env: HashMap<String, String> = HashMap::from([
        ("DB_USER_OVERRIDE".to_string(), "root".to_string()),
        ("DB_PASSWORD_OVERRIDE".to_string(), "s3cret".to_string()),
        ("DB_HOST_OVERRIDE".to_string(), PRIMARY_HOST.to_string()),
        ("DB_PORT_OVERRIDE".to_string(), "3306".to_string()),
    ]);
    for (k, v) in extra {
        env.insert(k.to_string(), v.to_string());
    }
    OperatorConfig::init_from_hashmap(&env).expect("test config")
}

pub struct Harness {
    pub ctx: Context<MemoryStore>,
    pub sql: FakeSql,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config(&[]))
    }

    pub fn with_config(cfg: OperatorConfig) -> Self {
        let sql = FakeSql::default();
        let connector: Arc<dyn SqlConnector> = Arc::new(sql.clone());
        Self {
            ctx: Context::new(MemoryStore::new(), connector, cfg),
            sql,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.ctx.store
    }

    /// Reconcile until the pass asks for anything other than an immediate
    /// retry. Lost races are retried like the controller does.
    pub async fn settle_application(&self, name: &str) -> Result<Requeue, ReconcileErr> {
        for _ in 0..MAX_PASSES {
            let Some(app) = self.store().get::<Application>(None, name).await? else {
                return Ok(Requeue::Done);
            };
            match reconcile_application(&self.ctx, &app).await {
                Ok(Requeue::Now) => continue,
                Err(e) if e.is_conflict() => continue,
                other => return other,
            }
        }
        panic!("application {name} did not settle");
    }

    pub async fn settle_environment(&self, name: &str) -> Result<Requeue, ReconcileErr> {
        for _ in 0..MAX_PASSES {
            let Some(env) = self.store().get::<Environment>(Some(NS), name).await?
            else {
                return Ok(Requeue::Done);
            };
            match reconcile_environment(&self.ctx, &env).await {
                Ok(Requeue::Now) => continue,
                Err(e) if e.is_conflict() => continue,
                other => return other,
            }
        }
        panic!("environment {name} did not settle");
    }

    pub async fn settle_site(&self, name: &str) -> Result<Requeue, ReconcileErr> {
        for _ in 0..MAX_PASSES {
            let Some(site) = self.store().get::<Site>(Some(NS), name).await? else {
                return Ok(Requeue::Done);
            };
            match reconcile_site(&self.ctx, &site).await {
                Ok(Requeue::Now) => continue,
                Err(e) if e.is_conflict() => continue,
                other => return other,
            }
        }
        panic!("site {name} did not settle");
    }

    /// The memory store has no service IP allocator.
    pub async fn assign_proxy_ip(&self) {
        let mut svc: Service = self
            .store()
            .get(Some(NS), PROXY_SERVICE_NAME)
            .await
            .unwrap()
            .expect("proxy service");
        svc.spec.get_or_insert_with(Default::default).cluster_ip =
            Some(PROXY_IP.to_string());
        self.store().replace(&svc).await.unwrap();
    }

    /// Application and Environment fully provisioned, proxy reachable.
    pub async fn with_environment(&self) {
        self.store().create(&application()).await.unwrap();
        assert_eq!(self.settle_application(APP).await.unwrap(), Requeue::Done);
        self.store().create(&environment()).await.unwrap();
        let first = self.settle_environment(ENV).await.unwrap();
        assert!(matches!(first, Requeue::After(_)), "waits for proxy IP");
        self.assign_proxy_ip().await;
        assert_eq!(self.settle_environment(ENV).await.unwrap(), Requeue::Done);
    }

    pub async fn create_site(&self, site: Site) {
        self.store().create(&site).await.unwrap();
    }
}

pub fn application() -> Application {
    Application::new(
        APP,
        ApplicationSpec {
            git_repo: "git@git.example.com:acme/shop.git".into(),
            image_repo: None,
        },
    )
}

fn res(request: &str, limit: &str) -> Resources {
    Resources {
        request: request.into(),
        limit: limit.into(),
    }
}

pub fn environment() -> Environment {
    let mut env = Environment::new(
        ENV,
        EnvironmentSpec {
            application: APP.into(),
            production: true,
            efsid: "fs-1234".into(),
            git_ref: "main".into(),
            drupal: DrupalSpec {
                tag: "v1".into(),
                pull_policy: "Always".into(),
                min_replicas: 2,
                max_replicas: 6,
                target_cpu_utilization_percentage: Some(70),
                liveness_probe: HttpProbe {
                    enabled: true,
                    http_path: "/health".into(),
                    ..Default::default()
                },
                readiness_probe: HttpProbe::default(),
            },
            apache: ApacheSpec {
                tag: "2.4".into(),
                web_root: "web".into(),
                cpu: res("100m", "500m"),
                memory: res("128Mi", "256Mi"),
            },
            phpfpm: PhpFpmSpec {
                tag: "8.2".into(),
                procs: 4,
                proc_memory_limit_mib: 128,
                opcache_memory_limit_mib: 64,
                apc_memory_limit_mib: 32,
                cpu: res("250m", "1"),
            },
            proxy_sql: ProxySqlSpec {
                replicas: 1,
                cpu: res("50m", "200m"),
                memory: res("64Mi", "128Mi"),
                tag: "2.5".into(),
            },
        },
    );
    env.metadata.namespace = Some(NS.into());
    env
}

pub fn site(name: &str, domains: &[&str]) -> Site {
    let mut site = Site::new(
        name,
        SiteSpec {
            domains: domains.iter().map(|d| d.to_string()).collect(),
            environment: ENV.into(),
            ..Default::default()
        },
    );
    site.metadata.namespace = Some(NS.into());
    site
}

pub fn cron(name: &str, schedule: &str) -> CronSpec {
    CronSpec {
        name: name.into(),
        command: vec!["drush".into(), "cron".into()],
        schedule: schedule.into(),
        ..Default::default()
    }
}
