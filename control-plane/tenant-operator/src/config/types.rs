use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "HTTP_PORT", default = "8080")]
    pub http_port: u16,

    /// When false the operator creates (and on deletion removes) a
    /// statically provisioned files PersistentVolume per Environment.
    /// Env: USE_DYNAMIC_PROVISIONING
    #[envconfig(from = "USE_DYNAMIC_PROVISIONING", default = "false")]
    pub dynamic_provisioning: bool,

    /// Registry root for platform images and the default customer
    /// image repository prefix.
    #[envconfig(
        from = "TENANT_OP_IMAGE_REGISTRY",
        default = "registry.webhost.io"
    )]
    pub image_registry: String,

    #[envconfig(nested)]
    pub retry: RetryConfig,

    #[envconfig(nested)]
    pub workers: WorkerConfig,

    #[envconfig(nested)]
    pub database: DatabaseConfig,

    #[envconfig(nested)]
    pub proxy: ProxyAdminConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RetryConfig {
    /// Fixed delay while a parent object is not visible yet.
    #[envconfig(from = "TENANT_OP_PARENT_RETRY_SECS", default = "10")]
    pub parent_retry_secs: u64,

    /// Fixed delay while the database or proxy admin is unreachable.
    #[envconfig(from = "TENANT_OP_UNREACHABLE_RETRY_SECS", default = "10")]
    pub unreachable_retry_secs: u64,

    /// Attempts at a shared domain map update before giving up the pass.
    #[envconfig(from = "TENANT_OP_MAP_CONFLICT_RETRIES", default = "8")]
    pub map_conflict_retries: u32,

    #[envconfig(from = "TENANT_OP_ERROR_BACKOFF_BASE_SECS", default = "2")]
    pub error_backoff_base_secs: u64,

    #[envconfig(from = "TENANT_OP_ERROR_BACKOFF_MAX_SECS", default = "300")]
    pub error_backoff_max_secs: u64,
}

impl RetryConfig {
    pub fn parent_retry(&self) -> Duration {
        Duration::from_secs(self.parent_retry_secs)
    }

    pub fn unreachable_retry(&self) -> Duration {
        Duration::from_secs(self.unreachable_retry_secs)
    }
}

/// Concurrent reconciles per kind.
#[derive(Envconfig, Clone, Debug)]
pub struct WorkerConfig {
    #[envconfig(from = "TENANT_OP_APP_CONCURRENCY", default = "4")]
    pub application: u16,
    #[envconfig(from = "TENANT_OP_ENV_CONCURRENCY", default = "30")]
    pub environment: u16,
    #[envconfig(from = "TENANT_OP_SITE_CONCURRENCY", default = "30")]
    pub site: u16,
}

/// Where the primary database admin credentials come from. The Secret
/// holds `username`, `password`, `host` and `port`; any override set here
/// wins over the Secret's value.
#[derive(Envconfig, Clone, Debug)]
pub struct DatabaseConfig {
    #[envconfig(
        from = "TENANT_OP_DB_ADMIN_SECRET",
        default = "default-cluster-creds"
    )]
    pub admin_secret: String,

    #[envconfig(
        from = "TENANT_OP_DB_ADMIN_SECRET_NAMESPACE",
        default = "default"
    )]
    pub admin_secret_namespace: String,

    #[envconfig(from = "DB_USER_OVERRIDE")]
    pub user_override: Option<String>,
    #[envconfig(from = "DB_PASSWORD_OVERRIDE")]
    pub password_override: Option<String>,
    #[envconfig(from = "DB_HOST_OVERRIDE")]
    pub host_override: Option<String>,
    #[envconfig(from = "DB_PORT_OVERRIDE")]
    pub port_override: Option<String>,

    #[envconfig(from = "TENANT_OP_DB_CONNECT_TIMEOUT_SECS", default = "5")]
    pub connect_timeout_secs: u64,
}

/// Credentials of the per-namespace SQL proxy admin interface. They are
/// also rendered into the proxy's own configuration file.
#[derive(Envconfig, Clone, Debug)]
pub struct ProxyAdminConfig {
    #[envconfig(from = "TENANT_OP_PROXY_ADMIN_USER", default = "proxysql-admin")]
    pub user: String,
    #[envconfig(
        from = "TENANT_OP_PROXY_ADMIN_PASSWORD",
        default = "adminpassw0rd"
    )]
    pub password: String,
    #[envconfig(from = "TENANT_OP_PROXY_ADMIN_PORT", default = "6032")]
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_without_env() {
        let cfg = OperatorConfig::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(cfg.http_port, 8080);
        assert!(!cfg.dynamic_provisioning);
        assert_eq!(cfg.retry.parent_retry(), Duration::from_secs(10));
        assert_eq!(cfg.retry.map_conflict_retries, 8);
        assert_eq!(cfg.workers.application, 4);
        assert_eq!(cfg.workers.site, 30);
        assert_eq!(cfg.database.admin_secret, "default-cluster-creds");
        assert!(cfg.database.host_override.is_none());
        assert_eq!(cfg.proxy.port, 6032);
    }

    #[test]
    fn env_values_override_defaults() {
        let env = HashMap::from([
            ("USE_DYNAMIC_PROVISIONING".to_string(), "true".to_string()),
            ("TENANT_OP_SITE_CONCURRENCY".to_string(), "8".to_string()),
            ("DB_HOST_OVERRIDE".to_string(), "mysql.local".to_string()),
        ]);
        let cfg = OperatorConfig::init_from_hashmap(&env).unwrap();
        assert!(cfg.dynamic_provisioning);
        assert_eq!(cfg.workers.site, 8);
        assert_eq!(cfg.database.host_override.as_deref(), Some("mysql.local"));
    }
}
