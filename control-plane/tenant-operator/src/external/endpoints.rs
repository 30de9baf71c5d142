use k8s_openapi::api::core::v1::{Secret, Service};
use tracing::debug;

use crate::config::{DatabaseConfig, ProxyAdminConfig};
use crate::controller::ReconcileErr;
use crate::store::ResourceStore;

pub const PROXY_SERVICE_NAME: &str = "proxysql";

/// Address and credentials of a MySQL-protocol endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct DbEndpoint {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DbEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

fn secret_field(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

/// Admin endpoint of the primary database cluster. Each field comes from
/// its override when set, otherwise from the admin Secret.
pub async fn primary_endpoint<S: ResourceStore>(
    store: &S,
    cfg: &DatabaseConfig,
) -> Result<DbEndpoint, ReconcileErr> {
    let secret: Option<Secret> = store
        .get(Some(&cfg.admin_secret_namespace), &cfg.admin_secret)
        .await?;
    let pick = |over: &Option<String>, key: &str| -> Result<String, ReconcileErr> {
        over.clone()
            .filter(|v| !v.is_empty())
            .or_else(|| secret.as_ref().and_then(|s| secret_field(s, key)))
            .ok_or_else(|| {
                ReconcileErr::Internal(format!(
                    "database admin '{key}' missing from secret {}/{} and not overridden",
                    cfg.admin_secret_namespace, cfg.admin_secret
                ))
            })
    };
    Ok(DbEndpoint {
        user: pick(&cfg.user_override, "username")?,
        password: pick(&cfg.password_override, "password")?,
        host: pick(&cfg.host_override, "host")?,
        port: pick(&cfg.port_override, "port")?,
    })
}

/// Admin endpoint of the namespace's SQL proxy, or `None` while its Service
/// does not exist.
pub async fn proxy_admin_endpoint<S: ResourceStore>(
    store: &S,
    ns: &str,
    cfg: &ProxyAdminConfig,
) -> Result<Option<DbEndpoint>, ReconcileErr> {
    let Some(svc) = store.get::<Service>(Some(ns), PROXY_SERVICE_NAME).await?
    else {
        debug!(%ns, "proxy service not found");
        return Ok(None);
    };
    let host = svc
        .spec
        .and_then(|s| s.cluster_ip)
        .filter(|ip| !ip.is_empty() && ip != "None");
    let Some(host) = host else {
        debug!(%ns, "proxy service has no cluster IP yet");
        return Ok(None);
    };
    Ok(Some(DbEndpoint {
        host,
        port: cfg.port.to_string(),
        user: cfg.user.clone(),
        password: cfg.password.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::store::MemoryStore;
    use envconfig::Envconfig;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::{BTreeMap, HashMap};

    fn admin_secret() -> Secret {
        let data = [
            ("username", "admin"),
            ("password", "s3cret"),
            ("host", "db.internal"),
            ("port", "3306"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect::<BTreeMap<_, _>>();
        Secret {
            metadata: ObjectMeta {
                name: Some("default-cluster-creds".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn overrides_win_over_secret_values() {
        let store = MemoryStore::new();
        store.create(&admin_secret()).await.unwrap();
        let env = HashMap::from([(
            "DB_HOST_OVERRIDE".to_string(),
            "127.0.0.1".to_string(),
        )]);
        let cfg = OperatorConfig::init_from_hashmap(&env).unwrap();
        let ep = primary_endpoint(&store, &cfg.database).await.unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.user, "admin");
        assert_eq!(ep.port, "3306");
    }

    #[tokio::test]
    async fn missing_secret_without_overrides_is_an_error() {
        let store = MemoryStore::new();
        let cfg = OperatorConfig::init_from_hashmap(&HashMap::new()).unwrap();
        assert!(primary_endpoint(&store, &cfg.database).await.is_err());
        let proxy = proxy_admin_endpoint(&store, "tenant", &cfg.proxy)
            .await
            .unwrap();
        assert!(proxy.is_none());
    }
}
