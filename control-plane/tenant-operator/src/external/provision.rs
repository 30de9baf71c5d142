//! Statement sequences for per-site databases and per-namespace proxy
//! bootstrap.

use tracing::{debug, info};

use super::{
    DbEndpoint, ER_ACCESS_DENIED, ER_CANNOT_USER, SqlConnector, SqlError,
    SqlExecutor, quote_literal,
};

/// A statement and the server error code, if any, that counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub tolerated: Option<u16>,
}

impl Statement {
    fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            tolerated: None,
        }
    }

    fn tolerating(sql: impl Into<String>, code: u16) -> Self {
        Self {
            sql: sql.into(),
            tolerated: Some(code),
        }
    }
}

/// Database name, principal and password of one site.
#[derive(Clone, PartialEq, Eq)]
pub struct SiteDatabase {
    pub name: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for SiteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteDatabase")
            .field("name", &self.name)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

const LOAD_USERS: &str = "LOAD MYSQL USERS TO RUNTIME";
const SAVE_USERS: &str = "SAVE MYSQL USERS TO DISK";

pub fn create_on_primary(db: &SiteDatabase) -> Vec<Statement> {
    let user = quote_literal(&db.user);
    vec![
        Statement::plain(format!("CREATE DATABASE IF NOT EXISTS `{}`", db.name)),
        Statement::tolerating(format!("CREATE USER '{user}'@'%'"), ER_CANNOT_USER),
        Statement::plain(format!(
            "SET PASSWORD FOR '{user}'@'%' = PASSWORD('{}')",
            quote_literal(&db.password)
        )),
        Statement::plain(format!(
            "GRANT ALL PRIVILEGES ON `{}`.* TO '{user}'@'%'",
            db.name
        )),
        Statement::plain("FLUSH PRIVILEGES"),
    ]
}

pub fn register_with_proxy(db: &SiteDatabase) -> Vec<Statement> {
    vec![
        Statement::tolerating(
            format!(
                "INSERT INTO mysql_users(username,password,default_hostgroup) VALUES ('{}','{}',1)",
                quote_literal(&db.user),
                quote_literal(&db.password)
            ),
            ER_ACCESS_DENIED,
        ),
        Statement::plain(LOAD_USERS),
        Statement::plain(SAVE_USERS),
    ]
}

pub fn drop_on_primary(db: &SiteDatabase) -> Vec<Statement> {
    vec![
        Statement::plain(format!("DROP DATABASE IF EXISTS `{}`", db.name)),
        Statement::tolerating(
            format!("DROP USER '{}'@'%'", quote_literal(&db.user)),
            ER_CANNOT_USER,
        ),
    ]
}

pub fn deregister_from_proxy(db: &SiteDatabase) -> Vec<Statement> {
    vec![
        Statement::tolerating(
            format!(
                "DELETE FROM mysql_users WHERE username='{}'",
                quote_literal(&db.user)
            ),
            ER_ACCESS_DENIED,
        ),
        Statement::plain(LOAD_USERS),
        Statement::plain(SAVE_USERS),
    ]
}

/// Monitor settings and load/save commands run after the primary is known
/// to the proxy.
pub fn proxy_monitor_settings(primary: &DbEndpoint) -> Vec<Statement> {
    vec![
        Statement::plain(format!(
            "UPDATE global_variables SET variable_value='{}' WHERE variable_name='mysql-monitor_password'",
            quote_literal(&primary.password)
        )),
        Statement::plain(format!(
            "UPDATE global_variables SET variable_value='{}' WHERE variable_name='mysql-monitor_username'",
            quote_literal(&primary.user)
        )),
        Statement::plain(
            "UPDATE global_variables SET variable_value='2000' WHERE variable_name IN ('mysql-monitor_connect_interval','mysql-monitor_ping_interval','mysql-monitor_read_only_interval')",
        ),
        Statement::plain("LOAD MYSQL VARIABLES TO RUNTIME"),
        Statement::plain("SAVE MYSQL VARIABLES TO DISK"),
        Statement::plain("LOAD MYSQL SERVERS TO RUNTIME"),
        Statement::plain("SAVE MYSQL SERVERS TO DISK"),
    ]
}

/// Run statements in order, stopping at the first error that is not
/// tolerated.
pub async fn run(
    exec: &mut dyn SqlExecutor,
    statements: &[Statement],
) -> Result<(), SqlError> {
    for stmt in statements {
        match exec.execute(&stmt.sql).await {
            Ok(()) => {}
            Err(e) if e.code().is_some() && e.code() == stmt.tolerated => {
                debug!(code = ?e.code(), "tolerated server error");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Connect and ping. Any failure here means the endpoint is unreachable.
pub async fn open(
    connector: &dyn SqlConnector,
    endpoint: &DbEndpoint,
) -> Result<Box<dyn SqlExecutor>, SqlError> {
    let mut exec = connector.connect(endpoint).await.map_err(|e| match e {
        SqlError::Server { message, .. } => SqlError::Unreachable(message),
        other => other,
    })?;
    exec.ping().await?;
    Ok(exec)
}

/// Ensure the primary is listed in the proxy's server table and the proxy
/// monitors it with the admin credentials.
pub async fn bootstrap_proxy(
    proxy: &mut dyn SqlExecutor,
    primary: &DbEndpoint,
) -> Result<(), SqlError> {
    let host = quote_literal(&primary.host);
    let known = proxy
        .query_count(&format!(
            "SELECT COUNT(*) FROM mysql_servers WHERE hostname='{host}'"
        ))
        .await?;
    if known == 0 {
        let port: u16 = primary.port.parse().map_err(|_| {
            SqlError::Config(format!("invalid database port '{}'", primary.port))
        })?;
        proxy
            .execute(&format!(
                "INSERT INTO mysql_servers(hostgroup_id,hostname,port) VALUES (1,'{host}',{port})"
            ))
            .await?;
        info!(host = %primary.host, "registered primary with proxy");
    }
    run(proxy, &proxy_monitor_settings(primary)).await
}

/// Create the site's database and principal on the primary, then register
/// the principal with the proxy. Both endpoints are pinged before anything
/// is written.
pub async fn provision_site(
    connector: &dyn SqlConnector,
    primary: &DbEndpoint,
    proxy: &DbEndpoint,
    db: &SiteDatabase,
) -> Result<(), SqlError> {
    let mut primary_conn = open(connector, primary).await?;
    let mut proxy_conn = open(connector, proxy).await?;
    run(primary_conn.as_mut(), &create_on_primary(db)).await?;
    run(proxy_conn.as_mut(), &register_with_proxy(db)).await?;
    debug!(database = %db.name, "site database provisioned");
    Ok(())
}

/// Drop the site's database and principal, then deregister it from the
/// proxy when the namespace still has one.
pub async fn teardown_site(
    connector: &dyn SqlConnector,
    primary: &DbEndpoint,
    proxy: Option<&DbEndpoint>,
    db: &SiteDatabase,
) -> Result<(), SqlError> {
    let mut primary_conn = open(connector, primary).await?;
    run(primary_conn.as_mut(), &drop_on_primary(db)).await?;
    if let Some(proxy) = proxy {
        let mut proxy_conn = open(connector, proxy).await?;
        run(proxy_conn.as_mut(), &deregister_from_proxy(db)).await?;
    }
    info!(database = %db.name, "site database removed");
    Ok(())
}

/// Connect to the proxy admin interface and run [`bootstrap_proxy`].
pub async fn bootstrap(
    connector: &dyn SqlConnector,
    proxy: &DbEndpoint,
    primary: &DbEndpoint,
) -> Result<(), SqlError> {
    let mut conn = open(connector, proxy).await?;
    bootstrap_proxy(conn.as_mut(), primary).await
}
