use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::{Connection, Executor, Row};
use tracing::{debug, instrument};

use super::{DbEndpoint, SqlConnector, SqlError, SqlExecutor};

/// Opens one short-lived connection per reconcile step.
#[derive(Clone, Debug)]
pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

fn options(endpoint: &DbEndpoint) -> Result<MySqlConnectOptions, SqlError> {
    let port = endpoint.port.parse::<u16>().map_err(|_| {
        SqlError::Config(format!("invalid port '{}'", endpoint.port))
    })?;
    // The ProxySQL admin interface only understands a small SQL dialect, so
    // skip the session setup statements sqlx sends by default.
    Ok(MySqlConnectOptions::new()
        .host(&endpoint.host)
        .port(port)
        .username(&endpoint.user)
        .password(&endpoint.password)
        .pipes_as_concat(false)
        .no_engine_substitution(false)
        .timezone(None)
        .set_names(false))
}

pub(crate) fn classify(err: sqlx::Error) -> SqlError {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            match db.try_downcast_ref::<MySqlDatabaseError>() {
                Some(my) => SqlError::Server {
                    code: my.number(),
                    message,
                },
                None => SqlError::Protocol(message),
            }
        }
        sqlx::Error::Io(e) => SqlError::Unreachable(e.to_string()),
        sqlx::Error::Tls(e) => SqlError::Unreachable(e.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            SqlError::Unreachable("no connection available".into())
        }
        sqlx::Error::Configuration(e) => SqlError::Config(e.to_string()),
        other => SqlError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl SqlConnector for MySqlConnector {
    #[instrument(skip_all, fields(host = %endpoint.host, port = %endpoint.port))]
    async fn connect(
        &self,
        endpoint: &DbEndpoint,
    ) -> Result<Box<dyn SqlExecutor>, SqlError> {
        let opts = options(endpoint)?;
        let conn = tokio::time::timeout(
            self.connect_timeout,
            MySqlConnection::connect_with(&opts),
        )
        .await
        .map_err(|_| {
            SqlError::Unreachable(format!(
                "connect to {}:{} timed out",
                endpoint.host, endpoint.port
            ))
        })?
        .map_err(classify)?;
        debug!("connected");
        Ok(Box::new(MySqlSession { conn }))
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl SqlExecutor for MySqlSession {
    async fn ping(&mut self) -> Result<(), SqlError> {
        self.conn.ping().await.map_err(|e| match classify(e) {
            SqlError::Protocol(m) => SqlError::Unreachable(m),
            other => other,
        })
    }

    async fn execute(&mut self, sql: &str) -> Result<(), SqlError> {
        self.conn
            .execute(sqlx::raw_sql(sql))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn query_count(&mut self, sql: &str) -> Result<i64, SqlError> {
        let row = self
            .conn
            .fetch_optional(sqlx::raw_sql(sql))
            .await
            .map_err(classify)?;
        let Some(row) = row else {
            return Ok(0);
        };
        // Text protocol: the admin interface reports counts as strings.
        let raw: String = row.try_get_unchecked(0).map_err(classify)?;
        raw.trim()
            .parse()
            .map_err(|_| SqlError::Protocol(format!("not a count: '{raw}'")))
    }
}
