//! Side effects outside the cluster: the primary MySQL database and the
//! per-namespace ProxySQL admin interface.

pub mod endpoints;
pub mod mysql;
pub mod provision;

use async_trait::async_trait;

pub use endpoints::{DbEndpoint, primary_endpoint, proxy_admin_endpoint};
pub use mysql::MySqlConnector;

/// MySQL `ER_CANNOT_USER`: the user already exists (create) or is already
/// gone (drop).
pub const ER_CANNOT_USER: u16 = 1396;
/// ProxySQL admin rejects most duplicate or missing rows with this code.
pub const ER_ACCESS_DENIED: u16 = 1045;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SqlError {
    pub fn code(&self) -> Option<u16> {
        match self {
            SqlError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, SqlError::Unreachable(_))
    }
}

/// One open session against a MySQL-protocol endpoint. Statements are sent
/// as plain text since the ProxySQL admin interface does not support
/// prepared statements.
#[async_trait]
pub trait SqlExecutor: Send {
    async fn ping(&mut self) -> Result<(), SqlError>;
    async fn execute(&mut self, sql: &str) -> Result<(), SqlError>;
    /// First column of the first row as an integer, for `COUNT(*)` queries.
    async fn query_count(&mut self, sql: &str) -> Result<i64, SqlError>;
}

#[async_trait]
pub trait SqlConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        endpoint: &DbEndpoint,
    ) -> Result<Box<dyn SqlExecutor>, SqlError>;
}

/// Escape a value for use inside single quotes. Only the quote itself is
/// doubled; the ProxySQL admin store treats backslashes literally.
pub fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_double_single_quotes() {
        assert_eq!(quote_literal("plain"), "plain");
        assert_eq!(quote_literal("it's"), "it''s");
    }
}
