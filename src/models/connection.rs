//! Connection-related data models.
//!
//! This module defines the supported dialects and the configuration a
//! [`DataSource`](crate::db::DataSource) is created from.

use crate::config::{PoolOptions, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Supported SQL backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Cockroach,
    MySql,
    MariaDb,
    Sqlite,
    Mssql,
}

impl Dialect {
    /// All dialects, in a stable order.
    pub const ALL: [Dialect; 6] = [
        Dialect::Postgres,
        Dialect::Cockroach,
        Dialect::MySql,
        Dialect::MariaDb,
        Dialect::Sqlite,
        Dialect::Mssql,
    ];

    /// Parse the dialect from a connection URL scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("cockroach://") || lower.starts_with("cockroachdb://") {
            Some(Self::Cockroach)
        } else if lower.starts_with("mysql://") {
            Some(Self::MySql)
        } else if lower.starts_with("mariadb://") {
            Some(Self::MariaDb)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else if lower.starts_with("mssql://") || lower.starts_with("sqlserver://") {
            Some(Self::Mssql)
        } else {
            None
        }
    }

    /// Get the display name for this dialect.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Cockroach => "CockroachDB",
            Self::MySql => "MySQL",
            Self::MariaDb => "MariaDB",
            Self::Sqlite => "SQLite",
            Self::Mssql => "SQL Server",
        }
    }

    /// Get the default port for this dialect.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::Cockroach => Some(26257),
            Self::MySql | Self::MariaDb => Some(3306),
            Self::Sqlite => None,
            Self::Mssql => Some(1433),
        }
    }

    /// True for backends speaking the PostgreSQL wire protocol.
    pub fn is_postgres_family(&self) -> bool {
        matches!(self, Self::Postgres | Self::Cockroach)
    }

    /// True for backends speaking the MySQL wire protocol.
    pub fn is_mysql_family(&self) -> bool {
        matches!(self, Self::MySql | Self::MariaDb)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Configuration for a data source connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    pub dialect: Dialect,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// Database name extracted from the connection URL.
    pub database: Option<String>,
    #[serde(default)]
    pub pool_options: PoolOptions,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ConnectionConfig {
    /// Create a new connection configuration, detecting the dialect from the URL.
    pub fn new(
        id: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Result<Self, ConnectionConfigError> {
        let id = id.into();
        let connection_string = connection_string.into();

        if id.is_empty() {
            return Err(ConnectionConfigError::EmptyId);
        }
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConnectionConfigError::InvalidId(id));
        }

        let dialect = Dialect::from_connection_string(&connection_string)
            .ok_or_else(|| ConnectionConfigError::UnknownDialect(connection_string.clone()))?;

        Ok(Self {
            id,
            dialect,
            connection_string,
            database: None,
            pool_options: PoolOptions::default(),
            retry: RetryPolicy::default(),
        })
    }

    /// Set the pool options.
    pub fn with_pool_options(mut self, pool_options: PoolOptions) -> Self {
        self.pool_options = pool_options;
        self
    }

    /// Set the connect retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Connection string understood by the native driver.
    ///
    /// CockroachDB and MariaDB use the postgres and mysql drivers, so their
    /// schemes are rewritten.
    pub fn driver_connection_string(&self) -> String {
        let s = &self.connection_string;
        let rewrite = |prefixes: &[&str], replacement: &str| {
            prefixes
                .iter()
                .find(|p| s.to_lowercase().starts_with(*p))
                .map(|p| format!("{}{}", replacement, &s[p.len()..]))
        };
        match self.dialect {
            Dialect::Cockroach => {
                rewrite(&["cockroachdb://", "cockroach://"], "postgres://").unwrap_or_else(|| s.clone())
            }
            Dialect::MariaDb => rewrite(&["mariadb://"], "mysql://").unwrap_or_else(|| s.clone()),
            _ => s.clone(),
        }
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        let scheme_end = self
            .connection_string
            .find("://")
            .map(|p| p + 3)
            .unwrap_or(0);
        if let Some(at_pos) = self.connection_string.find('@') {
            if let Some(colon_pos) = self.connection_string[..at_pos].rfind(':') {
                if colon_pos >= scheme_end {
                    let prefix = &self.connection_string[..colon_pos + 1];
                    let suffix = &self.connection_string[at_pos..];
                    return format!("{}****{}", prefix, suffix);
                }
            }
        }
        self.connection_string.clone()
    }
}

/// Errors that can occur when creating a connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    #[error("Connection ID cannot be empty")]
    EmptyId,

    #[error("Connection ID contains invalid characters: {0}")]
    InvalidId(String),

    #[error("Unknown database dialect in connection string: {0}")]
    UnknownDialect(String),
}

/// Information about an established data source.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub dialect: Dialect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub replicas: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_connection_string() {
        assert_eq!(
            Dialect::from_connection_string("postgres://localhost/db"),
            Some(Dialect::Postgres)
        );
        assert_eq!(
            Dialect::from_connection_string("cockroachdb://root@localhost:26257/db"),
            Some(Dialect::Cockroach)
        );
        assert_eq!(
            Dialect::from_connection_string("mariadb://localhost/db"),
            Some(Dialect::MariaDb)
        );
        assert_eq!(
            Dialect::from_connection_string("sqlite::memory:"),
            Some(Dialect::Sqlite)
        );
        assert_eq!(
            Dialect::from_connection_string("sqlserver://sa:pw@localhost/master"),
            Some(Dialect::Mssql)
        );
        assert_eq!(Dialect::from_connection_string("redis://localhost"), None);
    }

    #[test]
    fn test_driver_connection_string_rewrites_scheme() {
        let config = ConnectionConfig::new("crdb", "cockroachdb://root@localhost:26257/app").unwrap();
        assert_eq!(
            config.driver_connection_string(),
            "postgres://root@localhost:26257/app"
        );

        let config = ConnectionConfig::new("maria", "mariadb://u:p@localhost/app").unwrap();
        assert_eq!(config.driver_connection_string(), "mysql://u:p@localhost/app");
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert!(matches!(
            ConnectionConfig::new("", "sqlite::memory:"),
            Err(ConnectionConfigError::EmptyId)
        ));
        assert!(matches!(
            ConnectionConfig::new("bad id", "sqlite::memory:"),
            Err(ConnectionConfigError::InvalidId(_))
        ));
    }

    #[test]
    fn test_masked_connection_string() {
        let config = ConnectionConfig::new("pg", "postgres://admin:secret@db:5432/app").unwrap();
        assert_eq!(
            config.masked_connection_string(),
            "postgres://admin:****@db:5432/app"
        );
    }
}
