//! Statement execution.
//!
//! [`Executor`] is the seam every query path runs through: a
//! [`DataSource`](crate::db::DataSource), a checked-out [`Connection`] and a
//! [`Transaction`](crate::db::Transaction) all implement it, so builders and
//! model queries never care which one they were handed.
//!
//! # Architecture
//!
//! Per-backend execution lives in submodules with identical shapes:
//! - `mysql`: MySQL and MariaDB
//! - `postgres`: PostgreSQL and CockroachDB
//! - `sqlite`: SQLite
//!
//! SQL Server runs through [`MssqlConnection`](crate::db::mssql::MssqlConnection).

use crate::db::mssql::MssqlConnection;
use crate::db::types::{JsonRow, RowToJson};
use crate::error::DbResult;
use crate::models::{Dialect, ExecResult, RenderedQuery, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

/// One decoded result row, keyed by column name.
pub type Row = JsonRow;

/// Something statements can be sent to.
///
/// Statements sent to the same executor run strictly in issuance order.
pub trait Executor: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run a statement that produces rows.
    fn fetch_rows(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Run a statement for its side effects.
    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbResult<ExecResult>> + Send;

    fn fetch_query(
        &self,
        query: &RenderedQuery,
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send {
        self.fetch_rows(&query.sql, &query.params)
    }

    fn execute_query(
        &self,
        query: &RenderedQuery,
    ) -> impl Future<Output = DbResult<ExecResult>> + Send {
        self.execute(&query.sql, &query.params)
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn fetch_rows(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send {
        (**self).fetch_rows(sql, params)
    }

    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbResult<ExecResult>> + Send {
        (**self).execute(sql, params)
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn fetch_rows(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send {
        (**self).fetch_rows(sql, params)
    }

    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbResult<ExecResult>> + Send {
        (**self).execute(sql, params)
    }
}

/// A connection checked out of one of the backend pools.
#[derive(Debug)]
pub(crate) enum PooledConnection {
    MySql(sqlx::pool::PoolConnection<sqlx::MySql>),
    Postgres(sqlx::pool::PoolConnection<sqlx::Postgres>),
    Sqlite(sqlx::pool::PoolConnection<sqlx::Sqlite>),
    Mssql(MssqlConnection),
}

impl PooledConnection {
    pub(crate) async fn fetch_rows(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let start = Instant::now();
        let rows = match self {
            PooledConnection::MySql(conn) => mysql::fetch_rows(conn, sql, params).await?,
            PooledConnection::Postgres(conn) => postgres::fetch_rows(conn, sql, params).await?,
            PooledConnection::Sqlite(conn) => sqlite::fetch_rows(conn, sql, params).await?,
            PooledConnection::Mssql(conn) => conn.fetch_rows(sql, params).await?,
        };
        debug!(
            sql = %sql,
            params = ?params,
            elapsed_ms = start.elapsed().as_millis() as u64,
            rows = rows.len(),
            "Fetched rows"
        );
        Ok(rows)
    }

    pub(crate) async fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<ExecResult> {
        let start = Instant::now();
        let result = match self {
            PooledConnection::MySql(conn) => mysql::execute(conn, sql, params).await?,
            PooledConnection::Postgres(conn) => postgres::execute(conn, sql, params).await?,
            PooledConnection::Sqlite(conn) => sqlite::execute(conn, sql, params).await?,
            PooledConnection::Mssql(conn) => conn.execute(sql, params).await?,
        };
        debug!(
            sql = %sql,
            params = ?params,
            elapsed_ms = start.elapsed().as_millis() as u64,
            rows = result.rows_affected,
            "Executed statement"
        );
        Ok(result)
    }
}

/// A single pooled connection held for the lifetime of this value.
///
/// Useful when several statements must share session state (temporary
/// tables, session variables). Returned to the pool on drop.
#[derive(Debug)]
pub struct Connection {
    dialect: Dialect,
    inner: Mutex<PooledConnection>,
}

impl Connection {
    pub(crate) fn new(dialect: Dialect, inner: PooledConnection) -> Self {
        Self {
            dialect,
            inner: Mutex::new(inner),
        }
    }

    pub(crate) fn into_inner(self) -> PooledConnection {
        self.inner.into_inner()
    }
}

impl Executor for Connection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch_rows(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.inner.lock().await.fetch_rows(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<ExecResult> {
        self.inner.lock().await.execute(sql, params).await
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// Statements without parameters run unprepared, which also lets statements
// the prepared protocol refuses (transaction control, DDL batches) through.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::MySqlConnection;
    use sqlx::mysql::MySqlRow;

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<Row>> {
        let rows: Vec<MySqlRow> = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(conn).await?
        };
        let last_insert_id = result.last_insert_id();
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: (last_insert_id > 0).then_some(last_insert_id as i64),
        })
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::PgConnection;
    use sqlx::postgres::PgRow;

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<Row>> {
        let rows: Vec<PgRow> = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.execute(conn).await?
        };
        // generated keys come back through RETURNING
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::SqliteConnection;
    use sqlx::sqlite::SqliteRow;

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<Row>> {
        let rows: Vec<SqliteRow> = if params.is_empty() {
            use sqlx::Executor;
            conn.fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch_all(conn).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            conn.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(conn).await?
        };
        let last_insert_id = result.last_insert_rowid();
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: (result.rows_affected() > 0 && last_insert_id > 0)
                .then_some(last_insert_id),
        })
    }
}
