//! Parameter binding utilities.
//!
//! Binds [`Value`]s to the query objects of each native client. NULL on
//! Postgres is bound with an unspecified type so the server infers it from
//! context (a text-typed NULL would be rejected by integer columns).
//! Uuid and timestamp values bind natively where the backend has the type
//! and as the text row decoding produces elsewhere.

use crate::models::Value;
use crate::models::value::naive_text;
use chrono::SecondsFormat;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Encode, MySql, Postgres, Sqlite, Type};

/// Untyped Postgres NULL (parameter type OID 0).
#[derive(Debug, Clone, Copy)]
pub(crate) struct PgNull;

impl Type<Postgres> for PgNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for PgNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Uuid(v) => query.bind(v.to_string()),
        Value::Timestamp(v) => query.bind(*v),
        Value::LocalTimestamp(v) => query.bind(*v),
        Value::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL (or CockroachDB) query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        Value::Null => query.bind(PgNull),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Uuid(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::LocalTimestamp(v) => query.bind(*v),
        Value::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Uuid(v) => query.bind(v.to_string()),
        // Stored as ISO-8601 text, which SQLite's date functions understand
        Value::Timestamp(v) => query.bind(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::LocalTimestamp(v) => query.bind(naive_text(v)),
        // SQLite doesn't have native JSON type, store as string
        Value::Json(v) => query.bind(v.to_string()),
    }
}

/// Bind a parameter to a SQL Server query.
pub(crate) fn bind_mssql_param<'a>(query: &mut tiberius::Query<'a>, param: &'a Value) {
    match param {
        Value::Null => query.bind(Option::<&str>::None),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Uuid(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(v.naive_utc()),
        Value::LocalTimestamp(v) => query.bind(*v),
        Value::Json(v) => query.bind(v.to_string()),
    }
}
