//! Running builders against an [`Executor`].
//!
//! This is the only place a builder turns into I/O. Each call renders the
//! builder for the executor's dialect and sends the statement; the builder
//! itself is left untouched.

use super::builder::QueryBuilder;
use super::pagination::{CursorPage, CursorSpec, Page, cursor_page, offset_page};
use super::write::{DeleteStatement, InsertStatement, UpdateStatement};
use crate::db::executor::{Executor, Row};
use crate::error::{DbError, DbResult};
use crate::models::RenderedQuery;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Outcome of a write statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteResult {
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
    /// Rows produced by RETURNING / OUTPUT, where the backend supports it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Row>,
}

impl QueryBuilder {
    /// All matching rows.
    pub async fn many<E: Executor>(&self, executor: &E) -> DbResult<Vec<Row>> {
        let query = self.to_query(executor.dialect())?;
        executor.fetch_query(&query).await
    }

    /// All matching rows deserialized into `T`.
    pub async fn many_as<T: DeserializeOwned, E: Executor>(&self, executor: &E) -> DbResult<Vec<T>> {
        self.many(executor)
            .await?
            .into_iter()
            .map(deserialize_row)
            .collect()
    }

    /// First matching row, if any. A LIMIT 1 is applied unless the builder
    /// already carries a limit.
    pub async fn one<E: Executor>(&self, executor: &E) -> DbResult<Option<Row>> {
        let query = if self.limit.is_some() {
            self.clone()
        } else {
            self.clone().limit(1)
        };
        Ok(query.many(executor).await?.into_iter().next())
    }

    /// First matching row, or `ROW_NOT_FOUND`.
    pub async fn one_or_fail<E: Executor>(&self, executor: &E) -> DbResult<Row> {
        self.one(executor).await?.ok_or_else(|| {
            DbError::row_not_found(format!(
                "no row in {}",
                self.table_reference().unwrap_or("query")
            ))
        })
    }

    /// Number of rows the query matches, ignoring paging.
    pub async fn count<E: Executor>(&self, executor: &E) -> DbResult<u64> {
        let rows = self.count_query().many(executor).await?;
        Ok(rows.first().map(|row| count_value(row, "total")).unwrap_or(0))
    }

    pub async fn exists<E: Executor>(&self, executor: &E) -> DbResult<bool> {
        Ok(!self.exists_query().many(executor).await?.is_empty())
    }

    /// Values of one column across the matching rows.
    pub async fn pluck<E: Executor>(&self, executor: &E, column: &str) -> DbResult<Vec<JsonValue>> {
        let key = column.rsplit('.').next().unwrap_or(column).to_string();
        let rows = self.clone().reselect([column]).many(executor).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(&key).unwrap_or(JsonValue::Null))
            .collect())
    }

    /// Page `page` (1-based) of `per_page` rows plus the total count.
    pub async fn paginate<E: Executor>(
        &self,
        executor: &E,
        page: u64,
        per_page: u64,
    ) -> DbResult<Page<Row>> {
        let data = self.page_query(page, per_page)?.many(executor).await?;
        let total = self.count(executor).await?;
        Ok(offset_page(data, total, page, per_page))
    }

    /// The page after `cursor` (or the first page) in `spec` order.
    pub async fn cursor_paginate<E: Executor>(
        &self,
        executor: &E,
        spec: &CursorSpec,
        per_page: u64,
        cursor: Option<&str>,
    ) -> DbResult<CursorPage<Row>> {
        let rows = self
            .cursor_query(spec, per_page, cursor)?
            .many(executor)
            .await?;
        cursor_page(rows, spec, per_page)
    }

    /// Insert one row into this builder's table.
    pub async fn insert<E, I, K, V>(&self, executor: &E, row: I) -> DbResult<WriteResult>
    where
        E: Executor,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<crate::models::Value>,
    {
        self.insert_statement(row)?.execute(executor).await
    }

    /// Update the rows matched by this builder's filters.
    pub async fn update<E, I, K, V>(&self, executor: &E, values: I) -> DbResult<WriteResult>
    where
        E: Executor,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<crate::models::Value>,
    {
        self.update_statement(values)?.execute(executor).await
    }

    /// Delete the rows matched by this builder's filters.
    pub async fn delete<E: Executor>(&self, executor: &E) -> DbResult<WriteResult> {
        self.delete_statement()?.execute(executor).await
    }

    pub async fn truncate<E: Executor>(&self, executor: &E) -> DbResult<WriteResult> {
        let query = self.truncate_query(executor.dialect())?;
        run_write(executor, &query, false).await
    }
}

impl InsertStatement {
    pub async fn execute<E: Executor>(&self, executor: &E) -> DbResult<WriteResult> {
        let dialect = executor.dialect();
        run_write(executor, &self.to_query(dialect)?, self.returns_rows(dialect)).await
    }
}

impl UpdateStatement {
    pub async fn execute<E: Executor>(&self, executor: &E) -> DbResult<WriteResult> {
        let dialect = executor.dialect();
        run_write(executor, &self.to_query(dialect)?, self.returns_rows(dialect)).await
    }
}

impl DeleteStatement {
    pub async fn execute<E: Executor>(&self, executor: &E) -> DbResult<WriteResult> {
        let dialect = executor.dialect();
        run_write(executor, &self.to_query(dialect)?, self.returns_rows(dialect)).await
    }
}

async fn run_write<E: Executor>(
    executor: &E,
    query: &RenderedQuery,
    returns_rows: bool,
) -> DbResult<WriteResult> {
    if returns_rows {
        let rows = executor.fetch_query(query).await?;
        return Ok(WriteResult {
            rows_affected: rows.len() as u64,
            last_insert_id: None,
            rows,
        });
    }
    let result = executor.execute_query(query).await?;
    Ok(WriteResult {
        rows_affected: result.rows_affected,
        last_insert_id: result.last_insert_id,
        rows: Vec::new(),
    })
}

/// Deserialize a row into `T`, reporting the failure as a hydration error.
pub fn deserialize_row<T: DeserializeOwned>(row: Row) -> DbResult<T> {
    serde_json::from_value(JsonValue::Object(row)).map_err(|e| {
        DbError::hydration(std::any::type_name::<T>(), e.to_string())
    })
}

/// Read an integer count column. Some drivers report COUNT as a decimal
/// string.
pub(crate) fn count_value(row: &Row, key: &str) -> u64 {
    match row.get(key) {
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Some(JsonValue::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dialect, ExecResult, Value};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records statements and replays canned rows.
    struct Recorder {
        dialect: Dialect,
        rows: Vec<Row>,
        seen: Mutex<Vec<String>>,
    }

    impl Executor for Recorder {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        async fn fetch_rows(&self, sql: &str, _params: &[Value]) -> DbResult<Vec<Row>> {
            self.seen.lock().unwrap().push(sql.to_string());
            Ok(self.rows.clone())
        }

        async fn execute(&self, sql: &str, _params: &[Value]) -> DbResult<ExecResult> {
            self.seen.lock().unwrap().push(sql.to_string());
            Ok(ExecResult {
                rows_affected: 2,
                last_insert_id: Some(9),
            })
        }
    }

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[tokio::test]
    async fn test_count_reads_total_column() {
        let exec = Recorder {
            dialect: Dialect::Postgres,
            rows: vec![row(json!({"total": "12"}))],
            seen: Mutex::new(Vec::new()),
        };
        let total = QueryBuilder::table("users")
            .filter_eq("active", true)
            .limit(5)
            .count(&exec)
            .await
            .unwrap();
        assert_eq!(total, 12);
        assert_eq!(
            exec.seen.lock().unwrap()[0],
            r#"SELECT COUNT(*) AS "total" FROM "users" WHERE "active" = $1"#
        );
    }

    #[tokio::test]
    async fn test_write_uses_returning_rows() {
        let exec = Recorder {
            dialect: Dialect::Postgres,
            rows: vec![row(json!({"id": 1}))],
            seen: Mutex::new(Vec::new()),
        };
        let result = InsertStatement::new("users")
            .row([("name", "a")])
            .returning(["id"])
            .execute(&exec)
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.rows[0]["id"], json!(1));

        let mysql = Recorder {
            dialect: Dialect::MySql,
            rows: Vec::new(),
            seen: Mutex::new(Vec::new()),
        };
        let result = InsertStatement::new("users")
            .row([("name", "a")])
            .returning(["id"])
            .execute(&mysql)
            .await
            .unwrap();
        assert_eq!(result.last_insert_id, Some(9));
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_many_as_and_hydration_error() {
        #[derive(Debug, Deserialize)]
        struct User {
            id: i64,
        }
        let exec = Recorder {
            dialect: Dialect::Sqlite,
            rows: vec![row(json!({"id": 3}))],
            seen: Mutex::new(Vec::new()),
        };
        let users: Vec<User> = QueryBuilder::table("users").many_as(&exec).await.unwrap();
        assert_eq!(users[0].id, 3);

        let bad = Recorder {
            dialect: Dialect::Sqlite,
            rows: vec![row(json!({"id": "x"}))],
            seen: Mutex::new(Vec::new()),
        };
        let err = QueryBuilder::table("users")
            .many_as::<User, _>(&bad)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "HYDRATION_FAILED");
    }

    #[test]
    fn test_count_value_forms() {
        assert_eq!(count_value(&row(json!({"total": 4})), "total"), 4);
        assert_eq!(count_value(&row(json!({"total": "7"})), "total"), 7);
        assert_eq!(count_value(&row(json!({})), "total"), 0);
    }
}
