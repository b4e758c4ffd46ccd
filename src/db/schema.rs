//! Schema introspection.
//!
//! Read-only accessors over the database catalog for migration and admin
//! tooling: columns, indexes, foreign keys and primary keys of one table.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for
//! each catalog flavour. PostgreSQL, CockroachDB, MySQL, MariaDB and SQL
//! Server share `information_schema`; indexes come from each engine's own
//! catalog and SQLite is read through its `pragma_*` table functions.
//!
//! Table names may be schema-qualified (`audit.events`). Without a schema
//! the connection's current schema (database on MySQL) is used.

use crate::db::executor::{Executor, Row};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDefinition, Dialect, ForeignKey, ForeignKeyAction, IndexInfo, PrimaryKeyInfo, TableInfo,
    Value,
};
use serde_json::Value as JsonValue;
use tracing::debug;

/// Schema inspector for database introspection.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Names of the base tables in the current schema.
    pub async fn list_tables<E: Executor>(executor: &E) -> DbResult<Vec<String>> {
        let dialect = executor.dialect();
        let sql = match dialect {
            Dialect::Sqlite => queries::sqlite::LIST_TABLES.to_string(),
            Dialect::MySql | Dialect::MariaDb => format!(
                "{} WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name",
                queries::info_schema::LIST_TABLES
            ),
            _ => format!(
                "{} WHERE table_schema = {} AND table_type = 'BASE TABLE' ORDER BY table_name",
                queries::info_schema::LIST_TABLES,
                current_schema_expr(dialect)
            ),
        };
        let rows = executor.fetch_rows(&sql, &[]).await?;
        Ok(rows.iter().map(|row| text(row, "table_name")).collect())
    }

    /// Columns of `table`, with primary key flags and parsed defaults.
    pub async fn get_table_info<E: Executor>(executor: &E, table: &str) -> DbResult<TableInfo> {
        let dialect = executor.dialect();
        let (schema, name) = split_table(table);
        debug!(table = %table, dialect = %dialect, "Describing table");

        let rows = match dialect {
            Dialect::Sqlite => {
                executor
                    .fetch_rows(queries::sqlite::COLUMNS, &[Value::from(name)])
                    .await?
            }
            _ => {
                let (sql, params) = with_schema_filter(
                    dialect,
                    queries::info_schema::COLUMNS,
                    schema,
                    name,
                    "ORDER BY ordinal_position",
                );
                executor.fetch_rows(&sql, &params).await?
            }
        };
        if rows.is_empty() {
            return Err(DbError::row_not_found(format!("table '{table}' does not exist")));
        }

        let primary_key = match dialect {
            Dialect::Sqlite => None,
            _ => Self::get_primary_key_info(executor, table).await?,
        };
        let pk_columns = primary_key.map(|pk| pk.columns).unwrap_or_default();

        let mut info = TableInfo::new(name);
        if let Some(schema) = schema {
            info = info.with_schema(schema);
        }
        for row in &rows {
            let column = match dialect {
                Dialect::Sqlite => {
                    let mut col = ColumnDefinition::new(
                        text(row, "name"),
                        text(row, "type"),
                        !truthy(row.get("notnull")),
                    )
                    .with_primary_key(int(row, "pk") > 0);
                    if let Some(default) = opt_text(row, "dflt_value") {
                        col = col.with_default_str(&default);
                    }
                    col
                }
                _ => {
                    let name = text(row, "column_name");
                    let mut col = ColumnDefinition::new(
                        &name,
                        column_type(row),
                        text(row, "is_nullable").eq_ignore_ascii_case("YES"),
                    )
                    .with_primary_key(pk_columns.contains(&name));
                    if let Some(default) = opt_text(row, "column_default") {
                        col = col.with_default_str(&default);
                    }
                    col
                }
            };
            info = info.with_column(column);
        }
        Ok(info)
    }

    /// Indexes of `table`, one entry per index with columns in key order.
    pub async fn get_index_info<E: Executor>(executor: &E, table: &str) -> DbResult<Vec<IndexInfo>> {
        let dialect = executor.dialect();
        let (schema, name) = split_table(table);

        let rows = match dialect {
            Dialect::Sqlite => return sqlite_indexes(executor, name).await,
            Dialect::Postgres | Dialect::Cockroach => {
                let mut params = vec![Value::from(name)];
                let schema_sql = match schema {
                    Some(s) => {
                        params.push(Value::from(s));
                        "$2".to_string()
                    }
                    None => "current_schema()".to_string(),
                };
                let sql = queries::postgres::INDEXES.replace("{schema}", &schema_sql);
                executor.fetch_rows(&sql, &params).await?
            }
            Dialect::MySql | Dialect::MariaDb => {
                let (sql, params) = with_schema_filter(
                    dialect,
                    queries::mysql::INDEXES,
                    schema,
                    name,
                    "ORDER BY index_name, seq_in_index",
                );
                executor.fetch_rows(&sql, &params).await?
            }
            Dialect::Mssql => {
                executor
                    .fetch_rows(queries::mssql::INDEXES, &[Value::from(table)])
                    .await?
            }
        };

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let index_name = text(row, "index_name");
            let column = text(row, "column_name");
            match indexes.iter_mut().find(|i| i.name == index_name) {
                Some(index) => index.columns.push(column),
                None => {
                    let is_primary = match dialect {
                        Dialect::MySql | Dialect::MariaDb => index_name == "PRIMARY",
                        _ => truthy(row.get("is_primary")),
                    };
                    indexes.push(
                        IndexInfo::new(index_name, vec![column])
                            .with_unique(truthy(row.get("is_unique")))
                            .with_primary(is_primary),
                    );
                }
            }
        }
        Ok(indexes)
    }

    /// Outgoing foreign keys of `table`.
    pub async fn get_foreign_key_info<E: Executor>(
        executor: &E,
        table: &str,
    ) -> DbResult<Vec<ForeignKey>> {
        let dialect = executor.dialect();
        let (schema, name) = split_table(table);

        let rows = match dialect {
            Dialect::Sqlite => {
                executor
                    .fetch_rows(queries::sqlite::FOREIGN_KEYS, &[Value::from(name)])
                    .await?
            }
            Dialect::MySql | Dialect::MariaDb => {
                let (sql, params) = with_schema_filter(
                    dialect,
                    queries::mysql::FOREIGN_KEYS,
                    schema,
                    name,
                    "ORDER BY constraint_name, ordinal_position",
                );
                executor.fetch_rows(&sql, &params).await?
            }
            _ => {
                let (sql, params) = with_schema_filter(
                    dialect,
                    queries::info_schema::FOREIGN_KEYS,
                    schema,
                    name,
                    "ORDER BY constraint_name, ordinal_position",
                );
                executor.fetch_rows(&sql, &params).await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| {
                let fk = match dialect {
                    Dialect::Sqlite => ForeignKey::new(text(row, "from"), text(row, "table"), text(row, "to"))
                        .with_on_delete(ForeignKeyAction::parse(&text(row, "on_delete")))
                        .with_on_update(ForeignKeyAction::parse(&text(row, "on_update"))),
                    _ => ForeignKey::new(
                        text(row, "column_name"),
                        text(row, "ref_table"),
                        text(row, "ref_column"),
                    )
                    .with_name(text(row, "constraint_name"))
                    .with_on_delete(ForeignKeyAction::parse(&text(row, "delete_rule")))
                    .with_on_update(ForeignKeyAction::parse(&text(row, "update_rule"))),
                };
                fk
            })
            .collect())
    }

    /// Primary key constraint of `table`, `None` when it has none.
    pub async fn get_primary_key_info<E: Executor>(
        executor: &E,
        table: &str,
    ) -> DbResult<Option<PrimaryKeyInfo>> {
        let dialect = executor.dialect();
        let (schema, name) = split_table(table);

        if dialect == Dialect::Sqlite {
            let rows = executor
                .fetch_rows(queries::sqlite::COLUMNS, &[Value::from(name)])
                .await?;
            let mut keyed: Vec<(i64, String)> = rows
                .iter()
                .filter(|row| int(row, "pk") > 0)
                .map(|row| (int(row, "pk"), text(row, "name")))
                .collect();
            keyed.sort_by_key(|(position, _)| *position);
            if keyed.is_empty() {
                return Ok(None);
            }
            return Ok(Some(PrimaryKeyInfo {
                name: None,
                columns: keyed.into_iter().map(|(_, column)| column).collect(),
            }));
        }

        let (sql, params) = with_schema_filter(
            dialect,
            queries::info_schema::PRIMARY_KEY,
            schema,
            name,
            "ORDER BY kcu.ordinal_position",
        );
        let rows = executor.fetch_rows(&sql, &params).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(PrimaryKeyInfo {
            name: opt_text(&rows[0], "constraint_name"),
            columns: rows.iter().map(|row| text(row, "column_name")).collect(),
        }))
    }
}

async fn sqlite_indexes<E: Executor>(executor: &E, table: &str) -> DbResult<Vec<IndexInfo>> {
    let list = executor
        .fetch_rows(queries::sqlite::INDEX_LIST, &[Value::from(table)])
        .await?;
    let mut indexes = Vec::new();
    for row in &list {
        let name = text(row, "name");
        let columns: Vec<String> = executor
            .fetch_rows(queries::sqlite::INDEX_COLUMNS, &[Value::from(name.as_str())])
            .await?
            .iter()
            .map(|r| text(r, "name"))
            .collect();
        if !columns.is_empty() {
            indexes.push(
                IndexInfo::new(name, columns)
                    .with_unique(truthy(row.get("unique")))
                    .with_primary(text(row, "origin") == "pk"),
            );
        }
    }
    Ok(indexes)
}

// =============================================================================
// SQL Query Templates
// =============================================================================
//
// Centralized SQL queries for schema introspection. `{schema}` and `{table}`
// in the info_schema templates are filled with bind placeholders or the
// current-schema expression by `with_schema_filter`.

mod queries {
    pub mod info_schema {
        pub const LIST_TABLES: &str = "SELECT table_name AS table_name FROM information_schema.tables";

        pub const COLUMNS: &str = r#"
            SELECT
                column_name AS column_name,
                data_type AS data_type,
                character_maximum_length AS max_length,
                is_nullable AS is_nullable,
                column_default AS column_default
            FROM information_schema.columns
            WHERE table_schema = {schema} AND table_name = {table}
            "#;

        pub const PRIMARY_KEY: &str = r#"
            SELECT
                tc.constraint_name AS constraint_name,
                kcu.column_name AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON kcu.constraint_name = tc.constraint_name
                AND kcu.table_schema = tc.table_schema
                AND kcu.table_name = tc.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
            AND tc.table_schema = {schema} AND tc.table_name = {table}
            "#;

        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                rc.constraint_name AS constraint_name,
                kcu.column_name AS column_name,
                kcu.ordinal_position AS ordinal_position,
                ccu.table_name AS ref_table,
                ccu.column_name AS ref_column,
                rc.update_rule AS update_rule,
                rc.delete_rule AS delete_rule
            FROM information_schema.referential_constraints rc
            JOIN information_schema.key_column_usage kcu
                ON kcu.constraint_name = rc.constraint_name
                AND kcu.constraint_schema = rc.constraint_schema
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = rc.unique_constraint_name
                AND ccu.constraint_schema = rc.unique_constraint_schema
            WHERE kcu.table_schema = {schema} AND kcu.table_name = {table}
            "#;
    }

    pub mod postgres {
        pub const INDEXES: &str = r#"
            SELECT
                i.relname AS index_name,
                a.attname AS column_name,
                ix.indisunique AS is_unique,
                ix.indisprimary AS is_primary
            FROM pg_class t
            JOIN pg_index ix ON ix.indrelid = t.oid
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            WHERE t.relname = $1 AND n.nspname = {schema}
            ORDER BY i.relname, array_position(ix.indkey::int2[], a.attnum)
            "#;
    }

    pub mod mysql {
        pub const INDEXES: &str = r#"
            SELECT
                index_name AS index_name,
                column_name AS column_name,
                non_unique = 0 AS is_unique
            FROM information_schema.statistics
            WHERE table_schema = {schema} AND table_name = {table}
            "#;

        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                kcu.constraint_name AS constraint_name,
                kcu.column_name AS column_name,
                kcu.ordinal_position AS ordinal_position,
                kcu.referenced_table_name AS ref_table,
                kcu.referenced_column_name AS ref_column,
                rc.update_rule AS update_rule,
                rc.delete_rule AS delete_rule
            FROM information_schema.key_column_usage kcu
            JOIN information_schema.referential_constraints rc
                ON rc.constraint_name = kcu.constraint_name
                AND rc.constraint_schema = kcu.table_schema
            WHERE kcu.table_schema = {schema} AND kcu.table_name = {table}
            AND kcu.referenced_table_name IS NOT NULL
            "#;
    }

    pub mod mssql {
        pub const INDEXES: &str = r#"
            SELECT
                i.name AS index_name,
                c.name AS column_name,
                i.is_unique AS is_unique,
                i.is_primary_key AS is_primary
            FROM sys.indexes i
            JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
            JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
            WHERE i.object_id = OBJECT_ID(@P1) AND i.name IS NOT NULL
            ORDER BY i.name, ic.key_ordinal
            "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = "SELECT name AS table_name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";
        pub const COLUMNS: &str = "SELECT * FROM pragma_table_info(?)";
        pub const FOREIGN_KEYS: &str = "SELECT * FROM pragma_foreign_key_list(?)";
        pub const INDEX_LIST: &str = "SELECT * FROM pragma_index_list(?)";
        pub const INDEX_COLUMNS: &str = "SELECT * FROM pragma_index_info(?) ORDER BY seqno";
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn split_table(table: &str) -> (Option<&str>, &str) {
    match table.rsplit_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}

fn current_schema_expr(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql | Dialect::MariaDb => "DATABASE()",
        Dialect::Mssql => "SCHEMA_NAME()",
        _ => "current_schema()",
    }
}

/// Fill `{schema}`/`{table}` with placeholders (or the current-schema
/// expression) and append `suffix`.
fn with_schema_filter(
    dialect: Dialect,
    template: &str,
    schema: Option<&str>,
    table: &str,
    suffix: &str,
) -> (String, Vec<Value>) {
    let mut params = Vec::new();
    let schema_sql = match schema {
        Some(s) => {
            params.push(Value::from(s));
            dialect.placeholder(params.len())
        }
        None => current_schema_expr(dialect).to_string(),
    };
    params.push(Value::from(table));
    let table_sql = dialect.placeholder(params.len());
    let sql = format!(
        "{} {}",
        template
            .replace("{schema}", &schema_sql)
            .replace("{table}", &table_sql)
            .trim_end(),
        suffix
    );
    (sql, params)
}

fn column_type(row: &Row) -> String {
    let data_type = text(row, "data_type");
    match row.get("max_length").and_then(JsonValue::as_i64) {
        Some(len) if len > 0 && !data_type.contains('(') => format!("{data_type}({len})"),
        _ => data_type,
    }
}

fn opt_text(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn text(row: &Row, key: &str) -> String {
    opt_text(row, key).unwrap_or_default()
}

fn int(row: &Row, key: &str) -> i64 {
    match row.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(0),
        Some(JsonValue::String(s)) => s.parse().unwrap_or(0),
        Some(JsonValue::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

fn truthy(value: Option<&JsonValue>) -> bool {
    match value {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(JsonValue::String(s)) => matches!(s.as_str(), "1" | "t" | "true" | "YES"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_table() {
        assert_eq!(split_table("audit.events"), (Some("audit"), "events"));
        assert_eq!(split_table("users"), (None, "users"));
    }

    #[test]
    fn test_schema_filter_placeholders() {
        let (sql, params) = with_schema_filter(
            Dialect::Postgres,
            "SELECT 1 WHERE s = {schema} AND t = {table}",
            Some("public"),
            "users",
            "ORDER BY 1",
        );
        assert_eq!(sql, "SELECT 1 WHERE s = $1 AND t = $2 ORDER BY 1");
        assert_eq!(params.len(), 2);

        let (sql, params) = with_schema_filter(
            Dialect::Mssql,
            "SELECT 1 WHERE s = {schema} AND t = {table}",
            None,
            "users",
            "",
        );
        assert_eq!(sql.trim_end(), "SELECT 1 WHERE s = SCHEMA_NAME() AND t = @P1");
        assert_eq!(params, vec![Value::from("users")]);
    }

    #[test]
    fn test_column_type_with_length() {
        let mut row = Row::new();
        row.insert("data_type".into(), json!("character varying"));
        row.insert("max_length".into(), json!(30));
        assert_eq!(column_type(&row), "character varying(30)");
        row.insert("max_length".into(), JsonValue::Null);
        assert_eq!(column_type(&row), "character varying");
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(Some(&json!(true))));
        assert!(truthy(Some(&json!(1))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(None));
    }
}
