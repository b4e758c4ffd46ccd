//! Per-dialect rendering rules.
//!
//! Everything that differs between backends at the SQL text level lives
//! here: placeholder style, identifier quoting, literal forms, transaction
//! and savepoint statements, JSON extraction and the advisory-lock
//! primitives. All functions are pure; the only input besides their
//! arguments is the [`Dialect`] value itself.

use crate::db::transaction::IsolationLevel;
use crate::models::{Dialect, RenderedQuery, Value};
use crate::query::JsonSegment;

/// Statement kinds that differ in RETURNING support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
}

impl Dialect {
    /// Placeholder for the `n`-th bound parameter (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Postgres | Dialect::Cockroach => format!("${n}"),
            Dialect::MySql | Dialect::MariaDb | Dialect::Sqlite => "?".to_string(),
            Dialect::Mssql => format!("@P{n}"),
        }
    }

    /// Quote an identifier, segment by segment for dotted names.
    ///
    /// Only plain identifiers are quoted. Anything else (expressions,
    /// already-quoted names, `*`) passes through unchanged: loom never
    /// validates SQL text and leaves that to the database.
    pub fn quote_identifier(&self, ident: &str) -> String {
        if !is_plain_identifier(ident) {
            return ident.to_string();
        }
        ident
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    segment.to_string()
                } else {
                    self.quote_segment(segment)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn quote_segment(&self, segment: &str) -> String {
        match self {
            Dialect::MySql | Dialect::MariaDb => format!("`{segment}`"),
            Dialect::Mssql => format!("[{segment}]"),
            _ => format!("\"{segment}\""),
        }
    }

    /// Boolean literal as the backend spells it.
    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self.is_postgres_family(), value) {
            (true, true) => "TRUE",
            (true, false) => "FALSE",
            (false, true) => "1",
            (false, false) => "0",
        }
    }

    /// Whether the statement kind accepts a RETURNING (or OUTPUT) clause.
    pub fn supports_returning(&self, kind: StatementKind) -> bool {
        match self {
            Dialect::Postgres | Dialect::Cockroach | Dialect::Sqlite | Dialect::Mssql => true,
            Dialect::MariaDb => matches!(kind, StatementKind::Insert | StatementKind::Delete),
            Dialect::MySql => false,
        }
    }

    /// Native case-insensitive LIKE operator.
    pub fn has_ilike(&self) -> bool {
        self.is_postgres_family()
    }

    pub fn supports_distinct_on(&self) -> bool {
        self.is_postgres_family()
    }

    /// `WITH x AS MATERIALIZED (...)` support.
    pub fn supports_materialized_cte(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Cockroach | Dialect::Sqlite)
    }

    /// T-SQL has no RECURSIVE keyword: every CTE may self-reference.
    pub fn recursive_keyword(&self) -> Option<&'static str> {
        match self {
            Dialect::Mssql => None,
            _ => Some("RECURSIVE"),
        }
    }

    /// SQL Server rejects `IN ()`; every other backend renders `1 = 0`.
    pub fn empty_in_is_error(&self) -> bool {
        matches!(self, Dialect::Mssql)
    }

    /// Expression for the current timestamp, used by soft deletes.
    pub fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    /// Statements opening a transaction.
    pub fn begin_statements(&self, isolation: Option<IsolationLevel>) -> Vec<String> {
        match (self, isolation) {
            (Dialect::Postgres | Dialect::Cockroach, Some(level)) => {
                vec![format!("BEGIN ISOLATION LEVEL {}", level.as_sql())]
            }
            (Dialect::Postgres | Dialect::Cockroach, None) => vec!["BEGIN".to_string()],
            (Dialect::MySql | Dialect::MariaDb, Some(level)) => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()),
                "START TRANSACTION".to_string(),
            ],
            (Dialect::MySql | Dialect::MariaDb, None) => vec!["START TRANSACTION".to_string()],
            // SQLite is always serializable
            (Dialect::Sqlite, _) => vec!["BEGIN".to_string()],
            (Dialect::Mssql, Some(level)) => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()),
                "BEGIN TRANSACTION".to_string(),
            ],
            (Dialect::Mssql, None) => vec!["BEGIN TRANSACTION".to_string()],
        }
    }

    pub fn commit_statement(&self) -> &'static str {
        match self {
            Dialect::Mssql => "COMMIT TRANSACTION",
            _ => "COMMIT",
        }
    }

    pub fn rollback_statement(&self) -> &'static str {
        match self {
            Dialect::Mssql => "ROLLBACK TRANSACTION",
            _ => "ROLLBACK",
        }
    }

    pub fn savepoint_statement(&self, name: &str) -> String {
        match self {
            Dialect::Mssql => format!("SAVE TRANSACTION {name}"),
            _ => format!("SAVEPOINT {name}"),
        }
    }

    /// `None` where the backend has no savepoint release (SQL Server).
    pub fn release_savepoint_statement(&self, name: &str) -> Option<String> {
        match self {
            Dialect::Mssql => None,
            _ => Some(format!("RELEASE SAVEPOINT {name}")),
        }
    }

    pub fn rollback_to_savepoint_statement(&self, name: &str) -> String {
        match self {
            Dialect::Mssql => format!("ROLLBACK TRANSACTION {name}"),
            _ => format!("ROLLBACK TO SAVEPOINT {name}"),
        }
    }

    /// Scalar extraction of a JSON path from a rendered column expression.
    ///
    /// Postgres-family extraction yields `text` when `as_text` is set and
    /// `jsonb` otherwise; the other backends always return a scalar.
    pub fn json_extract(&self, column_sql: &str, path: &[JsonSegment], as_text: bool) -> String {
        match self {
            Dialect::Postgres | Dialect::Cockroach => {
                if path.is_empty() {
                    return column_sql.to_string();
                }
                let mut sql = column_sql.to_string();
                let last = path.len() - 1;
                for (i, segment) in path.iter().enumerate() {
                    sql.push_str(if as_text && i == last { "->>" } else { "->" });
                    match segment {
                        JsonSegment::Key(key) => sql.push_str(&string_literal(key)),
                        JsonSegment::Index(idx) => sql.push_str(&idx.to_string()),
                    }
                }
                sql
            }
            Dialect::MySql | Dialect::MariaDb => {
                let extract = format!(
                    "JSON_EXTRACT({}, {})",
                    column_sql,
                    string_literal(&json_path_string(path))
                );
                if as_text {
                    format!("JSON_UNQUOTE({extract})")
                } else {
                    extract
                }
            }
            Dialect::Sqlite => format!(
                "json_extract({}, {})",
                column_sql,
                string_literal(&json_path_string(path))
            ),
            Dialect::Mssql => format!(
                "JSON_VALUE({}, {})",
                column_sql,
                string_literal(&json_path_string(path))
            ),
        }
    }

    /// Try-acquire statement for an advisory lock, `None` where the engine
    /// has no advisory locks (SQLite is locked at the file level).
    ///
    /// The statement returns a single column `locked`; see [`lock_acquired`].
    pub fn advisory_lock_statement(&self, key: &str) -> Option<RenderedQuery> {
        match self {
            Dialect::Postgres | Dialect::Cockroach => Some(RenderedQuery::new(
                "SELECT pg_try_advisory_lock($1) AS locked",
                vec![Value::Int(lock_key_hash(key))],
            )),
            Dialect::MySql | Dialect::MariaDb => Some(RenderedQuery::new(
                "SELECT GET_LOCK(?, 0) AS locked",
                vec![Value::Text(key.to_string())],
            )),
            Dialect::Mssql => Some(RenderedQuery::new(
                "DECLARE @result INT; \
                 EXEC @result = sp_getapplock @Resource = @P1, @LockMode = 'Exclusive', \
                 @LockOwner = 'Session', @LockTimeout = 0; \
                 SELECT @result AS locked",
                vec![Value::Text(key.to_string())],
            )),
            Dialect::Sqlite => None,
        }
    }

    /// Release statement matching [`Dialect::advisory_lock_statement`].
    pub fn advisory_unlock_statement(&self, key: &str) -> Option<RenderedQuery> {
        match self {
            Dialect::Postgres | Dialect::Cockroach => Some(RenderedQuery::new(
                "SELECT pg_advisory_unlock($1) AS released",
                vec![Value::Int(lock_key_hash(key))],
            )),
            Dialect::MySql | Dialect::MariaDb => Some(RenderedQuery::new(
                "SELECT RELEASE_LOCK(?) AS released",
                vec![Value::Text(key.to_string())],
            )),
            Dialect::Mssql => Some(RenderedQuery::new(
                "EXEC sp_releaseapplock @Resource = @P1, @LockOwner = 'Session'",
                vec![Value::Text(key.to_string())],
            )),
            Dialect::Sqlite => None,
        }
    }

    /// Interpret the `locked` column returned by the try-acquire statement.
    ///
    /// Postgres returns a boolean, MySQL `1`/`0`/`NULL`, and
    /// `sp_getapplock` a status code that is non-negative on success.
    pub fn lock_acquired(&self, value: &serde_json::Value) -> bool {
        match value {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => match self {
                Dialect::Mssql => n.as_i64().is_some_and(|v| v >= 0),
                _ => n.as_i64() == Some(1),
            },
            serde_json::Value::String(s) => s == "1" || s.eq_ignore_ascii_case("t"),
            _ => false,
        }
    }
}

/// Stable 64-bit FNV-1a hash of an advisory-lock key, as a signed bigint.
pub fn lock_key_hash(key: &str) -> i64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash as i64
}

/// True for `name`, `schema.name`, `alias.*` style identifiers.
pub fn is_plain_identifier(ident: &str) -> bool {
    if ident.is_empty() {
        return false;
    }
    let segments: Vec<&str> = ident.split('.').collect();
    let last = segments.len() - 1;
    segments.iter().enumerate().all(|(i, segment)| {
        if *segment == "*" {
            return i == last && last > 0;
        }
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    })
}

/// Single-quoted SQL string literal.
pub fn string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// `$.a.b[0]` path string understood by MySQL, SQLite and SQL Server.
pub fn json_path_string(path: &[JsonSegment]) -> String {
    let mut out = String::from("$");
    for segment in path {
        match segment {
            JsonSegment::Key(key) if is_plain_identifier(key) && !key.contains('.') => {
                out.push('.');
                out.push_str(key);
            }
            JsonSegment::Key(key) => {
                out.push_str(".\"");
                out.push_str(&key.replace('"', "\\\""));
                out.push('"');
            }
            JsonSegment::Index(idx) => {
                out.push('[');
                out.push_str(&idx.to_string());
                out.push(']');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(keys: &[&str]) -> Vec<JsonSegment> {
        keys.iter().map(|k| JsonSegment::Key(k.to_string())).collect()
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Cockroach.placeholder(1), "$1");
        assert_eq!(Dialect::MySql.placeholder(3), "?");
        assert_eq!(Dialect::Sqlite.placeholder(1), "?");
        assert_eq!(Dialect::Mssql.placeholder(2), "@P2");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(Dialect::Postgres.quote_identifier("users.id"), "\"users\".\"id\"");
        assert_eq!(Dialect::MySql.quote_identifier("users"), "`users`");
        assert_eq!(Dialect::Mssql.quote_identifier("dbo.users"), "[dbo].[users]");
        assert_eq!(Dialect::Sqlite.quote_identifier("u.*"), "\"u\".*");
        // Expressions pass through untouched
        assert_eq!(Dialect::Postgres.quote_identifier("COUNT(*)"), "COUNT(*)");
        assert_eq!(Dialect::Postgres.quote_identifier("*"), "*");
    }

    #[test]
    fn test_returning_support() {
        assert!(Dialect::Postgres.supports_returning(StatementKind::Update));
        assert!(Dialect::MariaDb.supports_returning(StatementKind::Insert));
        assert!(!Dialect::MariaDb.supports_returning(StatementKind::Update));
        assert!(!Dialect::MySql.supports_returning(StatementKind::Insert));
    }

    #[test]
    fn test_bool_literals() {
        assert_eq!(Dialect::Postgres.bool_literal(true), "TRUE");
        assert_eq!(Dialect::MySql.bool_literal(false), "0");
        assert_eq!(Dialect::Mssql.bool_literal(true), "1");
    }

    #[test]
    fn test_json_extract() {
        let p = path(&["address", "city"]);
        assert_eq!(
            Dialect::Postgres.json_extract("\"meta\"", &p, true),
            "\"meta\"->'address'->>'city'"
        );
        assert_eq!(
            Dialect::MySql.json_extract("`meta`", &p, true),
            "JSON_UNQUOTE(JSON_EXTRACT(`meta`, '$.address.city'))"
        );
        assert_eq!(
            Dialect::Sqlite.json_extract("\"meta\"", &p, true),
            "json_extract(\"meta\", '$.address.city')"
        );
        assert_eq!(
            Dialect::Mssql.json_extract("[meta]", &p, true),
            "JSON_VALUE([meta], '$.address.city')"
        );
    }

    #[test]
    fn test_json_path_string_quotes_odd_keys() {
        let p = vec![
            JsonSegment::Key("first name".into()),
            JsonSegment::Index(2),
        ];
        assert_eq!(json_path_string(&p), "$.\"first name\"[2]");
    }

    #[test]
    fn test_lock_key_hash_is_stable() {
        assert_eq!(lock_key_hash("jobs"), lock_key_hash("jobs"));
        assert_ne!(lock_key_hash("jobs"), lock_key_hash("jobs2"));
        // FNV-1a of the empty string is the offset basis
        assert_eq!(lock_key_hash(""), 0xcbf2_9ce4_8422_2325_u64 as i64);
    }

    #[test]
    fn test_lock_statements() {
        assert!(Dialect::Sqlite.advisory_lock_statement("k").is_none());
        let stmt = Dialect::MySql.advisory_lock_statement("k").unwrap();
        assert_eq!(stmt.sql, "SELECT GET_LOCK(?, 0) AS locked");
        let stmt = Dialect::Postgres.advisory_lock_statement("k").unwrap();
        assert_eq!(stmt.params, vec![Value::Int(lock_key_hash("k"))]);
    }

    #[test]
    fn test_lock_acquired() {
        assert!(Dialect::Postgres.lock_acquired(&serde_json::json!(true)));
        assert!(Dialect::MySql.lock_acquired(&serde_json::json!(1)));
        assert!(!Dialect::MySql.lock_acquired(&serde_json::json!(0)));
        assert!(!Dialect::MySql.lock_acquired(&serde_json::Value::Null));
        assert!(Dialect::Mssql.lock_acquired(&serde_json::json!(1)));
        assert!(!Dialect::Mssql.lock_acquired(&serde_json::json!(-1)));
    }

    #[test]
    fn test_savepoint_statements() {
        assert_eq!(Dialect::Postgres.savepoint_statement("sp_1"), "SAVEPOINT sp_1");
        assert_eq!(Dialect::Mssql.savepoint_statement("sp_1"), "SAVE TRANSACTION sp_1");
        assert!(Dialect::Mssql.release_savepoint_statement("sp_1").is_none());
        assert_eq!(
            Dialect::MySql.begin_statements(Some(IsolationLevel::Serializable)),
            vec![
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE".to_string(),
                "START TRANSACTION".to_string()
            ]
        );
    }
}
