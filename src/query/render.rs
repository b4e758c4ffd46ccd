//! Rendering of builders into SQL text plus bindings.
//!
//! A single [`SqlWriter`] is threaded through the whole statement so that
//! placeholder numbering stays consistent across CTEs, subqueries and
//! UNION members. Bindings are emitted in clause order: CTEs, SELECT list,
//! FROM subquery, JOIN, WHERE, HAVING, UNION members, ORDER BY. LIMIT and
//! OFFSET are rendered as integer literals.

use super::builder::{LockStrength, LockWait, OrderBy, QueryBuilder, Source, UnionKind};
use super::cte::{CteClause, CteMode};
use super::join::{JoinCondition, TableRef};
use super::predicate::{JsonPath, Op, Predicate, PredicateTree};
use super::projection::Projection;
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, RenderedQuery, Value};
use serde_json::Value as JsonValue;

/// MySQL has no offset-only form; this is the documented "all rows" limit.
const MYSQL_MAX_LIMIT: &str = "18446744073709551615";

/// Accumulates SQL text and bindings for one statement.
#[derive(Debug)]
pub struct SqlWriter {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub fn push_ident(&mut self, ident: &str) {
        let quoted = self.dialect.quote_identifier(ident);
        self.sql.push_str(&quoted);
    }

    /// Bind a value and emit its placeholder.
    pub fn push_param(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    /// Emit a raw fragment, turning each `?` outside string literals into
    /// the next placeholder. `??` emits a literal `?`; marks beyond the
    /// supplied params are kept verbatim.
    pub fn push_raw(&mut self, sql: &str, params: &[Value]) {
        let mut params = params.iter();
        let mut in_string = false;
        let mut chars = sql.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    in_string = !in_string;
                    self.sql.push(c);
                }
                '?' if !in_string => {
                    if chars.peek() == Some(&'?') {
                        chars.next();
                        self.sql.push('?');
                    } else if let Some(value) = params.next() {
                        self.push_param(value.clone());
                    } else {
                        self.sql.push('?');
                    }
                }
                _ => self.sql.push(c),
            }
        }
    }

    pub fn finish(self) -> RenderedQuery {
        RenderedQuery {
            sql: self.sql,
            params: self.params,
        }
    }
}

impl QueryBuilder {
    /// Render to SQL text and bindings for `dialect`. Performs no I/O.
    pub fn to_query(&self, dialect: Dialect) -> DbResult<RenderedQuery> {
        let mut w = SqlWriter::new(dialect);
        self.render_into(&mut w)?;
        Ok(w.finish())
    }

    /// Alias of [`QueryBuilder::to_query`].
    pub fn render(&self, dialect: Dialect) -> DbResult<RenderedQuery> {
        self.to_query(dialect)
    }

    pub(crate) fn render_into(&self, w: &mut SqlWriter) -> DbResult<()> {
        if let Some(ctes) = &self.ctes {
            render_ctes(ctes, w)?;
        }

        let use_top = w.dialect() == Dialect::Mssql
            && self.limit.is_some()
            && self.offset.is_none()
            && self.unions.is_empty();

        self.render_core(w, if use_top { self.limit } else { None })?;

        for (kind, other) in &self.unions {
            w.push(match kind {
                UnionKind::Distinct => " UNION ",
                UnionKind::All => " UNION ALL ",
            });
            other.render_core(w, None)?;
        }

        self.render_order_by(w);
        if !use_top {
            self.render_paging(w);
        }
        self.render_lock_suffix(w);
        Ok(())
    }

    /// SELECT ... FROM ... WHERE ... GROUP BY ... HAVING ...
    fn render_core(&self, w: &mut SqlWriter, top: Option<u64>) -> DbResult<()> {
        w.push("SELECT ");
        if self.distinct {
            if !self.distinct_on.is_empty() && w.dialect().supports_distinct_on() {
                w.push("DISTINCT ON (");
                push_ident_list(w, &self.distinct_on);
                w.push(") ");
            } else {
                w.push("DISTINCT ");
            }
        }
        if let Some(n) = top {
            w.push(&format!("TOP ({n}) "));
        }

        if self.projections.is_empty() {
            w.push("*");
        } else {
            for (i, projection) in self.projections.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                render_projection(projection, w)?;
            }
        }

        if let Some(source) = &self.source {
            w.push(" FROM ");
            match source {
                Source::Table(table) => {
                    push_table_ref(w, table);
                    self.render_table_hints(w);
                }
                Source::Subquery { query, alias } => {
                    w.push("(");
                    query.render_into(w)?;
                    w.push(") AS ");
                    w.push_ident(alias);
                }
            }
        }

        for join in &self.joins {
            w.push(" ");
            w.push(join.kind.as_sql());
            w.push(" ");
            push_table_ref(w, &join.table);
            if !join.conditions.is_empty() {
                w.push(" ON ");
                for (i, (connective, condition)) in join.conditions.iter().enumerate() {
                    if i > 0 {
                        w.push(" ");
                        w.push(connective.as_sql());
                        w.push(" ");
                    }
                    match condition {
                        JoinCondition::Columns { left, op, right } => {
                            w.push_ident(left);
                            w.push(" ");
                            w.push(op.as_sql());
                            w.push(" ");
                            w.push_ident(right);
                        }
                        JoinCondition::Value { column, op, value } => {
                            render_compare(w, column, *op, value.clone());
                        }
                    }
                }
            }
        }

        if !self.filters.is_empty() {
            w.push(" WHERE ");
            render_tree(&self.filters, w)?;
        }

        if !self.group_by.is_empty() {
            w.push(" GROUP BY ");
            push_ident_list(w, &self.group_by);
        }

        if !self.having.is_empty() {
            w.push(" HAVING ");
            render_tree(&self.having, w)?;
        }
        Ok(())
    }

    fn render_order_by(&self, w: &mut SqlWriter) {
        let mssql_paging = w.dialect() == Dialect::Mssql
            && (self.offset.is_some()
                || (self.limit.is_some() && !self.unions.is_empty()));

        if self.order_by.is_empty() {
            // OFFSET ... FETCH requires an ORDER BY
            if mssql_paging {
                w.push(" ORDER BY (SELECT NULL)");
            }
            return;
        }

        w.push(" ORDER BY ");
        push_order_items(w, &self.order_by);
    }

    fn render_paging(&self, w: &mut SqlWriter) {
        match w.dialect() {
            Dialect::Mssql => {
                if self.offset.is_some() || self.limit.is_some() {
                    w.push(&format!(" OFFSET {} ROWS", self.offset.unwrap_or(0)));
                    if let Some(limit) = self.limit {
                        w.push(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                    }
                }
            }
            dialect => {
                match (self.limit, self.offset) {
                    (Some(limit), _) => w.push(&format!(" LIMIT {limit}")),
                    (None, Some(_)) if dialect.is_mysql_family() => {
                        w.push(&format!(" LIMIT {MYSQL_MAX_LIMIT}"))
                    }
                    (None, Some(_)) if dialect == Dialect::Sqlite => w.push(" LIMIT -1"),
                    _ => {}
                }
                if let Some(offset) = self.offset {
                    w.push(&format!(" OFFSET {offset}"));
                }
            }
        }
    }

    /// SQL Server expresses row locks as table hints.
    fn render_table_hints(&self, w: &mut SqlWriter) {
        let (Dialect::Mssql, Some(lock)) = (w.dialect(), self.lock) else {
            return;
        };
        let mut hints = vec![match lock.strength {
            LockStrength::Update => "UPDLOCK",
            LockStrength::Share => "HOLDLOCK",
        }];
        hints.push("ROWLOCK");
        match lock.wait {
            LockWait::SkipLocked => hints.push("READPAST"),
            LockWait::NoWait => hints.push("NOWAIT"),
            LockWait::Wait => {}
        }
        w.push(&format!(" WITH ({})", hints.join(", ")));
    }

    fn render_lock_suffix(&self, w: &mut SqlWriter) {
        let Some(lock) = self.lock else {
            return;
        };
        let dialect = w.dialect();
        match dialect {
            // Locks are file-level on SQLite; SQL Server uses hints
            Dialect::Sqlite | Dialect::Mssql => return,
            Dialect::MariaDb if lock.strength == LockStrength::Share => {
                w.push(" LOCK IN SHARE MODE")
            }
            _ => w.push(match lock.strength {
                LockStrength::Update => " FOR UPDATE",
                LockStrength::Share => " FOR SHARE",
            }),
        }
        match lock.wait {
            LockWait::SkipLocked => w.push(" SKIP LOCKED"),
            LockWait::NoWait => w.push(" NOWAIT"),
            LockWait::Wait => {}
        }
    }
}

fn push_ident_list(w: &mut SqlWriter, idents: &[String]) {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_ident(ident);
    }
}

pub(crate) fn push_table_ref(w: &mut SqlWriter, table: &TableRef) {
    w.push_ident(&table.name);
    if let Some(alias) = &table.alias {
        w.push(" AS ");
        w.push_ident(alias);
    }
}

fn render_ctes(ctes: &CteClause, w: &mut SqlWriter) -> DbResult<()> {
    if ctes.entries.is_empty() {
        return Err(DbError::MustCallBuildCteAtLeastOnce);
    }
    w.push("WITH ");
    if ctes.mode == CteMode::Recursive {
        if let Some(keyword) = w.dialect().recursive_keyword() {
            w.push(keyword);
            w.push(" ");
        }
    }
    for (i, entry) in ctes.entries.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_ident(&entry.alias);
        if !entry.columns.is_empty() {
            w.push(" (");
            push_ident_list(w, &entry.columns);
            w.push(")");
        }
        w.push(" AS ");
        if ctes.mode == CteMode::Materialized && w.dialect().supports_materialized_cte() {
            w.push("MATERIALIZED ");
        }
        w.push("(");
        entry.query.render_into(w)?;
        w.push(")");
    }
    w.push(" ");
    Ok(())
}

fn render_projection(projection: &Projection, w: &mut SqlWriter) -> DbResult<()> {
    match projection {
        Projection::All => w.push("*"),
        Projection::Column { name, alias } => {
            w.push_ident(name);
            if let Some(alias) = alias {
                w.push(" AS ");
                w.push_ident(alias);
            }
        }
        Projection::Raw { sql, params, alias } => {
            w.push_raw(sql, params);
            if let Some(alias) = alias {
                w.push(" AS ");
                w.push_ident(alias);
            }
        }
        Projection::Json {
            column,
            path,
            alias,
        } => {
            let column_sql = w.dialect().quote_identifier(column);
            let extract = w.dialect().json_extract(&column_sql, path.segments(), true);
            w.push(&extract);
            w.push(" AS ");
            w.push_ident(alias);
        }
        Projection::Subquery { query, alias } => {
            w.push("(");
            query.render_into(w)?;
            w.push(") AS ");
            w.push_ident(alias);
        }
        Projection::RowNumber {
            partition_by,
            order_by,
            alias,
        } => {
            w.push("ROW_NUMBER() OVER (PARTITION BY ");
            w.push_ident(partition_by);
            if !order_by.is_empty() {
                w.push(" ORDER BY ");
                push_order_items(w, order_by);
            } else if w.dialect() == Dialect::Mssql {
                w.push(" ORDER BY (SELECT NULL)");
            }
            w.push(") AS ");
            w.push_ident(alias);
        }
    }
    Ok(())
}

fn push_order_items(w: &mut SqlWriter, items: &[OrderBy]) {
    for (i, order) in items.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        match order {
            OrderBy::Column { column, direction } => {
                w.push_ident(column);
                w.push(" ");
                w.push(direction.as_sql());
            }
            OrderBy::Raw { sql, params } => w.push_raw(sql, params),
        }
    }
}

/// Render a predicate tree without surrounding parentheses.
pub(crate) fn render_tree(tree: &PredicateTree, w: &mut SqlWriter) -> DbResult<()> {
    for (i, (connective, predicate)) in tree.nodes.iter().enumerate() {
        if i > 0 {
            w.push(" ");
            w.push(connective.as_sql());
            w.push(" ");
        }
        render_predicate(predicate, w)?;
    }
    Ok(())
}

fn render_compare(w: &mut SqlWriter, column: &str, op: Op, value: Value) {
    w.push_ident(column);
    match (op, value.is_null()) {
        (Op::Eq, true) => w.push(" IS NULL"),
        (Op::NotEq, true) => w.push(" IS NOT NULL"),
        _ => {
            w.push(" ");
            w.push(op.as_sql());
            w.push(" ");
            w.push_param(value);
        }
    }
}

fn render_predicate(predicate: &Predicate, w: &mut SqlWriter) -> DbResult<()> {
    let dialect = w.dialect();
    match predicate {
        Predicate::Compare { column, op, value } => render_compare(w, column, *op, value.clone()),
        Predicate::ColumnCompare { left, op, right } => {
            w.push_ident(left);
            w.push(" ");
            w.push(op.as_sql());
            w.push(" ");
            w.push_ident(right);
        }
        Predicate::In {
            column,
            values,
            negated,
        } => {
            if values.is_empty() {
                if dialect.empty_in_is_error() {
                    return Err(DbError::empty_where_in(column.clone(), dialect));
                }
                w.push(if *negated { "1 = 1" } else { "1 = 0" });
                return Ok(());
            }
            w.push_ident(column);
            w.push(if *negated { " NOT IN (" } else { " IN (" });
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_param(value.clone());
            }
            w.push(")");
        }
        Predicate::InSubquery {
            column,
            query,
            negated,
        } => {
            w.push_ident(column);
            w.push(if *negated { " NOT IN (" } else { " IN (" });
            query.render_into(w)?;
            w.push(")");
        }
        Predicate::Between {
            column,
            low,
            high,
            negated,
        } => {
            w.push_ident(column);
            w.push(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
            w.push_param(low.clone());
            w.push(" AND ");
            w.push_param(high.clone());
        }
        Predicate::Null { column, negated } => {
            w.push_ident(column);
            w.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Predicate::Like {
            column,
            pattern,
            negated,
            case_insensitive,
        } => {
            let not = if *negated { " NOT" } else { "" };
            if *case_insensitive && dialect.has_ilike() {
                w.push_ident(column);
                w.push(&format!("{not} ILIKE "));
                w.push_param(pattern.clone());
            } else if *case_insensitive {
                w.push("LOWER(");
                w.push_ident(column);
                w.push(&format!("){not} LIKE LOWER("));
                w.push_param(pattern.clone());
                w.push(")");
            } else {
                w.push_ident(column);
                w.push(&format!("{not} LIKE "));
                w.push_param(pattern.clone());
            }
        }
        Predicate::Json {
            column,
            path,
            op,
            value,
        } => render_json_compare(w, column, path, *op, value.clone()),
        Predicate::JsonContains {
            column,
            path,
            value,
        } => render_json_contains(w, column, path, value),
        Predicate::Exists { query, negated } => {
            w.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
            query.render_into(w)?;
            w.push(")");
        }
        Predicate::Count { query, op, value } => {
            w.push("(");
            query.render_into(w)?;
            w.push(") ");
            w.push(op.as_sql());
            w.push(" ");
            w.push_param(Value::Int(*value));
        }
        Predicate::Raw { sql, params } => {
            w.push("(");
            w.push_raw(sql, params);
            w.push(")");
        }
        Predicate::Group(tree) => {
            w.push("(");
            render_tree(tree, w)?;
            w.push(")");
        }
    }
    Ok(())
}

fn render_json_compare(w: &mut SqlWriter, column: &str, path: &JsonPath, op: Op, value: Value) {
    let dialect = w.dialect();
    let column_sql = dialect.quote_identifier(column);
    let extract = dialect.json_extract(&column_sql, path.segments(), true);

    if value.is_null() {
        w.push(&extract);
        w.push(if op == Op::NotEq { " IS NOT NULL" } else { " IS NULL" });
        return;
    }

    let (lhs, value) = match dialect {
        // `->>` yields text: cast for numeric and boolean comparisons
        Dialect::Postgres | Dialect::Cockroach => match value {
            Value::Int(_) | Value::Float(_) => (format!("({extract})::numeric"), value),
            Value::Bool(_) => (format!("({extract})::boolean"), value),
            other => (extract, other.into_text()),
        },
        // JSON_UNQUOTE/JSON_VALUE spell booleans as 'true'/'false'
        Dialect::MySql | Dialect::MariaDb | Dialect::Mssql => match value {
            Value::Bool(_) => (extract, value.into_text()),
            other => (extract, other),
        },
        Dialect::Sqlite => (extract, value),
    };
    w.push(&lhs);
    w.push(" ");
    w.push(op.as_sql());
    w.push(" ");
    w.push_param(value);
}

fn render_json_contains(w: &mut SqlWriter, column: &str, path: &JsonPath, value: &JsonValue) {
    let dialect = w.dialect();
    let column_sql = dialect.quote_identifier(column);
    match dialect {
        Dialect::Postgres | Dialect::Cockroach => {
            let target = dialect.json_extract(&column_sql, path.segments(), false);
            w.push(&format!("CAST({target} AS jsonb) @> "));
            w.push_param(Value::Json(value.clone()));
        }
        Dialect::MySql | Dialect::MariaDb => {
            w.push(&format!("JSON_CONTAINS({column_sql}, "));
            w.push_param(Value::Text(value.to_string()));
            if !path.is_empty() {
                w.push(", ");
                w.push(&crate::dialect::string_literal(
                    &crate::dialect::json_path_string(path.segments()),
                ));
            }
            w.push(")");
        }
        Dialect::Sqlite | Dialect::Mssql => {
            render_decomposed_contains(w, &column_sql, path, value);
        }
    }
}

/// Containment without a native operator: objects become a conjunction
/// over their leaves, arrays require each element to appear in the
/// array at `path`, scalars compare directly.
fn render_decomposed_contains(w: &mut SqlWriter, column_sql: &str, path: &JsonPath, value: &JsonValue) {
    let dialect = w.dialect();
    match value {
        JsonValue::Object(map) => {
            if map.is_empty() {
                w.push("1 = 1");
                return;
            }
            w.push("(");
            for (i, (key, child)) in map.iter().enumerate() {
                if i > 0 {
                    w.push(" AND ");
                }
                render_decomposed_contains(w, column_sql, &path.child(key), child);
            }
            w.push(")");
        }
        JsonValue::Array(items) => {
            if items.is_empty() {
                w.push("1 = 1");
                return;
            }
            let path_literal =
                crate::dialect::string_literal(&crate::dialect::json_path_string(path.segments()));
            w.push("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    w.push(" AND ");
                }
                match dialect {
                    Dialect::Mssql => w.push(&format!(
                        "EXISTS (SELECT 1 FROM OPENJSON({column_sql}, {path_literal}) WHERE [value] = "
                    )),
                    _ => w.push(&format!(
                        "EXISTS (SELECT 1 FROM json_each({column_sql}, {path_literal}) WHERE value = "
                    )),
                }
                w.push_param(scalar_param(dialect, item));
                w.push(")");
            }
            w.push(")");
        }
        JsonValue::Null => {
            let extract = dialect.json_extract(column_sql, path.segments(), true);
            w.push(&extract);
            w.push(" IS NULL");
        }
        scalar => {
            let extract = dialect.json_extract(column_sql, path.segments(), true);
            w.push(&extract);
            w.push(" = ");
            w.push_param(scalar_param(dialect, scalar));
        }
    }
}

fn scalar_param(dialect: Dialect, value: &JsonValue) -> Value {
    match (dialect, value) {
        (Dialect::Mssql, JsonValue::Bool(b)) => Value::Text(b.to_string()),
        (Dialect::Sqlite, JsonValue::Bool(b)) => Value::Int(i64::from(*b)),
        (_, JsonValue::Array(_) | JsonValue::Object(_)) => Value::Text(value.to_string()),
        (_, other) => Value::from_json(other),
    }
}
