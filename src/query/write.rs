//! INSERT / UPDATE / DELETE / TRUNCATE statements and upserts.
//!
//! Write statements reuse the WHERE tree of a [`QueryBuilder`]; joins,
//! ordering and table aliases of the builder are not rendered. RETURNING
//! columns are rendered only where the backend accepts them (`OUTPUT` on
//! SQL Server); elsewhere callers fall back to affected-row counts and the
//! last insert id.

use super::builder::QueryBuilder;
use super::join::TableRef;
use super::predicate::{PredicateTree, SoftDelete, SoftDeleteKind};
use super::render::{SqlWriter, render_tree};
use crate::dialect::StatementKind;
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, RenderedQuery, Value};

/// Right-hand side of a `SET column = ...` assignment.
#[derive(Debug, Clone)]
pub enum Assignment {
    Value(Value),
    /// Raw expression; `?` marks bind `params`.
    Raw { sql: String, params: Vec<Value> },
    CurrentTimestamp,
    /// Boolean literal spelled the way the backend expects.
    Flag(bool),
}

impl Assignment {
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Assignment::Raw {
            sql: sql.into(),
            params,
        }
    }

    fn render(&self, w: &mut SqlWriter) {
        match self {
            Assignment::Value(v) => w.push_param(v.clone()),
            Assignment::Raw { sql, params } => w.push_raw(sql, params),
            Assignment::CurrentTimestamp => {
                let ts = w.dialect().current_timestamp();
                w.push(ts);
            }
            Assignment::Flag(b) => {
                let literal = w.dialect().bool_literal(*b);
                w.push(literal);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    DoNothing,
    /// Overwrite these columns from the proposed row. Empty means every
    /// inserted column outside the conflict target.
    Update(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnConflict {
    pub target: Vec<String>,
    pub action: ConflictAction,
}

/// Multi-row INSERT, optionally an upsert.
///
/// The column list is the union of every row's columns in first-seen
/// order; cells missing from a row are bound as NULL.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    table: TableRef,
    columns: Vec<String>,
    rows: Vec<Vec<(String, Value)>>,
    returning: Vec<String>,
    on_conflict: Option<OnConflict>,
}

impl InsertStatement {
    pub fn new(table: &str) -> Self {
        Self {
            table: TableRef::parse(table),
            columns: Vec::new(),
            rows: Vec::new(),
            returning: Vec::new(),
            on_conflict: None,
        }
    }

    pub fn row<I, K, V>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let row: Vec<(String, Value)> = row.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        for (column, _) in &row {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
        self.rows.push(row);
        self
    }

    pub fn rows<R, I, K, V>(self, rows: R) -> Self
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        rows.into_iter().fold(self, |stmt, row| stmt.row(row))
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_conflict_do_nothing<I, S>(mut self, target: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_conflict = Some(OnConflict {
            target: target.into_iter().map(Into::into).collect(),
            action: ConflictAction::DoNothing,
        });
        self
    }

    pub fn on_conflict_update<I, S, U, T>(mut self, target: I, update: U) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        U: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.on_conflict = Some(OnConflict {
            target: target.into_iter().map(Into::into).collect(),
            action: ConflictAction::Update(update.into_iter().map(Into::into).collect()),
        });
        self
    }

    pub fn table(&self) -> &str {
        &self.table.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether the rendered statement produces a result set.
    pub fn returns_rows(&self, dialect: Dialect) -> bool {
        !self.returning.is_empty() && dialect.supports_returning(StatementKind::Insert)
    }

    fn update_columns(&self) -> Vec<String> {
        match &self.on_conflict {
            Some(OnConflict {
                action: ConflictAction::Update(cols),
                target,
            }) => {
                if cols.is_empty() {
                    self.columns
                        .iter()
                        .filter(|c| !target.contains(c))
                        .cloned()
                        .collect()
                } else {
                    cols.clone()
                }
            }
            _ => Vec::new(),
        }
    }

    fn push_values(&self, w: &mut SqlWriter) {
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push("(");
            for (j, column) in self.columns.iter().enumerate() {
                if j > 0 {
                    w.push(", ");
                }
                let value = row
                    .iter()
                    .find(|(c, _)| c == column)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null);
                w.push_param(value);
            }
            w.push(")");
        }
    }

    pub fn to_query(&self, dialect: Dialect) -> DbResult<RenderedQuery> {
        if self.rows.is_empty() || self.columns.is_empty() {
            return Err(DbError::invalid_input(format!(
                "insert into {} requires at least one non-empty row",
                self.table.name
            )));
        }
        let mut w = SqlWriter::new(dialect);
        match (dialect, &self.on_conflict) {
            (Dialect::Mssql, Some(conflict)) => self.render_merge(&mut w, conflict)?,
            (Dialect::MySql | Dialect::MariaDb, conflict) => self.render_mysql(&mut w, conflict.as_ref()),
            (_, conflict) => self.render_standard(&mut w, conflict.as_ref()),
        }
        Ok(w.finish())
    }

    fn push_column_list(&self, w: &mut SqlWriter) {
        w.push(" (");
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push_ident(column);
        }
        w.push(")");
    }

    /// Postgres family, SQLite and plain SQL Server inserts.
    fn render_standard(&self, w: &mut SqlWriter, conflict: Option<&OnConflict>) {
        let dialect = w.dialect();
        w.push("INSERT INTO ");
        w.push_ident(&self.table.name);
        self.push_column_list(w);
        if dialect == Dialect::Mssql {
            push_output(w, "INSERTED", &self.returning);
        }
        w.push(" VALUES ");
        self.push_values(w);

        if let Some(conflict) = conflict {
            w.push(" ON CONFLICT");
            if !conflict.target.is_empty() {
                w.push(" (");
                push_idents(w, &conflict.target);
                w.push(")");
            }
            let update = self.update_columns();
            if update.is_empty() {
                w.push(" DO NOTHING");
            } else {
                w.push(" DO UPDATE SET ");
                for (i, column) in update.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.push_ident(column);
                    w.push(" = EXCLUDED.");
                    w.push_ident(column);
                }
            }
        }

        if dialect != Dialect::Mssql {
            push_returning(w, StatementKind::Insert, &self.returning);
        }
    }

    fn render_mysql(&self, w: &mut SqlWriter, conflict: Option<&OnConflict>) {
        let update = self.update_columns();
        let ignore = conflict.is_some() && update.is_empty();
        w.push(if ignore { "INSERT IGNORE INTO " } else { "INSERT INTO " });
        w.push_ident(&self.table.name);
        self.push_column_list(w);
        w.push(" VALUES ");
        self.push_values(w);
        if !update.is_empty() {
            w.push(" ON DUPLICATE KEY UPDATE ");
            for (i, column) in update.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_ident(column);
                w.push(" = VALUES(");
                w.push_ident(column);
                w.push(")");
            }
        }
        push_returning(w, StatementKind::Insert, &self.returning);
    }

    fn render_merge(&self, w: &mut SqlWriter, conflict: &OnConflict) -> DbResult<()> {
        if conflict.target.is_empty() {
            return Err(DbError::invalid_input(
                "SQL Server upserts require an explicit conflict target",
            ));
        }
        w.push("MERGE INTO ");
        w.push_ident(&self.table.name);
        w.push(" WITH (HOLDLOCK) AS target USING (VALUES ");
        self.push_values(w);
        w.push(") AS source");
        self.push_column_list(w);
        w.push(" ON ");
        for (i, column) in conflict.target.iter().enumerate() {
            if i > 0 {
                w.push(" AND ");
            }
            w.push("target.");
            w.push_ident(column);
            w.push(" = source.");
            w.push_ident(column);
        }

        let update = self.update_columns();
        if !update.is_empty() {
            w.push(" WHEN MATCHED THEN UPDATE SET ");
            for (i, column) in update.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push("target.");
                w.push_ident(column);
                w.push(" = source.");
                w.push_ident(column);
            }
        }

        w.push(" WHEN NOT MATCHED THEN INSERT");
        self.push_column_list(w);
        w.push(" VALUES (");
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push("source.");
            w.push_ident(column);
        }
        w.push(")");
        push_output(w, "INSERTED", &self.returning);
        // MERGE must be terminated
        w.push(";");
        Ok(())
    }
}

/// UPDATE over the rows matched by a builder's WHERE tree.
#[derive(Debug, Clone)]
pub struct UpdateStatement {
    table: String,
    assignments: Vec<(String, Assignment)>,
    filters: PredicateTree,
    returning: Vec<String>,
}

impl UpdateStatement {
    pub fn new(table: &str) -> Self {
        Self {
            table: TableRef::parse(table).name,
            assignments: Vec::new(),
            filters: PredicateTree::new(),
            returning: Vec::new(),
        }
    }

    pub fn set(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_expr(column, Assignment::Value(value.into()))
    }

    pub fn set_expr(mut self, column: impl Into<String>, assignment: Assignment) -> Self {
        self.assignments.push((column.into(), assignment));
        self
    }

    pub fn set_all<I, K, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        values
            .into_iter()
            .fold(self, |stmt, (k, v)| stmt.set(k, v))
    }

    /// `column = column + by`
    pub fn increment(self, column: impl Into<String>, by: i64) -> Self {
        let column = column.into();
        let expr = format!("{column} + ?");
        self.set_expr(column, Assignment::raw(expr, vec![Value::Int(by)]))
    }

    pub fn with_filters(mut self, filters: PredicateTree) -> Self {
        self.filters = filters;
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn returns_rows(&self, dialect: Dialect) -> bool {
        !self.returning.is_empty() && dialect.supports_returning(StatementKind::Update)
    }

    pub fn to_query(&self, dialect: Dialect) -> DbResult<RenderedQuery> {
        if self.assignments.is_empty() {
            return Err(DbError::invalid_input(format!(
                "update of {} has no assignments",
                self.table
            )));
        }
        let mut w = SqlWriter::new(dialect);
        w.push("UPDATE ");
        w.push_ident(&self.table);
        w.push(" SET ");
        for (i, (column, assignment)) in self.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push_ident(column);
            w.push(" = ");
            assignment.render(&mut w);
        }
        if dialect == Dialect::Mssql {
            push_output(&mut w, "INSERTED", &self.returning);
        }
        if !self.filters.is_empty() {
            w.push(" WHERE ");
            render_tree(&self.filters, &mut w)?;
        }
        if dialect != Dialect::Mssql {
            push_returning(&mut w, StatementKind::Update, &self.returning);
        }
        Ok(w.finish())
    }
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    table: String,
    filters: PredicateTree,
    returning: Vec<String>,
}

impl DeleteStatement {
    pub fn new(table: &str) -> Self {
        Self {
            table: TableRef::parse(table).name,
            filters: PredicateTree::new(),
            returning: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: PredicateTree) -> Self {
        self.filters = filters;
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn returns_rows(&self, dialect: Dialect) -> bool {
        !self.returning.is_empty() && dialect.supports_returning(StatementKind::Delete)
    }

    pub fn to_query(&self, dialect: Dialect) -> DbResult<RenderedQuery> {
        let mut w = SqlWriter::new(dialect);
        w.push("DELETE FROM ");
        w.push_ident(&self.table);
        if dialect == Dialect::Mssql {
            push_output(&mut w, "DELETED", &self.returning);
        }
        if !self.filters.is_empty() {
            w.push(" WHERE ");
            render_tree(&self.filters, &mut w)?;
        }
        if dialect != Dialect::Mssql {
            push_returning(&mut w, StatementKind::Delete, &self.returning);
        }
        Ok(w.finish())
    }
}

/// Remove every row. SQLite has no TRUNCATE and gets an unfiltered DELETE.
pub fn truncate_query(table: &str, dialect: Dialect) -> RenderedQuery {
    let name = dialect.quote_identifier(&TableRef::parse(table).name);
    match dialect {
        Dialect::Sqlite => RenderedQuery::new(format!("DELETE FROM {name}"), Vec::new()),
        _ => RenderedQuery::new(format!("TRUNCATE TABLE {name}"), Vec::new()),
    }
}

fn push_idents(w: &mut SqlWriter, idents: &[String]) {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push_ident(ident);
    }
}

fn push_returning(w: &mut SqlWriter, kind: StatementKind, columns: &[String]) {
    if columns.is_empty() || !w.dialect().supports_returning(kind) {
        return;
    }
    w.push(" RETURNING ");
    push_idents(w, columns);
}

fn push_output(w: &mut SqlWriter, pseudo_table: &str, columns: &[String]) {
    if columns.is_empty() {
        return;
    }
    w.push(" OUTPUT ");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push(pseudo_table);
        w.push(".");
        w.push_ident(column);
    }
}

impl QueryBuilder {
    fn write_table(&self, operation: &str) -> DbResult<&str> {
        self.table_name()
            .ok_or_else(|| DbError::invalid_input(format!("{operation} requires a table source")))
    }

    /// INSERT of one row into this builder's table.
    pub fn insert_statement<I, K, V>(&self, row: I) -> DbResult<InsertStatement>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Ok(InsertStatement::new(self.write_table("insert")?).row(row))
    }

    /// Multi-row INSERT into this builder's table.
    pub fn insert_many<R, I, K, V>(&self, rows: R) -> DbResult<InsertStatement>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Ok(InsertStatement::new(self.write_table("insert")?).rows(rows))
    }

    /// INSERT that overwrites every non-target column when `target` conflicts.
    pub fn upsert<R, I, K, V, T, S>(&self, rows: R, target: T) -> DbResult<InsertStatement>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(InsertStatement::new(self.write_table("upsert")?)
            .rows(rows)
            .on_conflict_update(target, Vec::<String>::new()))
    }

    /// UPDATE of the rows this builder's WHERE tree matches.
    pub fn update_statement<I, K, V>(&self, values: I) -> DbResult<UpdateStatement>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Ok(UpdateStatement::new(self.write_table("update")?)
            .set_all(values)
            .with_filters(self.filters.clone()))
    }

    pub fn delete_statement(&self) -> DbResult<DeleteStatement> {
        Ok(DeleteStatement::new(self.write_table("delete")?).with_filters(self.filters.clone()))
    }

    /// Mark matched rows deleted instead of removing them.
    pub fn soft_delete_statement(&self, soft_delete: &SoftDelete) -> DbResult<UpdateStatement> {
        let assignment = match soft_delete.kind {
            SoftDeleteKind::Date => Assignment::CurrentTimestamp,
            SoftDeleteKind::Boolean => Assignment::Flag(true),
        };
        Ok(UpdateStatement::new(self.write_table("soft delete")?)
            .set_expr(soft_delete.column.clone(), assignment)
            .with_filters(self.filters.clone()))
    }

    /// Undo a soft delete on matched rows.
    pub fn restore_statement(&self, soft_delete: &SoftDelete) -> DbResult<UpdateStatement> {
        let assignment = match soft_delete.kind {
            SoftDeleteKind::Date => Assignment::Value(Value::Null),
            SoftDeleteKind::Boolean => Assignment::Flag(false),
        };
        Ok(UpdateStatement::new(self.write_table("restore")?)
            .set_expr(soft_delete.column.clone(), assignment)
            .with_filters(self.filters.clone()))
    }

    pub fn truncate_query(&self, dialect: Dialect) -> DbResult<RenderedQuery> {
        Ok(truncate_query(self.write_table("truncate")?, dialect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Op;

    fn users_insert() -> InsertStatement {
        InsertStatement::new("users")
            .row([("email", Value::from("a@x.io")), ("name", Value::from("A"))])
            .row([("email", Value::from("b@x.io")), ("age", Value::from(30))])
    }

    #[test]
    fn test_insert_fills_missing_cells_with_null() {
        let r = users_insert().to_query(Dialect::Postgres).unwrap();
        assert_eq!(
            r.sql,
            "INSERT INTO \"users\" (\"email\", \"name\", \"age\") VALUES ($1, $2, $3), ($4, $5, $6)"
        );
        assert_eq!(r.params[2], Value::Null);
        assert_eq!(r.params[4], Value::Null);
    }

    #[test]
    fn test_insert_returning_per_dialect() {
        let stmt = InsertStatement::new("users")
            .row([("email", "a@x.io")])
            .returning(["id"]);
        assert!(stmt.to_query(Dialect::Sqlite).unwrap().sql.ends_with("RETURNING \"id\""));
        assert!(!stmt.to_query(Dialect::MySql).unwrap().sql.contains("RETURNING"));
        assert!(stmt.to_query(Dialect::MariaDb).unwrap().sql.ends_with("RETURNING `id`"));
        assert_eq!(
            stmt.to_query(Dialect::Mssql).unwrap().sql,
            "INSERT INTO [users] ([email]) OUTPUT INSERTED.[id] VALUES (@P1)"
        );
        assert!(!stmt.returns_rows(Dialect::MySql));
        assert!(stmt.returns_rows(Dialect::Postgres));
    }

    #[test]
    fn test_upsert_per_dialect() {
        let stmt = InsertStatement::new("users")
            .row([("email", Value::from("a@x.io")), ("name", Value::from("A"))])
            .on_conflict_update(["email"], Vec::<String>::new());
        assert_eq!(
            stmt.to_query(Dialect::Postgres).unwrap().sql,
            "INSERT INTO \"users\" (\"email\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"email\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""
        );
        assert_eq!(
            stmt.to_query(Dialect::MySql).unwrap().sql,
            "INSERT INTO `users` (`email`, `name`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"
        );
        assert_eq!(
            stmt.to_query(Dialect::Mssql).unwrap().sql,
            "MERGE INTO [users] WITH (HOLDLOCK) AS target USING (VALUES (@P1, @P2)) AS source ([email], [name]) \
             ON target.[email] = source.[email] \
             WHEN MATCHED THEN UPDATE SET target.[name] = source.[name] \
             WHEN NOT MATCHED THEN INSERT ([email], [name]) VALUES (source.[email], source.[name]);"
        );
    }

    #[test]
    fn test_insert_ignore() {
        let stmt = InsertStatement::new("tags")
            .row([("name", "rust")])
            .on_conflict_do_nothing(["name"]);
        assert_eq!(
            stmt.to_query(Dialect::MySql).unwrap().sql,
            "INSERT IGNORE INTO `tags` (`name`) VALUES (?)"
        );
        assert!(stmt.to_query(Dialect::Sqlite).unwrap().sql.ends_with("ON CONFLICT (\"name\") DO NOTHING"));
    }

    #[test]
    fn test_empty_insert_rejected() {
        let err = InsertStatement::new("users").to_query(Dialect::Sqlite).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_update_from_builder() {
        let stmt = QueryBuilder::table("users")
            .filter("id", Op::Eq, 5)
            .update_statement([("name", "Bob")])
            .unwrap()
            .increment("logins", 1);
        let r = stmt.to_query(Dialect::Postgres).unwrap();
        assert_eq!(
            r.sql,
            "UPDATE \"users\" SET \"name\" = $1, \"logins\" = logins + $2 WHERE \"id\" = $3"
        );
        assert_eq!(r.params, vec![Value::from("Bob"), Value::Int(1), Value::Int(5)]);
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let q = QueryBuilder::table("posts").filter_eq("id", 1);
        let r = q
            .soft_delete_statement(&SoftDelete::date("deleted_at"))
            .unwrap()
            .to_query(Dialect::MySql)
            .unwrap();
        assert_eq!(r.sql, "UPDATE `posts` SET `deleted_at` = CURRENT_TIMESTAMP WHERE `id` = ?");

        let r = q
            .soft_delete_statement(&SoftDelete::boolean("is_deleted"))
            .unwrap()
            .to_query(Dialect::Postgres)
            .unwrap();
        assert_eq!(r.sql, "UPDATE \"posts\" SET \"is_deleted\" = TRUE WHERE \"id\" = $1");

        let r = q
            .restore_statement(&SoftDelete::date("deleted_at"))
            .unwrap()
            .to_query(Dialect::Sqlite)
            .unwrap();
        assert_eq!(r.sql, "UPDATE \"posts\" SET \"deleted_at\" = ? WHERE \"id\" = ?");
        assert_eq!(r.params[0], Value::Null);
    }

    #[test]
    fn test_delete_and_truncate() {
        let q = QueryBuilder::table("sessions").filter("expires_at", Op::Lt, 100);
        assert_eq!(
            q.delete_statement().unwrap().returning(["id"]).to_query(Dialect::Mssql).unwrap().sql,
            "DELETE FROM [sessions] OUTPUT DELETED.[id] WHERE [expires_at] < @P1"
        );
        assert_eq!(q.truncate_query(Dialect::Sqlite).unwrap().sql, "DELETE FROM \"sessions\"");
        assert_eq!(q.truncate_query(Dialect::MySql).unwrap().sql, "TRUNCATE TABLE `sessions`");
    }

    #[test]
    fn test_write_requires_table_source() {
        let err = QueryBuilder::new().delete_statement().unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_builder_insert_many_and_upsert() {
        let q = QueryBuilder::table("tags");
        let rows = vec![vec![("name", "rust")], vec![("name", "sql")]];
        let r = q.insert_many(rows.clone()).unwrap().to_query(Dialect::Sqlite).unwrap();
        assert_eq!(r.sql, "INSERT INTO \"tags\" (\"name\") VALUES (?), (?)");
        assert_eq!(r.params.len(), 2);

        let r = q.upsert(rows, ["name"]).unwrap().to_query(Dialect::Postgres).unwrap();
        // every column is part of the target, so nothing is left to overwrite
        assert!(r.sql.ends_with("ON CONFLICT (\"name\") DO NOTHING"));
    }
}
