//! The dialect-neutral SELECT builder.
//!
//! Every method consumes the builder and returns it extended; nothing here
//! performs I/O. Rendering ([`QueryBuilder::to_query`]) is a pure function
//! of the builder and a [`Dialect`](crate::models::Dialect), and running a
//! query is a separate explicit step (see `query::execute`). Clone a
//! builder to reuse it as a template or subquery.

use super::cte::{CteClause, CteMode};
use super::join::{JoinClause, JoinKind, TableRef};
use super::predicate::{Connective, JsonPath, Op, Predicate, PredicateTree};
use super::projection::Projection;
use crate::error::{DbError, DbResult};
use crate::models::Value;
use serde_json::Value as JsonValue;

/// Alias of the row number added by [`QueryBuilder::limit_per_partition`].
pub const ROW_NUMBER_COLUMN: &str = "__loom_row_number";

/// FROM source.
#[derive(Debug, Clone)]
pub enum Source {
    Table(TableRef),
    Subquery {
        query: Box<QueryBuilder>,
        alias: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub enum OrderBy {
    Column {
        column: String,
        direction: OrderDirection,
    },
    Raw {
        sql: String,
        params: Vec<Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    Update,
    Share,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    #[default]
    Wait,
    SkipLocked,
    NoWait,
}

/// Row-level lock requested for the selected rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLock {
    pub strength: LockStrength,
    pub wait: LockWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionKind {
    Distinct,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    pub(crate) source: Option<Source>,
    pub(crate) ctes: Option<CteClause>,
    pub(crate) distinct: bool,
    pub(crate) distinct_on: Vec<String>,
    pub(crate) projections: Vec<Projection>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) filters: PredicateTree,
    pub(crate) group_by: Vec<String>,
    pub(crate) having: PredicateTree,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) lock: Option<RowLock>,
    pub(crate) unions: Vec<(UnionKind, QueryBuilder)>,
}

impl QueryBuilder {
    /// Empty builder without a FROM source (`SELECT 1`, scalar subqueries).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder selecting from a table (`"users"`, `"users as u"`).
    pub fn table(table: &str) -> Self {
        Self {
            source: Some(Source::Table(TableRef::parse(table))),
            ..Self::default()
        }
    }

    /// Builder selecting from a derived table.
    pub fn from_subquery(query: QueryBuilder, alias: impl Into<String>) -> Self {
        Self {
            source: Some(Source::Subquery {
                query: Box::new(query),
                alias: alias.into(),
            }),
            ..Self::default()
        }
    }

    /// Name other clauses use to refer to the FROM source.
    pub fn table_reference(&self) -> Option<&str> {
        match &self.source {
            Some(Source::Table(t)) => Some(t.reference()),
            Some(Source::Subquery { alias, .. }) => Some(alias),
            None => None,
        }
    }

    /// Underlying table name (without alias) for table sources.
    pub fn table_name(&self) -> Option<&str> {
        match &self.source {
            Some(Source::Table(t)) => Some(&t.name),
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Projections
    // ---------------------------------------------------------------------

    /// Add columns to the SELECT list. Accepts `"col"`, `"t.col"`, `"col as alias"`.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.projections
            .extend(columns.into_iter().map(|c| Projection::column(c.as_ref())));
        self
    }

    /// Replace the SELECT list.
    pub fn reselect<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.projections.clear();
        self.select(columns)
    }

    pub fn select_as(mut self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.projections.push(Projection::aliased(column, alias));
        self
    }

    /// Raw SELECT expression; `?` marks bind `params`.
    pub fn select_raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.projections.push(Projection::Raw {
            sql: sql.into(),
            params,
            alias: None,
        });
        self
    }

    /// `expr AS alias`, typically an aggregate next to declared columns.
    pub fn annotate(mut self, expr: impl Into<String>, alias: impl Into<String>) -> Self {
        self.projections.push(Projection::Raw {
            sql: expr.into(),
            params: Vec::new(),
            alias: Some(alias.into()),
        });
        self
    }

    /// Select the scalar at a JSON path.
    pub fn select_json(
        mut self,
        column: impl Into<String>,
        path: impl Into<JsonPath>,
        alias: impl Into<String>,
    ) -> Self {
        self.projections.push(Projection::Json {
            column: column.into(),
            path: path.into(),
            alias: alias.into(),
        });
        self
    }

    /// Embed a built query as one aliased column.
    pub fn select_subquery(mut self, query: QueryBuilder, alias: impl Into<String>) -> Self {
        self.projections.push(Projection::Subquery {
            query: Box::new(query),
            alias: alias.into(),
        });
        self
    }

    /// Embed a subquery built by a callback from an empty builder.
    pub fn select_subquery_with<F>(self, alias: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let query = build(QueryBuilder::new());
        self.select_subquery(query, alias)
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// `DISTINCT ON (...)` on the Postgres family, plain `DISTINCT` elsewhere.
    pub fn distinct_on<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distinct = true;
        self.distinct_on = columns.into_iter().map(Into::into).collect();
        self
    }

    // ---------------------------------------------------------------------
    // WHERE
    // ---------------------------------------------------------------------

    /// Append a predicate with an explicit connective.
    pub fn push_predicate(mut self, connective: Connective, predicate: Predicate) -> Self {
        self.filters.push(connective, predicate);
        self
    }

    fn and(self, predicate: Predicate) -> Self {
        self.push_predicate(Connective::And, predicate)
    }

    fn or(self, predicate: Predicate) -> Self {
        self.push_predicate(Connective::Or, predicate)
    }

    /// `column op value`
    pub fn filter(self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.and(Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        })
    }

    pub fn and_filter(self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.filter(column, op, value)
    }

    pub fn or_filter(self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.or(Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        })
    }

    /// `column = value`
    pub fn filter_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, Op::Eq, value)
    }

    /// Parenthesized group built by a callback from an empty builder.
    pub fn filter_group<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let group = build(QueryBuilder::new()).filters;
        self.and(Predicate::Group(group))
    }

    pub fn or_filter_group<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let group = build(QueryBuilder::new()).filters;
        self.or(Predicate::Group(group))
    }

    /// `left op right`, comparing two columns.
    pub fn filter_column(
        self,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        self.and(Predicate::ColumnCompare {
            left: left.into(),
            op,
            right: right.into(),
        })
    }

    pub fn or_filter_column(
        self,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        self.or(Predicate::ColumnCompare {
            left: left.into(),
            op,
            right: right.into(),
        })
    }

    fn in_predicate<I, V>(column: impl Into<String>, values: I, negated: bool) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated,
        }
    }

    /// `column IN (...)`. An empty list matches nothing (an error on SQL Server).
    pub fn filter_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.and(Self::in_predicate(column, values, false))
    }

    pub fn filter_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.and(Self::in_predicate(column, values, true))
    }

    pub fn or_filter_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.or(Self::in_predicate(column, values, false))
    }

    pub fn filter_in_subquery(self, column: impl Into<String>, query: QueryBuilder) -> Self {
        self.and(Predicate::InSubquery {
            column: column.into(),
            query: Box::new(query),
            negated: false,
        })
    }

    pub fn filter_not_in_subquery(self, column: impl Into<String>, query: QueryBuilder) -> Self {
        self.and(Predicate::InSubquery {
            column: column.into(),
            query: Box::new(query),
            negated: true,
        })
    }

    fn between(
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
        negated: bool,
    ) -> Predicate {
        Predicate::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            negated,
        }
    }

    /// `column BETWEEN low AND high` (inclusive).
    pub fn filter_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.and(Self::between(column, low, high, false))
    }

    pub fn filter_not_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.and(Self::between(column, low, high, true))
    }

    pub fn or_filter_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.or(Self::between(column, low, high, false))
    }

    pub fn filter_null(self, column: impl Into<String>) -> Self {
        self.and(Predicate::Null {
            column: column.into(),
            negated: false,
        })
    }

    pub fn filter_not_null(self, column: impl Into<String>) -> Self {
        self.and(Predicate::Null {
            column: column.into(),
            negated: true,
        })
    }

    pub fn or_filter_null(self, column: impl Into<String>) -> Self {
        self.or(Predicate::Null {
            column: column.into(),
            negated: false,
        })
    }

    fn like(column: impl Into<String>, pattern: impl Into<String>, negated: bool, ci: bool) -> Predicate {
        Predicate::Like {
            column: column.into(),
            pattern: Value::Text(pattern.into()),
            negated,
            case_insensitive: ci,
        }
    }

    pub fn filter_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.and(Self::like(column, pattern, false, false))
    }

    pub fn filter_not_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.and(Self::like(column, pattern, true, false))
    }

    /// Case-insensitive LIKE: `ILIKE` on the Postgres family, `LOWER() LIKE LOWER()` elsewhere.
    pub fn filter_ilike(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.and(Self::like(column, pattern, false, true))
    }

    pub fn filter_not_ilike(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.and(Self::like(column, pattern, true, true))
    }

    pub fn or_filter_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.or(Self::like(column, pattern, false, false))
    }

    /// Compare the scalar at a JSON path.
    pub fn filter_json(
        self,
        column: impl Into<String>,
        path: impl Into<JsonPath>,
        op: Op,
        value: impl Into<Value>,
    ) -> Self {
        self.and(Predicate::Json {
            column: column.into(),
            path: path.into(),
            op,
            value: value.into(),
        })
    }

    /// JSON containment of `value` in the document (or the sub-document at `path`).
    pub fn filter_json_contains(
        self,
        column: impl Into<String>,
        path: impl Into<JsonPath>,
        value: JsonValue,
    ) -> Self {
        self.and(Predicate::JsonContains {
            column: column.into(),
            path: path.into(),
            value,
        })
    }

    pub fn filter_exists(self, query: QueryBuilder) -> Self {
        self.and(Predicate::Exists {
            query: Box::new(query),
            negated: false,
        })
    }

    pub fn filter_not_exists(self, query: QueryBuilder) -> Self {
        self.and(Predicate::Exists {
            query: Box::new(query),
            negated: true,
        })
    }

    /// `(SELECT COUNT(*) ...) op value` with `query` as the counted subquery.
    pub fn filter_count(self, query: QueryBuilder, op: Op, value: i64) -> Self {
        self.and(Predicate::Count {
            query: Box::new(query),
            op,
            value,
        })
    }

    /// Raw fragment; `?` marks bind `params` in order.
    pub fn filter_raw(self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.and(Predicate::Raw {
            sql: sql.into(),
            params,
        })
    }

    pub fn or_filter_raw(self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.or(Predicate::Raw {
            sql: sql.into(),
            params,
        })
    }

    /// Whether any WHERE predicate has been added.
    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    // ---------------------------------------------------------------------
    // JOIN
    // ---------------------------------------------------------------------

    pub fn join(self, table: &str, left: impl Into<String>, op: Op, right: impl Into<String>) -> Self {
        self.join_clause(JoinClause::new(JoinKind::Inner, table).on(left, op, right))
    }

    pub fn left_join(
        self,
        table: &str,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        self.join_clause(JoinClause::new(JoinKind::Left, table).on(left, op, right))
    }

    pub fn right_join(
        self,
        table: &str,
        left: impl Into<String>,
        op: Op,
        right: impl Into<String>,
    ) -> Self {
        self.join_clause(JoinClause::new(JoinKind::Right, table).on(left, op, right))
    }

    /// Join with several ON conditions built by a callback.
    pub fn join_with<F>(self, kind: JoinKind, table: &str, build: F) -> Self
    where
        F: FnOnce(JoinClause) -> JoinClause,
    {
        self.join_clause(build(JoinClause::new(kind, table)))
    }

    pub fn join_clause(mut self, join: JoinClause) -> Self {
        self.joins.push(join);
        self
    }

    // ---------------------------------------------------------------------
    // GROUP BY / HAVING
    // ---------------------------------------------------------------------

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    /// `HAVING expr op value`; `expr` is usually an aggregate.
    pub fn having(mut self, expr: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.having.push(
            Connective::And,
            Predicate::Compare {
                column: expr.into(),
                op,
                value: value.into(),
            },
        );
        self
    }

    pub fn or_having(mut self, expr: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.having.push(
            Connective::Or,
            Predicate::Compare {
                column: expr.into(),
                op,
                value: value.into(),
            },
        );
        self
    }

    pub fn having_raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.having.push(
            Connective::And,
            Predicate::Raw {
                sql: sql.into(),
                params,
            },
        );
        self
    }

    // ---------------------------------------------------------------------
    // ORDER BY / LIMIT / locking
    // ---------------------------------------------------------------------

    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by.push(OrderBy::Column {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn order_by_asc(self, column: impl Into<String>) -> Self {
        self.order_by(column, OrderDirection::Asc)
    }

    pub fn order_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, OrderDirection::Desc)
    }

    pub fn order_by_raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.order_by.push(OrderBy::Raw {
            sql: sql.into(),
            params,
        });
        self
    }

    /// Drop any ordering added so far.
    pub fn reorder(mut self) -> Self {
        self.order_by.clear();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn lock_for_update(mut self) -> Self {
        self.lock = Some(RowLock {
            strength: LockStrength::Update,
            wait: self.lock.map(|l| l.wait).unwrap_or_default(),
        });
        self
    }

    pub fn lock_for_share(mut self) -> Self {
        self.lock = Some(RowLock {
            strength: LockStrength::Share,
            wait: self.lock.map(|l| l.wait).unwrap_or_default(),
        });
        self
    }

    /// Skip rows locked by other transactions. Implies FOR UPDATE when no lock was set.
    pub fn skip_locked(mut self) -> Self {
        let strength = self.lock.map(|l| l.strength).unwrap_or(LockStrength::Update);
        self.lock = Some(RowLock {
            strength,
            wait: LockWait::SkipLocked,
        });
        self
    }

    /// Fail instead of waiting on locked rows. Implies FOR UPDATE when no lock was set.
    pub fn no_wait(mut self) -> Self {
        let strength = self.lock.map(|l| l.strength).unwrap_or(LockStrength::Update);
        self.lock = Some(RowLock {
            strength,
            wait: LockWait::NoWait,
        });
        self
    }

    // ---------------------------------------------------------------------
    // Compound queries and CTEs
    // ---------------------------------------------------------------------

    /// `UNION` with another query. ORDER BY and LIMIT of this builder apply
    /// to the whole compound; those of `other` are not rendered.
    pub fn union(mut self, other: QueryBuilder) -> Self {
        self.unions.push((UnionKind::Distinct, other));
        self
    }

    pub fn union_all(mut self, other: QueryBuilder) -> Self {
        self.unions.push((UnionKind::All, other));
        self
    }

    /// Attach a WITH clause built by a callback.
    pub fn with_cte<F>(mut self, mode: CteMode, build: F) -> Self
    where
        F: FnOnce(CteClause) -> CteClause,
    {
        self.ctes = Some(build(CteClause::new(mode)));
        self
    }

    // ---------------------------------------------------------------------
    // Derived builders
    // ---------------------------------------------------------------------

    /// The same query stripped of ordering, paging and locks.
    pub(crate) fn without_paging(&self) -> QueryBuilder {
        let mut q = self.clone();
        q.order_by.clear();
        q.limit = None;
        q.offset = None;
        q.lock = None;
        q
    }

    /// `SELECT COUNT(*) AS total` over this query.
    ///
    /// Simple queries get their SELECT list replaced; grouped, distinct or
    /// compound queries are wrapped in a derived table.
    pub fn count_query(&self) -> QueryBuilder {
        let inner = self.without_paging();
        if inner.group_by.is_empty() && !inner.distinct && inner.unions.is_empty() {
            let mut q = inner;
            q.projections = vec![Projection::Raw {
                sql: "COUNT(*)".to_string(),
                params: Vec::new(),
                alias: Some("total".to_string()),
            }];
            q
        } else {
            let ctes = inner.ctes.clone();
            let mut inner = inner;
            inner.ctes = None;
            let mut q = QueryBuilder::from_subquery(inner, "loom_count").annotate("COUNT(*)", "total");
            q.ctes = ctes;
            q
        }
    }

    /// Apply this query's LIMIT and OFFSET within each group of rows sharing
    /// a `partition_column` value instead of across the whole result.
    ///
    /// Rows are numbered with `ROW_NUMBER() OVER (PARTITION BY ...)` in a
    /// derived table, ordered by this query's ORDER BY, and filtered on that
    /// number. The number comes back in every row as [`ROW_NUMBER_COLUMN`].
    /// Without LIMIT or OFFSET the query is returned unchanged.
    pub fn limit_per_partition(&self, partition_column: impl Into<String>) -> DbResult<QueryBuilder> {
        let offset = self.offset.unwrap_or(0);
        if self.limit.is_none() && offset == 0 {
            return Ok(self.clone());
        }
        if !self.unions.is_empty() {
            return Err(DbError::invalid_input(
                "LIMIT/OFFSET per partition is not supported on compound queries",
            ));
        }
        let out_of_range = || DbError::invalid_input("LIMIT/OFFSET per partition is out of range");
        let first = i64::try_from(offset).map_err(|_| out_of_range())?;
        let last = match self.limit {
            Some(limit) => Some(
                offset
                    .checked_add(limit)
                    .and_then(|end| i64::try_from(end).ok())
                    .ok_or_else(out_of_range)?,
            ),
            None => None,
        };

        let mut inner = self.clone();
        let ctes = inner.ctes.take();
        inner.limit = None;
        inner.offset = None;
        let order_by = std::mem::take(&mut inner.order_by);
        if inner.projections.is_empty() {
            inner.projections.push(match inner.table_reference() {
                Some(table) => Projection::column(&format!("{table}.*")),
                None => Projection::All,
            });
        }
        inner.projections.push(Projection::RowNumber {
            partition_by: partition_column.into(),
            order_by,
            alias: ROW_NUMBER_COLUMN.to_string(),
        });

        let mut ranked = QueryBuilder::from_subquery(inner, "loom_ranked")
            .filter(ROW_NUMBER_COLUMN, Op::Gt, first)
            .order_by_asc(ROW_NUMBER_COLUMN);
        if let Some(last) = last {
            ranked = ranked.filter(ROW_NUMBER_COLUMN, Op::Lte, last);
        }
        ranked.ctes = ctes;
        Ok(ranked)
    }

    /// `SELECT 1 ... LIMIT 1` over this query.
    pub fn exists_query(&self) -> QueryBuilder {
        let mut q = self.without_paging();
        q.projections = vec![Projection::Raw {
            sql: "1".to_string(),
            params: Vec::new(),
            alias: Some("present".to_string()),
        }];
        q.limit = Some(1);
        q
    }
}
