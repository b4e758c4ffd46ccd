//! Common Table Expressions (WITH clauses).
//!
//! ```ignore
//! let q = QueryBuilder::table("active")
//!     .with_cte(CteMode::Normal, |cte| {
//!         cte.new_cte("active", QueryBuilder::table("users").filter("active", Op::Eq, true))
//!     });
//! ```
//!
//! A clause must carry at least one entry: rendering an empty clause fails
//! with `MUST_CALL_BUILD_CTE_AT_LEAST_ONCE`.

use super::builder::QueryBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CteMode {
    #[default]
    Normal,
    /// `WITH RECURSIVE` (plain `WITH` on SQL Server).
    Recursive,
    /// `AS MATERIALIZED` where supported, plain otherwise.
    Materialized,
}

#[derive(Debug, Clone)]
pub struct CteEntry {
    pub alias: String,
    pub columns: Vec<String>,
    pub query: QueryBuilder,
}

/// The WITH clause under construction.
#[derive(Debug, Clone, Default)]
pub struct CteClause {
    pub(crate) mode: CteMode,
    pub(crate) entries: Vec<CteEntry>,
}

impl CteClause {
    pub fn new(mode: CteMode) -> Self {
        Self {
            mode,
            entries: Vec::new(),
        }
    }

    /// Add a named CTE.
    pub fn new_cte(mut self, alias: impl Into<String>, query: QueryBuilder) -> Self {
        self.entries.push(CteEntry {
            alias: alias.into(),
            columns: Vec::new(),
            query,
        });
        self
    }

    /// Add a named CTE with an explicit column list, as recursive CTEs
    /// usually need.
    pub fn new_cte_with_columns<I, S>(
        mut self,
        alias: impl Into<String>,
        columns: I,
        query: QueryBuilder,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.push(CteEntry {
            alias: alias.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            query,
        });
        self
    }

    pub fn mode(&self) -> CteMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
