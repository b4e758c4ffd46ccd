//! Selected expressions.

use super::builder::{OrderBy, QueryBuilder};
use super::predicate::JsonPath;
use crate::models::Value;

/// One entry of the SELECT list.
#[derive(Debug, Clone)]
pub enum Projection {
    /// `*`
    All,
    Column {
        name: String,
        alias: Option<String>,
    },
    /// Raw expression; `?` marks bind `params`.
    Raw {
        sql: String,
        params: Vec<Value>,
        alias: Option<String>,
    },
    /// Scalar extracted from a JSON column.
    Json {
        column: String,
        path: JsonPath,
        alias: String,
    },
    /// Correlated or standalone subquery embedded as one column.
    Subquery {
        query: Box<QueryBuilder>,
        alias: String,
    },
    /// `ROW_NUMBER() OVER (PARTITION BY ... ORDER BY ...)`
    RowNumber {
        partition_by: String,
        order_by: Vec<OrderBy>,
        alias: String,
    },
}

impl Projection {
    /// Parse `"name"`, `"t.name"` or `"name as alias"` (case-insensitive `as`).
    pub fn column(spec: &str) -> Self {
        let spec = spec.trim();
        if spec == "*" {
            return Projection::All;
        }
        match split_alias(spec) {
            Some((name, alias)) => Projection::Column {
                name: name.to_string(),
                alias: Some(alias.to_string()),
            },
            None => Projection::Column {
                name: spec.to_string(),
                alias: None,
            },
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Projection::Column {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Name under which this projection appears in result rows, if known.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Projection::All => None,
            Projection::Column { name, alias } => Some(
                alias
                    .as_deref()
                    .unwrap_or_else(|| name.rsplit('.').next().unwrap_or(name)),
            ),
            Projection::Raw { alias, .. } => alias.as_deref(),
            Projection::Json { alias, .. }
            | Projection::Subquery { alias, .. }
            | Projection::RowNumber { alias, .. } => Some(alias),
        }
    }
}

/// Split `"expr as alias"` into its two halves.
pub(crate) fn split_alias(spec: &str) -> Option<(&str, &str)> {
    let lower = spec.to_ascii_lowercase();
    let idx = lower.rfind(" as ")?;
    let name = spec[..idx].trim();
    let alias = spec[idx + 4..].trim();
    if name.is_empty() || alias.is_empty() {
        None
    } else {
        Some((name, alias))
    }
}
