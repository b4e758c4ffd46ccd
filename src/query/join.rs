//! JOIN clauses.

use super::predicate::{Connective, Op};
use crate::models::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

/// A table reference with an optional alias (`"posts"`, `"posts as p"`, `"posts p"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if let Some((name, alias)) = super::projection::split_alias(spec) {
            return Self {
                name: name.to_string(),
                alias: Some(alias.to_string()),
            };
        }
        let mut parts = spec.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(alias), None) => Self {
                name: name.to_string(),
                alias: Some(alias.to_string()),
            },
            _ => Self {
                name: spec.to_string(),
                alias: None,
            },
        }
    }

    /// Name other clauses use to reference this table.
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// One ON condition.
#[derive(Debug, Clone)]
pub enum JoinCondition {
    Columns { left: String, op: Op, right: String },
    Value { column: String, op: Op, value: Value },
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableRef,
    pub conditions: Vec<(Connective, JoinCondition)>,
}

impl JoinClause {
    pub fn new(kind: JoinKind, table: &str) -> Self {
        Self {
            kind,
            table: TableRef::parse(table),
            conditions: Vec::new(),
        }
    }

    /// `AND left op right`
    pub fn on(mut self, left: impl Into<String>, op: Op, right: impl Into<String>) -> Self {
        self.conditions.push((
            Connective::And,
            JoinCondition::Columns {
                left: left.into(),
                op,
                right: right.into(),
            },
        ));
        self
    }

    /// `OR left op right`
    pub fn or_on(mut self, left: impl Into<String>, op: Op, right: impl Into<String>) -> Self {
        self.conditions.push((
            Connective::Or,
            JoinCondition::Columns {
                left: left.into(),
                op,
                right: right.into(),
            },
        ));
        self
    }

    /// `AND column op <bound value>`
    pub fn on_value(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.conditions.push((
            Connective::And,
            JoinCondition::Value {
                column: column.into(),
                op,
                value: value.into(),
            },
        ));
        self
    }
}
