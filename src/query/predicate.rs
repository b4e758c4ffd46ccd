//! WHERE/HAVING condition trees.
//!
//! A [`PredicateTree`] is an ordered list of `(connective, predicate)`
//! pairs. The connective of the first entry is ignored when rendering;
//! grouped callbacks nest a child tree rendered in parentheses.

use super::builder::QueryBuilder;
use crate::models::Value;
use serde_json::Value as JsonValue;

/// Logical connective joining a predicate to the previous one in its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::NotEq => "<>",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
        }
    }

    /// Parse a textual operator (`=`, `!=`, `<>`, `<`, `<=`, `>`, `>=`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "=" | "==" => Some(Op::Eq),
            "!=" | "<>" => Some(Op::NotEq),
            "<" => Some(Op::Lt),
            "<=" => Some(Op::Lte),
            ">" => Some(Op::Gt),
            ">=" => Some(Op::Gte),
            _ => None,
        }
    }

    /// The operator that holds when the operands are swapped.
    pub fn flipped(&self) -> Self {
        match self {
            Op::Lt => Op::Gt,
            Op::Lte => Op::Gte,
            Op::Gt => Op::Lt,
            Op::Gte => Op::Lte,
            other => *other,
        }
    }
}

/// One step of a JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonSegment {
    Key(String),
    Index(usize),
}

/// A normalized JSON path.
///
/// `"a.b"`, `"$.a.b"` and `["a", "b"]` all normalize to the same segments.
/// Bracketed indexes (`"tags[0]"`) and purely numeric segments of a segment
/// array become [`JsonSegment::Index`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPath(pub Vec<JsonSegment>);

impl JsonPath {
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim();
        let body = trimmed
            .strip_prefix("$.")
            .or_else(|| trimmed.strip_prefix('$'))
            .unwrap_or(trimmed);

        let mut segments = Vec::new();
        for part in split_outside_quotes(body).into_iter().filter(|p| !p.is_empty()) {
            let key_end = match quoted_len(part) {
                Some(len) => part[len..].find('[').map_or(part.len(), |i| i + len),
                None => part.find('[').unwrap_or(part.len()),
            };
            if key_end > 0 {
                segments.push(JsonSegment::Key(unquote(&part[..key_end])));
            }
            let mut rest = &part[key_end..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let skip = quoted_len(stripped).unwrap_or(0);
                let Some(close) = stripped[skip..].find(']').map(|i| i + skip) else {
                    break;
                };
                let inner = &stripped[..close];
                match inner.parse::<usize>() {
                    Ok(idx) => segments.push(JsonSegment::Index(idx)),
                    Err(_) => segments.push(JsonSegment::Key(unquote(inner))),
                }
                rest = &stripped[close + 1..];
            }
        }
        Self(segments)
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            segments
                .into_iter()
                .map(|s| match s.as_ref().parse::<usize>() {
                    Ok(idx) => JsonSegment::Index(idx),
                    Err(_) => JsonSegment::Key(s.as_ref().to_string()),
                })
                .collect(),
        )
    }

    pub fn segments(&self) -> &[JsonSegment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extend the path by one key.
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(JsonSegment::Key(key.to_string()));
        Self(segments)
    }
}

/// Split a dotted path on dots outside quotes and brackets.
fn split_outside_quotes(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut brackets = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => brackets += 1,
            (None, ']') => brackets = brackets.saturating_sub(1),
            (None, '.') if brackets == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Byte length of the quoted string `s` starts with, closing quote included.
fn quoted_len(s: &str) -> Option<usize> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    s[1..].find(quote).map(|i| i + 2)
}

fn unquote(s: &str) -> String {
    s.trim_matches(|c| c == '"' || c == '\'').to_string()
}

impl From<&str> for JsonPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for JsonPath {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl From<&[&str]> for JsonPath {
    fn from(segments: &[&str]) -> Self {
        Self::from_segments(segments)
    }
}

impl<const N: usize> From<[&str; N]> for JsonPath {
    fn from(segments: [&str; N]) -> Self {
        Self::from_segments(segments)
    }
}

impl From<Vec<String>> for JsonPath {
    fn from(segments: Vec<String>) -> Self {
        Self::from_segments(segments)
    }
}

/// One node of a condition tree.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare {
        column: String,
        op: Op,
        value: Value,
    },
    /// `left op right`, both sides identifiers.
    ColumnCompare {
        left: String,
        op: Op,
        right: String,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    InSubquery {
        column: String,
        query: Box<QueryBuilder>,
        negated: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    Null {
        column: String,
        negated: bool,
    },
    Like {
        column: String,
        pattern: Value,
        negated: bool,
        case_insensitive: bool,
    },
    /// Scalar at a JSON path compared with a value.
    Json {
        column: String,
        path: JsonPath,
        op: Op,
        value: Value,
    },
    /// JSON document (or the sub-document at `path`) contains `value`.
    JsonContains {
        column: String,
        path: JsonPath,
        value: JsonValue,
    },
    Exists {
        query: Box<QueryBuilder>,
        negated: bool,
    },
    /// `(SELECT COUNT(*) ...) op value` for correlated counts.
    Count {
        query: Box<QueryBuilder>,
        op: Op,
        value: i64,
    },
    /// Raw fragment; `?` marks are rewritten to the dialect's placeholders.
    Raw {
        sql: String,
        params: Vec<Value>,
    },
    Group(PredicateTree),
}

/// Ordered predicate list for one scope.
#[derive(Debug, Clone, Default)]
pub struct PredicateTree {
    pub(crate) nodes: Vec<(Connective, Predicate)>,
}

impl PredicateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn push(&mut self, connective: Connective, predicate: Predicate) {
        // Empty groups would render as "()"
        if let Predicate::Group(tree) = &predicate {
            if tree.is_empty() {
                return;
            }
        }
        self.nodes.push((connective, predicate));
    }

    /// Append all nodes of `other` as one parenthesized group.
    pub fn push_group(&mut self, connective: Connective, other: PredicateTree) {
        self.push(connective, Predicate::Group(other));
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Connective, Predicate)> {
        self.nodes.iter()
    }
}

/// Soft-delete policy of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDelete {
    pub column: String,
    pub kind: SoftDeleteKind,
}

/// How a soft-deleted row is marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftDeleteKind {
    /// Timestamp column, NULL while the row is live.
    Date,
    /// Boolean flag, false while the row is live.
    Boolean,
}

impl SoftDelete {
    pub fn date(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: SoftDeleteKind::Date,
        }
    }

    pub fn boolean(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: SoftDeleteKind::Boolean,
        }
    }

    /// Predicate selecting live rows, with the column qualified by `table`.
    pub fn not_deleted(&self, table: Option<&str>) -> Predicate {
        let column = match table {
            Some(t) if !self.column.contains('.') => format!("{}.{}", t, self.column),
            _ => self.column.clone(),
        };
        match self.kind {
            SoftDeleteKind::Date => Predicate::Null {
                column,
                negated: false,
            },
            SoftDeleteKind::Boolean => Predicate::Compare {
                column,
                op: Op::Eq,
                value: Value::Bool(false),
            },
        }
    }
}
