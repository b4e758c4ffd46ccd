//! Offset and cursor (keyset) pagination.
//!
//! Both forms are built here without I/O; `query::execute` runs them.
//!
//! A cursor is opaque to callers: URL-safe base64 of a small JSON object
//! holding the last row's discriminator value and, when a tiebreaker column
//! is configured, the tiebreaker value. The next page continues strictly
//! after that position, so rows are never repeated or skipped as long as
//! `(column, tiebreaker)` is unique.

use super::builder::{OrderDirection, QueryBuilder};
use super::predicate::Op;
use crate::db::executor::Row;
use crate::error::{DbError, DbResult};
use crate::models::Value;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One page of an offset-paginated query.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    /// 1-based.
    pub page: u64,
    pub per_page: u64,
    pub last_page: u64,
}

impl<T> Page<T> {
    pub fn has_more_pages(&self) -> bool {
        self.page < self.last_page
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            last_page: self.last_page,
        }
    }
}

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub data: Vec<T>,
    /// `None` on the last page.
    pub next_cursor: Option<String>,
    pub per_page: u64,
}

impl<T> CursorPage<T> {
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> CursorPage<U> {
        CursorPage {
            data: self.data.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            per_page: self.per_page,
        }
    }
}

/// Ordering used by cursor pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSpec {
    pub column: String,
    pub tiebreaker: Option<String>,
    pub direction: OrderDirection,
}

impl CursorSpec {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            tiebreaker: None,
            direction: OrderDirection::Asc,
        }
    }

    pub fn with_tiebreaker(mut self, column: impl Into<String>) -> Self {
        self.tiebreaker = Some(column.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.direction = OrderDirection::Desc;
        self
    }

    fn op(&self) -> Op {
        match self.direction {
            OrderDirection::Asc => Op::Gt,
            OrderDirection::Desc => Op::Lt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "v")]
    pub value: JsonValue,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub tiebreaker: Option<JsonValue>,
}

impl Cursor {
    pub fn encode(&self) -> String {
        // serializing a struct of JSON values cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(cursor: &str) -> DbResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor.trim())
            .map_err(|e| DbError::invalid_cursor(format!("not base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DbError::invalid_cursor(format!("malformed payload: {e}")))
    }

    /// Cursor pointing at `row` under `spec`. `None` when the row lacks the
    /// discriminator column.
    pub fn from_row(row: &Row, spec: &CursorSpec) -> Option<Self> {
        let value = row.get(output_key(&spec.column))?.clone();
        let tiebreaker = match &spec.tiebreaker {
            Some(column) => Some(row.get(output_key(column))?.clone()),
            None => None,
        };
        Some(Self { value, tiebreaker })
    }
}

/// Result key of a possibly qualified column (`users.id` → `id`).
fn output_key(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

impl QueryBuilder {
    /// Data query for page `page` (1-based) of `per_page` rows.
    pub fn page_query(&self, page: u64, per_page: u64) -> DbResult<QueryBuilder> {
        if per_page == 0 {
            return Err(DbError::invalid_input("per_page must be greater than zero"));
        }
        let offset = (page.max(1) - 1)
            .checked_mul(per_page)
            .ok_or_else(|| DbError::invalid_input(format!("page {page} is out of range")))?;
        Ok(self.clone().limit(per_page).offset(offset))
    }

    /// Keyset query fetching `per_page + 1` rows after `cursor`. The extra
    /// row tells the caller whether another page exists.
    pub fn cursor_query(
        &self,
        spec: &CursorSpec,
        per_page: u64,
        cursor: Option<&str>,
    ) -> DbResult<QueryBuilder> {
        if per_page == 0 {
            return Err(DbError::invalid_input("per_page must be greater than zero"));
        }
        let fetch = per_page
            .checked_add(1)
            .ok_or_else(|| DbError::invalid_input(format!("per_page {per_page} is out of range")))?;
        let mut query = self.clone().reorder();
        if let Some(cursor) = cursor {
            let cursor = Cursor::decode(cursor)?;
            let value = Value::from_decoded(&cursor.value);
            let op = spec.op();
            query = match (&spec.tiebreaker, cursor.tiebreaker) {
                (Some(tb_column), Some(tb_value)) => {
                    let column = spec.column.clone();
                    let tb_column = tb_column.clone();
                    query.filter_group(move |g| {
                        g.filter(column.clone(), op, value.clone()).or_filter_group(|inner| {
                            inner
                                .filter_eq(column, value)
                                .filter(tb_column, op, Value::from_decoded(&tb_value))
                        })
                    })
                }
                (Some(_), None) => {
                    return Err(DbError::invalid_cursor(
                        "cursor has no tiebreaker value for a tiebreaker ordering",
                    ));
                }
                (None, _) => query.filter(spec.column.clone(), op, value),
            };
        }
        query = query.order_by(spec.column.clone(), spec.direction);
        if let Some(tb) = &spec.tiebreaker {
            query = query.order_by(tb.clone(), spec.direction);
        }
        Ok(query.limit(fetch))
    }
}

/// Turn the `per_page + 1` rows fetched by [`QueryBuilder::cursor_query`]
/// into a page.
pub fn cursor_page(mut rows: Vec<Row>, spec: &CursorSpec, per_page: u64) -> DbResult<CursorPage<Row>> {
    let has_more = rows.len() as u64 > per_page;
    rows.truncate(per_page as usize);
    let next_cursor = if has_more {
        let last = rows.last().ok_or_else(|| DbError::invalid_input("empty page"))?;
        let cursor = Cursor::from_row(last, spec).ok_or_else(|| {
            DbError::invalid_cursor(format!(
                "cursor column '{}' is missing from the selected columns",
                spec.column
            ))
        })?;
        Some(cursor.encode())
    } else {
        None
    };
    Ok(CursorPage {
        data: rows,
        next_cursor,
        per_page,
    })
}

/// Assemble an offset page from its rows and total.
pub fn offset_page<T>(data: Vec<T>, total: u64, page: u64, per_page: u64) -> Page<T> {
    let last_page = total.div_ceil(per_page.max(1)).max(1);
    Page {
        data,
        total,
        page: page.max(1),
        per_page,
        last_page,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dialect;
    use serde_json::json;

    #[test]
    fn test_cursor_encoding_is_url_safe() {
        let cursor = Cursor {
            value: json!("a/b+c?"),
            tiebreaker: Some(json!(17)),
        };
        let encoded = cursor.encode();
        assert!(!encoded.contains('/') && !encoded.contains('+') && !encoded.contains('='));
        assert_eq!(Cursor::decode(&encoded).unwrap(), cursor);
    }

    #[test]
    fn test_invalid_cursor() {
        let err = Cursor::decode("%%%").unwrap_err();
        assert_eq!(err.code(), "INVALID_CURSOR");
        let err = Cursor::decode(&URL_SAFE_NO_PAD.encode(b"[1,2]")).unwrap_err();
        assert_eq!(err.code(), "INVALID_CURSOR");
    }

    #[test]
    fn test_page_query() {
        let q = QueryBuilder::table("users")
            .page_query(3, 10)
            .unwrap()
            .to_query(Dialect::Postgres)
            .unwrap();
        assert_eq!(q.sql, r#"SELECT * FROM "users" LIMIT 10 OFFSET 20"#);
        assert!(QueryBuilder::table("users").page_query(1, 0).is_err());
    }

    #[test]
    fn test_paging_arithmetic_overflow_is_rejected() {
        let err = QueryBuilder::table("t").page_query(u64::MAX, 10).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        let err = QueryBuilder::table("t")
            .cursor_query(&CursorSpec::new("id"), u64::MAX, None)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        // The largest representable page still renders.
        assert!(QueryBuilder::table("t").page_query(u64::MAX, 1).is_ok());
    }

    #[test]
    fn test_cursor_query_with_tiebreaker() {
        let spec = CursorSpec::new("score").with_tiebreaker("id").descending();
        let cursor = Cursor {
            value: json!(90),
            tiebreaker: Some(json!(4)),
        }
        .encode();
        let q = QueryBuilder::table("players")
            .cursor_query(&spec, 2, Some(&cursor))
            .unwrap()
            .to_query(Dialect::Sqlite)
            .unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT * FROM "players" WHERE ("score" < ? OR ("score" = ? AND "id" < ?)) ORDER BY "score" DESC, "id" DESC LIMIT 3"#
        );
        assert_eq!(q.params, vec![Value::Int(90), Value::Int(90), Value::Int(4)]);
    }

    #[test]
    fn test_cursor_page_next_cursor() {
        let spec = CursorSpec::new("id");
        let rows: Vec<Row> = (1..=3)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".into(), json!(i));
                row
            })
            .collect();
        let page = cursor_page(rows.clone(), &spec, 2).unwrap();
        assert_eq!(page.data.len(), 2);
        let next = Cursor::decode(page.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(next.value, json!(2));

        let last = cursor_page(rows, &spec, 5).unwrap();
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_offset_page_bounds() {
        let page = offset_page(vec![1, 2], 5, 1, 2);
        assert_eq!(page.last_page, 3);
        assert!(page.has_more_pages());
        assert_eq!(offset_page(Vec::<i32>::new(), 0, 0, 10).last_page, 1);
    }
}
