//! Batched relation loading.
//!
//! For a set of parent rows and one requested relation the resolver
//! collects the distinct key values, issues a single query filtered by
//! `key IN (...)` and groups the returned rows back onto their parents.
//! Nested requests run against the rows that level fetched, so a load tree
//! costs one statement per relation per level whatever the number of rows.
//! A level whose key set is empty issues nothing. LIMIT and OFFSET set by a
//! refinement count per parent, through a row number partitioned on the key.
//!
//! Many-to-many relations are fetched with one flat join through the pivot
//! table; the pivot's owner column is selected under [`PIVOT_KEY`] and used
//! for grouping, then dropped.

use super::{Relation, RelationKind};
use crate::db::executor::{Executor, Row};
use crate::error::{DbError, DbResult};
use crate::model::hydrate::to_app_object;
use crate::model::registry;
use crate::model::schema::EntitySchema;
use crate::models::Value;
use crate::query::{Connective, Op, QueryBuilder, ROW_NUMBER_COLUMN};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Alias of the pivot owner column in many-to-many fetches.
pub const PIVOT_KEY: &str = "__loom_pivot_key";

/// Default bound on nested load depth.
pub const DEFAULT_MAX_DEPTH: usize = 3;

pub type Refine = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

/// One relation to eager-load, with optional refinement and nested loads.
#[derive(Clone)]
pub struct LoadRequest {
    pub relation: String,
    pub refine: Option<Refine>,
    pub nested: Vec<LoadRequest>,
}

impl LoadRequest {
    pub fn new(relation: &str) -> Self {
        Self {
            relation: relation.to_string(),
            refine: None,
            nested: Vec::new(),
        }
    }

    /// Chain of requests from a dotted path (`"posts.comments.author"`).
    pub fn path(path: &str) -> Self {
        let mut segments = path.split('.').filter(|s| !s.is_empty()).rev();
        let mut request = Self::new(segments.next().unwrap_or(path));
        for segment in segments {
            request = Self::new(segment).with(request);
        }
        request
    }

    /// Constrain the related query (filters, ordering, selected columns).
    pub fn refine<F>(mut self, f: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        self.refine = Some(Arc::new(f));
        self
    }

    pub fn with(mut self, nested: LoadRequest) -> Self {
        merge_request(&mut self.nested, nested);
        self
    }

    /// Number of levels this request spans, itself included.
    pub fn depth(&self) -> usize {
        1 + self.nested.iter().map(LoadRequest::depth).max().unwrap_or(0)
    }

    /// Dotted path of the deepest branch, for error messages.
    pub fn deepest_path(&self) -> String {
        match self.nested.iter().max_by_key(|n| n.depth()) {
            Some(child) => format!("{}.{}", self.relation, child.deepest_path()),
            None => self.relation.clone(),
        }
    }
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("relation", &self.relation)
            .field("refine", &self.refine.is_some())
            .field("nested", &self.nested)
            .finish()
    }
}

/// Add `request` to `requests`, merging with an existing request for the
/// same relation so `load("posts")` and `load("posts.tags")` share a fetch.
pub fn merge_request(requests: &mut Vec<LoadRequest>, request: LoadRequest) {
    match requests.iter_mut().find(|r| r.relation == request.relation) {
        Some(existing) => {
            if request.refine.is_some() {
                existing.refine = request.refine;
            }
            for nested in request.nested {
                merge_request(&mut existing.nested, nested);
            }
        }
        None => requests.push(request),
    }
}

/// Fail with `RELATION_DEPTH_EXCEEDED` when any request is deeper than
/// `max_depth`.
pub fn check_depth(requests: &[LoadRequest], max_depth: usize) -> DbResult<()> {
    match requests.iter().find(|r| r.depth() > max_depth) {
        Some(request) => Err(DbError::relation_depth_exceeded(
            request.deepest_path(),
            max_depth,
        )),
        None => Ok(()),
    }
}

/// Load `requests` for `rows` of `owner`. The result is aligned with
/// `rows`: entry `i` maps relation names to the data loaded for row `i`.
pub fn load_relations<'a, E: Executor>(
    executor: &'a E,
    owner: &'a EntitySchema,
    rows: &'a [Row],
    requests: &'a [LoadRequest],
) -> BoxFuture<'a, DbResult<Vec<Map<String, JsonValue>>>> {
    Box::pin(async move {
        let mut loaded = vec![Map::new(); rows.len()];
        for request in requests {
            let relation = owner.relation_named(&request.relation)?;
            let related = registry::lookup(&relation.related_entity)?;
            let parent_key = parent_key_column(owner, relation)?;

            let keys = distinct_keys(rows, &parent_key);
            if keys.is_empty() {
                debug!(
                    entity = %owner.name,
                    relation = %relation.name,
                    "No keys to load relation for; skipping query"
                );
                for slot in &mut loaded {
                    slot.insert(relation.name.clone(), empty_value(relation.kind));
                }
                continue;
            }

            let mut query = relation_query(owner, relation, &related, keys)?;
            if let Some(refine) = &request.refine {
                // LIMIT/OFFSET from a refinement apply per parent
                query = refine(query).limit_per_partition(partition_column(owner, relation, &related)?)?;
            }
            let mut related_rows = query.many(executor).await?;
            debug!(
                entity = %owner.name,
                relation = %relation.name,
                parents = rows.len(),
                fetched = related_rows.len(),
                "Relation loaded"
            );

            let child_key = child_key_column(relation, &related)?;
            let group_keys: Vec<Option<String>> = related_rows
                .iter_mut()
                .map(|row| {
                    row.remove(ROW_NUMBER_COLUMN);
                    if relation.kind == RelationKind::ManyToMany {
                        row.remove(PIVOT_KEY).as_ref().and_then(key_string)
                    } else {
                        row.get(&child_key).and_then(key_string)
                    }
                })
                .collect();

            let nested = load_relations(executor, &related, &related_rows, &request.nested).await?;

            let mut groups: HashMap<String, Vec<JsonValue>> = HashMap::new();
            for ((row, relations), key) in related_rows.into_iter().zip(nested).zip(group_keys) {
                let object = to_app_object(&related, row, relations)?;
                if let Some(key) = key {
                    groups.entry(key).or_default().push(object);
                }
            }

            for (row, slot) in rows.iter().zip(loaded.iter_mut()) {
                let group = row
                    .get(&parent_key)
                    .and_then(key_string)
                    .and_then(|k| groups.get(&k));
                let value = match (relation.kind.is_collection(), group) {
                    (true, Some(items)) => JsonValue::Array(items.clone()),
                    (false, Some(items)) => items.first().cloned().unwrap_or(JsonValue::Null),
                    (_, None) => empty_value(relation.kind),
                };
                slot.insert(relation.name.clone(), value);
            }
        }
        Ok(loaded)
    })
}

/// Query fetching every related row for `keys`, before refinement.
pub fn relation_query(
    owner: &EntitySchema,
    relation: &Relation,
    related: &EntitySchema,
    keys: Vec<Value>,
) -> DbResult<QueryBuilder> {
    let query = match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany => QueryBuilder::table(&related.table)
            .filter_in(related.qualified(&relation.foreign_key), keys),
        RelationKind::BelongsTo => QueryBuilder::table(&related.table)
            .filter_in(related.qualified(&related.primary_key()?.db_name), keys),
        RelationKind::ManyToMany => {
            let through = pivot(owner, relation)?;
            let pivot_owner = format!("{}.{}", through.table, through.foreign_key);
            QueryBuilder::table(&related.table)
                .select([format!("{}.*", related.table)])
                .select_as(pivot_owner.clone(), PIVOT_KEY)
                .join(
                    &through.table,
                    format!("{}.{}", through.table, through.related_foreign_key),
                    Op::Eq,
                    related.qualified(&related.primary_key()?.db_name),
                )
                .filter_in(pivot_owner, keys)
        }
    };
    Ok(with_soft_delete(query, relation, related))
}

/// Correlated subquery matching the related rows of the outer `owner` row,
/// with no SELECT list. Used by relation-existence filters.
///
/// Self-referencing relations need the outer table aliased by the caller.
pub fn related_subquery(
    owner: &EntitySchema,
    relation: &Relation,
    related: &EntitySchema,
) -> DbResult<QueryBuilder> {
    let query = match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany => QueryBuilder::table(&related.table)
            .filter_column(
                related.qualified(&relation.foreign_key),
                Op::Eq,
                owner.qualified(&owner.primary_key()?.db_name),
            ),
        RelationKind::BelongsTo => QueryBuilder::table(&related.table).filter_column(
            related.qualified(&related.primary_key()?.db_name),
            Op::Eq,
            owner.qualified(&relation.foreign_key),
        ),
        RelationKind::ManyToMany => {
            let through = pivot(owner, relation)?;
            QueryBuilder::table(&related.table)
                .join(
                    &through.table,
                    format!("{}.{}", through.table, through.related_foreign_key),
                    Op::Eq,
                    related.qualified(&related.primary_key()?.db_name),
                )
                .filter_column(
                    format!("{}.{}", through.table, through.foreign_key),
                    Op::Eq,
                    owner.qualified(&owner.primary_key()?.db_name),
                )
        }
    };
    Ok(with_soft_delete(query, relation, related))
}

fn with_soft_delete(query: QueryBuilder, relation: &Relation, related: &EntitySchema) -> QueryBuilder {
    match relation.soft_delete.as_ref().or(related.soft_delete.as_ref()) {
        Some(policy) => query.push_predicate(Connective::And, policy.not_deleted(Some(&related.table))),
        None => query,
    }
}

fn pivot<'r>(owner: &EntitySchema, relation: &'r Relation) -> DbResult<&'r super::Through> {
    relation.through.as_ref().ok_or_else(|| {
        DbError::invalid_input(format!(
            "many-to-many relation '{}' on '{}' has no pivot table",
            relation.name, owner.name
        ))
    })
}

/// Column of the parent rows holding the key to collect.
fn parent_key_column(owner: &EntitySchema, relation: &Relation) -> DbResult<String> {
    Ok(match relation.kind {
        RelationKind::BelongsTo => relation.foreign_key.clone(),
        _ => owner.primary_key()?.db_name.clone(),
    })
}

/// Qualified column of the related query holding the owning parent's key.
fn partition_column(owner: &EntitySchema, relation: &Relation, related: &EntitySchema) -> DbResult<String> {
    Ok(match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany => related.qualified(&relation.foreign_key),
        RelationKind::BelongsTo => related.qualified(&related.primary_key()?.db_name),
        RelationKind::ManyToMany => {
            let through = pivot(owner, relation)?;
            format!("{}.{}", through.table, through.foreign_key)
        }
    })
}

/// Column of the related rows matching the parent key.
fn child_key_column(relation: &Relation, related: &EntitySchema) -> DbResult<String> {
    Ok(match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany => relation.foreign_key.clone(),
        RelationKind::BelongsTo => related.primary_key()?.db_name.clone(),
        RelationKind::ManyToMany => PIVOT_KEY.to_string(),
    })
}

fn empty_value(kind: RelationKind) -> JsonValue {
    if kind.is_collection() {
        JsonValue::Array(Vec::new())
    } else {
        JsonValue::Null
    }
}

/// Grouping key of a JSON scalar. Numbers and their decimal text compare
/// equal, since drivers disagree on how wide integers come back.
fn key_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn distinct_keys(rows: &[Row], column: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|value| key_string(value).is_some_and(|k| seen.insert(k)))
        .map(Value::from_decoded)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::ColumnDescriptor;
    use crate::models::Dialect;
    use crate::query::SoftDelete;
    use serde_json::json;

    fn owner() -> EntitySchema {
        EntitySchema::new("ResolverUser", "users")
            .column(ColumnDescriptor::new("id").primary_key())
            .finalize()
    }

    fn tags() -> EntitySchema {
        EntitySchema::new("ResolverTag", "tags")
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("label"))
            .soft_delete(SoftDelete::date("deleted_at"))
            .finalize()
    }

    fn m2m() -> Relation {
        Relation {
            name: "tags".into(),
            kind: RelationKind::ManyToMany,
            related_entity: "ResolverTag".into(),
            foreign_key: "user_id".into(),
            through: Some(super::super::Through {
                table: "user_tags".into(),
                foreign_key: "user_id".into(),
                related_foreign_key: "tag_id".into(),
            }),
            soft_delete: None,
        }
    }

    #[test]
    fn test_load_request_path_and_depth() {
        let request = LoadRequest::path("posts.comments.author");
        assert_eq!(request.depth(), 3);
        assert_eq!(request.deepest_path(), "posts.comments.author");
        assert!(check_depth(&[request.clone()], 3).is_ok());
        let err = check_depth(&[request], 2).unwrap_err();
        assert_eq!(err.code(), "RELATION_DEPTH_EXCEEDED");
    }

    #[test]
    fn test_merge_requests_share_a_fetch() {
        let mut requests = Vec::new();
        merge_request(&mut requests, LoadRequest::path("posts"));
        merge_request(&mut requests, LoadRequest::path("posts.tags"));
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].nested[0].relation, "tags");
    }

    #[test]
    fn test_many_to_many_query_is_one_flat_join() {
        let q = relation_query(&owner(), &m2m(), &tags(), vec![Value::Int(1), Value::Int(2)])
            .unwrap()
            .to_query(Dialect::Postgres)
            .unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT "tags".*, "user_tags"."user_id" AS "__loom_pivot_key" FROM "tags" INNER JOIN "user_tags" ON "user_tags"."tag_id" = "tags"."id" WHERE "user_tags"."user_id" IN ($1, $2) AND "tags"."deleted_at" IS NULL"#
        );
    }

    #[test]
    fn test_related_subquery_correlates_on_owner() {
        let q = related_subquery(&owner(), &m2m(), &tags())
            .unwrap()
            .select_raw("1", Vec::new())
            .to_query(Dialect::Sqlite)
            .unwrap();
        assert!(q.sql.contains(r#""user_tags"."user_id" = "users"."id""#));
    }

    #[test]
    fn test_distinct_keys_skip_nulls_and_duplicates() {
        let rows: Vec<Row> = [json!(1), json!(1), JsonValue::Null, json!("1"), json!(2)]
            .into_iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert("team_id".into(), v);
                row
            })
            .collect();
        assert_eq!(distinct_keys(&rows, "team_id"), vec![Value::Int(1), Value::Int(2)]);
    }
}
