//! Typed queries over a registered entity.
//!
//! [`ModelQuery`] wraps a [`QueryBuilder`] targeting the entity's table and
//! adds what needs the entity metadata: soft-delete scoping, relation
//! existence filters and eager loading. Like the builder it wraps, it never
//! runs anything until one of the async terminal methods is awaited.

use super::Model;
use super::hydrate::{Record, hydrate};
use super::registry;
use super::schema::EntitySchema;
use crate::db::executor::{Executor, Row};
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, RenderedQuery, Value};
use crate::query::pagination::{CursorPage, CursorSpec, Page, cursor_page, offset_page};
use crate::query::{Connective, Op, OrderDirection, QueryBuilder};
use crate::relation::resolver::{
    DEFAULT_MAX_DEPTH, LoadRequest, check_depth, load_relations, merge_request, related_subquery,
};
use std::marker::PhantomData;
use std::sync::Arc;

pub struct ModelQuery<M: Model> {
    schema: Arc<EntitySchema>,
    builder: QueryBuilder,
    loads: Vec<LoadRequest>,
    max_depth: usize,
    with_trashed: bool,
    /// First relation filter that could not be resolved; its error is
    /// reported by terminal methods.
    failed_relation: Option<String>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for ModelQuery<M> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            builder: self.builder.clone(),
            loads: self.loads.clone(),
            max_depth: self.max_depth,
            with_trashed: self.with_trashed,
            failed_relation: self.failed_relation.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> std::fmt::Debug for ModelQuery<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelQuery")
            .field("entity", &M::ENTITY)
            .field("builder", &self.builder)
            .field("loads", &self.loads)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl<M: Model> ModelQuery<M> {
    /// Query over `M`'s table. Fails when `M` is not registered.
    pub fn new() -> DbResult<Self> {
        Ok(Self::from_schema(registry::schema_of::<M>()?))
    }

    pub(crate) fn from_schema(schema: Arc<EntitySchema>) -> Self {
        let builder = QueryBuilder::table(&schema.table);
        Self {
            schema,
            builder,
            loads: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            with_trashed: false,
            failed_relation: None,
            _model: PhantomData,
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    /// Apply arbitrary builder calls (`|q| q.filter_between(...)`).
    pub fn query<F>(mut self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.builder = f(self.builder);
        self
    }

    pub fn filter(self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.query(|q| q.filter(column, op, value))
    }

    pub fn filter_eq(self, column: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.query(|q| q.filter_eq(column, value))
    }

    pub fn filter_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query(|q| q.filter_in(column, values))
    }

    pub fn order_by(self, column: &str, direction: OrderDirection) -> Self {
        self.query(|q| q.order_by(column, direction))
    }

    pub fn limit(self, limit: u64) -> Self {
        self.query(|q| q.limit(limit))
    }

    pub fn offset(self, offset: u64) -> Self {
        self.query(|q| q.offset(offset))
    }

    /// Include soft-deleted rows.
    pub fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }

    /// Eager-load a relation; dotted paths load nested relations.
    pub fn load(self, path: &str) -> Self {
        self.load_request(LoadRequest::path(path))
    }

    /// Eager-load a relation whose query is constrained by `refine`.
    pub fn load_with<F>(self, relation: &str, refine: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        self.load_request(LoadRequest::new(relation).refine(refine))
    }

    pub fn load_request(mut self, request: LoadRequest) -> Self {
        merge_request(&mut self.loads, request);
        self
    }

    /// Bound on nested eager loading. Cyclic relation graphs are not
    /// detected; this is the only guard.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Keep rows that have at least one related row.
    pub fn having_related(self, relation: &str) -> Self {
        self.relation_filter(relation, |q, sub| q.filter_exists(sub.select_raw("1", Vec::new())))
    }

    /// Keep rows with at least one related row matching `refine`.
    pub fn having_related_with<F>(self, relation: &str, refine: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.relation_filter(relation, |q, sub| {
            q.filter_exists(refine(sub).select_raw("1", Vec::new()))
        })
    }

    pub fn not_having_related(self, relation: &str) -> Self {
        self.relation_filter(relation, |q, sub| {
            q.filter_not_exists(sub.select_raw("1", Vec::new()))
        })
    }

    /// Keep rows whose related row count satisfies `op threshold`.
    pub fn having_related_count(self, relation: &str, op: Op, threshold: i64) -> Self {
        self.relation_filter(relation, |q, sub| {
            q.filter_count(sub.select_raw("COUNT(*)", Vec::new()), op, threshold)
        })
    }

    fn relation_filter<F>(mut self, relation: &str, apply: F) -> Self
    where
        F: FnOnce(QueryBuilder, QueryBuilder) -> QueryBuilder,
    {
        match self.correlated(relation) {
            Ok(sub) => {
                self.builder = apply(self.builder, sub);
            }
            Err(_) => {
                self.failed_relation.get_or_insert_with(|| relation.to_string());
            }
        }
        self
    }

    fn correlated(&self, relation: &str) -> DbResult<QueryBuilder> {
        let relation = self.schema.relation_named(relation)?;
        let related = registry::lookup(&relation.related_entity)?;
        related_subquery(&self.schema, relation, &related)
    }

    /// The SELECT that would run, with hooks and soft-delete scoping applied.
    pub fn prepared_builder(&self) -> DbResult<QueryBuilder> {
        if let Some(relation) = &self.failed_relation {
            return Err(self.correlated(relation).err().unwrap_or_else(|| {
                DbError::invalid_input(format!("relation filter on '{relation}' was not applied"))
            }));
        }
        check_depth(&self.loads, self.max_depth)?;
        let mut builder = M::before_fetch(self.builder.clone());
        if let (Some(policy), false) = (&self.schema.soft_delete, self.with_trashed) {
            builder = builder.push_predicate(
                Connective::And,
                policy.not_deleted(Some(&self.schema.table)),
            );
        }
        Ok(builder)
    }

    /// Render without running.
    pub fn to_query(&self, dialect: Dialect) -> DbResult<RenderedQuery> {
        self.prepared_builder()?.to_query(dialect)
    }

    pub async fn many<E: Executor>(&self, executor: &E) -> DbResult<Vec<Record<M>>> {
        let rows = self.prepared_builder()?.many(executor).await?;
        self.hydrate_rows(executor, rows).await
    }

    pub async fn one<E: Executor>(&self, executor: &E) -> DbResult<Option<Record<M>>> {
        let Some(row) = self.prepared_builder()?.one(executor).await? else {
            return Ok(None);
        };
        Ok(self.hydrate_rows(executor, vec![row]).await?.into_iter().next())
    }

    pub async fn one_or_fail<E: Executor>(&self, executor: &E) -> DbResult<Record<M>> {
        self.one(executor)
            .await?
            .ok_or_else(|| DbError::row_not_found(format!("no {} matched", M::ENTITY)))
    }

    pub async fn count<E: Executor>(&self, executor: &E) -> DbResult<u64> {
        self.prepared_builder()?.count(executor).await
    }

    pub async fn exists<E: Executor>(&self, executor: &E) -> DbResult<bool> {
        self.prepared_builder()?.exists(executor).await
    }

    pub async fn paginate<E: Executor>(
        &self,
        executor: &E,
        page: u64,
        per_page: u64,
    ) -> DbResult<Page<Record<M>>> {
        let builder = self.prepared_builder()?;
        let rows = builder.page_query(page, per_page)?.many(executor).await?;
        let total = builder.count(executor).await?;
        let records = self.hydrate_rows(executor, rows).await?;
        Ok(offset_page(records, total, page, per_page))
    }

    pub async fn cursor_paginate<E: Executor>(
        &self,
        executor: &E,
        spec: &CursorSpec,
        per_page: u64,
        cursor: Option<&str>,
    ) -> DbResult<CursorPage<Record<M>>> {
        let rows = self
            .prepared_builder()?
            .cursor_query(spec, per_page, cursor)?
            .many(executor)
            .await?;
        let page = cursor_page(rows, spec, per_page)?;
        let data = self.hydrate_rows(executor, page.data).await?;
        Ok(CursorPage {
            data,
            next_cursor: page.next_cursor,
            per_page: page.per_page,
        })
    }

    /// Load requested relations for `rows`, hydrate, run `after_fetch`.
    async fn hydrate_rows<E: Executor>(
        &self,
        executor: &E,
        rows: Vec<Row>,
    ) -> DbResult<Vec<Record<M>>> {
        let relations = load_relations(executor, &self.schema, &rows, &self.loads).await?;
        let records = rows
            .into_iter()
            .zip(relations)
            .map(|(row, relations)| hydrate::<M>(&self.schema, row, relations))
            .collect::<DbResult<Vec<_>>>()?;
        M::after_fetch(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::ColumnDescriptor;
    use crate::query::SoftDelete;
    use crate::relation::Relation;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Author {
        id: i64,
        name: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Article {
        id: i64,
        author_id: i64,
    }

    impl Model for Author {
        const ENTITY: &'static str = "QueryAuthor";

        fn define() -> EntitySchema {
            EntitySchema::new(Self::ENTITY, "authors")
                .column(ColumnDescriptor::new("id").primary_key())
                .column(ColumnDescriptor::new("name"))
                .soft_delete(SoftDelete::date("deleted_at"))
                .relation(Relation::has_many::<Article>("articles", "author_id"))
        }
    }

    impl Model for Article {
        const ENTITY: &'static str = "QueryArticle";

        fn define() -> EntitySchema {
            EntitySchema::new(Self::ENTITY, "articles")
                .column(ColumnDescriptor::new("id").primary_key())
                .column(ColumnDescriptor::new("author_id"))
                .relation(Relation::belongs_to::<Author>("author", "author_id"))
        }
    }

    fn setup() {
        registry::register::<Author>();
        registry::register::<Article>();
    }

    #[test]
    fn test_soft_delete_scope_and_with_trashed() {
        setup();
        let q = ModelQuery::<Author>::new().unwrap().filter_eq("name", "Ada");
        assert_eq!(
            q.to_query(Dialect::Sqlite).unwrap().sql,
            r#"SELECT * FROM "authors" WHERE "name" = ? AND "authors"."deleted_at" IS NULL"#
        );
        let trashed = q.with_trashed().to_query(Dialect::Sqlite).unwrap();
        assert_eq!(trashed.sql, r#"SELECT * FROM "authors" WHERE "name" = ?"#);
    }

    #[test]
    fn test_having_related_count() {
        setup();
        let q = ModelQuery::<Author>::new()
            .unwrap()
            .with_trashed()
            .having_related_count("articles", Op::Gte, 2)
            .to_query(Dialect::Postgres)
            .unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT * FROM "authors" WHERE (SELECT COUNT(*) FROM "articles" WHERE "articles"."author_id" = "authors"."id") >= $1"#
        );
        assert_eq!(q.params, vec![Value::Int(2)]);
    }

    #[test]
    fn test_unknown_relation_is_reported_at_render() {
        setup();
        let err = ModelQuery::<Article>::new()
            .unwrap()
            .having_related("comments")
            .to_query(Dialect::MySql)
            .unwrap_err();
        assert_eq!(err.code(), "RELATION_NOT_FOUND");
    }

    #[test]
    fn test_depth_bound() {
        setup();
        let err = ModelQuery::<Author>::new()
            .unwrap()
            .load("articles.author.articles")
            .max_depth(2)
            .to_query(Dialect::Sqlite)
            .unwrap_err();
        assert_eq!(err.code(), "RELATION_DEPTH_EXCEEDED");
    }
}
