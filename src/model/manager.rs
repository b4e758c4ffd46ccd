//! CRUD for one entity against one executor.

use super::Model;
use super::hydrate::{Record, dehydrate, hydrate, primary_key_value, row_values};
use super::query::ModelQuery;
use super::registry;
use super::schema::EntitySchema;
use crate::db::executor::{Executor, Row};
use crate::error::{DbError, DbResult};
use crate::models::Value;
use crate::query::execute::WriteResult;
use crate::query::{InsertStatement, QueryBuilder};
use serde_json::Map;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Typed access to `M` through `executor` (a data source, connection or
/// transaction).
pub struct ModelManager<'e, M: Model, E: Executor> {
    executor: &'e E,
    schema: Arc<EntitySchema>,
    _model: PhantomData<fn() -> M>,
}

impl<'e, M: Model, E: Executor> ModelManager<'e, M, E> {
    pub fn new(executor: &'e E) -> DbResult<Self> {
        Ok(Self {
            executor,
            schema: registry::schema_of::<M>()?,
            _model: PhantomData,
        })
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// A fresh typed query over `M`.
    pub fn query(&self) -> ModelQuery<M> {
        ModelQuery::from_schema(Arc::clone(&self.schema))
    }

    pub async fn find<F>(&self, build: F) -> DbResult<Vec<Record<M>>>
    where
        F: FnOnce(ModelQuery<M>) -> ModelQuery<M>,
    {
        build(self.query()).many(self.executor).await
    }

    pub async fn find_one<F>(&self, build: F) -> DbResult<Option<Record<M>>>
    where
        F: FnOnce(ModelQuery<M>) -> ModelQuery<M>,
    {
        build(self.query()).one(self.executor).await
    }

    pub async fn find_by_pk(&self, value: impl Into<Value>) -> DbResult<Option<Record<M>>> {
        let pk = self.schema.qualified(&self.schema.primary_key()?.db_name);
        let value = value.into();
        self.query()
            .query(|q| q.filter_eq(pk, value))
            .one(self.executor)
            .await
    }

    /// Insert `model` and return the stored record.
    ///
    /// Backends with RETURNING hand back the row directly; MySQL reads it
    /// back through the generated id.
    pub async fn insert(&self, model: &M) -> DbResult<Record<M>> {
        let mut row = dehydrate(&self.schema, model)?;
        M::before_insert(&mut row)?;
        let statement = InsertStatement::new(&self.schema.table)
            .row(row_values(&row))
            .returning(self.column_names());
        let result = statement.execute(self.executor).await?;
        debug!(entity = M::ENTITY, rows = result.rows_affected, "Record inserted");

        if let Some(stored) = result.rows.into_iter().next() {
            return hydrate(&self.schema, stored, Map::new());
        }
        let pk = self.schema.primary_key()?;
        let key = match row.get(&pk.db_name) {
            Some(v) if !v.is_null() => Some(Value::from_decoded(v)),
            _ => result.last_insert_id.map(Value::Int),
        };
        match key {
            Some(key) => self.find_by_pk(key).await?.ok_or_else(|| {
                DbError::row_not_found(format!("inserted {} could not be read back", M::ENTITY))
            }),
            None => Ok(Record::new(self.rehydrate(row)?)),
        }
    }

    /// Insert all `models` in one statement.
    ///
    /// Without RETURNING the given models are returned as-is.
    pub async fn insert_many(&self, models: &[M]) -> DbResult<Vec<Record<M>>> {
        if models.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.prepared_rows(models)?;
        let statement = InsertStatement::new(&self.schema.table)
            .rows(rows.iter().map(row_values))
            .returning(self.column_names());
        let result = statement.execute(self.executor).await?;
        if !result.rows.is_empty() {
            return result
                .rows
                .into_iter()
                .map(|row| hydrate(&self.schema, row, Map::new()))
                .collect();
        }
        rows.into_iter()
            .map(|row| self.rehydrate(row).map(Record::new))
            .collect()
    }

    /// Insert or, when `conflict` (field names) collides, overwrite.
    pub async fn upsert(&self, models: &[M], conflict: &[&str]) -> DbResult<WriteResult> {
        if models.is_empty() {
            return Ok(WriteResult::default());
        }
        let target = conflict
            .iter()
            .map(|field| {
                self.schema
                    .column_by_app(field)
                    .map(|c| c.db_name.clone())
                    .ok_or_else(|| {
                        DbError::invalid_input(format!("{} has no field '{field}'", M::ENTITY))
                    })
            })
            .collect::<DbResult<Vec<_>>>()?;
        let rows = self.prepared_rows(models)?;
        QueryBuilder::table(&self.schema.table)
            .upsert(rows.iter().map(row_values), target)?
            .execute(self.executor)
            .await
    }

    /// Write every non-key field of `model` to its row and return the
    /// refreshed record.
    pub async fn update_record(&self, model: &M) -> DbResult<Record<M>> {
        let key = primary_key_value(&self.schema, model)?;
        let pk = self.schema.primary_key()?.db_name.clone();
        let row = dehydrate(&self.schema, model)?;
        let values: Vec<(String, Value)> = row_values(&row)
            .into_iter()
            .filter(|(column, _)| *column != pk)
            .collect();
        let query = M::before_update(self.by_key(key.clone())?);
        let result = query.update(self.executor, values).await?;
        debug!(entity = M::ENTITY, rows = result.rows_affected, "Record updated");
        self.refresh_key(key).await
    }

    /// Delete `model`'s row. Returns the number of rows removed.
    pub async fn delete_record(&self, model: &M) -> DbResult<u64> {
        let key = primary_key_value(&self.schema, model)?;
        let query = M::before_delete(self.by_key(key)?);
        Ok(query.delete(self.executor).await?.rows_affected)
    }

    /// Mark `model`'s row deleted under the entity's soft-delete policy.
    pub async fn soft_delete_record(&self, model: &M) -> DbResult<u64> {
        let policy = self.schema.soft_delete.as_ref().ok_or_else(|| {
            DbError::invalid_input(format!("{} has no soft-delete column", M::ENTITY))
        })?;
        let key = primary_key_value(&self.schema, model)?;
        let query = M::before_delete(self.by_key(key)?);
        Ok(query
            .soft_delete_statement(policy)?
            .execute(self.executor)
            .await?
            .rows_affected)
    }

    /// Re-read `model` from the database.
    pub async fn refresh(&self, model: &M) -> DbResult<Record<M>> {
        let key = primary_key_value(&self.schema, model)?;
        self.refresh_key(key).await
    }

    async fn refresh_key(&self, key: Value) -> DbResult<Record<M>> {
        let pk = self.schema.qualified(&self.schema.primary_key()?.db_name);
        self.query()
            .with_trashed()
            .query(|q| q.filter_eq(pk, key))
            .one_or_fail(self.executor)
            .await
    }

    fn by_key(&self, key: Value) -> DbResult<QueryBuilder> {
        let pk = &self.schema.primary_key()?.db_name;
        Ok(QueryBuilder::table(&self.schema.table).filter_eq(pk.as_str(), key))
    }

    fn prepared_rows(&self, models: &[M]) -> DbResult<Vec<Row>> {
        models
            .iter()
            .map(|model| {
                let mut row = dehydrate(&self.schema, model)?;
                M::before_insert(&mut row)?;
                Ok(row)
            })
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.schema.columns.iter().map(|c| c.db_name.clone()).collect()
    }

    /// Hydrate a row that was prepared for writing (values already in
    /// database form).
    fn rehydrate(&self, row: Row) -> DbResult<M> {
        Ok(hydrate::<M>(&self.schema, row, Map::new())?.into_inner())
    }
}
