//! Typed entities on top of the query builder.
//!
//! An entity is a serde type implementing [`Model`]. Its [`EntitySchema`]
//! is registered once ([`registry::register`]) and then drives hydration
//! ([`hydrate`]), relation loading and the typed query and CRUD APIs
//! ([`ModelQuery`], [`ModelManager`]).
//!
//! Hooks are static extension points invoked by the query pipeline around
//! the statements it issues. Their defaults do nothing.

pub mod hydrate;
pub mod manager;
pub mod query;
pub mod registry;
pub mod schema;
pub mod transforms;

pub use hydrate::Record;
pub use manager::ModelManager;
pub use query::ModelQuery;
pub use registry::{is_registered, lookup, register, schema_of};
pub use schema::{CaseConvention, ColumnDescriptor, EntitySchema};
pub use transforms::Transform;

use crate::db::executor::Row;
use crate::error::DbResult;
use crate::query::QueryBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registry key; also used in error messages.
    const ENTITY: &'static str;

    fn define() -> EntitySchema;

    /// May rewrite the outgoing row (database column names, prepared values).
    fn before_insert(_row: &mut Row) -> DbResult<()> {
        Ok(())
    }

    /// May constrain the UPDATE about to run.
    fn before_update(query: QueryBuilder) -> QueryBuilder {
        query
    }

    /// May constrain the DELETE (or soft delete) about to run.
    fn before_delete(query: QueryBuilder) -> QueryBuilder {
        query
    }

    /// May constrain the SELECT about to run.
    fn before_fetch(query: QueryBuilder) -> QueryBuilder {
        query
    }

    /// May post-process hydrated records before they are returned.
    fn after_fetch(records: Vec<Record<Self>>) -> DbResult<Vec<Record<Self>>> {
        Ok(records)
    }
}
