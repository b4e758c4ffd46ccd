//! loom-orm
//!
//! A dialect-aware data access layer for PostgreSQL, CockroachDB, MySQL,
//! MariaDB, SQLite and SQL Server: a query builder that renders without
//! touching the database, eager relation loading with one batched query per
//! relation and level, nested transactions over savepoints, and typed
//! entities hydrated from rows.

pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod model;
pub mod models;
pub mod query;
pub mod relation;

pub use config::DataSourceConfig;
pub use db::{DataSource, Executor, Transaction, TransactionOptions};
pub use error::{DbError, DbResult};
pub use model::{Model, ModelManager, ModelQuery, Record};
pub use models::{Dialect, Value};
pub use query::QueryBuilder;
pub use relation::{LoadRequest, Relation, RelationKind};
