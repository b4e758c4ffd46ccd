//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Data sources with connection pools and read replicas
//! - Statement execution through the [`Executor`] trait
//! - Transactions with nested savepoints and the global transaction
//! - Advisory locks
//! - Schema introspection
//! - Type mappings between driver rows and JSON

pub mod executor;
pub mod global;
pub mod lock;
pub mod mssql;
pub mod params;
pub mod pool;
pub mod schema;
pub mod transaction;
pub mod types;

pub use executor::{Connection, Executor, Row};
pub use global::{clear_default_source, default_source, set_default_source};
pub use lock::LOCK_POLL_INTERVAL_MS;
pub use pool::{CloneOptions, DataSource, DbPool};
pub use schema::SchemaInspector;
pub use transaction::{
    ExitOptions, IsolationLevel, Transaction, TransactionOptions, TransactionState,
};
pub use types::JsonRow;
