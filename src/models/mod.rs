//! Plain data types shared across the crate.

pub mod connection;
pub mod schema;
pub mod value;

pub use connection::{ConnectionConfig, ConnectionConfigError, ConnectionInfo, Dialect};
pub use schema::{
    ColumnDefinition, ForeignKey, ForeignKeyAction, IndexInfo, PrimaryKeyInfo, TableInfo,
};
pub use value::{ExecResult, RenderedQuery, Value};
