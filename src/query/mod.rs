//! Dialect-neutral query construction.
//!
//! Builders in this module describe statements and render them to SQL text
//! plus bindings without touching a database. Execution is the separate,
//! explicit step in [`execute`].

pub mod builder;
pub mod cte;
pub mod execute;
pub mod join;
pub mod pagination;
pub mod predicate;
pub mod projection;
pub mod render;
pub mod write;

pub use builder::{
    LockStrength, LockWait, OrderBy, OrderDirection, QueryBuilder, ROW_NUMBER_COLUMN, RowLock, Source,
    UnionKind,
};
pub use cte::{CteClause, CteEntry, CteMode};
pub use execute::{WriteResult, deserialize_row};
pub use join::{JoinClause, JoinCondition, JoinKind, TableRef};
pub use pagination::{Cursor, CursorPage, CursorSpec, Page};
pub use predicate::{
    Connective, JsonPath, JsonSegment, Op, Predicate, PredicateTree, SoftDelete, SoftDeleteKind,
};
pub use projection::Projection;
pub use render::SqlWriter;
pub use write::{
    Assignment, ConflictAction, DeleteStatement, InsertStatement, OnConflict, UpdateStatement,
    truncate_query,
};
