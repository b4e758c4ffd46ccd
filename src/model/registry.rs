//! Process-wide entity registry.
//!
//! Entities are registered once at start-up with [`register`]; the query,
//! relation and hydration code only ever reads from here.

use super::Model;
use super::schema::EntitySchema;
use crate::error::{DbError, DbResult};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<EntitySchema>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, Arc<EntitySchema>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register `M`, replacing an earlier registration under the same name.
pub fn register<M: Model>() -> Arc<EntitySchema> {
    let schema = Arc::new(M::define().finalize());
    debug!(
        entity = M::ENTITY,
        table = %schema.table,
        columns = schema.columns.len(),
        relations = schema.relations.len(),
        "Entity registered"
    );
    if let Ok(mut map) = registry().write() {
        map.insert(M::ENTITY.to_string(), Arc::clone(&schema));
    }
    schema
}

/// Schema registered under `entity`.
pub fn lookup(entity: &str) -> DbResult<Arc<EntitySchema>> {
    registry()
        .read()
        .ok()
        .and_then(|map| map.get(entity).cloned())
        .ok_or_else(|| DbError::entity_not_registered(entity))
}

pub fn schema_of<M: Model>() -> DbResult<Arc<EntitySchema>> {
    lookup(M::ENTITY)
}

pub fn is_registered(entity: &str) -> bool {
    registry()
        .read()
        .is_ok_and(|map| map.contains_key(entity))
}
