//! Entity metadata consumed by the hydrator and the relation resolver.

use super::transforms::Transform;
use crate::error::{DbError, DbResult};
use crate::query::SoftDelete;
use crate::relation::Relation;
use heck::{ToLowerCamelCase, ToSnakeCase};
use std::fmt;

/// Naming convention of field or column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseConvention {
    #[default]
    Snake,
    Camel,
    /// Names are used as written.
    Preserve,
}

impl CaseConvention {
    pub fn convert(&self, name: &str) -> String {
        match self {
            CaseConvention::Snake => name.to_snake_case(),
            CaseConvention::Camel => name.to_lower_camel_case(),
            CaseConvention::Preserve => name.to_string(),
        }
    }
}

/// One declared column.
#[derive(Clone)]
pub struct ColumnDescriptor {
    /// Field name in the model's serialized form.
    pub app_name: String,
    /// Column name in the database. Derived from the entity's database case
    /// convention when not set explicitly.
    pub db_name: String,
    pub is_primary_key: bool,
    pub is_hidden: bool,
    /// Application value to database value.
    pub prepare: Option<Transform>,
    /// Database value to application value.
    pub serialize: Option<Transform>,
    explicit_db_name: bool,
}

impl ColumnDescriptor {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            db_name: app_name.to_string(),
            is_primary_key: false,
            is_hidden: false,
            prepare: None,
            serialize: None,
            explicit_db_name: false,
        }
    }

    pub fn db_name(mut self, name: &str) -> Self {
        self.db_name = name.to_string();
        self.explicit_db_name = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Excluded from every serialized representation.
    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    pub fn prepare(mut self, transform: Transform) -> Self {
        self.prepare = Some(transform);
        self
    }

    pub fn serialize(mut self, transform: Transform) -> Self {
        self.serialize = Some(transform);
        self
    }
}

impl fmt::Debug for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("app_name", &self.app_name)
            .field("db_name", &self.db_name)
            .field("is_primary_key", &self.is_primary_key)
            .field("is_hidden", &self.is_hidden)
            .field("prepare", &self.prepare.is_some())
            .field("serialize", &self.serialize.is_some())
            .finish()
    }
}

/// Everything the core knows about an entity.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub relations: Vec<Relation>,
    pub soft_delete: Option<SoftDelete>,
    /// Convention of database column names.
    pub database_case: CaseConvention,
    /// Convention of the model's field names; also applied to annotation keys.
    pub model_case: CaseConvention,
}

impl EntitySchema {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            columns: Vec::new(),
            relations: Vec::new(),
            soft_delete: None,
            database_case: CaseConvention::Snake,
            model_case: CaseConvention::Snake,
        }
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn soft_delete(mut self, soft_delete: SoftDelete) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }

    pub fn database_case(mut self, case: CaseConvention) -> Self {
        self.database_case = case;
        self
    }

    pub fn model_case(mut self, case: CaseConvention) -> Self {
        self.model_case = case;
        self
    }

    /// Derive database column names that were not set explicitly.
    pub(crate) fn finalize(mut self) -> Self {
        let case = self.database_case;
        for column in &mut self.columns {
            if !column.explicit_db_name {
                column.db_name = case.convert(&column.app_name);
            }
        }
        self
    }

    pub fn primary_key(&self) -> DbResult<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.is_primary_key)
            .ok_or_else(|| DbError::no_primary_key(&self.name))
    }

    pub fn column_by_app(&self, app_name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.app_name == app_name)
    }

    pub fn column_by_db(&self, db_name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.db_name == db_name)
    }

    pub fn relation_named(&self, name: &str) -> DbResult<&Relation> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| DbError::relation_not_found(&self.name, name))
    }

    /// `table.column`
    pub fn qualified(&self, db_name: &str) -> String {
        format!("{}.{}", self.table, db_name)
    }

    /// Declared columns qualified by the table, for explicit SELECT lists.
    pub fn qualified_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| self.qualified(&c.db_name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_conventions() {
        assert_eq!(CaseConvention::Snake.convert("createdAt"), "created_at");
        assert_eq!(CaseConvention::Camel.convert("created_at"), "createdAt");
        assert_eq!(CaseConvention::Preserve.convert("Created_At"), "Created_At");
    }

    #[test]
    fn test_finalize_derives_db_names() {
        let schema = EntitySchema::new("User", "users")
            .model_case(CaseConvention::Camel)
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("createdAt"))
            .column(ColumnDescriptor::new("displayName").db_name("nick"))
            .finalize();
        assert_eq!(schema.column_by_app("createdAt").unwrap().db_name, "created_at");
        assert_eq!(schema.column_by_db("nick").unwrap().app_name, "displayName");
        assert_eq!(schema.primary_key().unwrap().db_name, "id");
        assert_eq!(schema.qualified("id"), "users.id");
    }

    #[test]
    fn test_missing_primary_key_and_relation() {
        let schema = EntitySchema::new("Log", "logs").column(ColumnDescriptor::new("line"));
        assert_eq!(schema.primary_key().unwrap_err().code(), "MODEL_HAS_NO_PRIMARY_KEY");
        assert_eq!(
            schema.relation_named("owner").unwrap_err().code(),
            "RELATION_NOT_FOUND"
        );
    }
}
