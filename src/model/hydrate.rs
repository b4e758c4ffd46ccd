//! Rows to typed records and back.
//!
//! Reading: every row column that matches a declared column is renamed to
//! the field name and passed through the column's `serialize` transform;
//! every other column (join columns, aggregates, `annotate` expressions)
//! goes to the record's annotations, never to the typed fields.
//!
//! Writing: the model is serialized, declared fields are passed through
//! their `prepare` transform and renamed to column names. Undeclared fields
//! are not written.

use super::Model;
use super::registry;
use super::schema::EntitySchema;
use crate::db::executor::Row;
use crate::error::{DbError, DbResult};
use crate::models::Value;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::ops::Deref;

/// Key under which annotations appear in serialized records.
pub const ANNOTATIONS_KEY: &str = "$annotations";

/// A hydrated entity with the columns its schema does not declare.
#[derive(Debug, Clone)]
pub struct Record<M> {
    pub model: M,
    pub annotations: Map<String, JsonValue>,
    /// Eager-loaded relations keyed by relation name.
    pub relations: Map<String, JsonValue>,
}

impl<M: Model> Record<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            annotations: Map::new(),
            relations: Map::new(),
        }
    }

    pub fn into_inner(self) -> M {
        self.model
    }

    pub fn annotation(&self, key: &str) -> Option<&JsonValue> {
        self.annotations.get(key)
    }

    pub fn relation(&self, name: &str) -> Option<&JsonValue> {
        self.relations.get(name)
    }

    /// A loaded relation deserialized into `T` (`Vec<Post>`, `Option<Team>`).
    pub fn relation_as<T: DeserializeOwned>(&self, name: &str) -> DbResult<T> {
        let value = self.relations.get(name).cloned().unwrap_or(JsonValue::Null);
        serde_json::from_value(value).map_err(|e| DbError::hydration(M::ENTITY, e.to_string()))
    }

    /// External representation: hidden columns removed, relations merged
    /// in, annotations nested under `$annotations`.
    pub fn to_json(&self) -> DbResult<JsonValue> {
        let value = serde_json::to_value(&self.model)
            .map_err(|e| DbError::hydration(M::ENTITY, e.to_string()))?;
        let JsonValue::Object(mut object) = value else {
            return Ok(value);
        };
        if let Ok(schema) = registry::schema_of::<M>() {
            for column in schema.columns.iter().filter(|c| c.is_hidden) {
                object.remove(&column.app_name);
            }
        }
        for (name, value) in &self.relations {
            object.insert(name.clone(), value.clone());
        }
        if !self.annotations.is_empty() {
            object.insert(
                ANNOTATIONS_KEY.to_string(),
                JsonValue::Object(self.annotations.clone()),
            );
        }
        Ok(JsonValue::Object(object))
    }
}

impl<M> Deref for Record<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.model
    }
}

impl<M: Model> Serialize for Record<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// Split a raw row into declared fields (field-named, serialized) and
/// annotations (keys in the model's case convention).
pub fn split_row(
    schema: &EntitySchema,
    row: Row,
) -> DbResult<(Map<String, JsonValue>, Map<String, JsonValue>)> {
    let mut fields = Map::new();
    let mut annotations = Map::new();
    for (key, value) in row {
        match schema.column_by_db(&key) {
            Some(column) => {
                let value = match &column.serialize {
                    Some(transform) => transform(value).map_err(|e| {
                        DbError::hydration(&schema.name, format!("column '{key}': {e}"))
                    })?,
                    None => value,
                };
                fields.insert(column.app_name.clone(), value);
            }
            None => {
                annotations.insert(schema.model_case.convert(&key), value);
            }
        }
    }
    Ok((fields, annotations))
}

/// Hydrate one row into a typed record.
pub fn hydrate<M: Model>(
    schema: &EntitySchema,
    row: Row,
    relations: Map<String, JsonValue>,
) -> DbResult<Record<M>> {
    let (mut fields, annotations) = split_row(schema, row)?;
    for (name, value) in &relations {
        fields.insert(name.clone(), value.clone());
    }
    let model = serde_json::from_value(JsonValue::Object(fields))
        .map_err(|e| DbError::hydration(&schema.name, e.to_string()))?;
    Ok(Record {
        model,
        annotations,
        relations,
    })
}

/// Untyped form used for related records attached to a parent. Hidden
/// columns are dropped here since nested records never surface as
/// [`Record`]s.
pub fn to_app_object(
    schema: &EntitySchema,
    row: Row,
    relations: Map<String, JsonValue>,
) -> DbResult<JsonValue> {
    let (mut fields, annotations) = split_row(schema, row)?;
    for column in schema.columns.iter().filter(|c| c.is_hidden) {
        fields.remove(&column.app_name);
    }
    fields.extend(relations);
    if !annotations.is_empty() {
        fields.insert(ANNOTATIONS_KEY.to_string(), JsonValue::Object(annotations));
    }
    Ok(JsonValue::Object(fields))
}

/// Serialize `model` into a column-named row with prepared values.
///
/// A NULL primary key is left out so the database can generate it.
pub fn dehydrate<M: Model>(schema: &EntitySchema, model: &M) -> DbResult<Row> {
    let value = serde_json::to_value(model)
        .map_err(|e| DbError::hydration(&schema.name, e.to_string()))?;
    let JsonValue::Object(object) = value else {
        return Err(DbError::hydration(
            &schema.name,
            "model must serialize to an object",
        ));
    };
    let mut row = Row::new();
    for column in &schema.columns {
        let Some(value) = object.get(&column.app_name) else {
            continue;
        };
        if column.is_primary_key && value.is_null() {
            continue;
        }
        let value = match &column.prepare {
            Some(transform) => transform(value.clone()).map_err(|e| {
                DbError::hydration(&schema.name, format!("field '{}': {e}", column.app_name))
            })?,
            None => value.clone(),
        };
        row.insert(column.db_name.clone(), value);
    }
    Ok(row)
}

/// Convert a prepared row into bind pairs.
pub fn row_values(row: &Row) -> Vec<(String, Value)> {
    row.iter()
        .map(|(k, v)| (k.clone(), Value::from_decoded(v)))
        .collect()
}

/// Primary key value of `model`, or `MODEL_HAS_NO_PRIMARY_KEY_VALUE`.
pub fn primary_key_value<M: Model>(schema: &EntitySchema, model: &M) -> DbResult<Value> {
    let pk = schema.primary_key()?;
    let value = serde_json::to_value(model)
        .map_err(|e| DbError::hydration(&schema.name, e.to_string()))?;
    match value.get(&pk.app_name) {
        Some(v) if !v.is_null() => Ok(Value::from_decoded(v)),
        _ => Err(DbError::no_primary_key_value(&schema.name, &pk.app_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{CaseConvention, ColumnDescriptor};
    use crate::model::transforms;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Account {
        id: Option<i64>,
        display_name: String,
        is_admin: bool,
        #[serde(default)]
        password_hash: Option<String>,
    }

    impl Model for Account {
        const ENTITY: &'static str = "HydrateAccount";

        fn define() -> EntitySchema {
            EntitySchema::new(Self::ENTITY, "accounts")
                .model_case(CaseConvention::Camel)
                .column(ColumnDescriptor::new("id").primary_key())
                .column(ColumnDescriptor::new("displayName"))
                .column(
                    ColumnDescriptor::new("isAdmin")
                        .serialize(transforms::boolean())
                        .prepare(transforms::custom(|v| {
                            Ok(json!(if v == json!(true) { 1 } else { 0 }))
                        })),
                )
                .column(ColumnDescriptor::new("passwordHash").hidden())
        }
    }

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn test_hydrate_routes_undeclared_columns_to_annotations() {
        let schema = Account::define().finalize();
        let record: Record<Account> = hydrate(
            &schema,
            row(json!({
                "id": 1,
                "display_name": "Ada",
                "is_admin": 1,
                "password_hash": "x",
                "post_count": 3
            })),
            Map::new(),
        )
        .unwrap();
        assert_eq!(record.display_name, "Ada");
        assert!(record.is_admin);
        assert_eq!(record.annotation("postCount"), Some(&json!(3)));
        assert!(record.annotation("display_name").is_none());
    }

    #[test]
    fn test_to_json_hides_hidden_columns() {
        registry::register::<Account>();
        let mut record = Record::new(Account {
            id: Some(1),
            display_name: "Ada".into(),
            is_admin: false,
            password_hash: Some("secret".into()),
        });
        record.annotations.insert("score".into(), json!(9));
        let out = record.to_json().unwrap();
        assert!(out.get("passwordHash").is_none());
        assert_eq!(out["$annotations"]["score"], json!(9));
    }

    #[test]
    fn test_dehydrate_prepares_and_skips_null_key() {
        let schema = Account::define().finalize();
        let out = dehydrate(
            &schema,
            &Account {
                id: None,
                display_name: "Bo".into(),
                is_admin: true,
                password_hash: None,
            },
        )
        .unwrap();
        assert!(!out.contains_key("id"));
        assert_eq!(out["is_admin"], json!(1));
        assert_eq!(out["display_name"], json!("Bo"));
    }

    #[test]
    fn test_primary_key_value_missing() {
        let schema = Account::define().finalize();
        let err = primary_key_value(
            &schema,
            &Account {
                id: None,
                display_name: "C".into(),
                is_admin: false,
                password_hash: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "MODEL_HAS_NO_PRIMARY_KEY_VALUE");
    }

    #[test]
    fn test_serialize_transform_failure_is_hydration_error() {
        let schema = Account::define().finalize();
        let err = split_row(&schema, row(json!({"is_admin": "perhaps"}))).unwrap_err();
        assert_eq!(err.code(), "HYDRATION_FAILED");
    }
}
