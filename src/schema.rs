//! Collection schema definitions

use crate::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Largest vector dimension the service accepts.
pub const MAX_DIMENSION: usize = 32_768;

const MAX_NAME_LEN: usize = 255;

/// Data kinds a field may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int64,
    FloatVector,
}

/// A single field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub field_name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub auto_id: bool,
    /// Type parameters, e.g. `{"dim": "2"}` for vector fields
    #[serde(default, rename = "elementTypeParams", skip_serializing_if = "BTreeMap::is_empty")]
    pub type_params: BTreeMap<String, String>,
}

impl FieldSchema {
    /// An Int64 scalar field.
    pub fn int64(name: impl Into<String>) -> Self {
        Self {
            field_name: name.into(),
            data_type: DataType::Int64,
            is_primary: false,
            auto_id: false,
            type_params: BTreeMap::new(),
        }
    }

    /// A float vector field of the given dimension.
    pub fn float_vector(name: impl Into<String>, dim: usize) -> Self {
        let mut type_params = BTreeMap::new();
        type_params.insert("dim".to_string(), dim.to_string());
        Self {
            field_name: name.into(),
            data_type: DataType::FloatVector,
            is_primary: false,
            auto_id: false,
            type_params,
        }
    }

    /// Mark this field as the primary key.
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_auto_id(mut self, auto_id: bool) -> Self {
        self.auto_id = auto_id;
        self
    }

    /// Declared vector dimension, if this field carries a parseable one.
    pub fn dim(&self) -> Option<usize> {
        self.type_params.get("dim").and_then(|d| d.parse().ok())
    }

    pub fn is_vector(&self) -> bool {
        self.data_type == DataType::FloatVector
    }
}

/// A collection definition: name, description and ordered fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub collection_name: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            collection_name: name.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field, keeping declaration order.
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.field_name == name)
    }

    /// The primary key field. Only meaningful on a validated schema.
    pub fn primary_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary)
    }

    pub fn vector_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.is_vector())
    }

    /// Check the structural invariants of the schema.
    ///
    /// Exactly one Int64 primary key, unique valid field names, at least one
    /// vector field and a dimension in `1..=MAX_DIMENSION` on every vector
    /// field. `auto_id` is only allowed on the primary key.
    pub fn validate(&self) -> Result<()> {
        validate_name("collection", &self.collection_name)?;

        if self.fields.is_empty() {
            return Err(invalid("schema has no fields"));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            validate_name("field", &field.field_name)?;
            if !seen.insert(field.field_name.as_str()) {
                return Err(invalid(format!("duplicate field {}", field.field_name)));
            }
            if field.auto_id && !field.is_primary {
                return Err(invalid(format!(
                    "auto_id is only allowed on the primary key, not {}",
                    field.field_name
                )));
            }
            if field.is_vector() {
                match field.dim() {
                    Some(dim) if (1..=MAX_DIMENSION).contains(&dim) => {}
                    _ => {
                        return Err(invalid(format!(
                            "vector field {} needs a dim between 1 and {}",
                            field.field_name, MAX_DIMENSION
                        )))
                    }
                }
            }
        }

        let primaries: Vec<&FieldSchema> = self.fields.iter().filter(|f| f.is_primary).collect();
        match primaries.as_slice() {
            [pk] if pk.data_type == DataType::Int64 => {}
            [pk] => {
                return Err(invalid(format!(
                    "primary key {} must be Int64",
                    pk.field_name
                )))
            }
            [] => return Err(invalid("schema has no primary key")),
            _ => return Err(invalid("schema has more than one primary key")),
        }

        if self.vector_fields().next().is_none() {
            return Err(invalid("schema has no vector field"));
        }

        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidSchema {
        reason: reason.into(),
    }
}

/// Names start with a letter or underscore and continue with alphanumerics
/// or underscores.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name.len() > MAX_NAME_LEN {
        return Err(invalid(format!("invalid {} name {:?}", kind, name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn books() -> CollectionSchema {
        CollectionSchema::new("my_collection", "Test book search")
            .with_field(FieldSchema::int64("book_id").primary())
            .with_field(FieldSchema::int64("word_count"))
            .with_field(FieldSchema::float_vector("book_intro", 2))
    }

    #[test]
    fn test_valid_schema() {
        let schema = books();
        schema.validate().unwrap();
        assert_eq!(schema.primary_field().unwrap().field_name, "book_id");
        assert_eq!(schema.field("book_intro").unwrap().dim(), Some(2));
        assert_eq!(schema.vector_fields().count(), 1);
    }

    #[test]
    fn test_requires_exactly_one_primary() {
        let none = CollectionSchema::new("c", "")
            .with_field(FieldSchema::int64("a"))
            .with_field(FieldSchema::float_vector("v", 2));
        assert!(matches!(none.validate(), Err(WorkflowError::InvalidSchema { .. })));

        let two = books().with_field(FieldSchema::int64("other").primary());
        assert!(matches!(two.validate(), Err(WorkflowError::InvalidSchema { .. })));
    }

    #[test]
    fn test_primary_must_be_int64() {
        let schema = CollectionSchema::new("c", "")
            .with_field(FieldSchema::float_vector("v", 2).primary());
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_vector_needs_dim() {
        let mut field = FieldSchema::float_vector("v", 2);
        field.type_params.clear();
        let schema = CollectionSchema::new("c", "")
            .with_field(FieldSchema::int64("id").primary())
            .with_field(field);
        assert!(schema.validate().is_err());

        let zero = CollectionSchema::new("c", "")
            .with_field(FieldSchema::int64("id").primary())
            .with_field(FieldSchema::float_vector("v", 0));
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_duplicate_and_bad_names() {
        let dup = books().with_field(FieldSchema::int64("word_count"));
        assert!(dup.validate().is_err());

        let bad = CollectionSchema::new("1bad", "")
            .with_field(FieldSchema::int64("id").primary())
            .with_field(FieldSchema::float_vector("v", 2));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_auto_id_only_on_primary() {
        let schema = books().with_field(FieldSchema::int64("x").with_auto_id(true));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(books()).unwrap();
        assert_eq!(json["collectionName"], "my_collection");
        assert_eq!(json["fields"][0]["isPrimary"], true);
        assert_eq!(json["fields"][2]["dataType"], "FloatVector");
        assert_eq!(json["fields"][2]["elementTypeParams"]["dim"], "2");
        assert!(json["fields"][1].get("elementTypeParams").is_none());
    }
}
