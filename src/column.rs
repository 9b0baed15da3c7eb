//! Column-oriented record batches and their validation against a schema

use crate::error::{Result, WorkflowError};
use crate::schema::{CollectionSchema, DataType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A single field value as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int64(i64),
    FloatVector(Vec<f32>),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int64(v) => Some(*v),
            FieldValue::FloatVector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            FieldValue::FloatVector(v) => Some(v),
            FieldValue::Int64(_) => None,
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            FieldValue::Int64(_) => DataType::Int64,
            FieldValue::FloatVector(_) => DataType::FloatVector,
        }
    }
}

/// One record keyed by field name.
pub type Row = BTreeMap<String, FieldValue>;

/// One column of a batch: a field name plus one value per record.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64 {
        name: String,
        data: Vec<i64>,
    },
    FloatVector {
        name: String,
        dim: usize,
        data: Vec<Vec<f32>>,
    },
}

impl Column {
    pub fn int64(name: impl Into<String>, data: Vec<i64>) -> Self {
        Column::Int64 {
            name: name.into(),
            data,
        }
    }

    pub fn float_vector(name: impl Into<String>, dim: usize, data: Vec<Vec<f32>>) -> Self {
        Column::FloatVector {
            name: name.into(),
            dim,
            data,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Column::Int64 { name, .. } | Column::FloatVector { name, .. } => name,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Int64 { data, .. } => data.len(),
            Column::FloatVector { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Column::Int64 { .. } => DataType::Int64,
            Column::FloatVector { .. } => DataType::FloatVector,
        }
    }

    fn value_at(&self, index: usize) -> FieldValue {
        match self {
            Column::Int64 { data, .. } => FieldValue::Int64(data[index]),
            Column::FloatVector { data, .. } => FieldValue::FloatVector(data[index].clone()),
        }
    }
}

/// Check a batch against the schema and return its row count.
///
/// Columns must name known fields with matching types, agree on length, and
/// carry vectors of exactly the declared dimension. Every field without
/// `auto_id` needs a column unless the batch is empty, in which case the
/// row count is zero and nothing should be sent.
pub fn validate_columns(schema: &CollectionSchema, columns: &[Column]) -> Result<usize> {
    let mut seen = HashSet::new();
    for column in columns {
        let field = schema
            .field(column.name())
            .ok_or_else(|| WorkflowError::UnknownField {
                field: column.name().to_string(),
            })?;
        if !seen.insert(column.name()) {
            return Err(invalid_column(column.name(), "column given twice"));
        }
        if field.data_type != column.data_type() {
            return Err(invalid_column(
                column.name(),
                format!("expected {:?}, got {:?}", field.data_type, column.data_type()),
            ));
        }
        if field.auto_id {
            return Err(invalid_column(column.name(), "field is auto-generated"));
        }
        if let Column::FloatVector { name, dim, data } = column {
            let expected = field.dim().unwrap_or_default();
            if *dim != expected {
                return Err(WorkflowError::DimensionMismatch {
                    field: name.clone(),
                    expected,
                    actual: *dim,
                });
            }
            if let Some(bad) = data.iter().find(|v| v.len() != expected) {
                return Err(WorkflowError::DimensionMismatch {
                    field: name.clone(),
                    expected,
                    actual: bad.len(),
                });
            }
        }
    }

    let rows = columns.first().map(Column::len).unwrap_or(0);
    for column in columns {
        if column.len() != rows {
            return Err(WorkflowError::ColumnLengthMismatch {
                column: column.name().to_string(),
                expected: rows,
                actual: column.len(),
            });
        }
    }

    if rows == 0 {
        return Ok(0);
    }

    for field in &schema.fields {
        if !field.auto_id && !seen.contains(field.field_name.as_str()) {
            return Err(WorkflowError::MissingField {
                field: field.field_name.clone(),
            });
        }
    }

    Ok(rows)
}

/// Check a single row against the schema.
pub fn validate_row(schema: &CollectionSchema, row: &Row) -> Result<()> {
    for (name, value) in row {
        let field = schema.field(name).ok_or_else(|| WorkflowError::UnknownField {
            field: name.clone(),
        })?;
        if field.data_type != value.data_type() {
            return Err(invalid_column(
                name,
                format!("expected {:?}, got {:?}", field.data_type, value.data_type()),
            ));
        }
        if field.auto_id {
            return Err(invalid_column(name, "field is auto-generated"));
        }
        if let FieldValue::FloatVector(v) = value {
            let expected = field.dim().unwrap_or_default();
            if v.len() != expected {
                return Err(WorkflowError::DimensionMismatch {
                    field: name.clone(),
                    expected,
                    actual: v.len(),
                });
            }
        }
    }
    for field in &schema.fields {
        if !field.auto_id && !row.contains_key(&field.field_name) {
            return Err(WorkflowError::MissingField {
                field: field.field_name.clone(),
            });
        }
    }
    Ok(())
}

/// Pivot columns into rows. Assumes the columns passed `validate_columns`.
pub fn to_rows(columns: &[Column]) -> Vec<Row> {
    let rows = columns.first().map(Column::len).unwrap_or(0);
    (0..rows)
        .map(|i| {
            columns
                .iter()
                .map(|c| (c.name().to_string(), c.value_at(i)))
                .collect()
        })
        .collect()
}

fn invalid_column(column: &str, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidColumn {
        column: column.to_string(),
        reason: reason.into(),
    }
}
