//! Request and response bodies for the vector service REST API.
//!
//! Shared by the HTTP client and the local development server. Every
//! endpoint is a `POST` under [`API_PREFIX`] answering with an [`Envelope`].

use crate::column::{FieldValue, Row};
use crate::distance::MetricType;
use crate::error::WorkflowError;
use crate::schema::{CollectionSchema, DataType, FieldSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const API_PREFIX: &str = "/v2/vectordb";

/// Name of the partition every collection starts with.
pub const DEFAULT_PARTITION: &str = "_default";

/// Envelope status codes.
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const INVALID_ARGUMENT: i32 = 1100;
    pub const COLLECTION_NOT_FOUND: i32 = 100;
    pub const COLLECTION_NOT_LOADED: i32 = 101;
    pub const PARTITION_NOT_FOUND: i32 = 200;
    pub const ALREADY_EXISTS: i32 = 65_535;
    pub const INTERNAL: i32 = 5;
}

/// Response wrapper: `code == 0` means success and `data` holds the payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Hits per query vector for a search, whose `data` is one flat list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topks: Vec<usize>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: code::SUCCESS,
            data: Some(data),
            message: None,
            topks: Vec::new(),
        }
    }

    pub fn with_topks(mut self, topks: Vec<usize>) -> Self {
        self.topks = topks;
        self
    }

    pub fn failure(err: &WorkflowError) -> Self {
        Self {
            code: error_code(err),
            data: None,
            message: Some(err.to_string()),
            topks: Vec::new(),
        }
    }
}

/// Map an error to the envelope code reported by the server.
pub fn error_code(err: &WorkflowError) -> i32 {
    match err {
        WorkflowError::CollectionNotFound { .. } => code::COLLECTION_NOT_FOUND,
        WorkflowError::CollectionNotLoaded { .. } => code::COLLECTION_NOT_LOADED,
        WorkflowError::PartitionNotFound { .. } => code::PARTITION_NOT_FOUND,
        WorkflowError::CollectionAlreadyExists { .. }
        | WorkflowError::PartitionAlreadyExists { .. } => code::ALREADY_EXISTS,
        WorkflowError::StorageError(_) => code::INTERNAL,
        _ => code::INVALID_ARGUMENT,
    }
}

/// Acknowledgement payload for operations that return nothing.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRequest {
    pub collection_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HasResponse {
    pub has: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollectionRequest {
    pub collection_name: String,
    pub schema: CollectionSchema,
    pub params: CollectionParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionParams {
    pub shards_num: u32,
}

/// `collections/describe` payload. Fields are reported in the service's
/// describe shape, which differs from the create shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDescription {
    pub collection_name: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<DescribedField>,
    #[serde(default)]
    pub indexes: Vec<DescribedIndex>,
    pub load: LoadState,
    #[serde(default)]
    pub partitions_num: usize,
    #[serde(default)]
    pub shards_num: u32,
}

impl CollectionDescription {
    /// Rebuild the schema the collection was created with.
    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            collection_name: self.collection_name.clone(),
            description: self.description.clone(),
            fields: self.fields.iter().map(DescribedField::to_schema).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub auto_id: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<KeyValue>,
}

impl DescribedField {
    pub fn to_schema(&self) -> FieldSchema {
        FieldSchema {
            field_name: self.name.clone(),
            data_type: self.data_type,
            is_primary: self.primary_key,
            auto_id: self.auto_id,
            type_params: self
                .params
                .iter()
                .map(|kv| (kv.key.clone(), kv.value_string()))
                .collect(),
        }
    }
}

impl From<&FieldSchema> for DescribedField {
    fn from(field: &FieldSchema) -> Self {
        Self {
            name: field.field_name.clone(),
            data_type: field.data_type,
            primary_key: field.is_primary,
            auto_id: field.auto_id,
            params: field
                .type_params
                .iter()
                .map(|(key, value)| KeyValue {
                    key: key.clone(),
                    value: Value::String(value.clone()),
                })
                .collect(),
        }
    }
}

/// Type parameter as `{"key": "dim", "value": "2"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    /// The value as text; numbers are accepted as well as strings.
    pub fn value_string(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedIndex {
    pub field_name: String,
    pub index_name: String,
    pub metric_type: MetricType,
}

/// `collections/get_stats` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub row_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRequest {
    pub collection_name: String,
    pub partition_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexParam {
    pub field_name: String,
    pub index_name: String,
    pub metric_type: MetricType,
    pub index_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIndexRequest {
    pub collection_name: String,
    pub index_params: Vec<IndexParam>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeIndexRequest {
    pub collection_name: String,
    pub index_name: String,
}

/// Build progress of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Unissued,
    InProgress,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescription {
    pub field_name: String,
    pub index_name: String,
    pub index_type: String,
    pub metric_type: MetricType,
    pub index_state: IndexState,
    #[serde(default)]
    pub fail_reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRequest {
    pub collection_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition_name: String,
    pub data: Vec<Row>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertResponse {
    pub insert_count: usize,
    pub insert_ids: Vec<i64>,
}

/// Load state of a collection in the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    LoadStateNotExist,
    LoadStateNotLoad,
    LoadStateLoading,
    LoadStateLoaded,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStateResponse {
    pub load_state: LoadState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParamsBody {
    pub metric_type: MetricType,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody {
    pub collection_name: String,
    pub data: Vec<Vec<f32>>,
    pub anns_field: String,
    pub limit: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
    #[serde(default)]
    pub output_fields: Vec<String>,
    #[serde(default)]
    pub partition_names: Vec<String>,
    pub search_params: SearchParamsBody,
}

/// One neighbour: primary key, distance and any requested output fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: i64,
    pub distance: f32,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let ok = serde_json::to_value(Envelope::success(HasResponse { has: true })).unwrap();
        assert_eq!(ok, serde_json::json!({"code": 0, "data": {"has": true}}));

        let err = WorkflowError::CollectionNotFound {
            name: "books".to_string(),
        };
        let failed = serde_json::to_value(Envelope::<Empty>::failure(&err)).unwrap();
        assert_eq!(failed["code"], code::COLLECTION_NOT_FOUND);
        assert_eq!(failed["message"], "Collection not found: books");
        assert!(failed.get("data").is_none());
    }

    #[test]
    fn test_hit_flattens_output_fields() {
        let json = r#"{"id": 7, "distance": 0.25, "book_id": 7}"#;
        let hit: Hit = serde_json::from_str(json).unwrap();
        assert_eq!(hit.id, 7);
        assert_eq!(hit.fields["book_id"], FieldValue::Int64(7));
    }

    #[test]
    fn test_load_state_names() {
        let state: LoadStateResponse =
            serde_json::from_str(r#"{"loadState": "LoadStateLoaded"}"#).unwrap();
        assert_eq!(state.load_state, LoadState::LoadStateLoaded);
    }

    #[test]
    fn test_describe_response_from_service() {
        let body = r#"{"code":0,"data":{"aliases":[],"autoId":false,"collectionID":448707763883002014,
            "collectionName":"my_collection","consistencyLevel":"Bounded","description":"Test book search",
            "enableDynamicField":false,"fields":[
              {"autoId":false,"description":"","id":100,"name":"book_id","partitionKey":false,"primaryKey":true,"type":"Int64"},
              {"autoId":false,"description":"","id":101,"name":"word_count","partitionKey":false,"primaryKey":false,"type":"Int64"},
              {"autoId":false,"description":"","id":102,"name":"book_intro","params":[{"key":"dim","value":"2"}],
               "partitionKey":false,"primaryKey":false,"type":"FloatVector"}],
            "indexes":[{"fieldName":"book_intro","indexName":"book_intro","metricType":"L2"}],
            "load":"LoadStateLoaded","partitionsNum":1,"properties":[],"shardsNum":2}}"#;
        let envelope: Envelope<CollectionDescription> = serde_json::from_str(body).unwrap();
        let description = envelope.data.unwrap();
        assert_eq!(description.load, LoadState::LoadStateLoaded);
        assert_eq!(description.shards_num, 2);
        assert_eq!(description.indexes[0].metric_type, MetricType::L2);

        let schema = description.schema();
        schema.validate().unwrap();
        assert_eq!(schema.primary_field().unwrap().field_name, "book_id");
        assert_eq!(schema.field("book_intro").and_then(FieldSchema::dim), Some(2));
    }

    #[test]
    fn test_described_field_accepts_numeric_params() {
        let field: DescribedField = serde_json::from_str(
            r#"{"name":"v","type":"FloatVector","params":[{"key":"dim","value":128}]}"#,
        )
        .unwrap();
        assert_eq!(field.to_schema().dim(), Some(128));
        assert_eq!(DescribedField::from(&field.to_schema()).to_schema(), field.to_schema());
    }

    #[test]
    fn test_search_envelope_is_flat() {
        let body = r#"{"code":0,"cost":0,"data":[
            {"book_id":1,"distance":0.01,"id":1},
            {"book_id":9,"distance":0.02,"id":9}],"topks":[2]}"#;
        let envelope: Envelope<Vec<Hit>> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.topks, vec![2]);
        let hits = envelope.data.unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 9]);
    }
}
