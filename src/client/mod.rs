//! Client surface for the remote vector service.

pub mod http;

pub use http::{ClientConfig, HttpClient};

use crate::api::{
    CollectionDescription, CollectionStats, Hit, InsertResponse, LoadState, SearchBody,
    SearchParamsBody,
};
use crate::column::Column;
use crate::distance::MetricType;
use crate::error::{Result, WorkflowError};
use crate::expr::Expr;
use crate::index::{IndexSpec, SearchParams};
use crate::schema::CollectionSchema;
use crate::vector::FloatVector;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound the service puts on top-K.
pub const MAX_TOP_K: usize = 16_384;

/// Operations the workflow needs from a vector service.
///
/// An empty partition name always means the default partition.
#[async_trait]
pub trait VectorClient: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Create a collection. Fails if it already exists.
    async fn create_collection(&self, schema: &CollectionSchema, shards_num: u32) -> Result<()>;

    async fn describe_collection(&self, name: &str) -> Result<CollectionDescription>;

    /// Row count of a collection.
    async fn get_collection_stats(&self, name: &str) -> Result<CollectionStats>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    async fn create_partition(&self, collection: &str, partition: &str) -> Result<()>;

    async fn has_partition(&self, collection: &str, partition: &str) -> Result<bool>;

    async fn list_partitions(&self, collection: &str) -> Result<Vec<String>>;

    /// Request an index on `field`. When `is_async` is false this returns
    /// only after the build finished.
    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        spec: &IndexSpec,
        is_async: bool,
    ) -> Result<()>;

    /// Insert a column-oriented batch. Columns are validated against the
    /// collection schema before anything is sent; an empty batch sends
    /// nothing.
    async fn insert(
        &self,
        collection: &str,
        partition: &str,
        columns: &[Column],
    ) -> Result<InsertResponse>;

    /// Load a collection into serving memory. When `is_async` is false this
    /// returns only once the collection reports loaded.
    async fn load_collection(&self, collection: &str, is_async: bool) -> Result<()>;

    async fn get_load_state(&self, collection: &str) -> Result<LoadState>;

    async fn release_collection(&self, collection: &str) -> Result<()>;

    /// Run a similarity search bounded by the request's deadline.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>>;

    /// Release the connection. Further calls fail with `ClientClosed`.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: VectorClient + ?Sized> VectorClient for Arc<T> {
    async fn list_collections(&self) -> Result<Vec<String>> {
        (**self).list_collections().await
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        (**self).has_collection(name).await
    }

    async fn create_collection(&self, schema: &CollectionSchema, shards_num: u32) -> Result<()> {
        (**self).create_collection(schema, shards_num).await
    }

    async fn describe_collection(&self, name: &str) -> Result<CollectionDescription> {
        (**self).describe_collection(name).await
    }

    async fn get_collection_stats(&self, name: &str) -> Result<CollectionStats> {
        (**self).get_collection_stats(name).await
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        (**self).drop_collection(name).await
    }

    async fn create_partition(&self, collection: &str, partition: &str) -> Result<()> {
        (**self).create_partition(collection, partition).await
    }

    async fn has_partition(&self, collection: &str, partition: &str) -> Result<bool> {
        (**self).has_partition(collection, partition).await
    }

    async fn list_partitions(&self, collection: &str) -> Result<Vec<String>> {
        (**self).list_partitions(collection).await
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        spec: &IndexSpec,
        is_async: bool,
    ) -> Result<()> {
        (**self).create_index(collection, field, spec, is_async).await
    }

    async fn insert(
        &self,
        collection: &str,
        partition: &str,
        columns: &[Column],
    ) -> Result<InsertResponse> {
        (**self).insert(collection, partition, columns).await
    }

    async fn load_collection(&self, collection: &str, is_async: bool) -> Result<()> {
        (**self).load_collection(collection, is_async).await
    }

    async fn get_load_state(&self, collection: &str) -> Result<LoadState> {
        (**self).get_load_state(collection).await
    }

    async fn release_collection(&self, collection: &str) -> Result<()> {
        (**self).release_collection(collection).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        (**self).search(request).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// A similarity query against one vector field.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection_name: String,
    /// Empty means every partition.
    pub partition_names: Vec<String>,
    /// Boolean filter over scalar fields; empty means no filter.
    pub expr: String,
    pub output_fields: Vec<String>,
    pub vectors: Vec<FloatVector>,
    pub vector_field: String,
    pub metric: MetricType,
    pub top_k: usize,
    pub params: SearchParams,
    pub deadline: Duration,
}

impl SearchRequest {
    pub fn new(
        collection_name: impl Into<String>,
        vector_field: impl Into<String>,
        vectors: Vec<FloatVector>,
    ) -> Self {
        Self {
            collection_name: collection_name.into(),
            partition_names: Vec::new(),
            expr: String::new(),
            output_fields: Vec::new(),
            vectors,
            vector_field: vector_field.into(),
            metric: MetricType::L2,
            top_k: 10,
            params: SearchParams::default(),
            deadline: Duration::from_secs(10),
        }
    }

    pub fn with_filter(mut self, expr: impl Into<String>) -> Self {
        self.expr = expr.into();
        self
    }

    pub fn with_partitions(mut self, partitions: Vec<String>) -> Self {
        self.partition_names = partitions;
        self
    }

    pub fn with_output_fields(mut self, fields: Vec<String>) -> Self {
        self.output_fields = fields;
        self
    }

    pub fn with_metric(mut self, metric: MetricType) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_params(mut self, params: SearchParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Local checks run before the request leaves the process.
    pub fn validate(&self) -> Result<()> {
        if self.vectors.is_empty() {
            return Err(invalid_search("no query vectors"));
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(invalid_search(format!(
                "top_k {} out of range [1, {}]",
                self.top_k, MAX_TOP_K
            )));
        }
        if self.deadline.is_zero() {
            return Err(invalid_search("deadline must be positive"));
        }
        let dim = self.vectors[0].dimension();
        for v in &self.vectors {
            v.check_finite()?;
            if v.dimension() != dim {
                return Err(WorkflowError::DimensionMismatch {
                    field: self.vector_field.clone(),
                    expected: dim,
                    actual: v.dimension(),
                });
            }
        }
        if !self.expr.trim().is_empty() {
            Expr::parse(&self.expr)?;
        }
        self.params.validate(self.top_k)
    }

    /// Request body in the service's wire shape.
    pub fn to_body(&self) -> SearchBody {
        SearchBody {
            collection_name: self.collection_name.clone(),
            data: self.vectors.iter().map(|v| v.as_slice().to_vec()).collect(),
            anns_field: self.vector_field.clone(),
            limit: self.top_k,
            filter: self.expr.trim().to_string(),
            output_fields: self.output_fields.clone(),
            partition_names: self.partition_names.clone(),
            search_params: SearchParamsBody {
                metric_type: self.metric,
                params: self.params.params(),
            },
        }
    }
}

/// Ordered neighbours for one query vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub hits: Vec<Hit>,
}

impl SearchResult {
    pub fn ids(&self) -> Vec<i64> {
        self.hits.iter().map(|h| h.id).collect()
    }

    pub fn scores(&self) -> Vec<f32> {
        self.hits.iter().map(|h| h.distance).collect()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

fn invalid_search(reason: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidSearch {
        reason: reason.into(),
    }
}
