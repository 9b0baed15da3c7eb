//! HTTP client implementation of [`VectorClient`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{SearchRequest, SearchResult, VectorClient};
use crate::api::{
    code, CollectionDescription, CollectionParams, CollectionRequest, CollectionStats,
    CreateCollectionRequest, CreateIndexRequest, DescribeIndexRequest, Empty, Envelope,
    HasResponse, Hit, IndexDescription, IndexParam, IndexState, InsertRequest, InsertResponse,
    LoadState, LoadStateResponse, PartitionRequest, API_PREFIX,
};
use crate::column::{to_rows, validate_columns, Column};
use crate::error::{Result, WorkflowError};
use crate::index::IndexSpec;
use crate::schema::CollectionSchema;

/// Default endpoint of a locally running service.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:19530";

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` or a full URL
    pub endpoint: String,
    /// Bearer token, e.g. `user:password` or an API key
    pub token: Option<String>,
    /// Bound on establishing a TCP connection
    pub connect_timeout: Duration,
    /// Delay between status polls while waiting on index builds and loads
    pub poll_interval: Duration,
    /// Longest a synchronous index build or load may be waited on
    pub wait_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(200),
            wait_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// A connection handle to the vector service over its REST API.
pub struct HttpClient {
    client: ReqwestClient,
    base_url: String,
    token: Option<String>,
    poll_interval: Duration,
    wait_timeout: Duration,
    closed: AtomicBool,
}

impl HttpClient {
    /// Connect to the service and probe it.
    ///
    /// Any failure here, including the service rejecting the probe, is
    /// reported as `WorkflowError::Connection`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let base_url = normalize_endpoint(&config.endpoint)?;
        let client = ReqwestClient::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| WorkflowError::Connection {
                endpoint: config.endpoint.clone(),
                reason: e.to_string(),
            })?;

        let this = Self {
            client,
            base_url,
            token: config.token,
            poll_interval: config.poll_interval,
            wait_timeout: config.wait_timeout,
            closed: AtomicBool::new(false),
        };

        match this.list_collections().await {
            Ok(collections) => {
                info!(
                    endpoint = %this.base_url,
                    collections = collections.len(),
                    "connected to vector service"
                );
                Ok(this)
            }
            Err(e) => Err(WorkflowError::Connection {
                endpoint: config.endpoint,
                reason: e.to_string(),
            }),
        }
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Performs a single POST against an API path and returns the checked
    /// envelope.
    async fn send<T, R>(&self, path: &str, body: &T) -> Result<Envelope<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(WorkflowError::ClientClosed);
        }

        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        debug!(%url, "POST");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        decode_envelope(status, &bytes)
    }

    async fn post<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        into_data(self.send(path, body).await?)
    }

    /// POST for operations whose payload carries nothing of interest.
    async fn post_ack<T>(&self, path: &str, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let _: Envelope<Value> = self.send(path, body).await?;
        Ok(())
    }

    async fn wait_for_index(&self, collection: &str, index_name: &str) -> Result<()> {
        let body = DescribeIndexRequest {
            collection_name: collection.to_string(),
            index_name: index_name.to_string(),
        };
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            let indexes: Vec<IndexDescription> = self.post("/indexes/describe", &body).await?;
            let state = indexes
                .iter()
                .find(|i| i.index_name == index_name)
                .map(|i| (i.index_state, i.fail_reason.clone()));
            match state {
                Some((IndexState::Finished, _)) => return Ok(()),
                Some((IndexState::Failed, reason)) => {
                    return Err(WorkflowError::Api {
                        code: code::INTERNAL,
                        message: format!("index {} failed to build: {}", index_name, reason),
                    })
                }
                Some(_) => self.pause_until(deadline, "index build").await?,
                None => {
                    return Err(WorkflowError::Api {
                        code: code::INVALID_ARGUMENT,
                        message: format!("index {} not found on {}", index_name, collection),
                    })
                }
            }
        }
    }

    async fn wait_for_load(&self, collection: &str) -> Result<()> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            match self.get_load_state(collection).await? {
                LoadState::LoadStateLoaded => return Ok(()),
                LoadState::LoadStateNotExist => {
                    return Err(WorkflowError::CollectionNotFound {
                        name: collection.to_string(),
                    })
                }
                LoadState::LoadStateLoading | LoadState::LoadStateNotLoad => {
                    self.pause_until(deadline, "load").await?
                }
            }
        }
    }

    /// Sleep one poll interval, or fail once `deadline` has passed.
    async fn pause_until(&self, deadline: Instant, operation: &'static str) -> Result<()> {
        if Instant::now() >= deadline {
            warn!(operation, after = ?self.wait_timeout, "gave up waiting");
            return Err(WorkflowError::Timeout {
                operation,
                after: self.wait_timeout,
            });
        }
        tokio::time::sleep(self.poll_interval).await;
        Ok(())
    }
}

#[async_trait]
impl VectorClient for HttpClient {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let names: Option<Vec<String>> = self.post("/collections/list", &Empty::default()).await?;
        Ok(names.unwrap_or_default())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let resp: HasResponse = self
            .post("/collections/has", &collection_request(name))
            .await?;
        Ok(resp.has)
    }

    async fn create_collection(&self, schema: &CollectionSchema, shards_num: u32) -> Result<()> {
        schema.validate()?;
        let body = CreateCollectionRequest {
            collection_name: schema.collection_name.clone(),
            schema: schema.clone(),
            params: CollectionParams { shards_num },
        };
        self.post_ack("/collections/create", &body).await?;
        info!(collection = %schema.collection_name, shards_num, "collection created");
        Ok(())
    }

    async fn describe_collection(&self, name: &str) -> Result<CollectionDescription> {
        self.post("/collections/describe", &collection_request(name))
            .await
    }

    async fn get_collection_stats(&self, name: &str) -> Result<CollectionStats> {
        self.post("/collections/get_stats", &collection_request(name))
            .await
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.post_ack("/collections/drop", &collection_request(name))
            .await?;
        info!(collection = name, "collection dropped");
        Ok(())
    }

    async fn create_partition(&self, collection: &str, partition: &str) -> Result<()> {
        self.post_ack("/partitions/create", &partition_request(collection, partition))
            .await?;
        info!(collection, partition, "partition created");
        Ok(())
    }

    async fn has_partition(&self, collection: &str, partition: &str) -> Result<bool> {
        let resp: HasResponse = self
            .post("/partitions/has", &partition_request(collection, partition))
            .await?;
        Ok(resp.has)
    }

    async fn list_partitions(&self, collection: &str) -> Result<Vec<String>> {
        let names: Option<Vec<String>> = self
            .post("/partitions/list", &collection_request(collection))
            .await?;
        Ok(names.unwrap_or_default())
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        spec: &IndexSpec,
        is_async: bool,
    ) -> Result<()> {
        spec.validate()?;
        let body = CreateIndexRequest {
            collection_name: collection.to_string(),
            index_params: vec![IndexParam {
                field_name: field.to_string(),
                index_name: field.to_string(),
                metric_type: spec.metric,
                index_type: spec.index_type.name().to_string(),
                params: spec.params(),
            }],
        };
        self.post_ack("/indexes/create", &body).await?;
        if !is_async {
            self.wait_for_index(collection, field).await?;
        }
        info!(
            collection,
            field,
            index_type = spec.index_type.name(),
            metric = %spec.metric,
            "index ready"
        );
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        partition: &str,
        columns: &[Column],
    ) -> Result<InsertResponse> {
        if columns.iter().all(Column::is_empty) {
            debug!(collection, "empty batch, nothing to insert");
            return Ok(InsertResponse::default());
        }

        let schema = self.describe_collection(collection).await?.schema();
        let rows = validate_columns(&schema, columns)?;

        let body = InsertRequest {
            collection_name: collection.to_string(),
            partition_name: partition.to_string(),
            data: to_rows(columns),
        };
        let resp: InsertResponse = self.post("/entities/insert", &body).await?;
        if resp.insert_count != rows {
            warn!(
                sent = rows,
                acknowledged = resp.insert_count,
                "service acknowledged a different row count"
            );
        }
        info!(collection, partition, rows = resp.insert_count, "batch inserted");
        Ok(resp)
    }

    async fn load_collection(&self, collection: &str, is_async: bool) -> Result<()> {
        self.post_ack("/collections/load", &collection_request(collection))
            .await?;
        if !is_async {
            self.wait_for_load(collection).await?;
        }
        info!(collection, "collection loaded");
        Ok(())
    }

    async fn get_load_state(&self, collection: &str) -> Result<LoadState> {
        let resp: LoadStateResponse = self
            .post("/collections/get_load_state", &collection_request(collection))
            .await?;
        Ok(resp.load_state)
    }

    async fn release_collection(&self, collection: &str) -> Result<()> {
        self.post_ack("/collections/release", &collection_request(collection))
            .await?;
        info!(collection, "collection released");
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        request.validate()?;
        let body = request.to_body();

        // Dropping the future on expiry aborts the in-flight request.
        let mut envelope: Envelope<Option<Vec<Hit>>> =
            match tokio::time::timeout(request.deadline, self.send("/entities/search", &body)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        collection = %request.collection_name,
                        deadline = ?request.deadline,
                        "search deadline exceeded"
                    );
                    return Err(WorkflowError::Timeout {
                        operation: "search",
                        after: request.deadline,
                    });
                }
            };

        let topks = std::mem::take(&mut envelope.topks);
        let hits = into_data(envelope)?.unwrap_or_default();
        let results = split_hits(hits, &topks, request.vectors.len(), request.top_k)?;
        debug!(queries = results.len(), "search answered");
        Ok(results)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(endpoint = %self.base_url, "connection closed");
        }
        Ok(())
    }
}

/// Decode a response body, turning non-2xx statuses and non-zero codes into
/// `WorkflowError::Api`.
fn decode_envelope<R: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<Envelope<R>> {
    if !status.is_success() {
        return Err(WorkflowError::Api {
            code: i32::from(status.as_u16()),
            message: String::from_utf8_lossy(body).into_owned(),
        });
    }

    let envelope: Envelope<R> = serde_json::from_slice(body)?;
    if envelope.code != code::SUCCESS {
        return Err(WorkflowError::Api {
            code: envelope.code,
            message: envelope
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }
    Ok(envelope)
}

/// The payload of a successful envelope. A missing `data` decodes as JSON
/// `null`, so `Option` targets come back as `None`.
fn into_data<R: DeserializeOwned>(envelope: Envelope<R>) -> Result<R> {
    match envelope.data {
        Some(data) => Ok(data),
        None => Ok(serde_json::from_value(Value::Null)?),
    }
}

/// Split the flat hit list of a search into one result per query vector.
///
/// `topks` gives the hit count of each query when the service reports it.
/// Without it a single query owns every hit, and several queries are split
/// every `limit` hits.
fn split_hits(
    hits: Vec<Hit>,
    topks: &[usize],
    queries: usize,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let malformed = |reason: String| WorkflowError::Api {
        code: code::INTERNAL,
        message: format!("malformed search response: {}", reason),
    };

    let counts: Vec<usize> = if !topks.is_empty() {
        if topks.len() != queries || topks.iter().sum::<usize>() != hits.len() {
            return Err(malformed(format!(
                "topks {:?} do not cover {} hits over {} queries",
                topks,
                hits.len(),
                queries
            )));
        }
        topks.to_vec()
    } else if queries <= 1 {
        vec![hits.len()]
    } else {
        if hits.len() > queries * limit {
            return Err(malformed(format!(
                "{} hits exceed {} queries of limit {}",
                hits.len(),
                queries,
                limit
            )));
        }
        (0..queries)
            .map(|q| hits.len().saturating_sub(q * limit).min(limit))
            .collect()
    };

    let mut hits = hits.into_iter();
    Ok(counts
        .into_iter()
        .map(|n| SearchResult {
            hits: hits.by_ref().take(n).collect(),
        })
        .collect())
}

/// Accept `host:port` or a URL; default to plain HTTP.
fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(WorkflowError::Config("endpoint is empty".to_string()));
    }
    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| WorkflowError::Config(format!("invalid endpoint {}: {}", endpoint, e)))?;
    if url.host_str().is_none() {
        return Err(WorkflowError::Config(format!("endpoint {} has no host", endpoint)));
    }
    Ok(with_scheme.trim_end_matches('/').to_string())
}

fn collection_request(name: &str) -> CollectionRequest {
    CollectionRequest {
        collection_name: name.to_string(),
    }
}

fn partition_request(collection: &str, partition: &str) -> PartitionRequest {
    PartitionRequest {
        collection_name: collection.to_string(),
        partition_name: partition.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, distance: f32) -> Hit {
        Hit {
            id,
            distance,
            fields: Default::default(),
        }
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("localhost:19530").unwrap(),
            "http://localhost:19530"
        );
        assert_eq!(
            normalize_endpoint("https://db.example.com/").unwrap(),
            "https://db.example.com"
        );
        assert!(matches!(normalize_endpoint(""), Err(WorkflowError::Config(_))));
        assert!(normalize_endpoint("http://").is_err());
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default().with_token("root:Milvus");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.token.as_deref(), Some("root:Milvus"));
        assert_eq!(config.wait_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_decode_flat_search_response() {
        let body = br#"{"code":0,"cost":0,"data":[
            {"book_id":1,"distance":0.01,"id":1},
            {"book_id":2,"distance":0.02,"id":2}]}"#;
        let envelope: Envelope<Option<Vec<Hit>>> = decode_envelope(StatusCode::OK, body).unwrap();
        let hits = into_data(envelope).unwrap().unwrap();
        let results = split_hits(hits, &[], 1, 2).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ids(), vec![1, 2]);
    }

    #[test]
    fn test_decode_describe_response() {
        let body = br#"{"code":0,"data":{"collectionName":"books","description":"","autoId":false,
            "fields":[
              {"name":"book_id","type":"Int64","primaryKey":true,"autoId":false},
              {"name":"word_count","type":"Int64","primaryKey":false},
              {"name":"book_intro","type":"FloatVector","params":[{"key":"dim","value":"2"}]}],
            "indexes":[],"load":"LoadStateNotLoad","partitionsNum":1,"shardsNum":2}}"#;
        let envelope: Envelope<CollectionDescription> =
            decode_envelope(StatusCode::OK, body).unwrap();
        let schema = into_data(envelope).unwrap().schema();
        schema.validate().unwrap();
        assert_eq!(schema.fields.len(), 3);
    }

    #[test]
    fn test_missing_data_decodes_as_none() {
        let envelope: Envelope<Option<Vec<String>>> =
            decode_envelope(StatusCode::OK, br#"{"code":0}"#).unwrap();
        assert_eq!(into_data(envelope).unwrap(), None);

        let envelope: Envelope<Option<Vec<String>>> =
            decode_envelope(StatusCode::OK, br#"{"code":0,"data":["books"]}"#).unwrap();
        assert_eq!(into_data(envelope).unwrap(), Some(vec!["books".to_string()]));
    }

    #[test]
    fn test_error_envelope_and_status() {
        let err = decode_envelope::<Value>(
            StatusCode::OK,
            br#"{"code":100,"message":"collection not found[collection=books]"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Api { code: 100, .. }));

        let err = decode_envelope::<Value>(StatusCode::NOT_FOUND, b"404 page not found").unwrap_err();
        assert!(matches!(err, WorkflowError::Api { code: 404, .. }));
    }

    #[test]
    fn test_split_hits_by_topks_and_limit() {
        let hits = vec![hit(1, 0.1), hit(2, 0.2), hit(3, 0.1)];

        let results = split_hits(hits.clone(), &[2, 1], 2, 2).unwrap();
        assert_eq!(results[0].ids(), vec![1, 2]);
        assert_eq!(results[1].ids(), vec![3]);

        let results = split_hits(hits.clone(), &[], 2, 2).unwrap();
        assert_eq!(results[0].ids(), vec![1, 2]);
        assert_eq!(results[1].ids(), vec![3]);

        let results = split_hits(Vec::new(), &[], 3, 2).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(SearchResult::is_empty));

        assert!(split_hits(hits.clone(), &[1, 1], 2, 2).is_err());
        assert!(split_hits(hits, &[], 1, 2).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        // Port 9 (discard) on loopback is not expected to run an HTTP service
        let config = ClientConfig {
            connect_timeout: Duration::from_millis(500),
            ..ClientConfig::new("127.0.0.1:9")
        };
        let err = HttpClient::connect(config).await.err().unwrap();
        assert!(matches!(err, WorkflowError::Connection { .. }));
    }
}
