//! The book-search pipeline
//!
//! Connect, ensure the collection, index it, insert a synthetic batch, load
//! it and query it. Every step runs after the previous one completes and the
//! first failure ends the run. The connection is closed on every path.

use tracing::{info, warn};

use crate::api::InsertResponse;
use crate::client::{HttpClient, SearchRequest, SearchResult, VectorClient};
use crate::column::Column;
use crate::config::WorkflowConfig;
use crate::error::{Result, WorkflowError};
use crate::expr::Expr;
use crate::schema::{CollectionSchema, FieldSchema};
use crate::synthetic::{generate_books, BOOK_ID, BOOK_INTRO, WORD_COUNT};
use crate::vector::FloatVector;

/// Schema of the demo collection: primary `book_id`, scalar `word_count`
/// and a `book_intro` vector of `dim` components.
pub fn book_schema(name: &str, description: &str, dim: usize) -> CollectionSchema {
    CollectionSchema::new(name, description)
        .with_field(FieldSchema::int64(BOOK_ID).primary())
        .with_field(FieldSchema::int64(WORD_COUNT))
        .with_field(FieldSchema::float_vector(BOOK_INTRO, dim))
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowReport {
    /// Whether this run created the collection
    pub created: bool,
    pub inserted: usize,
    pub plain: Option<Vec<SearchResult>>,
    pub filtered: Option<Vec<SearchResult>>,
}

/// Pipeline context: one client, one collection.
pub struct Workflow<C: VectorClient> {
    client: C,
    config: WorkflowConfig,
    schema: CollectionSchema,
}

impl Workflow<HttpClient> {
    /// Connect to the configured endpoint.
    pub async fn connect(config: WorkflowConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpClient::connect(config.client_config()).await?;
        Self::new(client, config)
    }
}

impl<C: VectorClient> Workflow<C> {
    pub fn new(client: C, config: WorkflowConfig) -> Result<Self> {
        config.validate()?;
        let schema = book_schema(&config.collection, &config.description, config.dim);
        schema.validate()?;
        Ok(Self {
            client,
            config,
            schema,
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// Create the collection unless it already exists. Returns whether it
    /// was created.
    pub async fn ensure_collection(&self) -> Result<bool> {
        let name = &self.schema.collection_name;
        if self.client.has_collection(name).await? {
            info!(collection = %name, "collection already exists");
            return Ok(false);
        }
        self.client
            .create_collection(&self.schema, self.config.shards_num)
            .await?;
        Ok(true)
    }

    /// Create the target partition if one is configured and missing.
    pub async fn ensure_partition(&self) -> Result<()> {
        let partition = &self.config.partition;
        if partition.is_empty() {
            return Ok(());
        }
        let collection = &self.schema.collection_name;
        if !self.client.has_partition(collection, partition).await? {
            self.client.create_partition(collection, partition).await?;
        }
        Ok(())
    }

    /// Build the configured index on the vector field and wait for it.
    pub async fn build_index(&self) -> Result<()> {
        self.client
            .create_index(
                &self.schema.collection_name,
                BOOK_INTRO,
                &self.config.index,
                false,
            )
            .await
    }

    pub async fn insert_batch(&self, columns: &[Column]) -> Result<InsertResponse> {
        self.client
            .insert(&self.schema.collection_name, &self.config.partition, columns)
            .await
    }

    /// Load the collection and wait until it is queryable.
    pub async fn load(&self) -> Result<()> {
        self.client
            .load_collection(&self.schema.collection_name, false)
            .await
    }

    /// The configured query, optionally restricted by the filter expression.
    pub fn search_request(&self, filtered: bool) -> Result<SearchRequest> {
        let search = &self.config.search;
        let mut request = SearchRequest::new(
            self.schema.collection_name.clone(),
            BOOK_INTRO,
            vec![FloatVector::new(search.query.clone())],
        )
        .with_output_fields(search.output_fields.clone())
        .with_partitions(search.partitions.clone())
        .with_metric(self.config.index.metric)
        .with_top_k(search.top_k)
        .with_params(self.config.search_params())
        .with_deadline(search.deadline());

        if filtered {
            Expr::parse(&search.filter)?.check_fields(&self.schema)?;
            request = request.with_filter(search.filter.clone());
        }
        for field in &request.output_fields {
            if self.schema.field(field).is_none() {
                return Err(WorkflowError::UnknownField {
                    field: field.clone(),
                });
            }
        }
        Ok(request)
    }

    pub async fn search(&self, filtered: bool) -> Result<Vec<SearchResult>> {
        let request = self.search_request(filtered)?;
        let results = self.client.search(&request).await?;
        info!(
            filtered,
            hits = results.iter().map(SearchResult::len).sum::<usize>(),
            "search complete"
        );
        Ok(results)
    }

    async fn execute(&self) -> Result<WorkflowReport> {
        let created = self.ensure_collection().await?;
        self.ensure_partition().await?;
        self.build_index().await?;

        let batch = generate_books(
            self.config.rows,
            self.config.dim,
            self.config.word_count_base,
            self.config.seed,
        );
        let inserted = self.insert_batch(&batch.into_columns()).await?.insert_count;

        self.load().await?;

        let mode = self.config.search.mode;
        let plain = if mode.runs_plain() {
            Some(self.search(false).await?)
        } else {
            None
        };
        let filtered = if mode.runs_filtered() {
            Some(self.search(true).await?)
        } else {
            None
        };

        if self.config.drop_after {
            self.client
                .drop_collection(&self.schema.collection_name)
                .await?;
        }

        Ok(WorkflowReport {
            created,
            inserted,
            plain,
            filtered,
        })
    }

    /// Run the whole pipeline, then close the client whatever the outcome.
    pub async fn run(self) -> Result<WorkflowReport> {
        let outcome = self.execute().await;
        if let Err(e) = self.client.close().await {
            warn!(error = %e, "failed to close client");
        }
        match &outcome {
            Ok(report) => info!(
                collection = %self.schema.collection_name,
                created = report.created,
                inserted = report.inserted,
                "workflow finished"
            ),
            Err(e) => warn!(error = %e, "workflow aborted"),
        }
        outcome
    }
}
