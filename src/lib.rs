//! # Book Search Workflow
//!
//! A client workflow for a remote vector database speaking the Milvus v2
//! REST API.
//!
//! This library provides:
//! - Collection schemas, column batches and filter expressions
//! - An async [`VectorClient`] trait with an HTTP implementation
//! - The [`Workflow`] runner: ensure collection, index, insert, load, search
//! - A local in-memory development server speaking the same API
//!
//! ## Example
//!
//! ```rust,no_run
//! use booksearch_workflow::{Workflow, WorkflowConfig};
//!
//! # async fn demo() -> booksearch_workflow::Result<()> {
//! let config = WorkflowConfig {
//!     endpoint: "localhost:19530".to_string(),
//!     seed: Some(42),
//!     ..WorkflowConfig::default()
//! };
//!
//! let report = Workflow::connect(config).await?.run().await?;
//! for result in report.plain.unwrap_or_default() {
//!     println!("{:?} {:?}", result.ids(), result.scores());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod column;
pub mod config;
pub mod distance;
pub mod error;
pub mod expr;
pub mod index;
pub mod schema;
pub mod server;
pub mod synthetic;
pub mod vector;
pub mod workflow;

pub use client::{ClientConfig, HttpClient, SearchRequest, SearchResult, VectorClient};
pub use column::Column;
pub use config::{SearchMode, WorkflowConfig};
pub use distance::MetricType;
pub use error::{Result, WorkflowError};
pub use index::{IndexSpec, IndexType, SearchParams};
pub use schema::{CollectionSchema, FieldSchema};
pub use vector::FloatVector;
pub use workflow::{Workflow, WorkflowReport};
