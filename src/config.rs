//! Workflow configuration
//!
//! Every knob has a default that reproduces the book-search demo. A JSON
//! file can override any subset of them, and the CLI overrides the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::http::{ClientConfig, DEFAULT_ENDPOINT};
use crate::distance::MetricType;
use crate::error::{Result, WorkflowError};
use crate::index::{IndexSpec, IndexType, SearchParams, DEFAULT_NLIST};
use crate::schema::validate_name;

/// Which searches the workflow runs after loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Plain,
    Filtered,
    #[default]
    Both,
}

impl SearchMode {
    pub fn runs_plain(&self) -> bool {
        matches!(self, SearchMode::Plain | SearchMode::Both)
    }

    pub fn runs_filtered(&self) -> bool {
        matches!(self, SearchMode::Filtered | SearchMode::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub mode: SearchMode,
    /// Expression used by the filtered search
    pub filter: String,
    pub top_k: usize,
    pub output_fields: Vec<String>,
    pub query: Vec<f32>,
    /// Partitions to search; empty means all of them
    pub partitions: Vec<String>,
    /// Search-time parameters; derived from the index when absent
    pub params: Option<SearchParams>,
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::Both,
            filter: "word_count <= 11000".to_string(),
            top_k: 2,
            output_fields: vec!["book_id".to_string()],
            query: vec![0.1, 0.2],
            partitions: Vec::new(),
            params: None,
            timeout_ms: 10_000,
        }
    }
}

impl SearchConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub connect_timeout_ms: u64,
    pub collection: String,
    pub description: String,
    pub shards_num: u32,
    pub dim: usize,
    /// Target partition for inserts; empty means the default partition
    pub partition: String,
    pub rows: usize,
    pub word_count_base: i64,
    /// Seed for the synthetic vectors; random when absent
    pub seed: Option<u64>,
    pub index: IndexSpec,
    pub search: SearchConfig,
    /// Drop the collection once the searches are done
    pub drop_after: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
            connect_timeout_ms: 5_000,
            collection: "my_collection".to_string(),
            description: "Test book search".to_string(),
            shards_num: 2,
            dim: 2,
            partition: String::new(),
            rows: 2_000,
            word_count_base: 10_000,
            seed: None,
            index: IndexSpec {
                index_type: IndexType::IvfFlat {
                    nlist: DEFAULT_NLIST,
                },
                metric: MetricType::L2,
            },
            search: SearchConfig::default(),
            drop_after: false,
        }
    }
}

impl WorkflowConfig {
    /// Load from a JSON file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&text).map_err(|e| {
            WorkflowError::Config(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    /// Search parameters, falling back to the index's defaults.
    pub fn search_params(&self) -> SearchParams {
        self.search
            .params
            .unwrap_or_else(|| SearchParams::for_index(&self.index.index_type, self.search.top_k))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            token: self.token.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..ClientConfig::new(self.endpoint.clone())
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("collection", &self.collection)
            .map_err(|e| WorkflowError::Config(e.to_string()))?;
        if !self.partition.is_empty() {
            validate_name("partition", &self.partition)
                .map_err(|e| WorkflowError::Config(e.to_string()))?;
        }
        for partition in &self.search.partitions {
            validate_name("partition", partition)
                .map_err(|e| WorkflowError::Config(e.to_string()))?;
        }
        if self.shards_num == 0 {
            return Err(WorkflowError::Config("shards_num must be at least 1".to_string()));
        }
        if self.dim == 0 {
            return Err(WorkflowError::Config("dim must be at least 1".to_string()));
        }
        if self.search.query.len() != self.dim {
            return Err(WorkflowError::Config(format!(
                "query vector has {} components, collection dim is {}",
                self.search.query.len(),
                self.dim
            )));
        }
        if self.search.timeout_ms == 0 {
            return Err(WorkflowError::Config("search timeout must be positive".to_string()));
        }
        if self.search.mode.runs_filtered() && self.search.filter.trim().is_empty() {
            return Err(WorkflowError::Config(
                "filtered search needs a filter expression".to_string(),
            ));
        }
        self.index.validate()?;
        self.search_params().validate(self.search.top_k)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_demo() {
        let config = WorkflowConfig::default();
        config.validate().unwrap();
        assert_eq!(config.collection, "my_collection");
        assert_eq!(config.rows, 2_000);
        assert_eq!(config.search.top_k, 2);
        assert_eq!(config.search.mode, SearchMode::Both);
        assert!(config.search.partitions.is_empty());
        assert_eq!(config.search.deadline(), Duration::from_secs(10));
        assert_eq!(config.search_params(), SearchParams::IvfFlat { nprobe: 10 });
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"collection": "novels", "index": {{"index_type": {{"type": "HNSW", "m": 16, "ef_construction": 200}}, "metric": "IP"}}, "search": {{"mode": "both", "top_k": 5}}}}"#
        )
        .unwrap();

        let config = WorkflowConfig::from_file(file.path()).unwrap();
        assert_eq!(config.collection, "novels");
        assert_eq!(config.dim, 2);
        assert_eq!(config.index.metric, MetricType::IP);
        assert_eq!(config.search.mode, SearchMode::Both);
        assert_eq!(config.search.filter, "word_count <= 11000");
        assert_eq!(config.search_params(), SearchParams::Hnsw { ef: 64 });
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"colection": "typo"}}"#).unwrap();
        assert!(matches!(
            WorkflowConfig::from_file(file.path()),
            Err(WorkflowError::Config(_))
        ));
    }

    #[test]
    fn test_validate_catches_inconsistencies() {
        let mut config = WorkflowConfig::default();
        config.search.query = vec![0.1, 0.2, 0.3];
        assert!(config.validate().is_err());

        let mut config = WorkflowConfig::default();
        config.search.mode = SearchMode::Filtered;
        config.search.filter = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = WorkflowConfig::default();
        config.collection = "has space".to_string();
        assert!(config.validate().is_err());

        let mut config = WorkflowConfig::default();
        config.search.partitions = vec!["novels".to_string(), "bad name".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_config() {
        let config = WorkflowConfig {
            token: Some("root:Milvus".to_string()),
            ..WorkflowConfig::default()
        };
        let client = config.client_config();
        assert_eq!(client.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(client.token.as_deref(), Some("root:Milvus"));
        assert_eq!(client.connect_timeout, Duration::from_secs(5));
    }
}
