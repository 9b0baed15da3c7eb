//! Index and search-time parameter selection
//!
//! The service builds the index; this module only describes which algorithm
//! and parameters to ask for, and validates them before a request is sent.

use crate::distance::MetricType;
use crate::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Default IVF cell count.
pub const DEFAULT_NLIST: u32 = 1024;
/// Default number of IVF cells probed per query.
pub const DEFAULT_NPROBE: u32 = 10;

const MAX_NLIST: u32 = 65_536;
const HNSW_M_RANGE: std::ops::RangeInclusive<u32> = 4..=64;
const HNSW_EF_CONSTRUCTION_RANGE: std::ops::RangeInclusive<u32> = 8..=512;
const MAX_EF: u32 = 32_768;

/// Index algorithm with its construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    Flat,
    IvfFlat { nlist: u32 },
    Hnsw { m: u32, ef_construction: u32 },
}

impl IndexType {
    /// Name of the algorithm as the service spells it.
    pub fn name(&self) -> &'static str {
        match self {
            IndexType::Flat => "FLAT",
            IndexType::IvfFlat { .. } => "IVF_FLAT",
            IndexType::Hnsw { .. } => "HNSW",
        }
    }
}

/// An index request: algorithm plus distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub index_type: IndexType,
    pub metric: MetricType,
}

impl IndexSpec {
    pub fn flat(metric: MetricType) -> Self {
        Self {
            index_type: IndexType::Flat,
            metric,
        }
    }

    /// An inverted-file index with `nlist` cells.
    pub fn ivf_flat(metric: MetricType, nlist: u32) -> Result<Self> {
        let spec = Self {
            index_type: IndexType::IvfFlat { nlist },
            metric,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn hnsw(metric: MetricType, m: u32, ef_construction: u32) -> Result<Self> {
        let spec = Self {
            index_type: IndexType::Hnsw { m, ef_construction },
            metric,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        match self.index_type {
            IndexType::Flat => Ok(()),
            IndexType::IvfFlat { nlist } => {
                if nlist == 0 || nlist > MAX_NLIST {
                    return Err(invalid(format!("nlist {} out of range [1, {}]", nlist, MAX_NLIST)));
                }
                Ok(())
            }
            IndexType::Hnsw { m, ef_construction } => {
                if !HNSW_M_RANGE.contains(&m) {
                    return Err(invalid(format!("M {} out of range {:?}", m, HNSW_M_RANGE)));
                }
                if !HNSW_EF_CONSTRUCTION_RANGE.contains(&ef_construction) {
                    return Err(invalid(format!(
                        "efConstruction {} out of range {:?}",
                        ef_construction, HNSW_EF_CONSTRUCTION_RANGE
                    )));
                }
                Ok(())
            }
        }
    }

    /// Construction parameters in the service's wire shape.
    pub fn params(&self) -> Map<String, Value> {
        let value = match self.index_type {
            IndexType::Flat => json!({}),
            IndexType::IvfFlat { nlist } => json!({ "nlist": nlist }),
            IndexType::Hnsw { m, ef_construction } => {
                json!({ "M": m, "efConstruction": ef_construction })
            }
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Rebuild a spec from the wire shape used by the index API.
    pub fn from_wire(index_type: &str, metric: MetricType, params: &Map<String, Value>) -> Result<Self> {
        let index_type = match index_type {
            "FLAT" => IndexType::Flat,
            "IVF_FLAT" => IndexType::IvfFlat {
                nlist: param_u32(params, "nlist")?,
            },
            "HNSW" => IndexType::Hnsw {
                m: param_u32(params, "M")?,
                ef_construction: param_u32(params, "efConstruction")?,
            },
            other => return Err(invalid(format!("unsupported index type {}", other))),
        };
        let spec = Self { index_type, metric };
        spec.validate()?;
        Ok(spec)
    }
}

/// Search-time parameters matching the index algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchParams {
    Flat,
    IvfFlat { nprobe: u32 },
    Hnsw { ef: u32 },
}

impl SearchParams {
    /// Sensible defaults for an index of the given type.
    pub fn for_index(index_type: &IndexType, top_k: usize) -> Self {
        match index_type {
            IndexType::Flat => SearchParams::Flat,
            IndexType::IvfFlat { nlist } => SearchParams::IvfFlat {
                nprobe: DEFAULT_NPROBE.min(*nlist),
            },
            IndexType::Hnsw { .. } => SearchParams::Hnsw {
                ef: (top_k as u32).max(64),
            },
        }
    }

    pub fn validate(&self, top_k: usize) -> Result<()> {
        match *self {
            SearchParams::Flat => Ok(()),
            SearchParams::IvfFlat { nprobe } => {
                if nprobe == 0 || nprobe > MAX_NLIST {
                    return Err(invalid(format!("nprobe {} out of range [1, {}]", nprobe, MAX_NLIST)));
                }
                Ok(())
            }
            SearchParams::Hnsw { ef } => {
                if (ef as usize) < top_k || ef > MAX_EF {
                    return Err(invalid(format!("ef {} out of range [{}, {}]", ef, top_k, MAX_EF)));
                }
                Ok(())
            }
        }
    }

    /// Parameters in the service's wire shape.
    pub fn params(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match *self {
            SearchParams::Flat => {}
            SearchParams::IvfFlat { nprobe } => {
                map.insert("nprobe".to_string(), json!(nprobe));
            }
            SearchParams::Hnsw { ef } => {
                map.insert("ef".to_string(), json!(ef));
            }
        }
        map
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams::IvfFlat {
            nprobe: DEFAULT_NPROBE,
        }
    }
}

fn param_u32(params: &Map<String, Value>, key: &str) -> Result<u32> {
    params
        .get(key)
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| invalid(format!("missing or invalid parameter {}", key)))
}

fn invalid(reason: String) -> WorkflowError {
    WorkflowError::InvalidIndex { reason }
}
