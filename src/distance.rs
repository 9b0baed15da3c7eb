//! Distance metrics for vector similarity

use crate::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance metric selector, serialized the way the service names them.
///
/// Every metric is reported as a distance where lower means closer, so
/// results are always ordered ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MetricType {
    /// Squared Euclidean distance
    #[default]
    L2,
    /// Inner product (negated for minimum distance)
    IP,
    /// Cosine similarity (converted to distance: 1 - similarity)
    #[serde(rename = "COSINE")]
    Cosine,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::L2 => "L2",
            MetricType::IP => "IP",
            MetricType::Cosine => "COSINE",
        }
    }

    /// Compute the distance between two vectors using this metric
    pub fn distance(&self, v1: &[f32], v2: &[f32]) -> Result<f32> {
        if v1.len() != v2.len() {
            return Err(WorkflowError::InvalidVector {
                reason: format!("cannot compare dimension {} with {}", v1.len(), v2.len()),
            });
        }

        match self {
            MetricType::L2 => Ok(squared_l2_distance(v1, v2)),
            MetricType::IP => Ok(-dot_product(v1, v2)),
            MetricType::Cosine => cosine_distance(v1, v2),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute squared Euclidean (L2) distance between two vectors
pub fn squared_l2_distance(v1: &[f32], v2: &[f32]) -> f32 {
    v1.iter().zip(v2.iter()).map(|(a, b)| (a - b).powi(2)).sum()
}

/// Compute cosine distance between two vectors (1 - cosine similarity)
pub fn cosine_distance(v1: &[f32], v2: &[f32]) -> Result<f32> {
    let norm1 = norm(v1);
    let norm2 = norm(v2);

    if norm1 == 0.0 || norm2 == 0.0 {
        return Err(WorkflowError::InvalidVector {
            reason: "Cannot compute cosine distance with zero vector".to_string(),
        });
    }

    let similarity = dot_product(v1, v2) / (norm1 * norm2);

    // Clamp to [-1, 1] to handle floating point errors
    let similarity = similarity.clamp(-1.0, 1.0);

    Ok(1.0 - similarity)
}

/// Compute dot product of two vectors
pub fn dot_product(v1: &[f32], v2: &[f32]) -> f32 {
    v1.iter().zip(v2.iter()).map(|(a, b)| a * b).sum()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
