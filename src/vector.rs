//! Float vector type used for embeddings and query vectors

use crate::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A dense float32 vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FloatVector {
    data: Vec<f32>,
}

impl FloatVector {
    /// Create a new vector from a Vec<f32>
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    /// Get the dimension of the vector
    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// Get the underlying data as a slice
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    /// Fail unless every component is finite and the vector is non-empty.
    pub fn check_finite(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(WorkflowError::InvalidVector {
                reason: "vector is empty".to_string(),
            });
        }
        if let Some(bad) = self.data.iter().find(|x| !x.is_finite()) {
            return Err(WorkflowError::InvalidVector {
                reason: format!("non-finite component: {}", bad),
            });
        }
        Ok(())
    }
}

impl From<Vec<f32>> for FloatVector {
    fn from(data: Vec<f32>) -> Self {
        FloatVector::new(data)
    }
}

impl FromStr for FloatVector {
    type Err = WorkflowError;

    /// Parse a vector from a comma-separated string such as "0.1,0.2"
    fn from_str(s: &str) -> Result<Self> {
        let data: Result<Vec<f32>> = s
            .split(',')
            .map(|x| {
                x.trim()
                    .parse::<f32>()
                    .map_err(|_| WorkflowError::InvalidVector {
                        reason: format!("Invalid float: {}", x),
                    })
            })
            .collect();
        Ok(FloatVector::new(data?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_creation() {
        let v = FloatVector::new(vec![0.1, 0.2]);
        assert_eq!(v.dimension(), 2);
        assert_eq!(v.as_slice(), &[0.1, 0.2]);
    }

    #[test]
    fn test_from_str() {
        let v: FloatVector = "0.1, 0.2".parse().unwrap();
        assert_eq!(v.dimension(), 2);
        assert_eq!(v.as_slice(), &[0.1, 0.2]);
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        let result = "0.1,abc".parse::<FloatVector>();
        assert!(matches!(result, Err(WorkflowError::InvalidVector { .. })));
    }

    #[test]
    fn test_check_finite() {
        assert!(FloatVector::new(vec![0.5, 1.0]).check_finite().is_ok());
        assert!(FloatVector::new(vec![]).check_finite().is_err());
        assert!(FloatVector::new(vec![f32::NAN, 1.0]).check_finite().is_err());
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let v = FloatVector::new(vec![1.0, 2.0]);
        assert_eq!(serde_json::to_string(&v).unwrap(), "[1.0,2.0]");
    }
}
