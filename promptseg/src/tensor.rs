//! Flat tensors exchanged with the inference runtime

use crate::error::{Result, SegmentError};
use std::collections::HashMap;

/// Element type of a tensor buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ElementType {
    Float32,
}

/// Named tensors, used for both feeds and results
pub type TensorMap = HashMap<String, Tensor>;

/// Dense row-major tensor. `data.len()` always equals the product of `shape`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    element_type: ElementType,
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = element_count(&shape)?;
        if data.len() != expected {
            return Err(SegmentError::InferenceRuntime(format!(
                "Tensor buffer holds {} elements but shape {:?} needs {}",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self {
            element_type: ElementType::Float32,
            data,
            shape,
        })
    }

    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let len = element_count(&shape)?;
        Self::new(shape, vec![0.0; len])
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Owned copy backed by a freshly allocated buffer
    pub fn deep_copy(&self) -> Self {
        Self {
            element_type: self.element_type,
            data: self.data.to_vec(),
            shape: self.shape.clone(),
        }
    }
}

fn element_count(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() {
        return Err(SegmentError::InferenceRuntime(
            "Tensor shape must have at least one dimension".to_string(),
        ));
    }
    if shape.iter().any(|&d| d == 0) {
        return Err(SegmentError::InferenceRuntime(format!(
            "Tensor shape {:?} has a zero dimension",
            shape
        )));
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| SegmentError::InferenceRuntime("Tensor shape would overflow".to_string()))
}
