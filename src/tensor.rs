//! Core tensor type used for sequences, gate parameters and recurrent state.
//!
//! Sequences use the layout `[batch, time, features]`. Tensors are immutable once
//! built: data sits behind an `Arc`, so cloning a tensor hands out another handle
//! to the same buffer rather than copying it.

use crate::error::{LstmError, Result};
use num_traits::{Float, FromPrimitive};
use std::{fmt::Debug, ops::Range, sync::Arc};

/// Element type accepted by the layer and its kernels.
pub trait Scalar: Float + FromPrimitive + Default + Debug + Send + Sync + 'static {}

impl<T> Scalar for T where T: Float + FromPrimitive + Default + Debug + Send + Sync + 'static {}

/// A row-major n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    data: Arc<Vec<T>>,
    shape: Vec<usize>,
}

impl<T: Scalar> Tensor<T> {
    /// Creates a tensor from a flat vector and a shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector length does not match the shape size.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(LstmError::ShapeMismatch {
                expected: vec![size],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            data: Arc::new(data),
            shape: shape.to_vec(),
        })
    }

    /// Creates a tensor filled with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::filled(shape, T::zero())
    }

    /// Creates a tensor with every element set to `value`.
    pub fn filled(shape: &[usize], value: T) -> Self {
        let size = shape.iter().product();
        Self {
            data: Arc::new(vec![value; size]),
            shape: shape.to_vec(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.data.as_ref().clone()
    }

    /// Returns the shape as `(rows, cols)`, failing for anything but a matrix.
    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[rows, cols] => Ok((rows, cols)),
            other => Err(LstmError::InvalidShape(format!(
                "expected a rank-2 tensor, got shape {:?}",
                other
            ))),
        }
    }

    /// Returns the shape as `(batch, time, features)`, failing for anything but a sequence.
    pub fn dims3(&self) -> Result<(usize, usize, usize)> {
        match self.shape.as_slice() {
            &[batch, time, features] => Ok((batch, time, features)),
            other => Err(LstmError::InvalidShape(format!(
                "expected a [batch, time, features] sequence, got shape {:?}",
                other
            ))),
        }
    }

    /// Extracts time step `t` of a sequence as a `[batch, features]` matrix.
    pub fn time_step(&self, t: usize) -> Result<Self> {
        let (batch, time, features) = self.dims3()?;
        if t >= time {
            return Err(LstmError::InvalidInput(format!(
                "time step {} out of bounds for sequence length {}",
                t, time
            )));
        }
        let mut data = Vec::with_capacity(batch * features);
        for b in 0..batch {
            let start = (b * time + t) * features;
            data.extend_from_slice(&self.data[start..start + features]);
        }
        Self::from_vec(data, &[batch, features])
    }

    /// Returns the sub-sequence covering the time steps in `range`.
    pub fn slice_time(&self, range: Range<usize>) -> Result<Self> {
        let (batch, time, features) = self.dims3()?;
        if range.start > range.end || range.end > time {
            return Err(LstmError::InvalidInput(format!(
                "time range {:?} out of bounds for sequence length {}",
                range, time
            )));
        }
        let len = range.end - range.start;
        let mut data = Vec::with_capacity(batch * len * features);
        for b in 0..batch {
            let start = (b * time + range.start) * features;
            data.extend_from_slice(&self.data[start..start + len * features]);
        }
        Self::from_vec(data, &[batch, len, features])
    }

    /// Concatenates sequences along the time axis.
    pub fn concat_time(parts: &[Self]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| LstmError::InvalidInput("nothing to concatenate".to_string()))?;
        let (batch, _, features) = first.dims3()?;
        let mut total = 0;
        for part in parts {
            let (b, t, f) = part.dims3()?;
            if b != batch || f != features {
                return Err(LstmError::ShapeMismatch {
                    expected: vec![batch, t, features],
                    actual: part.shape.clone(),
                });
            }
            total += t;
        }
        let mut data = Vec::with_capacity(batch * total * features);
        for b in 0..batch {
            for part in parts {
                let time = part.shape[1];
                let start = b * time * features;
                data.extend_from_slice(&part.data[start..start + time * features]);
            }
        }
        Self::from_vec(data, &[batch, total, features])
    }

    /// Applies `f` to every element.
    pub fn map<F: Fn(T) -> T>(&self, f: F) -> Self {
        Self {
            data: Arc::new(self.data.iter().map(|&v| f(v)).collect()),
            shape: self.shape.clone(),
        }
    }

    /// Combines two tensors of identical shape element by element.
    pub fn zip_map<F: Fn(T, T) -> T>(&self, other: &Self, f: F) -> Result<Self> {
        self.expect_shape(other.shape())?;
        Ok(Self {
            data: Arc::new(
                self.data
                    .iter()
                    .zip(other.data.iter())
                    .map(|(&a, &b)| f(a, b))
                    .collect(),
            ),
            shape: self.shape.clone(),
        })
    }

    /// Fails with `ShapeMismatch` unless this tensor has exactly `expected` shape.
    pub fn expect_shape(&self, expected: &[usize]) -> Result<()> {
        if self.shape != expected {
            return Err(LstmError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: self.shape.clone(),
            });
        }
        Ok(())
    }

    /// Returns `true` if another handle shares this tensor's buffer.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Detaches the tensor from any other handle, copying the buffer only if it is shared.
    pub fn into_owned(self) -> Self {
        let data = match Arc::try_unwrap(self.data) {
            Ok(data) => data,
            Err(shared) => shared.as_ref().clone(),
        };
        Self {
            data: Arc::new(data),
            shape: self.shape,
        }
    }

    /// Sum of all elements.
    pub fn sum(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, &v| acc + v)
    }
}
