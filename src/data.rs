//! Training-example storage.
//!
//! Both trainers operate on slices into contiguous row-major buffers, so the
//! per-example hot path never allocates. `Samples` holds unsupervised
//! examples (RBM training); `TrainingPairs` adds a target row per example
//! (supervised MLP training). Shapes are validated at construction and the
//! buffers are immutable afterwards; train and held-out sets are separate
//! objects borrowed by the trainer for the session.

use crate::{Error, Result};

/// Unsupervised examples stored row-major: `values.len() == len * width`.
#[derive(Debug, Clone)]
pub struct Samples {
    values: Vec<f32>,
    len: usize,
    width: usize,
}

impl Samples {
    /// Build from a flat buffer with shape `(len, width)`.
    pub fn from_flat(values: Vec<f32>, width: usize) -> Result<Self> {
        if width == 0 {
            return Err(Error::InvalidData("sample width must be > 0".to_owned()));
        }
        if values.len() % width != 0 {
            return Err(Error::InvalidData(format!(
                "buffer length {} is not divisible by sample width {width}",
                values.len()
            )));
        }
        let len = values.len() / width;
        Ok(Self { values, len, width })
    }

    /// Build from per-example rows (copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::InvalidData("samples must not be empty".to_owned()));
        }
        let width = rows[0].len();
        if width == 0 {
            return Err(Error::InvalidData("sample width must be > 0".to_owned()));
        }
        let mut values = Vec::with_capacity(rows.len() * width);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(Error::InvalidData(format!(
                    "sample row {i} has len {}, expected {width}",
                    row.len()
                )));
            }
            values.extend_from_slice(row);
        }
        let len = rows.len();
        Ok(Self { values, len, width })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// The `idx`-th example row.
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn sample(&self, idx: usize) -> &[f32] {
        let start = idx * self.width;
        &self.values[start..start + self.width]
    }
}

/// Supervised input/target pairs stored row-major.
#[derive(Debug, Clone)]
pub struct TrainingPairs {
    inputs: Samples,
    targets: Vec<f32>,
    target_width: usize,
}

impl TrainingPairs {
    /// Build from flat buffers: inputs `(len, input_width)`, targets
    /// `(len, target_width)`.
    pub fn from_flat(
        inputs: Vec<f32>,
        targets: Vec<f32>,
        input_width: usize,
        target_width: usize,
    ) -> Result<Self> {
        let inputs = Samples::from_flat(inputs, input_width)?;
        if target_width == 0 {
            return Err(Error::InvalidData("target width must be > 0".to_owned()));
        }
        if targets.len() != inputs.len() * target_width {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match len * target_width ({} * {target_width})",
                targets.len(),
                inputs.len()
            )));
        }
        Ok(Self { inputs, targets, target_width })
    }

    /// Build from per-example rows (copies into contiguous storage).
    pub fn from_rows(inputs: &[Vec<f32>], targets: &[Vec<f32>]) -> Result<Self> {
        if inputs.len() != targets.len() {
            return Err(Error::InvalidData(format!(
                "inputs/targets length mismatch: {} vs {}",
                inputs.len(),
                targets.len()
            )));
        }
        let inputs = Samples::from_rows(inputs)?;
        let target_width = targets.first().map(|t| t.len()).unwrap_or(0);
        if target_width == 0 {
            return Err(Error::InvalidData("target width must be > 0".to_owned()));
        }
        let mut flat = Vec::with_capacity(inputs.len() * target_width);
        for (i, row) in targets.iter().enumerate() {
            if row.len() != target_width {
                return Err(Error::InvalidData(format!(
                    "target row {i} has len {}, expected {target_width}",
                    row.len()
                )));
            }
            flat.extend_from_slice(row);
        }
        Ok(Self { inputs, targets: flat, target_width })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    #[inline]
    pub fn input_width(&self) -> usize {
        self.inputs.width()
    }

    #[inline]
    pub fn target_width(&self) -> usize {
        self.target_width
    }

    /// The `idx`-th input row.
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn input(&self, idx: usize) -> &[f32] {
        self.inputs.sample(idx)
    }

    /// The `idx`-th target row.
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn target(&self, idx: usize) -> &[f32] {
        let start = idx * self.target_width;
        &self.targets[start..start + self.target_width]
    }
}
