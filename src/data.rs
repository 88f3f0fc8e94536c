//! Contiguous dataset helpers.
//!
//! The training loop operates on slices to avoid per-step allocations. `Inputs` and
//! `Dataset` provide validated, row-major storage for image/label matrices.

use crate::metrics::argmax;
use crate::{Error, Result};

/// Scale raw 8-bit pixel intensities into `[0, 1]`.
pub fn normalize_pixels(pixels: &[u8]) -> Vec<f32> {
    pixels.iter().map(|&p| f32::from(p) / 255.0).collect()
}

/// One-hot encode `label` into a vector of length `num_classes`.
pub fn one_hot(label: usize, num_classes: usize) -> Result<Vec<f32>> {
    if label >= num_classes {
        return Err(Error::InvalidData(format!(
            "label {label} is out of range for {num_classes} classes"
        )));
    }
    let mut v = vec![0.0; num_classes];
    v[label] = 1.0;
    Ok(v)
}

/// A collection of input samples (X).
///
/// Stored as a contiguous buffer with row-major layout:
/// - `inputs.len() == len * input_dim`
#[derive(Debug, Clone)]
pub struct Inputs {
    inputs: Vec<f32>,
    len: usize,
    input_dim: usize,
}

impl Inputs {
    /// Build inputs from a flat buffer with shape `(len, input_dim)`.
    pub fn from_flat(inputs: Vec<f32>, input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidData("input_dim must be > 0".to_owned()));
        }
        if !inputs.len().is_multiple_of(input_dim) {
            return Err(Error::InvalidData(format!(
                "inputs length {} is not divisible by input_dim {}",
                inputs.len(),
                input_dim
            )));
        }

        let len = inputs.len() / input_dim;

        Ok(Self {
            inputs,
            len,
            input_dim,
        })
    }

    #[inline]
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    /// Returns the per-sample input dimension.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[inline]
    /// Returns the `idx`-th input row (shape: `(input_dim,)`).
    ///
    /// Panics if `idx >= len`.
    pub fn input(&self, idx: usize) -> &[f32] {
        let start = idx * self.input_dim;
        &self.inputs[start..start + self.input_dim]
    }

    #[inline]
    /// Rows `start..end` as one flat buffer.
    pub fn rows(&self, start: usize, end: usize) -> &[f32] {
        &self.inputs[start * self.input_dim..end * self.input_dim]
    }
}

/// A supervised dataset: inputs (X) and one-hot targets (Y).
///
/// Stored as contiguous buffers with row-major layout:
/// - `inputs.len() == len * input_dim`
/// - `targets.len() == len * target_dim`
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Inputs,
    targets: Vec<f32>,
    target_dim: usize,
}

impl Dataset {
    /// Build a dataset from flat buffers.
    ///
    /// `inputs` is `(len, input_dim)` and `targets` is `(len, target_dim)`.
    pub fn from_flat(
        inputs: Vec<f32>,
        targets: Vec<f32>,
        input_dim: usize,
        target_dim: usize,
    ) -> Result<Self> {
        let inputs = Inputs::from_flat(inputs, input_dim)?;
        if target_dim == 0 {
            return Err(Error::InvalidData("target_dim must be > 0".to_owned()));
        }

        if targets.len() != inputs.len() * target_dim {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match len * target_dim ({} * {})",
                targets.len(),
                inputs.len(),
                target_dim
            )));
        }

        Ok(Self {
            inputs,
            targets,
            target_dim,
        })
    }

    /// Build a dataset from flat inputs and integer class labels, one-hot encoding them.
    pub fn from_labels(
        inputs: Vec<f32>,
        input_dim: usize,
        labels: &[u8],
        num_classes: usize,
    ) -> Result<Self> {
        let mut targets = Vec::with_capacity(labels.len() * num_classes);
        for &label in labels {
            targets.extend(one_hot(usize::from(label), num_classes)?);
        }
        Self::from_flat(inputs, targets, input_dim, num_classes)
    }

    #[inline]
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    #[inline]
    /// Returns the per-sample input dimension.
    pub fn input_dim(&self) -> usize {
        self.inputs.input_dim()
    }

    #[inline]
    /// Returns the per-sample target dimension.
    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    #[inline]
    /// Returns a view of the inputs (X).
    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    #[inline]
    /// Returns the `idx`-th input row (shape: `(input_dim,)`).
    ///
    /// Panics if `idx >= len`.
    pub fn input(&self, idx: usize) -> &[f32] {
        self.inputs.input(idx)
    }

    #[inline]
    /// Returns the `idx`-th target row (shape: `(target_dim,)`).
    ///
    /// Panics if `idx >= len`.
    pub fn target(&self, idx: usize) -> &[f32] {
        let start = idx * self.target_dim;
        &self.targets[start..start + self.target_dim]
    }

    #[inline]
    /// Class index of the `idx`-th target.
    pub fn label(&self, idx: usize) -> usize {
        argmax(self.target(idx))
    }

    #[inline]
    /// Target rows `start..end` as one flat buffer.
    pub fn target_rows(&self, start: usize, end: usize) -> &[f32] {
        &self.targets[start * self.target_dim..end * self.target_dim]
    }

    /// Split off the trailing `fraction` of samples, returning `(head, tail)`.
    ///
    /// The head keeps `floor(len * (1 - fraction))` samples. Both halves must be
    /// non-empty.
    pub fn split_tail(&self, fraction: f64) -> Result<(Dataset, Dataset)> {
        if !(fraction.is_finite() && fraction > 0.0 && fraction < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "split fraction must be in (0, 1), got {fraction}"
            )));
        }

        let split_at = (self.len() as f64 * (1.0 - fraction)).floor() as usize;
        if split_at == 0 || split_at == self.len() {
            return Err(Error::InvalidData(format!(
                "splitting {} samples at fraction {fraction} leaves an empty part",
                self.len()
            )));
        }

        Ok((self.slice(0, split_at)?, self.slice(split_at, self.len())?))
    }

    /// Copy of rows `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Result<Dataset> {
        if start > end || end > self.len() {
            return Err(Error::InvalidData(format!(
                "slice {start}..{end} out of range for {} samples",
                self.len()
            )));
        }
        Dataset::from_flat(
            self.inputs.rows(start, end).to_vec(),
            self.target_rows(start, end).to_vec(),
            self.input_dim(),
            self.target_dim,
        )
    }

    /// Copy the rows named by `indices` into contiguous batch buffers.
    ///
    /// `inputs_out` and `targets_out` must hold at least `indices.len()` rows.
    pub fn gather(&self, indices: &[usize], inputs_out: &mut [f32], targets_out: &mut [f32]) {
        let in_dim = self.input_dim();
        let t_dim = self.target_dim;
        assert!(inputs_out.len() >= indices.len() * in_dim);
        assert!(targets_out.len() >= indices.len() * t_dim);

        for (row, &idx) in indices.iter().enumerate() {
            inputs_out[row * in_dim..(row + 1) * in_dim].copy_from_slice(self.input(idx));
            targets_out[row * t_dim..(row + 1) * t_dim].copy_from_slice(self.target(idx));
        }
    }
}
