//! Accuracy and loss bookkeeping, accumulated batch by batch without allocating.

/// Index of the largest value; ties go to the lowest index.
///
/// Panics on an empty slice.
#[inline]
pub fn argmax(values: &[f32]) -> usize {
    assert!(!values.is_empty(), "argmax of an empty slice");
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Loss and accuracy counts for one mini-batch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatchStats {
    /// Mean loss over the batch.
    pub loss: f32,
    /// Number of samples whose argmax matched the target.
    pub correct: usize,
    /// Number of samples in the batch.
    pub len: usize,
}

impl BatchStats {
    #[inline]
    pub fn accuracy(&self) -> f32 {
        if self.len == 0 {
            0.0
        } else {
            self.correct as f32 / self.len as f32
        }
    }
}

/// Sample-weighted running mean of loss and accuracy across batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    loss_sum: f64,
    correct: usize,
    count: usize,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, batch: &BatchStats) {
        self.loss_sum += f64::from(batch.loss) * batch.len as f64;
        self.correct += batch.correct;
        self.count += batch.len;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn loss(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.loss_sum / self.count as f64) as f32
        }
    }

    pub fn accuracy(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.correct as f32 / self.count as f32
        }
    }
}
