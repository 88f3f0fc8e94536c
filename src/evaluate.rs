//! Test-set evaluation and misclassification search.
//!
//! Both run the model in inference mode over fixed-size batches and never touch its
//! parameters.

use serde::Serialize;

use crate::metrics::{BatchStats, RunningStats, argmax};
use crate::network::{Classifier, Prediction};
use crate::{Dataset, Error, Result};

/// Samples per inference batch.
pub const EVAL_BATCH_SIZE: usize = 1024;

/// Mean loss and accuracy over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

/// Mean [`Classifier::loss`] and accuracy of `model` on `data`.
///
/// Per-batch means are combined weighted by batch size, so the result is the mean over
/// samples.
pub fn evaluate<M: Classifier + ?Sized>(model: &M, data: &Dataset) -> Result<Evaluation> {
    check_shapes(model, data)?;
    if data.is_empty() {
        return Err(Error::InvalidData(
            "cannot evaluate on an empty dataset".to_owned(),
        ));
    }

    let c = model.num_classes();
    let loss_fn = model.loss();
    let mut probs = vec![0.0_f32; EVAL_BATCH_SIZE.min(data.len()) * c];
    let mut running = RunningStats::new();

    let mut start = 0;
    while start < data.len() {
        let end = (start + EVAL_BATCH_SIZE).min(data.len());
        let rows = end - start;
        let probs = &mut probs[..rows * c];
        model.predict_batch(data.inputs().rows(start, end), probs);

        let mut loss_sum = 0.0_f64;
        let mut correct = 0;
        for (p, t) in probs
            .chunks_exact(c)
            .zip(data.target_rows(start, end).chunks_exact(c))
        {
            loss_sum += f64::from(loss_fn.forward(p, t));
            if argmax(p) == argmax(t) {
                correct += 1;
            }
        }
        running.update(&BatchStats {
            loss: (loss_sum / rows as f64) as f32,
            correct,
            len: rows,
        });
        start = end;
    }

    Ok(Evaluation {
        loss: running.loss(),
        accuracy: running.accuracy(),
    })
}

/// A sample whose predicted class differs from its label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Misclassification<'a> {
    /// Position in the evaluated dataset.
    pub index: usize,
    pub image: &'a [f32],
    pub true_label: usize,
    pub prediction: Prediction,
}

/// Lazily find up to `limit` misclassified samples, in dataset order.
///
/// Predictions are computed one batch at a time as the iterator advances. `limit == 0`
/// yields nothing and runs no inference.
pub fn find_misclassifications<'a, M: Classifier + ?Sized>(
    model: &'a M,
    data: &'a Dataset,
    limit: usize,
) -> Result<Misclassifications<'a, M>> {
    check_shapes(model, data)?;
    Ok(Misclassifications {
        model,
        data,
        remaining: limit,
        next_index: 0,
        batch_start: 0,
        batch_len: 0,
        probs: Vec::new(),
    })
}

/// Iterator returned by [`find_misclassifications`]. Single pass.
#[derive(Debug)]
pub struct Misclassifications<'a, M: ?Sized> {
    model: &'a M,
    data: &'a Dataset,
    remaining: usize,
    next_index: usize,
    batch_start: usize,
    batch_len: usize,
    probs: Vec<f32>,
}

impl<'a, M: Classifier + ?Sized> Misclassifications<'a, M> {
    fn load_batch(&mut self, start: usize) {
        let end = (start + EVAL_BATCH_SIZE).min(self.data.len());
        let c = self.model.num_classes();
        self.probs.resize((end - start) * c, 0.0);
        self.model
            .predict_batch(self.data.inputs().rows(start, end), &mut self.probs);
        self.batch_start = start;
        self.batch_len = end - start;
    }
}

impl<'a, M: Classifier + ?Sized> Iterator for Misclassifications<'a, M> {
    type Item = Misclassification<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let c = self.model.num_classes();
        while self.remaining > 0 && self.next_index < self.data.len() {
            if self.next_index >= self.batch_start + self.batch_len {
                self.load_batch(self.next_index);
            }
            let idx = self.next_index;
            self.next_index += 1;

            let offset = (idx - self.batch_start) * c;
            let probs = &self.probs[offset..offset + c];
            let true_label = self.data.label(idx);
            if argmax(probs) != true_label {
                self.remaining -= 1;
                return Some(Misclassification {
                    index: idx,
                    image: self.data.input(idx),
                    true_label,
                    prediction: Prediction::new(probs.to_vec()),
                });
            }
        }
        None
    }
}

fn check_shapes<M: Classifier + ?Sized>(model: &M, data: &Dataset) -> Result<()> {
    if data.input_dim() != model.input_dim() {
        return Err(Error::InvalidShape(format!(
            "dataset input_dim {} does not match model input_dim {}",
            data.input_dim(),
            model.input_dim()
        )));
    }
    if data.target_dim() != model.num_classes() {
        return Err(Error::InvalidShape(format!(
            "dataset target_dim {} does not match model num_classes {}",
            data.target_dim(),
            model.num_classes()
        )));
    }
    Ok(())
}
