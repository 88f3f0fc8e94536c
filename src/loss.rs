//! Loss functions.
//!
//! These are small, allocation-free helpers intended to be used like:
//!
//! - run `model.forward(...)` to get output logits
//! - compute `d_logits` via `softmax_cross_entropy_backward`
//! - run `model.backward(...)`
//! - update parameters with an optimizer
//!
//! Losses are per-sample sums over classes; batch reduction is the caller's job.

use serde::{Deserialize, Serialize};

/// Probabilities are clamped to at least this value before taking the log.
pub const PROB_EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Supported loss functions.
pub enum Loss {
    /// `-sum_i t_i * ln(p_i)` over a probability distribution and a one-hot target.
    #[default]
    CategoricalCrossEntropy,
}

impl Loss {
    /// Loss of a probability distribution against its target.
    #[inline]
    pub fn forward(self, probs: &[f32], target: &[f32]) -> f32 {
        match self {
            Loss::CategoricalCrossEntropy => categorical_cross_entropy(probs, target),
        }
    }

    /// Name used in model summaries.
    pub fn name(self) -> &'static str {
        match self {
            Loss::CategoricalCrossEntropy => "categorical_crossentropy",
        }
    }
}

/// Categorical cross-entropy of a probability distribution.
///
/// A perfect prediction (`p_i == 1` where `t_i == 1`) has loss exactly `0.0`.
#[inline]
pub fn categorical_cross_entropy(probs: &[f32], target: &[f32]) -> f32 {
    assert_eq!(
        probs.len(),
        target.len(),
        "pred len {} does not match target len {}",
        probs.len(),
        target.len()
    );

    let mut loss = 0.0_f32;
    for (&p, &t) in probs.iter().zip(target) {
        if t != 0.0 {
            loss -= t * p.max(PROB_EPSILON).ln();
        }
    }
    loss
}

/// Writes `softmax(logits)` into `out`.
#[inline]
pub fn softmax_into(logits: &[f32], out: &mut [f32]) {
    assert_eq!(
        logits.len(),
        out.len(),
        "logits len {} does not match out len {}",
        logits.len(),
        out.len()
    );
    assert!(!logits.is_empty(), "softmax requires at least 1 class");

    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum_exp = 0.0_f32;
    for (o, &x) in out.iter_mut().zip(logits) {
        *o = (x - max_logit).exp();
        sum_exp += *o;
    }
    let inv_sum = 1.0 / sum_exp;
    for o in out.iter_mut() {
        *o *= inv_sum;
    }
}

/// Softmax cross-entropy + gradient w.r.t logits.
///
/// Writes `d_logits = softmax(logits) - target` and returns the loss.
///
/// This function is allocation-free: it computes softmax into `d_logits` and then
/// turns it into a gradient in place.
#[inline]
pub fn softmax_cross_entropy_backward(logits: &[f32], target: &[f32], d_logits: &mut [f32]) -> f32 {
    assert_eq!(
        logits.len(),
        target.len(),
        "pred len {} does not match target len {}",
        logits.len(),
        target.len()
    );

    softmax_into(logits, d_logits);
    let loss = categorical_cross_entropy(d_logits, target);

    for (d, &t) in d_logits.iter_mut().zip(target) {
        *d -= t;
    }

    loss
}
