//! Dense engine.
//!
//! `Mlp` owns the parameters of a stack of dense layers plus the per-layer dropout rates
//! and L2 factors of its definition. The output layer produces raw logits; softmax is
//! applied by [`Mlp::predict_into`] and fused into the loss gradient during training.
//!
//! Two layers of API, as elsewhere in the crate:
//! - per-sample `forward` / `forward_train` / `backward` panic on shape misuse;
//! - `predict_into` and the batched `forward_batch` are shape-checked or sized by the caller.

use rand::Rng;

use crate::loss::softmax_into;
use crate::matmul::gemm_abt_acc;
use crate::{Error, Layer, Result};

#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Layer>,
    /// Dropout rate applied to each layer's output during training (0 = none).
    dropout: Vec<f32>,
    /// L2 factor on each layer's weights (0 = none).
    l2: Vec<f32>,
}

/// Reusable buffers for `Mlp::forward` / `Mlp::forward_train`.
///
/// The output of the most recent forward pass lives inside `Scratch`.
#[derive(Debug, Clone)]
pub struct Scratch {
    /// Post-activation outputs, before dropout.
    layer_outputs: Vec<Vec<f32>>,
    /// Post-dropout outputs; only meaningful for layers with dropout after a training pass.
    dropped: Vec<Vec<f32>>,
    /// Dropout scale per unit: `0` or `1 / (1 - rate)`.
    masks: Vec<Vec<f32>>,
    training: bool,
}

/// Reusable row-major buffers for `Mlp::forward_batch`.
#[derive(Debug, Clone)]
pub struct BatchScratch {
    capacity: usize,
    layer_outputs: Vec<Vec<f32>>,
}

/// Parameter gradients for an `Mlp` (overwrite semantics).
///
/// Allocate once via `Mlp::gradients()` and reuse across training steps.
#[derive(Debug, Clone)]
pub struct Gradients {
    d_weights: Vec<Vec<f32>>,
    d_biases: Vec<Vec<f32>>,

    // Backprop intermediate: gradient w.r.t each layer output (post-dropout).
    d_layer_outputs: Vec<Vec<f32>>,

    d_input: Vec<f32>,
}

impl Mlp {
    /// Build from layers whose dimensions chain (`out_dim` of one is `in_dim` of the next).
    pub fn from_layers(layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::InvalidConfig(
                "mlp must have at least one layer".to_owned(),
            ));
        }
        for (i, w) in layers.windows(2).enumerate() {
            if w[0].out_dim() != w[1].in_dim() {
                return Err(Error::InvalidShape(format!(
                    "layer {} in_dim {} does not match previous out_dim {}",
                    i + 1,
                    w[1].in_dim(),
                    w[0].out_dim()
                )));
            }
        }
        let n = layers.len();
        Ok(Self {
            layers,
            dropout: vec![0.0; n],
            l2: vec![0.0; n],
        })
    }

    /// Set the dropout rate applied to the output of layer `idx` during training.
    pub fn set_dropout(&mut self, idx: usize, rate: f32) -> Result<()> {
        if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0,1), got {rate}"
            )));
        }
        if idx + 1 == self.layers.len() && rate > 0.0 {
            return Err(Error::InvalidConfig(
                "dropout cannot be applied to the output logits".to_owned(),
            ));
        }
        let len = self.layers.len();
        let slot = self.dropout.get_mut(idx).ok_or_else(|| {
            Error::InvalidConfig(format!("layer index {idx} out of range for {len} layers"))
        })?;
        *slot = rate;
        Ok(())
    }

    /// Set the L2 factor on the weights of layer `idx`.
    pub fn set_l2(&mut self, idx: usize, factor: f32) -> Result<()> {
        if !(factor.is_finite() && factor >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "l2 factor must be finite and >= 0, got {factor}"
            )));
        }
        let len = self.layers.len();
        let slot = self.l2.get_mut(idx).ok_or_else(|| {
            Error::InvalidConfig(format!("layer index {idx} out of range for {len} layers"))
        })?;
        *slot = factor;
        Ok(())
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.layers
            .first()
            .expect("mlp must have at least one layer")
            .in_dim()
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.layers
            .last()
            .expect("mlp must have at least one layer")
            .out_dim()
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Panics if `idx >= num_layers()`.
    #[inline]
    pub fn layer(&self, idx: usize) -> &Layer {
        &self.layers[idx]
    }

    /// Panics if `idx >= num_layers()`.
    #[inline]
    pub fn layer_mut(&mut self, idx: usize) -> &mut Layer {
        &mut self.layers[idx]
    }

    #[inline]
    pub fn dropout(&self, idx: usize) -> f32 {
        self.dropout[idx]
    }

    #[inline]
    pub fn l2(&self, idx: usize) -> f32 {
        self.l2[idx]
    }

    pub fn scratch(&self) -> Scratch {
        Scratch::new(self)
    }

    pub fn gradients(&self) -> Gradients {
        Gradients::new(self)
    }

    pub fn batch_scratch(&self, capacity: usize) -> BatchScratch {
        BatchScratch::new(self, capacity)
    }

    /// Convenience constructor: allocate all training buffers.
    #[inline]
    pub fn trainer(&self) -> Trainer {
        Trainer::new(self)
    }

    /// Inference forward pass for a single sample (dropout disabled).
    ///
    /// Writes intermediate activations into `scratch` and returns the output logits.
    ///
    /// Shape contract:
    /// - `input.len() == self.input_dim()`
    /// - `scratch` must be built for this `Mlp`
    pub fn forward<'a>(&self, input: &[f32], scratch: &'a mut Scratch) -> &'a [f32] {
        self.check_scratch(input, scratch);
        scratch.training = false;

        for idx in 0..self.layers.len() {
            let (left, right) = scratch.layer_outputs.split_at_mut(idx);
            let prev: &[f32] = if idx == 0 { input } else { &left[idx - 1] };
            self.layers[idx].forward(prev, &mut right[0]);
        }

        scratch.output()
    }

    /// Training forward pass: like `forward` but samples fresh dropout masks.
    pub fn forward_train<'a, R: Rng + ?Sized>(
        &self,
        input: &[f32],
        scratch: &'a mut Scratch,
        rng: &mut R,
    ) -> &'a [f32] {
        self.check_scratch(input, scratch);
        scratch.training = true;

        for idx in 0..self.layers.len() {
            {
                let (out_left, out_right) = scratch.layer_outputs.split_at_mut(idx);
                let prev: &[f32] = if idx == 0 {
                    input
                } else if self.dropout[idx - 1] > 0.0 {
                    &scratch.dropped[idx - 1]
                } else {
                    &out_left[idx - 1]
                };
                self.layers[idx].forward(prev, &mut out_right[0]);
            }

            let rate = self.dropout[idx];
            if rate > 0.0 {
                let keep_scale = 1.0 / (1.0 - rate);
                let mask = &mut scratch.masks[idx];
                let dropped = &mut scratch.dropped[idx];
                for ((m, d), &y) in mask
                    .iter_mut()
                    .zip(dropped.iter_mut())
                    .zip(&scratch.layer_outputs[idx])
                {
                    *m = if rng.r#gen::<f32>() < rate {
                        0.0
                    } else {
                        keep_scale
                    };
                    *d = y * *m;
                }
            }
        }

        scratch.output()
    }

    fn check_scratch(&self, input: &[f32], scratch: &Scratch) {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model input_dim {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            scratch.layer_outputs.len(),
            self.layers.len(),
            "scratch has {} layer outputs, model has {} layers",
            scratch.layer_outputs.len(),
            self.layers.len()
        );
        for (idx, (out, layer)) in scratch.layer_outputs.iter().zip(&self.layers).enumerate() {
            assert_eq!(
                out.len(),
                layer.out_dim(),
                "scratch layer {idx} output len {} does not match layer out_dim {}",
                out.len(),
                layer.out_dim()
            );
        }
    }

    /// Backward pass for a single sample, using the internal `d_output` buffer.
    ///
    /// You must call `forward` or `forward_train` first using the same `input` and
    /// `scratch`. Before calling this, write the upstream gradient `dL/d(logits)` into
    /// `grads.d_output_mut()`.
    ///
    /// Overwrite semantics: `grads` is overwritten with gradients for this sample.
    ///
    /// Returns dL/d(input).
    pub fn backward<'a>(
        &self,
        input: &[f32],
        scratch: &Scratch,
        grads: &'a mut Gradients,
    ) -> &'a [f32] {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model input_dim {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            grads.d_layer_outputs.len(),
            self.layers.len(),
            "grads has {} d_layer_outputs entries, model has {} layers",
            grads.d_layer_outputs.len(),
            self.layers.len()
        );
        assert_eq!(
            grads.d_input.len(),
            self.input_dim(),
            "grads d_input len {} does not match model input_dim {}",
            grads.d_input.len(),
            self.input_dim()
        );

        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];
            let masked = scratch.training && self.dropout[idx] > 0.0;

            // dL/d(dropped) -> dL/d(activation).
            if masked {
                for (d, &m) in grads.d_layer_outputs[idx]
                    .iter_mut()
                    .zip(&scratch.masks[idx])
                {
                    *d *= m;
                }
            }

            let layer_input: &[f32] = if idx == 0 {
                input
            } else if scratch.training && self.dropout[idx - 1] > 0.0 {
                &scratch.dropped[idx - 1]
            } else {
                &scratch.layer_outputs[idx - 1]
            };
            let layer_output: &[f32] = &scratch.layer_outputs[idx];

            if idx == 0 {
                layer.backward(
                    layer_input,
                    layer_output,
                    &grads.d_layer_outputs[0],
                    &mut grads.d_input,
                    &mut grads.d_weights[0],
                    &mut grads.d_biases[0],
                );
            } else {
                // `d_outputs` for the current layer (read-only) and `d_inputs` for the
                // current layer, which becomes `d_outputs` of the previous.
                let (left, right) = grads.d_layer_outputs.split_at_mut(idx);
                layer.backward(
                    layer_input,
                    layer_output,
                    &right[0],
                    &mut left[idx - 1],
                    &mut grads.d_weights[idx],
                    &mut grads.d_biases[idx],
                );
            }
        }

        &grads.d_input
    }

    /// Shape-safe inference: write the softmax distribution for `input` into `probs`.
    pub fn predict_into(&self, input: &[f32], scratch: &mut Scratch, probs: &mut [f32]) -> Result<()> {
        if input.len() != self.input_dim() {
            return Err(Error::InvalidShape(format!(
                "input len {} does not match model input_dim {}",
                input.len(),
                self.input_dim()
            )));
        }
        if probs.len() != self.output_dim() {
            return Err(Error::InvalidShape(format!(
                "output len {} does not match model output_dim {}",
                probs.len(),
                self.output_dim()
            )));
        }
        if scratch.layer_outputs.len() != self.layers.len() {
            return Err(Error::InvalidShape(
                "scratch was built for a different model".to_owned(),
            ));
        }
        let logits = self.forward(input, scratch);
        softmax_into(logits, probs);
        Ok(())
    }

    /// Batched inference over `rows` samples laid out row-major in `inputs`.
    ///
    /// Returns the `(rows, output_dim)` logits held in `scratch`.
    /// Panics if `rows` exceeds the scratch capacity or `inputs` has the wrong length.
    pub fn forward_batch<'a>(
        &self,
        inputs: &[f32],
        rows: usize,
        scratch: &'a mut BatchScratch,
    ) -> &'a [f32] {
        assert!(
            rows > 0 && rows <= scratch.capacity,
            "batch of {rows} rows does not fit scratch capacity {}",
            scratch.capacity
        );
        assert_eq!(
            inputs.len(),
            rows * self.input_dim(),
            "inputs len {} does not match rows * input_dim ({rows} * {})",
            inputs.len(),
            self.input_dim()
        );

        for idx in 0..self.layers.len() {
            let layer = &self.layers[idx];
            let (in_dim, out_dim) = (layer.in_dim(), layer.out_dim());
            let (left, right) = scratch.layer_outputs.split_at_mut(idx);
            let prev: &[f32] = if idx == 0 {
                inputs
            } else {
                &left[idx - 1][..rows * in_dim]
            };
            let out = &mut right[0][..rows * out_dim];

            for row in out.chunks_exact_mut(out_dim) {
                row.copy_from_slice(layer.biases());
            }
            gemm_abt_acc(rows, out_dim, in_dim, prev, layer.weights(), out);
            let act = layer.activation();
            for v in out.iter_mut() {
                *v = act.forward(*v);
            }
        }

        let out_dim = self.output_dim();
        &scratch
            .layer_outputs
            .last()
            .expect("scratch must have at least one layer output")[..rows * out_dim]
    }

    /// `sum_i l2_i * ||W_i||^2`.
    pub fn l2_penalty(&self) -> f32 {
        self.layers
            .iter()
            .zip(&self.l2)
            .filter(|(_, l2)| **l2 > 0.0)
            .map(|(layer, l2)| l2 * layer.weights().iter().map(|w| w * w).sum::<f32>())
            .sum()
    }

    /// Add the L2 penalty gradient `2 * l2 * W` to `grads`.
    pub fn add_l2_gradients(&self, grads: &mut Gradients) {
        for (idx, (layer, &l2)) in self.layers.iter().zip(&self.l2).enumerate() {
            if l2 > 0.0 {
                for (g, w) in grads.d_weights[idx].iter_mut().zip(layer.weights()) {
                    *g = (2.0 * l2).mul_add(*w, *g);
                }
            }
        }
    }

    /// Applies an SGD update to all layers.
    #[inline]
    pub fn sgd_step(&mut self, grads: &Gradients, lr: f32) {
        assert!(
            lr.is_finite() && lr > 0.0,
            "learning rate must be finite and > 0"
        );
        assert_eq!(
            self.layers.len(),
            grads.d_weights.len(),
            "grads has {} d_weights entries, model has {} layers",
            grads.d_weights.len(),
            self.layers.len()
        );

        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.sgd_step(&grads.d_weights[i], &grads.d_biases[i], lr);
        }
    }
}

/// Reusable buffers for training a specific `Mlp`.
///
/// `grads` receives each sample's gradients; `batch_grads` accumulates their mean.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub scratch: Scratch,
    pub grads: Gradients,
    pub batch_grads: Gradients,
}

impl Trainer {
    pub fn new(mlp: &Mlp) -> Self {
        Self {
            scratch: Scratch::new(mlp),
            grads: Gradients::new(mlp),
            batch_grads: Gradients::new(mlp),
        }
    }
}

impl Scratch {
    pub fn new(mlp: &Mlp) -> Self {
        let mut layer_outputs = Vec::with_capacity(mlp.layers.len());
        let mut dropped = Vec::with_capacity(mlp.layers.len());
        let mut masks = Vec::with_capacity(mlp.layers.len());
        for (layer, &rate) in mlp.layers.iter().zip(&mlp.dropout) {
            layer_outputs.push(vec![0.0; layer.out_dim()]);
            let n = if rate > 0.0 { layer.out_dim() } else { 0 };
            dropped.push(vec![0.0; n]);
            masks.push(vec![0.0; n]);
        }
        Self {
            layer_outputs,
            dropped,
            masks,
            training: false,
        }
    }

    #[inline]
    pub fn output(&self) -> &[f32] {
        self.layer_outputs
            .last()
            .expect("scratch must have at least one layer output")
            .as_slice()
    }
}

impl BatchScratch {
    pub fn new(mlp: &Mlp, capacity: usize) -> Self {
        let layer_outputs = mlp
            .layers
            .iter()
            .map(|l| vec![0.0; capacity * l.out_dim()])
            .collect();
        Self {
            capacity,
            layer_outputs,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Gradients {
    pub fn new(mlp: &Mlp) -> Self {
        let mut d_weights = Vec::with_capacity(mlp.layers.len());
        let mut d_biases = Vec::with_capacity(mlp.layers.len());
        let mut d_layer_outputs = Vec::with_capacity(mlp.layers.len());

        for layer in &mlp.layers {
            d_weights.push(vec![0.0; layer.in_dim() * layer.out_dim()]);
            d_biases.push(vec![0.0; layer.out_dim()]);
            d_layer_outputs.push(vec![0.0; layer.out_dim()]);
        }

        let d_input = vec![0.0; mlp.input_dim()];

        Self {
            d_weights,
            d_biases,
            d_layer_outputs,
            d_input,
        }
    }

    /// Mutable view of the upstream gradient buffer for the final model output.
    ///
    /// Typical training flow:
    /// - `mlp.forward_train(input, &mut scratch, &mut rng)`
    /// - loss writes `dL/d(logits)` into `grads.d_output_mut()`
    /// - `mlp.backward(input, &scratch, &mut grads)`
    #[inline]
    pub fn d_output_mut(&mut self) -> &mut [f32] {
        self.d_layer_outputs
            .last_mut()
            .expect("mlp must have at least one layer")
            .as_mut_slice()
    }

    /// Zero all parameter gradients.
    pub fn zero(&mut self) {
        for g in self.d_weights.iter_mut().chain(self.d_biases.iter_mut()) {
            g.fill(0.0);
        }
    }

    /// `self += other` over parameter gradients.
    pub fn accumulate(&mut self, other: &Gradients) {
        let pairs = self
            .d_weights
            .iter_mut()
            .chain(self.d_biases.iter_mut())
            .zip(other.d_weights.iter().chain(other.d_biases.iter()));
        for (dst, src) in pairs {
            debug_assert_eq!(dst.len(), src.len());
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
    }

    /// Multiply all parameter gradients by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for g in self.d_weights.iter_mut().chain(self.d_biases.iter_mut()) {
            for v in g.iter_mut() {
                *v *= factor;
            }
        }
    }

    #[inline]
    pub fn d_input(&self) -> &[f32] {
        &self.d_input
    }

    #[inline]
    pub fn d_weights(&self, layer_idx: usize) -> &[f32] {
        &self.d_weights[layer_idx]
    }

    #[inline]
    pub fn d_biases(&self, layer_idx: usize) -> &[f32] {
        &self.d_biases[layer_idx]
    }

    #[inline]
    pub fn d_weights_mut(&mut self, layer_idx: usize) -> &mut [f32] {
        &mut self.d_weights[layer_idx]
    }

    #[inline]
    pub fn d_biases_mut(&mut self, layer_idx: usize) -> &mut [f32] {
        &mut self.d_biases[layer_idx]
    }
}
