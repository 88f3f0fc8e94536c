//! The seam between definitions and the engine that trains them.
//!
//! [`fit`](crate::train::fit) and the evaluator only talk to [`Classifier`] / [`Trainable`].
//! [`compile`] binds a [`ModelDef`] to the built-in dense engine.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::loss::{Loss, softmax_cross_entropy_backward, softmax_into};
use crate::metrics::{BatchStats, argmax};
use crate::{
    Activation, Error, Init, Layer, LayerDef, ModelDef, Mlp, OptimizerState, Result, Trainer,
};

/// Inference-only view of a compiled model.
pub trait Classifier {
    /// Scalars per input sample.
    fn input_dim(&self) -> usize;

    /// Width of the output distribution.
    fn num_classes(&self) -> usize;

    /// Loss reported by evaluation.
    fn loss(&self) -> Loss {
        Loss::default()
    }

    /// Write one class distribution per row of `inputs` into `probs`.
    ///
    /// `inputs` is `(rows, input_dim)` row-major and `probs` is `(rows, num_classes)`.
    /// Panics if the two buffers disagree on `rows`.
    fn predict_batch(&self, inputs: &[f32], probs: &mut [f32]);
}

/// A classifier whose parameters can be updated.
pub trait Trainable: Classifier {
    /// One optimizer step on a mini-batch of one-hot `targets`.
    ///
    /// Returns the mean training loss and correct count measured during the step.
    fn train_batch(&mut self, inputs: &[f32], targets: &[f32]) -> BatchStats;
}

/// One class distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Prediction(Vec<f32>);

impl Prediction {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self(probabilities)
    }

    #[inline]
    pub fn probabilities(&self) -> &[f32] {
        &self.0
    }

    /// Argmax, lowest index on ties.
    #[inline]
    pub fn predicted_class(&self) -> usize {
        argmax(&self.0)
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

/// A definition bound to the dense engine, with its optimizer state and training buffers.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    def: ModelDef,
    mlp: Mlp,
    optimizer: OptimizerState,
    trainer: Trainer,
    rng: StdRng,
}

/// Validate `def` and bind it to freshly initialized dense parameters.
///
/// `seed` drives both weight init and dropout masks.
pub fn compile(def: &ModelDef, seed: u64) -> Result<CompiledModel> {
    def.shapes()?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut layers = Vec::new();
    let mut l2 = Vec::new();
    let mut dropout = Vec::new();
    let mut in_dim = def.input_shape.size();

    for (idx, layer) in def.layers.iter().enumerate() {
        match *layer {
            LayerDef::Flatten => {}
            LayerDef::Dense {
                units,
                activation,
                l2: factor,
            } => {
                let init = match activation {
                    Activation::ReLU | Activation::LeakyReLU { .. } => Init::He,
                    _ => Init::Xavier,
                };
                layers.push(Layer::new_with_rng(in_dim, units, init, activation, &mut rng)?);
                l2.push(factor.unwrap_or(0.0));
                dropout.push(0.0);
                in_dim = units;
            }
            LayerDef::Dropout { rate } => match dropout.last_mut() {
                // Stacked dropouts compose as the product of their keep probabilities.
                Some(slot) if *slot == 0.0 => *slot = rate,
                Some(slot) => *slot = 1.0 - (1.0 - *slot) * (1.0 - rate),
                None => {
                    return Err(Error::Unsupported(format!(
                        "layer {idx}: dropout before the first dense layer is not supported by the dense engine"
                    )));
                }
            },
            LayerDef::Conv2d { .. } | LayerDef::MaxPool2d { .. } | LayerDef::BatchNorm => {
                return Err(Error::Unsupported(format!(
                    "layer {idx} ({}) is not supported by the dense engine",
                    layer.name()
                )));
            }
        }
    }

    let mut mlp = Mlp::from_layers(layers)?;
    for (idx, (&rate, &factor)) in dropout.iter().zip(&l2).enumerate() {
        mlp.set_dropout(idx, rate)?;
        mlp.set_l2(idx, factor)?;
    }
    let optimizer = def.optimizer.state(&mlp)?;
    let trainer = mlp.trainer();

    log::debug!(
        "compiled {}: {} dense layers, {} -> {}, optimizer {}",
        def.name,
        mlp.num_layers(),
        mlp.input_dim(),
        mlp.output_dim(),
        def.optimizer.name()
    );

    Ok(CompiledModel {
        def: def.clone(),
        mlp,
        optimizer,
        trainer,
        rng,
    })
}

impl CompiledModel {
    /// Rebind previously trained parameters to `def`.
    ///
    /// The layer dimensions of `mlp` must match what `compile(def, _)` would build.
    pub fn from_parts(def: &ModelDef, mlp: Mlp, seed: u64) -> Result<Self> {
        let mut fresh = compile(def, seed)?;
        if fresh.mlp.num_layers() != mlp.num_layers() {
            return Err(Error::InvalidShape(format!(
                "model {} has {} dense layers, parameters have {}",
                def.name,
                fresh.mlp.num_layers(),
                mlp.num_layers()
            )));
        }
        for idx in 0..mlp.num_layers() {
            let (want, got) = (fresh.mlp.layer(idx), mlp.layer(idx));
            if (want.in_dim(), want.out_dim()) != (got.in_dim(), got.out_dim())
                || want.activation() != got.activation()
            {
                return Err(Error::InvalidShape(format!(
                    "dense layer {idx} of {} is {}x{} {}, parameters are {}x{} {}",
                    def.name,
                    want.in_dim(),
                    want.out_dim(),
                    want.activation().name(),
                    got.in_dim(),
                    got.out_dim(),
                    got.activation().name()
                )));
            }
        }
        let mut mlp = mlp;
        for idx in 0..mlp.num_layers() {
            mlp.set_dropout(idx, fresh.mlp.dropout(idx))?;
            mlp.set_l2(idx, fresh.mlp.l2(idx))?;
        }
        fresh.optimizer = def.optimizer.state(&mlp)?;
        fresh.trainer = mlp.trainer();
        fresh.mlp = mlp;
        Ok(fresh)
    }

    #[inline]
    pub fn def(&self) -> &ModelDef {
        &self.def
    }

    #[inline]
    pub fn mlp(&self) -> &Mlp {
        &self.mlp
    }

    /// Distribution for a single sample.
    pub fn predict(&self, input: &[f32]) -> Result<Prediction> {
        let mut scratch = self.mlp.scratch();
        let mut probs = vec![0.0; self.mlp.output_dim()];
        self.mlp.predict_into(input, &mut scratch, &mut probs)?;
        Ok(Prediction::new(probs))
    }
}

impl Classifier for CompiledModel {
    fn input_dim(&self) -> usize {
        self.mlp.input_dim()
    }

    fn num_classes(&self) -> usize {
        self.mlp.output_dim()
    }

    fn loss(&self) -> Loss {
        self.def.loss
    }

    fn predict_batch(&self, inputs: &[f32], probs: &mut [f32]) {
        let (d, c) = (self.mlp.input_dim(), self.mlp.output_dim());
        assert_eq!(inputs.len() % d, 0, "inputs len is not a multiple of input_dim");
        let rows = inputs.len() / d;
        assert_eq!(
            probs.len(),
            rows * c,
            "probs len {} does not match {rows} rows of {c}",
            probs.len()
        );
        if rows == 0 {
            return;
        }

        let mut scratch = self.mlp.batch_scratch(rows);
        let logits = self.mlp.forward_batch(inputs, rows, &mut scratch);
        for (l, p) in logits.chunks_exact(c).zip(probs.chunks_exact_mut(c)) {
            softmax_into(l, p);
        }
    }
}

impl Trainable for CompiledModel {
    fn train_batch(&mut self, inputs: &[f32], targets: &[f32]) -> BatchStats {
        let (d, c) = (self.mlp.input_dim(), self.mlp.output_dim());
        let rows = targets.len() / c;
        assert!(rows > 0, "empty batch");
        assert_eq!(targets.len(), rows * c, "targets len is not a multiple of num_classes");
        assert_eq!(inputs.len(), rows * d, "inputs and targets disagree on batch size");

        let trainer = &mut self.trainer;
        trainer.batch_grads.zero();

        let mut loss_sum = 0.0_f64;
        let mut correct = 0;
        for (x, t) in inputs.chunks_exact(d).zip(targets.chunks_exact(c)) {
            let logits = self.mlp.forward_train(x, &mut trainer.scratch, &mut self.rng);
            if argmax(logits) == argmax(t) {
                correct += 1;
            }
            let loss = match self.def.loss {
                Loss::CategoricalCrossEntropy => {
                    softmax_cross_entropy_backward(logits, t, trainer.grads.d_output_mut())
                }
            };
            loss_sum += f64::from(loss);

            self.mlp.backward(x, &trainer.scratch, &mut trainer.grads);
            trainer.batch_grads.accumulate(&trainer.grads);
        }

        trainer.batch_grads.scale(1.0 / rows as f32);
        self.mlp.add_l2_gradients(&mut trainer.batch_grads);
        let penalty = self.mlp.l2_penalty();

        self.optimizer.step(&mut self.mlp, &mut trainer.batch_grads);

        BatchStats {
            loss: (loss_sum / rows as f64) as f32 + penalty,
            correct,
            len: rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{Optimizer, Padding, Shape};

    fn tiny_def(layers: Vec<LayerDef>) -> ModelDef {
        ModelDef {
            name: "tiny".to_owned(),
            input_shape: Shape::Image {
                height: 2,
                width: 2,
                channels: 1,
            },
            layers,
            loss: Default::default(),
            optimizer: Optimizer::Sgd { lr: 0.5 },
        }
    }

    #[test]
    fn compile_maps_dense_and_dropout() {
        let def = tiny_def(vec![
            LayerDef::Flatten,
            LayerDef::Dense {
                units: 8,
                activation: Activation::ReLU,
                l2: Some(1e-3),
            },
            LayerDef::Dropout { rate: 0.25 },
            LayerDef::dense(3, Activation::Softmax),
        ]);
        let model = compile(&def, 0).unwrap();
        assert_eq!(model.mlp().num_layers(), 2);
        assert_eq!(model.input_dim(), 4);
        assert_eq!(model.num_classes(), 3);
        assert_eq!(model.mlp().dropout(0), 0.25);
        assert_eq!(model.mlp().l2(0), 1e-3);
        assert_eq!(model.mlp().l2(1), 0.0);
        assert_eq!(Classifier::loss(&model), def.loss);
    }

    #[test]
    fn single_dropout_keeps_its_configured_rate() {
        let model = compile(&crate::zoo::dense_regularized(), 0).unwrap();
        assert_eq!(model.mlp().dropout(0), 0.2);
        assert_eq!(model.mlp().dropout(1), 0.2);
        assert_eq!(model.mlp().dropout(2), 0.0);
    }

    #[test]
    fn stacked_dropouts_compose() {
        let def = tiny_def(vec![
            LayerDef::Flatten,
            LayerDef::dense(8, Activation::ReLU),
            LayerDef::Dropout { rate: 0.5 },
            LayerDef::Dropout { rate: 0.5 },
            LayerDef::dense(3, Activation::Softmax),
        ]);
        let model = compile(&def, 0).unwrap();
        assert_eq!(model.mlp().dropout(0), 0.75);
    }

    #[test]
    fn convolutional_layers_are_unsupported() {
        let mut def = tiny_def(vec![
            LayerDef::conv(4, 2, Padding::Valid),
            LayerDef::Flatten,
            LayerDef::dense(3, Activation::Softmax),
        ]);
        assert!(matches!(compile(&def, 0), Err(Error::Unsupported(_))));

        def.layers = vec![
            LayerDef::Flatten,
            LayerDef::dense(4, Activation::ReLU),
            LayerDef::BatchNorm,
            LayerDef::dense(3, Activation::Softmax),
        ];
        assert!(matches!(compile(&def, 0), Err(Error::Unsupported(_))));
    }

    #[test]
    fn compile_is_deterministic_per_seed() {
        let def = tiny_def(vec![LayerDef::Flatten, LayerDef::dense(3, Activation::Softmax)]);
        let a = compile(&def, 7).unwrap();
        let b = compile(&def, 7).unwrap();
        let c = compile(&def, 8).unwrap();
        assert_eq!(a.mlp().layer(0).weights(), b.mlp().layer(0).weights());
        assert_ne!(a.mlp().layer(0).weights(), c.mlp().layer(0).weights());
    }

    #[test]
    fn predict_batch_rows_are_distributions() {
        let def = tiny_def(vec![
            LayerDef::Flatten,
            LayerDef::dense(5, Activation::Tanh),
            LayerDef::dense(3, Activation::Softmax),
        ]);
        let model = compile(&def, 1).unwrap();
        let inputs = [0.0, 0.5, 1.0, 0.25, 1.0, 1.0, 0.0, 0.0];
        let mut probs = [0.0_f32; 6];
        model.predict_batch(&inputs, &mut probs);
        for row in probs.chunks_exact(3) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }

        let single = model.predict(&inputs[4..]).unwrap();
        for (a, b) in single.probabilities().iter().zip(&probs[3..]) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn train_batch_reduces_loss_on_a_repeated_batch() {
        let def = tiny_def(vec![
            LayerDef::Flatten,
            LayerDef::dense(8, Activation::Tanh),
            LayerDef::dense(2, Activation::Softmax),
        ]);
        let mut model = compile(&def, 3).unwrap();
        let inputs = [1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0];
        let targets = [1.0, 0.0, 0.0, 1.0];

        let first = model.train_batch(&inputs, &targets);
        let mut last = first;
        for _ in 0..50 {
            last = model.train_batch(&inputs, &targets);
        }
        assert_eq!(first.len, 2);
        assert!(last.loss < first.loss, "{} !< {}", last.loss, first.loss);
        assert_eq!(last.correct, 2);
    }

    #[test]
    fn from_parts_rejects_mismatched_parameters() {
        let def = tiny_def(vec![LayerDef::Flatten, LayerDef::dense(3, Activation::Softmax)]);
        let other = tiny_def(vec![LayerDef::Flatten, LayerDef::dense(2, Activation::Softmax)]);
        let params = compile(&other, 0).unwrap().mlp().clone();
        assert!(matches!(
            CompiledModel::from_parts(&def, params, 0),
            Err(Error::InvalidShape(_))
        ));

        let same = compile(&def, 5).unwrap().mlp().clone();
        let rebound = CompiledModel::from_parts(&def, same.clone(), 0).unwrap();
        assert_eq!(rebound.mlp().layer(0).weights(), same.layer(0).weights());
    }
}
