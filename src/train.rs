//! Training loop driver.
//!
//! [`fit`] holds out a trailing validation split, runs shuffled mini-batch epochs through a
//! [`Trainable`] model and stops early once validation loss stops improving.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::early_stopping::{EarlyStopping, StoppingState};
use crate::evaluate::evaluate;
use crate::metrics::RunningStats;
use crate::network::Trainable;
use crate::{Dataset, Error, Result};

/// Per-epoch sample order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shuffle {
    /// Keep dataset order every epoch.
    None,
    /// Reshuffle every epoch from a seeded RNG.
    Seeded(u64),
    /// Reshuffle every epoch from an OS-seeded RNG.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub max_epochs: usize,
    pub batch_size: usize,
    /// Trailing fraction of the training data held out for validation.
    pub validation_split: f64,
    /// Consecutive non-improving epochs tolerated before stopping.
    pub patience: usize,
    /// Minimum decrease in validation loss that counts as an improvement.
    pub min_delta: f32,
    pub shuffle: Shuffle,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_epochs: 100,
            batch_size: 512,
            validation_split: 0.1,
            patience: 3,
            min_delta: 0.0,
            shuffle: Shuffle::Seeded(0),
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(Error::InvalidConfig("max_epochs must be > 0".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        if !(self.validation_split.is_finite()
            && self.validation_split > 0.0
            && self.validation_split < 1.0)
        {
            return Err(Error::InvalidConfig(format!(
                "validation_split must be in (0, 1), got {}",
                self.validation_split
            )));
        }
        if !(self.min_delta.is_finite() && self.min_delta >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "min_delta must be finite and >= 0, got {}",
                self.min_delta
            )));
        }
        Ok(())
    }
}

/// Metrics recorded after one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochRecord {
    /// 1-based.
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Validation loss stopped improving.
    EarlyStopping,
    /// `max_epochs` was reached.
    MaxEpochs,
}

/// Ordered epoch records plus why training ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    pub stop_reason: StopReason,
    /// 1-based epoch with the lowest validation loss.
    pub best_epoch: usize,
}

impl TrainingHistory {
    #[inline]
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }
}

/// Train `model` on `train` until early stopping or `cfg.max_epochs`.
///
/// The validation split is taken from the tail of `train` before any shuffling. `train`
/// itself is never modified; mini-batches are gathered into reusable buffers.
pub fn fit<M: Trainable + ?Sized>(
    model: &mut M,
    train: &Dataset,
    cfg: &FitConfig,
) -> Result<TrainingHistory> {
    if train.input_dim() != model.input_dim() {
        return Err(Error::InvalidShape(format!(
            "train input_dim {} does not match model input_dim {}",
            train.input_dim(),
            model.input_dim()
        )));
    }
    if train.target_dim() != model.num_classes() {
        return Err(Error::InvalidShape(format!(
            "train target_dim {} does not match model num_classes {}",
            train.target_dim(),
            model.num_classes()
        )));
    }
    cfg.validate()?;

    let (train_part, val) = train.split_tail(cfg.validation_split)?;
    log::debug!(
        "{} training samples, {} validation samples",
        train_part.len(),
        val.len()
    );

    let mut rng = match cfg.shuffle {
        Shuffle::None => None,
        Shuffle::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
        Shuffle::Random => Some(StdRng::from_entropy()),
    };

    let (d, c) = (train_part.input_dim(), train_part.target_dim());
    let batch_size = cfg.batch_size.min(train_part.len());
    let mut order: Vec<usize> = (0..train_part.len()).collect();
    let mut batch_inputs = vec![0.0_f32; batch_size * d];
    let mut batch_targets = vec![0.0_f32; batch_size * c];

    let mut stopper = EarlyStopping::new(cfg.patience, cfg.min_delta);
    let mut running = RunningStats::new();
    let mut epochs = Vec::new();
    let mut stop_reason = StopReason::MaxEpochs;

    for epoch in 1..=cfg.max_epochs {
        if let Some(rng) = rng.as_mut() {
            order.shuffle(rng);
        }

        running.clear();
        for chunk in order.chunks(batch_size) {
            let rows = chunk.len();
            train_part.gather(chunk, &mut batch_inputs, &mut batch_targets);
            let stats = model.train_batch(&batch_inputs[..rows * d], &batch_targets[..rows * c]);
            running.update(&stats);
        }

        let val_eval = evaluate(&*model, &val)?;
        let record = EpochRecord {
            epoch,
            train_loss: running.loss(),
            train_accuracy: running.accuracy(),
            val_loss: val_eval.loss,
            val_accuracy: val_eval.accuracy,
        };
        log::info!(
            "epoch {epoch}/{}: loss {:.4}, accuracy {:.4}, val_loss {:.4}, val_accuracy {:.4}",
            cfg.max_epochs,
            record.train_loss,
            record.train_accuracy,
            record.val_loss,
            record.val_accuracy
        );
        epochs.push(record);

        if stopper.observe(val_eval.loss) == StoppingState::Stopped {
            log::info!(
                "early stopping after epoch {epoch}: no improvement for {} epochs, best val_loss {:.4} at epoch {}",
                cfg.patience,
                stopper.best().unwrap_or(f32::NAN),
                stopper.best_epoch()
            );
            stop_reason = StopReason::EarlyStopping;
            break;
        }
    }

    Ok(TrainingHistory {
        epochs,
        stop_reason,
        best_epoch: stopper.best_epoch(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::metrics::BatchStats;
    use crate::network::Classifier;

    /// One input, two classes. Validation predictions put `exp(-loss)` on class 0 where
    /// `loss` is scripted per epoch; all samples are labelled 0.
    struct Scripted {
        val_losses: Vec<f32>,
        epochs_trained: usize,
        seen: Vec<Vec<f32>>,
    }

    impl Scripted {
        fn new(val_losses: &[f32]) -> Self {
            Self {
                val_losses: val_losses.to_vec(),
                epochs_trained: 0,
                seen: Vec::new(),
            }
        }
    }

    impl Classifier for Scripted {
        fn input_dim(&self) -> usize {
            1
        }

        fn num_classes(&self) -> usize {
            2
        }

        fn predict_batch(&self, inputs: &[f32], probs: &mut [f32]) {
            let idx = self.epochs_trained.saturating_sub(1).min(self.val_losses.len() - 1);
            let p = (-self.val_losses[idx]).exp();
            for row in probs.chunks_exact_mut(2).take(inputs.len()) {
                row[0] = p;
                row[1] = 1.0 - p;
            }
        }
    }

    impl Trainable for Scripted {
        fn train_batch(&mut self, inputs: &[f32], _targets: &[f32]) -> BatchStats {
            self.epochs_trained += 1;
            self.seen.push(inputs.to_vec());
            BatchStats {
                loss: 1.0,
                correct: inputs.len(),
                len: inputs.len(),
            }
        }
    }

    fn zeros_dataset(len: usize) -> Dataset {
        let inputs = (0..len).map(|i| i as f32).collect();
        Dataset::from_labels(inputs, 1, &vec![0; len], 2).unwrap()
    }

    fn run(val_losses: &[f32]) -> TrainingHistory {
        let mut model = Scripted::new(val_losses);
        fit(&mut model, &zeros_dataset(10), &FitConfig::default()).unwrap()
    }

    #[test]
    fn stops_three_epochs_after_the_minimum() {
        let history = run(&[0.9, 0.8, 0.85, 0.86, 0.87]);
        assert_eq!(history.len(), 5);
        assert_eq!(history.stop_reason, StopReason::EarlyStopping);
        assert_eq!(history.best_epoch, 2);
    }

    #[test]
    fn improvement_resets_the_strike_count() {
        let history = run(&[0.9, 0.8, 0.95, 0.7, 0.9, 0.95, 1.0]);
        assert_eq!(history.len(), 7);
        assert_eq!(history.stop_reason, StopReason::EarlyStopping);
        assert_eq!(history.best_epoch, 4);
        for (rec, want) in history.epochs.iter().zip([0.9, 0.8, 0.95, 0.7]) {
            assert!((rec.val_loss - want).abs() < 1e-5);
        }
    }

    #[test]
    fn runs_to_max_epochs_while_improving() {
        let mut model = Scripted::new(&[0.9, 0.8, 0.7, 0.6, 0.5, 0.4]);
        let cfg = FitConfig {
            max_epochs: 4,
            ..FitConfig::default()
        };
        let history = fit(&mut model, &zeros_dataset(10), &cfg).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history.stop_reason, StopReason::MaxEpochs);
        assert_eq!(history.epochs[3].epoch, 4);
    }

    #[test]
    fn holds_out_the_tail_and_reshuffles_each_epoch() {
        let mut model = Scripted::new(&[0.9, 0.8, 0.7]);
        let cfg = FitConfig {
            max_epochs: 3,
            ..FitConfig::default()
        };
        let data = zeros_dataset(20);
        fit(&mut model, &data, &cfg).unwrap();

        let expected: Vec<f32> = (0..18).map(|i| i as f32).collect();
        for epoch in &model.seen {
            let mut sorted = epoch.clone();
            sorted.sort_by(f32::total_cmp);
            assert_eq!(sorted, expected);
        }
        assert_ne!(model.seen[0], model.seen[1]);
        assert_eq!(data.input(19), &[19.0]);
    }

    #[test]
    fn unshuffled_batches_follow_dataset_order() {
        let mut model = Scripted::new(&[0.9, 0.8]);
        let cfg = FitConfig {
            max_epochs: 2,
            batch_size: 4,
            shuffle: Shuffle::None,
            ..FitConfig::default()
        };
        fit(&mut model, &zeros_dataset(10), &cfg).unwrap();
        assert_eq!(model.seen.len(), 6);
        assert_eq!(model.seen[0], vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(model.seen[2], vec![8.0]);
    }

    #[test]
    fn shape_mismatch_fails_before_training() {
        let mut model = Scripted::new(&[0.5]);
        let data = Dataset::from_labels(vec![0.0; 6], 2, &[0, 1, 2], 3).unwrap();
        assert!(matches!(
            fit(&mut model, &data, &FitConfig::default()),
            Err(Error::InvalidShape(_))
        ));
        assert_eq!(model.epochs_trained, 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut model = Scripted::new(&[0.5]);
        let data = zeros_dataset(10);
        for cfg in [
            FitConfig {
                max_epochs: 0,
                ..FitConfig::default()
            },
            FitConfig {
                batch_size: 0,
                ..FitConfig::default()
            },
            FitConfig {
                validation_split: 1.0,
                ..FitConfig::default()
            },
        ] {
            assert!(matches!(
                fit(&mut model, &data, &cfg),
                Err(Error::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn fit_config_fills_missing_fields_from_defaults() {
        let cfg: FitConfig = serde_json::from_str(r#"{"max_epochs": 5, "shuffle": "none"}"#).unwrap();
        assert_eq!(cfg.max_epochs, 5);
        assert_eq!(cfg.batch_size, 512);
        assert_eq!(cfg.shuffle, Shuffle::None);

        let seeded: FitConfig = serde_json::from_str(r#"{"shuffle": {"seeded": 7}}"#).unwrap();
        assert_eq!(seeded.shuffle, Shuffle::Seeded(7));
    }
}
