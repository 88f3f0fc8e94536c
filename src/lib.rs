//! Train and compare MNIST classifier definitions.
//!
//! `mnist-zoo` keeps model *definitions* ([`ModelDef`]) separate from the engine that runs
//! them. A definition is plain serializable data; [`compile`] binds it to a dense engine
//! with its own parameters, optimizer state and reusable buffers. The training driver
//! ([`fit`]) and the evaluator ([`evaluate()`], [`find_misclassifications`]) only see the
//! [`Classifier`] / [`Trainable`] traits.
//!
//! # Panics vs `Result`
//!
//! Two layers of API, as in any hot-loop numeric code:
//!
//! - Low-level hot path (panics on misuse):
//!   - [`mlp::Mlp::forward`], [`mlp::Mlp::forward_train`], [`mlp::Mlp::backward`]
//!   - [`mlp::Mlp::forward_batch`], [`Classifier::predict_batch`],
//!     [`Trainable::train_batch`]
//!
//!   Shape mismatches are programmer error and panic via `assert!`.
//!
//! - High-level APIs (shape-checked): [`fit`], [`evaluate()`], [`find_misclassifications`],
//!   [`compile`], [`mlp::Mlp::predict_into`]. These validate inputs and return [`Result`].
//!
//! # Data layout
//!
//! - Scalars are `f32`; images are normalized to `[0, 1]` and flattened row-major.
//! - [`Dataset`] stores inputs and one-hot targets contiguously.
//! - Layer weights are row-major with shape `(out_dim, in_dim)`.
//!
//! # Engine coverage
//!
//! The built-in engine runs dense stacks: `flatten`, `dense` (with optional L2) and
//! `dropout`. Convolution, pooling and batch normalization are valid in definitions (shape
//! inference, parameter counts, summaries) but compiling them returns
//! [`Error::Unsupported`].
//!
//! # Quick start
//!
//! ```rust
//! use mnist_zoo::{Dataset, FitConfig, Shuffle, compile, evaluate, fit, zoo};
//!
//! # fn main() -> mnist_zoo::Result<()> {
//! // Two tiny fake "images": all-dark is class 0, all-bright is class 1.
//! let mut pixels = Vec::new();
//! let mut labels = Vec::new();
//! for i in 0..20 {
//!     let label = (i % 2) as u8;
//!     pixels.extend(std::iter::repeat(f32::from(label)).take(28 * 28));
//!     labels.push(label);
//! }
//! let data = Dataset::from_labels(pixels, 28 * 28, &labels, 10)?;
//!
//! let mut model = compile(&zoo::dense_simple(), 0)?;
//! let cfg = FitConfig {
//!     max_epochs: 3,
//!     batch_size: 8,
//!     validation_split: 0.2,
//!     shuffle: Shuffle::Seeded(0),
//!     ..FitConfig::default()
//! };
//! let history = fit(&mut model, &data, &cfg)?;
//! assert!(!history.is_empty());
//!
//! let eval = evaluate(&model, &data)?;
//! assert!(eval.accuracy >= 0.0 && eval.accuracy <= 1.0);
//! # Ok(())
//! # }
//! ```
//!
//! # MSRV
//!
//! The minimum supported Rust version is specified in `Cargo.toml`.

pub mod activation;
pub mod config;
pub mod data;
pub mod early_stopping;
pub mod error;
pub mod evaluate;
pub mod layer;
pub mod loss;
pub(crate) mod matmul;
pub mod metrics;
pub mod mlp;
pub mod mnist;
pub mod model;
pub mod network;
pub mod optim;
pub mod serde_model;
pub mod train;
pub mod zoo;

pub use activation::Activation;
pub use config::ExperimentConfig;
pub use data::{Dataset, Inputs};
pub use early_stopping::{EarlyStopping, StoppingState};
pub use error::{Error, Result};
pub use evaluate::{Evaluation, Misclassification, Misclassifications, evaluate, find_misclassifications};
pub use layer::{Init, Layer};
pub use loss::Loss;
pub use metrics::BatchStats;
pub use mlp::{BatchScratch, Gradients, Mlp, Scratch, Trainer};
pub use model::{LayerDef, ModelDef, Padding, Shape};
pub use network::{Classifier, CompiledModel, Prediction, Trainable, compile};
pub use optim::{Optimizer, OptimizerState};
pub use serde_model::SavedModel;
pub use train::{EpochRecord, FitConfig, Shuffle, StopReason, TrainingHistory, fit};
