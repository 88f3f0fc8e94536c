//! Trained-model persistence.
//!
//! A [`SavedModel`] is a versioned JSON document holding the model definition next to the
//! dense parameters. Internal `Mlp`/`Layer` structs are not serialized directly so the file
//! format can stay stable if their representation changes.
//!
//! Loading validates dimensions, parameter lengths and finiteness, then rebinds the
//! parameters to the definition with [`CompiledModel::from_parts`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::network::CompiledModel;
use crate::{Activation, Error, Layer, Mlp, ModelDef, Result};

pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModel {
    pub format_version: u32,
    pub model: ModelDef,
    pub layers: Vec<SavedLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedLayer {
    pub in_dim: usize,
    pub out_dim: usize,
    pub activation: Activation,
    /// Row-major (out_dim, in_dim).
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

impl SavedModel {
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported model format_version {}; expected {}",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if self.layers.is_empty() {
            return Err(Error::InvalidData(
                "saved model must have at least one layer".to_owned(),
            ));
        }

        for (i, layer) in self.layers.iter().enumerate() {
            layer
                .validate()
                .map_err(|e| Error::InvalidData(format!("layer {i}: {e}")))?;
            if i > 0 && layer.in_dim != self.layers[i - 1].out_dim {
                return Err(Error::InvalidData(format!(
                    "layer {i} in_dim {} does not match previous out_dim {}",
                    layer.in_dim,
                    self.layers[i - 1].out_dim
                )));
            }
        }
        Ok(())
    }

    /// Rebuild the compiled model. `seed` only drives future dropout masks.
    pub fn into_compiled(self, seed: u64) -> Result<CompiledModel> {
        self.validate()?;
        let layers = self
            .layers
            .into_iter()
            .enumerate()
            .map(|(i, l)| {
                Layer::from_parts(l.in_dim, l.out_dim, l.activation, l.weights, l.biases)
                    .map_err(|e| Error::InvalidData(format!("layer {i} invalid: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        CompiledModel::from_parts(&self.model, Mlp::from_layers(layers)?, seed)
    }
}

impl SavedLayer {
    fn validate(&self) -> Result<()> {
        if self.in_dim == 0 || self.out_dim == 0 {
            return Err(Error::InvalidData(format!(
                "layer dims must be > 0, got in_dim={} out_dim={}",
                self.in_dim, self.out_dim
            )));
        }
        let expected_w = self
            .in_dim
            .checked_mul(self.out_dim)
            .ok_or_else(|| Error::InvalidData("layer weight shape overflow".to_owned()))?;
        if self.weights.len() != expected_w {
            return Err(Error::InvalidData(format!(
                "weights length {} does not match out_dim * in_dim ({} * {})",
                self.weights.len(),
                self.out_dim,
                self.in_dim
            )));
        }
        if self.biases.len() != self.out_dim {
            return Err(Error::InvalidData(format!(
                "biases length {} does not match out_dim {}",
                self.biases.len(),
                self.out_dim
            )));
        }
        self.activation.validate()
    }
}

impl From<&CompiledModel> for SavedModel {
    fn from(model: &CompiledModel) -> Self {
        let mlp = model.mlp();
        let layers = (0..mlp.num_layers())
            .map(|i| SavedLayer::from(mlp.layer(i)))
            .collect();
        Self {
            format_version: MODEL_FORMAT_VERSION,
            model: model.def().clone(),
            layers,
        }
    }
}

impl From<&Layer> for SavedLayer {
    fn from(layer: &Layer) -> Self {
        Self {
            in_dim: layer.in_dim(),
            out_dim: layer.out_dim(),
            activation: layer.activation(),
            weights: layer.weights().to_vec(),
            biases: layer.biases().to_vec(),
        }
    }
}

impl CompiledModel {
    /// Serialize definition and parameters to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(&SavedModel::from(self))
            .map_err(|e| Error::InvalidData(format!("failed to serialize model: {e}")))
    }

    /// Parse a saved model from a JSON string.
    pub fn from_json_str(s: &str, seed: u64) -> Result<Self> {
        let saved: SavedModel = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse model json: {e}")))?;
        saved.into_compiled(seed)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        std::fs::write(p, s).map_err(|e| Error::io(p, e))
    }

    pub fn load_json<P: AsRef<Path>>(path: P, seed: u64) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        Self::from_json_str(&s, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::network::{Classifier, compile};
    use crate::{LayerDef, Shape};

    fn small_def() -> ModelDef {
        ModelDef {
            name: "small".to_owned(),
            input_shape: Shape::Flat(3),
            layers: vec![
                LayerDef::Dense {
                    units: 4,
                    activation: Activation::ReLU,
                    l2: Some(1e-4),
                },
                LayerDef::Dropout { rate: 0.2 },
                LayerDef::dense(2, Activation::Softmax),
            ],
            loss: Default::default(),
            optimizer: Default::default(),
        }
    }

    #[test]
    fn saved_file_roundtrips_parameters_and_definition() {
        let model = compile(&small_def(), 11).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save_json(&path).unwrap();

        let loaded = CompiledModel::load_json(&path, 0).unwrap();
        assert_eq!(loaded.def(), model.def());
        assert_eq!(loaded.mlp().dropout(0), 0.2);
        for i in 0..2 {
            assert_eq!(loaded.mlp().layer(i).weights(), model.mlp().layer(i).weights());
            assert_eq!(loaded.mlp().layer(i).biases(), model.mlp().layer(i).biases());
        }

        let x = [0.2_f32, 0.4, 0.9];
        let (mut a, mut b) = ([0.0_f32; 2], [0.0_f32; 2]);
        model.predict_batch(&x, &mut a);
        loaded.predict_batch(&x, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut saved = SavedModel::from(&compile(&small_def(), 0).unwrap());
        saved.format_version = 999;
        let json = serde_json::to_string(&saved).unwrap();
        let err = CompiledModel::from_json_str(&json, 0).unwrap_err();
        assert!(format!("{err}").contains("format_version"));
    }

    #[test]
    fn rejects_truncated_weights() {
        let mut saved = SavedModel::from(&compile(&small_def(), 0).unwrap());
        saved.layers[1].weights.pop();
        assert!(matches!(saved.into_compiled(0), Err(Error::InvalidData(_))));
    }

    #[test]
    fn rejects_parameters_for_a_different_definition() {
        let mut saved = SavedModel::from(&compile(&small_def(), 0).unwrap());
        saved.model.layers[0] = LayerDef::dense(4, Activation::Tanh);
        assert!(matches!(saved.into_compiled(0), Err(Error::InvalidShape(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CompiledModel::load_json(dir.path().join("nope.json"), 0),
            Err(Error::Io { .. })
        ));
    }
}
