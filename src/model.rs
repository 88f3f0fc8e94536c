//! Declarative model definitions.
//!
//! A [`ModelDef`] is plain, serializable configuration: an input shape, an ordered layer
//! stack, a loss and an optimizer. It carries no parameters. Use
//! [`crate::network::compile`] to bind it to an engine.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{Activation, Error, Loss, Optimizer, Result};

/// Shape of one sample (batch axis excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Image {
        height: usize,
        width: usize,
        channels: usize,
    },
    Flat(usize),
}

impl Shape {
    /// Number of scalars per sample.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            Shape::Image {
                height,
                width,
                channels,
            } => height * width * channels,
            Shape::Flat(n) => n,
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::Image {
                height,
                width,
                channels,
            } => write!(f, "({height}, {width}, {channels})"),
            Shape::Flat(n) => write!(f, "({n},)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// No padding: output shrinks by `kernel - 1`.
    #[default]
    Valid,
    /// Zero padding that preserves the spatial size.
    Same,
}

/// One layer of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerDef {
    Flatten,
    Dense {
        units: usize,
        activation: Activation,
        /// L2 penalty factor on the kernel weights.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        l2: Option<f32>,
    },
    Conv2d {
        filters: usize,
        kernel: usize,
        activation: Activation,
        #[serde(default)]
        padding: Padding,
    },
    MaxPool2d {
        pool: usize,
    },
    BatchNorm,
    Dropout {
        rate: f32,
    },
}

impl LayerDef {
    pub fn dense(units: usize, activation: Activation) -> Self {
        LayerDef::Dense {
            units,
            activation,
            l2: None,
        }
    }

    pub fn conv(filters: usize, kernel: usize, padding: Padding) -> Self {
        LayerDef::Conv2d {
            filters,
            kernel,
            activation: Activation::ReLU,
            padding,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayerDef::Flatten => "flatten",
            LayerDef::Dense { .. } => "dense",
            LayerDef::Conv2d { .. } => "conv2d",
            LayerDef::MaxPool2d { .. } => "max_pooling2d",
            LayerDef::BatchNorm => "batch_normalization",
            LayerDef::Dropout { .. } => "dropout",
        }
    }

    /// Output shape for `input`, or an error if the layer cannot accept it.
    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        match (self, input) {
            (LayerDef::Flatten, shape) => Ok(Shape::Flat(shape.size())),
            (LayerDef::Dense { units, .. }, Shape::Flat(_)) => {
                if *units == 0 {
                    return Err(Error::InvalidConfig("dense units must be > 0".to_owned()));
                }
                Ok(Shape::Flat(*units))
            }
            (LayerDef::Dense { .. }, Shape::Image { .. }) => Err(Error::InvalidShape(format!(
                "dense layer expects flat input, got {input}; add a flatten layer"
            ))),
            (
                LayerDef::Conv2d {
                    filters,
                    kernel,
                    padding,
                    ..
                },
                Shape::Image { height, width, .. },
            ) => {
                if *filters == 0 || *kernel == 0 {
                    return Err(Error::InvalidConfig(
                        "conv2d filters and kernel must be > 0".to_owned(),
                    ));
                }
                let (h, w) = match padding {
                    Padding::Same => (height, width),
                    Padding::Valid => {
                        if *kernel > height || *kernel > width {
                            return Err(Error::InvalidShape(format!(
                                "conv2d kernel {kernel} is larger than input {input}"
                            )));
                        }
                        (height - kernel + 1, width - kernel + 1)
                    }
                };
                Ok(Shape::Image {
                    height: h,
                    width: w,
                    channels: *filters,
                })
            }
            (
                LayerDef::MaxPool2d { pool },
                Shape::Image {
                    height,
                    width,
                    channels,
                },
            ) => {
                if *pool == 0 || *pool > height || *pool > width {
                    return Err(Error::InvalidShape(format!(
                        "max pool {pool} does not fit input {input}"
                    )));
                }
                Ok(Shape::Image {
                    height: height / pool,
                    width: width / pool,
                    channels,
                })
            }
            (LayerDef::Conv2d { .. } | LayerDef::MaxPool2d { .. }, Shape::Flat(_)) => {
                Err(Error::InvalidShape(format!(
                    "{} expects image input, got {input}",
                    self.name()
                )))
            }
            (LayerDef::BatchNorm, shape) => Ok(shape),
            (LayerDef::Dropout { rate }, shape) => {
                if !(rate.is_finite() && (0.0..1.0).contains(rate)) {
                    return Err(Error::InvalidConfig(format!(
                        "dropout rate must be finite and in [0,1), got {rate}"
                    )));
                }
                Ok(shape)
            }
        }
    }

    /// Number of parameters (trainable and not) given the input shape.
    pub fn param_count(&self, input: Shape) -> usize {
        match (self, input) {
            (LayerDef::Dense { units, .. }, shape) => (shape.size() + 1) * units,
            (
                LayerDef::Conv2d {
                    filters, kernel, ..
                },
                Shape::Image { channels, .. },
            ) => (kernel * kernel * channels + 1) * filters,
            // gamma, beta, moving mean, moving variance per feature channel.
            (LayerDef::BatchNorm, Shape::Image { channels, .. }) => 4 * channels,
            (LayerDef::BatchNorm, Shape::Flat(n)) => 4 * n,
            _ => 0,
        }
    }
}

/// A named, declarative classifier definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    pub input_shape: Shape,
    pub layers: Vec<LayerDef>,
    #[serde(default)]
    pub loss: Loss,
    #[serde(default)]
    pub optimizer: Optimizer,
}

impl ModelDef {
    /// Output shape after every layer, in order.
    ///
    /// Also checks the classifier contract: the last layer is a dense softmax and no
    /// hidden layer uses softmax.
    pub fn shapes(&self) -> Result<Vec<Shape>> {
        if self.input_shape.size() == 0 {
            return Err(Error::InvalidConfig(format!(
                "model {} has an empty input shape",
                self.name
            )));
        }
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "model {} has no layers",
                self.name
            )));
        }
        self.optimizer.validate()?;

        let last = self.layers.len() - 1;
        let mut shapes = Vec::with_capacity(self.layers.len());
        let mut shape = self.input_shape;
        for (idx, layer) in self.layers.iter().enumerate() {
            let is_softmax = matches!(
                layer,
                LayerDef::Dense {
                    activation: Activation::Softmax,
                    ..
                } | LayerDef::Conv2d {
                    activation: Activation::Softmax,
                    ..
                }
            );
            if is_softmax && idx != last {
                return Err(Error::InvalidConfig(format!(
                    "layer {idx} uses softmax; only the output layer may"
                )));
            }
            match layer {
                LayerDef::Dense { activation, l2, .. } => {
                    activation.validate()?;
                    if let Some(l2) = l2
                        && !(l2.is_finite() && *l2 >= 0.0)
                    {
                        return Err(Error::InvalidConfig(format!(
                            "layer {idx} l2 factor must be finite and >= 0, got {l2}"
                        )));
                    }
                }
                LayerDef::Conv2d { activation, .. } => activation.validate()?,
                _ => {}
            }
            shape = layer
                .output_shape(shape)
                .map_err(|e| with_layer_context(idx, layer, e))?;
            shapes.push(shape);
        }

        match &self.layers[last] {
            LayerDef::Dense {
                activation: Activation::Softmax,
                ..
            } => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "output layer must be dense with softmax activation, got {}",
                    other.name()
                )));
            }
        }
        Ok(shapes)
    }

    /// Number of output classes (width of the softmax layer).
    pub fn num_classes(&self) -> Result<usize> {
        let shapes = self.shapes()?;
        Ok(shapes.last().map(|s| s.size()).unwrap_or(0))
    }

    /// Total parameter count.
    pub fn param_count(&self) -> Result<usize> {
        let shapes = self.shapes()?;
        let mut input = self.input_shape;
        let mut total = 0;
        for (layer, out) in self.layers.iter().zip(shapes) {
            total += layer.param_count(input);
            input = out;
        }
        Ok(total)
    }

    /// Layer table with output shapes and parameter counts.
    pub fn summary(&self) -> Result<String> {
        let shapes = self.shapes()?;
        let mut s = String::new();
        let _ = writeln!(s, "Model: {}", self.name);
        let _ = writeln!(s, "{:<28}{:<20}{:>10}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(s, "{}", "=".repeat(58));

        let mut input = self.input_shape;
        let mut total = 0;
        for (idx, (layer, out)) in self.layers.iter().zip(shapes).enumerate() {
            let params = layer.param_count(input);
            total += params;
            let label = format!("{}_{idx} ({})", layer.name(), describe(layer));
            let _ = writeln!(s, "{label:<28}{:<20}{params:>10}", out.to_string());
            input = out;
        }
        let _ = writeln!(s, "{}", "=".repeat(58));
        let _ = writeln!(s, "Total params: {total}");
        let _ = writeln!(
            s,
            "Loss: {}, optimizer: {}",
            self.loss.name(),
            self.optimizer.name()
        );
        Ok(s)
    }
}

fn describe(layer: &LayerDef) -> String {
    match layer {
        LayerDef::Flatten | LayerDef::BatchNorm => String::new(),
        LayerDef::Dense {
            activation, l2, ..
        } => match l2 {
            Some(l2) => format!("{}, l2={l2}", activation.name()),
            None => activation.name().to_owned(),
        },
        LayerDef::Conv2d {
            kernel,
            activation,
            padding,
            ..
        } => format!("{kernel}x{kernel} {}, {padding:?}", activation.name()),
        LayerDef::MaxPool2d { pool } => format!("{pool}x{pool}"),
        LayerDef::Dropout { rate } => format!("{rate}"),
    }
}

fn with_layer_context(idx: usize, layer: &LayerDef, err: Error) -> Error {
    let ctx = |msg: String| format!("layer {idx} ({}): {msg}", layer.name());
    match err {
        Error::InvalidShape(msg) => Error::InvalidShape(ctx(msg)),
        Error::InvalidConfig(msg) => Error::InvalidConfig(ctx(msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mnist_shape() -> Shape {
        Shape::Image {
            height: 28,
            width: 28,
            channels: 1,
        }
    }

    fn def(layers: Vec<LayerDef>) -> ModelDef {
        ModelDef {
            name: "test".to_owned(),
            input_shape: mnist_shape(),
            layers,
            loss: Loss::default(),
            optimizer: Optimizer::default(),
        }
    }

    #[test]
    fn dense_definition_infers_shapes_and_params() {
        let m = def(vec![
            LayerDef::Flatten,
            LayerDef::dense(128, Activation::ReLU),
            LayerDef::dense(10, Activation::Softmax),
        ]);
        assert_eq!(
            m.shapes().unwrap(),
            vec![Shape::Flat(784), Shape::Flat(128), Shape::Flat(10)]
        );
        assert_eq!(m.param_count().unwrap(), 785 * 128 + 129 * 10);
        assert_eq!(m.num_classes().unwrap(), 10);
    }

    #[test]
    fn conv_and_pool_shapes() {
        let m = def(vec![
            LayerDef::conv(32, 5, Padding::Valid),
            LayerDef::MaxPool2d { pool: 2 },
            LayerDef::Flatten,
            LayerDef::dense(10, Activation::Softmax),
        ]);
        let shapes = m.shapes().unwrap();
        assert_eq!(
            shapes[0],
            Shape::Image {
                height: 24,
                width: 24,
                channels: 32
            }
        );
        assert_eq!(shapes[2], Shape::Flat(12 * 12 * 32));
        assert_eq!(
            m.param_count().unwrap(),
            (25 + 1) * 32 + (12 * 12 * 32 + 1) * 10
        );
    }

    #[test]
    fn dense_on_image_input_needs_flatten() {
        let m = def(vec![LayerDef::dense(10, Activation::Softmax)]);
        assert!(matches!(m.shapes(), Err(Error::InvalidShape(_))));
    }

    #[test]
    fn class_count_follows_the_softmax_width() {
        let m = def(vec![LayerDef::Flatten, LayerDef::dense(3, Activation::Softmax)]);
        assert_eq!(m.shapes().unwrap().last(), Some(&Shape::Flat(3)));
        assert_eq!(m.num_classes().unwrap(), 3);
    }

    #[test]
    fn output_layer_must_be_softmax() {
        let m = def(vec![LayerDef::Flatten, LayerDef::dense(10, Activation::ReLU)]);
        assert!(matches!(m.shapes(), Err(Error::InvalidConfig(_))));

        let hidden_softmax = def(vec![
            LayerDef::Flatten,
            LayerDef::dense(32, Activation::Softmax),
            LayerDef::dense(10, Activation::Softmax),
        ]);
        assert!(hidden_softmax.shapes().is_err());
    }

    #[test]
    fn rejects_bad_dropout_rate_and_oversized_kernel() {
        let m = def(vec![
            LayerDef::Flatten,
            LayerDef::Dropout { rate: 1.0 },
            LayerDef::dense(10, Activation::Softmax),
        ]);
        assert!(matches!(m.shapes(), Err(Error::InvalidConfig(_))));

        let k = def(vec![
            LayerDef::conv(4, 29, Padding::Valid),
            LayerDef::Flatten,
            LayerDef::dense(10, Activation::Softmax),
        ]);
        assert!(matches!(k.shapes(), Err(Error::InvalidShape(_))));
    }

    #[test]
    fn definition_roundtrips_through_json() {
        let m = def(vec![
            LayerDef::conv(8, 3, Padding::Same),
            LayerDef::BatchNorm,
            LayerDef::Flatten,
            LayerDef::Dense {
                units: 10,
                activation: Activation::Softmax,
                l2: Some(1e-4),
            },
        ]);
        let json = serde_json::to_string(&m).unwrap();
        let back: ModelDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn summary_lists_every_layer() {
        let m = def(vec![
            LayerDef::Flatten,
            LayerDef::dense(16, Activation::ReLU),
            LayerDef::dense(10, Activation::Softmax),
        ]);
        let s = m.summary().unwrap();
        assert!(s.contains("flatten_0"));
        assert!(s.contains("dense_2"));
        assert!(s.contains(&format!("Total params: {}", 785 * 16 + 17 * 10)));
    }
}
