//! The MNIST model variants under comparison.

use crate::mnist::{IMAGE_COLS, IMAGE_ROWS, NUM_CLASSES};
use crate::{Activation, LayerDef, Loss, ModelDef, Optimizer, Padding, Shape};

pub const NAMES: [&str; 6] = [
    "dense_simple",
    "dense_deep",
    "dense_wide",
    "dense_regularized",
    "cnn_basic",
    "cnn_deep",
];

/// Every variant, in comparison order.
pub fn all() -> Vec<ModelDef> {
    NAMES.iter().filter_map(|name| by_name(name)).collect()
}

pub fn by_name(name: &str) -> Option<ModelDef> {
    let def = match name {
        "dense_simple" => dense_simple(),
        "dense_deep" => dense_deep(),
        "dense_wide" => dense_wide(),
        "dense_regularized" => dense_regularized(),
        "cnn_basic" => cnn_basic(),
        "cnn_deep" => cnn_deep(),
        _ => return None,
    };
    Some(def)
}

fn mnist_input() -> Shape {
    Shape::Image {
        height: IMAGE_ROWS,
        width: IMAGE_COLS,
        channels: 1,
    }
}

fn classifier(name: &str, mut layers: Vec<LayerDef>, optimizer: Optimizer) -> ModelDef {
    layers.push(LayerDef::dense(NUM_CLASSES, Activation::Softmax));
    ModelDef {
        name: name.to_owned(),
        input_shape: mnist_input(),
        layers,
        loss: Loss::CategoricalCrossEntropy,
        optimizer,
    }
}

pub fn dense_simple() -> ModelDef {
    classifier(
        "dense_simple",
        vec![LayerDef::Flatten, LayerDef::dense(128, Activation::ReLU)],
        Optimizer::default(),
    )
}

pub fn dense_deep() -> ModelDef {
    let mut layers = vec![LayerDef::Flatten];
    layers.extend((0..3).map(|_| LayerDef::dense(128, Activation::ReLU)));
    classifier("dense_deep", layers, Optimizer::default())
}

pub fn dense_wide() -> ModelDef {
    classifier(
        "dense_wide",
        vec![LayerDef::Flatten, LayerDef::dense(512, Activation::ReLU)],
        Optimizer::default(),
    )
}

pub fn dense_regularized() -> ModelDef {
    let mut layers = vec![LayerDef::Flatten];
    for _ in 0..2 {
        layers.push(LayerDef::Dense {
            units: 512,
            activation: Activation::ReLU,
            l2: Some(1e-4),
        });
        layers.push(LayerDef::Dropout { rate: 0.2 });
    }
    classifier("dense_regularized", layers, Optimizer::sgd_momentum(0.9))
}

pub fn cnn_basic() -> ModelDef {
    classifier(
        "cnn_basic",
        vec![
            LayerDef::conv(32, 5, Padding::Valid),
            LayerDef::MaxPool2d { pool: 2 },
            LayerDef::Flatten,
        ],
        Optimizer::default(),
    )
}

pub fn cnn_deep() -> ModelDef {
    let mut layers = Vec::new();
    for filters in [32, 64, 128] {
        layers.extend([
            LayerDef::conv(filters, 3, Padding::Same),
            LayerDef::BatchNorm,
            LayerDef::conv(filters, 3, Padding::Same),
            LayerDef::BatchNorm,
            LayerDef::MaxPool2d { pool: 2 },
            LayerDef::Dropout { rate: 0.25 },
        ]);
    }
    layers.push(LayerDef::Flatten);
    for units in [512, 1024] {
        layers.extend([
            LayerDef::dense(units, Activation::ReLU),
            LayerDef::BatchNorm,
            LayerDef::Dropout { rate: 0.5 },
        ]);
    }
    classifier("cnn_deep", layers, Optimizer::default())
}
