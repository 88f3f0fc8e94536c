use mnist_zoo::{
    Classifier, Dataset, Error, FitConfig, Shuffle, StopReason, compile, evaluate,
    find_misclassifications, fit, mnist::NUM_CLASSES, zoo,
};

/// Synthetic 28x28 "digits": class `k` lights up the `k`-th horizontal band of the image.
fn banded(len: usize, seed: usize) -> Dataset {
    let mut pixels = Vec::with_capacity(len * 784);
    let mut labels = Vec::with_capacity(len);
    for i in 0..len {
        let label = (i * 7 + seed) % NUM_CLASSES;
        for row in 0..28 {
            let on = row * NUM_CLASSES / 28 == label;
            for col in 0..28 {
                let jitter = ((i + row * 3 + col) % 5) as f32 * 0.05;
                pixels.push(if on { 0.8 + jitter } else { jitter });
            }
        }
        labels.push(label as u8);
    }
    Dataset::from_labels(pixels, 784, &labels, NUM_CLASSES).unwrap()
}

fn quick_cfg(max_epochs: usize) -> FitConfig {
    FitConfig {
        max_epochs,
        batch_size: 32,
        shuffle: Shuffle::Seeded(1),
        ..FitConfig::default()
    }
}

#[test]
fn dense_simple_learns_banded_digits() {
    let train = banded(400, 0);
    let test = banded(100, 3);
    let mut model = compile(&zoo::dense_simple(), 42).unwrap();

    let before = evaluate(&model, &test).unwrap();
    let history = fit(&mut model, &train, &quick_cfg(10)).unwrap();
    let after = evaluate(&model, &test).unwrap();

    assert!(!history.is_empty() && history.len() <= 10);
    assert!(history.epochs.iter().enumerate().all(|(i, r)| r.epoch == i + 1));
    assert!(after.loss < before.loss, "{} !< {}", after.loss, before.loss);
    assert!(after.accuracy > 0.8, "accuracy {}", after.accuracy);

    let first = history.epochs[0];
    let last = *history.last().unwrap();
    assert!(last.train_loss < first.train_loss);
}

#[test]
fn regularized_variant_trains_with_dropout_and_momentum() {
    let train = banded(300, 1);
    let mut model = compile(&zoo::dense_regularized(), 7).unwrap();
    let history = fit(&mut model, &train, &quick_cfg(3)).unwrap();
    for rec in &history.epochs {
        assert!(rec.train_loss.is_finite() && rec.val_loss.is_finite());
        assert!((0.0..=1.0).contains(&rec.val_accuracy));
    }
}

#[test]
fn seeded_runs_are_reproducible() {
    let train = banded(200, 2);
    let run = || {
        let mut model = compile(&zoo::dense_simple(), 5).unwrap();
        fit(&mut model, &train, &quick_cfg(2)).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn evaluation_does_not_change_the_model() {
    let train = banded(200, 4);
    let test = banded(50, 5);
    let mut model = compile(&zoo::dense_wide(), 3).unwrap();
    fit(&mut model, &train, &quick_cfg(1)).unwrap();

    let a = evaluate(&model, &test).unwrap();
    let missed: Vec<_> = find_misclassifications(&model, &test, 10).unwrap().collect();
    let b = evaluate(&model, &test).unwrap();
    assert_eq!(a, b);
    assert!(missed.len() <= 10);
    for m in missed {
        assert_ne!(m.prediction.predicted_class(), m.true_label);
        let sum: f32 = m.prediction.probabilities().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }
}

#[test]
fn evaluation_loss_is_the_models_configured_loss() {
    let model = compile(&zoo::dense_simple(), 9).unwrap();
    let data = banded(40, 1);
    let eval = evaluate(&model, &data).unwrap();

    let mut total = 0.0_f64;
    for i in 0..data.len() {
        let pred = model.predict(data.input(i)).unwrap();
        total += f64::from(model.def().loss.forward(pred.probabilities(), data.target(i)));
    }
    let expected = (total / data.len() as f64) as f32;
    assert!((eval.loss - expected).abs() < 1e-4, "{} vs {expected}", eval.loss);
}

#[test]
fn predictions_are_ten_way_distributions() {
    let model = compile(&zoo::dense_deep(), 0).unwrap();
    let data = banded(20, 0);
    let mut probs = vec![0.0_f32; 20 * model.num_classes()];
    model.predict_batch(data.inputs().rows(0, 20), &mut probs);
    for row in probs.chunks_exact(NUM_CLASSES) {
        assert!(row.iter().all(|&p| p >= 0.0));
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}

#[test]
fn one_hot_targets_have_a_single_one() {
    let data = banded(30, 0);
    for i in 0..data.len() {
        let t = data.target(i);
        assert_eq!(t.len(), NUM_CLASSES);
        assert_eq!(t.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(t.iter().filter(|&&v| v == 0.0).count(), NUM_CLASSES - 1);
    }
}

#[test]
fn convolutional_variants_are_defined_but_not_compilable() {
    for def in [zoo::cnn_basic(), zoo::cnn_deep()] {
        assert!(def.summary().is_ok());
        assert!(matches!(compile(&def, 0), Err(Error::Unsupported(_))));
    }
}

#[test]
fn wrong_input_shape_fails_fast() {
    let mut model = compile(&zoo::dense_simple(), 0).unwrap();
    let small = Dataset::from_labels(vec![0.0; 40], 4, &[0; 10], NUM_CLASSES).unwrap();
    assert!(matches!(
        fit(&mut model, &small, &FitConfig::default()),
        Err(Error::InvalidShape(_))
    ));
    assert!(matches!(evaluate(&model, &small), Err(Error::InvalidShape(_))));
}

#[test]
fn patience_zero_stops_on_first_plateau() {
    let train = banded(100, 0);
    let mut model = compile(&zoo::dense_simple(), 0).unwrap();
    let cfg = FitConfig {
        patience: 0,
        min_delta: 1e6,
        ..quick_cfg(10)
    };
    let history = fit(&mut model, &train, &cfg).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.stop_reason, StopReason::EarlyStopping);
}
