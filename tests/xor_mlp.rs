//! End-to-end backpropagation scenarios on small synthetic problems.

use neurotrain::{
    Activation, BackpropTrainer, FeedForwardNetwork, Metric, NullObserver, TrainConfig,
    TrainingPairs, WeightInit,
};

fn xor_pairs() -> TrainingPairs {
    TrainingPairs::from_rows(
        &[vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
        &[vec![0.0], vec![1.0], vec![1.0], vec![0.0]],
    )
    .unwrap()
}

fn xor_config() -> TrainConfig {
    TrainConfig {
        metric: Metric::HalfSquaredEuclidean,
        epsilon: 0.01,
        max_epochs: 5000,
        package_size: 4,
        base_learn_speed: 0.1,
        momentum: 0.9,
        ..TrainConfig::default()
    }
}

#[test]
fn xor_2_2_1_learns_the_truth_table() {
    let data = xor_pairs();
    let sigmoid = Activation::Sigmoid { alpha: 1.0 };

    // A 2-2-1 sigmoid net can land in the 0.5-everywhere local minimum from
    // unlucky initializations, so probe a handful of seeds; the scenario
    // passes when one of them solves the problem.
    let mut solved = None;
    for seed in 0..6 {
        let mut net = FeedForwardNetwork::builder(2)
            .unwrap()
            .add_layer(2, sigmoid)
            .unwrap()
            .add_layer(1, sigmoid)
            .unwrap()
            .build_with_seed(WeightInit::Uniform, seed)
            .unwrap();

        let mut trainer = BackpropTrainer::with_seed(&data, None, xor_config(), seed).unwrap();
        let report = trainer.start(&mut net, &mut NullObserver).unwrap();
        assert!(report.train_error.is_finite(), "seed {seed} diverged to NaN/Inf");
        if report.train_error < 0.01 {
            solved = Some((net, report));
            break;
        }
    }
    let (mut net, report) = solved.expect("no seed solved XOR within 5000 epochs");
    assert!(report.train_error < 0.01);

    let mut output = [0.0_f32];
    for (input, expected_high) in [
        ([0.0_f32, 0.0], false),
        ([0.0, 1.0], true),
        ([1.0, 0.0], true),
        ([1.0, 1.0], false),
    ] {
        net.predict(&input, &mut output);
        if expected_high {
            assert!(output[0] > 0.5, "{input:?} -> {} should be close to 1", output[0]);
        } else {
            assert!(output[0] < 0.5, "{input:?} -> {} should be close to 0", output[0]);
        }
    }
}

#[test]
fn softmax_head_separates_three_classes() {
    // Three well-separated 2D clusters, one-hot targets.
    let inputs = vec![
        vec![0.0, 0.0],
        vec![0.1, 0.0],
        vec![0.0, 0.1],
        vec![1.0, 1.0],
        vec![0.9, 1.0],
        vec![1.0, 0.9],
        vec![0.0, 1.0],
        vec![0.1, 1.0],
        vec![0.0, 0.9],
    ];
    let targets = vec![
        vec![1.0, 0.0, 0.0],
        vec![1.0, 0.0, 0.0],
        vec![1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
        vec![0.0, 0.0, 1.0],
        vec![0.0, 0.0, 1.0],
    ];
    let data = TrainingPairs::from_rows(&inputs, &targets).unwrap();

    let mut net = FeedForwardNetwork::builder(2)
        .unwrap()
        .add_layer(8, Activation::Sigmoid { alpha: 1.0 })
        .unwrap()
        .add_layer(3, Activation::Softmax)
        .unwrap()
        .build_with_seed(WeightInit::Uniform, 7)
        .unwrap();

    let config = TrainConfig {
        metric: Metric::CrossEntropySoftmax,
        epsilon: 0.05,
        max_epochs: 2000,
        package_size: 3,
        base_learn_speed: 0.05,
        momentum: 0.5,
        ..TrainConfig::default()
    };
    let mut trainer = BackpropTrainer::with_seed(&data, None, config, 7).unwrap();
    let report = trainer.start(&mut net, &mut NullObserver).unwrap();
    assert!(report.train_error.is_finite());

    let mut output = [0.0_f32; 3];
    for idx in 0..data.len() {
        net.predict(data.input(idx), &mut output);
        let sum: f32 = output.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "softmax output must stay normalized");

        let predicted = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let expected = data
            .target(idx)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(predicted, expected, "example {idx} misclassified: {output:?}");
    }
}

#[test]
fn held_out_plateau_check_can_end_training_early() {
    // Train and test sets with conflicting targets: the held-out error
    // cannot keep improving, so the plateau check fires once the warm-up is
    // over and the sliding error drifts from its minimum.
    let train = xor_pairs();
    let test = TrainingPairs::from_rows(
        &[vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
        &[vec![1.0], vec![0.0], vec![0.0], vec![1.0]],
    )
    .unwrap();

    // Four hidden units keep the optimization itself out of the picture;
    // this test is about the plateau stop, not about XOR capacity.
    let mut net = FeedForwardNetwork::builder(2)
        .unwrap()
        .add_layer(4, Activation::Sigmoid { alpha: 1.0 })
        .unwrap()
        .add_layer(1, Activation::Sigmoid { alpha: 1.0 })
        .unwrap()
        .build_with_seed(WeightInit::Uniform, 1)
        .unwrap();

    let config = TrainConfig {
        cv_limit: 0.02,
        cv_warmup_epochs: 5,
        cv_sliding_factor: 0.5,
        ..xor_config()
    };
    let mut trainer = BackpropTrainer::with_seed(&train, Some(&test), config, 1).unwrap();
    let report = trainer.start(&mut net, &mut NullObserver).unwrap();

    assert!(report.test_error.is_finite());
    assert!(
        report.epochs < 5000,
        "anti-correlated held-out set should have tripped the plateau stop"
    );
}
