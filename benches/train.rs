use criterion::{black_box, criterion_group, criterion_main, Criterion};

use neurotrain::{
    Activation, BackpropTrainer, FeedForwardNetwork, NullObserver, Rbm, RbmKind, RbmWeightInit,
    TrainConfig, TrainingPairs, WeightInit,
};

fn forward_bench(c: &mut Criterion) {
    let mut net = FeedForwardNetwork::builder(128)
        .unwrap()
        .add_layer(256, Activation::Sigmoid { alpha: 1.0 })
        .unwrap()
        .add_layer(256, Activation::Sigmoid { alpha: 1.0 })
        .unwrap()
        .add_layer(10, Activation::Softmax)
        .unwrap()
        .build_with_seed(WeightInit::Uniform, 0)
        .unwrap();
    let input = vec![0.1_f32; 128];
    let mut output = vec![0.0_f32; 10];

    c.bench_function("predict_128_256_256_10", |b| {
        b.iter(|| {
            net.predict(black_box(&input), &mut output);
            black_box(&output);
        })
    });
}

fn backprop_epoch_bench(c: &mut Criterion) {
    let examples = 64;
    let mut inputs = Vec::with_capacity(examples);
    let mut targets = Vec::with_capacity(examples);
    for i in 0..examples {
        inputs.push((0..32).map(|j| ((i * 31 + j) % 17) as f32 / 17.0).collect());
        targets.push((0..4).map(|j| f32::from(u8::from(i % 4 == j))).collect());
    }
    let data = TrainingPairs::from_rows(&inputs, &targets).unwrap();

    let config = TrainConfig {
        max_epochs: 1,
        epsilon: 0.0,
        package_size: 16,
        base_learn_speed: 0.01,
        ..TrainConfig::default()
    };

    c.bench_function("backprop_epoch_32_64_4", |b| {
        b.iter(|| {
            let mut net = FeedForwardNetwork::builder(32)
                .unwrap()
                .add_layer(64, Activation::Sigmoid { alpha: 1.0 })
                .unwrap()
                .add_layer(4, Activation::Sigmoid { alpha: 1.0 })
                .unwrap()
                .build_with_seed(WeightInit::Uniform, 1)
                .unwrap();
            let mut trainer =
                BackpropTrainer::with_seed(&data, None, config.clone(), 1).unwrap();
            trainer.start(&mut net, &mut NullObserver).unwrap();
            black_box(net.block(0).weights()[0]);
        })
    });
}

fn gibbs_step_bench(c: &mut Criterion) {
    let mut rbm =
        Rbm::with_seed(RbmKind::BinaryBinary, 256, 128, RbmWeightInit::Uniform, 0).unwrap();
    let input = vec![0.5_f32; 256];

    c.bench_function("gibbs_step_256_128", |b| {
        b.iter(|| {
            rbm.hidden_activity_from(black_box(&input));
            rbm.hidden_sampling();
            rbm.visible_activity();
            black_box(rbm.visible_states()[0]);
        })
    });
}

criterion_group!(benches, forward_bench, backprop_epoch_bench, gibbs_step_bench);
criterion_main!(benches);
