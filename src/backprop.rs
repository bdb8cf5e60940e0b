//! Mini-batch backpropagation with per-weight adaptive learning rates.
//!
//! The trainer owns the whole epoch/package loop: shuffled scheduling,
//! forward passes, the backward local-gradient walk and the adaptive weight
//! update. Per-parameter state lives in a session allocated on the first
//! `start()` and released on either terminal transition; the trained weights
//! stay in the network.
//!
//! The backward walk keeps two local-gradient buffers sized to the widest
//! layer and swaps them per layer, so layer `l` reads the gradients layer
//! `l+1` just produced while overwriting the other buffer. The cross-layer
//! reduction is partitioned by destination neuron: each worker owns a
//! disjoint range of the current layer and scans all next-layer neurons, so
//! no two workers ever write the same accumulator.

use std::mem;

use rayon::prelude::*;

use crate::adaptive::AdaptiveState;
use crate::sampler::{packages_count, ShuffledSampler};
use crate::{
    Error, FeedForwardNetwork, NullObserver, Regularization, Result, SessionState, StopToken,
    TrainConfig, TrainObserver, TrainReport, TrainingPairs,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Minimum destination neurons per worker in the backward reduction.
const BACKWARD_GRAIN: usize = 8;
/// Minimum weight rows per worker in the package-derivative accumulation.
const ACCUMULATE_GRAIN: usize = 8;

/// Mini-batch backpropagation trainer for a [`FeedForwardNetwork`].
///
/// ```rust
/// use neurotrain::{
///     Activation, BackpropTrainer, FeedForwardNetwork, NullObserver, TrainConfig,
///     TrainingPairs, WeightInit,
/// };
///
/// # fn main() -> neurotrain::Result<()> {
/// let data = TrainingPairs::from_rows(
///     &[vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
///     &[vec![0.0], vec![1.0], vec![1.0], vec![0.0]],
/// )?;
/// let mut net = FeedForwardNetwork::builder(2)?
///     .add_layer(2, Activation::Sigmoid { alpha: 1.0 })?
///     .add_layer(1, Activation::Sigmoid { alpha: 1.0 })?
///     .build_with_seed(WeightInit::Uniform, 1)?;
///
/// let config = TrainConfig {
///     package_size: 4,
///     max_epochs: 200,
///     base_learn_speed: 0.1,
///     ..TrainConfig::default()
/// };
/// let mut trainer = BackpropTrainer::with_seed(&data, None, config, 1)?;
/// let report = trainer.start(&mut net, &mut NullObserver)?;
/// assert!(report.epochs > 0);
/// # Ok(())
/// # }
/// ```
pub struct BackpropTrainer<'a> {
    train: &'a TrainingPairs,
    test: Option<&'a TrainingPairs>,
    config: TrainConfig,
    state: SessionState,
    stop: StopToken,
    sampler: ShuffledSampler,
    packages: usize,
    session: Option<Session>,
    last_report: Option<TrainReport>,
}

struct LayerSlot {
    weight_state: AdaptiveState,
    weight_derivative: Vec<f32>,
    bias_state: AdaptiveState,
    bias_derivative: Vec<f32>,
}

struct Session {
    layers: Vec<LayerSlot>,
    /// Double-buffered local gradients, each sized to the widest layer.
    local: Vec<f32>,
    local_next: Vec<f32>,
    output: Vec<f32>,
    partial_derivative: Vec<f32>,
}

impl<'a> BackpropTrainer<'a> {
    /// Build a trainer with OS-seeded shuffling.
    pub fn new(
        train: &'a TrainingPairs,
        test: Option<&'a TrainingPairs>,
        config: TrainConfig,
    ) -> Result<Self> {
        Self::with_rng(train, test, config, StdRng::from_entropy())
    }

    /// Build a trainer with deterministic shuffling.
    pub fn with_seed(
        train: &'a TrainingPairs,
        test: Option<&'a TrainingPairs>,
        config: TrainConfig,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rng(train, test, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        train: &'a TrainingPairs,
        test: Option<&'a TrainingPairs>,
        config: TrainConfig,
        rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        config.metric.validate(true)?;
        if train.is_empty() {
            return Err(Error::InvalidData("training set must not be empty".to_owned()));
        }
        if let Some(test) = test {
            if test.input_width() != train.input_width()
                || test.target_width() != train.target_width()
            {
                return Err(Error::InvalidData(format!(
                    "test set shape ({}, {}) does not match train set shape ({}, {})",
                    test.input_width(),
                    test.target_width(),
                    train.input_width(),
                    train.target_width()
                )));
            }
        }

        let packages = packages_count(train.len(), config.package_size);
        let sampler = ShuffledSampler::new(train.len(), rng);
        Ok(Self {
            train,
            test,
            config,
            state: SessionState::NotStarted,
            stop: StopToken::new(),
            sampler,
            packages,
            session: None,
            last_report: None,
        })
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Cancellation handle for this session.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Run the training loop to completion (or until a stop request).
    ///
    /// Idempotent once finished; a stopped session restarts with fresh
    /// per-parameter state. Blocks the calling thread; notifications are
    /// delivered synchronously through `observer`.
    pub fn start(
        &mut self,
        net: &mut FeedForwardNetwork,
        observer: &mut dyn TrainObserver,
    ) -> Result<TrainReport> {
        match self.state {
            SessionState::InProgress | SessionState::Finished => {
                return Ok(self.last_report.unwrap_or(TrainReport {
                    epochs: 0,
                    train_error: f32::NAN,
                    test_error: f32::NAN,
                }));
            }
            SessionState::NotStarted | SessionState::Stopped => {}
        }

        if net.input_size() != self.train.input_width() {
            return Err(Error::InvalidData(format!(
                "network input size {} does not match data input width {}",
                net.input_size(),
                self.train.input_width()
            )));
        }
        if net.output_size() != self.train.target_width() {
            return Err(Error::InvalidData(format!(
                "network output size {} does not match data target width {}",
                net.output_size(),
                self.train.target_width()
            )));
        }

        self.stop.reset();
        if self.session.is_none() {
            self.session = Some(Session::new(net));
        }
        self.state = SessionState::InProgress;
        log::info!(
            "backprop session started: {} examples, {} packages per epoch",
            self.train.len(),
            self.packages
        );

        let report = match self.test {
            Some(test) => self.run_with_testing(net, test, observer),
            None => self.run_without_testing(net, observer),
        };

        if self.state != SessionState::Stopped {
            self.state = SessionState::Finished;
        }
        // Both terminal transitions release the session-scoped state; the
        // trained weights persist in the network.
        self.session = None;
        log::info!(
            "backprop session {:?} after {} epochs, train error {}",
            self.state,
            report.epochs,
            report.train_error
        );
        observer.process_finished(report.epochs);
        self.last_report = Some(report);
        Ok(report)
    }

    fn run_without_testing(
        &mut self,
        net: &mut FeedForwardNetwork,
        observer: &mut dyn TrainObserver,
    ) -> TrainReport {
        let mut train_error = self.evaluate(net, self.train);
        let mut epoch = 1;
        while !self.stop.is_stop_requested()
            && train_error > self.config.epsilon
            && epoch <= self.config.max_epochs
        {
            self.train_epoch(net, epoch);
            train_error = self.evaluate(net, self.train);
            log::debug!("epoch {epoch}: train error {train_error}");
            observer.epoch_completed(epoch, train_error, f32::NAN);
            epoch += 1;
        }
        if self.stop.is_stop_requested() {
            self.state = SessionState::Stopped;
        }
        TrainReport { epochs: epoch - 1, train_error, test_error: f32::NAN }
    }

    fn run_with_testing(
        &mut self,
        net: &mut FeedForwardNetwork,
        test: &TrainingPairs,
        observer: &mut dyn TrainObserver,
    ) -> TrainReport {
        let mut train_error = self.evaluate(net, self.train);
        let mut test_error = self.evaluate(net, test);
        let mut sliding_test_error = test_error;
        let mut min_test_error = test_error;
        let mut epoch = 1;

        while !self.stop.is_stop_requested()
            && train_error > self.config.epsilon
            && epoch <= self.config.max_epochs
            && (epoch <= self.config.cv_warmup_epochs
                || (sliding_test_error - min_test_error).abs() < self.config.cv_limit)
        {
            self.train_epoch(net, epoch);
            train_error = self.evaluate(net, self.train);
            test_error = self.evaluate(net, test);
            sliding_test_error = self.config.cv_sliding_factor * test_error
                + (1.0 - self.config.cv_sliding_factor) * sliding_test_error;
            if test_error < min_test_error {
                min_test_error = test_error;
            }
            log::debug!("epoch {epoch}: train error {train_error}, test error {test_error}");
            observer.epoch_completed(epoch, train_error, test_error);
            epoch += 1;
        }
        if self.stop.is_stop_requested() {
            self.state = SessionState::Stopped;
        }
        TrainReport { epochs: epoch - 1, train_error, test_error }
    }

    fn train_epoch(&mut self, net: &mut FeedForwardNetwork, epoch: usize) {
        self.sampler.refresh();
        for _ in 0..self.packages {
            self.train_package(net, epoch);
        }
    }

    fn train_package(&mut self, net: &mut FeedForwardNetwork, epoch: usize) {
        let session = self.session.as_mut().expect("session is allocated while in progress");

        for _ in 0..self.config.package_size {
            let idx = self.sampler.next_index();
            let input = self.train.input(idx);
            let target = self.train.target(idx);

            net.forward(input);
            let output_state = net.block(net.blocks_count() - 1).state();
            self.config
                .metric
                .partial_derivative(target, output_state, &mut session.partial_derivative);

            collect_weights_delta(net, session, input);
        }

        modify_weights(net, session, &self.config, epoch);
    }

    fn evaluate(&mut self, net: &mut FeedForwardNetwork, data: &TrainingPairs) -> f32 {
        let session = self.session.as_mut().expect("session is allocated while in progress");
        let mut sum = 0.0_f32;
        for idx in 0..data.len() {
            net.predict(data.input(idx), &mut session.output);
            sum += self.config.metric.calculate(data.target(idx), &session.output);
        }
        if !sum.is_finite() {
            log::warn!("non-finite error over {} examples", data.len());
        }
        sum / data.len() as f32
    }
}

impl Session {
    fn new(net: &FeedForwardNetwork) -> Self {
        let mut layers = Vec::with_capacity(net.blocks_count());
        let mut widest = 0;
        for idx in 0..net.blocks_count() {
            let block = net.block(idx);
            let weights_len = block.size() * block.previous_size();
            layers.push(LayerSlot {
                weight_state: AdaptiveState::new(weights_len),
                weight_derivative: vec![0.0; weights_len],
                bias_state: AdaptiveState::new(block.size()),
                bias_derivative: vec![0.0; block.size()],
            });
            widest = widest.max(block.size());
        }
        Session {
            layers,
            local: vec![0.0; widest],
            local_next: vec![0.0; widest],
            output: vec![0.0; net.output_size()],
            partial_derivative: vec![0.0; net.output_size()],
        }
    }
}

/// Backward walk over all layers for one example, accumulating package
/// derivatives under the improvement-direction convention
/// (`derivative -= local_gradient * prev_state`).
fn collect_weights_delta(net: &FeedForwardNetwork, session: &mut Session, input: &[f32]) {
    let last = net.blocks_count() - 1;
    for layer in (0..=last).rev() {
        let block = net.block(layer);
        let size = block.size();

        {
            let target = &mut session.local_next[..size];
            if layer == last {
                block.activation().derivative_with_factors(
                    target,
                    &session.partial_derivative,
                    block.state(),
                );
            } else {
                let next_block = net.block(layer + 1);
                let next_size = next_block.size();
                let next_weights = next_block.weights();
                let next_local = &session.local[..next_size];

                // Partitioned by destination: each worker owns a disjoint
                // range of current-layer neurons and scans the whole next
                // layer.
                target
                    .par_iter_mut()
                    .enumerate()
                    .with_min_len(BACKWARD_GRAIN)
                    .for_each(|(n, gradient)| {
                        let mut sum = 0.0_f32;
                        for (j, &g) in next_local.iter().enumerate() {
                            sum = next_weights[j * size + n].mul_add(g, sum);
                        }
                        *gradient = sum;
                    });
                block.activation().scale_by_derivative(target, block.state());
            }
        }

        let prev_state: &[f32] = if layer == 0 { input } else { net.block(layer - 1).state() };
        let slot = &mut session.layers[layer];
        let local = &session.local_next[..size];

        slot.weight_derivative
            .par_chunks_mut(block.previous_size())
            .zip(local.par_iter())
            .with_min_len(ACCUMULATE_GRAIN)
            .for_each(|(row, &gradient)| {
                for (derivative, &state) in row.iter_mut().zip(prev_state) {
                    *derivative -= gradient * state;
                }
            });
        for (derivative, &gradient) in slot.bias_derivative.iter_mut().zip(local) {
            *derivative -= gradient;
        }

        mem::swap(&mut session.local, &mut session.local_next);
    }
}

fn modify_weights(
    net: &mut FeedForwardNetwork,
    session: &mut Session,
    config: &TrainConfig,
    epoch: usize,
) {
    let rule = config.adaptive_rule();
    let learn_speed = config.learn_speed(epoch);
    let package_factor = 1.0 / config.package_size as f32;

    for (block, slot) in net.blocks_mut().iter_mut().zip(session.layers.iter_mut()) {
        slot.weight_state.step(
            block.weights_mut(),
            &mut slot.weight_derivative,
            &rule,
            learn_speed,
            package_factor,
            config.regularization,
            1.0,
        );
        // Biases are not regularized.
        slot.bias_state.step(
            block.bias_mut(),
            &mut slot.bias_derivative,
            &rule,
            learn_speed,
            package_factor,
            Regularization::None,
            0.0,
        );
    }
}

/// Convenience wrapper: train without notifications.
pub fn train(
    net: &mut FeedForwardNetwork,
    train: &TrainingPairs,
    test: Option<&TrainingPairs>,
    config: TrainConfig,
) -> Result<TrainReport> {
    let mut trainer = BackpropTrainer::new(train, test, config)?;
    trainer.start(net, &mut NullObserver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Activation, Metric, ObserverFn, WeightInit};

    fn sigmoid() -> Activation {
        Activation::Sigmoid { alpha: 1.0 }
    }

    fn tiny_net(seed: u64) -> FeedForwardNetwork {
        FeedForwardNetwork::builder(2)
            .unwrap()
            .add_layer(3, sigmoid())
            .unwrap()
            .add_layer(1, sigmoid())
            .unwrap()
            .build_with_seed(WeightInit::Uniform, seed)
            .unwrap()
    }

    fn tiny_data() -> TrainingPairs {
        TrainingPairs::from_rows(
            &[vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
            &[vec![0.0], vec![1.0], vec![1.0], vec![0.0]],
        )
        .unwrap()
    }

    fn quick_config(max_epochs: usize) -> TrainConfig {
        TrainConfig {
            package_size: 4,
            max_epochs,
            base_learn_speed: 0.1,
            epsilon: 0.0,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn package_derivative_matches_numeric_gradient() {
        // One package of one example, momentum/adaptivity silenced so the
        // applied delta is exactly learn_speed * derivative; compare the
        // resulting weight change against central finite differences of the
        // metric.
        let data = TrainingPairs::from_rows(&[vec![0.3, -0.7]], &[vec![0.8]]).unwrap();
        let config = TrainConfig {
            package_size: 1,
            max_epochs: 1,
            epsilon: 0.0,
            momentum: 0.0,
            speed_bonus: 0.0,
            speed_penalty: 1.0,
            speed_low_border: 1.0,
            speed_up_border: 1.0,
            average_factor: 0.0,
            base_learn_speed: 1e-3,
            ..TrainConfig::default()
        };

        let net = tiny_net(5);
        let eps = 1e-3_f32;

        // Numeric dE/dw for a few probe weights.
        let probes = [(0usize, 0usize), (0, 3), (1, 0)];
        let mut numeric = Vec::new();
        for &(layer, w_idx) in &probes {
            let loss_at = |delta: f32| {
                let mut probe_net = net.clone();
                probe_net.block_mut(layer).weights_mut()[w_idx] += delta;
                let mut out = [0.0_f32];
                probe_net.predict(data.input(0), &mut out);
                Metric::HalfSquaredEuclidean.calculate(data.target(0), &out)
            };
            numeric.push((loss_at(eps) - loss_at(-eps)) / (2.0 * eps));
        }

        let mut trained = net.clone();
        let mut trainer = BackpropTrainer::with_seed(&data, None, config, 0).unwrap();
        trainer.start(&mut trained, &mut NullObserver).unwrap();

        for (probe, &(layer, w_idx)) in probes.iter().enumerate() {
            let before = net.block(layer).weights()[w_idx];
            let after = trained.block(layer).weights()[w_idx];
            // delta = learn_speed * (-dE/dw)
            let analytic = (after - before) / 1e-3;
            assert!(
                (analytic + numeric[probe]).abs() < 5e-2,
                "layer {layer} weight {w_idx}: applied {analytic}, numeric {}",
                numeric[probe]
            );
        }
    }

    #[test]
    fn start_is_idempotent_after_finishing() {
        let data = tiny_data();
        let mut net = tiny_net(1);
        let mut trainer = BackpropTrainer::with_seed(&data, None, quick_config(3), 2).unwrap();
        let first = trainer.start(&mut net, &mut NullObserver).unwrap();
        assert_eq!(trainer.state(), SessionState::Finished);

        let weights_after: Vec<f32> = net.block(0).weights().to_vec();
        let again = trainer.start(&mut net, &mut NullObserver).unwrap();
        assert_eq!(first.epochs, again.epochs);
        assert_eq!(net.block(0).weights(), weights_after.as_slice());
    }

    #[test]
    fn observer_sees_every_epoch_without_test_error() {
        let data = tiny_data();
        let mut net = tiny_net(1);
        let mut epochs = Vec::new();
        {
            let mut observer = ObserverFn(|epoch: usize, train_error: f32, test_error: f32| {
                assert!(train_error.is_finite());
                assert!(test_error.is_nan());
                epochs.push(epoch);
            });
            let mut trainer = BackpropTrainer::with_seed(&data, None, quick_config(5), 3).unwrap();
            trainer.start(&mut net, &mut observer).unwrap();
        }
        assert_eq!(epochs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn held_out_data_produces_finite_test_error() {
        let data = tiny_data();
        let test = tiny_data();
        let mut net = tiny_net(4);
        let mut saw_test_error = false;
        {
            let mut observer = ObserverFn(|_epoch: usize, _train: f32, test_error: f32| {
                assert!(test_error.is_finite());
                saw_test_error = true;
            });
            let mut trainer =
                BackpropTrainer::with_seed(&data, Some(&test), quick_config(3), 4).unwrap();
            trainer.start(&mut net, &mut observer).unwrap();
        }
        assert!(saw_test_error);
    }

    #[test]
    fn stop_request_ends_the_session_as_stopped() {
        let data = tiny_data();
        let mut net = tiny_net(1);
        let mut trainer = BackpropTrainer::with_seed(&data, None, quick_config(1000), 5).unwrap();
        let token = trainer.stop_token();
        let mut observer = ObserverFn(move |epoch: usize, _train: f32, _test: f32| {
            if epoch == 2 {
                token.stop();
            }
        });
        let report = trainer.start(&mut net, &mut observer).unwrap();
        assert_eq!(trainer.state(), SessionState::Stopped);
        // The epoch in flight completed before the flag was observed.
        assert_eq!(report.epochs, 2);
    }

    #[test]
    fn mismatched_network_is_rejected() {
        let data = tiny_data();
        let mut wide = FeedForwardNetwork::builder(3)
            .unwrap()
            .add_layer(1, sigmoid())
            .unwrap()
            .build_with_seed(WeightInit::Uniform, 0)
            .unwrap();
        let mut trainer = BackpropTrainer::with_seed(&data, None, quick_config(3), 6).unwrap();
        assert!(trainer.start(&mut wide, &mut NullObserver).is_err());
    }
}
