//! Contrastive Divergence training for restricted Boltzmann machines.
//!
//! One trainer drives both CD variants. Per package, each example runs a
//! positive phase (hidden activity from the data vector) and a negative
//! phase, and the configured [`GradientAccumulator`] records both pairs; the
//! weight update then runs once per package on the accumulated gradient.
//!
//! The negative phase is where the variants differ:
//!
//! - **CD-k** Gibbs-samples away from the data: hidden sample, visible
//!   activity, `k-1` further rounds, and a final hidden activity.
//! - **Fast-PCD** keeps one persistent visible chain *per package index* and
//!   advances it one mean-field step per example, perturbed by a
//!   quickly-decaying fast-weight overlay that pushes the chain away from the
//!   current mode. The overlay never touches the base weights.

use crate::adaptive::AdaptiveState;
use crate::sampler::{packages_count, ShuffledSampler};
use crate::{
    Error, GradientAccumulator, GradientStrategy, NullObserver, Rbm, RbmGradients, Regularization,
    Result, Samples, SessionState, StopToken, TrainConfig, TrainObserver, TrainReport,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Negative-phase variant.
pub enum CdMethod {
    /// Plain CD with `gibbs_steps` sampling rounds per example.
    ContrastiveDivergence { gibbs_steps: usize },
    /// Persistent chains with fast weights decaying by `fast_decay` per
    /// package.
    FastPersistent { fast_decay: f32 },
}

impl CdMethod {
    /// Validate method parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            CdMethod::ContrastiveDivergence { gibbs_steps } => {
                if gibbs_steps == 0 {
                    return Err(Error::InvalidConfig(
                        "CD needs at least one Gibbs step".to_owned(),
                    ));
                }
            }
            CdMethod::FastPersistent { fast_decay } => {
                if !(fast_decay.is_finite() && (0.0..1.0).contains(&fast_decay)) {
                    return Err(Error::InvalidConfig(format!(
                        "fast weight decay must be in [0, 1), got {fast_decay}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Contrastive Divergence trainer for an [`Rbm`].
pub struct RbmTrainer<'a> {
    train: &'a Samples,
    test: Option<&'a Samples>,
    config: TrainConfig,
    method: CdMethod,
    strategy: GradientStrategy,
    state: SessionState,
    stop: StopToken,
    sampler: ShuffledSampler,
    packages: usize,
    session: Option<RbmSession>,
    last_report: Option<TrainReport>,
}

struct FastOverlay {
    weights: Vec<f32>,
    visible_bias: Vec<f32>,
    hidden_bias: Vec<f32>,
}

struct RbmSession {
    gradients: RbmGradients,
    accumulator: GradientAccumulator,
    weight_state: AdaptiveState,
    visible_bias_state: AdaptiveState,
    hidden_bias_state: AdaptiveState,
    fast: Option<FastOverlay>,
    /// One visible chain per package index (Fast-PCD only), laid out
    /// `packages * visible_count`.
    persistent_visible: Vec<f32>,
    output: Vec<f32>,
}

impl<'a> RbmTrainer<'a> {
    /// Build a trainer with OS-seeded shuffling.
    pub fn new(
        train: &'a Samples,
        test: Option<&'a Samples>,
        config: TrainConfig,
        method: CdMethod,
        strategy: GradientStrategy,
    ) -> Result<Self> {
        Self::with_rng(train, test, config, method, strategy, StdRng::from_entropy())
    }

    /// Build a trainer with deterministic shuffling.
    pub fn with_seed(
        train: &'a Samples,
        test: Option<&'a Samples>,
        config: TrainConfig,
        method: CdMethod,
        strategy: GradientStrategy,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rng(train, test, config, method, strategy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        train: &'a Samples,
        test: Option<&'a Samples>,
        config: TrainConfig,
        method: CdMethod,
        strategy: GradientStrategy,
        rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        // Reconstruction metrics only report; they never differentiate here.
        config.metric.validate(false)?;
        method.validate()?;
        strategy.validate()?;
        if train.is_empty() {
            return Err(Error::InvalidData("training set must not be empty".to_owned()));
        }
        if let Some(test) = test {
            if test.width() != train.width() {
                return Err(Error::InvalidData(format!(
                    "test sample width {} does not match train sample width {}",
                    test.width(),
                    train.width()
                )));
            }
        }

        let packages = packages_count(train.len(), config.package_size);
        let sampler = ShuffledSampler::new(train.len(), rng);
        Ok(Self {
            train,
            test,
            config,
            method,
            strategy,
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
    /// per-parameter state.
    pub fn start(&mut self, rbm: &mut Rbm, observer: &mut dyn TrainObserver) -> Result<TrainReport> {
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

        if rbm.visible_count() != self.train.width() {
            return Err(Error::InvalidData(format!(
                "RBM visible count {} does not match sample width {}",
                rbm.visible_count(),
                self.train.width()
            )));
        }

        self.stop.reset();
        if self.session.is_none() {
            self.session = Some(self.allocate_session(rbm)?);
        }
        self.state = SessionState::InProgress;
        log::info!(
            "CD session started: {} examples, {} packages per epoch",
            self.train.len(),
            self.packages
        );

        let report = match self.test {
            Some(test) => self.run_with_testing(rbm, test, observer),
            None => self.run_without_testing(rbm, observer),
        };

        if self.state != SessionState::Stopped {
            self.state = SessionState::Finished;
        }
        // Both terminal transitions release the session-scoped state; the
        // trained weights persist in the machine.
        self.session = None;
        log::info!(
            "CD session {:?} after {} epochs, reconstruction error {}",
            self.state,
            report.epochs,
            report.train_error
        );
        observer.process_finished(report.epochs);
        self.last_report = Some(report);
        Ok(report)
    }

    fn allocate_session(&self, rbm: &Rbm) -> Result<RbmSession> {
        let nv = rbm.visible_count();
        let nh = rbm.hidden_count();
        let accumulator = GradientAccumulator::from_strategy(&self.strategy, nv, nh)?;
        let fast = match self.method {
            CdMethod::ContrastiveDivergence { .. } => None,
            CdMethod::FastPersistent { .. } => Some(FastOverlay {
                weights: vec![0.0; nv * nh],
                visible_bias: vec![0.0; nv],
                hidden_bias: vec![0.0; nh],
            }),
        };
        let persistent_visible = match self.method {
            CdMethod::ContrastiveDivergence { .. } => Vec::new(),
            CdMethod::FastPersistent { .. } => vec![0.0; self.packages * nv],
        };
        Ok(RbmSession {
            gradients: RbmGradients::new(nv, nh),
            accumulator,
            weight_state: AdaptiveState::new(nv * nh),
            visible_bias_state: AdaptiveState::new(nv),
            hidden_bias_state: AdaptiveState::new(nh),
            fast,
            persistent_visible,
            output: vec![0.0; nv],
        })
    }

    fn run_without_testing(&mut self, rbm: &mut Rbm, observer: &mut dyn TrainObserver) -> TrainReport {
        let mut train_error = self.evaluate(rbm, self.train);
        let mut epoch = 1;
        while !self.stop.is_stop_requested()
            && train_error > self.config.epsilon
            && epoch <= self.config.max_epochs
        {
            self.train_epoch(rbm, epoch);
            train_error = self.evaluate(rbm, self.train);
            log::debug!("epoch {epoch}: reconstruction error {train_error}");
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
        rbm: &mut Rbm,
        test: &Samples,
        observer: &mut dyn TrainObserver,
    ) -> TrainReport {
        let mut train_error = self.evaluate(rbm, self.train);
        let mut test_error = self.evaluate(rbm, test);
        let mut sliding_test_error = test_error;
        let mut min_test_error = test_error;
        let mut epoch = 1;

        while !self.stop.is_stop_requested()
            && train_error > self.config.epsilon
            && epoch <= self.config.max_epochs
            && (epoch <= self.config.cv_warmup_epochs
                || (sliding_test_error - min_test_error).abs() < self.config.cv_limit)
        {
            self.train_epoch(rbm, epoch);
            train_error = self.evaluate(rbm, self.train);
            test_error = self.evaluate(rbm, test);
            sliding_test_error = self.config.cv_sliding_factor * test_error
                + (1.0 - self.config.cv_sliding_factor) * sliding_test_error;
            if test_error < min_test_error {
                min_test_error = test_error;
            }
            log::debug!(
                "epoch {epoch}: reconstruction error {train_error}, test error {test_error}"
            );
            observer.epoch_completed(epoch, train_error, test_error);
            epoch += 1;
        }
        if self.stop.is_stop_requested() {
            self.state = SessionState::Stopped;
        }
        TrainReport { epochs: epoch - 1, train_error, test_error }
    }

    fn train_epoch(&mut self, rbm: &mut Rbm, epoch: usize) {
        self.sampler.refresh();
        for package_id in 0..self.packages {
            self.train_package(rbm, package_id, epoch);
        }
    }

    fn train_package(&mut self, rbm: &mut Rbm, package_id: usize, epoch: usize) {
        let nv = rbm.visible_count();
        let session = self.session.as_mut().expect("session is allocated while in progress");
        session.accumulator.prepare_package(self.config.package_size);

        for _ in 0..self.config.package_size {
            let input = self.train.sample(self.sampler.next_index());

            // Positive phase: hidden activity straight from the data.
            rbm.hidden_activity_from(input);
            session
                .accumulator
                .store_positive(&mut session.gradients, input, rbm.hidden_states());

            match self.method {
                CdMethod::ContrastiveDivergence { gibbs_steps } => {
                    rbm.hidden_sampling();
                    rbm.visible_activity();
                    for _ in 1..gibbs_steps {
                        rbm.hidden_activity();
                        rbm.hidden_sampling();
                        rbm.visible_activity();
                    }
                    rbm.hidden_activity();
                    session.accumulator.store_negative(
                        &mut session.gradients,
                        rbm.visible_states(),
                        rbm.hidden_states(),
                    );
                }
                CdMethod::FastPersistent { .. } => {
                    let fast = session
                        .fast
                        .as_ref()
                        .expect("fast overlay is allocated for Fast-PCD");
                    let chain_start = package_id * nv;
                    let chain = &session.persistent_visible[chain_start..chain_start + nv];

                    rbm.hidden_activity_from_added(chain, &fast.weights, &fast.hidden_bias);
                    session.accumulator.store_negative(
                        &mut session.gradients,
                        chain,
                        rbm.hidden_states(),
                    );

                    // Advance the chain one step under the fast overlay and
                    // write the fresh visible state back.
                    rbm.visible_activity_added(&fast.weights, &fast.visible_bias);
                    rbm.visible_states_to(
                        &mut session.persistent_visible[chain_start..chain_start + nv],
                    );
                }
            }
        }

        session
            .accumulator
            .make_gradient(&mut session.gradients, 1.0 / self.config.package_size as f32);
        modify_weights(rbm, session, &self.config, self.method, self.packages, epoch);
    }

    fn evaluate(&mut self, rbm: &mut Rbm, data: &Samples) -> f32 {
        let session = self.session.as_mut().expect("session is allocated while in progress");
        let mut sum = 0.0_f32;
        for idx in 0..data.len() {
            let input = data.sample(idx);
            rbm.predict(input, &mut session.output);
            sum += self.config.metric.calculate(input, &session.output);
        }
        if !sum.is_finite() {
            log::warn!("non-finite reconstruction error over {} examples", data.len());
        }
        sum / data.len() as f32
    }
}

fn modify_weights(
    rbm: &mut Rbm,
    session: &mut RbmSession,
    config: &TrainConfig,
    method: CdMethod,
    packages: usize,
    epoch: usize,
) {
    let rule = config.adaptive_rule();
    let learn_speed = config.learn_speed(epoch);
    // The package derivative is already averaged over the package, so the
    // regularization derivative is spread over the epoch's packages instead.
    let reg_scale = 1.0 / packages as f32;

    match method {
        CdMethod::ContrastiveDivergence { .. } => {
            session.weight_state.step(
                rbm.weights_mut(),
                session.gradients.weights_mut(),
                &rule,
                learn_speed,
                1.0,
                config.regularization,
                reg_scale,
            );
            session.visible_bias_state.step(
                rbm.visible_bias_mut(),
                session.gradients.visible_bias_mut(),
                &rule,
                learn_speed,
                1.0,
                Regularization::None,
                0.0,
            );
            session.hidden_bias_state.step(
                rbm.hidden_bias_mut(),
                session.gradients.hidden_bias_mut(),
                &rule,
                learn_speed,
                1.0,
                config.regularization,
                reg_scale,
            );
        }
        CdMethod::FastPersistent { fast_decay } => {
            let fast_speed = config.added_learn_speed(epoch);
            let fast = session.fast.as_mut().expect("fast overlay is allocated for Fast-PCD");
            session.weight_state.step_with_fast(
                rbm.weights_mut(),
                &mut fast.weights,
                session.gradients.weights_mut(),
                &rule,
                learn_speed,
                fast_speed,
                fast_decay,
                1.0,
                config.regularization,
                reg_scale,
            );
            session.visible_bias_state.step_with_fast(
                rbm.visible_bias_mut(),
                &mut fast.visible_bias,
                session.gradients.visible_bias_mut(),
                &rule,
                learn_speed,
                fast_speed,
                fast_decay,
                1.0,
                Regularization::None,
                0.0,
            );
            session.hidden_bias_state.step_with_fast(
                rbm.hidden_bias_mut(),
                &mut fast.hidden_bias,
                session.gradients.hidden_bias_mut(),
                &rule,
                learn_speed,
                fast_speed,
                fast_decay,
                1.0,
                config.regularization,
                reg_scale,
            );
        }
    }
}

/// Convenience wrapper: train without notifications.
pub fn train(
    rbm: &mut Rbm,
    train: &Samples,
    test: Option<&Samples>,
    config: TrainConfig,
    method: CdMethod,
    strategy: GradientStrategy,
) -> Result<TrainReport> {
    let mut trainer = RbmTrainer::new(train, test, config, method, strategy)?;
    trainer.start(rbm, &mut NullObserver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Metric, RbmKind, RbmWeightInit};

    fn cluster_samples() -> Samples {
        // Two clear clusters over six visible units.
        Samples::from_rows(&[
            vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 1.0],
            vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        ])
        .unwrap()
    }

    fn rbm_config(max_epochs: usize) -> TrainConfig {
        TrainConfig {
            metric: Metric::HalfSquaredEuclidean,
            package_size: 4,
            max_epochs,
            epsilon: 0.0,
            base_learn_speed: 0.05,
            momentum: 0.5,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn method_validation_rejects_degenerate_parameters() {
        assert!(CdMethod::ContrastiveDivergence { gibbs_steps: 0 }.validate().is_err());
        assert!(CdMethod::FastPersistent { fast_decay: 1.0 }.validate().is_err());
        assert!(CdMethod::FastPersistent { fast_decay: 0.95 }.validate().is_ok());
    }

    #[test]
    fn training_finishes_and_releases_the_session() {
        let data = cluster_samples();
        let mut rbm = Rbm::with_seed(RbmKind::BinaryBinary, 6, 3, RbmWeightInit::Uniform, 3).unwrap();
        let mut trainer = RbmTrainer::with_seed(
            &data,
            None,
            rbm_config(10),
            CdMethod::ContrastiveDivergence { gibbs_steps: 1 },
            GradientStrategy::Linear,
            3,
        )
        .unwrap();
        let report = trainer.start(&mut rbm, &mut NullObserver).unwrap();
        assert_eq!(trainer.state(), SessionState::Finished);
        assert!(report.epochs >= 1 && report.epochs <= 10);
        assert!(trainer.session.is_none());
    }

    #[test]
    fn hamming_metric_is_accepted_for_reconstruction() {
        let data = cluster_samples();
        let config = TrainConfig { metric: Metric::Hamming, ..rbm_config(2) };
        let mut rbm = Rbm::with_seed(RbmKind::BinaryBinary, 6, 3, RbmWeightInit::Uniform, 4).unwrap();
        let mut trainer = RbmTrainer::with_seed(
            &data,
            None,
            config,
            CdMethod::ContrastiveDivergence { gibbs_steps: 1 },
            GradientStrategy::Linear,
            4,
        )
        .unwrap();
        assert!(trainer.start(&mut rbm, &mut NullObserver).is_ok());
    }

    #[test]
    fn persistent_chains_stay_isolated_per_package() {
        let data = cluster_samples();
        let mut rbm = Rbm::with_seed(RbmKind::BinaryBinary, 6, 3, RbmWeightInit::Uniform, 5).unwrap();
        let mut trainer = RbmTrainer::with_seed(
            &data,
            None,
            rbm_config(1),
            CdMethod::FastPersistent { fast_decay: 0.95 },
            GradientStrategy::Linear,
            5,
        )
        .unwrap();
        assert_eq!(trainer.packages, 2);

        // Drive the loop manually to inspect the chains before the terminal
        // transition releases them.
        trainer.session = Some(trainer.allocate_session(&rbm).unwrap());
        let nv = rbm.visible_count();
        {
            let session = trainer.session.as_ref().unwrap();
            assert_eq!(session.persistent_visible.len(), 2 * nv);
            // Identical zero initialization.
            assert_eq!(&session.persistent_visible[..nv], &session.persistent_visible[nv..]);
        }
        for epoch in 1..=5 {
            trainer.train_epoch(&mut rbm, epoch);
        }
        let session = trainer.session.as_ref().unwrap();
        assert_ne!(
            &session.persistent_visible[..nv],
            &session.persistent_visible[nv..],
            "chains fed different packages must diverge"
        );
    }

    #[test]
    fn wrong_visible_width_is_rejected_at_start() {
        let data = cluster_samples();
        let mut rbm = Rbm::with_seed(RbmKind::BinaryBinary, 4, 3, RbmWeightInit::Uniform, 6).unwrap();
        let mut trainer = RbmTrainer::with_seed(
            &data,
            None,
            rbm_config(2),
            CdMethod::ContrastiveDivergence { gibbs_steps: 1 },
            GradientStrategy::Linear,
            6,
        )
        .unwrap();
        assert!(trainer.start(&mut rbm, &mut NullObserver).is_err());
    }

    #[test]
    fn centered_strategy_trains_without_panicking() {
        let data = cluster_samples();
        let mut rbm = Rbm::with_seed(RbmKind::BinaryBinary, 6, 3, RbmWeightInit::Normal, 7).unwrap();
        let strategy = GradientStrategy::Centered {
            sliding_factor: 0.05,
            visible_offsets: None,
            hidden_offsets: None,
        };
        let report = train(
            &mut rbm,
            &data,
            None,
            rbm_config(20),
            CdMethod::ContrastiveDivergence { gibbs_steps: 1 },
            strategy,
        )
        .unwrap();
        assert!(report.train_error.is_finite());
    }
}
