//! A mini-batch training engine for two neural-network families.
//!
//! `neurotrain` trains feed-forward perceptrons by backpropagation and
//! restricted Boltzmann machines by Contrastive Divergence, sharing one
//! numeric core: a per-weight adaptive learning-rate rule (Silva–Almeida)
//! with momentum, applied to package-accumulated derivatives.
//!
//! # Design goals
//!
//! - Predictable performance: raw `f32` buffers sized once per session, no
//!   per-example allocation, rayon fan-outs partitioned by destination index.
//! - Clear contracts: shapes and hyperparameters are validated when a trainer
//!   is built; hot paths assert instead.
//! - One update rule: both trainers (and both kinds of parameters, weights
//!   and biases) go through [`adaptive::AdaptiveState`], so the sign
//!   convention and the momentum form are identical everywhere.
//!
//! # Data layout
//!
//! - Scalars are `f32`.
//! - Weight matrices are contiguous and row-major over the *output* dimension:
//!   `weights[neuron * previous_size + input]` for MLP blocks,
//!   `weights[hidden * visible_count + visible]` for RBMs.
//! - [`Samples`] and [`TrainingPairs`] store examples contiguously row-major.
//!
//! # Training sessions
//!
//! A trainer borrows its data sets, validates everything up front, and runs a
//! blocking `start()` that owns the epoch/package loop:
//! `NotStarted → InProgress → {Stopped, Finished}`. Cancellation goes through
//! a [`StopToken`] observed at epoch boundaries; per-epoch
//! `(epoch, train_error, test_error)` records reach the caller through a
//! [`TrainObserver`]. Held-out error is NaN when no test data was supplied.
//!
//! # Quick start
//!
//! ```rust
//! use neurotrain::{
//!     Activation, BackpropTrainer, FeedForwardNetwork, NullObserver, TrainConfig,
//!     TrainingPairs, WeightInit,
//! };
//!
//! # fn main() -> neurotrain::Result<()> {
//! let xor = TrainingPairs::from_rows(
//!     &[vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
//!     &[vec![0.0], vec![1.0], vec![1.0], vec![0.0]],
//! )?;
//!
//! let mut net = FeedForwardNetwork::builder(2)?
//!     .add_layer(2, Activation::Sigmoid { alpha: 1.0 })?
//!     .add_layer(1, Activation::Sigmoid { alpha: 1.0 })?
//!     .build_with_seed(WeightInit::Uniform, 0)?;
//!
//! let config = TrainConfig {
//!     package_size: 4,
//!     max_epochs: 500,
//!     base_learn_speed: 0.1,
//!     ..TrainConfig::default()
//! };
//! let mut trainer = BackpropTrainer::with_seed(&xor, None, config, 0)?;
//! let report = trainer.start(&mut net, &mut NullObserver)?;
//! assert!(report.train_error.is_finite());
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod adaptive;
pub mod backprop;
pub mod block;
pub mod cd;
pub mod config;
pub mod data;
pub mod error;
pub mod gradient;
pub mod learn_rate;
pub mod metric;
pub mod network;
pub mod process;
pub mod rbm;
pub mod regularization;
pub mod sampler;

pub use activation::Activation;
pub use adaptive::{AdaptiveRule, AdaptiveState};
pub use backprop::BackpropTrainer;
pub use block::{BlockKind, NeuralBlock};
pub use cd::{CdMethod, RbmTrainer};
pub use config::TrainConfig;
pub use data::{Samples, TrainingPairs};
pub use error::{Error, Result};
pub use gradient::{GradientAccumulator, GradientStrategy, RbmGradients};
pub use learn_rate::LearnRateSchedule;
pub use metric::Metric;
pub use network::{FeedForwardNetwork, NetworkBuilder, WeightInit};
pub use process::{NullObserver, ObserverFn, SessionState, StopToken, TrainObserver, TrainReport};
pub use rbm::{Rbm, RbmKind, RbmWeightInit};
pub use regularization::Regularization;
