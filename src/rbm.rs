//! Restricted Boltzmann machine core.
//!
//! Two layers (visible, hidden) share one weight matrix stored hidden-major:
//! `weights[j * visible_count + i]`. Hidden units are always binary with
//! logistic activation; visible units are binary or Gaussian. Activity can be
//! propagated in both directions, optionally with an additive fast-weight
//! overlay (`W + ΔW`, `bias + Δbias`) that never mutates the base weights —
//! the Fast-PCD trainer drives its persistent chains through these overloads.
//!
//! Every machine owns its RNG. The Bernoulli sampling loops draw from it
//! sequentially, so parallel workers never contend on (or correlate through)
//! shared generator state; the dense activity fan-outs carry the parallel
//! work instead.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Normal, StandardNormal};
use rayon::prelude::*;

use crate::activation::sigmoid;
use crate::{Error, Result};

/// Minimum hidden units per worker in the activity fan-out.
const ACTIVITY_GRAIN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Visible/hidden unit-type pairing.
pub enum RbmKind {
    /// Binary visible, binary hidden.
    BinaryBinary,
    /// Gaussian visible, binary hidden.
    GaussianBinary,
    /// Binary visible, NReLU hidden (not implemented).
    BinaryNrelu,
    /// Gaussian visible, NReLU hidden (not implemented).
    GaussianNrelu,
    /// ReLU visible, NReLU hidden (not implemented).
    ReluNrelu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisibleKind {
    Binary,
    Gaussian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Initial weight distribution for an RBM.
pub enum RbmWeightInit {
    /// Leave weights at zero.
    Zero,
    /// `U(-b, b)` with `b = 4·sqrt(6 / (visible + hidden))`.
    Uniform,
    /// `N(0, σ)` with `σ = 2·sqrt(6 / (visible + hidden))`.
    Normal,
}

#[derive(Debug)]
pub struct Rbm {
    visible_count: usize,
    hidden_count: usize,
    /// Hidden-major matrix with shape `(hidden_count, visible_count)`.
    weights: Vec<f32>,
    visible_bias: Vec<f32>,
    hidden_bias: Vec<f32>,
    visible_state: Vec<f32>,
    hidden_state: Vec<f32>,
    visible_kind: VisibleKind,
    rng: StdRng,
}

impl Rbm {
    /// Build a machine with a deterministic seed.
    ///
    /// The NReLU pairings are declared but not implemented and return
    /// [`Error::NotImplemented`].
    pub fn with_seed(
        kind: RbmKind,
        visible_count: usize,
        hidden_count: usize,
        init: RbmWeightInit,
        seed: u64,
    ) -> Result<Self> {
        let visible_kind = match kind {
            RbmKind::BinaryBinary => VisibleKind::Binary,
            RbmKind::GaussianBinary => VisibleKind::Gaussian,
            RbmKind::BinaryNrelu | RbmKind::GaussianNrelu | RbmKind::ReluNrelu => {
                return Err(Error::NotImplemented(format!(
                    "RBM unit pairing {kind:?} is not implemented"
                )));
            }
        };
        if visible_count == 0 || hidden_count == 0 {
            return Err(Error::InvalidConfig(
                "RBM layer sizes must be > 0".to_owned(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights = vec![0.0; visible_count * hidden_count];
        match init {
            RbmWeightInit::Zero => {}
            RbmWeightInit::Uniform => {
                let bound = 4.0 * (6.0 / (visible_count + hidden_count) as f32).sqrt();
                let dist = Uniform::new(-bound, bound);
                for w in weights.iter_mut() {
                    *w = dist.sample(&mut rng);
                }
            }
            RbmWeightInit::Normal => {
                let sigma = 2.0 * (6.0 / (visible_count + hidden_count) as f32).sqrt();
                let dist = Normal::new(0.0, sigma)
                    .expect("sigma is finite and positive for non-empty layers");
                for w in weights.iter_mut() {
                    *w = dist.sample(&mut rng);
                }
            }
        }

        Ok(Self {
            visible_count,
            hidden_count,
            weights,
            visible_bias: vec![0.0; visible_count],
            hidden_bias: vec![0.0; hidden_count],
            visible_state: vec![0.0; visible_count],
            hidden_state: vec![0.0; hidden_count],
            visible_kind,
            rng,
        })
    }

    #[inline]
    pub fn visible_count(&self) -> usize {
        self.visible_count
    }

    #[inline]
    pub fn hidden_count(&self) -> usize {
        self.hidden_count
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    #[inline]
    pub fn visible_bias(&self) -> &[f32] {
        &self.visible_bias
    }

    #[inline]
    pub fn visible_bias_mut(&mut self) -> &mut [f32] {
        &mut self.visible_bias
    }

    #[inline]
    pub fn hidden_bias(&self) -> &[f32] {
        &self.hidden_bias
    }

    #[inline]
    pub fn hidden_bias_mut(&mut self) -> &mut [f32] {
        &mut self.hidden_bias
    }

    #[inline]
    pub fn visible_states(&self) -> &[f32] {
        &self.visible_state
    }

    #[inline]
    pub fn hidden_states(&self) -> &[f32] {
        &self.hidden_state
    }

    /// Hidden activity from the machine's own visible state.
    pub fn hidden_activity(&mut self) {
        hidden_activity_into(
            &mut self.hidden_state,
            &self.visible_state,
            &self.weights,
            &self.hidden_bias,
            None,
        );
    }

    /// Hidden activity from an external visible state.
    pub fn hidden_activity_from(&mut self, visible: &[f32]) {
        assert_eq!(visible.len(), self.visible_count);
        hidden_activity_into(
            &mut self.hidden_state,
            visible,
            &self.weights,
            &self.hidden_bias,
            None,
        );
    }

    /// Hidden activity from the own visible state under a fast-weight
    /// overlay.
    pub fn hidden_activity_added(&mut self, added_weights: &[f32], added_bias: &[f32]) {
        assert_eq!(added_weights.len(), self.weights.len());
        assert_eq!(added_bias.len(), self.hidden_count);
        hidden_activity_into(
            &mut self.hidden_state,
            &self.visible_state,
            &self.weights,
            &self.hidden_bias,
            Some((added_weights, added_bias)),
        );
    }

    /// Hidden activity from an external visible state under a fast-weight
    /// overlay.
    pub fn hidden_activity_from_added(
        &mut self,
        visible: &[f32],
        added_weights: &[f32],
        added_bias: &[f32],
    ) {
        assert_eq!(visible.len(), self.visible_count);
        assert_eq!(added_weights.len(), self.weights.len());
        assert_eq!(added_bias.len(), self.hidden_count);
        hidden_activity_into(
            &mut self.hidden_state,
            visible,
            &self.weights,
            &self.hidden_bias,
            Some((added_weights, added_bias)),
        );
    }

    /// Visible activity from the machine's hidden state.
    ///
    /// Binary visible units squash through the logistic sigmoid; Gaussian
    /// units take the linear mean plus one `N(0,1)` draw per unit, and their
    /// sampling step is a no-op because the noisy mean already is the sample.
    pub fn visible_activity(&mut self) {
        self.visible_activity_impl(None);
    }

    /// Visible activity under a fast-weight overlay.
    pub fn visible_activity_added(&mut self, added_weights: &[f32], added_bias: &[f32]) {
        assert_eq!(added_weights.len(), self.weights.len());
        assert_eq!(added_bias.len(), self.visible_count);
        self.visible_activity_impl(Some((added_weights, added_bias)));
    }

    fn visible_activity_impl(&mut self, added: Option<(&[f32], &[f32])>) {
        let nv = self.visible_count;

        match (self.visible_kind, added) {
            (VisibleKind::Binary, None) => self.visible_state.copy_from_slice(&self.visible_bias),
            (VisibleKind::Binary, Some((_, added_bias))) => {
                for i in 0..nv {
                    self.visible_state[i] = self.visible_bias[i] + added_bias[i];
                }
            }
            (VisibleKind::Gaussian, None) => {
                for i in 0..nv {
                    let noise: f32 = StandardNormal.sample(&mut self.rng);
                    self.visible_state[i] = self.visible_bias[i] + noise;
                }
            }
            (VisibleKind::Gaussian, Some((_, added_bias))) => {
                for i in 0..nv {
                    let noise: f32 = StandardNormal.sample(&mut self.rng);
                    self.visible_state[i] = self.visible_bias[i] + added_bias[i] + noise;
                }
            }
        }

        // Transposed accumulation: walk weight rows once, scattering each
        // hidden unit's contribution across the visible buffer.
        match added {
            None => {
                for (j, row) in self.weights.chunks_exact(nv).enumerate() {
                    let h = self.hidden_state[j];
                    for i in 0..nv {
                        self.visible_state[i] = row[i].mul_add(h, self.visible_state[i]);
                    }
                }
            }
            Some((added_weights, _)) => {
                for (j, (row, added_row)) in self
                    .weights
                    .chunks_exact(nv)
                    .zip(added_weights.chunks_exact(nv))
                    .enumerate()
                {
                    let h = self.hidden_state[j];
                    for i in 0..nv {
                        self.visible_state[i] += h * (row[i] + added_row[i]);
                    }
                }
            }
        }

        if self.visible_kind == VisibleKind::Binary {
            for v in self.visible_state.iter_mut() {
                *v = sigmoid(*v);
            }
        }
    }

    /// Binarize the visible activity: `v[i] = 1[U(0,1) < v[i]]`.
    ///
    /// No-op for Gaussian visible units.
    pub fn visible_sampling(&mut self) {
        if self.visible_kind == VisibleKind::Gaussian {
            return;
        }
        for v in self.visible_state.iter_mut() {
            *v = if self.rng.gen::<f32>() < *v { 1.0 } else { 0.0 };
        }
    }

    /// Binarize the hidden activity: `h[j] = 1[U(0,1) < h[j]]`.
    pub fn hidden_sampling(&mut self) {
        for h in self.hidden_state.iter_mut() {
            *h = if self.rng.gen::<f32>() < *h { 1.0 } else { 0.0 };
        }
    }

    /// Copy the visible state into `target`.
    pub fn visible_states_to(&self, target: &mut [f32]) {
        target.copy_from_slice(&self.visible_state);
    }

    /// Copy the hidden state into `target`.
    pub fn hidden_states_to(&self, target: &mut [f32]) {
        target.copy_from_slice(&self.hidden_state);
    }

    /// One full reconstruction: hidden activity from `input`, hidden sample,
    /// visible activity, visible sample, copy out.
    ///
    /// Shape contract: `input.len() == output.len() == visible_count`.
    pub fn predict(&mut self, input: &[f32], output: &mut [f32]) {
        assert_eq!(input.len(), self.visible_count);
        assert_eq!(output.len(), self.visible_count);

        self.hidden_activity_from(input);
        self.hidden_sampling();
        self.visible_activity();
        self.visible_sampling();
        output.copy_from_slice(&self.visible_state);
    }
}

fn hidden_activity_into(
    hidden_state: &mut [f32],
    visible: &[f32],
    weights: &[f32],
    hidden_bias: &[f32],
    added: Option<(&[f32], &[f32])>,
) {
    let nv = visible.len();

    match added {
        None => {
            hidden_state
                .par_iter_mut()
                .zip(weights.par_chunks(nv))
                .zip(hidden_bias.par_iter())
                .with_min_len(ACTIVITY_GRAIN)
                .for_each(|((h, row), &b)| {
                    let mut sum = b;
                    for (&w, &v) in row.iter().zip(visible) {
                        sum = w.mul_add(v, sum);
                    }
                    *h = sigmoid(sum);
                });
        }
        Some((added_weights, added_bias)) => {
            hidden_state
                .par_iter_mut()
                .zip(weights.par_chunks(nv))
                .zip(added_weights.par_chunks(nv))
                .zip(hidden_bias.par_iter())
                .zip(added_bias.par_iter())
                .with_min_len(ACTIVITY_GRAIN)
                .for_each(|((((h, row), added_row), &b), &ab)| {
                    let mut sum = b + ab;
                    for i in 0..nv {
                        sum += visible[i] * (row[i] + added_row[i]);
                    }
                    *h = sigmoid(sum);
                });
        }
    }
}
