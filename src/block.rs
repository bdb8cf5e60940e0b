//! Dense layer blocks.
//!
//! A block owns its weight matrix (row-major, neuron-major:
//! `weights[n * previous_size + i]`), bias vector and two working buffers:
//! `net` (pre-activation) and `state` (post-activation). Buffers are sized at
//! construction and never resized; every forward pass overwrites them in
//! place.
//!
//! Neurons within a block are independent, so the forward pass fans out over
//! the neuron dimension. The softmax variant needs one extra reduction for
//! the normalizing sum.

use rayon::prelude::*;

use crate::Activation;

/// Minimum neurons per worker in the forward fan-out.
const FORWARD_GRAIN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Dense,
    Softmax,
}

#[derive(Debug, Clone)]
pub struct NeuralBlock {
    size: usize,
    previous_size: usize,
    /// Row-major matrix with shape `(size, previous_size)`.
    weights: Vec<f32>,
    bias: Vec<f32>,
    net: Vec<f32>,
    state: Vec<f32>,
    activation: Activation,
    kind: BlockKind,
}

impl NeuralBlock {
    pub fn new(previous_size: usize, size: usize, activation: Activation) -> Self {
        let kind = if activation == Activation::Softmax {
            BlockKind::Softmax
        } else {
            BlockKind::Dense
        };
        Self {
            size,
            previous_size,
            weights: vec![0.0; size * previous_size],
            bias: vec![0.0; size],
            net: vec![0.0; size],
            state: vec![0.0; size],
            activation,
            kind,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn previous_size(&self) -> usize {
        self.previous_size
    }

    #[inline]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
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
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    #[inline]
    pub fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    /// Pre-activation values of the most recent forward pass.
    #[inline]
    pub fn net(&self) -> &[f32] {
        &self.net
    }

    /// Post-activation values of the most recent forward pass.
    #[inline]
    pub fn state(&self) -> &[f32] {
        &self.state
    }

    /// Forward pass from `input` (the previous layer's state or the raw
    /// network input).
    ///
    /// Per neuron `n`: `net[n] = Σ_i input[i]·w[n,i] + bias[n]`,
    /// `state[n] = activation(net[n])`. The softmax block instead
    /// exponentiates all `net` values, reduces their sum and normalizes so
    /// the states form a distribution.
    ///
    /// Shape contract: `input.len() == self.previous_size()`.
    pub fn calculate(&mut self, input: &[f32]) {
        assert_eq!(
            input.len(),
            self.previous_size,
            "input len {} does not match block previous_size {}",
            input.len(),
            self.previous_size
        );

        let previous_size = self.previous_size;
        let activation = self.activation;
        let weights = &self.weights;
        let bias = &self.bias;

        match self.kind {
            BlockKind::Dense => {
                self.net
                    .par_iter_mut()
                    .zip(self.state.par_iter_mut())
                    .zip(weights.par_chunks(previous_size))
                    .zip(bias.par_iter())
                    .with_min_len(FORWARD_GRAIN)
                    .for_each(|(((net_n, state_n), row), &b)| {
                        let mut sum = b;
                        for (&w, &x) in row.iter().zip(input) {
                            sum = w.mul_add(x, sum);
                        }
                        *net_n = sum;
                        *state_n = activation.calculate(sum);
                    });
            }
            BlockKind::Softmax => {
                self.net
                    .par_iter_mut()
                    .zip(self.state.par_iter_mut())
                    .zip(weights.par_chunks(previous_size))
                    .zip(bias.par_iter())
                    .with_min_len(FORWARD_GRAIN)
                    .for_each(|(((net_n, state_n), row), &b)| {
                        let mut sum = b;
                        for (&w, &x) in row.iter().zip(input) {
                            sum = w.mul_add(x, sum);
                        }
                        *net_n = sum;
                        *state_n = sum.exp();
                    });

                let exp_sum: f32 = self.state.par_iter().with_min_len(FORWARD_GRAIN).sum();
                for s in self.state.iter_mut() {
                    *s /= exp_sum;
                }
            }
        }
    }
}
