//! Activation functions.
//!
//! A dense block computes a pre-activation value `net = W x + b` and applies an
//! activation element-wise: `state = activation(net)`. Backprop works from the
//! cached *post-activation* state wherever the derivative can be expressed in
//! terms of it (sigmoid `α·y·(1-y)`, tanh `(β/α)(α-y)(α+y)`), which keeps the
//! hot path free of extra transcendental calls.
//!
//! Softmax is intentionally degenerate here: its normalization runs inside the
//! softmax block, and its derivative is fused into the cross-entropy partial
//! derivative. The with-factors form is therefore a pass-through copy and the
//! scalar forms return 0; the network builder only accepts softmax on the
//! output tier.

use rayon::prelude::*;

use crate::{Error, Result};

const SCALE_GRAIN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Element-wise activation function of a block.
pub enum Activation {
    /// Logistic sigmoid `1 / (1 + exp(-alpha * x))`.
    Sigmoid { alpha: f32 },
    /// Scaled hyperbolic tangent `alpha * tanh(beta * x)`.
    Tanh { alpha: f32, beta: f32 },
    /// Softmax over the whole block output.
    Softmax,
}

impl Activation {
    /// Validate activation parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Activation::Sigmoid { alpha } => {
                if !(alpha.is_finite() && alpha > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "sigmoid alpha must be finite and > 0, got {alpha}"
                    )));
                }
            }
            Activation::Tanh { alpha, beta } => {
                if !(alpha.is_finite() && alpha > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "tanh alpha must be finite and > 0, got {alpha}"
                    )));
                }
                if !(beta.is_finite() && beta > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "tanh beta must be finite and > 0, got {beta}"
                    )));
                }
            }
            Activation::Softmax => {}
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn calculate(self, x: f32) -> f32 {
        match self {
            Activation::Sigmoid { alpha } => sigmoid(alpha * x),
            Activation::Tanh { alpha, beta } => alpha * (beta * x).tanh(),
            Activation::Softmax => 0.0,
        }
    }

    /// Derivative with respect to the input.
    #[inline]
    pub(crate) fn derivative(self, x: f32) -> f32 {
        match self {
            Activation::Sigmoid { alpha } => {
                let y = sigmoid(alpha * x);
                alpha * y * (1.0 - y)
            }
            Activation::Tanh { alpha, beta } => {
                let t = (beta * x).tanh();
                alpha * beta * (1.0 - t * t)
            }
            Activation::Softmax => 0.0,
        }
    }

    /// Derivative expressed in terms of the cached post-activation state `y`.
    #[inline]
    pub(crate) fn derivative_from_state(self, y: f32) -> f32 {
        match self {
            Activation::Sigmoid { alpha } => alpha * y * (1.0 - y),
            Activation::Tanh { alpha, beta } => (beta / alpha) * (alpha - y) * (alpha + y),
            Activation::Softmax => 0.0,
        }
    }

    /// Overwrite `target[i] = factors[i] * derivative(state[i])`.
    ///
    /// Used on the output layer, where `factors` is the loss partial
    /// derivative. For softmax the derivative is fused into the loss, so this
    /// is a plain copy.
    pub(crate) fn derivative_with_factors(self, target: &mut [f32], factors: &[f32], state: &[f32]) {
        debug_assert_eq!(target.len(), state.len());
        debug_assert_eq!(factors.len(), state.len());

        match self {
            Activation::Softmax => target.copy_from_slice(factors),
            _ => {
                target
                    .par_iter_mut()
                    .zip(factors.par_iter())
                    .zip(state.par_iter())
                    .with_min_len(SCALE_GRAIN)
                    .for_each(|((t, &f), &y)| {
                        *t = f * self.derivative_from_state(y);
                    });
            }
        }
    }

    /// Multiply `target[i] *= derivative(state[i])` in place.
    ///
    /// Used for hidden-layer local gradients. Must not be reached for softmax
    /// (the builder rejects softmax on hidden tiers); matches the degenerate
    /// no-op contract.
    pub(crate) fn scale_by_derivative(self, target: &mut [f32], state: &[f32]) {
        debug_assert_eq!(target.len(), state.len());

        if self == Activation::Softmax {
            return;
        }
        target
            .par_iter_mut()
            .zip(state.par_iter())
            .with_min_len(SCALE_GRAIN)
            .for_each(|(t, &y)| {
                *t *= self.derivative_from_state(y);
            });
    }

    /// Inverse of the activation, for de-normalization of outputs.
    #[inline]
    pub fn inverse(self, y: f32) -> f32 {
        match self {
            Activation::Sigmoid { alpha } => (y / (1.0 - y)).ln() / alpha,
            Activation::Tanh { alpha, beta } => (y / alpha).atanh() / beta,
            Activation::Softmax => 0.0,
        }
    }
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    // Numerically stable in both tails.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}
